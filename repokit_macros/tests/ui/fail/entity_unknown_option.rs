use repokit_macros::Entity;

#[derive(Entity)]
struct Odd {
    #[fetch(id)]
    id: i64,
    #[fetch(primary)]
    name: String,
}

fn main() {}
