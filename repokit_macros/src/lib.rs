//! Procedural macros for the `repokit` data-access toolkit.
//!
//! `#[derive(Entity)]` inspects a struct with named fields and generates:
//! - table metadata (`Fetchable`, `Identifiable`, `Insertable`, `Updatable`);
//! - a `Record` implementation whose field registry is built once on first use
//!   and then drives dynamic filters, sorting, projections and row mapping.
//!
//! Field attributes:
//! - `#[fetch(id)]` marks the primary key (exactly one field);
//! - `#[fetch(column = "...")]` overrides the column name;
//! - `#[fetch(skip)]` hides the field from persistence and from the registry;
//! - `#[fetch(nested)]` marks a field whose type is itself an entity. It is not
//!   persisted, but projections can read its fields (`customer_name` reads
//!   `customer.name`).
//!
//! Struct attribute: `#[entity(table = "...")]`. Without it the table name is
//! the snake_case struct name with an `s` appended (`OrderLine` -> `order_lines`).

use proc_macro::TokenStream;
use quote::quote;
use syn::{
    ext::IdentExt,
    parse::{Parse, ParseStream},
    parse_macro_input, Data, DeriveInput, Fields, Ident, LitStr, Token, Type,
};

use inflections::Inflect;

/// A helper struct for parsing `key = "value"` style meta attributes.
struct MetaNameValue {
    pub path: syn::Path,
    pub _eq_token: Token![=],
    pub value: LitStr,
}

impl Parse for MetaNameValue {
    fn parse(input: ParseStream) -> syn::Result<Self> {
        Ok(Self {
            path: input.parse()?,
            _eq_token: input.parse()?,
            value: input.parse()?,
        })
    }
}

/// Inner type of an `Option<T>`, if `ty` is one.
fn option_inner(ty: &Type) -> Option<&Type> {
    let Type::Path(type_path) = ty else {
        return None;
    };
    if type_path.qself.is_some() {
        return None;
    }
    let segment = type_path.path.segments.last()?;
    if segment.ident != "Option" {
        return None;
    }
    match &segment.arguments {
        syn::PathArguments::AngleBracketed(args) => match args.args.first() {
            Some(syn::GenericArgument::Type(inner)) => Some(inner),
            _ => None,
        },
        _ => None,
    }
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Role {
    Column,
    Id,
    Skip,
    Nested,
}

struct FieldMetadata {
    ident: Ident,
    /// Field name without any `r#` prefix.
    name: String,
    ty: Type,
    column_name: String,
    role: Role,
}

impl FieldMetadata {
    fn is_persisted(&self) -> bool {
        matches!(self.role, Role::Column | Role::Id)
    }
}

fn parse_field_metadata(input: &DeriveInput) -> Vec<FieldMetadata> {
    let fields = match &input.data {
        Data::Struct(s) => match &s.fields {
            Fields::Named(named) => named,
            _ => panic!("#[derive(Entity)] only supports structs with named fields."),
        },
        _ => panic!("#[derive(Entity)] can only be used on structs."),
    };

    fields
        .named
        .iter()
        .filter_map(|field| {
            let ident = field.ident.clone()?;
            let name = ident.unraw().to_string();
            let mut column_name = name.clone();
            let mut role = Role::Column;

            for attr in field.attrs.iter().filter(|a| a.path().is_ident("fetch")) {
                let list = attr
                    .meta
                    .require_list()
                    .expect("Expected #[fetch(...)] with a list of options");
                list.parse_nested_meta(|meta| {
                    if meta.path.is_ident("column") {
                        let s: LitStr = meta.value()?.parse()?;
                        column_name = s.value();
                    } else if meta.path.is_ident("id") {
                        role = Role::Id;
                    } else if meta.path.is_ident("skip") {
                        role = Role::Skip;
                    } else if meta.path.is_ident("nested") {
                        role = Role::Nested;
                    } else {
                        return Err(meta.error("unknown #[fetch] option; expected id, column, skip or nested"));
                    }
                    Ok(())
                })
                .expect("Invalid #[fetch(...)] attribute syntax");
            }
            Some(FieldMetadata {
                ident,
                name,
                ty: field.ty.clone(),
                column_name,
                role,
            })
        })
        .collect()
}

fn is_valid_sql_ident(s: &str) -> bool {
    let mut chars = s.chars();
    match chars.next() {
        Some(c) if c == '_' || c.is_ascii_alphabetic() => {}
        _ => return false,
    }
    chars.all(|ch| ch == '_' || ch.is_ascii_alphanumeric())
}

#[proc_macro_derive(Entity, attributes(entity, fetch))]
pub fn derive_entity(input: TokenStream) -> TokenStream {
    let input = parse_macro_input!(input as DeriveInput);
    let struct_name = &input.ident;
    if !input.generics.params.is_empty() {
        panic!("#[derive(Entity)] does not support generic structs.");
    }
    let fields = parse_field_metadata(&input);

    let table_override = input.attrs.iter().find_map(|attr| {
        if !attr.path().is_ident("entity") {
            return None;
        }
        let meta = attr.meta.require_list().ok()?;
        let MetaNameValue { path, value, .. } = syn::parse2(meta.tokens.clone()).ok()?;
        path.is_ident("table").then(|| value.value())
    });
    let entity_name = struct_name.unraw().to_string();
    let table_name = table_override.unwrap_or_else(|| format!("{}s", entity_name.to_snake_case()));

    if !is_valid_sql_ident(&table_name) {
        panic!("Invalid table name `{table_name}`. Use ASCII letters, digits, or `_`, starting with a letter or `_`.");
    }
    for f in fields.iter().filter(|f| f.is_persisted()) {
        if !is_valid_sql_ident(&f.column_name) {
            panic!("Invalid column name `{}`. Use ASCII letters, digits, or `_`, starting with a letter or `_`.", f.column_name);
        }
    }

    let id_count = fields.iter().filter(|f| f.role == Role::Id).count();
    if id_count != 1 {
        panic!("Exactly one field must be marked with #[fetch(id)] (found {id_count}).");
    }
    let Some(id_field) = fields.iter().find(|f| f.role == Role::Id) else {
        unreachable!("validated above")
    };

    // --- Fetchable ---
    let select_columns: Vec<_> = fields
        .iter()
        .filter(|f| f.is_persisted())
        .map(|f| &f.column_name)
        .collect();
    let fetchable_impl = quote! {
        impl ::repokit_core::Fetchable for #struct_name {
            const TABLE: &'static str = #table_name;
            const SELECT_COLUMNS: &'static [&'static str] = &[#(#select_columns),*];
        }
    };

    // --- Identifiable ---
    let id_ident = &id_field.ident;
    let id_ty = &id_field.ty;
    let id_column_name = &id_field.column_name;
    let (key_ty, id_accessor) = match option_inner(id_ty) {
        Some(inner) => (inner, quote! { ::core::clone::Clone::clone(&self.#id_ident) }),
        None => (
            id_ty,
            quote! { ::core::option::Option::Some(::core::clone::Clone::clone(&self.#id_ident)) },
        ),
    };
    let identifiable_impl = quote! {
        impl ::repokit_core::Identifiable for #struct_name {
            type Key = #key_ty;
            const ID_COLUMN: &'static str = #id_column_name;
            fn id(&self) -> ::core::option::Option<Self::Key> {
                #id_accessor
            }
        }
    };

    // --- Insertable / Updatable ---
    let to_param = |f: &FieldMetadata| {
        let ident = &f.ident;
        quote! { ::repokit_core::FieldValue::to_param(&self.#ident) }
    };
    let data_fields: Vec<_> = fields.iter().filter(|f| f.role == Role::Column).collect();
    let data_columns: Vec<_> = data_fields.iter().map(|f| &f.column_name).collect();
    let data_values: Vec<_> = data_fields.iter().map(|f| to_param(*f)).collect();
    let id_value = to_param(id_field);

    let write_impls = quote! {
        impl ::repokit_core::Insertable for #struct_name {
            const INSERT_COLUMNS: &'static [&'static str] = &[#(#data_columns),*];
            fn insert_values(&self) -> ::std::vec::Vec<::repokit_core::ParamValue> {
                ::std::vec![#(#data_values),*]
            }
        }

        impl ::repokit_core::Updatable for #struct_name {
            const UPDATE_COLUMNS: &'static [&'static str] = &[#(#data_columns),*];
            fn update_values(&self) -> ::std::vec::Vec<::repokit_core::ParamValue> {
                ::std::vec![#(#data_values,)* #id_value]
            }
        }
    };

    // --- Record ---
    let entries: Vec<_> = fields
        .iter()
        .filter(|f| f.role != Role::Skip)
        .map(|f| {
            let ident = &f.ident;
            let ty = &f.ty;
            let name = &f.name;
            if f.role == Role::Nested {
                return quote! {
                    ::repokit_core::Field::<Self>::nested(
                        #name,
                        ::repokit_core::Nested::<Self>::of::<#ty>(
                            |this: &#struct_name, child: &str| ::repokit_core::Record::get_field(&this.#ident, child),
                        ),
                    )
                };
            }
            let column = &f.column_name;
            quote! {
                ::repokit_core::Field::<Self>::of::<#ty>(
                    #name,
                    #column,
                    |this: &#struct_name| ::repokit_core::FieldValue::to_param(&this.#ident),
                )
                .writable(
                    |this: &mut #struct_name, value: ::repokit_core::ParamValue| -> ::core::result::Result<(), ::repokit_core::CoerceError> {
                        this.#ident = <#ty as ::repokit_core::FieldValue>::from_param(value)?;
                        ::core::result::Result::Ok(())
                    },
                )
            }
        })
        .collect();

    let record_impl = quote! {
        impl ::repokit_core::Record for #struct_name {
            fn fields() -> &'static ::repokit_core::FieldRegistry<Self> {
                static FIELDS: ::std::sync::OnceLock<::repokit_core::FieldRegistry<#struct_name>> =
                    ::std::sync::OnceLock::new();
                FIELDS.get_or_init(|| {
                    ::repokit_core::FieldRegistry::new(#entity_name, ::std::vec![#(#entries),*])
                })
            }
        }
    };

    let expanded = quote! {
        #fetchable_impl
        #identifiable_impl
        #write_impls
        #record_impl
    };
    TokenStream::from(expanded)
}
