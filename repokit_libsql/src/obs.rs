use std::time::Instant;

use repokit_core::{ContextOptions, ParamValue, RepoError};

#[inline]
pub(crate) fn obs_record(op: &str, table: &str, start: Instant, rows: usize, success: bool) {
    let elapsed = start.elapsed().as_millis() as u64;
    tracing::info!(
        sql_kind = "sql",
        table = table,
        op = op,
        rows = rows,
        elapsed_ms = elapsed,
        success = success,
        "repo op"
    );
    #[cfg(feature = "metrics")]
    {
        metrics::counter!("repo_ops_total", 1, "op" => op.to_string(), "table" => table.to_string(), "success" => success.to_string());
        metrics::histogram!("repo_op_duration_ms", elapsed as f64, "op" => op.to_string(), "table" => table.to_string());
        if !success {
            metrics::counter!("repo_op_errors_total", 1, "op" => op.to_string(), "table" => table.to_string());
        }
    }
}

/// Statement logging and error detail switches, taken from [`ContextOptions`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SqlDiagnostics {
    pub log_statements: bool,
    pub sensitive_data_logging: bool,
    pub detailed_errors: bool,
}

impl Default for SqlDiagnostics {
    fn default() -> Self {
        Self {
            log_statements: true,
            sensitive_data_logging: false,
            detailed_errors: false,
        }
    }
}

impl From<&ContextOptions> for SqlDiagnostics {
    fn from(o: &ContextOptions) -> Self {
        Self {
            log_statements: o.log_statements,
            sensitive_data_logging: o.sensitive_data_logging,
            detailed_errors: o.detailed_errors,
        }
    }
}

impl SqlDiagnostics {
    /// Log a statement before it runs. Parameter values are only included
    /// with sensitive data logging.
    pub(crate) fn statement(&self, sql: &str, params: &[ParamValue]) {
        if !self.log_statements {
            return;
        }
        if self.sensitive_data_logging {
            tracing::debug!(sql, params = ?params, "executing statement");
        } else {
            tracing::debug!(sql, params = params.len(), "executing statement");
        }
    }

    /// Wrap a driver error, attaching the statement when detailed errors are on.
    pub(crate) fn fail(&self, sql: &str, e: libsql::Error) -> RepoError {
        if self.detailed_errors {
            RepoError::statement(sql, e)
        } else {
            RepoError::backend(e)
        }
    }
}
