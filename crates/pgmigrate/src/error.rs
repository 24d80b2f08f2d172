//! Error types for the migration library.

use thiserror::Error;

/// Main error type for migration and dump operations.
#[derive(Error, Debug)]
pub enum MigrateError {
    /// Configuration error (invalid YAML, missing fields, bad identifiers).
    #[error("configuration error: {0}")]
    Config(String),

    /// Database connection or query error.
    #[error("database error: {0}")]
    Db(#[from] tokio_postgres::Error),

    /// Connection pool error with context.
    #[error("pool error: {message}\n  context: {context}")]
    Pool { message: String, context: String },

    /// An operational mutator was invoked before the migrations table exists.
    #[error("migrations table {0} does not exist")]
    MissingTable(String),

    /// IO error (reading migration files, writing the dump).
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// YAML configuration error.
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// The operation was cancelled before completing.
    #[error("operation cancelled")]
    Cancelled,

    /// Multiple failures from independent cleanup paths, none dropped.
    #[error("{}", join_messages(.0))]
    Join(Vec<MigrateError>),
}

fn join_messages(errors: &[MigrateError]) -> String {
    errors
        .iter()
        .map(|e| e.to_string())
        .collect::<Vec<_>>()
        .join("\n")
}

impl MigrateError {
    /// Create a Pool error with context about where it occurred.
    pub fn pool(message: impl ToString, context: impl Into<String>) -> Self {
        MigrateError::Pool {
            message: message.to_string(),
            context: context.into(),
        }
    }

    /// Combine a primary error with an error from a cleanup path so that
    /// neither is silently dropped. The primary error stays first.
    pub fn join(primary: Option<MigrateError>, secondary: MigrateError) -> MigrateError {
        match primary {
            None => secondary,
            Some(MigrateError::Join(mut errors)) => {
                errors.push(secondary);
                MigrateError::Join(errors)
            }
            Some(first) => MigrateError::Join(vec![first, secondary]),
        }
    }

    /// Format error with full details including the source chain.
    pub fn format_detailed(&self) -> String {
        let mut output = format!("Error: {}\n", self);
        let mut source = std::error::Error::source(self);
        let mut depth = 1;
        while let Some(err) = source {
            output.push_str(&format!("\nCaused by:\n  {}: {}", depth, err));
            source = err.source();
            depth += 1;
        }
        output
    }
}

/// Result type alias for migration operations.
pub type Result<T> = std::result::Result<T, MigrateError>;

/// Structured PostgreSQL error metadata, extracted from a driver error for
/// log enrichment. All fields except `code` and `severity` are optional on
/// the wire.
///
/// See <https://www.postgresql.org/docs/current/protocol-error-fields.html>.
#[derive(Debug, Clone, Default)]
pub struct PgErrorData {
    pub code: String,
    pub detail: Option<String>,
    pub hint: Option<String>,
    pub schema: Option<String>,
    pub table: Option<String>,
    pub column: Option<String>,
    pub constraint: Option<String>,
    pub where_: Option<String>,
    pub severity: String,
}

impl PgErrorData {
    /// Pull the server error fields off a driver error, if the error
    /// originated from the PostgreSQL server rather than the connection.
    pub fn from_error(err: &tokio_postgres::Error) -> Option<Self> {
        let db = err.as_db_error()?;
        Some(Self {
            code: db.code().code().to_string(),
            detail: db.detail().map(str::to_string),
            hint: db.hint().map(str::to_string),
            schema: db.schema().map(str::to_string),
            table: db.table().map(str::to_string),
            column: db.column().map(str::to_string),
            constraint: db.constraint().map(str::to_string),
            where_: db.where_().map(str::to_string),
            severity: db.severity().to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_join_keeps_primary_first() {
        let primary = MigrateError::Config("bad".into());
        let joined = MigrateError::join(Some(primary), MigrateError::Cancelled);
        let rendered = joined.to_string();
        let first = rendered.lines().next().unwrap();
        assert!(first.contains("bad"));
        assert!(rendered.contains("cancelled"));
    }

    #[test]
    fn test_join_flattens() {
        let joined = MigrateError::join(
            Some(MigrateError::Join(vec![
                MigrateError::Config("a".into()),
                MigrateError::Config("b".into()),
            ])),
            MigrateError::Config("c".into()),
        );
        match joined {
            MigrateError::Join(errors) => assert_eq!(errors.len(), 3),
            other => panic!("expected Join, got {other:?}"),
        }
    }

    #[test]
    fn test_join_without_primary() {
        let joined = MigrateError::join(None, MigrateError::Cancelled);
        assert!(matches!(joined, MigrateError::Cancelled));
    }
}
