//! Pool construction from a connection string.

use deadpool_postgres::{Manager, ManagerConfig, Pool, RecyclingMethod};
use tokio_postgres::NoTls;
use tracing::{debug, info};

use crate::error::{MigrateError, Result};

/// Name of the connection-string parameter controlling server-side prepared
/// statement reuse. Recognized values: `disabled` (the default) and
/// `prepared`.
const STATEMENT_CACHE_PARAM: &str = "statement_cache_mode";

/// How connections handle server-side prepared statements between uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatementCacheMode {
    /// Discard session state when a connection is recycled. Works correctly
    /// behind PgBouncer-like poolers, where cached server-side prepared
    /// statements break in ways that are hard to diagnose. The default when
    /// the connection string does not say otherwise.
    Disabled,
    /// Keep prepared statements across uses of a connection. Faster when
    /// connecting directly to a PostgreSQL server.
    Prepared,
}

impl StatementCacheMode {
    fn parse(value: &str) -> Result<Self> {
        match value {
            "disabled" => Ok(Self::Disabled),
            "prepared" => Ok(Self::Prepared),
            other => Err(MigrateError::Config(format!(
                "invalid {STATEMENT_CACHE_PARAM} '{other}': expected 'disabled' or 'prepared'"
            ))),
        }
    }

    fn recycling_method(self) -> RecyclingMethod {
        match self {
            // Clean runs a DISCARD-style reset, dropping prepared statements
            // with the rest of the session state.
            Self::Disabled => RecyclingMethod::Clean,
            Self::Prepared => RecyclingMethod::Fast,
        }
    }
}

/// Open a connection pool for `database_url`.
///
/// The URL may carry a `statement_cache_mode` query parameter; when it does
/// not, the pooler-safe mode is used. The parameter is stripped before the
/// rest of the string is handed to the driver.
pub async fn connect(database_url: &str) -> Result<Pool> {
    let (cleaned, mode) = split_statement_cache_mode(database_url)?;
    let pg_config: tokio_postgres::Config = cleaned
        .parse()
        .map_err(|e| MigrateError::Config(format!("failed to parse 'database' URL: {e}")))?;

    let mgr_config = ManagerConfig {
        recycling_method: mode.recycling_method(),
    };
    let mgr = Manager::from_config(pg_config, NoTls, mgr_config);
    let pool = Pool::builder(mgr)
        .max_size(4)
        .build()
        .map_err(|e| MigrateError::pool(e, "creating connection pool"))?;

    // Fail fast on an unreachable or misconfigured database.
    let client = pool
        .get()
        .await
        .map_err(|e| MigrateError::pool(e, "testing database connection"))?;
    client.simple_query("SELECT 1").await?;
    debug!(cache_mode = ?mode, "statement cache mode");
    info!("connected to database");
    Ok(pool)
}

/// Split our `statement_cache_mode` parameter out of a connection string,
/// returning the cleaned string and the selected mode. Both URL
/// (`postgres://...?k=v`) and key/value (`host=... k=v`) forms are handled.
fn split_statement_cache_mode(database_url: &str) -> Result<(String, StatementCacheMode)> {
    let mut mode = StatementCacheMode::Disabled;

    if let Some((base, query)) = database_url.split_once('?') {
        let mut kept = Vec::new();
        for pair in query.split('&').filter(|p| !p.is_empty()) {
            match pair.split_once('=') {
                Some((STATEMENT_CACHE_PARAM, value)) => mode = StatementCacheMode::parse(value)?,
                _ => kept.push(pair),
            }
        }
        let cleaned = if kept.is_empty() {
            base.to_string()
        } else {
            format!("{base}?{}", kept.join("&"))
        };
        return Ok((cleaned, mode));
    }

    // key=value form
    let mut kept = Vec::new();
    for token in database_url.split_whitespace() {
        match token.split_once('=') {
            Some((STATEMENT_CACHE_PARAM, value)) => mode = StatementCacheMode::parse(value)?,
            _ => kept.push(token),
        }
    }
    Ok((kept.join(" "), mode))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_mode_is_pooler_safe() {
        let (cleaned, mode) =
            split_statement_cache_mode("postgres://u:p@localhost:5432/db").unwrap();
        assert_eq!(cleaned, "postgres://u:p@localhost:5432/db");
        assert_eq!(mode, StatementCacheMode::Disabled);
    }

    #[test]
    fn test_explicit_mode_is_stripped() {
        let (cleaned, mode) = split_statement_cache_mode(
            "postgres://u:p@localhost/db?sslmode=disable&statement_cache_mode=prepared",
        )
        .unwrap();
        assert_eq!(cleaned, "postgres://u:p@localhost/db?sslmode=disable");
        assert_eq!(mode, StatementCacheMode::Prepared);
    }

    #[test]
    fn test_lone_parameter_removes_query_string() {
        let (cleaned, mode) = split_statement_cache_mode(
            "postgres://localhost/db?statement_cache_mode=disabled",
        )
        .unwrap();
        assert_eq!(cleaned, "postgres://localhost/db");
        assert_eq!(mode, StatementCacheMode::Disabled);
    }

    #[test]
    fn test_key_value_form() {
        let (cleaned, mode) = split_statement_cache_mode(
            "host=localhost user=postgres statement_cache_mode=prepared dbname=db",
        )
        .unwrap();
        assert_eq!(cleaned, "host=localhost user=postgres dbname=db");
        assert_eq!(mode, StatementCacheMode::Prepared);
    }

    #[test]
    fn test_invalid_mode_rejected() {
        let result =
            split_statement_cache_mode("postgres://localhost/db?statement_cache_mode=auto");
        assert!(result.is_err());
    }
}
