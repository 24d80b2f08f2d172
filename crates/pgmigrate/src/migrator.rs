//! The migration engine: planning, applying, tracking, and verifying SQL
//! migrations.

use std::collections::BTreeMap;
use std::collections::HashMap;

use chrono::{DateTime, Utc};
use deadpool_postgres::Pool;
use serde::Serialize;
use tokio_postgres::{Client, GenericClient};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::error::{MigrateError, PgErrorData, Result};
use crate::migration::{sort_by_id, AppliedMigration, Migration};
use crate::pgtools;
use crate::sessionlock::SessionLock;

/// Default name of the migrations table (with schema) used to store the
/// record of applied migrations.
pub const DEFAULT_TABLE_NAME: &str = "public.pgmigrate_migrations";

/// Prefix for the advisory-lock name, to help prevent conflicts between the
/// migration lock and other users of Postgres advisory locks.
const SESSION_LOCK_PREFIX: &str = "pgmigrate-";

/// A warning produced by [`Migrator::verify`]. Never a hard error.
///
/// Two kinds exist: a migration marked as applied in the database but absent
/// from the migrations directory, and a migration whose current file hash
/// differs from the checksum recorded when it was applied. Both usually mean
/// the migration files were edited or rolled back after an apply; they are
/// worth showing to a human but should not stop an application from starting.
#[derive(Debug, Clone, Serialize)]
pub struct VerificationError {
    pub message: String,
    pub fields: BTreeMap<String, serde_json::Value>,
}

/// The state necessary to perform migration operations: the full set of known
/// migrations and the name of the table used to track what has been applied.
#[derive(Debug, Clone)]
pub struct Migrator {
    /// The full set of migrations that describe the desired state of the
    /// database.
    pub migrations: Vec<Migration>,
    /// The table this migrator uses to keep track of applied migrations. May
    /// be schema-qualified; the schema is created if it does not exist.
    pub table_name: String,
}

impl Migrator {
    pub fn new(migrations: Vec<Migration>) -> Self {
        Self {
            migrations,
            table_name: DEFAULT_TABLE_NAME.to_string(),
        }
    }

    pub fn with_table_name(mut self, table_name: impl Into<String>) -> Self {
        self.table_name = table_name.into();
        self
    }

    /// Apply any not-yet-applied migrations.
    ///
    /// First, an advisory lock is acquired on a dedicated session so that at
    /// most one migrator touches the migrations table at a time. Under the
    /// lock the migrations table is created if missing, a plan is computed,
    /// and each planned migration runs in its own transaction:
    ///
    /// - execute the migration's SQL as a single batch
    /// - insert the applied-migration record
    /// - commit
    ///
    /// A failed migration rolls back, leaves no record, and aborts the run;
    /// migrations applied before the failure stay applied, and the failed one
    /// will be planned again next time. After a fully successful run the
    /// result of [`Migrator::verify`] is returned. The lock is released on
    /// every exit path; a release failure never masks the primary error.
    pub async fn migrate(
        &self,
        pool: &Pool,
        cancel: &CancellationToken,
    ) -> Result<Vec<VerificationError>> {
        let lock_name = format!("{SESSION_LOCK_PREFIX}{}", self.table_name);
        let mut lock = SessionLock::acquire(pool, &lock_name, cancel).await?;
        let outcome = self.migrate_locked(lock.client_mut(), cancel).await;
        let released = lock.release().await;
        match (outcome, released) {
            (Ok(verrs), Ok(())) => Ok(verrs),
            (Ok(_), Err(release_err)) => Err(release_err),
            (Err(err), Ok(())) => Err(err),
            (Err(err), Err(release_err)) => Err(MigrateError::join(Some(err), release_err)),
        }
    }

    async fn migrate_locked(
        &self,
        client: &mut Client,
        cancel: &CancellationToken,
    ) -> Result<Vec<VerificationError>> {
        self.ensure_migrations_table(client).await?;
        // Plan against the locked session so the read sees the table that
        // was just created.
        let plan = self.plan(&*client).await?;
        info!(count = plan.len(), "planning to apply migrations");
        for (i, migration) in plan.iter().enumerate() {
            debug!(index = i, migration_id = %migration.id, "planned");
        }
        for migration in &plan {
            if cancel.is_cancelled() {
                return Err(MigrateError::Cancelled);
            }
            self.apply_migration(client, migration).await?;
        }
        info!("checking for verification errors");
        self.verify(&*client).await
    }

    /// Create the migrations table if it does not exist. If the configured
    /// name carries a schema prefix, the schema is created first.
    async fn ensure_migrations_table(&self, client: &Client) -> Result<()> {
        info!(table_name = %self.table_name, "ensuring migrations table exists");
        let (schema, _) = pgtools::parse_table_name(&self.table_name);
        if !schema.is_empty() {
            let query = format!(
                "CREATE SCHEMA IF NOT EXISTS {}",
                pgtools::quote_identifier(&schema)
            );
            debug!(%query);
            client.batch_execute(&query).await?;
        }
        let query = format!(
            "CREATE TABLE IF NOT EXISTS {} (\n\
             \tid TEXT PRIMARY KEY,\n\
             \tchecksum TEXT NOT NULL,\n\
             \texecution_time_in_millis BIGINT NOT NULL,\n\
             \tapplied_at TIMESTAMPTZ NOT NULL\n\
             )",
            pgtools::quote_identifier(&self.table_name)
        );
        debug!(%query);
        client.batch_execute(&query).await?;
        Ok(())
    }

    /// True if the migrations table exists.
    pub(crate) async fn has_migrations_table(&self, db: &impl GenericClient) -> Result<bool> {
        let (schema, table) = pgtools::parse_table_name(&self.table_name);
        let row = db
            .query_one(
                "SELECT EXISTS (\n\
                 \tSELECT FROM pg_tables WHERE tablename = $1 AND schemaname = $2\n\
                 )",
                &[&table, &schema],
            )
            .await?;
        Ok(row.get(0))
    }

    /// The migrations that would be applied, in the order they would be
    /// applied in: every known migration whose ID has no row in the
    /// migrations table, ascending by ID in lexicographical order.
    ///
    /// A migration is only ever applied once; editing its contents does not
    /// cause it to be re-applied (that surfaces as a verification warning
    /// instead). Migrations may be applied "out of order": if `001`, `003`
    /// are applied and a new `002` appears, the plan is exactly `002`.
    pub async fn plan(&self, db: &impl GenericClient) -> Result<Vec<Migration>> {
        let applied = self.applied(db).await?;
        let applied_ids: HashMap<&str, ()> =
            applied.iter().map(|m| (m.id.as_str(), ())).collect();
        let mut plan: Vec<Migration> = self
            .migrations
            .iter()
            .filter(|m| !applied_ids.contains_key(m.id.as_str()))
            .cloned()
            .collect();
        sort_by_id(&mut plan);
        Ok(plan)
    }

    /// All rows of the migrations table in the order they were applied in
    /// (`applied_at ASC, id ASC`).
    ///
    /// If the table does not exist yet this returns an empty list, not an
    /// error.
    pub async fn applied(&self, db: &impl GenericClient) -> Result<Vec<AppliedMigration>> {
        if !self.has_migrations_table(db).await? {
            return Ok(Vec::new());
        }
        let query = format!(
            "SELECT id, checksum, execution_time_in_millis, applied_at\n\
             FROM {} ORDER BY applied_at ASC, id ASC",
            pgtools::quote_identifier(&self.table_name)
        );
        debug!(%query);
        let rows = db.query(&query, &[]).await?;
        Ok(rows.iter().map(scan_applied).collect())
    }

    /// Run one migration inside a transaction: execute its SQL, insert the
    /// applied-migration record, commit. Any failure rolls the transaction
    /// back so the migration's effects and its record both vanish together.
    async fn apply_migration(&self, client: &mut Client, migration: &Migration) -> Result<()> {
        let started_at = Utc::now();
        let checksum = migration.md5();
        info!(
            migration_id = %migration.id,
            migration_checksum = %checksum,
            "applying migration"
        );
        let tx = client.transaction().await.map_err(|e| {
            error!(error = %e, "tx open");
            MigrateError::Db(e)
        })?;
        // Simple-protocol batch: a migration file may contain any number of
        // statements.
        if let Err(e) = tx.batch_execute(&migration.sql).await {
            log_db_error(&e, &migration.id, "failed to apply migration");
            // Dropping the transaction rolls it back.
            return Err(MigrateError::Db(e));
        }
        let execution_time_in_millis = (Utc::now() - started_at).num_milliseconds();
        info!(
            migration_id = %migration.id,
            execution_time_ms = execution_time_in_millis,
            "migration succeeded"
        );
        let insert = format!(
            "INSERT INTO {}\n\
             ( id, checksum, execution_time_in_millis, applied_at )\n\
             VALUES\n\
             ( $1, $2, $3, $4 )",
            pgtools::quote_identifier(&self.table_name)
        );
        if let Err(e) = tx
            .execute(
                &insert,
                &[&migration.id, &checksum, &execution_time_in_millis, &started_at],
            )
            .await
        {
            log_db_error(&e, &migration.id, "failed to mark migration as applied");
            return Err(MigrateError::Db(e));
        }
        tx.commit().await?;
        info!(migration_id = %migration.id, "marked as applied");
        Ok(())
    }

    /// Compare the migrations table against the known migrations and return
    /// warnings for:
    ///
    /// - applied migrations that are not present on disk
    /// - applied migrations whose current file hash differs from the
    ///   checksum recorded at apply time
    ///
    /// Warnings are returned alongside `Ok`; drift is never a hard error.
    pub async fn verify(&self, db: &impl GenericClient) -> Result<Vec<VerificationError>> {
        let applied = self.applied(db).await?;
        let hashes: HashMap<&str, String> = self
            .migrations
            .iter()
            .map(|m| (m.id.as_str(), m.md5()))
            .collect();

        let mut verrs = Vec::new();
        for row in &applied {
            match hashes.get(row.id.as_str()) {
                None => {
                    verrs.push(VerificationError {
                        message: "found applied migration not present on disk".to_string(),
                        fields: verification_fields(&[
                            ("migration_id", row.id.clone().into()),
                            ("migration_applied_at", applied_at_field(row.applied_at)),
                            ("migration_checksum", row.checksum.clone().into()),
                        ]),
                    });
                }
                Some(md5) if *md5 != row.checksum => {
                    verrs.push(VerificationError {
                        message: "found applied migration with a different checksum".to_string(),
                        fields: verification_fields(&[
                            ("migration_id", row.id.clone().into()),
                            ("migration_applied_at", applied_at_field(row.applied_at)),
                            ("migration_checksum_from_db", row.checksum.clone().into()),
                            ("calculated_checksum", md5.clone().into()),
                        ]),
                    });
                }
                Some(_) => {}
            }
        }
        Ok(verrs)
    }
}

pub(crate) fn scan_applied(row: &tokio_postgres::Row) -> AppliedMigration {
    AppliedMigration {
        id: row.get(0),
        checksum: row.get(1),
        execution_time_in_millis: row.get(2),
        applied_at: row.get::<_, DateTime<Utc>>(3),
    }
}

fn verification_fields(
    pairs: &[(&str, serde_json::Value)],
) -> BTreeMap<String, serde_json::Value> {
    pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.clone()))
        .collect()
}

fn applied_at_field(at: DateTime<Utc>) -> serde_json::Value {
    at.to_rfc3339().into()
}

/// Log a database error, enriched with the structured PostgreSQL error
/// fields when the error came from the server.
pub(crate) fn log_db_error(err: &tokio_postgres::Error, migration_id: &str, msg: &str) {
    match PgErrorData::from_error(err) {
        Some(pg) => {
            error!(
                migration_id,
                error = %err,
                pg_code = %pg.code,
                pg_severity = %pg.severity,
                pg_detail = pg.detail.as_deref().unwrap_or_default(),
                pg_hint = pg.hint.as_deref().unwrap_or_default(),
                pg_schema = pg.schema.as_deref().unwrap_or_default(),
                pg_table = pg.table.as_deref().unwrap_or_default(),
                pg_column = pg.column.as_deref().unwrap_or_default(),
                pg_constraint = pg.constraint.as_deref().unwrap_or_default(),
                pg_where = pg.where_.as_deref().unwrap_or_default(),
                "{msg}"
            );
        }
        None => error!(migration_id, error = %err, "{msg}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_table_name() {
        let m = Migrator::new(Vec::new());
        assert_eq!(m.table_name, DEFAULT_TABLE_NAME);
        let m = m.with_table_name("custom.tracking");
        assert_eq!(m.table_name, "custom.tracking");
    }

    #[test]
    fn test_verification_error_serializes_fields() {
        let verr = VerificationError {
            message: "found applied migration with a different checksum".into(),
            fields: verification_fields(&[
                ("migration_id", "0001_initial".into()),
                ("calculated_checksum", "abc".into()),
                ("migration_checksum_from_db", "def".into()),
            ]),
        };
        let json = serde_json::to_value(&verr).unwrap();
        assert_eq!(json["fields"]["migration_id"], "0001_initial");
        assert_eq!(json["fields"]["calculated_checksum"], "abc");
    }
}
