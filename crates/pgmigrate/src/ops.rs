//! Operational mutators for the migrations table.
//!
//! These exist so that devops/db-admin/sre-type people can repair migration
//! state by hand: marking migrations as applied or unapplied and rewriting
//! stored checksums. None of them ever execute migration SQL, all of them
//! require the migrations table to already exist, and each runs its writes
//! inside a single transaction.

use std::collections::HashMap;

use chrono::Utc;
use tokio_postgres::Client;
use tracing::{info, warn};

use crate::error::{MigrateError, Result};
use crate::migration::{AppliedMigration, Migration};
use crate::migrator::{log_db_error, scan_applied, Migrator};
use crate::pgtools;

/// An explicit checksum rewrite for one applied migration. A list of these is
/// used instead of a map so that updates apply in a caller-controlled order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChecksumUpdate {
    /// The ID of the migration to update, e.g. `0001_initial`.
    pub migration_id: String,
    /// The checksum to record in the migrations table.
    pub new_checksum: String,
}

impl Migrator {
    /// Mark specific migrations as applied without running them.
    ///
    /// IDs that are unknown or already applied are skipped with a warning.
    /// Rows are inserted with an execution time of zero, the current UTC
    /// timestamp, and the checksum of the SQL currently on disk. Returns the
    /// rows actually inserted.
    pub async fn mark_applied(
        &self,
        client: &mut Client,
        ids: &[String],
    ) -> Result<Vec<AppliedMigration>> {
        self.require_migrations_table(client).await?;
        let applied = self.applied(&*client).await?;
        let applied_by_id: HashMap<&str, &AppliedMigration> =
            applied.iter().map(|m| (m.id.as_str(), m)).collect();
        let known_by_id: HashMap<&str, &Migration> =
            self.migrations.iter().map(|m| (m.id.as_str(), m)).collect();

        let mut to_mark: Vec<&Migration> = Vec::new();
        for id in ids {
            if let Some(existing) = applied_by_id.get(id.as_str()) {
                warn!(
                    id = %existing.id,
                    checksum = %existing.checksum,
                    applied_at = %existing.applied_at,
                    "skipping previously applied migration"
                );
                continue;
            }
            match known_by_id.get(id.as_str()) {
                Some(migration) => to_mark.push(migration),
                None => warn!(id = %id, reason = "does not exist", "skipping unknown migration"),
            }
        }

        let query = format!(
            "INSERT INTO {} ( id, checksum, execution_time_in_millis, applied_at )\n\
             VALUES ( $1, $2, $3, $4 )\n\
             ON CONFLICT DO NOTHING",
            pgtools::quote_identifier(&self.table_name)
        );
        let tx = client.transaction().await?;
        let mut marked = Vec::with_capacity(to_mark.len());
        for migration in to_mark {
            let record = AppliedMigration {
                id: migration.id.clone(),
                checksum: migration.md5(),
                execution_time_in_millis: 0,
                applied_at: Utc::now(),
            };
            if let Err(e) = tx
                .execute(
                    &query,
                    &[
                        &record.id,
                        &record.checksum,
                        &record.execution_time_in_millis,
                        &record.applied_at,
                    ],
                )
                .await
            {
                log_db_error(&e, &record.id, "failed to mark migration as applied");
                return Err(MigrateError::Db(e));
            }
            marked.push(record);
        }
        tx.commit().await?;
        Ok(marked)
    }

    /// [`Migrator::mark_applied`] for every known migration.
    pub async fn mark_all_applied(&self, client: &mut Client) -> Result<Vec<AppliedMigration>> {
        let ids: Vec<String> = self.migrations.iter().map(|m| m.id.clone()).collect();
        self.mark_applied(client, &ids).await
    }

    /// Mark specific migrations as unapplied by deleting their rows from the
    /// migrations table. IDs with no row are skipped with a warning. Returns
    /// the rows that were deleted.
    pub async fn mark_unapplied(
        &self,
        client: &mut Client,
        ids: &[String],
    ) -> Result<Vec<AppliedMigration>> {
        self.require_migrations_table(client).await?;
        let applied = self.applied(&*client).await?;
        let applied_by_id: HashMap<&str, &AppliedMigration> =
            applied.iter().map(|m| (m.id.as_str(), m)).collect();

        let mut to_remove: Vec<String> = Vec::new();
        for id in ids {
            if applied_by_id.contains_key(id.as_str()) {
                to_remove.push(id.clone());
            } else {
                warn!(id = %id, reason = "does not exist", "skipping unknown migration");
            }
        }

        let query = format!(
            "DELETE FROM {} WHERE id = ANY($1)\n\
             RETURNING id, checksum, execution_time_in_millis, applied_at",
            pgtools::quote_identifier(&self.table_name)
        );
        let tx = client.transaction().await?;
        let rows = tx.query(&query, &[&to_remove]).await?;
        tx.commit().await?;
        Ok(rows.iter().map(scan_applied).collect())
    }

    /// [`Migrator::mark_unapplied`] for every currently applied migration.
    pub async fn mark_all_unapplied(&self, client: &mut Client) -> Result<Vec<AppliedMigration>> {
        self.require_migrations_table(client).await?;
        let applied = self.applied(&*client).await?;
        let ids: Vec<String> = applied.into_iter().map(|m| m.id).collect();
        self.mark_unapplied(client, &ids).await
    }

    /// Explicitly set the recorded checksum of applied migrations.
    ///
    /// Updates whose migration has no row, or whose row already carries the
    /// desired checksum, are skipped with a log line. Returns the rows that
    /// were changed.
    pub async fn set_checksums(
        &self,
        client: &mut Client,
        updates: &[ChecksumUpdate],
    ) -> Result<Vec<AppliedMigration>> {
        self.require_migrations_table(client).await?;
        let applied = self.applied(&*client).await?;
        let applied_by_id: HashMap<&str, &AppliedMigration> =
            applied.iter().map(|m| (m.id.as_str(), m)).collect();

        let mut to_update: Vec<AppliedMigration> = Vec::new();
        for update in updates {
            match applied_by_id.get(update.migration_id.as_str()) {
                None => {
                    warn!(
                        id = %update.migration_id,
                        reason = "does not exist",
                        "skipping migration"
                    );
                }
                Some(row) if row.checksum == update.new_checksum => {
                    info!(
                        id = %row.id,
                        checksum = %row.checksum,
                        reason = "already has the desired checksum",
                        "skipping migration"
                    );
                }
                Some(row) => {
                    let mut changed = (*row).clone();
                    changed.checksum = update.new_checksum.clone();
                    to_update.push(changed);
                }
            }
        }

        let query = format!(
            "UPDATE {} SET checksum = $1 WHERE id = $2 AND checksum != $1",
            pgtools::quote_identifier(&self.table_name)
        );
        let tx = client.transaction().await?;
        let mut updated = Vec::with_capacity(to_update.len());
        for migration in to_update {
            if let Err(e) = tx
                .execute(&query, &[&migration.checksum, &migration.id])
                .await
            {
                log_db_error(&e, &migration.id, "failed to set checksum");
                return Err(MigrateError::Db(e));
            }
            updated.push(migration);
        }
        tx.commit().await?;
        Ok(updated)
    }

    /// [`Migrator::set_checksums`] with each new checksum taken from the SQL
    /// currently on disk. Unknown IDs are skipped with a warning.
    pub async fn recalculate_checksums(
        &self,
        client: &mut Client,
        ids: &[String],
    ) -> Result<Vec<AppliedMigration>> {
        let checksums: HashMap<&str, String> = self
            .migrations
            .iter()
            .map(|m| (m.id.as_str(), m.md5()))
            .collect();
        let mut updates = Vec::with_capacity(ids.len());
        for id in ids {
            match checksums.get(id.as_str()) {
                Some(checksum) => updates.push(ChecksumUpdate {
                    migration_id: id.clone(),
                    new_checksum: checksum.clone(),
                }),
                None => warn!(id = %id, reason = "does not exist", "skipping migration"),
            }
        }
        self.set_checksums(client, &updates).await
    }

    /// [`Migrator::recalculate_checksums`] for every known migration.
    pub async fn recalculate_all_checksums(
        &self,
        client: &mut Client,
    ) -> Result<Vec<AppliedMigration>> {
        let updates: Vec<ChecksumUpdate> = self
            .migrations
            .iter()
            .map(|m| ChecksumUpdate {
                migration_id: m.id.clone(),
                new_checksum: m.md5(),
            })
            .collect();
        self.set_checksums(client, &updates).await
    }

    async fn require_migrations_table(&self, client: &Client) -> Result<()> {
        if !self.has_migrations_table(client).await? {
            return Err(MigrateError::MissingTable(self.table_name.clone()));
        }
        Ok(())
    }
}
