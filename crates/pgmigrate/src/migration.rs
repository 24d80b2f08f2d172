//! Migration values and identity.

use std::path::Path;

use chrono::{DateTime, Utc};
use md5::{Digest, Md5};
use serde::{Deserialize, Serialize};

/// A single SQL migration: an identifier chosen by the author and the raw
/// contents of the migration file.
///
/// The ID is the filename with the final `.sql` extension removed; the SQL is
/// the file's bytes, verbatim. The MD5 of the SQL is the identity of the
/// migration's *content*, the ID is the identity of its *slot*.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Migration {
    /// The filename of the migration, without the `.sql` extension.
    pub id: String,
    /// The contents of the migration file.
    pub sql: String,
}

impl Migration {
    pub fn new(id: impl Into<String>, sql: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            sql: sql.into(),
        }
    }

    /// MD5 hash of the SQL, rendered as 32 lowercase hex characters. Stored
    /// in the migrations table as the `checksum` column after a successful
    /// apply.
    pub fn md5(&self) -> String {
        format!("{:x}", Md5::digest(self.sql.as_bytes()))
    }
}

/// A successfully executed [`Migration`]: one row of the migrations table.
///
/// `checksum` is the MD5 of the SQL *as it was executed*, not of whatever is
/// currently on disk under the same ID.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppliedMigration {
    pub id: String,
    /// MD5 of the SQL at the time it was applied.
    pub checksum: String,
    /// How long the migration's SQL took to run.
    pub execution_time_in_millis: i64,
    /// When the migration was applied (UTC, transaction start).
    pub applied_at: DateTime<Utc>,
}

/// Derive a migration ID from a filename by removing directory components
/// and the last extension.
///
/// ```
/// use pgmigrate::migration::id_from_filename;
/// assert_eq!(id_from_filename("0001_initial.sql"), "0001_initial");
/// assert_eq!(id_from_filename("sub/0002_users.up.sql"), "0002_users.up");
/// ```
pub fn id_from_filename(filename: &str) -> String {
    let base = Path::new(filename);
    base.file_stem()
        .map(|stem| stem.to_string_lossy().into_owned())
        .unwrap_or_default()
}

/// Sort migrations ascending by ID in lexicographical byte order, the same
/// order `ls` shows the files in.
pub fn sort_by_id(migrations: &mut [Migration]) {
    migrations.sort_by(|a, b| a.id.cmp(&b.id));
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_md5_matches_known_value() {
        let m = Migration::new("0001_initial", "CREATE TABLE users (id BIGINT PRIMARY KEY);");
        // md5("CREATE TABLE users (id BIGINT PRIMARY KEY);")
        assert_eq!(m.md5(), "4183a12daed80dd10d8ed4d22051f3d2");
        assert_eq!(m.md5().len(), 32);
    }

    #[test]
    fn test_md5_of_empty_sql() {
        let m = Migration::new("0001_empty", "");
        assert_eq!(m.md5(), "d41d8cd98f00b204e9800998ecf8427e");
    }

    #[test]
    fn test_id_from_filename_strips_last_extension_only() {
        assert_eq!(id_from_filename("0001_initial.sql"), "0001_initial");
        assert_eq!(id_from_filename("0002_whatever.up.sql"), "0002_whatever.up");
        assert_eq!(id_from_filename("dir/nested/0003_x.sql"), "0003_x");
        assert_eq!(id_from_filename("no_extension"), "no_extension");
    }

    #[test]
    fn test_sort_is_lexicographic_not_numeric() {
        let mut migrations = vec![
            Migration::new("10_ten", ""),
            Migration::new("2_two", ""),
            Migration::new("1_one", ""),
        ];
        sort_by_id(&mut migrations);
        let ids: Vec<_> = migrations.iter().map(|m| m.id.as_str()).collect();
        // "10" sorts before "2" in byte order.
        assert_eq!(ids, vec!["1_one", "10_ten", "2_two"]);
    }
}
