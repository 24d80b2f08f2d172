//! Filesystem discovery of migration files.

use std::fs;
use std::path::Path;

use crate::error::Result;
use crate::migration::{id_from_filename, sort_by_id, Migration};

/// Walk `dir` recursively and load every file ending in `.sql` as a
/// [`Migration`]. The migration ID is the filename with the final extension
/// removed; the SQL is the file's contents with no normalization.
///
/// The result is sorted ascending by ID in lexicographical byte order.
/// Duplicate IDs (the same filename in two sub-directories) are not
/// de-duplicated here; the conflict surfaces as a primary-key violation when
/// the engine records the second one.
pub fn load_migrations(dir: &Path) -> Result<Vec<Migration>> {
    let mut migrations = Vec::new();
    collect_sql_files(dir, &mut migrations)?;
    sort_by_id(&mut migrations);
    Ok(migrations)
}

fn collect_sql_files(dir: &Path, migrations: &mut Vec<Migration>) -> Result<()> {
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        let path = entry.path();
        if path.is_dir() {
            collect_sql_files(&path, migrations)?;
        } else if path.extension().is_some_and(|ext| ext == "sql") {
            let name = entry.file_name();
            let sql = fs::read_to_string(&path)?;
            migrations.push(Migration {
                id: id_from_filename(&name.to_string_lossy()),
                sql,
            });
        }
    }
    Ok(())
}
