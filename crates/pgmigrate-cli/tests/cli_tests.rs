//! CLI integration tests.
//!
//! These cover argument parsing, help output, config resolution, and exit
//! codes for error paths that do not need a database.

use assert_cmd::Command;
use predicates::prelude::*;
use std::io::Write;

fn cmd() -> Command {
    Command::cargo_bin("pgmigrate").unwrap()
}

#[test]
fn test_help_shows_all_commands() {
    cmd()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("migrate"))
        .stdout(predicate::str::contains("plan"))
        .stdout(predicate::str::contains("applied"))
        .stdout(predicate::str::contains("verify"))
        .stdout(predicate::str::contains("dump"))
        .stdout(predicate::str::contains("ops"));
}

#[test]
fn test_ops_help_shows_mutators() {
    cmd()
        .args(["ops", "--help"])
        .assert()
        .success()
        .stdout(predicate::str::contains("mark-applied"))
        .stdout(predicate::str::contains("mark-all-applied"))
        .stdout(predicate::str::contains("mark-unapplied"))
        .stdout(predicate::str::contains("mark-all-unapplied"))
        .stdout(predicate::str::contains("set-checksum"))
        .stdout(predicate::str::contains("recalculate-checksum"));
}

#[test]
fn test_version_flag() {
    cmd()
        .arg("--version")
        .assert()
        .success()
        .stdout(predicate::str::contains("pgmigrate"));
}

#[test]
fn test_missing_database_is_a_config_error() {
    let migrations = tempfile::tempdir().unwrap();
    cmd()
        .env_remove("PGM_DATABASE")
        .args(["--migrations"])
        .arg(migrations.path())
        .arg("plan")
        .current_dir(migrations.path())
        .assert()
        .failure()
        .stderr(predicate::str::contains("database"));
}

#[test]
fn test_unknown_subcommand_fails() {
    cmd().arg("downgrade").assert().failure();
}

#[test]
fn test_invalid_log_format_rejected() {
    let dir = tempfile::tempdir().unwrap();
    cmd()
        .args(["--log-format", "xml", "plan"])
        .current_dir(dir.path())
        .assert()
        .failure()
        .stderr(predicate::str::contains("log_format"));
}

#[test]
fn test_new_creates_sequenced_migration_files() {
    let dir = tempfile::tempdir().unwrap();
    let migrations = dir.path().join("migrations");

    cmd()
        .current_dir(dir.path())
        .args(["--migrations", "migrations", "new", "create_users"])
        .assert()
        .success()
        .stdout(predicate::str::contains("0001_create_users.sql"));
    assert!(migrations.join("0001_create_users.sql").exists());

    cmd()
        .current_dir(dir.path())
        .args(["--migrations", "migrations", "new", "create_orders"])
        .assert()
        .success()
        .stdout(predicate::str::contains("0002_create_orders.sql"));
    assert!(migrations.join("0002_create_orders.sql").exists());
}

#[test]
fn test_configfile_missing_is_an_error() {
    cmd()
        .args(["--configfile", "/nonexistent/pgmigrate.yaml", "plan"])
        .assert()
        .failure();
}

#[test]
fn test_configfile_is_read() {
    let dir = tempfile::tempdir().unwrap();
    let config_path = dir.path().join("config.yaml");
    let mut f = std::fs::File::create(&config_path).unwrap();
    // Invalid YAML should surface as a config error, proving the file is
    // actually parsed.
    f.write_all(b"database: [not, a, string").unwrap();
    cmd()
        .arg("--configfile")
        .arg(&config_path)
        .arg("plan")
        .assert()
        .failure()
        .stderr(predicate::str::contains("YAML"));
}
