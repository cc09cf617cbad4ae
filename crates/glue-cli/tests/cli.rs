//! End-to-end tests for the `glue` binary.

use assert_cmd::Command;
use predicates::prelude::*;

fn glue() -> Command {
    Command::cargo_bin("glue").unwrap()
}

#[test]
fn test_init_creates_store() {
    let dir = tempfile::tempdir().unwrap();
    let db = dir.path().join("rank0.db");

    glue()
        .args(["init", "--db"])
        .arg(&db)
        .args(["--rank", "0"])
        .assert()
        .success()
        .stdout(predicate::str::contains("initialized store for rank 0"));
    assert!(db.exists());
}

#[test]
fn test_init_refuses_to_clobber_without_force() {
    let dir = tempfile::tempdir().unwrap();
    let db = dir.path().join("rank1.db");

    glue().args(["init", "--db"]).arg(&db).assert().success();

    glue()
        .args(["init", "--db"])
        .arg(&db)
        .assert()
        .failure()
        .stderr(predicate::str::contains("already exists"));

    glue()
        .args(["init", "--force", "--db"])
        .arg(&db)
        .assert()
        .success();
}

#[test]
fn test_stats_on_fresh_store() {
    let dir = tempfile::tempdir().unwrap();
    let db = dir.path().join("rank2.db");

    glue().args(["init", "--db"]).arg(&db).assert().success();

    glue()
        .args(["stats", "--db"])
        .arg(&db)
        .assert()
        .success()
        .stdout(predicate::str::contains("entries: 0"))
        .stdout(predicate::str::contains("capacity: unbounded"));
}

#[test]
fn test_stats_on_missing_store_fails() {
    let dir = tempfile::tempdir().unwrap();
    let db = dir.path().join("missing.db");

    glue()
        .args(["stats", "--db"])
        .arg(&db)
        .assert()
        .failure()
        .stderr(predicate::str::contains("no store at"));
}

#[test]
fn test_export_header_on_fresh_store() {
    let dir = tempfile::tempdir().unwrap();
    let db = dir.path().join("rank3.db");

    glue().args(["init", "--db"]).arg(&db).assert().success();

    glue()
        .args(["export", "--db"])
        .arg(&db)
        .assert()
        .success()
        .stdout(predicate::str::starts_with("#InTemperature"))
        .stdout(predicate::str::contains("OutDiffusionCoefficient[9]"));
}

#[test]
fn test_config_file_controls_capacity() {
    let dir = tempfile::tempdir().unwrap();
    let db = dir.path().join("rank4.db");
    let config = dir.path().join("glue.json");
    std::fs::write(&config, r#"{"max_entries": 500}"#).unwrap();

    glue()
        .args(["--config"])
        .arg(&config)
        .args(["init", "--db"])
        .arg(&db)
        .assert()
        .success();

    glue()
        .args(["--config"])
        .arg(&config)
        .args(["stats", "--db"])
        .arg(&db)
        .assert()
        .success()
        .stdout(predicate::str::contains("capacity: 500"));
}
