use std::fs;

use assert_cmd::Command;
use predicates::prelude::*;
use rusqlite::Connection;
use tempfile::TempDir;

fn dbsnap() -> Command {
    Command::cargo_bin("dbsnap").unwrap()
}

fn create_db(path: &std::path::Path) {
    let conn = Connection::open(path).unwrap();
    conn.execute_batch(
        "CREATE TABLE items (id INTEGER PRIMARY KEY, name TEXT);
         INSERT INTO items (name) VALUES ('a'), ('b'), ('c');",
    )
    .unwrap();
}

#[test]
fn backup_prints_snapshot_path() {
    let temp = TempDir::new().unwrap();
    let db = temp.path().join("app.db");
    create_db(&db);
    let out = temp.path().join("backups");

    let assert = dbsnap()
        .args(["backup", "--method", "attach", "--timestamp", "--verify"])
        .arg("--db")
        .arg(&db)
        .arg("--backup")
        .arg(&out)
        .assert()
        .success()
        .stdout(predicate::str::contains("backup-").and(predicate::str::contains(".db")));

    let printed = String::from_utf8(assert.get_output().stdout.clone()).unwrap();
    assert!(std::path::Path::new(printed.trim()).exists());
}

#[test]
fn backup_json_output() {
    let temp = TempDir::new().unwrap();
    let db = temp.path().join("app.db");
    create_db(&db);
    let dest = temp.path().join("copy.db");

    dbsnap()
        .args(["backup", "--json"])
        .arg("--db")
        .arg(&db)
        .arg("--backup")
        .arg(&dest)
        .assert()
        .success()
        .stdout(predicate::str::contains("\"method\": \"direct-copy\""));
    assert_eq!(fs::read(&db).unwrap(), fs::read(&dest).unwrap());
}

#[test]
fn missing_source_exit_code() {
    let temp = TempDir::new().unwrap();
    dbsnap()
        .arg("backup")
        .arg("--db")
        .arg(temp.path().join("missing.db"))
        .arg("--backup")
        .arg(temp.path().join("copy.db"))
        .assert()
        .code(3)
        .stderr(predicate::str::contains("Source database not found"));
    assert!(!temp.path().join("copy.db").exists());
}

#[test]
fn unknown_method_in_settings_file_is_config_error() {
    let temp = TempDir::new().unwrap();
    let db = temp.path().join("app.db");
    create_db(&db);
    let settings = temp.path().join("backup.json");
    fs::write(
        &settings,
        format!(
            r#"{{ "db": {:?}, "backup": {:?}, "method": "zfs-clone" }}"#,
            db,
            temp.path().join("copy.db")
        ),
    )
    .unwrap();

    dbsnap()
        .arg("backup")
        .arg("--config")
        .arg(&settings)
        .assert()
        .code(2)
        .stderr(predicate::str::contains("unknown backup method"));
    assert!(!temp.path().join("copy.db").exists());
}

#[test]
fn prune_and_list() {
    let temp = TempDir::new().unwrap();
    for stamp in [
        "20250101-000000",
        "20250102-000000",
        "20250103-000000",
        "20250104-000000",
        "20250105-000000",
    ] {
        fs::write(temp.path().join(format!("backup-{stamp}.db")), b"x").unwrap();
    }
    fs::write(temp.path().join("readme.txt"), b"keep").unwrap();

    dbsnap()
        .arg("prune")
        .arg(temp.path())
        .args(["--retain-last", "2"])
        .assert()
        .success();

    assert!(temp.path().join("backup-20250105-000000.db").exists());
    assert!(temp.path().join("backup-20250104-000000.db").exists());
    assert!(!temp.path().join("backup-20250103-000000.db").exists());
    assert!(temp.path().join("readme.txt").exists());

    dbsnap()
        .arg("list")
        .arg(temp.path())
        .assert()
        .success()
        .stdout(
            predicate::str::contains("backup-20250105-000000.db")
                .and(predicate::str::contains("backup-20250101-000000.db").not()),
        );
}

#[test]
fn prune_requires_policy() {
    let temp = TempDir::new().unwrap();
    dbsnap().arg("prune").arg(temp.path()).assert().failure();
}
