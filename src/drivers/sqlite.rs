//! Logical backup through `ATTACH`.
//!
//! The staging file is opened as the writable main database and the source
//! is attached read-only next to it. Tables are recreated from their DDL and
//! filled with `INSERT ... SELECT`, one table at a time in name order, all
//! inside a single transaction so the copy reflects one point in time.
//! Virtual tables are recreated through their module and refilled the same
//! way; the shadow tables a module keeps its data in are left to the module.
//! Because SQLite does the writing, the destination can live on any
//! filesystem SQLite can open, not only a local disk.

use std::collections::{BTreeSet, HashMap};
use std::fs;
use std::path::Path;
use std::time::Duration;

use log::{debug, info};
use rusqlite::{Connection, OpenFlags};

use super::{CopyObserver, CopyStrategy};
use crate::config::Method;
use crate::drivers::filesystem::megabytes;
use crate::error::{BackupError, BackupResult, Phase, is_busy};
use crate::utils::hash::{quote_ident, table_digest};

/// Schema name the source is attached under
pub const SOURCE_SCHEMA: &str = "source_db";

/// Table-by-table copy through an attached, read-only source.
pub struct AttachCopy {
    busy_timeout: Duration,
}

/// A user table as listed in the source catalog
#[derive(Debug, Clone)]
struct TableDef {
    name: String,
    sql: String,
    is_virtual: bool,
}

impl AttachCopy {
    pub fn new(busy_timeout: Duration) -> Self {
        Self { busy_timeout }
    }

    fn attach_source(&self, conn: &Connection, source: &Path) -> BackupResult<()> {
        conn.busy_timeout(self.busy_timeout)
            .map_err(|e| BackupError::database(Phase::Copy, "setting busy timeout", e))?;
        conn.execute(
            &format!("ATTACH DATABASE ?1 AS {}", SOURCE_SCHEMA),
            [read_only_uri(source)],
        )
        .map_err(|e| source_error(source, "attaching source", e))?;
        Ok(())
    }

    fn copy_all(
        &self,
        conn: &mut Connection,
        source: &Path,
        observer: &dyn CopyObserver,
    ) -> BackupResult<()> {
        let tx = conn
            .transaction()
            .map_err(|e| BackupError::database(Phase::Copy, "starting transaction", e))?;

        let tables = list_tables(&tx).map_err(|e| source_error(source, "listing tables", e))?;

        let total = tables.len();
        for (index, table) in tables.iter().enumerate() {
            observer
                .table(&table.name, index, total)
                .map_err(|e| BackupError::PartialTableCopy {
                    table: table.name.clone(),
                    reason: e.to_string(),
                })?;
            let rows = copy_table(&tx, table).map_err(|e| table_error(source, &table.name, e))?;
            debug!("Copied table '{}' ({} rows)", table.name, rows);
        }

        copy_sequences(&tx).map_err(|e| source_error(source, "copying autoincrement counters", e))?;
        copy_schema_objects(&tx)?;
        copy_user_version(&tx).map_err(|e| source_error(source, "copying user_version", e))?;

        tx.commit()
            .map_err(|e| BackupError::database(Phase::Copy, "committing copy", e))?;
        info!("Copied {} tables", total);
        Ok(())
    }
}

impl CopyStrategy for AttachCopy {
    fn method(&self) -> Method { Method::AttachCopy }

    fn copy(&self, source: &Path, staging: &Path, observer: &dyn CopyObserver) -> BackupResult<()> {
        info!("Starting ATTACH+COPY backup: {}", source.display());
        if !source.is_file() {
            return Err(BackupError::SourceNotFound {
                path: source.to_path_buf(),
            });
        }

        let mut conn = Connection::open(staging).map_err(|e| BackupError::DestinationUnwritable {
            path: staging.to_path_buf(),
            source: std::io::Error::other(e.to_string()),
        })?;
        // No on-disk journal next to the staging file; a failed copy discards it whole
        conn.query_row("PRAGMA main.journal_mode = MEMORY", [], |row| row.get::<_, String>(0))
            .map_err(|e| BackupError::database(Phase::Copy, "configuring staging database", e))?;

        self.attach_source(&conn, source)?;
        self.copy_all(&mut conn, source, observer)?;

        conn.close()
            .map_err(|(_, e)| BackupError::database(Phase::Copy, "closing staging database", e))?;

        let size = fs::metadata(staging).map(|m| m.len()).unwrap_or(0);
        info!("ATTACH+COPY backup completed: {:.2} MB", megabytes(size));
        Ok(())
    }

    fn verify(&self, source: &Path, staging: &Path) -> BackupResult<()> {
        let flags = OpenFlags::SQLITE_OPEN_READ_ONLY
            | OpenFlags::SQLITE_OPEN_URI
            | OpenFlags::SQLITE_OPEN_NO_MUTEX;
        let conn = Connection::open_with_flags(staging, flags)
            .map_err(|e| BackupError::database(Phase::Verify, "opening snapshot", e))?;
        self.attach_source(&conn, source)?;

        let verify_err = |e: rusqlite::Error| BackupError::database(Phase::Verify, "reading tables", e);
        let source_tables = list_tables_in(&conn, SOURCE_SCHEMA).map_err(verify_err)?;
        let copied_tables = list_tables_in(&conn, "main").map_err(verify_err)?;

        let expected: BTreeSet<&str> = source_tables.iter().map(|t| t.name.as_str()).collect();
        let actual: BTreeSet<&str> = copied_tables.iter().map(|t| t.name.as_str()).collect();
        if expected != actual {
            return Err(BackupError::VerificationFailed {
                path: staging.to_path_buf(),
                reason: format!("tables {:?} do not match source {:?}", actual, expected),
            });
        }

        for table in &source_tables {
            let columns = copy_columns(&conn, SOURCE_SCHEMA, &table.name).map_err(verify_err)?;
            let want = table_digest(&conn, SOURCE_SCHEMA, &table.name, &columns).map_err(verify_err)?;
            let got = table_digest(&conn, "main", &table.name, &columns).map_err(verify_err)?;
            if want != got {
                return Err(BackupError::VerificationFailed {
                    path: staging.to_path_buf(),
                    reason: format!(
                        "table '{}' has {} rows (sha256 {}), source has {} rows (sha256 {})",
                        table.name, got.rows, got.sha256, want.rows, want.sha256
                    ),
                });
            }
        }
        debug!("Verified {} tables", source_tables.len());
        Ok(())
    }
}

fn list_tables(conn: &Connection) -> rusqlite::Result<Vec<TableDef>> {
    list_tables_in(conn, SOURCE_SCHEMA)
}

/// User tables of `schema` in name order, virtual tables included and
/// module-owned shadow tables left out.
fn list_tables_in(conn: &Connection, schema: &str) -> rusqlite::Result<Vec<TableDef>> {
    let kinds = table_kinds(conn, schema)?;
    let sql = format!(
        "SELECT name, sql FROM {}.sqlite_master \
         WHERE type = 'table' AND name NOT LIKE 'sqlite\\_%' ESCAPE '\\' \
         ORDER BY name",
        quote_ident(schema)
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map([], |row| {
        Ok((row.get::<_, String>(0)?, row.get::<_, Option<String>>(1)?))
    })?;

    let mut tables = Vec::new();
    for row in rows {
        let (name, sql) = row?;
        let kind = kinds.get(&name).map(String::as_str).unwrap_or("table");
        if kind == "shadow" {
            debug!("Leaving shadow table '{}' to its module", name);
            continue;
        }
        tables.push(TableDef {
            is_virtual: kind == "virtual",
            name,
            sql: sql.unwrap_or_default(),
        });
    }
    Ok(tables)
}

/// `PRAGMA table_list` kind (`table`, `virtual`, `shadow`, ...) per table name
fn table_kinds(conn: &Connection, schema: &str) -> rusqlite::Result<HashMap<String, String>> {
    let mut stmt = conn.prepare(&format!("PRAGMA {}.table_list", quote_ident(schema)))?;
    let kinds = stmt
        .query_map([], |row| Ok((row.get::<_, String>(1)?, row.get::<_, String>(2)?)))?
        .collect::<rusqlite::Result<HashMap<_, _>>>()?;
    Ok(kinds)
}

/// Stored columns of a table, in declaration order. Generated columns are left out.
fn copy_columns(conn: &Connection, schema: &str, table: &str) -> rusqlite::Result<Vec<String>> {
    let mut stmt = conn.prepare(
        "SELECT name FROM pragma_table_xinfo(?1, ?2) WHERE hidden = 0 ORDER BY cid",
    )?;
    let cols = stmt
        .query_map([table, schema], |row| row.get::<_, String>(0))?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(cols)
}

fn copy_table(conn: &Connection, table: &TableDef) -> rusqlite::Result<usize> {
    conn.execute_batch(&table.sql)?;
    let mut cols: Vec<String> = copy_columns(conn, SOURCE_SCHEMA, &table.name)?
        .iter()
        .map(|c| quote_ident(c))
        .collect();
    // Modules index by rowid; keep it so the copy answers queries identically
    if table.is_virtual {
        cols.insert(0, "rowid".to_string());
    }
    let cols = cols.join(", ");
    let name = quote_ident(&table.name);
    conn.execute(
        &format!(
            "INSERT INTO main.{name} ({cols}) SELECT {cols} FROM {}.{name}",
            SOURCE_SCHEMA
        ),
        [],
    )
}

fn copy_sequences(conn: &Connection) -> rusqlite::Result<()> {
    let has_sequences: bool = conn.query_row(
        &format!(
            "SELECT EXISTS (SELECT 1 FROM {}.sqlite_master WHERE name = 'sqlite_sequence')",
            SOURCE_SCHEMA
        ),
        [],
        |row| row.get(0),
    )?;
    if has_sequences {
        conn.execute_batch(&format!(
            "DELETE FROM main.sqlite_sequence; \
             INSERT INTO main.sqlite_sequence (name, seq) SELECT name, seq FROM {}.sqlite_sequence;",
            SOURCE_SCHEMA
        ))?;
    }
    Ok(())
}

/// Indexes, views and triggers, in creation order so dependencies resolve.
fn copy_schema_objects(conn: &Connection) -> BackupResult<()> {
    let list_err = |e: rusqlite::Error| BackupError::database(Phase::Copy, "listing indexes, views and triggers", e);
    let mut stmt = conn
        .prepare(&format!(
            "SELECT type, name, sql FROM {}.sqlite_master \
             WHERE type IN ('index', 'view', 'trigger') AND sql IS NOT NULL \
             ORDER BY rowid",
            SOURCE_SCHEMA
        ))
        .map_err(list_err)?;
    let objects = stmt
        .query_map([], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
            ))
        })
        .map_err(list_err)?
        .collect::<rusqlite::Result<Vec<_>>>()
        .map_err(list_err)?;

    for (kind, name, sql) in objects {
        conn.execute_batch(&sql).map_err(|e| {
            BackupError::database(Phase::Copy, format!("recreating {} '{}'", kind, name), e)
        })?;
    }
    Ok(())
}

fn copy_user_version(conn: &Connection) -> rusqlite::Result<()> {
    let version: i64 = conn.query_row(
        &format!("PRAGMA {}.user_version", SOURCE_SCHEMA),
        [],
        |row| row.get(0),
    )?;
    if version != 0 {
        conn.execute_batch(&format!("PRAGMA main.user_version = {}", version))?;
    }
    Ok(())
}

/// `file:` URI that opens `path` read-only
fn read_only_uri(path: &Path) -> String {
    let abs = std::path::absolute(path).unwrap_or_else(|_| path.to_path_buf());
    let mut p = abs
        .to_string_lossy()
        .replace('\\', "/")
        .replace('%', "%25")
        .replace('?', "%3f")
        .replace('#', "%23");
    if !p.starts_with('/') {
        p.insert(0, '/');
    }
    format!("file:{}?mode=ro", p)
}

fn source_error(source: &Path, context: &str, e: rusqlite::Error) -> BackupError {
    if is_busy(&e) {
        BackupError::SourceBusy {
            path: source.to_path_buf(),
            reason: e.to_string(),
        }
    } else {
        BackupError::database(Phase::Copy, context, e)
    }
}

fn table_error(source: &Path, table: &str, e: rusqlite::Error) -> BackupError {
    if is_busy(&e) {
        BackupError::SourceBusy {
            path: source.to_path_buf(),
            reason: format!("while copying table '{}': {}", table, e),
        }
    } else {
        BackupError::PartialTableCopy {
            table: table.to_string(),
            reason: e.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::drivers::NoopObserver;
    use std::cell::RefCell;
    use tempfile::TempDir;

    fn create_source(path: &Path) {
        let conn = Connection::open(path).unwrap();
        conn.execute_batch(
            "CREATE TABLE users (id INTEGER PRIMARY KEY AUTOINCREMENT, name TEXT NOT NULL);
             CREATE TABLE events (id INTEGER, kind TEXT, payload BLOB,
                                  kind_upper TEXT GENERATED ALWAYS AS (upper(kind)) VIRTUAL);
             CREATE INDEX events_kind ON events (kind);
             CREATE VIEW user_names AS SELECT name FROM users;
             INSERT INTO users (name) VALUES ('ada'), ('grace'), ('linus');
             DELETE FROM users WHERE name = 'linus';
             INSERT INTO events (id, kind, payload) VALUES (1, 'login', x'00ff'), (2, 'logout', NULL);
             PRAGMA user_version = 4;",
        )
        .unwrap();
    }

    #[test]
    fn test_attach_copy_reproduces_tables() {
        let temp = TempDir::new().unwrap();
        let src = temp.path().join("app.db");
        create_source(&src);
        let staging = temp.path().join("copy.db");

        let strategy = AttachCopy::new(Duration::from_secs(1));
        strategy.copy(&src, &staging, &NoopObserver).unwrap();
        strategy.verify(&src, &staging).unwrap();

        let conn = Connection::open(&staging).unwrap();
        let users: i64 = conn
            .query_row("SELECT count(*) FROM users", [], |r| r.get(0))
            .unwrap();
        assert_eq!(users, 2);
        let upper: String = conn
            .query_row("SELECT kind_upper FROM events WHERE id = 1", [], |r| r.get(0))
            .unwrap();
        assert_eq!(upper, "LOGIN");
        let seq: i64 = conn
            .query_row("SELECT seq FROM sqlite_sequence WHERE name = 'users'", [], |r| r.get(0))
            .unwrap();
        assert_eq!(seq, 3);
        let version: i64 = conn.query_row("PRAGMA user_version", [], |r| r.get(0)).unwrap();
        assert_eq!(version, 4);
        let view_rows: i64 = conn
            .query_row("SELECT count(*) FROM user_names", [], |r| r.get(0))
            .unwrap();
        assert_eq!(view_rows, 2);
    }

    struct Recorder(RefCell<Vec<String>>);
    impl CopyObserver for Recorder {
        fn table(&self, name: &str, _index: usize, _total: usize) -> BackupResult<()> {
            self.0.borrow_mut().push(name.to_string());
            Ok(())
        }
    }

    #[test]
    fn test_tables_copied_in_name_order() {
        let temp = TempDir::new().unwrap();
        let src = temp.path().join("app.db");
        create_source(&src);
        let recorder = Recorder(RefCell::new(Vec::new()));
        AttachCopy::new(Duration::from_secs(1))
            .copy(&src, &temp.path().join("copy.db"), &recorder)
            .unwrap();
        assert_eq!(*recorder.0.borrow(), vec!["events", "users"]);
    }

    #[test]
    fn test_source_is_not_modified() {
        let temp = TempDir::new().unwrap();
        let src = temp.path().join("app.db");
        create_source(&src);
        let before = fs::read(&src).unwrap();

        AttachCopy::new(Duration::from_secs(1))
            .copy(&src, &temp.path().join("copy.db"), &NoopObserver)
            .unwrap();
        assert_eq!(fs::read(&src).unwrap(), before);
    }

    #[test]
    fn test_missing_source() {
        let temp = TempDir::new().unwrap();
        let staging = temp.path().join("copy.db");
        let err = AttachCopy::new(Duration::from_secs(1))
            .copy(&temp.path().join("missing.db"), &staging, &NoopObserver)
            .unwrap_err();
        assert!(matches!(err, BackupError::SourceNotFound { .. }));
        assert!(!staging.exists());
    }

    #[test]
    fn test_verify_detects_divergence() {
        let temp = TempDir::new().unwrap();
        let src = temp.path().join("app.db");
        create_source(&src);
        let staging = temp.path().join("copy.db");
        let strategy = AttachCopy::new(Duration::from_secs(1));
        strategy.copy(&src, &staging, &NoopObserver).unwrap();

        Connection::open(&staging)
            .unwrap()
            .execute("UPDATE users SET name = 'eve' WHERE name = 'ada'", [])
            .unwrap();
        let err = strategy.verify(&src, &staging).unwrap_err();
        assert!(err.to_string().contains("users"));
    }

    #[test]
    fn test_read_only_uri_escapes() {
        let uri = read_only_uri(Path::new("/data/what?#%.db"));
        assert_eq!(uri, "file:/data/what%3f%23%25.db?mode=ro");
    }

    fn create_search_source(path: &Path) {
        let conn = Connection::open(path).unwrap();
        conn.execute_batch(
            "CREATE VIRTUAL TABLE docs USING fts5(title, body);
             CREATE TABLE docs_meta (doc INTEGER, tag TEXT);
             INSERT INTO docs (rowid, title, body) VALUES
                 (10, 'intro', 'hello snapshot world'),
                 (20, 'notes', 'nothing to see'),
                 (30, 'outro', 'goodbye world');
             DELETE FROM docs WHERE rowid = 20;
             INSERT INTO docs_meta VALUES (10, 'a'), (30, 'b');",
        )
        .unwrap();
    }

    #[test]
    fn test_virtual_tables_are_copied() {
        let temp = TempDir::new().unwrap();
        let src = temp.path().join("search.db");
        create_search_source(&src);
        let staging = temp.path().join("copy.db");

        let recorder = Recorder(RefCell::new(Vec::new()));
        let strategy = AttachCopy::new(Duration::from_secs(1));
        strategy.copy(&src, &staging, &recorder).unwrap();
        strategy.verify(&src, &staging).unwrap();
        assert_eq!(*recorder.0.borrow(), vec!["docs", "docs_meta"]);

        let conn = Connection::open(&staging).unwrap();
        let hits: Vec<i64> = conn
            .prepare("SELECT rowid FROM docs WHERE docs MATCH 'world' ORDER BY rowid")
            .unwrap()
            .query_map([], |r| r.get(0))
            .unwrap()
            .collect::<rusqlite::Result<_>>()
            .unwrap();
        assert_eq!(hits, vec![10, 30]);
        let meta: i64 = conn
            .query_row("SELECT count(*) FROM docs_meta", [], |r| r.get(0))
            .unwrap();
        assert_eq!(meta, 2);
    }

    #[test]
    fn test_verify_detects_missing_virtual_rows() {
        let temp = TempDir::new().unwrap();
        let src = temp.path().join("search.db");
        create_search_source(&src);
        let staging = temp.path().join("copy.db");
        let strategy = AttachCopy::new(Duration::from_secs(1));
        strategy.copy(&src, &staging, &NoopObserver).unwrap();

        Connection::open(&staging)
            .unwrap()
            .execute("DELETE FROM docs WHERE rowid = 30", [])
            .unwrap();
        let err = strategy.verify(&src, &staging).unwrap_err();
        assert!(matches!(err, BackupError::VerificationFailed { .. }));
        assert!(err.to_string().contains("docs"));
    }

    #[test]
    fn test_shadow_tables_are_not_listed() {
        let temp = TempDir::new().unwrap();
        let src = temp.path().join("search.db");
        create_search_source(&src);
        let conn = Connection::open(&src).unwrap();
        let tables = list_tables_in(&conn, "main").unwrap();
        let names: Vec<_> = tables.iter().map(|t| (t.name.as_str(), t.is_virtual)).collect();
        assert_eq!(names, vec![("docs", true), ("docs_meta", false)]);
    }

    #[test]
    fn test_locked_source_is_busy() {
        let temp = TempDir::new().unwrap();
        let src = temp.path().join("app.db");
        create_source(&src);
        let holder = Connection::open(&src).unwrap();
        holder.execute_batch("BEGIN EXCLUSIVE;").unwrap();

        let err = AttachCopy::new(Duration::from_millis(100))
            .copy(&src, &temp.path().join("copy.db"), &NoopObserver)
            .unwrap_err();
        assert!(matches!(err, BackupError::SourceBusy { .. }), "{err}");
        assert_eq!(err.exit_code(), 4);
        holder.execute_batch("ROLLBACK;").unwrap();
    }
}
