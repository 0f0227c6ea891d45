use rusqlite::Connection;
use rusqlite::types::ValueRef;
use sha2::{Digest, Sha256};
use std::fs::File;
use std::io::{Read, Result as IoResult};
use std::path::Path;

pub fn sha256_file(path: &Path) -> IoResult<String> {
    let mut file = File::open(path)?;
    let mut hasher = Sha256::new();
    let mut buf = [0u8; 8192];
    loop {
        let n = file.read(&mut buf)?;
        if n == 0 { break; }
        hasher.update(&buf[..n]);
    }
    Ok(hex::encode(hasher.finalize()))
}

/// Row count and content hash of one table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableDigest {
    pub rows: u64,
    pub sha256: String,
}

/// Quote an SQL identifier.
pub fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

/// Digest `schema.table` over the given columns.
///
/// Rows are ordered by every column so the result does not depend on
/// physical row order.
pub fn table_digest(
    conn: &Connection,
    schema: &str,
    table: &str,
    columns: &[String],
) -> rusqlite::Result<TableDigest> {
    let cols: Vec<String> = columns.iter().map(|c| quote_ident(c)).collect();
    let order: Vec<String> = (1..=cols.len()).map(|i| i.to_string()).collect();
    let sql = format!(
        "SELECT {} FROM {}.{} ORDER BY {}",
        cols.join(", "),
        quote_ident(schema),
        quote_ident(table),
        order.join(", ")
    );

    let mut stmt = conn.prepare(&sql)?;
    let mut rows = stmt.query([])?;
    let mut hasher = Sha256::new();
    let mut count = 0u64;
    while let Some(row) = rows.next()? {
        for i in 0..cols.len() {
            hash_value(&mut hasher, row.get_ref(i)?);
        }
        hasher.update(b"\n");
        count += 1;
    }
    Ok(TableDigest {
        rows: count,
        sha256: hex::encode(hasher.finalize()),
    })
}

/// Type-tagged so that e.g. integer 1 and text "1" hash differently
fn hash_value(hasher: &mut Sha256, value: ValueRef<'_>) {
    match value {
        ValueRef::Null => hasher.update(b"n"),
        ValueRef::Integer(v) => {
            hasher.update(b"i");
            hasher.update(v.to_le_bytes());
        }
        ValueRef::Real(f) => {
            hasher.update(b"r");
            hasher.update(f.to_bits().to_le_bytes());
        }
        ValueRef::Text(t) => {
            hasher.update(b"t");
            hasher.update((t.len() as u64).to_le_bytes());
            hasher.update(t);
        }
        ValueRef::Blob(b) => {
            hasher.update(b"b");
            hasher.update((b.len() as u64).to_le_bytes());
            hasher.update(b);
        }
    }
}
