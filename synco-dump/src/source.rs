//! Database access consumed by the dump producer.

use crate::codec::RowData;
use crate::error::{DumpError, Result};
use rusqlite::types::ValueRef;
use rusqlite::{params, Connection, OpenFlags};
use std::path::Path;

/// A bounded slice of a table's rows.
#[derive(Debug, Clone, Copy)]
pub struct Window {
    pub limit: u64,
    pub offset: u64,
}

/// One row query against a table.
#[derive(Debug, Clone)]
pub struct RowScan<'a> {
    pub table: &'a str,
    pub columns: &'a [String],
    /// Complete `WHERE ...` clause, see [`crate::policy::TablePolicy::row_filter`].
    pub filter: Option<&'a str>,
    pub window: Option<Window>,
}

/// Query capability of the database being dumped.
pub trait DumpSource: Send {
    fn server_version(&self) -> Result<String>;

    fn database_name(&self) -> Result<String>;

    /// User tables in dump order.
    fn tables(&self) -> Result<Vec<String>>;

    fn create_statement(&self, table: &str) -> Result<String>;

    fn columns(&self, table: &str) -> Result<Vec<String>>;

    /// Feed every row of `scan` to `visit`, returning the number of rows read.
    fn scan_rows(
        &self,
        scan: &RowScan<'_>,
        visit: &mut dyn FnMut(RowData) -> Result<()>,
    ) -> Result<u64>;
}

/// Dump source backed by an SQLite database file.
pub struct SqliteSource {
    conn: Connection,
    name: String,
}

impl SqliteSource {
    /// Open `path` read-only. The database name is the file stem.
    pub fn open(path: &Path) -> Result<Self> {
        let conn = Connection::open_with_flags(
            path,
            OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )?;
        let name = path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| "main".to_string());
        Ok(Self { conn, name })
    }

    pub fn from_connection(conn: Connection, name: impl Into<String>) -> Self {
        Self {
            conn,
            name: name.into(),
        }
    }
}

impl SqliteSource {
    /// Ordering key for paged reads: the rowid, or the primary key of a
    /// `WITHOUT ROWID` table.
    fn row_order(&self, table: &str) -> Result<String> {
        let mut stmt = self
            .conn
            .prepare(&format!("PRAGMA table_info({})", quote_ident(table)))?;
        let rows = stmt.query_map([], |row| {
            Ok((row.get::<_, String>("name")?, row.get::<_, i64>("pk")?))
        })?;
        let mut columns = Vec::new();
        let mut primary_key = Vec::new();
        for row in rows {
            let (name, pk) = row?;
            if pk > 0 {
                primary_key.push((pk, name.clone()));
            }
            columns.push(name.to_ascii_lowercase());
        }
        primary_key.sort();

        let create = self.create_statement(table)?.to_ascii_uppercase();
        let without_rowid = create
            .split_whitespace()
            .collect::<Vec<_>>()
            .join(" ")
            .contains("WITHOUT ROWID");

        if !without_rowid {
            // A column may shadow any of the rowid aliases.
            if let Some(alias) = ["rowid", "_rowid_", "oid"]
                .into_iter()
                .find(|alias| !columns.iter().any(|c| c == alias))
            {
                return Ok(alias.to_string());
            }
        }
        if primary_key.is_empty() {
            return Err(DumpError::Database(format!(
                "table {table} has no stable row order for chunked reads"
            )));
        }
        Ok(primary_key
            .iter()
            .map(|(_, name)| quote_ident(name))
            .collect::<Vec<_>>()
            .join(", "))
    }
}

fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

fn value_bytes(value: ValueRef<'_>) -> Option<Vec<u8>> {
    match value {
        ValueRef::Null => None,
        ValueRef::Integer(i) => Some(i.to_string().into_bytes()),
        ValueRef::Real(f) => Some(f.to_string().into_bytes()),
        ValueRef::Text(t) => Some(t.to_vec()),
        ValueRef::Blob(b) => Some(b.to_vec()),
    }
}

impl DumpSource for SqliteSource {
    fn server_version(&self) -> Result<String> {
        let version: String = self
            .conn
            .query_row("SELECT sqlite_version()", [], |row| row.get(0))?;
        Ok(format!("SQLite {version}"))
    }

    fn database_name(&self) -> Result<String> {
        Ok(self.name.clone())
    }

    fn tables(&self) -> Result<Vec<String>> {
        let mut stmt = self.conn.prepare(
            "SELECT name FROM sqlite_master
             WHERE type = 'table' AND name NOT LIKE 'sqlite_%'
             ORDER BY name",
        )?;
        let rows = stmt.query_map([], |row| row.get::<_, String>(0))?;
        let mut tables = Vec::new();
        for name in rows {
            tables.push(name?);
        }
        Ok(tables)
    }

    fn create_statement(&self, table: &str) -> Result<String> {
        let sql: Option<String> = self.conn.query_row(
            "SELECT sql FROM sqlite_master WHERE type = 'table' AND name = ?",
            params![table],
            |row| row.get(0),
        )?;
        sql.ok_or_else(|| DumpError::Database(format!("table {table} has no CREATE statement")))
    }

    fn columns(&self, table: &str) -> Result<Vec<String>> {
        let mut stmt = self
            .conn
            .prepare(&format!("PRAGMA table_info({})", quote_ident(table)))?;
        let rows = stmt.query_map([], |row| row.get::<_, String>("name"))?;
        let mut columns = Vec::new();
        for name in rows {
            columns.push(name?);
        }
        if columns.is_empty() {
            return Err(DumpError::Database(format!("table {table} has no columns")));
        }
        Ok(columns)
    }

    fn scan_rows(
        &self,
        scan: &RowScan<'_>,
        visit: &mut dyn FnMut(RowData) -> Result<()>,
    ) -> Result<u64> {
        let select = scan
            .columns
            .iter()
            .map(|c| quote_ident(c))
            .collect::<Vec<_>>()
            .join(", ");
        let mut sql = format!("SELECT {select} FROM {}", quote_ident(scan.table));
        if let Some(filter) = scan.filter {
            sql.push(' ');
            sql.push_str(filter);
        }
        if let Some(window) = scan.window {
            // Pages are separate statements; only a fixed order keeps them disjoint.
            let order = self.row_order(scan.table)?;
            sql.push_str(&format!(
                " ORDER BY {order} LIMIT {} OFFSET {}",
                window.limit, window.offset
            ));
        }

        let mut stmt = self.conn.prepare(&sql)?;
        let ncols = scan.columns.len();
        let mut rows = stmt.query([])?;
        let mut count = 0u64;
        while let Some(row) = rows.next()? {
            let mut data = Vec::with_capacity(ncols);
            for i in 0..ncols {
                data.push(value_bytes(row.get_ref(i)?));
            }
            visit(data)?;
            count += 1;
        }
        Ok(count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_db() -> SqliteSource {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch(
            "CREATE TABLE users (id INTEGER PRIMARY KEY, name TEXT, score REAL, avatar BLOB);
             INSERT INTO users VALUES (1, 'Alice', 1.5, x'00ff');
             INSERT INTO users VALUES (2, NULL, NULL, NULL);
             CREATE TABLE \"odd\"\"name\" (v TEXT);",
        )
        .unwrap();
        SqliteSource::from_connection(conn, "shop")
    }

    #[test]
    fn test_lists_user_tables() {
        let src = sample_db();
        assert_eq!(src.tables().unwrap(), vec!["odd\"name", "users"]);
        assert!(src.server_version().unwrap().starts_with("SQLite 3."));
        assert_eq!(src.database_name().unwrap(), "shop");
    }

    #[test]
    fn test_columns_and_create_statement() {
        let src = sample_db();
        assert_eq!(src.columns("users").unwrap(), vec!["id", "name", "score", "avatar"]);
        assert!(src.create_statement("users").unwrap().starts_with("CREATE TABLE users"));
        assert_eq!(src.columns("odd\"name").unwrap(), vec!["v"]);
    }

    #[test]
    fn test_scan_renders_values() {
        let src = sample_db();
        let columns = src.columns("users").unwrap();
        let mut rows = Vec::new();
        let scan = RowScan {
            table: "users",
            columns: &columns,
            filter: None,
            window: None,
        };
        let n = src
            .scan_rows(&scan, &mut |row| {
                rows.push(row);
                Ok(())
            })
            .unwrap();
        assert_eq!(n, 2);
        assert_eq!(
            rows[0],
            vec![
                Some(b"1".to_vec()),
                Some(b"Alice".to_vec()),
                Some(b"1.5".to_vec()),
                Some(vec![0x00, 0xff])
            ]
        );
        assert_eq!(rows[1], vec![Some(b"2".to_vec()), None, None, None]);
    }

    #[test]
    fn test_scan_applies_filter_and_window() {
        let src = sample_db();
        let columns = vec!["id".to_string()];
        let mut ids = Vec::new();
        let scan = RowScan {
            table: "users",
            columns: &columns,
            filter: Some("WHERE NOT COALESCE((name IS NULL), 0)"),
            window: Some(Window { limit: 10, offset: 0 }),
        };
        src.scan_rows(&scan, &mut |row| {
            ids.push(row);
            Ok(())
        })
        .unwrap();
        assert_eq!(ids, vec![vec![Some(b"1".to_vec())]]);
    }

    fn paged_ids(src: &SqliteSource, table: &str, columns: &[String], page: u64) -> Vec<String> {
        let mut ids = Vec::new();
        let mut offset = 0;
        loop {
            let scan = RowScan {
                table,
                columns,
                filter: None,
                window: Some(Window { limit: page, offset }),
            };
            let read = src
                .scan_rows(&scan, &mut |row| {
                    ids.push(String::from_utf8(row[0].clone().unwrap()).unwrap());
                    Ok(())
                })
                .unwrap();
            offset += read;
            if read < page {
                return ids;
            }
        }
    }

    #[test]
    fn test_paged_scan_follows_rowid_not_index() {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch(
            "CREATE TABLE items (id INTEGER, label TEXT);
             CREATE INDEX items_label ON items (label);",
        )
        .unwrap();
        // Labels sort in the reverse of insertion order.
        for i in 0..20 {
            conn.execute(
                "INSERT INTO items VALUES (?, ?)",
                params![i, format!("{:02}", 99 - i)],
            )
            .unwrap();
        }
        let src = SqliteSource::from_connection(conn, "shop");
        assert_eq!(src.row_order("items").unwrap(), "rowid");

        // Reading only the indexed column lets the planner pick the index.
        let ids = paged_ids(&src, "items", &["label".to_string()], 3);
        let expected: Vec<String> = (0..20).map(|i| format!("{:02}", 99 - i)).collect();
        assert_eq!(ids, expected);
    }

    #[test]
    fn test_paged_scan_without_rowid_uses_primary_key() {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch(
            "CREATE TABLE kv (k TEXT PRIMARY KEY, rowid TEXT) WITHOUT ROWID;
             INSERT INTO kv VALUES ('c', '1'), ('a', '2'), ('d', '3'), ('b', '4'), ('e', '5');",
        )
        .unwrap();
        let src = SqliteSource::from_connection(conn, "shop");
        assert_eq!(src.row_order("kv").unwrap(), "\"k\"");

        let ids = paged_ids(&src, "kv", &["k".to_string()], 2);
        assert_eq!(ids, vec!["a", "b", "c", "d", "e"]);
    }

    #[test]
    fn test_shadowed_rowid_falls_back_to_alias() {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch("CREATE TABLE t (rowid TEXT, v TEXT);").unwrap();
        let src = SqliteSource::from_connection(conn, "shop");
        assert_eq!(src.row_order("t").unwrap(), "_rowid_");
    }
}
