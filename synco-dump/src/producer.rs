use crate::codec::{DumpWriter, FileHeader, TableHeader};
use crate::error::{DumpError, Result};
use crate::policy::{TablePolicy, TableRule};
use crate::source::{DumpSource, RowScan, Window};
use chrono::Utc;
use std::io::Write;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

#[derive(Debug, Clone, Default)]
pub struct DumpOptions {
    pub policy: TablePolicy,
    /// Ignore the policy and dump every row of every table.
    pub dump_all: bool,
    /// Rows per query; 0 reads each table with a single query.
    pub chunk_rows: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DumpSummary {
    pub tables: usize,
    pub tables_excluded: usize,
    pub rows: u64,
}

/// Writes a dump stream for every table of a [`DumpSource`].
pub struct Dumper<S> {
    source: S,
    options: DumpOptions,
}

impl<S: DumpSource> Dumper<S> {
    pub fn new(source: S, options: DumpOptions) -> Self {
        Self { source, options }
    }

    pub fn dump<W: Write>(&self, out: W, cancel: &CancellationToken) -> Result<DumpSummary> {
        let database = self.source.database_name()?;
        let header = FileHeader {
            server_version: self.source.server_version()?,
            database_name: database.clone(),
            dump_start: Utc::now(),
        };
        let tables = self.source.tables()?;
        info!(database = %database, tables = tables.len(), "Starting dump");

        let mut writer = DumpWriter::new(out);
        writer.write_file_header(&header)?;

        let mut summary = DumpSummary::default();
        for table in &tables {
            if cancel.is_cancelled() {
                return Err(DumpError::Cancelled);
            }

            let rule = if self.options.dump_all {
                &TableRule::Include
            } else {
                self.options.policy.rule(table)
            };
            if *rule == TableRule::Exclude {
                debug!(table = %table, "Excluded by policy");
                summary.tables_excluded += 1;
                continue;
            }

            let columns = self.source.columns(table)?;
            writer.write_table_header(&TableHeader {
                name: table.clone(),
                columns: columns.clone(),
                create_sql: self.source.create_statement(table)?,
            })?;

            let filter = if self.options.dump_all {
                None
            } else {
                self.options.policy.row_filter(table)
            };
            let rows = self.write_rows(&mut writer, table, &columns, filter.as_deref(), cancel)?;
            debug!(table = %table, rows, "Dumped table");
            summary.tables += 1;
            summary.rows += rows;
        }

        writer.finish()?;
        info!(
            tables = summary.tables,
            excluded = summary.tables_excluded,
            rows = summary.rows,
            "Dump finished"
        );
        Ok(summary)
    }

    fn write_rows<W: Write>(
        &self,
        writer: &mut DumpWriter<W>,
        table: &str,
        columns: &[String],
        filter: Option<&str>,
        cancel: &CancellationToken,
    ) -> Result<u64> {
        let mut visit = |row: Vec<Option<Vec<u8>>>| writer.write_row(&row);

        if self.options.chunk_rows == 0 {
            let scan = RowScan {
                table,
                columns,
                filter,
                window: None,
            };
            return self.source.scan_rows(&scan, &mut visit);
        }

        let mut total = 0;
        loop {
            if cancel.is_cancelled() {
                return Err(DumpError::Cancelled);
            }
            let scan = RowScan {
                table,
                columns,
                filter,
                window: Some(Window {
                    limit: self.options.chunk_rows,
                    offset: total,
                }),
            };
            let read = self.source.scan_rows(&scan, &mut visit)?;
            total += read;
            if read < self.options.chunk_rows {
                return Ok(total);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::DumpReader;
    use crate::source::SqliteSource;
    use rusqlite::Connection;
    use std::io::Cursor;

    fn shop() -> SqliteSource {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch(
            "CREATE TABLE users (id INTEGER, name TEXT);
             CREATE TABLE sessions (token TEXT);
             CREATE TABLE logs (id INTEGER, level TEXT);
             INSERT INTO sessions VALUES ('abc');
             INSERT INTO logs VALUES (1, 'debug'), (2, 'error'), (3, NULL);",
        )
        .unwrap();
        for i in 0..25 {
            conn.execute("INSERT INTO users VALUES (?, ?)", rusqlite::params![i, format!("user{i}")])
                .unwrap();
        }
        SqliteSource::from_connection(conn, "shop")
    }

    fn read_back(bytes: Vec<u8>) -> Vec<(String, usize)> {
        let mut r = DumpReader::new(Cursor::new(bytes));
        let header = r.read_file_header().unwrap();
        assert_eq!(header.database_name, "shop");
        let mut tables = Vec::new();
        while let Some(t) = r.read_table_header().unwrap() {
            let n = r.skip_rows(t.columns.len()).unwrap();
            tables.push((t.name, n));
        }
        tables
    }

    #[test]
    fn test_policy_shapes_dump() {
        let policy = TablePolicy::new()
            .with_rule("sessions", TableRule::Exclude)
            .with_rule(
                "logs",
                TableRule::ExcludeRows {
                    predicate: "level = 'debug'".to_string(),
                },
            );
        let dumper = Dumper::new(
            shop(),
            DumpOptions {
                policy,
                ..Default::default()
            },
        );
        let mut out = Vec::new();
        let summary = dumper.dump(&mut out, &CancellationToken::new()).unwrap();

        // The NULL level row is kept: COALESCE turns the unknown predicate into false.
        assert_eq!(
            read_back(out),
            vec![("logs".to_string(), 2), ("users".to_string(), 25)]
        );
        assert_eq!(summary.tables_excluded, 1);
        assert_eq!(summary.rows, 27);
    }

    #[test]
    fn test_dump_all_ignores_policy() {
        let dumper = Dumper::new(
            shop(),
            DumpOptions {
                policy: TablePolicy::new().with_rule("sessions", TableRule::Exclude),
                dump_all: true,
                chunk_rows: 0,
            },
        );
        let mut out = Vec::new();
        dumper.dump(&mut out, &CancellationToken::new()).unwrap();
        let tables = read_back(out);
        assert_eq!(tables.len(), 3);
        assert!(tables.contains(&("sessions".to_string(), 1)));
    }

    #[test]
    fn test_chunked_reads_cover_every_row() {
        let dumper = Dumper::new(
            shop(),
            DumpOptions {
                chunk_rows: 10,
                ..Default::default()
            },
        );
        let mut out = Vec::new();
        let summary = dumper.dump(&mut out, &CancellationToken::new()).unwrap();
        assert_eq!(summary.rows, 25 + 1 + 3);
        assert!(read_back(out).contains(&("users".to_string(), 25)));
    }

    #[test]
    fn test_chunked_reads_emit_each_row_once() {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch(
            "CREATE TABLE events (id INTEGER, kind TEXT);
             CREATE INDEX events_kind ON events (kind);",
        )
        .unwrap();
        for i in 0..50 {
            conn.execute(
                "INSERT INTO events VALUES (?, ?)",
                rusqlite::params![i, ["z", "m", "a"][i % 3]],
            )
            .unwrap();
        }
        let policy = TablePolicy::new().with_rule(
            "events",
            TableRule::ExcludeRows {
                predicate: "kind = 'none'".to_string(),
            },
        );
        let dumper = Dumper::new(
            SqliteSource::from_connection(conn, "shop"),
            DumpOptions {
                policy,
                dump_all: false,
                chunk_rows: 7,
            },
        );
        let mut out = Vec::new();
        let summary = dumper.dump(&mut out, &CancellationToken::new()).unwrap();
        assert_eq!(summary.rows, 50);

        let mut r = DumpReader::new(Cursor::new(out));
        r.read_file_header().unwrap();
        let table = r.read_table_header().unwrap().unwrap();
        let ids: Vec<i64> = r
            .rows(table.columns.len())
            .map(|row| {
                let row = row.unwrap();
                String::from_utf8(row[0].clone().unwrap()).unwrap().parse().unwrap()
            })
            .collect();
        assert_eq!(ids, (0..50).collect::<Vec<i64>>());
    }

    #[test]
    fn test_cancelled_before_start() {
        let cancel = CancellationToken::new();
        cancel.cancel();
        let dumper = Dumper::new(shop(), DumpOptions::default());
        let err = dumper.dump(Vec::new(), &cancel).unwrap_err();
        assert!(err.is_cancellation());
    }
}
