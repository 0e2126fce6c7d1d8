//! Dump stream to SQL conversion.
//!
//! Output is handed out in [`FlushUnit`]s instead of one buffer: the header,
//! each table's schema, every batch of `REPLACE INTO` statements and each
//! table's trailer are separate units. A unit is frozen before it is handed
//! to the sink, so the converter can never touch SQL that is in flight.

use crate::codec::{DumpReader, RowData};
use crate::error::Result;
use bytes::{BufMut, Bytes, BytesMut};
use std::io::Read;
use tracing::{debug, info};

const TOOL_VERSION: &str = concat!("synco-dump ", env!("CARGO_PKG_VERSION"));

pub const DEFAULT_BATCH_SIZE: usize = 1_000_000;

#[derive(Debug, Clone)]
pub struct ConvertOptions {
    /// Tables to convert. Empty converts every table; names missing from the
    /// dump are ignored.
    pub tables: Vec<String>,
    /// Statement size in bytes after which the next row starts a new statement.
    pub batch_size: usize,
    /// Leave out `CREATE DATABASE`, `DROP TABLE` and `CREATE TABLE`.
    pub skip_create: bool,
}

impl Default for ConvertOptions {
    fn default() -> Self {
        Self {
            tables: Vec::new(),
            batch_size: DEFAULT_BATCH_SIZE,
            skip_create: false,
        }
    }
}

/// An immutable chunk of SQL ready to be executed.
#[derive(Debug, Clone)]
pub struct FlushUnit {
    pub sql: Bytes,
    /// Table the unit belongs to; `None` for the file preamble.
    pub table: Option<String>,
    /// True when the unit carries row statements.
    pub contains_rows: bool,
}

/// Receives flush units. Returning from [`FlushSink::flush`] is the
/// acknowledgement that lets the converter continue.
pub trait FlushSink {
    fn flush(&mut self, unit: FlushUnit) -> Result<()>;
}

impl<F> FlushSink for F
where
    F: FnMut(FlushUnit) -> Result<()>,
{
    fn flush(&mut self, unit: FlushUnit) -> Result<()> {
        self(unit)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConvertSummary {
    pub tables_converted: usize,
    pub tables_skipped: usize,
    pub rows_converted: u64,
    pub rows_skipped: u64,
    pub flushes: u64,
}

pub struct SqlConverter {
    options: ConvertOptions,
}

impl SqlConverter {
    pub fn new(mut options: ConvertOptions) -> Self {
        options.tables.sort();
        options.tables.dedup();
        Self { options }
    }

    fn wants(&self, table: &str) -> bool {
        self.options.tables.is_empty()
            || self
                .options
                .tables
                .binary_search_by(|t| t.as_str().cmp(table))
                .is_ok()
    }

    pub fn convert<R, S>(&self, input: R, sink: &mut S) -> Result<ConvertSummary>
    where
        R: Read,
        S: FlushSink + ?Sized,
    {
        let mut reader = DumpReader::new(input);
        let header = reader.read_file_header()?;
        info!(
            database = %header.database_name,
            server_version = %header.server_version,
            "Converting dump to SQL"
        );

        let mut out = Emitter {
            buf: BytesMut::with_capacity(self.options.batch_size.min(8 * 1024 * 1024) + 4096),
            sink,
            summary: ConvertSummary::default(),
        };

        out.put(&format!(
            "-- {TOOL_VERSION}\n--\n-- ------------------------------------------------------\n-- Server version\t{}\n\n",
            header.server_version
        ));
        if !self.options.skip_create {
            let db = format!("`{}`", header.database_name);
            out.put(&format!("CREATE DATABASE IF NOT EXISTS {db};\nUSE {db};\n"));
        }
        out.put(SESSION_SETTINGS);
        out.flush(None, false)?;

        while let Some(table) = reader.read_table_header()? {
            let ncols = table.columns.len();
            if !self.wants(&table.name) {
                let skipped = reader.skip_rows(ncols)?;
                debug!(table = %table.name, rows = skipped, "Skipping table");
                out.summary.tables_skipped += 1;
                out.summary.rows_skipped += skipped as u64;
                continue;
            }

            let name = table.name.as_str();
            if !self.options.skip_create {
                out.put(&format!(
                    "--\n-- Table structure for table {name}\n--\n\n\
                     DROP TABLE IF EXISTS {name};\n\
                     /*!40101 SET @saved_cs_client     = @@character_set_client */;\n\
                     /*!40101 SET character_set_client = utf8 */;\n\n"
                ));
                out.put(&table.create_sql);
                out.put(";\n\n/*!40101 SET character_set_client = @saved_cs_client */;\n");
            }
            out.put(&format!("--\n-- Dumping data for table {name}\n--\n\n"));
            out.flush(Some(name), false)?;

            let insert_prefix = format!(
                "REPLACE INTO {name}(`{}`) VALUES ",
                table.columns.join("`,`")
            );

            let mut rows = 0u64;
            let mut statement_open = false;
            let mut statement_bytes = 0usize;
            while let Some(row) = reader.next_row(ncols)? {
                if rows == 0 {
                    out.put(&format!(
                        "/*!40000 ALTER TABLE {name} DISABLE KEYS */;\nTRUNCATE {name};\n"
                    ));
                }
                if statement_open && statement_bytes > self.options.batch_size {
                    out.put(";\n");
                    out.flush(Some(name), true)?;
                    statement_open = false;
                }
                if statement_open {
                    out.put(",");
                    statement_bytes += 1;
                } else {
                    out.put(&insert_prefix);
                    statement_open = true;
                    statement_bytes = 0;
                }
                statement_bytes += write_row(&mut out.buf, &row);
                rows += 1;
            }
            if statement_open {
                out.put(";\n");
                out.flush(Some(name), true)?;
            }

            if rows > 0 {
                out.put(&format!("/*!40000 ALTER TABLE {name} ENABLE KEYS */;\n"));
            }
            out.put("-- Finished table data dump\n\n");
            out.flush(Some(name), false)?;

            debug!(table = %name, rows, "Converted table");
            out.summary.tables_converted += 1;
            out.summary.rows_converted += rows;
        }

        let summary = out.summary;
        info!(
            tables = summary.tables_converted,
            skipped = summary.tables_skipped,
            rows = summary.rows_converted,
            "Conversion finished"
        );
        Ok(summary)
    }
}

const SESSION_SETTINGS: &str = "\
/*!40101 SET @OLD_CHARACTER_SET_CLIENT=@@CHARACTER_SET_CLIENT */;
/*!40101 SET @OLD_CHARACTER_SET_RESULTS=@@CHARACTER_SET_RESULTS */;
/*!40101 SET @OLD_COLLATION_CONNECTION=@@COLLATION_CONNECTION */;
/*!40101 SET NAMES utf8 */;
/*!40103 SET @OLD_TIME_ZONE=@@TIME_ZONE */;
/*!40103 SET TIME_ZONE='+00:00' */;
/*!40014 SET @OLD_UNIQUE_CHECKS=@@UNIQUE_CHECKS, UNIQUE_CHECKS=0 */;
/*!40014 SET @OLD_FOREIGN_KEY_CHECKS=@@FOREIGN_KEY_CHECKS, FOREIGN_KEY_CHECKS=0 */;
/*!40101 SET @OLD_SQL_MODE=@@SQL_MODE, SQL_MODE='NO_AUTO_VALUE_ON_ZERO' */;
/*!40111 SET @OLD_SQL_NOTES=@@SQL_NOTES, SQL_NOTES=0 */;

";

struct Emitter<'s, S: FlushSink + ?Sized> {
    buf: BytesMut,
    sink: &'s mut S,
    summary: ConvertSummary,
}

impl<S: FlushSink + ?Sized> Emitter<'_, S> {
    fn put(&mut self, s: &str) {
        self.buf.put_slice(s.as_bytes());
    }

    fn flush(&mut self, table: Option<&str>, contains_rows: bool) -> Result<()> {
        let unit = FlushUnit {
            sql: self.buf.split().freeze(),
            table: table.map(str::to_owned),
            contains_rows,
        };
        self.summary.flushes += 1;
        self.sink.flush(unit)
    }
}

/// Append one `(...)` tuple and return the number of bytes written.
fn write_row(buf: &mut BytesMut, row: &RowData) -> usize {
    let start = buf.len();
    buf.put_u8(b'(');
    for (i, cell) in row.iter().enumerate() {
        if i > 0 {
            buf.put_u8(b',');
        }
        match cell {
            Some(value) => {
                buf.put_u8(b'\'');
                escape_into(buf, value);
                buf.put_u8(b'\'');
            }
            None => buf.put_slice(b"null"),
        }
    }
    buf.put_u8(b')');
    buf.len() - start
}

/// Escape a value for a single-quoted MySQL string literal.
pub fn escape_into(buf: &mut BytesMut, value: &[u8]) {
    buf.reserve(value.len());
    for &c in value {
        let escape = match c {
            0 => b'0',
            b'\n' => b'n',
            b'\r' => b'r',
            b'\\' => b'\\',
            b'\'' => b'\'',
            b'"' => b'"',
            0x1a => b'Z',
            _ => {
                buf.put_u8(c);
                continue;
            }
        };
        buf.put_u8(b'\\');
        buf.put_u8(escape);
    }
}
