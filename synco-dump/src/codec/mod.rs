//! Binary framing for streamed database dumps.
//!
//! Layout of a dump stream:
//!
//! ```text
//! "DUMP" | u32le len | FileHeader (JSON)
//! ( MARKER_TABLE | u32le len | TableHeader (JSON)
//!   ( MARKER_ROW | per column: null flag (u8) [ uvarint len | bytes ] )* )*
//! ```
//!
//! Row groups carry no count, so a reader branches on the marker byte of the
//! next record. The marker values sit above any byte a well-formed stream can
//! start a header or a row body with at that position.

mod reader;
mod writer;

pub use reader::{DumpReader, Rows};
pub use writer::DumpWriter;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Magic tag at the very start of every dump stream.
pub const MAGIC: &[u8; 4] = b"DUMP";

/// Marker preceding a [`TableHeader`] record.
pub const MARKER_TABLE: u8 = 231;

/// Marker preceding a row record.
pub const MARKER_ROW: u8 = 232;

/// Null flag values of a row cell.
pub(crate) const CELL_NULL: u8 = 0;
pub(crate) const CELL_PRESENT: u8 = 1;

/// Longest encoding of a u64 as an unsigned LEB128 varint.
pub(crate) const MAX_VARINT_LEN: usize = 10;

/// Written exactly once, right after the magic tag.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct FileHeader {
    pub server_version: String,
    pub database_name: String,
    #[serde(rename = "DumpStart")]
    pub dump_start: DateTime<Utc>,
}

/// Precedes a group of rows; `columns` fixes the arity of every row that follows.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct TableHeader {
    pub name: String,
    pub columns: Vec<String>,
    #[serde(rename = "CreateSQL")]
    pub create_sql: String,
}

/// One value of a row. `None` is SQL NULL, which is distinct from an empty value.
pub type Cell = Option<Vec<u8>>;

/// One row of a table, in column order.
pub type RowData = Vec<Cell>;

pub(crate) fn encode_uvarint(mut value: u64, buf: &mut [u8; MAX_VARINT_LEN]) -> usize {
    let mut i = 0;
    while value >= 0x80 {
        buf[i] = (value as u8) | 0x80;
        value >>= 7;
        i += 1;
    }
    buf[i] = value as u8;
    i + 1
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn sample_header() -> FileHeader {
        FileHeader {
            server_version: "10.11.6-MariaDB".to_string(),
            database_name: "shop".to_string(),
            dump_start: DateTime::parse_from_rfc3339("2024-03-01T10:00:00Z")
                .unwrap()
                .with_timezone(&Utc),
        }
    }

    fn users_table() -> TableHeader {
        TableHeader {
            name: "users".to_string(),
            columns: vec!["id".to_string(), "name".to_string()],
            create_sql: "CREATE TABLE users (id INT, name TEXT)".to_string(),
        }
    }

    fn orders_table() -> TableHeader {
        TableHeader {
            name: "orders".to_string(),
            columns: vec!["id".to_string(), "user_id".to_string(), "note".to_string()],
            create_sql: "CREATE TABLE orders (id INT, user_id INT, note BLOB)".to_string(),
        }
    }

    fn cell(s: &str) -> Cell {
        Some(s.as_bytes().to_vec())
    }

    fn encode_two_tables() -> Vec<u8> {
        let mut out = Vec::new();
        {
            let mut w = DumpWriter::new(&mut out);
            w.write_file_header(&sample_header()).unwrap();
            w.write_table_header(&users_table()).unwrap();
            w.write_row(&vec![cell("1"), cell("Alice")]).unwrap();
            w.write_row(&vec![None, cell("")]).unwrap();
            w.write_table_header(&orders_table()).unwrap();
            w.write_row(&vec![cell("7"), cell("1"), Some(vec![0u8, 0xff, b'\n', 231, 232])])
                .unwrap();
            w.finish().unwrap();
        }
        out
    }

    #[test]
    fn test_varint_encoding() {
        let mut buf = [0u8; MAX_VARINT_LEN];
        assert_eq!(encode_uvarint(0, &mut buf), 1);
        assert_eq!(buf[0], 0);
        assert_eq!(encode_uvarint(300, &mut buf), 2);
        assert_eq!(&buf[..2], &[0xac, 0x02]);
        assert_eq!(encode_uvarint(u64::MAX, &mut buf), MAX_VARINT_LEN);
    }

    #[test]
    fn test_stream_starts_with_magic_and_le_length() {
        let bytes = encode_two_tables();
        assert_eq!(&bytes[..4], MAGIC);
        let len = u32::from_le_bytes([bytes[4], bytes[5], bytes[6], bytes[7]]) as usize;
        let header: FileHeader = serde_json::from_slice(&bytes[8..8 + len]).unwrap();
        assert_eq!(header, sample_header());
        assert_eq!(bytes[8 + len], MARKER_TABLE);
    }

    #[test]
    fn test_round_trip_keeps_null_and_empty_distinct() {
        let bytes = encode_two_tables();
        let mut r = DumpReader::new(Cursor::new(bytes));

        assert_eq!(r.read_file_header().unwrap(), sample_header());

        let users = r.read_table_header().unwrap().unwrap();
        assert_eq!(users, users_table());
        let rows: Vec<RowData> = r.rows(users.columns.len()).collect::<Result<_, _>>().unwrap();
        assert_eq!(rows, vec![vec![cell("1"), cell("Alice")], vec![None, cell("")]]);

        let orders = r.read_table_header().unwrap().unwrap();
        assert_eq!(orders, orders_table());
        let rows: Vec<RowData> = r.rows(orders.columns.len()).collect::<Result<_, _>>().unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0][2], Some(vec![0u8, 0xff, b'\n', 231, 232]));

        assert!(r.read_table_header().unwrap().is_none());
    }

    #[test]
    fn test_skip_rows_lands_on_next_table_header() {
        let bytes = encode_two_tables();
        let mut r = DumpReader::new(Cursor::new(bytes));
        r.read_file_header().unwrap();

        let users = r.read_table_header().unwrap().unwrap();
        let skipped = r.skip_rows(users.columns.len()).unwrap();
        assert_eq!(skipped, 2);

        let orders = r.read_table_header().unwrap().unwrap();
        assert_eq!(orders.name, "orders");
        assert_eq!(r.skip_rows(orders.columns.len()).unwrap(), 1);
        assert!(r.read_table_header().unwrap().is_none());
    }

    #[test]
    fn test_read_table_header_on_row_marker_does_not_consume() {
        let bytes = encode_two_tables();
        let mut r = DumpReader::new(Cursor::new(bytes));
        r.read_file_header().unwrap();
        let users = r.read_table_header().unwrap().unwrap();

        // Next record is a row: the header read fails but leaves the marker in place.
        let err = r.read_table_header().unwrap_err();
        assert!(matches!(err, crate::DumpError::Framing(_)));
        let first = r.next_row(users.columns.len()).unwrap().unwrap();
        assert_eq!(first, vec![cell("1"), cell("Alice")]);
    }

    #[test]
    fn test_invalid_magic() {
        let mut r = DumpReader::new(Cursor::new(b"NOPE\x00\x00\x00\x00".to_vec()));
        let err = r.read_file_header().unwrap_err();
        assert!(matches!(err, crate::DumpError::Framing(_)));
    }

    #[test]
    fn test_truncated_row_is_framing_error() {
        let mut bytes = encode_two_tables();
        bytes.truncate(bytes.len() - 3);
        let mut r = DumpReader::new(Cursor::new(bytes));
        r.read_file_header().unwrap();
        let users = r.read_table_header().unwrap().unwrap();
        r.skip_rows(users.columns.len()).unwrap();
        let orders = r.read_table_header().unwrap().unwrap();
        let err = r.skip_rows(orders.columns.len()).unwrap_err();
        assert!(matches!(err, crate::DumpError::Framing(_)));
    }

    #[test]
    fn test_writer_rejects_wrong_arity() {
        let mut out = Vec::new();
        let mut w = DumpWriter::new(&mut out);
        w.write_file_header(&sample_header()).unwrap();
        w.write_table_header(&users_table()).unwrap();
        let err = w.write_row(&vec![cell("1")]).unwrap_err();
        assert!(matches!(err, crate::DumpError::Arity { expected: 2, actual: 1, .. }));
    }

    #[test]
    fn test_malformed_header_payload_is_decode_error() {
        let mut bytes = MAGIC.to_vec();
        bytes.extend_from_slice(&3u32.to_le_bytes());
        bytes.extend_from_slice(b"{x}");
        let mut r = DumpReader::new(Cursor::new(bytes));
        let err = r.read_file_header().unwrap_err();
        assert!(matches!(err, crate::DumpError::Decode { record: "file header", .. }));
    }
}
