use super::{
    FileHeader, RowData, TableHeader, CELL_NULL, CELL_PRESENT, MAGIC, MARKER_ROW, MARKER_TABLE,
    MAX_VARINT_LEN,
};
use crate::error::{DumpError, Result};
use serde::de::DeserializeOwned;
use std::io::{self, BufRead, BufReader, Read};

/// Header records above this size are treated as corrupt framing.
const MAX_HEADER_LEN: u32 = 64 * 1024 * 1024;

/// Forward-only dump stream decoder.
pub struct DumpReader<R: Read> {
    inner: BufReader<R>,
}

impl<R: Read> DumpReader<R> {
    pub fn new(inner: R) -> Self {
        Self {
            inner: BufReader::new(inner),
        }
    }

    pub fn read_file_header(&mut self) -> Result<FileHeader> {
        let mut magic = [0u8; 4];
        self.read_exact_framed(&mut magic, "magic")?;
        if &magic != MAGIC {
            return Err(DumpError::framing(format!(
                "invalid magic {:?}, expected {:?}",
                String::from_utf8_lossy(&magic),
                String::from_utf8_lossy(MAGIC)
            )));
        }
        self.decode_prefixed("file header")
    }

    /// Read the next table header.
    ///
    /// Returns `Ok(None)` at a clean end of stream. When the next record is
    /// not a table header the marker is left unconsumed and a framing error
    /// is returned.
    pub fn read_table_header(&mut self) -> Result<Option<TableHeader>> {
        match self.peek_marker()? {
            None => Ok(None),
            Some(MARKER_TABLE) => {
                self.inner.consume(1);
                self.decode_prefixed("table header").map(Some)
            }
            Some(other) => Err(DumpError::framing(format!(
                "unexpected marker {other}, expected table header"
            ))),
        }
    }

    /// Read one row of `columns` values, or `None` once the row group ends.
    pub fn next_row(&mut self, columns: usize) -> Result<Option<RowData>> {
        if !self.at_row_marker()? {
            return Ok(None);
        }
        self.inner.consume(1);

        let mut row = Vec::with_capacity(columns);
        for _ in 0..columns {
            row.push(self.read_cell(false)?);
        }
        Ok(Some(row))
    }

    /// Lazily iterate the rows of the current group.
    pub fn rows(&mut self, columns: usize) -> Rows<'_, R> {
        Rows {
            reader: self,
            columns,
            done: false,
        }
    }

    /// Consume the rest of the current row group without keeping any values.
    ///
    /// Null flags and length prefixes are still decoded so the stream stays
    /// aligned; only the payload allocation is avoided.
    pub fn skip_rows(&mut self, columns: usize) -> Result<usize> {
        let mut skipped = 0;
        while self.at_row_marker()? {
            self.inner.consume(1);
            for _ in 0..columns {
                self.read_cell(true)?;
            }
            skipped += 1;
        }
        Ok(skipped)
    }

    pub fn into_inner(self) -> R {
        self.inner.into_inner()
    }

    fn at_row_marker(&mut self) -> Result<bool> {
        Ok(self.peek_marker()? == Some(MARKER_ROW))
    }

    fn peek_marker(&mut self) -> Result<Option<u8>> {
        let buf = self.inner.fill_buf()?;
        Ok(buf.first().copied())
    }

    fn read_cell(&mut self, discard: bool) -> Result<Option<Vec<u8>>> {
        let mut flag = [0u8; 1];
        self.read_exact_framed(&mut flag, "null flag")?;
        match flag[0] {
            CELL_NULL => Ok(None),
            CELL_PRESENT => {
                let len = self.read_uvarint()?;
                if discard {
                    let copied = io::copy(&mut (&mut self.inner).take(len), &mut io::sink())?;
                    if copied != len {
                        return Err(DumpError::framing("truncated value while skipping"));
                    }
                    Ok(None)
                } else {
                    let len = usize::try_from(len)
                        .map_err(|_| DumpError::framing("value length overflows usize"))?;
                    let mut value = vec![0u8; len];
                    self.read_exact_framed(&mut value, "value")?;
                    Ok(Some(value))
                }
            }
            other => Err(DumpError::framing(format!("invalid null flag {other}"))),
        }
    }

    fn read_uvarint(&mut self) -> Result<u64> {
        let mut value: u64 = 0;
        for i in 0..MAX_VARINT_LEN {
            let mut byte = [0u8; 1];
            self.read_exact_framed(&mut byte, "value length")?;
            let b = byte[0];
            if i == MAX_VARINT_LEN - 1 && b > 1 {
                return Err(DumpError::framing("value length varint overflows u64"));
            }
            value |= u64::from(b & 0x7f) << (7 * i);
            if b < 0x80 {
                return Ok(value);
            }
        }
        Err(DumpError::framing("value length varint too long"))
    }

    fn decode_prefixed<T: DeserializeOwned>(&mut self, record: &'static str) -> Result<T> {
        let mut len_buf = [0u8; 4];
        self.read_exact_framed(&mut len_buf, record)?;
        let len = u32::from_le_bytes(len_buf);
        if len > MAX_HEADER_LEN {
            return Err(DumpError::framing(format!("{record} length {len} is implausible")));
        }

        let mut payload = vec![0u8; len as usize];
        self.read_exact_framed(&mut payload, record)?;
        serde_json::from_slice(&payload).map_err(|source| DumpError::Decode { record, source })
    }

    fn read_exact_framed(&mut self, buf: &mut [u8], what: &str) -> Result<()> {
        self.inner.read_exact(buf).map_err(|e| {
            if e.kind() == io::ErrorKind::UnexpectedEof {
                DumpError::framing(format!("stream truncated while reading {what}"))
            } else {
                DumpError::Io(e)
            }
        })
    }
}

/// Iterator over one row group, see [`DumpReader::rows`].
pub struct Rows<'a, R: Read> {
    reader: &'a mut DumpReader<R>,
    columns: usize,
    done: bool,
}

impl<R: Read> Iterator for Rows<'_, R> {
    type Item = Result<RowData>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        match self.reader.next_row(self.columns) {
            Ok(Some(row)) => Some(Ok(row)),
            Ok(None) => {
                self.done = true;
                None
            }
            Err(e) => {
                self.done = true;
                Some(Err(e))
            }
        }
    }
}
