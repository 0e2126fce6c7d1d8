use super::{
    encode_uvarint, Cell, FileHeader, TableHeader, CELL_NULL, CELL_PRESENT, MAGIC, MARKER_ROW,
    MARKER_TABLE, MAX_VARINT_LEN,
};
use crate::error::{DumpError, Result};
use serde::Serialize;
use std::io::{BufWriter, Write};

/// Sequential dump stream encoder. Not meant to be shared between writers.
pub struct DumpWriter<W: Write> {
    inner: BufWriter<W>,
    /// Name and column count of the table whose rows are being written.
    current_table: Option<(String, usize)>,
}

impl<W: Write> DumpWriter<W> {
    pub fn new(inner: W) -> Self {
        Self {
            inner: BufWriter::new(inner),
            current_table: None,
        }
    }

    pub fn write_file_header(&mut self, header: &FileHeader) -> Result<()> {
        self.inner.write_all(MAGIC)?;
        self.write_prefixed(header)
    }

    pub fn write_table_header(&mut self, header: &TableHeader) -> Result<()> {
        self.inner.write_all(&[MARKER_TABLE])?;
        self.write_prefixed(header)?;
        self.current_table = Some((header.name.clone(), header.columns.len()));
        Ok(())
    }

    pub fn write_row(&mut self, row: &[Cell]) -> Result<()> {
        let (table, expected) = self
            .current_table
            .as_ref()
            .ok_or_else(|| DumpError::framing("row written before any table header"))?;
        if row.len() != *expected {
            return Err(DumpError::Arity {
                table: table.clone(),
                expected: *expected,
                actual: row.len(),
            });
        }

        self.inner.write_all(&[MARKER_ROW])?;
        let mut len_buf = [0u8; MAX_VARINT_LEN];
        for cell in row {
            match cell {
                None => self.inner.write_all(&[CELL_NULL])?,
                Some(value) => {
                    self.inner.write_all(&[CELL_PRESENT])?;
                    let n = encode_uvarint(value.len() as u64, &mut len_buf);
                    self.inner.write_all(&len_buf[..n])?;
                    self.inner.write_all(value)?;
                }
            }
        }
        Ok(())
    }

    /// Flush buffered bytes and hand back the underlying writer.
    pub fn finish(self) -> Result<W> {
        self.inner
            .into_inner()
            .map_err(|e| DumpError::Io(e.into_error()))
    }

    fn write_prefixed<T: Serialize>(&mut self, value: &T) -> Result<()> {
        let payload = serde_json::to_vec(value).map_err(|source| DumpError::Decode {
            record: "header",
            source,
        })?;
        let len = u32::try_from(payload.len())
            .map_err(|_| DumpError::framing("header record larger than 4 GiB"))?;
        self.inner.write_all(&len.to_le_bytes())?;
        self.inner.write_all(&payload)?;
        Ok(())
    }
}
