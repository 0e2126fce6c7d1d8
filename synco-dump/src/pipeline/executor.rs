use crate::convert::FlushUnit;
use crate::error::Result;
use std::io::Write;

/// Destination of converted SQL. Units arrive in order, one at a time.
pub trait StatementExecutor: Send {
    fn execute(&mut self, unit: &FlushUnit) -> Result<()>;

    /// Called once after the last unit.
    fn finish(&mut self) -> Result<()> {
        Ok(())
    }
}

/// Appends every unit to a writer, e.g. a `.sql` file or an encrypted artifact.
pub struct SqlWriter<W: Write> {
    inner: W,
    bytes_written: u64,
}

impl<W: Write> SqlWriter<W> {
    pub fn new(inner: W) -> Self {
        Self {
            inner,
            bytes_written: 0,
        }
    }

    pub fn bytes_written(&self) -> u64 {
        self.bytes_written
    }

    pub fn into_inner(self) -> W {
        self.inner
    }
}

impl<W: Write + Send> StatementExecutor for SqlWriter<W> {
    fn execute(&mut self, unit: &FlushUnit) -> Result<()> {
        self.inner.write_all(&unit.sql)?;
        self.bytes_written += unit.sql.len() as u64;
        Ok(())
    }

    fn finish(&mut self) -> Result<()> {
        self.inner.flush()?;
        Ok(())
    }
}

impl<E: StatementExecutor + ?Sized> StatementExecutor for Box<E> {
    fn execute(&mut self, unit: &FlushUnit) -> Result<()> {
        (**self).execute(unit)
    }

    fn finish(&mut self) -> Result<()> {
        (**self).finish()
    }
}
