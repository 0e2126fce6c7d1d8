use thiserror::Error;

#[derive(Error, Debug)]
pub enum DumpError {
    /// The byte stream does not follow the dump framing (bad magic, marker or length).
    #[error("Framing error: {0}")]
    Framing(String),

    /// A length-prefixed header record could not be decoded.
    #[error("Failed to decode {record}: {source}")]
    Decode {
        record: &'static str,
        #[source]
        source: serde_json::Error,
    },

    #[error("Row has {actual} values, table {table} has {expected} columns")]
    Arity {
        table: String,
        expected: usize,
        actual: usize,
    },

    #[error("Database error: {0}")]
    Database(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Pipeline cancelled")]
    Cancelled,

    #[error("Pipeline stage {stage} failed: {message}")]
    Stage {
        stage: &'static str,
        message: String,
    },
}

impl DumpError {
    pub(crate) fn framing(msg: impl Into<String>) -> Self {
        DumpError::Framing(msg.into())
    }

    /// True for errors that are only a consequence of another stage failing:
    /// explicit cancellation, or a pipe whose other end went away.
    pub fn is_cancellation(&self) -> bool {
        match self {
            DumpError::Cancelled => true,
            DumpError::Io(e) => e.kind() == std::io::ErrorKind::BrokenPipe,
            _ => false,
        }
    }
}

impl From<rusqlite::Error> for DumpError {
    fn from(e: rusqlite::Error) -> Self {
        DumpError::Database(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, DumpError>;
