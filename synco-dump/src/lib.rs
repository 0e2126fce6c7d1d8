//! Streaming database dumps.
//!
//! A [`producer::Dumper`] reads a [`source::DumpSource`] into the binary
//! format of [`codec`], [`convert::SqlConverter`] turns that stream into SQL,
//! and [`pipeline::run_pipeline`] runs both together with a
//! [`pipeline::StatementExecutor`] under back-pressure.

pub mod codec;
pub mod convert;
pub mod error;
pub mod pipeline;
pub mod policy;
pub mod producer;
pub mod source;

pub use codec::{Cell, DumpReader, DumpWriter, FileHeader, RowData, TableHeader};
pub use convert::{ConvertOptions, ConvertSummary, FlushSink, FlushUnit, SqlConverter};
pub use error::{DumpError, Result};
pub use pipeline::{run_pipeline, PipelineOptions, PipelineReport, SqlWriter, StatementExecutor};
pub use policy::{TablePolicy, TableRule};
pub use producer::{DumpOptions, DumpSummary, Dumper};
pub use source::{DumpSource, SqliteSource};
