//! Entry points behind the CLI subcommands.

pub mod dump;
pub mod receive;
pub mod serve;

pub use dump::{run_convert, run_dump, DumpFormat};
pub use receive::{run_receive, ReceiveArgs};
pub use serve::run_serve;
