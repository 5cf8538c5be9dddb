//! Structured result envelope printed on stdout.

mod format;
mod model;
mod result_builder;

pub use format::OutputFormat;
pub use model::{CommandError, CommandResult};
pub use result_builder::{ResultBuilder, print_result};
