//! Supervision of external block-device export processes.
//!
//! An [`ExportSession`] owns exactly one child process and one uniquely named
//! filesystem socket. It moves through `Starting -> Ready -> Closed` (or
//! `Starting -> Failed`), and its teardown runs on every exit path: explicit
//! [`ExportSession::close`], or `Drop` as a last resort.
//!
//! The crate knows nothing about the remote management plane; callers build an
//! [`ExportCommand`] for whichever export program they run.

pub mod endpoint;
pub mod error;
pub mod export;
pub mod output;
pub mod process;

pub use endpoint::SocketEndpoint;
pub use error::{ExportError, Result};
pub use export::{ExportCommand, ExportSession, ExportState, SupervisorOptions};
pub use output::{BoundedBuffer, OutputCapture};
