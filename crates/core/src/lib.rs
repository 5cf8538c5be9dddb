//! Point-in-time access to the disks of a running virtual machine.
//!
//! The crate resolves a VM snapshot on a vCenter endpoint to the files backing
//! its disks, then exposes the base disk read-only through a supervised nbdkit
//! process on a unix socket:
//!
//! - [`SessionManager`] keeps one authenticated connection and reconnects it
//!   when the remote session goes stale.
//! - [`DiskResolver`] turns VM and snapshot names into a [`SnapshotDiskInfo`].
//! - [`SnapshotExporter`] starts the export and hands back a
//!   [`snapview_runtime::ExportSession`] whose teardown is guaranteed.
//! - [`VmLifecycle`] covers snapshot creation and the linked-clone path.
//!
//! All remote access goes through the [`ManagementApi`] trait; the `fake` module
//! (behind the `fake` feature) provides an in-memory implementation for tests.

pub mod api;
pub mod config;
pub mod disk;
pub mod error;
pub mod export;
#[cfg(any(test, feature = "fake"))]
pub mod fake;
pub mod inventory;
pub mod lifecycle;
pub mod resolver;
pub mod session;
pub mod snapshot;
pub mod task;
pub mod thumbprint;
pub mod vim;
pub mod vm;
pub mod wait;

pub use api::{ConnectTarget, Connector, ManagementApi};
pub use config::{Config, ExportConfig, VCenterConfig};
pub use disk::{SnapshotDiskInfo, derive_base_disk_path};
pub use error::{Error, ErrorKind, Result, ResultExt};
pub use export::{ConnectionDetails, ExportTarget, SnapshotExporter, close_session};
pub use lifecycle::{LinkedClone, SnapshotOptions, VmLifecycle};
pub use resolver::{DiskResolver, ResolvedSnapshot, VmHandle};
pub use session::{Connection, SessionManager};
pub use snapshot::{SnapshotNode, SnapshotSummary, find_snapshot};
pub use snapview_runtime::{ExportSession, ExportState};
pub use task::TaskWait;
pub use vim::VimJsonConnector;
pub use vm::{VmDetails, VmFilter, VmListing, VmSummary};
