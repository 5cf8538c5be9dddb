//! Wire types for the vSphere management API.
//!
//! This crate contains the serde-serializable types exchanged with the remote
//! management endpoint over the VI/JSON protocol. These types represent the
//! "protocol layer" - the shapes of data as they appear on the wire.
//!
//! # Design Philosophy
//!
//! Types in this crate are:
//! * Pure data: No behavior beyond serialization/deserialization and small accessors
//! * Lenient: Unknown fields are ignored, optional fields default
//! * Stable: Changes only when the wire protocol changes
//!
//! Inventory walking, snapshot search and session handling live in `snapview`.

pub mod device;
pub mod fault;
pub mod moref;
pub mod session;
pub mod snapshot;
pub mod task;

pub use device::*;
pub use fault::*;
pub use moref::*;
pub use session::*;
pub use snapshot::*;
pub use task::*;
