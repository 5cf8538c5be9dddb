//! Unique filesystem socket endpoints.

use std::path::{Path, PathBuf};

use tracing::debug;
use uuid::Uuid;

/// A filesystem socket path chosen for exactly one export session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SocketEndpoint {
	path: PathBuf,
}

impl SocketEndpoint {
	/// Picks `<dir>/<prefix>-<uuid>.sock`; the random component keeps concurrent
	/// sessions from colliding.
	pub fn unique_in(dir: &Path, prefix: &str) -> Self {
		Self {
			path: dir.join(format!("{}-{}.sock", prefix, Uuid::new_v4())),
		}
	}

	/// Unique endpoint under the system temporary directory.
	pub fn unique(prefix: &str) -> Self {
		Self::unique_in(&std::env::temp_dir(), prefix)
	}

	pub fn path(&self) -> &Path {
		&self.path
	}

	/// NBD URI addressing this socket, e.g. `nbd+unix:///?socket=/tmp/nbdkit-<id>.sock`.
	pub fn nbd_url(&self) -> String {
		format!("nbd+unix:///?socket={}", self.path.display())
	}

	pub async fn exists(&self) -> bool {
		tokio::fs::try_exists(&self.path).await.unwrap_or(false)
	}

	/// Removes the socket file; a missing file is not an error.
	pub fn remove(&self) -> std::io::Result<bool> {
		match std::fs::remove_file(&self.path) {
			Ok(()) => {
				debug!(target = "snapview.export", path = %self.path.display(), "removed export socket");
				Ok(true)
			}
			Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(false),
			Err(err) => Err(err),
		}
	}
}
