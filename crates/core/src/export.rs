//! nbdkit + VDDK export of snapshot disks.

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use snapview_runtime::{ExportCommand, ExportSession, SocketEndpoint, SupervisorOptions};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use url::Url;

use crate::config::ExportConfig;
use crate::disk::SnapshotDiskInfo;
use crate::error::{Error, Result};
use crate::session::SessionManager;
use crate::thumbprint;
use crate::wait;

/// Probed in order when no VDDK directory is configured.
pub const VDDK_LIBDIR_CANDIDATES: &[&str] = &["/opt/vmware-vix-disklib", "/usr/lib64/vmware-vix-disklib", "/usr/local/vmware-vix-disklib"];

const SOCKET_PREFIX: &str = "nbdkit";

/// What the export process needs to reach the endpoint.
#[derive(Clone)]
pub struct ConnectionDetails {
	pub host: String,
	pub username: String,
	pub password: String,
	/// SHA-256 certificate fingerprint; `None` means VDDK connects without pinning.
	pub thumbprint: Option<String>,
}

impl fmt::Debug for ConnectionDetails {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("ConnectionDetails")
			.field("host", &self.host)
			.field("username", &self.username)
			.field("password", &"***")
			.field("thumbprint", &self.thumbprint)
			.finish()
	}
}

impl ConnectionDetails {
	/// Host and credentials of `session`, plus the certificate thumbprint when
	/// `fetch_thumbprint` is set. A failed fetch is logged and leaves it unset;
	/// a cancelled one is an error.
	pub async fn from_session(session: &SessionManager, fetch_thumbprint: bool, cancel: &CancellationToken) -> Result<Self> {
		let mut details = session.connection_details()?;
		if fetch_thumbprint {
			let url = Url::parse(session.url()).map_err(|err| Error::Config(format!("vcenter.url '{}': {err}", session.url())))?;
			match wait::cancellable(cancel, "thumbprint fetch", thumbprint::fetch_sha256(&url)).await {
				Ok(thumbprint) => details.thumbprint = Some(thumbprint),
				Err(err) if err.is_cancelled() => return Err(err),
				Err(err) => {
					warn!(target = "snapview.export", host = %details.host, error = %err, "could not fetch certificate thumbprint; continuing without it");
				}
			}
		}
		Ok(details)
	}
}

/// Identifies the single disk one export serves.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExportTarget<'a> {
	pub vm_id: &'a str,
	pub snapshot_id: &'a str,
	pub disk_path: &'a str,
}

/// Starts supervised, read-only nbdkit exports of snapshot disks.
pub struct SnapshotExporter {
	session: Arc<SessionManager>,
	config: ExportConfig,
	options: SupervisorOptions,
}

impl SnapshotExporter {
	pub fn new(session: Arc<SessionManager>, config: ExportConfig) -> Self {
		let options = SupervisorOptions {
			startup_grace: config.startup_grace(),
			..SupervisorOptions::default()
		};
		Self { session, config, options }
	}

	pub fn with_supervisor_options(mut self, options: SupervisorOptions) -> Self {
		self.options = options;
		self
	}

	pub fn config(&self) -> &ExportConfig {
		&self.config
	}

	/// Configured nbdkit binary, else the one on `PATH`.
	pub fn nbdkit_program(&self) -> Result<PathBuf> {
		if let Some(path) = &self.config.nbdkit_path {
			return Ok(path.clone());
		}
		which::which("nbdkit").map_err(|err| Error::Config(format!("nbdkit not found on PATH ({err}); set export.nbdkit_path")))
	}

	/// Configured VDDK directory, else the first well-known one that exists.
	pub fn vddk_libdir(&self) -> Result<PathBuf> {
		if let Some(dir) = &self.config.vddk_libdir {
			return Ok(dir.clone());
		}
		VDDK_LIBDIR_CANDIDATES
			.iter()
			.map(PathBuf::from)
			.find(|dir| dir.is_dir())
			.ok_or_else(|| Error::Config(format!("VDDK not found in {}; set export.vddk_libdir", VDDK_LIBDIR_CANDIDATES.join(", "))))
	}

	fn endpoint(&self) -> SocketEndpoint {
		match &self.config.socket_dir {
			Some(dir) => SocketEndpoint::unique_in(dir, SOCKET_PREFIX),
			None => SocketEndpoint::unique(SOCKET_PREFIX),
		}
	}

	/// Starts the export of `target` and performs the startup liveness check.
	/// The returned session still has to become ready.
	pub async fn open(&self, target: &ExportTarget<'_>, details: &ConnectionDetails, cancel: &CancellationToken) -> Result<ExportSession> {
		let program = self.nbdkit_program()?;
		let libdir = self.vddk_libdir()?;
		let endpoint = self.endpoint();
		let ld_library_path = std::env::var_os("LD_LIBRARY_PATH").filter(|value| !value.is_empty());
		let command = build_command(
			&program,
			&libdir,
			endpoint.path(),
			target,
			details,
			self.config.transports.as_deref(),
			ld_library_path.is_none(),
		);

		info!(
			target = "snapview.export",
			vm = target.vm_id,
			snapshot = target.snapshot_id,
			disk = target.disk_path,
			pinned = details.thumbprint.is_some(),
			"opening snapshot export"
		);
		Ok(ExportSession::open(&command, endpoint, self.options.clone(), cancel).await?)
	}

	/// Opens the export of disk `disk_index` and waits until it is ready.
	/// On any failure the half-open session is closed before returning.
	pub async fn open_snapshot(&self, info: &SnapshotDiskInfo, disk_index: usize, cancel: &CancellationToken) -> Result<ExportSession> {
		let Some((_, base)) = info.disk(disk_index) else {
			return Err(Error::not_found("disk", format!("#{disk_index} of {} ({} disks)", info.vm_id, info.disk_count())));
		};
		let target = ExportTarget {
			vm_id: &info.vm_id,
			snapshot_id: &info.snapshot_id,
			disk_path: base,
		};

		let details = ConnectionDetails::from_session(&self.session, self.config.verify_thumbprint, cancel).await?;
		let mut session = self.open(&target, &details, cancel).await?;

		if let Err(err) = session.wait_for_ready(self.config.ready_timeout(), cancel).await {
			session.close().await;
			return Err(err.into());
		}
		info!(target = "snapview.export", url = %session.nbd_url(), vm = %info.vm_id, "snapshot export ready");
		Ok(session)
	}
}

/// Closes `session` if there is one. Safe on `None` and on already-closed sessions.
pub async fn close_session(session: &mut Option<ExportSession>) {
	match session.as_mut() {
		Some(session) => session.close().await,
		None => debug!(target = "snapview.export", "no export session to close"),
	}
}

/// `nbdkit -U <sock> --foreground --exit-with-parent -r vddk key=value...`.
pub fn build_command(
	program: &Path,
	libdir: &Path,
	socket: &Path,
	target: &ExportTarget<'_>,
	details: &ConnectionDetails,
	transports: Option<&str>,
	set_library_path: bool,
) -> ExportCommand {
	let mut command = ExportCommand::new(program)
		.arg("-U")
		.arg(socket.display().to_string())
		.args(["--foreground", "--exit-with-parent", "-r", "vddk"])
		.arg(format!("server={}", details.host))
		.arg(format!("user={}", details.username))
		.secret_arg("password", &details.password)
		.arg(format!("vm=moref={}", target.vm_id))
		.arg(format!("snapshot={}", target.snapshot_id))
		.arg(format!("file={}", target.disk_path))
		.arg(format!("libdir={}", libdir.display()));

	if let Some(thumbprint) = &details.thumbprint {
		command = command.arg(format!("thumbprint={thumbprint}"));
	}
	if let Some(transports) = transports.filter(|t| !t.is_empty()) {
		command = command.arg(format!("transports={transports}"));
	}
	if set_library_path {
		command = command.env("LD_LIBRARY_PATH", libdir.join("lib64").display().to_string());
	}
	command
}

#[cfg(test)]
mod tests {
	use super::*;

	fn details(thumbprint: Option<&str>) -> ConnectionDetails {
		ConnectionDetails {
			host: "vc.example.com".into(),
			username: "administrator@vsphere.local".into(),
			password: "hunter2".into(),
			thumbprint: thumbprint.map(str::to_string),
		}
	}

	#[test]
	fn command_exports_exactly_one_disk_read_only() {
		let target = ExportTarget {
			vm_id: "vm-42",
			snapshot_id: "snapshot-7",
			disk_path: "[ds1] web01/web01.vmdk",
		};
		let cmd = build_command(
			Path::new("/usr/sbin/nbdkit"),
			Path::new("/opt/vmware-vix-disklib"),
			Path::new("/tmp/nbdkit-1.sock"),
			&target,
			&details(Some("aa:bb")),
			Some("nbdssl"),
			true,
		);

		assert_eq!(
			cmd.argv(),
			vec![
				"-U",
				"/tmp/nbdkit-1.sock",
				"--foreground",
				"--exit-with-parent",
				"-r",
				"vddk",
				"server=vc.example.com",
				"user=administrator@vsphere.local",
				"password=hunter2",
				"vm=moref=vm-42",
				"snapshot=snapshot-7",
				"file=[ds1] web01/web01.vmdk",
				"libdir=/opt/vmware-vix-disklib",
				"thumbprint=aa:bb",
				"transports=nbdssl",
			]
		);
		assert!(cmd.display_args().contains(&"password=***".to_string()));
		assert!(!cmd.display_args().iter().any(|arg| arg.contains("hunter2")));
		assert_eq!(cmd.envs(), &[("LD_LIBRARY_PATH".to_string(), "/opt/vmware-vix-disklib/lib64".to_string())]);
	}

	#[test]
	fn thumbprint_and_library_path_are_optional() {
		let target = ExportTarget {
			vm_id: "vm-1",
			snapshot_id: "snapshot-1",
			disk_path: "[ds] a/a.vmdk",
		};
		let cmd = build_command(Path::new("nbdkit"), Path::new("/vddk"), Path::new("/tmp/s.sock"), &target, &details(None), None, false);
		assert!(!cmd.argv().iter().any(|arg| arg.starts_with("thumbprint=") || arg.starts_with("transports=")));
		assert!(cmd.envs().is_empty());
	}

	#[test]
	fn connection_details_debug_hides_password() {
		assert!(!format!("{:?}", details(None)).contains("hunter2"));
	}
}
