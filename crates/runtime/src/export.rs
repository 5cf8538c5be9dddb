//! Export session supervision: spawn, readiness polling and guaranteed teardown.

use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};
use std::time::{Duration, Instant};

use tokio::process::{Child, Command};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::endpoint::SocketEndpoint;
use crate::error::{ExitPhase, ExportError, Result};
use crate::output::OutputCapture;
use crate::process;

const OUTPUT_DRAIN_LIMIT: Duration = Duration::from_secs(1);

/// Timing and capture knobs for a supervised export process.
#[derive(Debug, Clone)]
pub struct SupervisorOptions {
	/// Pause between spawn and the first liveness check in [`ExportSession::open`].
	pub startup_grace: Duration,
	/// Interval between readiness polls.
	pub poll_interval: Duration,
	/// Extra wait after the endpoint appears, letting the process finish initialising.
	pub ready_grace: Duration,
	/// How long a terminated process may take to exit before it is killed.
	pub shutdown_grace: Duration,
	/// Byte cap per captured stream.
	pub output_limit: usize,
	/// Log captured output every this many polls.
	pub diagnostics_every: u32,
}

impl Default for SupervisorOptions {
	fn default() -> Self {
		Self {
			startup_grace: Duration::from_secs(2),
			poll_interval: Duration::from_millis(500),
			ready_grace: Duration::from_millis(500),
			shutdown_grace: Duration::from_secs(5),
			output_limit: 64 * 1024,
			diagnostics_every: 10,
		}
	}
}

#[derive(Debug, Clone)]
struct CommandArg {
	value: String,
	display: Option<String>,
}

/// Program, arguments and environment of an export process.
///
/// Arguments added through [`ExportCommand::secret_arg`] are masked in
/// [`ExportCommand::display_args`], which is what gets logged.
#[derive(Debug, Clone)]
pub struct ExportCommand {
	program: PathBuf,
	args: Vec<CommandArg>,
	env: Vec<(String, String)>,
}

impl ExportCommand {
	pub fn new(program: impl Into<PathBuf>) -> Self {
		Self {
			program: program.into(),
			args: Vec::new(),
			env: Vec::new(),
		}
	}

	pub fn arg(mut self, value: impl Into<String>) -> Self {
		self.args.push(CommandArg {
			value: value.into(),
			display: None,
		});
		self
	}

	pub fn args<I, S>(mut self, values: I) -> Self
	where
		I: IntoIterator<Item = S>,
		S: Into<String>,
	{
		for value in values {
			self = self.arg(value);
		}
		self
	}

	/// Adds `key=value`, rendered as `key=***` in logs.
	pub fn secret_arg(mut self, key: &str, value: &str) -> Self {
		self.args.push(CommandArg {
			value: format!("{key}={value}"),
			display: Some(format!("{key}=***")),
		});
		self
	}

	pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
		self.env.push((key.into(), value.into()));
		self
	}

	pub fn program(&self) -> &Path {
		&self.program
	}

	/// Arguments exactly as passed to the process.
	pub fn argv(&self) -> Vec<&str> {
		self.args.iter().map(|arg| arg.value.as_str()).collect()
	}

	/// Arguments with secrets masked.
	pub fn display_args(&self) -> Vec<String> {
		self.args
			.iter()
			.map(|arg| arg.display.clone().unwrap_or_else(|| arg.value.clone()))
			.collect()
	}

	pub fn envs(&self) -> &[(String, String)] {
		&self.env
	}

	fn to_command(&self) -> Command {
		let mut cmd = Command::new(&self.program);
		cmd.args(self.args.iter().map(|arg| arg.value.as_str()));
		cmd.envs(self.env.iter().map(|(k, v)| (k.as_str(), v.as_str())));
		cmd
	}
}

/// Lifecycle of an [`ExportSession`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExportState {
	/// Process launched, endpoint not yet seen.
	Starting,
	/// Endpoint reachable; consumers may attach.
	Ready,
	/// Process exited before the endpoint became reachable.
	Failed,
	/// Teardown complete.
	Closed,
}

impl std::fmt::Display for ExportState {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		match self {
			ExportState::Starting => write!(f, "starting"),
			ExportState::Ready => write!(f, "ready"),
			ExportState::Failed => write!(f, "failed"),
			ExportState::Closed => write!(f, "closed"),
		}
	}
}

/// One running export process bound to one unique socket endpoint.
#[derive(Debug)]
pub struct ExportSession {
	endpoint: SocketEndpoint,
	child: Option<Child>,
	pid: Option<u32>,
	output: OutputCapture,
	options: SupervisorOptions,
	state: ExportState,
	exit_status: Option<ExitStatus>,
}

impl ExportSession {
	/// Spawns `command`, which must create `endpoint` once it serves the disk.
	///
	/// After `startup_grace` the process is checked once; if it already exited the
	/// error embeds whatever it printed. Cancelling during the grace period
	/// closes the process before returning.
	pub async fn open(command: &ExportCommand, endpoint: SocketEndpoint, options: SupervisorOptions, cancel: &CancellationToken) -> Result<Self> {
		info!(
			target = "snapview.export",
			program = %command.program().display(),
			args = ?command.display_args(),
			socket = %endpoint.path().display(),
			"starting export process"
		);

		let mut cmd = command.to_command();
		cmd.stdin(Stdio::null()).stdout(Stdio::piped()).stderr(Stdio::piped()).kill_on_drop(true);

		let mut child = cmd.spawn().map_err(|source| ExportError::Spawn {
			program: command.program().display().to_string(),
			source,
		})?;

		let mut output = OutputCapture::new(options.output_limit);
		if let Some(stdout) = child.stdout.take() {
			output.capture_stdout(stdout);
		}
		if let Some(stderr) = child.stderr.take() {
			output.capture_stderr(stderr);
		}

		let mut session = Self {
			endpoint,
			pid: child.id(),
			child: Some(child),
			output,
			options,
			state: ExportState::Starting,
			exit_status: None,
		};

		if !session.options.startup_grace.is_zero() {
			tokio::select! {
				biased;
				_ = cancel.cancelled() => {
					session.close().await;
					return Err(ExportError::Cancelled);
				}
				_ = tokio::time::sleep(session.options.startup_grace) => {}
			}
		}

		if let Some(status) = session.poll_exit()? {
			return Err(session.fail(ExitPhase::Immediately, status).await);
		}

		if session.output.has_output() {
			info!(
				target = "snapview.export",
				stderr = %session.output.stderr(),
				stdout = %session.output.stdout(),
				"export process initial output"
			);
		}

		Ok(session)
	}

	/// Polls until the endpoint exists, the process dies, the timeout elapses or
	/// `cancel` fires. Liveness is checked on every poll.
	pub async fn wait_for_ready(&mut self, timeout: Duration, cancel: &CancellationToken) -> Result<()> {
		match self.state {
			ExportState::Ready => return Ok(()),
			ExportState::Closed => return Err(ExportError::Closed),
			ExportState::Failed | ExportState::Starting => {}
		}

		let deadline = Instant::now() + timeout;
		let mut polls: u32 = 0;

		loop {
			if cancel.is_cancelled() {
				return Err(ExportError::Cancelled);
			}
			polls += 1;

			if let Some(status) = self.poll_exit()? {
				return Err(self.fail(ExitPhase::BeforeReady, status).await);
			}

			if self.options.diagnostics_every > 0 && polls % self.options.diagnostics_every == 0 && self.output.has_output() {
				debug!(
					target = "snapview.export",
					stderr = %self.output.stderr(),
					stdout = %self.output.stdout(),
					polls,
					"export process output while waiting"
				);
			}

			if self.endpoint.exists().await {
				tokio::select! {
					_ = cancel.cancelled() => return Err(ExportError::Cancelled),
					_ = tokio::time::sleep(self.options.ready_grace) => {}
				}
				self.state = ExportState::Ready;
				info!(
					target = "snapview.export",
					socket = %self.endpoint.path().display(),
					pid = ?self.pid,
					polls,
					"export endpoint ready"
				);
				return Ok(());
			}

			let now = Instant::now();
			if now >= deadline {
				break;
			}
			let nap = self.options.poll_interval.min(deadline - now);
			tokio::select! {
				_ = cancel.cancelled() => return Err(ExportError::Cancelled),
				_ = tokio::time::sleep(nap) => {}
			}
		}

		if let Some(status) = self.poll_exit()? {
			return Err(self.fail(ExitPhase::BeforeReady, status).await);
		}

		let diagnostics = self.output.diagnostics();
		error!(
			target = "snapview.export",
			socket = %self.endpoint.path().display(),
			?timeout,
			diagnostics = %diagnostics,
			"export process running but endpoint not reachable"
		);
		Err(ExportError::NotReady {
			endpoint: self.endpoint.path().to_path_buf(),
			timeout,
			diagnostics,
		})
	}

	/// Terminates the process (graceful signal, then kill after the shutdown grace)
	/// and removes the socket file. Idempotent; the removal is attempted on every call.
	///
	/// Cleanup failures are logged, never returned: teardown always completes.
	pub async fn close(&mut self) {
		if let Some(mut child) = self.child.take() {
			if self.exit_status.is_none() {
				match child.try_wait() {
					Ok(Some(status)) => self.exit_status = Some(status),
					Ok(None) => self.terminate(&mut child).await,
					Err(err) => {
						debug!(target = "snapview.export", error = %err, "could not query export process; killing");
						if let Err(err) = child.kill().await {
							warn!(target = "snapview.export", error = %err, "failed to kill export process");
						}
					}
				}
			}
		}

		if let Err(err) = self.endpoint.remove() {
			warn!(
				target = "snapview.export",
				socket = %self.endpoint.path().display(),
				error = %err,
				"failed to remove export socket"
			);
		}

		if self.state != ExportState::Closed {
			info!(
				target = "snapview.export",
				socket = %self.endpoint.path().display(),
				status = ?self.exit_status,
				"export session closed"
			);
		}
		self.state = ExportState::Closed;
	}

	pub fn state(&self) -> ExportState {
		self.state
	}

	pub fn endpoint(&self) -> &SocketEndpoint {
		&self.endpoint
	}

	pub fn socket_path(&self) -> &Path {
		self.endpoint.path()
	}

	/// URL handed to the inspection tool.
	pub fn nbd_url(&self) -> String {
		self.endpoint.nbd_url()
	}

	pub fn pid(&self) -> Option<u32> {
		self.pid
	}

	/// Output captured so far.
	pub fn diagnostics(&self) -> String {
		self.output.diagnostics()
	}

	fn poll_exit(&mut self) -> Result<Option<ExitStatus>> {
		if let Some(status) = self.exit_status {
			return Ok(Some(status));
		}
		let Some(child) = self.child.as_mut() else {
			return Ok(None);
		};
		let status = child.try_wait()?;
		self.exit_status = status;
		Ok(status)
	}

	async fn fail(&mut self, phase: ExitPhase, status: ExitStatus) -> ExportError {
		self.output.drain(OUTPUT_DRAIN_LIMIT).await;
		let diagnostics = self.output.diagnostics();
		self.state = ExportState::Failed;
		error!(
			target = "snapview.export",
			socket = %self.endpoint.path().display(),
			%status,
			%phase,
			diagnostics = %diagnostics,
			"export process exited"
		);
		ExportError::Exited {
			phase,
			status: status.to_string(),
			diagnostics,
		}
	}

	async fn terminate(&mut self, child: &mut Child) {
		let signalled = match child.id() {
			Some(pid) => match process::request_termination(pid) {
				Ok(()) => true,
				Err(err) => {
					debug!(target = "snapview.export", pid, error = %err, "graceful termination unavailable");
					false
				}
			},
			None => false,
		};

		if signalled {
			match tokio::time::timeout(self.options.shutdown_grace, child.wait()).await {
				Ok(Ok(status)) => {
					self.exit_status = Some(status);
					return;
				}
				Ok(Err(err)) => debug!(target = "snapview.export", error = %err, "waiting for export process failed"),
				Err(_) => warn!(
					target = "snapview.export",
					grace = ?self.options.shutdown_grace,
					"export process ignored termination; killing"
				),
			}
		}

		match child.kill().await {
			Ok(()) => self.exit_status = child.try_wait().ok().flatten(),
			Err(err) => warn!(target = "snapview.export", error = %err, "failed to kill export process"),
		}
	}
}

impl Drop for ExportSession {
	fn drop(&mut self) {
		if self.state == ExportState::Closed {
			return;
		}
		if let Some(child) = self.child.as_mut() {
			if let Err(err) = child.start_kill() {
				debug!(target = "snapview.export", error = %err, "kill on drop failed");
			}
		}
		if let Err(err) = self.endpoint.remove() {
			debug!(target = "snapview.export", error = %err, "socket removal on drop failed");
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn secret_arguments_are_masked_for_display_only() {
		let cmd = ExportCommand::new("nbdkit")
			.args(["-r", "vddk"])
			.secret_arg("password", "hunter2")
			.arg("user=admin");

		assert_eq!(cmd.argv(), vec!["-r", "vddk", "password=hunter2", "user=admin"]);
		assert_eq!(cmd.display_args(), vec!["-r", "vddk", "password=***", "user=admin"]);
	}

	#[test]
	fn default_options_match_documented_timings() {
		let options = SupervisorOptions::default();
		assert_eq!(options.startup_grace, Duration::from_secs(2));
		assert_eq!(options.poll_interval, Duration::from_millis(500));
		assert_eq!(options.shutdown_grace, Duration::from_secs(5));
	}
}
