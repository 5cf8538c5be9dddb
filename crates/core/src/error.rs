use std::time::Duration;

use snapview_runtime::ExportError;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

/// Errors produced by session management, resolution, lifecycle and export glue.
#[derive(Debug, Error)]
pub enum Error {
	#[error("invalid configuration: {0}")]
	Config(String),

	#[error("failed to read config {path}: {message}")]
	ConfigFile { path: String, message: String },

	#[error("cannot reach {target}: {message}")]
	Connection { target: String, message: String },

	#[error("authentication failed: {0}")]
	Authentication(String),

	#[error("login failed after {attempts} attempt(s): {source}")]
	LoginExhausted {
		attempts: u32,
		#[source]
		source: Box<Error>,
	},

	#[error("session could not be verified after login: {source}")]
	SessionVerification {
		#[source]
		source: Box<Error>,
	},

	#[error("{kind} '{name}' not found")]
	NotFound { kind: &'static str, name: String },

	#[error("virtual machine '{vm}' has no snapshots")]
	NoSnapshots { vm: String },

	#[error("incomplete disk information for '{vm}': {reason}")]
	ResolutionIncomplete { vm: String, reason: String },

	#[error(transparent)]
	Export(#[from] ExportError),

	#[error("{operation} timed out after {after:?}")]
	Timeout { operation: String, after: Duration },

	#[error("{operation} was cancelled")]
	Cancelled { operation: String },

	#[error("task {task} failed: {message}")]
	TaskFailed { task: String, message: String },

	#[error("remote fault {fault}: {message}")]
	Remote { fault: String, message: String },

	#[error("unexpected response: {0}")]
	Protocol(String),

	#[error("{context}: {source}")]
	Context {
		context: String,
		#[source]
		source: Box<Error>,
	},
}

/// Coarse classification used for exit codes and structured output.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
	Config,
	Connection,
	Authentication,
	NotFound,
	ResolutionIncomplete,
	ExportProcess,
	Timeout,
	Cancelled,
	TaskFailed,
	Remote,
	Internal,
}

impl ErrorKind {
	pub fn code(self) -> &'static str {
		match self {
			ErrorKind::Config => "CONFIG",
			ErrorKind::Connection => "CONNECTION",
			ErrorKind::Authentication => "AUTHENTICATION",
			ErrorKind::NotFound => "NOT_FOUND",
			ErrorKind::ResolutionIncomplete => "RESOLUTION_INCOMPLETE",
			ErrorKind::ExportProcess => "EXPORT_PROCESS",
			ErrorKind::Timeout => "TIMEOUT",
			ErrorKind::Cancelled => "CANCELLED",
			ErrorKind::TaskFailed => "TASK_FAILED",
			ErrorKind::Remote => "REMOTE",
			ErrorKind::Internal => "INTERNAL",
		}
	}
}

impl Error {
	/// Classifies the error, looking through context and retry wrappers.
	pub fn kind(&self) -> ErrorKind {
		match self {
			Error::Config(_) | Error::ConfigFile { .. } => ErrorKind::Config,
			Error::Connection { .. } => ErrorKind::Connection,
			Error::Authentication(_) | Error::SessionVerification { .. } => ErrorKind::Authentication,
			Error::LoginExhausted { source, .. } => match source.kind() {
				ErrorKind::Connection | ErrorKind::Timeout => ErrorKind::Connection,
				_ => ErrorKind::Authentication,
			},
			Error::NotFound { .. } | Error::NoSnapshots { .. } => ErrorKind::NotFound,
			Error::ResolutionIncomplete { .. } => ErrorKind::ResolutionIncomplete,
			Error::Export(err) => match err {
				ExportError::Cancelled => ErrorKind::Cancelled,
				ExportError::NotReady { .. } => ErrorKind::Timeout,
				_ => ErrorKind::ExportProcess,
			},
			Error::Timeout { .. } => ErrorKind::Timeout,
			Error::Cancelled { .. } => ErrorKind::Cancelled,
			Error::TaskFailed { .. } => ErrorKind::TaskFailed,
			Error::Remote { .. } => ErrorKind::Remote,
			Error::Protocol(_) => ErrorKind::Internal,
			Error::Context { source, .. } => source.kind(),
		}
	}

	pub fn is_cancelled(&self) -> bool {
		self.kind() == ErrorKind::Cancelled
	}

	pub fn is_not_found(&self) -> bool {
		self.kind() == ErrorKind::NotFound
	}

	pub fn not_found(kind: &'static str, name: impl Into<String>) -> Self {
		Error::NotFound { kind, name: name.into() }
	}

	pub fn cancelled(operation: impl Into<String>) -> Self {
		Error::Cancelled {
			operation: operation.into(),
		}
	}

	/// Innermost error beneath context wrappers.
	pub fn root(&self) -> &Error {
		match self {
			Error::Context { source, .. } => source.root(),
			other => other,
		}
	}
}

/// Attaches operation/target context to errors.
pub trait ResultExt<T> {
	fn context(self, context: impl Into<String>) -> Result<T>;

	fn with_context<F>(self, f: F) -> Result<T>
	where
		F: FnOnce() -> String;
}

impl<T> ResultExt<T> for Result<T> {
	fn context(self, context: impl Into<String>) -> Result<T> {
		self.map_err(|source| Error::Context {
			context: context.into(),
			source: Box::new(source),
		})
	}

	fn with_context<F>(self, f: F) -> Result<T>
	where
		F: FnOnce() -> String,
	{
		self.map_err(|source| Error::Context {
			context: f(),
			source: Box::new(source),
		})
	}
}
