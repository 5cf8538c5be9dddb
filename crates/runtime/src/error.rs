use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

pub type Result<T> = std::result::Result<T, ExportError>;

/// Failures of an export session before or while becoming ready.
#[derive(Debug, Error)]
pub enum ExportError {
	#[error("failed to start {program}: {source}")]
	Spawn {
		program: String,
		#[source]
		source: std::io::Error,
	},

	#[error("export process exited {phase} ({status}){}", render_diagnostics(.diagnostics))]
	Exited { phase: ExitPhase, status: String, diagnostics: String },

	#[error("export endpoint {} not ready after {timeout:?} (process still running){}", .endpoint.display(), render_diagnostics(.diagnostics))]
	NotReady {
		endpoint: PathBuf,
		timeout: Duration,
		diagnostics: String,
	},

	#[error("waiting for export readiness was cancelled")]
	Cancelled,

	#[error("export session is already closed")]
	Closed,

	#[error(transparent)]
	Io(#[from] std::io::Error),
}

impl ExportError {
	/// Captured process output carried by the error, if any.
	pub fn diagnostics(&self) -> Option<&str> {
		match self {
			ExportError::Exited { diagnostics, .. } | ExportError::NotReady { diagnostics, .. } if !diagnostics.is_empty() => Some(diagnostics.as_str()),
			_ => None,
		}
	}

	pub fn is_timeout(&self) -> bool {
		matches!(self, ExportError::NotReady { .. })
	}
}

/// When the process was found dead.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitPhase {
	/// During the startup grace check inside `open`.
	Immediately,
	/// While polling for the endpoint.
	BeforeReady,
}

impl std::fmt::Display for ExitPhase {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		match self {
			ExitPhase::Immediately => write!(f, "immediately"),
			ExitPhase::BeforeReady => write!(f, "before the endpoint became ready"),
		}
	}
}

fn render_diagnostics(diagnostics: &str) -> String {
	if diagnostics.is_empty() {
		String::new()
	} else {
		format!(": {diagnostics}")
	}
}
