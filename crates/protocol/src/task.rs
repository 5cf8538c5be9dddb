//! Task state as reported by `Task.info`.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::fault::LocalizedMethodFault;
use crate::moref::ManagedObjectReference;

/// Lifecycle state of a remote task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskState {
	Queued,
	Running,
	Success,
	Error,
}

impl TaskState {
	pub fn is_terminal(self) -> bool {
		matches!(self, TaskState::Success | TaskState::Error)
	}
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskInfo {
	#[serde(default)]
	pub key: String,
	pub task: Option<ManagedObjectReference>,
	pub state: TaskState,
	#[serde(default)]
	pub progress: Option<i32>,
	#[serde(default)]
	pub error: Option<LocalizedMethodFault>,
	#[serde(default)]
	pub result: Option<Value>,
	#[serde(default)]
	pub description_id: Option<String>,
}
