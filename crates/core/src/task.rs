//! Remote task completion polling.

use std::time::Duration;

use serde_json::Value;
use snapview_protocol::{ManagedObjectReference, TaskInfo, TaskState};
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

use crate::api::ManagementApi;
use crate::error::{Error, Result};
use crate::wait;

/// How a task is waited for.
#[derive(Debug, Clone, Copy)]
pub struct TaskWait {
	pub poll_interval: Duration,
	/// `None` waits as long as the task runs.
	pub timeout: Option<Duration>,
}

impl Default for TaskWait {
	fn default() -> Self {
		Self {
			poll_interval: Duration::from_secs(1),
			timeout: None,
		}
	}
}

/// Parses the task reference returned by a `*_Task` method.
pub fn task_reference(value: &Value, method: &str) -> Result<ManagedObjectReference> {
	ManagedObjectReference::from_value(value)
		.filter(|task| task.is_kind(snapview_protocol::kinds::TASK))
		.ok_or_else(|| Error::Protocol(format!("{method} did not return a task reference")))
}

/// Polls `task.info` until the task succeeds or fails. Returns the task result
/// on success; a failed task surfaces the remote message verbatim.
pub async fn wait_for_task(api: &dyn ManagementApi, task: &ManagedObjectReference, options: TaskWait, cancel: &CancellationToken) -> Result<Option<Value>> {
	let operation = format!("waiting for task {}", task.value);
	let poll = poll_task(api, task, options.poll_interval, cancel, &operation);
	wait::cancellable(cancel, &operation, wait::with_deadline(options.timeout, &operation, poll)).await
}

async fn poll_task(
	api: &dyn ManagementApi,
	task: &ManagedObjectReference,
	interval: Duration,
	cancel: &CancellationToken,
	operation: &str,
) -> Result<Option<Value>> {
	loop {
		let raw = api.property(task, "info").await?;
		let info: TaskInfo = serde_json::from_value(raw).map_err(|err| Error::Protocol(format!("{task}.info: {err}")))?;
		match info.state {
			TaskState::Success => {
				debug!(target = "snapview.lifecycle", task = %task.value, "task succeeded");
				return Ok(info.result.filter(|result| !result.is_null()));
			}
			TaskState::Error => {
				let message = info.error.map(|fault| fault.describe()).unwrap_or_else(|| "task reported an error".to_string());
				return Err(Error::TaskFailed {
					task: task.value.clone(),
					message,
				});
			}
			TaskState::Queued | TaskState::Running => {
				trace!(target = "snapview.lifecycle", task = %task.value, state = ?info.state, progress = ?info.progress, "task pending");
			}
		}
		wait::sleep(cancel, operation, interval).await?;
	}
}

#[cfg(test)]
mod tests {
	use serde_json::json;

	use super::*;

	#[test]
	fn task_reference_requires_task_kind() {
		let ok = task_reference(&json!({"_typeName": "ManagedObjectReference", "type": "Task", "value": "task-9"}), "Destroy_Task").unwrap();
		assert_eq!(ok.value, "task-9");
		assert!(task_reference(&json!({"type": "VirtualMachine", "value": "vm-1"}), "Destroy_Task").is_err());
		assert!(task_reference(&Value::Null, "Destroy_Task").is_err());
	}
}
