//! Snapshot tree as reported by the `snapshot` property of a virtual machine.

use serde::{Deserialize, Serialize};

use crate::moref::ManagedObjectReference;

/// `VirtualMachine.snapshot`; absent (`null`) when the VM has no snapshots.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VirtualMachineSnapshotInfo {
	pub current_snapshot: Option<ManagedObjectReference>,
	#[serde(default)]
	pub root_snapshot_list: Vec<VirtualMachineSnapshotTree>,
}

/// One node of the snapshot tree.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VirtualMachineSnapshotTree {
	pub snapshot: ManagedObjectReference,
	pub name: String,
	#[serde(default)]
	pub description: Option<String>,
	#[serde(default)]
	pub create_time: Option<String>,
	#[serde(default)]
	pub state: Option<String>,
	#[serde(default)]
	pub quiesced: Option<bool>,
	#[serde(default)]
	pub child_snapshot_list: Vec<VirtualMachineSnapshotTree>,
}

/// Body of `VirtualMachine.CreateSnapshot_Task`.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateSnapshotRequest<'a> {
	pub name: &'a str,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub description: Option<&'a str>,
	pub memory: bool,
	pub quiesce: bool,
}

#[cfg(test)]
mod tests {
	use serde_json::json;

	use super::*;

	#[test]
	fn parses_nested_tree() {
		let info: VirtualMachineSnapshotInfo = serde_json::from_value(json!({
			"currentSnapshot": {"type": "VirtualMachineSnapshot", "value": "snapshot-3"},
			"rootSnapshotList": [{
				"snapshot": {"type": "VirtualMachineSnapshot", "value": "snapshot-1"},
				"name": "A",
				"childSnapshotList": [{
					"snapshot": {"type": "VirtualMachineSnapshot", "value": "snapshot-2"},
					"name": "B"
				}]
			}]
		}))
		.unwrap();

		assert_eq!(info.root_snapshot_list.len(), 1);
		assert_eq!(info.root_snapshot_list[0].child_snapshot_list[0].name, "B");
		assert!(info.root_snapshot_list[0].child_snapshot_list[0].child_snapshot_list.is_empty());
	}
}
