//! Managed object references.

use std::fmt;

use serde::{Deserialize, Serialize};

const MOREF_TYPE_NAME: &str = "ManagedObjectReference";

fn moref_type_name() -> String {
	MOREF_TYPE_NAME.to_string()
}

/// Stable reference to an object on the management plane, e.g. `VirtualMachine:vm-42`.
///
/// ```json
/// { "_typeName": "ManagedObjectReference", "type": "VirtualMachine", "value": "vm-42" }
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ManagedObjectReference {
	#[serde(rename = "_typeName", default = "moref_type_name")]
	type_name: String,
	/// Managed object type, e.g. `VirtualMachine`, `HostSystem`, `Folder`.
	#[serde(rename = "type")]
	pub kind: String,
	/// Opaque identifier assigned by the management plane, e.g. `vm-42`.
	pub value: String,
}

impl ManagedObjectReference {
	pub fn new(kind: impl Into<String>, value: impl Into<String>) -> Self {
		Self {
			type_name: moref_type_name(),
			kind: kind.into(),
			value: value.into(),
		}
	}

	pub fn is_kind(&self, kind: &str) -> bool {
		self.kind == kind
	}

	/// Parses an object reference from a JSON value, returning `None` for `null`
	/// or anything that does not carry `type` and `value`.
	pub fn from_value(value: &serde_json::Value) -> Option<Self> {
		if value.is_null() {
			return None;
		}
		serde_json::from_value(value.clone()).ok()
	}

	/// Parses an array of object references, skipping malformed entries.
	pub fn list_from_value(value: &serde_json::Value) -> Vec<Self> {
		value
			.as_array()
			.map(|items| items.iter().filter_map(Self::from_value).collect())
			.unwrap_or_default()
	}
}

impl fmt::Display for ManagedObjectReference {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "{}:{}", self.kind, self.value)
	}
}

/// Well-known managed object types used by inventory walking.
pub mod kinds {
	pub const FOLDER: &str = "Folder";
	pub const DATACENTER: &str = "Datacenter";
	pub const VIRTUAL_MACHINE: &str = "VirtualMachine";
	pub const VIRTUAL_APP: &str = "VirtualApp";
	pub const HOST_SYSTEM: &str = "HostSystem";
	pub const CLUSTER_COMPUTE_RESOURCE: &str = "ClusterComputeResource";
	pub const COMPUTE_RESOURCE: &str = "ComputeResource";
	pub const TASK: &str = "Task";
	pub const VIRTUAL_MACHINE_SNAPSHOT: &str = "VirtualMachineSnapshot";
}

/// Subset of `ServiceContent` needed to bootstrap a session.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceContent {
	pub root_folder: ManagedObjectReference,
	pub session_manager: Option<ManagedObjectReference>,
	pub search_index: Option<ManagedObjectReference>,
	pub about: Option<AboutInfo>,
}

/// Product information reported by the endpoint.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AboutInfo {
	pub full_name: Option<String>,
	pub api_version: Option<String>,
	pub instance_uuid: Option<String>,
}
