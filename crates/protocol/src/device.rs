//! Virtual hardware devices and disk backings.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// `_typeName` of a virtual disk device.
pub const VIRTUAL_DISK: &str = "VirtualDisk";

/// Disk backing types that carry a `fileName` and an optional `parent` chain.
pub const FILE_BACKED_DISK_BACKINGS: &[&str] = &[
	"VirtualDiskFlatVer2BackingInfo",
	"VirtualDiskSeSparseBackingInfo",
	"VirtualDiskSparseVer2BackingInfo",
];

/// Ethernet card `_typeName`s and the adapter type reported for each.
pub const ETHERNET_CARDS: &[(&str, &str)] = &[
	("VirtualE1000", "E1000"),
	("VirtualE1000e", "E1000e"),
	("VirtualVmxnet3", "VMXNET3"),
];

/// Subset of `VirtualMachine.config`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct VirtualMachineConfigInfo {
	pub name: Option<String>,
	pub uuid: Option<String>,
	pub instance_uuid: Option<String>,
	pub guest_full_name: Option<String>,
	pub guest_id: Option<String>,
	pub annotation: Option<String>,
	pub version: Option<String>,
	pub firmware: Option<String>,
	pub template: bool,
	pub hardware: VirtualHardware,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct VirtualHardware {
	#[serde(rename = "numCPU")]
	pub num_cpu: Option<i32>,
	pub num_cores_per_socket: Option<i32>,
	#[serde(rename = "memoryMB")]
	pub memory_mb: Option<i32>,
	pub device: Vec<VirtualDevice>,
}

/// One hardware device; the backing is kept raw because its shape depends on `_typeName`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct VirtualDevice {
	#[serde(rename = "_typeName")]
	pub type_name: String,
	pub key: i32,
	pub device_info: Option<Description>,
	pub backing: Option<Value>,
	pub controller_key: Option<i32>,
	/// Disks only.
	#[serde(rename = "capacityInKB")]
	pub capacity_in_kb: Option<i64>,
	/// Ethernet cards only.
	pub mac_address: Option<String>,
	pub connectable: Option<Connectable>,
}

impl VirtualDevice {
	pub fn is_disk(&self) -> bool {
		self.type_name == VIRTUAL_DISK
	}

	pub fn label(&self) -> Option<&str> {
		self.device_info.as_ref().map(|info| info.label.as_str())
	}

	/// Returns the file backing when the backing type is one we know how to address.
	pub fn file_backing(&self) -> Option<DiskFileBacking> {
		let backing = self.backing.as_ref()?;
		let parsed: DiskFileBacking = serde_json::from_value(backing.clone()).ok()?;
		FILE_BACKED_DISK_BACKINGS
			.contains(&parsed.type_name.as_str())
			.then_some(parsed)
	}

	/// `_typeName` of the backing, for diagnostics.
	pub fn backing_type(&self) -> Option<&str> {
		self.backing.as_ref()?.get("_typeName")?.as_str()
	}

	/// Adapter type for the ethernet cards in [`ETHERNET_CARDS`].
	pub fn ethernet_adapter_type(&self) -> Option<&'static str> {
		ETHERNET_CARDS
			.iter()
			.find(|(type_name, _)| *type_name == self.type_name)
			.map(|(_, adapter)| *adapter)
	}

	/// Network name of a standard-network ethernet backing.
	pub fn network_name(&self) -> Option<&str> {
		self.backing.as_ref()?.get("deviceName")?.as_str()
	}

	pub fn is_connected(&self) -> bool {
		self.connectable.as_ref().is_some_and(|c| c.connected)
	}
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Connectable {
	pub connected: bool,
	pub start_connected: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Description {
	pub label: String,
	pub summary: String,
}

/// File-based disk backing; `parent` points at the disk this delta was layered over.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct DiskFileBacking {
	#[serde(rename = "_typeName")]
	pub type_name: String,
	pub file_name: String,
	pub disk_mode: Option<String>,
	pub thin_provisioned: Option<bool>,
	pub parent: Option<Box<DiskFileBacking>>,
}

impl DiskFileBacking {
	/// Parent file name, if the backing records a non-empty one.
	pub fn parent_file(&self) -> Option<&str> {
		self.parent
			.as_deref()
			.map(|parent| parent.file_name.as_str())
			.filter(|name| !name.is_empty())
	}
}

/// Subset of `VirtualMachine.runtime`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct VirtualMachineRuntimeInfo {
	pub host: Option<crate::ManagedObjectReference>,
	pub power_state: Option<String>,
}

impl VirtualMachineRuntimeInfo {
	pub fn is_powered_on(&self) -> bool {
		self.power_state.as_deref() == Some("poweredOn")
	}
}

/// Subset of `VirtualMachine.guest`, as reported by the guest tools.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct GuestInfo {
	pub tools_status: Option<String>,
	pub tools_version: Option<String>,
	pub host_name: Option<String>,
	pub guest_state: Option<String>,
	pub net: Vec<GuestNicInfo>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct GuestNicInfo {
	pub mac_address: Option<String>,
	pub ip_address: Vec<String>,
}

impl GuestInfo {
	/// Addresses the guest reports for the NIC with `mac`.
	pub fn addresses_of(&self, mac: &str) -> Vec<String> {
		self.net
			.iter()
			.filter(|nic| nic.mac_address.as_deref().is_some_and(|m| m.eq_ignore_ascii_case(mac)))
			.flat_map(|nic| nic.ip_address.iter().cloned())
			.collect()
	}
}

#[cfg(test)]
mod tests {
	use serde_json::json;

	use super::*;

	#[test]
	fn flat_backing_with_parent_is_recognised() {
		let device: VirtualDevice = serde_json::from_value(json!({
			"_typeName": "VirtualDisk",
			"key": 2000,
			"deviceInfo": {"label": "Hard disk 1", "summary": "16,777,216 KB"},
			"backing": {
				"_typeName": "VirtualDiskFlatVer2BackingInfo",
				"fileName": "[ds1] web01/web01-000001.vmdk",
				"parent": {"_typeName": "VirtualDiskFlatVer2BackingInfo", "fileName": "[ds1] web01/web01.vmdk"}
			}
		}))
		.unwrap();

		assert!(device.is_disk());
		assert_eq!(device.label(), Some("Hard disk 1"));
		let backing = device.file_backing().unwrap();
		assert_eq!(backing.file_name, "[ds1] web01/web01-000001.vmdk");
		assert_eq!(backing.parent_file(), Some("[ds1] web01/web01.vmdk"));
	}

	#[test]
	fn raw_device_mapping_is_not_file_backed() {
		let device: VirtualDevice = serde_json::from_value(json!({
			"_typeName": "VirtualDisk",
			"key": 2001,
			"backing": {"_typeName": "VirtualDiskRawDiskMappingVer1BackingInfo", "fileName": "[ds1] web01/rdm.vmdk"}
		}))
		.unwrap();

		assert!(device.file_backing().is_none());
		assert_eq!(device.backing_type(), Some("VirtualDiskRawDiskMappingVer1BackingInfo"));
	}

	#[test]
	fn vmxnet3_card_exposes_network_and_connection() {
		let device: VirtualDevice = serde_json::from_value(json!({
			"_typeName": "VirtualVmxnet3",
			"key": 4000,
			"deviceInfo": {"label": "Network adapter 1", "summary": "VM Network"},
			"backing": {"_typeName": "VirtualEthernetCardNetworkBackingInfo", "deviceName": "VM Network"},
			"macAddress": "00:50:56:aa:bb:cc",
			"connectable": {"connected": true, "startConnected": true}
		}))
		.unwrap();

		assert_eq!(device.ethernet_adapter_type(), Some("VMXNET3"));
		assert_eq!(device.network_name(), Some("VM Network"));
		assert!(device.is_connected());
		assert!(!device.is_disk());
	}

	#[test]
	fn hardware_uses_vim_field_names() {
		let config: VirtualMachineConfigInfo = serde_json::from_value(json!({
			"name": "web01",
			"guestId": "rhel9_64Guest",
			"hardware": {"numCPU": 4, "numCoresPerSocket": 2, "memoryMB": 8192, "device": []}
		}))
		.unwrap();
		assert_eq!(config.hardware.num_cpu, Some(4));
		assert_eq!(config.hardware.num_cores_per_socket, Some(2));
		assert_eq!(config.hardware.memory_mb, Some(8192));
		assert_eq!(config.guest_id.as_deref(), Some("rhel9_64Guest"));
	}

	#[test]
	fn guest_addresses_match_mac_case_insensitively() {
		let guest: GuestInfo = serde_json::from_value(json!({
			"net": [
				{"macAddress": "00:50:56:AA:BB:CC", "ipAddress": ["10.0.0.5", "fe80::1"]},
				{"macAddress": "00:50:56:00:00:01", "ipAddress": ["10.0.1.9"]}
			]
		}))
		.unwrap();
		assert_eq!(guest.addresses_of("00:50:56:aa:bb:cc"), vec!["10.0.0.5", "fe80::1"]);
		assert!(guest.addresses_of("00:50:56:ff:ff:ff").is_empty());
	}

	#[test]
	fn empty_parent_file_name_counts_as_absent() {
		let backing: DiskFileBacking = serde_json::from_value(json!({
			"_typeName": "VirtualDiskFlatVer2BackingInfo",
			"fileName": "[ds1] a/a.vmdk",
			"parent": {"fileName": ""}
		}))
		.unwrap();
		assert_eq!(backing.parent_file(), None);
	}
}
