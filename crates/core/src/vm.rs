//! VM listing and detailed VM descriptions.

use serde::Serialize;
use snapview_protocol::{GuestInfo, VirtualDevice, VirtualMachineConfigInfo, VirtualMachineRuntimeInfo};

use crate::disk::datastore_of;
use crate::snapshot::SnapshotSummary;

/// Listing filter. Unset fields match everything.
#[derive(Debug, Clone, Default)]
pub struct VmFilter {
	/// Case-insensitive substring of the VM name.
	pub name: Option<String>,
	/// Power state such as `poweredOn`, compared case-insensitively.
	pub power_state: Option<String>,
}

impl VmFilter {
	pub fn matches(&self, vm: &VmSummary) -> bool {
		if let Some(state) = self.power_state.as_deref() {
			if !vm.power_state.as_deref().is_some_and(|s| s.eq_ignore_ascii_case(state)) {
				return false;
			}
		}
		if let Some(name) = self.name.as_deref() {
			if !vm.name.to_lowercase().contains(&name.to_lowercase()) {
				return false;
			}
		}
		true
	}
}

/// One row of a VM listing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VmSummary {
	pub id: String,
	pub name: String,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub uuid: Option<String>,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub power_state: Option<String>,
}

/// VMs of one data-center that passed a [`VmFilter`].
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VmListing {
	pub datacenter: String,
	pub vms: Vec<VmSummary>,
	pub total: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VmDisk {
	pub label: String,
	pub capacity_kb: Option<i64>,
	pub controller_key: Option<i32>,
	pub file_name: Option<String>,
	pub datastore: Option<String>,
	pub disk_mode: Option<String>,
	pub thin_provisioned: Option<bool>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VmNetworkAdapter {
	pub label: String,
	pub adapter_type: String,
	pub mac_address: Option<String>,
	pub network: Option<String>,
	pub connected: bool,
	pub ip_addresses: Vec<String>,
}

/// Configuration, placement, devices and snapshots of one VM.
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VmDetails {
	pub id: String,
	pub name: String,
	pub datacenter: String,
	pub uuid: Option<String>,
	pub instance_uuid: Option<String>,
	pub power_state: Option<String>,
	pub guest_full_name: Option<String>,
	pub guest_id: Option<String>,
	pub annotation: Option<String>,
	pub hardware_version: Option<String>,
	pub firmware: Option<String>,
	pub template: bool,
	pub num_cpu: Option<i32>,
	pub num_cores_per_socket: Option<i32>,
	pub memory_mb: Option<i32>,
	/// Name of the host the VM is placed on.
	pub host: Option<String>,
	pub guest_hostname: Option<String>,
	pub tools_status: Option<String>,
	pub disks: Vec<VmDisk>,
	pub datastores: Vec<String>,
	pub network_adapters: Vec<VmNetworkAdapter>,
	pub snapshots: Vec<SnapshotSummary>,
	pub current_snapshot: Option<String>,
}

impl VmDetails {
	/// Fills the configuration-derived fields; identity, placement and
	/// snapshots are left to the caller.
	pub fn from_properties(config: &VirtualMachineConfigInfo, runtime: &VirtualMachineRuntimeInfo, guest: &GuestInfo) -> Self {
		let disks = disks(&config.hardware.device);
		let mut datastores: Vec<String> = Vec::new();
		for store in disks.iter().filter_map(|disk| disk.datastore.as_ref()) {
			if !datastores.contains(store) {
				datastores.push(store.clone());
			}
		}

		Self {
			uuid: config.uuid.clone(),
			instance_uuid: config.instance_uuid.clone(),
			power_state: runtime.power_state.clone(),
			guest_full_name: config.guest_full_name.clone(),
			guest_id: config.guest_id.clone(),
			annotation: config.annotation.clone().filter(|a| !a.is_empty()),
			hardware_version: config.version.clone(),
			firmware: config.firmware.clone(),
			template: config.template,
			num_cpu: config.hardware.num_cpu,
			num_cores_per_socket: config.hardware.num_cores_per_socket,
			memory_mb: config.hardware.memory_mb,
			guest_hostname: guest.host_name.clone(),
			tools_status: guest.tools_status.clone(),
			network_adapters: network_adapters(&config.hardware.device, guest),
			datastores,
			disks,
			..Self::default()
		}
	}
}

/// Every `VirtualDisk`, whatever its backing; file details are filled for
/// file-backed disks only.
pub fn disks(devices: &[VirtualDevice]) -> Vec<VmDisk> {
	devices
		.iter()
		.filter(|device| device.is_disk())
		.map(|device| {
			let mut disk = VmDisk {
				label: device.label().unwrap_or_default().to_string(),
				capacity_kb: device.capacity_in_kb,
				controller_key: device.controller_key,
				..VmDisk::default()
			};
			if let Some(backing) = device.file_backing() {
				disk.datastore = datastore_of(&backing.file_name).map(str::to_string);
				disk.disk_mode = backing.disk_mode;
				disk.thin_provisioned = backing.thin_provisioned;
				disk.file_name = Some(backing.file_name);
			}
			disk
		})
		.collect()
}

/// E1000, E1000e and VMXNET3 cards, with the guest-reported addresses of
/// each card's MAC.
pub fn network_adapters(devices: &[VirtualDevice], guest: &GuestInfo) -> Vec<VmNetworkAdapter> {
	devices
		.iter()
		.filter_map(|device| {
			let adapter_type = device.ethernet_adapter_type()?;
			let ip_addresses = device.mac_address.as_deref().map(|mac| guest.addresses_of(mac)).unwrap_or_default();
			Some(VmNetworkAdapter {
				label: device.label().unwrap_or_default().to_string(),
				adapter_type: adapter_type.to_string(),
				mac_address: device.mac_address.clone(),
				network: device.network_name().map(str::to_string),
				connected: device.is_connected(),
				ip_addresses,
			})
		})
		.collect()
}

#[cfg(test)]
mod tests {
	use serde_json::json;

	use super::*;

	fn summary(name: &str, power_state: &str) -> VmSummary {
		VmSummary {
			id: "vm-1".into(),
			name: name.into(),
			uuid: None,
			power_state: Some(power_state.into()),
		}
	}

	#[test]
	fn filter_matches_name_substring_and_power_state() {
		let vm = summary("Web01-Prod", "poweredOn");
		assert!(VmFilter::default().matches(&vm));
		assert!(
			VmFilter {
				name: Some("web01".into()),
				power_state: Some("POWEREDON".into()),
			}
			.matches(&vm)
		);
		assert!(
			!VmFilter {
				power_state: Some("poweredOff".into()),
				..VmFilter::default()
			}
			.matches(&vm)
		);
		assert!(
			!VmFilter {
				name: Some("db".into()),
				..VmFilter::default()
			}
			.matches(&vm)
		);
	}

	#[test]
	fn details_collect_disks_datastores_and_nics() {
		let config: VirtualMachineConfigInfo = serde_json::from_value(json!({
			"uuid": "4203-aa",
			"guestFullName": "Red Hat Enterprise Linux 9 (64-bit)",
			"annotation": "",
			"version": "vmx-19",
			"hardware": { "numCPU": 2, "memoryMB": 4096, "device": [
				{ "_typeName": "VirtualDisk", "key": 2000, "controllerKey": 1000, "capacityInKB": 16777216,
				  "deviceInfo": { "label": "Hard disk 1", "summary": "" },
				  "backing": { "_typeName": "VirtualDiskFlatVer2BackingInfo", "fileName": "[ds1] web01/web01.vmdk",
				               "diskMode": "persistent", "thinProvisioned": true } },
				{ "_typeName": "VirtualDisk", "key": 2001, "controllerKey": 1000,
				  "deviceInfo": { "label": "Hard disk 2", "summary": "" },
				  "backing": { "_typeName": "VirtualDiskRawDiskMappingVer1BackingInfo", "fileName": "[ds2] web01/rdm.vmdk" } },
				{ "_typeName": "VirtualDisk", "key": 2002, "controllerKey": 1000,
				  "deviceInfo": { "label": "Hard disk 3", "summary": "" },
				  "backing": { "_typeName": "VirtualDiskSeSparseBackingInfo", "fileName": "[ds1] web01/data.vmdk" } },
				{ "_typeName": "VirtualE1000e", "key": 4000, "macAddress": "00:50:56:00:00:01",
				  "deviceInfo": { "label": "Network adapter 1", "summary": "" },
				  "backing": { "_typeName": "VirtualEthernetCardNetworkBackingInfo", "deviceName": "VM Network" },
				  "connectable": { "connected": false } },
				{ "_typeName": "VirtualPCIPassthrough", "key": 5000 }
			]}
		}))
		.unwrap();
		let runtime = VirtualMachineRuntimeInfo {
			power_state: Some("poweredOn".into()),
			..VirtualMachineRuntimeInfo::default()
		};
		let guest: GuestInfo = serde_json::from_value(json!({
			"hostName": "web01.internal",
			"net": [{ "macAddress": "00:50:56:00:00:01", "ipAddress": ["10.0.0.5"] }]
		}))
		.unwrap();

		let details = VmDetails::from_properties(&config, &runtime, &guest);

		assert_eq!(details.power_state.as_deref(), Some("poweredOn"));
		assert_eq!(details.annotation, None);
		assert_eq!(details.num_cpu, Some(2));
		assert_eq!(details.disks.len(), 3);
		assert_eq!(details.disks[0].capacity_kb, Some(16777216));
		assert_eq!(details.disks[0].thin_provisioned, Some(true));
		assert_eq!(details.disks[1].file_name, None);
		assert_eq!(details.datastores, vec!["ds1"]);
		assert_eq!(details.network_adapters.len(), 1);
		let nic = &details.network_adapters[0];
		assert_eq!(nic.adapter_type, "E1000e");
		assert_eq!(nic.network.as_deref(), Some("VM Network"));
		assert!(!nic.connected);
		assert_eq!(nic.ip_addresses, vec!["10.0.0.5"]);
		assert_eq!(details.guest_hostname.as_deref(), Some("web01.internal"));
	}
}
