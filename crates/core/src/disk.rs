//! Snapshot disk records and path helpers.

use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

/// `<base>-NNNNNN.vmdk`, the naming of a delta disk layered over `<base>.vmdk`.
/// ASCII digits only; `\d` would also accept other Unicode digits.
static DELTA_DISK: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^(.*)-[0-9]{6}(\.vmdk)$").expect("DELTA_DISK should compile"));

/// Everything needed to address the point-in-time disks of one VM snapshot.
///
/// `disk_paths[i]` and `base_disk_paths[i]` describe the same virtual disk.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SnapshotDiskInfo {
	pub vm_id: String,
	/// Empty for a VM resolved without a snapshot (e.g. a linked clone).
	#[serde(default)]
	pub snapshot_id: String,
	pub disk_paths: Vec<String>,
	pub base_disk_paths: Vec<String>,
	pub compute_resource_path: String,
}

impl SnapshotDiskInfo {
	pub fn disk_count(&self) -> usize {
		self.disk_paths.len()
	}

	/// `(current, base)` pair of the disk at `index`.
	pub fn disk(&self, index: usize) -> Option<(&str, &str)> {
		Some((self.disk_paths.get(index)?.as_str(), self.base_disk_paths.get(index)?.as_str()))
	}

	/// `vpx://<user>@<host><compute path>?<ssl>` connection URI for libvirt
	/// based tooling. The user is escaped as a query value (`@` becomes `%40`).
	pub fn libvirt_uri(&self, host: &str, username: &str, ssl_option: &str) -> String {
		let user: String = url::form_urlencoded::byte_serialize(username.as_bytes()).collect();
		if ssl_option.is_empty() {
			format!("vpx://{user}@{host}{}", self.compute_resource_path)
		} else {
			format!("vpx://{user}@{host}{}?{ssl_option}", self.compute_resource_path)
		}
	}
}

/// Base disk of a delta disk path: `[ds] vm/vm-000002.vmdk` becomes
/// `[ds] vm/vm.vmdk`. Anything else is returned unchanged.
pub fn derive_base_disk_path(path: &str) -> String {
	match DELTA_DISK.captures(path) {
		Some(caps) => format!("{}{}", &caps[1], &caps[2]),
		None => path.to_string(),
	}
}

/// Datastore name of a `[datastore] path` string.
pub fn datastore_of(path: &str) -> Option<&str> {
	let rest = path.strip_prefix('[')?;
	let end = rest.find(']')?;
	Some(&rest[..end])
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn strips_six_digit_delta_suffix_only() {
		assert_eq!(derive_base_disk_path("[ds] vm/vm-000002.vmdk"), "[ds] vm/vm.vmdk");
		assert_eq!(derive_base_disk_path("[ds] vm/vm.vmdk"), "[ds] vm/vm.vmdk");
		assert_eq!(derive_base_disk_path("[ds] vm/vm-12.vmdk"), "[ds] vm/vm-12.vmdk");
		assert_eq!(derive_base_disk_path("[ds] vm/vm-0000002.vmdk"), "[ds] vm/vm-0000002.vmdk");
		assert_eq!(derive_base_disk_path("[ds] vm/vm-000002.vmdk.bak"), "[ds] vm/vm-000002.vmdk.bak");
		assert_eq!(derive_base_disk_path("[ds] vm/vm-000002xvmdk"), "[ds] vm/vm-000002xvmdk");
		assert_eq!(derive_base_disk_path("[ds] vm/vm-٠٠٠٠٠٢.vmdk"), "[ds] vm/vm-٠٠٠٠٠٢.vmdk");
	}

	#[test]
	fn libvirt_uri_escapes_user() {
		let info = SnapshotDiskInfo {
			vm_id: "vm-42".into(),
			snapshot_id: "snapshot-7".into(),
			disk_paths: vec!["[ds1] web01/web01-000004.vmdk".into()],
			base_disk_paths: vec!["[ds1] web01/web01.vmdk".into()],
			compute_resource_path: "/dc1/host/cluster1/esx01".into(),
		};
		assert_eq!(
			info.libvirt_uri("vc.example.com", "administrator@vsphere.local", "no_verify=1"),
			"vpx://administrator%40vsphere.local@vc.example.com/dc1/host/cluster1/esx01?no_verify=1"
		);
		assert_eq!(info.disk(0), Some(("[ds1] web01/web01-000004.vmdk", "[ds1] web01/web01.vmdk")));
		assert_eq!(info.disk(1), None);
	}

	#[test]
	fn datastore_is_bracketed_prefix() {
		assert_eq!(datastore_of("[ds1] web01/web01.vmdk"), Some("ds1"));
		assert_eq!(datastore_of("web01.vmdk"), None);
	}
}
