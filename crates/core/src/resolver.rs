//! VM, snapshot and disk resolution.
//!
//! Lookups are read-only and never retried here. Each public operation takes
//! one connection from the [`SessionManager`] and uses it for its duration.

use std::sync::Arc;

use serde_json::Value;
use snapview_protocol::{GuestInfo, ManagedObjectReference, VirtualMachineConfigInfo, VirtualMachineRuntimeInfo, VirtualMachineSnapshotInfo, kinds};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::api::{self, ManagementApi};
use crate::disk::{SnapshotDiskInfo, derive_base_disk_path};
use crate::error::{Error, Result};
use crate::inventory::{self, Datacenter};
use crate::session::{Connection, SessionManager};
use crate::snapshot::{SnapshotNode, SnapshotSummary, find_snapshot, flatten};
use crate::vm::{VmDetails, VmFilter, VmListing, VmSummary};
use crate::wait;

/// A located virtual machine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VmHandle {
	pub reference: ManagedObjectReference,
	pub name: String,
	pub datacenter: Datacenter,
}

impl VmHandle {
	pub fn id(&self) -> &str {
		&self.reference.value
	}
}

/// A VM together with one of its snapshots.
#[derive(Debug, Clone)]
pub struct ResolvedSnapshot {
	pub vm: VmHandle,
	pub snapshot: SnapshotNode,
}

/// Disk paths of a VM as currently configured.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DiskPaths {
	pub current: Vec<String>,
	pub base: Vec<String>,
}

pub struct DiskResolver {
	session: Arc<SessionManager>,
}

impl DiskResolver {
	pub fn new(session: Arc<SessionManager>) -> Self {
		Self { session }
	}

	pub fn session(&self) -> &Arc<SessionManager> {
		&self.session
	}

	/// Locates a VM by exact name inside the default data-center.
	pub async fn find_vm_by_name(&self, name: &str, cancel: &CancellationToken) -> Result<VmHandle> {
		let conn = self.session.connection(cancel).await?;
		wait::cancellable(cancel, "vm lookup", self.locate_vm(&conn, name)).await
	}

	/// Locates a VM by BIOS UUID through the search index.
	pub async fn find_vm_by_uuid(&self, uuid: &str, cancel: &CancellationToken) -> Result<VmHandle> {
		let conn = self.session.connection(cancel).await?;
		wait::cancellable(cancel, "vm lookup", async {
			let api = conn.api();
			let datacenter = inventory::default_datacenter(api, self.session.config().datacenter.as_deref()).await?;
			let reference = api
				.find_by_uuid(Some(&datacenter.reference), uuid)
				.await?
				.ok_or_else(|| Error::not_found("virtual machine", uuid))?;
			let name = api::object_name(api, &reference).await?;
			Ok::<_, Error>(VmHandle {
				reference,
				name,
				datacenter,
			})
		})
		.await
	}

	/// VMs of the default data-center that pass `filter`.
	pub async fn list_vms(&self, filter: &VmFilter, cancel: &CancellationToken) -> Result<VmListing> {
		info!(target = "snapview.resolver", name = ?filter.name, power_state = ?filter.power_state, "listing vms");
		let conn = self.session.connection(cancel).await?;
		wait::cancellable(cancel, "vm listing", async {
			let api = conn.api();
			let datacenter = inventory::default_datacenter(api, self.session.config().datacenter.as_deref()).await?;
			let mut vms = Vec::new();
			for reference in inventory::vms(api, &datacenter).await? {
				let props = api.properties(&reference, &["name", "config", "runtime"]).await?;
				let config: VirtualMachineConfigInfo = decode(&reference, "config", props.get("config"))?;
				let runtime: VirtualMachineRuntimeInfo = decode(&reference, "runtime", props.get("runtime"))?;
				let summary = VmSummary {
					name: props.get("name").and_then(Value::as_str).unwrap_or_default().to_string(),
					id: reference.value,
					uuid: config.uuid,
					power_state: runtime.power_state,
				};
				if filter.matches(&summary) {
					vms.push(summary);
				}
			}
			info!(target = "snapview.resolver", datacenter = %datacenter.name, total = vms.len(), "vm listing complete");
			Ok::<_, Error>(VmListing {
				datacenter: datacenter.name,
				total: vms.len(),
				vms,
			})
		})
		.await
	}

	/// Configuration, devices, placement and snapshots of a located VM. A VM
	/// without snapshots yields an empty list here, not `NoSnapshots`.
	pub async fn vm_info(&self, vm: &VmHandle, cancel: &CancellationToken) -> Result<VmDetails> {
		let conn = self.session.connection(cancel).await?;
		wait::cancellable(cancel, "vm details", async {
			let api = conn.api();
			let props = api.properties(&vm.reference, &["config", "runtime", "guest", "snapshot"]).await?;
			let config: VirtualMachineConfigInfo = decode(&vm.reference, "config", props.get("config"))?;
			let runtime: VirtualMachineRuntimeInfo = decode(&vm.reference, "runtime", props.get("runtime"))?;
			let guest: GuestInfo = decode(&vm.reference, "guest", props.get("guest"))?;

			let mut details = VmDetails::from_properties(&config, &runtime, &guest);
			details.id = vm.id().to_string();
			details.name = vm.name.clone();
			details.datacenter = vm.datacenter.name.clone();
			if let Some(host) = runtime.host.as_ref() {
				match api::object_name(api, host).await {
					Ok(name) => details.host = Some(name),
					Err(err) => debug!(target = "snapview.resolver", %host, error = %err, "host name unavailable"),
				}
			}

			if let Some(raw) = props.get("snapshot").filter(|raw| !raw.is_null()) {
				let info: VirtualMachineSnapshotInfo =
					serde_json::from_value(raw.clone()).map_err(|err| Error::Protocol(format!("{}.snapshot: {err}", vm.reference)))?;
				let roots: Vec<SnapshotNode> = info.root_snapshot_list.iter().map(SnapshotNode::from).collect();
				details.snapshots = flatten(&roots, info.current_snapshot.as_ref());
				details.current_snapshot = details.snapshots.iter().find(|s| s.current).map(|s| s.name.clone());
			}
			Ok::<_, Error>(details)
		})
		.await
	}

	/// Finds `snapshot_name` anywhere in the VM's snapshot tree.
	pub async fn resolve_snapshot(&self, vm_name: &str, snapshot_name: &str, cancel: &CancellationToken) -> Result<ResolvedSnapshot> {
		let conn = self.session.connection(cancel).await?;
		wait::cancellable(cancel, "snapshot lookup", async {
			let vm = self.locate_vm(&conn, vm_name).await?;
			let (roots, _) = snapshot_tree(conn.api(), &vm).await?;
			let snapshot = find_snapshot(&roots, snapshot_name)
				.cloned()
				.ok_or_else(|| Error::not_found("snapshot", format!("{vm_name}/{snapshot_name}")))?;
			debug!(target = "snapview.resolver", vm = %vm.reference, snapshot = %snapshot.reference, "resolved snapshot");
			Ok::<_, Error>(ResolvedSnapshot { vm, snapshot })
		})
		.await
	}

	/// Flattened snapshot tree of a VM.
	pub async fn list_snapshots(&self, vm_name: &str, cancel: &CancellationToken) -> Result<Vec<SnapshotSummary>> {
		let conn = self.session.connection(cancel).await?;
		wait::cancellable(cancel, "snapshot listing", async {
			let vm = self.locate_vm(&conn, vm_name).await?;
			let (roots, current) = snapshot_tree(conn.api(), &vm).await?;
			Ok::<_, Error>(flatten(&roots, current.as_ref()))
		})
		.await
	}

	/// Identifiers, disk paths and compute-resource path for one snapshot.
	/// All-or-nothing: any missing piece fails the whole call.
	pub async fn snapshot_disk_info(&self, vm_name: &str, snapshot_name: &str, cancel: &CancellationToken) -> Result<SnapshotDiskInfo> {
		debug!(target = "snapview.resolver", vm = vm_name, snapshot = snapshot_name, "resolving snapshot disks");
		let conn = self.session.connection(cancel).await?;
		wait::cancellable(cancel, "snapshot disk resolution", async {
			let vm = self.locate_vm(&conn, vm_name).await?;
			let (roots, _) = snapshot_tree(conn.api(), &vm).await?;
			let snapshot = find_snapshot(&roots, snapshot_name).ok_or_else(|| Error::not_found("snapshot", format!("{vm_name}/{snapshot_name}")))?;

			let disks = disk_paths(conn.api(), &vm).await?;
			let compute_resource_path = compute_resource_path(conn.api(), &vm).await?;

			let info = SnapshotDiskInfo {
				vm_id: vm.id().to_string(),
				snapshot_id: snapshot.id().to_string(),
				disk_paths: disks.current,
				base_disk_paths: disks.base,
				compute_resource_path,
			};
			info!(
				target = "snapview.resolver",
				vm = %info.vm_id,
				snapshot = %info.snapshot_id,
				disks = info.disk_count(),
				base = ?info.base_disk_paths,
				compute = %info.compute_resource_path,
				"resolved snapshot disks"
			);
			Ok::<_, Error>(info)
		})
		.await
	}

	/// Current disks and compute-resource path of a VM without involving a
	/// snapshot; used for linked clones, whose own disks are the ones to read.
	pub async fn clone_disk_info(&self, vm_name: &str, cancel: &CancellationToken) -> Result<SnapshotDiskInfo> {
		let conn = self.session.connection(cancel).await?;
		wait::cancellable(cancel, "clone disk resolution", async {
			let vm = self.locate_vm(&conn, vm_name).await?;
			let disks = disk_paths(conn.api(), &vm).await?;
			let compute_resource_path = compute_resource_path(conn.api(), &vm).await?;
			Ok::<_, Error>(SnapshotDiskInfo {
				vm_id: vm.id().to_string(),
				snapshot_id: String::new(),
				base_disk_paths: disks.current.clone(),
				disk_paths: disks.current,
				compute_resource_path,
			})
		})
		.await
	}

	pub(crate) async fn locate_vm(&self, conn: &Connection, name: &str) -> Result<VmHandle> {
		let api = conn.api();
		let datacenter = inventory::default_datacenter(api, self.session.config().datacenter.as_deref()).await?;
		let reference = inventory::find_vm(api, &datacenter, name)
			.await?
			.ok_or_else(|| Error::not_found("virtual machine", name))?;
		debug!(target = "snapview.resolver", vm = %reference, name, datacenter = %datacenter.name, "found vm");
		Ok(VmHandle {
			reference,
			name: name.to_string(),
			datacenter,
		})
	}
}

/// Decodes a property fetched in bulk, treating absent or `null` as default.
fn decode<T>(object: &ManagedObjectReference, name: &str, value: Option<&Value>) -> Result<T>
where
	T: serde::de::DeserializeOwned + Default,
{
	match value {
		None | Some(Value::Null) => Ok(T::default()),
		Some(value) => serde_json::from_value(value.clone()).map_err(|err| Error::Protocol(format!("{object}.{name}: {err}"))),
	}
}

/// Snapshot roots and the current snapshot; a VM without any is `NoSnapshots`.
async fn snapshot_tree(api: &dyn ManagementApi, vm: &VmHandle) -> Result<(Vec<SnapshotNode>, Option<ManagedObjectReference>)> {
	let raw = api.property(&vm.reference, "snapshot").await?;
	if raw.is_null() {
		return Err(Error::NoSnapshots { vm: vm.name.clone() });
	}
	let info: VirtualMachineSnapshotInfo = serde_json::from_value(raw).map_err(|err| Error::Protocol(format!("{}.snapshot: {err}", vm.reference)))?;
	if info.root_snapshot_list.is_empty() {
		return Err(Error::NoSnapshots { vm: vm.name.clone() });
	}
	let roots = info.root_snapshot_list.iter().map(SnapshotNode::from).collect();
	Ok((roots, info.current_snapshot))
}

/// Current and base paths of every recognised disk, in device order.
async fn disk_paths(api: &dyn ManagementApi, vm: &VmHandle) -> Result<DiskPaths> {
	let config: VirtualMachineConfigInfo = api::property_as(api, &vm.reference, "config").await?;
	let paths = collect_disk_paths(&config, &vm.name);

	if paths.current.is_empty() {
		return Err(Error::not_found("disk", format!("any virtual disk of {}", vm.name)));
	}
	if paths.base.is_empty() {
		return Err(Error::ResolutionIncomplete {
			vm: vm.name.clone(),
			reason: "no base disk paths could be determined".into(),
		});
	}
	Ok(paths)
}

pub(crate) fn collect_disk_paths(config: &VirtualMachineConfigInfo, vm_name: &str) -> DiskPaths {
	let mut paths = DiskPaths::default();
	for device in config.hardware.device.iter().filter(|device| device.is_disk()) {
		let Some(backing) = device.file_backing().filter(|backing| !backing.file_name.is_empty()) else {
			warn!(
				target = "snapview.resolver",
				vm = vm_name,
				device = device.key,
				label = device.label().unwrap_or_default(),
				backing = device.backing_type().unwrap_or("none"),
				"skipping disk with unsupported backing"
			);
			continue;
		};

		let base = match backing.parent_file() {
			Some(parent) => parent.to_string(),
			None => derive_base_disk_path(&backing.file_name),
		};
		debug!(
			target = "snapview.resolver",
			vm = vm_name,
			disk = %backing.file_name,
			%base,
			explicit_parent = backing.parent_file().is_some(),
			"disk backing"
		);
		paths.current.push(backing.file_name);
		paths.base.push(base);
	}
	paths
}

/// Inventory path of the VM's host, falling back to the host's cluster or
/// compute resource.
async fn compute_resource_path(api: &dyn ManagementApi, vm: &VmHandle) -> Result<String> {
	let runtime: VirtualMachineRuntimeInfo = api::property_as(api, &vm.reference, "runtime").await?;
	let incomplete = |reason: &str| Error::ResolutionIncomplete {
		vm: vm.name.clone(),
		reason: reason.to_string(),
	};

	let Some(host) = runtime.host else {
		return Err(incomplete("vm is not placed on a host"));
	};

	if host.is_kind(kinds::HOST_SYSTEM) {
		match inventory::inventory_path(api, &host).await {
			Ok(path) if path != "/" => return Ok(path),
			Ok(_) => debug!(target = "snapview.resolver", %host, "host has an empty inventory path"),
			Err(err) => debug!(target = "snapview.resolver", %host, error = %err, "host inventory path unavailable"),
		}
	}

	let parent = api::reference(api, &host, "parent").await.ok().flatten();
	if let Some(parent) = parent.filter(|p| p.is_kind(kinds::CLUSTER_COMPUTE_RESOURCE) || p.is_kind(kinds::COMPUTE_RESOURCE)) {
		match inventory::inventory_path(api, &parent).await {
			Ok(path) if path != "/" => return Ok(path),
			Ok(_) => {}
			Err(err) => debug!(target = "snapview.resolver", %parent, error = %err, "compute resource inventory path unavailable"),
		}
	}

	Err(incomplete("compute resource path could not be resolved"))
}

#[cfg(test)]
mod tests {
	use serde_json::json;

	use super::*;

	#[test]
	fn unsupported_backings_are_skipped_not_fatal() {
		let config: VirtualMachineConfigInfo = serde_json::from_value(json!({
			"hardware": { "device": [
				{ "_typeName": "VirtualDisk", "key": 2000, "backing": {
					"_typeName": "VirtualDiskFlatVer2BackingInfo",
					"fileName": "[ds1] app/app-000001.vmdk",
					"parent": { "_typeName": "VirtualDiskFlatVer2BackingInfo", "fileName": "[ds1] app/app.vmdk" }
				}},
				{ "_typeName": "VirtualDisk", "key": 2001, "backing": {
					"_typeName": "VirtualDiskRawDiskMappingVer1BackingInfo",
					"fileName": "[ds1] app/rdm.vmdk"
				}},
				{ "_typeName": "VirtualE1000", "key": 4000 },
				{ "_typeName": "VirtualDisk", "key": 2002, "backing": {
					"_typeName": "VirtualDiskSeSparseBackingInfo",
					"fileName": "[ds2] app/data-000003.vmdk"
				}}
			]}
		}))
		.unwrap();

		let paths = collect_disk_paths(&config, "app");
		assert_eq!(paths.current, vec!["[ds1] app/app-000001.vmdk", "[ds2] app/data-000003.vmdk"]);
		assert_eq!(paths.base, vec!["[ds1] app/app.vmdk", "[ds2] app/data.vmdk"]);
	}
}
