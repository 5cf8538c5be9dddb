//! Snapshot disk resolution against the in-memory endpoint.

use std::sync::Arc;

use snapview::fake::{CLUSTER, FakeInventory, FakeSnapshot, FakeState, HOST, VM_FOLDER};
use serde_json::json;
use snapview::{DiskResolver, Error, ErrorKind, SessionManager, VCenterConfig, VmFilter};
use tokio_util::sync::CancellationToken;

fn resolver(state: &FakeState) -> DiskResolver {
	let config = VCenterConfig {
		url: "https://vc.example.com".into(),
		username: "administrator@vsphere.local".into(),
		password: "secret".into(),
		retry_attempts: 0,
		..VCenterConfig::default()
	};
	DiskResolver::new(Arc::new(SessionManager::new(config, Arc::new(state.connector())).unwrap()))
}

fn web01() -> FakeInventory {
	let mut inventory = FakeInventory::standard();
	inventory
		.add_vm("vm-42", "web01", VM_FOLDER)
		.add_disk("vm-42", "[ds1] web01/web01-000004.vmdk", None)
		.set_snapshots(
			"vm-42",
			vec![FakeSnapshot::new("snapshot-1", "base").child(FakeSnapshot::new("snapshot-2", "pre-upgrade"))],
			Some("snapshot-2"),
		);
	inventory
}

#[tokio::test]
async fn resolves_web01_pre_upgrade() {
	let state = FakeState::new(web01());
	let info = resolver(&state)
		.snapshot_disk_info("web01", "pre-upgrade", &CancellationToken::new())
		.await
		.unwrap();

	assert_eq!(info.vm_id, "vm-42");
	assert_eq!(info.snapshot_id, "snapshot-2");
	assert_eq!(info.disk_paths, vec!["[ds1] web01/web01-000004.vmdk"]);
	assert_eq!(info.base_disk_paths, vec!["[ds1] web01/web01.vmdk"]);
	assert!(!info.compute_resource_path.is_empty());
	assert_eq!(info.compute_resource_path, "/dc1/host/cluster1/esx01.example.com");
}

#[tokio::test]
async fn explicit_parent_file_wins_over_derivation() {
	let mut inventory = web01();
	inventory.add_disk("vm-42", "[ds2] web01/data-000004.vmdk", Some("[ds2] web01/data-flat-base.vmdk"));
	let state = FakeState::new(inventory);

	let info = resolver(&state)
		.snapshot_disk_info("web01", "pre-upgrade", &CancellationToken::new())
		.await
		.unwrap();

	assert_eq!(info.disk_paths.len(), 2);
	assert_eq!(info.base_disk_paths, vec!["[ds1] web01/web01.vmdk", "[ds2] web01/data-flat-base.vmdk"]);
}

#[tokio::test]
async fn snapshot_search_descends_the_whole_tree() {
	let mut inventory = FakeInventory::standard();
	inventory.add_vm("vm-5", "db01", VM_FOLDER).set_snapshots(
		"vm-5",
		vec![FakeSnapshot::new("snapshot-1", "A").child(FakeSnapshot::new("snapshot-2", "B").child(FakeSnapshot::new("snapshot-3", "C")))],
		None,
	);
	let state = FakeState::new(inventory);
	let resolver = resolver(&state);
	let cancel = CancellationToken::new();

	let found = resolver.resolve_snapshot("db01", "C", &cancel).await.unwrap();
	assert_eq!(found.snapshot.id(), "snapshot-3");
	assert_eq!(found.vm.id(), "vm-5");

	let err = resolver.resolve_snapshot("db01", "X", &cancel).await.unwrap_err();
	assert!(matches!(err, Error::NotFound { kind: "snapshot", .. }), "unexpected error: {err}");
}

#[tokio::test]
async fn no_snapshots_is_distinct_from_snapshot_not_found() {
	let mut inventory = FakeInventory::standard();
	inventory.add_vm("vm-6", "bare", VM_FOLDER);
	let state = FakeState::new(inventory);

	let err = resolver(&state).resolve_snapshot("bare", "any", &CancellationToken::new()).await.unwrap_err();
	assert!(matches!(err, Error::NoSnapshots { .. }), "unexpected error: {err}");
	assert_eq!(err.kind(), ErrorKind::NotFound);
}

#[tokio::test]
async fn missing_vm_is_not_found_not_a_connection_error() {
	let state = FakeState::new(web01());
	let err = resolver(&state).find_vm_by_name("nope", &CancellationToken::new()).await.unwrap_err();
	assert!(matches!(err, Error::NotFound { kind: "virtual machine", .. }));
	assert!(err.to_string().contains("nope"));
}

#[tokio::test]
async fn vm_without_disks_fails_resolution() {
	let mut inventory = FakeInventory::standard();
	inventory
		.add_vm("vm-7", "diskless", VM_FOLDER)
		.set_snapshots("vm-7", vec![FakeSnapshot::new("snapshot-9", "s")], None);
	let state = FakeState::new(inventory);

	let err = resolver(&state)
		.snapshot_disk_info("diskless", "s", &CancellationToken::new())
		.await
		.unwrap_err();
	assert!(matches!(err, Error::NotFound { kind: "disk", .. }), "unexpected error: {err}");
}

#[tokio::test]
async fn compute_path_falls_back_to_cluster() {
	let mut inventory = web01();
	inventory.set_property(HOST, "name", serde_json::Value::Null);
	let state = FakeState::new(inventory);

	let info = resolver(&state)
		.snapshot_disk_info("web01", "pre-upgrade", &CancellationToken::new())
		.await
		.unwrap();
	assert_eq!(info.compute_resource_path, "/dc1/host/cluster1");
}

#[tokio::test]
async fn unresolvable_compute_path_is_incomplete_not_not_found() {
	let mut inventory = web01();
	inventory.set_property(HOST, "name", serde_json::Value::Null);
	inventory.set_property(CLUSTER, "name", serde_json::Value::Null);
	let state = FakeState::new(inventory);

	let err = resolver(&state)
		.snapshot_disk_info("web01", "pre-upgrade", &CancellationToken::new())
		.await
		.unwrap_err();
	assert_eq!(err.kind(), ErrorKind::ResolutionIncomplete);
}

#[tokio::test]
async fn lists_snapshots_with_current_marker() {
	let state = FakeState::new(web01());
	let listing = resolver(&state).list_snapshots("web01", &CancellationToken::new()).await.unwrap();
	let flat: Vec<_> = listing.iter().map(|s| (s.name.as_str(), s.depth, s.current)).collect();
	assert_eq!(flat, vec![("base", 0, false), ("pre-upgrade", 1, true)]);
}

#[tokio::test]
async fn finds_vm_by_uuid() {
	let state = FakeState::new(web01());
	let vm = resolver(&state).find_vm_by_uuid("uuid-vm-42", &CancellationToken::new()).await.unwrap();
	assert_eq!(vm.name, "web01");

	let err = resolver(&state).find_vm_by_uuid("uuid-missing", &CancellationToken::new()).await.unwrap_err();
	assert!(err.is_not_found());
}

#[tokio::test]
async fn resolution_survives_an_expired_session() {
	let state = FakeState::new(web01());
	let resolver = resolver(&state);
	let cancel = CancellationToken::new();

	resolver.find_vm_by_name("web01", &cancel).await.unwrap();
	state.expire_sessions();
	let info = resolver.snapshot_disk_info("web01", "pre-upgrade", &cancel).await.unwrap();

	assert_eq!(info.snapshot_id, "snapshot-2");
	assert_eq!(state.open_calls(), 2);
}

#[tokio::test]
async fn vm_listing_applies_name_and_power_filters() {
	let mut inventory = web01();
	inventory
		.add_folder("group-v9", "batch", VM_FOLDER)
		.add_vm("vm-50", "WEB02", "group-v9")
		.add_vm("vm-51", "db01", "group-v9")
		.set_power_state("vm-50", "poweredOn");
	let state = FakeState::new(inventory);
	let resolver = resolver(&state);
	let cancel = CancellationToken::new();

	let all = resolver.list_vms(&VmFilter::default(), &cancel).await.unwrap();
	assert_eq!(all.datacenter, "dc1");
	assert_eq!(all.total, 3);
	let names: Vec<_> = all.vms.iter().map(|vm| vm.name.as_str()).collect();
	assert_eq!(names, vec!["web01", "WEB02", "db01"]);

	let filter = VmFilter {
		name: Some("web".into()),
		power_state: Some("poweredon".into()),
	};
	let running = resolver.list_vms(&filter, &cancel).await.unwrap();
	assert_eq!(running.total, 1);
	assert_eq!(running.vms[0].id, "vm-50");
	assert_eq!(running.vms[0].uuid.as_deref(), Some("uuid-vm-50"));
}

#[tokio::test]
async fn vm_info_describes_hardware_nics_and_snapshots() {
	let mut inventory = web01();
	inventory
		.add_device(
			"vm-42",
			json!({
				"_typeName": "VirtualVmxnet3",
				"deviceInfo": { "label": "Network adapter 1", "summary": "VM Network" },
				"backing": { "_typeName": "VirtualEthernetCardNetworkBackingInfo", "deviceName": "VM Network" },
				"macAddress": "00:50:56:aa:bb:cc",
				"connectable": { "connected": true }
			}),
		)
		.set_property("vm-42", "guest", json!({ "hostName": "web01.internal", "net": [{ "macAddress": "00:50:56:aa:bb:cc", "ipAddress": ["10.0.0.5"] }] }))
		.set_power_state("vm-42", "poweredOn");
	let state = FakeState::new(inventory);
	let resolver = resolver(&state);
	let cancel = CancellationToken::new();

	let vm = resolver.find_vm_by_name("web01", &cancel).await.unwrap();
	let details = resolver.vm_info(&vm, &cancel).await.unwrap();

	assert_eq!(details.id, "vm-42");
	assert_eq!(details.datacenter, "dc1");
	assert_eq!(details.power_state.as_deref(), Some("poweredOn"));
	assert_eq!(details.host.as_deref(), Some("esx01.example.com"));
	assert_eq!(details.disks.len(), 1);
	assert_eq!(details.disks[0].file_name.as_deref(), Some("[ds1] web01/web01-000004.vmdk"));
	assert_eq!(details.datastores, vec!["ds1"]);
	assert_eq!(details.network_adapters.len(), 1);
	assert_eq!(details.network_adapters[0].ip_addresses, vec!["10.0.0.5"]);
	let snapshots: Vec<_> = details.snapshots.iter().map(|s| s.name.as_str()).collect();
	assert_eq!(snapshots, vec!["base", "pre-upgrade"]);
	assert_eq!(details.current_snapshot.as_deref(), Some("pre-upgrade"));
}

#[tokio::test]
async fn vm_info_without_snapshots_is_not_an_error() {
	let mut inventory = FakeInventory::standard();
	inventory.add_vm("vm-60", "fresh", VM_FOLDER);
	let state = FakeState::new(inventory);
	let resolver = resolver(&state);
	let cancel = CancellationToken::new();

	let vm = resolver.find_vm_by_name("fresh", &cancel).await.unwrap();
	let details = resolver.vm_info(&vm, &cancel).await.unwrap();

	assert!(details.snapshots.is_empty());
	assert_eq!(details.current_snapshot, None);
	assert_eq!(details.power_state.as_deref(), Some("poweredOff"));
}
