//! Snapshot exports driven through a stand-in export program.

#![cfg(unix)]

use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use snapview::{ErrorKind, ExportConfig, ExportState, SessionManager, SnapshotDiskInfo, SnapshotExporter, VCenterConfig, close_session};
use snapview_runtime::{ExportError, SupervisorOptions};
use tokio_util::sync::CancellationToken;

/// Writes an executable stand-in for nbdkit. `$2` is the socket path (after `-U`).
fn stand_in(dir: &Path, body: &str) -> PathBuf {
	let path = dir.join("nbdkit");
	std::fs::write(&path, format!("#!/bin/sh\n{body}\n")).unwrap();
	std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
	path
}

fn exporter(dir: &Path, program: PathBuf) -> SnapshotExporter {
	let vcenter = VCenterConfig {
		url: "https://vc.example.com:8443".into(),
		username: "administrator@vsphere.local".into(),
		password: "secret".into(),
		..VCenterConfig::default()
	};
	let session = Arc::new(SessionManager::vim(vcenter).unwrap());
	let config = ExportConfig {
		nbdkit_path: Some(program),
		vddk_libdir: Some(dir.join("vddk")),
		socket_dir: Some(dir.to_path_buf()),
		ready_timeout_secs: 5,
		verify_thumbprint: false,
		..ExportConfig::default()
	};
	SnapshotExporter::new(session, config).with_supervisor_options(SupervisorOptions {
		startup_grace: Duration::ZERO,
		poll_interval: Duration::from_millis(20),
		ready_grace: Duration::from_millis(10),
		shutdown_grace: Duration::from_secs(2),
		..SupervisorOptions::default()
	})
}

fn web01() -> SnapshotDiskInfo {
	SnapshotDiskInfo {
		vm_id: "vm-42".into(),
		snapshot_id: "snapshot-2".into(),
		disk_paths: vec!["[ds1] web01/web01-000004.vmdk".into()],
		base_disk_paths: vec!["[ds1] web01/web01.vmdk".into()],
		compute_resource_path: "/dc1/host/cluster1/esx01.example.com".into(),
	}
}

fn sockets_in(dir: &Path) -> usize {
	std::fs::read_dir(dir)
		.unwrap()
		.filter_map(|entry| entry.ok())
		.filter(|entry| entry.path().extension().is_some_and(|ext| ext == "sock"))
		.count()
}

#[tokio::test]
async fn exports_base_disk_of_snapshot_and_cleans_up() {
	let tmp = tempfile::tempdir().unwrap();
	let args_file = tmp.path().join("args");
	let program = stand_in(tmp.path(), &format!(r#"printf '%s\n' "$@" > "{}"; touch "$2"; exec sleep 30"#, args_file.display()));

	let mut session = exporter(tmp.path(), program)
		.open_snapshot(&web01(), 0, &CancellationToken::new())
		.await
		.unwrap();
	assert_eq!(session.state(), ExportState::Ready);
	assert!(session.socket_path().exists());

	let args = std::fs::read_to_string(&args_file).unwrap();
	let args: Vec<&str> = args.lines().collect();
	assert_eq!(args[0], "-U");
	assert_eq!(Path::new(args[1]), session.socket_path());
	assert!(args.contains(&"-r"));
	assert!(args.contains(&"server=vc.example.com"));
	assert!(args.contains(&"vm=moref=vm-42"));
	assert!(args.contains(&"snapshot=snapshot-2"));
	assert!(args.contains(&"file=[ds1] web01/web01.vmdk"));
	assert!(args.contains(&"password=secret"));
	assert!(!args.iter().any(|arg| arg.starts_with("thumbprint=")));

	let mut session = Some(session);
	close_session(&mut session).await;
	close_session(&mut session).await;
	assert_eq!(session.as_ref().map(|s| s.state()), Some(ExportState::Closed));
	assert_eq!(sockets_in(tmp.path()), 0);
}

#[tokio::test]
async fn crashing_export_reports_process_output() {
	let tmp = tempfile::tempdir().unwrap();
	let program = stand_in(tmp.path(), r#"sleep 0.1; echo "vddk: cannot open disk" >&2; exit 1"#);

	let err = exporter(tmp.path(), program)
		.open_snapshot(&web01(), 0, &CancellationToken::new())
		.await
		.unwrap_err();

	assert_eq!(err.kind(), ErrorKind::ExportProcess);
	match err.root() {
		snapview::Error::Export(ExportError::Exited { diagnostics, .. }) => assert!(diagnostics.contains("vddk: cannot open disk")),
		other => panic!("unexpected error: {other}"),
	}
	assert_eq!(sockets_in(tmp.path()), 0);
}

#[tokio::test]
async fn cancelled_wait_tears_the_export_down() {
	let tmp = tempfile::tempdir().unwrap();
	let program = stand_in(tmp.path(), "exec sleep 30");
	let cancel = CancellationToken::new();
	let trigger = cancel.clone();
	tokio::spawn(async move {
		tokio::time::sleep(Duration::from_millis(100)).await;
		trigger.cancel();
	});

	let err = exporter(tmp.path(), program).open_snapshot(&web01(), 0, &cancel).await.unwrap_err();
	assert!(err.is_cancelled());
	assert_eq!(sockets_in(tmp.path()), 0);
}

#[tokio::test]
async fn out_of_range_disk_is_not_found() {
	let tmp = tempfile::tempdir().unwrap();
	let program = stand_in(tmp.path(), "exit 0");
	let err = exporter(tmp.path(), program)
		.open_snapshot(&web01(), 3, &CancellationToken::new())
		.await
		.unwrap_err();
	assert!(err.is_not_found());
}

#[tokio::test]
async fn closing_nothing_is_a_no_op() {
	close_session(&mut None).await;
}
