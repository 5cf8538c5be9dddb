//! Configuration failures surface as structured envelopes before any network access.

use std::process::Command;

fn snapview(dir: &std::path::Path) -> Command {
	let mut cmd = Command::new(env!("CARGO_BIN_EXE_snapview"));
	cmd.current_dir(dir)
		.env_remove("SNAPVIEW_VCENTER_URL")
		.env_remove("SNAPVIEW_USERNAME")
		.env_remove("SNAPVIEW_PASSWORD")
		.env("HOME", dir)
		.env("XDG_CONFIG_HOME", dir);
	cmd
}

#[test]
fn missing_url_is_a_config_error() {
	let tmp = tempfile::tempdir().unwrap();
	let output = snapview(tmp.path()).args(["health"]).output().unwrap();

	assert_eq!(output.status.code(), Some(2));
	let envelope: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
	assert_eq!(envelope["ok"], false);
	assert_eq!(envelope["command"], "health");
	assert_eq!(envelope["error"]["code"], "CONFIG");
	assert!(envelope["error"]["message"].as_str().unwrap().contains("vcenter.url"));
}

#[test]
fn explicit_config_file_must_exist() {
	let tmp = tempfile::tempdir().unwrap();
	let output = snapview(tmp.path())
		.args(["--config", "absent.toml", "snapshots", "web01"])
		.output()
		.unwrap();

	assert_eq!(output.status.code(), Some(2));
	let envelope: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
	assert_eq!(envelope["error"]["code"], "CONFIG");
	assert!(envelope["error"]["message"].as_str().unwrap().contains("absent.toml"));
}

#[test]
fn password_is_required_even_with_url_from_file() {
	let tmp = tempfile::tempdir().unwrap();
	std::fs::write(
		tmp.path().join("snapview.toml"),
		"[vcenter]\nurl = \"https://vc.example.com\"\nusername = \"administrator@vsphere.local\"\n",
	)
	.unwrap();

	let output = snapview(tmp.path()).env_remove("SNAPVIEW_PASSWORD").args(["vm", "web01"]).output().unwrap();

	assert_eq!(output.status.code(), Some(2));
	let envelope: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
	assert!(envelope["error"]["message"].as_str().unwrap().contains("password"));
}
