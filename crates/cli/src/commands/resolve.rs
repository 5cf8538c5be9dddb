use serde_json::{Value, json};
use snapview::VmFilter;
use tokio_util::sync::CancellationToken;

use super::Outcome;
use crate::context::CommandContext;

pub async fn resolve(ctx: &CommandContext, vm: &str, snapshot: &str, ssl_option: Option<&str>, cancel: &CancellationToken) -> snapview::Result<Outcome> {
	let info = ctx.resolver().snapshot_disk_info(vm, snapshot, cancel).await?;
	let (username, _) = ctx.session.credentials();
	let vpx_uri = info.libvirt_uri(ctx.session.host(), username, ssl_option.unwrap_or(ctx.default_ssl_option()));

	Ok(Outcome::Data(json!({
		"vm": vm,
		"snapshot": snapshot,
		"vmId": info.vm_id,
		"snapshotId": info.snapshot_id,
		"diskPaths": info.disk_paths,
		"baseDiskPaths": info.base_disk_paths,
		"computeResourcePath": info.compute_resource_path,
		"vpxUri": vpx_uri,
	})))
}

pub async fn snapshots(ctx: &CommandContext, vm: &str, cancel: &CancellationToken) -> snapview::Result<Outcome> {
	let snapshots = ctx.resolver().list_snapshots(vm, cancel).await?;
	Ok(Outcome::Data(json!({ "vm": vm, "snapshots": snapshots })))
}

pub async fn vms(ctx: &CommandContext, filter: VmFilter, cancel: &CancellationToken) -> snapview::Result<Outcome> {
	let listing = ctx.resolver().list_vms(&filter, cancel).await?;
	Ok(Outcome::Data(to_value(&listing)?))
}

pub async fn vm(ctx: &CommandContext, name: Option<&str>, uuid: Option<&str>, cancel: &CancellationToken) -> snapview::Result<Outcome> {
	let resolver = ctx.resolver();
	let handle = match (name, uuid) {
		(_, Some(uuid)) => resolver.find_vm_by_uuid(uuid, cancel).await?,
		(Some(name), None) => resolver.find_vm_by_name(name, cancel).await?,
		(None, None) => return Err(snapview::Error::Config("a VM name or --uuid is required".into())),
	};
	let details = resolver.vm_info(&handle, cancel).await?;
	Ok(Outcome::Data(to_value(&details)?))
}

fn to_value<T: serde::Serialize>(value: &T) -> snapview::Result<Value> {
	serde_json::to_value(value).map_err(|err| snapview::Error::Protocol(err.to_string()))
}
