use std::time::SystemTime;

use serde_json::json;
use snapview::SnapshotOptions;
use snapview::lifecycle::inspection_clone_name;
use tokio_util::sync::CancellationToken;
use tracing::info;

use super::{Outcome, Reporter};
use crate::context::CommandContext;

pub async fn snapshot_create(ctx: &CommandContext, vm: &str, name: &str, options: &SnapshotOptions, cancel: &CancellationToken) -> snapview::Result<Outcome> {
	let snapshot = ctx.lifecycle().create_snapshot(vm, name, options, cancel).await?;
	Ok(Outcome::Data(json!({ "vm": vm, "snapshot": name, "snapshotId": snapshot.value })))
}

pub async fn clone(ctx: &CommandContext, vm: &str, snapshot: &str, name: Option<String>, cancel: &CancellationToken) -> snapview::Result<Outcome> {
	let lifecycle = ctx.lifecycle();
	let resolved = lifecycle.resolver().resolve_snapshot(vm, snapshot, cancel).await?;
	let name = name.unwrap_or_else(|| inspection_clone_name(vm, SystemTime::now()));
	let clone = lifecycle.create_linked_clone(vm, &resolved.snapshot.reference, &name, cancel).await?;
	Ok(Outcome::Data(json!({
		"vm": vm,
		"snapshot": snapshot,
		"clone": name,
		"cloneId": clone.value,
	})))
}

pub async fn delete(ctx: &CommandContext, vm: &str, cancel: &CancellationToken) -> snapview::Result<Outcome> {
	ctx.lifecycle().delete_vm(vm, cancel).await?;
	Ok(Outcome::Data(json!({ "vm": vm, "deleted": true })))
}

/// Holds a temporary linked clone until interrupted, then deletes it.
pub async fn clone_inspect(ctx: &CommandContext, vm: &str, snapshot: &str, reporter: &Reporter, cancel: &CancellationToken) -> snapview::Result<Outcome> {
	let clone = ctx.lifecycle().create_inspection_clone(vm, snapshot, cancel).await?;
	let info = match clone.disk_info(cancel).await {
		Ok(info) => info,
		Err(err) => {
			clone.release().await;
			return Err(err);
		}
	};

	reporter.success(json!({
		"vm": vm,
		"snapshot": snapshot,
		"clone": clone.name(),
		"cloneId": clone.reference().value,
		"diskPaths": info.disk_paths,
		"computeResourcePath": info.compute_resource_path,
	}));
	info!(target = "snapview.lifecycle", clone = clone.name(), "clone held; interrupt to delete it");

	cancel.cancelled().await;
	clone.release().await;
	Ok(Outcome::Reported)
}
