use serde_json::json;
use snapview::close_session;
use tokio_util::sync::CancellationToken;
use tracing::info;

use super::{Outcome, Reporter};
use crate::context::CommandContext;

/// Resolves, exports and holds the export open until interrupted.
pub async fn execute(
	ctx: &CommandContext,
	vm: &str,
	snapshot: &str,
	disk: usize,
	ready_timeout: Option<u64>,
	reporter: &Reporter,
	cancel: &CancellationToken,
) -> snapview::Result<Outcome> {
	let info = ctx.resolver().snapshot_disk_info(vm, snapshot, cancel).await?;

	let exporter = ctx.exporter(ready_timeout);
	let mut session = Some(exporter.open_snapshot(&info, disk, cancel).await?);

	if let Some(open) = &session {
		reporter.success(json!({
			"vm": vm,
			"snapshot": snapshot,
			"vmId": info.vm_id,
			"snapshotId": info.snapshot_id,
			"disk": disk,
			"diskPath": info.disk_paths.get(disk),
			"baseDiskPath": info.base_disk_paths.get(disk),
			"nbdUrl": open.nbd_url(),
			"socket": open.socket_path(),
			"pid": open.pid(),
		}));
		info!(target = "snapview.export", url = %open.nbd_url(), "export running; interrupt to stop");
	}

	cancel.cancelled().await;
	close_session(&mut session).await;
	Ok(Outcome::Reported)
}
