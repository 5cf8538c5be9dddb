//! Snapshot, clone and delete operations.
//!
//! Each call obtains a connection, issues one mutating method, and waits for
//! the resulting task. Nothing is retried; a failed task ends the call with the
//! remote message.

use std::future::Future;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use serde_json::{Value, json};
use snapview_protocol::{CreateSnapshotRequest, ManagedObjectReference, VirtualMachineRuntimeInfo};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::api::{self, ManagementApi};
use crate::disk::SnapshotDiskInfo;
use crate::error::{Error, Result, ResultExt};
use crate::resolver::DiskResolver;
use crate::session::SessionManager;
use crate::task::{TaskWait, task_reference, wait_for_task};
use crate::wait;

/// Options for [`VmLifecycle::create_snapshot`].
#[derive(Debug, Clone, Default)]
pub struct SnapshotOptions {
	pub description: Option<String>,
	pub memory: bool,
	pub quiesce: bool,
}

#[derive(Clone)]
pub struct VmLifecycle {
	session: Arc<SessionManager>,
	resolver: Arc<DiskResolver>,
	task_wait: TaskWait,
}

impl VmLifecycle {
	pub fn new(session: Arc<SessionManager>) -> Self {
		Self {
			resolver: Arc::new(DiskResolver::new(Arc::clone(&session))),
			session,
			task_wait: TaskWait::default(),
		}
	}

	pub fn with_task_wait(mut self, task_wait: TaskWait) -> Self {
		self.task_wait = task_wait;
		self
	}

	pub fn resolver(&self) -> &DiskResolver {
		&self.resolver
	}

	/// Creates a snapshot and returns its reference.
	pub async fn create_snapshot(&self, vm_name: &str, name: &str, options: &SnapshotOptions, cancel: &CancellationToken) -> Result<ManagedObjectReference> {
		info!(
			target = "snapview.lifecycle",
			vm = vm_name,
			snapshot = name,
			memory = options.memory,
			quiesce = options.quiesce,
			"creating snapshot"
		);
		let conn = self.session.connection(cancel).await?;
		let vm = wait::cancellable(cancel, "vm lookup", self.resolver.locate_vm(&conn, vm_name)).await?;

		let body = serde_json::to_value(CreateSnapshotRequest {
			name,
			description: options.description.as_deref(),
			memory: options.memory,
			quiesce: options.quiesce,
		})
		.map_err(|err| Error::Protocol(err.to_string()))?;

		let result = self
			.run_task(conn.api(), &vm.reference, "CreateSnapshot_Task", body, cancel)
			.await
			.with_context(|| format!("creating snapshot '{name}' of {vm_name}"))?;

		let snapshot = result
			.as_ref()
			.and_then(ManagedObjectReference::from_value)
			.ok_or_else(|| Error::Protocol("CreateSnapshot_Task returned no snapshot reference".into()))?;
		info!(target = "snapview.lifecycle", vm = vm_name, snapshot = %snapshot.value, "snapshot created");
		Ok(snapshot)
	}

	/// Linked clone of `vm_name` at `snapshot`, created powered off in the
	/// data-center's VM folder. Returns the clone's reference.
	pub async fn create_linked_clone(
		&self,
		vm_name: &str,
		snapshot: &ManagedObjectReference,
		clone_name: &str,
		cancel: &CancellationToken,
	) -> Result<ManagedObjectReference> {
		info!(target = "snapview.lifecycle", vm = vm_name, snapshot = %snapshot.value, clone = clone_name, "creating linked clone");
		let conn = self.session.connection(cancel).await?;
		let vm = wait::cancellable(cancel, "vm lookup", self.resolver.locate_vm(&conn, vm_name)).await?;
		let folder = wait::cancellable(cancel, "vm folder lookup", api::reference(conn.api(), &vm.datacenter.reference, "vmFolder"))
			.await?
			.ok_or_else(|| Error::Protocol(format!("datacenter {} has no vmFolder", vm.datacenter.name)))?;

		let body = json!({
			"folder": folder,
			"name": clone_name,
			"spec": {
				"_typeName": "VirtualMachineCloneSpec",
				"location": {
					"_typeName": "VirtualMachineRelocateSpec",
					"diskMoveType": "createNewChildDiskBacking"
				},
				"snapshot": snapshot,
				"powerOn": false,
				"template": false
			}
		});

		let task = self
			.start_task(conn.api(), &vm.reference, "CloneVM_Task", body, cancel)
			.await
			.with_context(|| format!("cloning {vm_name} as {clone_name}"))?;

		let outcome = wait_for_task(conn.api(), &task, self.task_wait, cancel).await.and_then(|result| {
			result
				.as_ref()
				.and_then(ManagedObjectReference::from_value)
				.ok_or_else(|| Error::Protocol("CloneVM_Task returned no vm reference".into()))
		});
		match outcome {
			Ok(clone) => {
				info!(target = "snapview.lifecycle", clone = clone_name, vm = %clone.value, "linked clone created");
				Ok(clone)
			}
			Err(err) => {
				self.discard_unfinished_clone(conn.api(), &task, clone_name, &err).await;
				Err(err).with_context(|| format!("cloning {vm_name} as {clone_name}"))
			}
		}
	}

	/// Best-effort removal of a clone whose task was issued but whose result
	/// never reached the caller. A task that keeps running remotely is waited
	/// out first, ignoring the caller's token.
	async fn discard_unfinished_clone(&self, api: &dyn ManagementApi, task: &ManagedObjectReference, clone_name: &str, cause: &Error) {
		if matches!(cause.root(), Error::TaskFailed { .. }) {
			return;
		}
		let detached = CancellationToken::new();
		if let Err(err) = wait_for_task(api, task, self.task_wait, &detached).await {
			debug!(target = "snapview.lifecycle", clone = clone_name, task = %task.value, error = %err, "abandoned clone task did not complete");
			if matches!(err.root(), Error::TaskFailed { .. }) {
				return;
			}
		}

		warn!(target = "snapview.lifecycle", clone = clone_name, cause = %cause, "removing clone left by an interrupted clone task");
		match self.delete_vm(clone_name, &detached).await {
			Ok(()) => {}
			Err(err) if err.is_not_found() => debug!(target = "snapview.lifecycle", clone = clone_name, "no clone to remove"),
			Err(err) => error!(target = "snapview.lifecycle", clone = clone_name, error = %err, "failed to remove interrupted clone"),
		}
	}

	/// Destroys a VM, powering it off first when it is running.
	pub async fn delete_vm(&self, vm_name: &str, cancel: &CancellationToken) -> Result<()> {
		info!(target = "snapview.lifecycle", vm = vm_name, "deleting vm");
		let conn = self.session.connection(cancel).await?;
		let vm = wait::cancellable(cancel, "vm lookup", self.resolver.locate_vm(&conn, vm_name)).await?;

		let runtime: VirtualMachineRuntimeInfo = wait::cancellable(cancel, "power state lookup", api::property_as(conn.api(), &vm.reference, "runtime")).await?;
		if runtime.is_powered_on() {
			info!(target = "snapview.lifecycle", vm = vm_name, "powering off before delete");
			self.run_task(conn.api(), &vm.reference, "PowerOffVM_Task", json!({}), cancel)
				.await
				.with_context(|| format!("powering off {vm_name}"))?;
		}

		self.run_task(conn.api(), &vm.reference, "Destroy_Task", json!({}), cancel)
			.await
			.with_context(|| format!("deleting {vm_name}"))?;
		info!(target = "snapview.lifecycle", vm = vm_name, "vm deleted");
		Ok(())
	}

	/// Creates a uniquely named linked clone of `vm_name` at `snapshot_name`.
	pub async fn create_inspection_clone(&self, vm_name: &str, snapshot_name: &str, cancel: &CancellationToken) -> Result<LinkedClone> {
		let resolved = self.resolver.resolve_snapshot(vm_name, snapshot_name, cancel).await?;
		let name = inspection_clone_name(vm_name, SystemTime::now());
		let reference = self.create_linked_clone(vm_name, &resolved.snapshot.reference, &name, cancel).await?;
		Ok(LinkedClone {
			lifecycle: self.clone(),
			name,
			reference,
		})
	}

	/// Runs `inspect` against a temporary linked clone, deleting the clone
	/// afterwards whatever the outcome. Cleanup failures are logged only.
	pub async fn with_linked_clone<F, Fut, T>(&self, vm_name: &str, snapshot_name: &str, cancel: &CancellationToken, inspect: F) -> Result<T>
	where
		F: FnOnce(SnapshotDiskInfo) -> Fut,
		Fut: Future<Output = Result<T>>,
	{
		let clone = self.create_inspection_clone(vm_name, snapshot_name, cancel).await?;
		let outcome = match clone.disk_info(cancel).await {
			Ok(info) => inspect(info).await,
			Err(err) => Err(err),
		};
		clone.release().await;
		outcome
	}

	async fn run_task(
		&self,
		api: &dyn ManagementApi,
		object: &ManagedObjectReference,
		method: &str,
		body: Value,
		cancel: &CancellationToken,
	) -> Result<Option<Value>> {
		let task = self.start_task(api, object, method, body, cancel).await?;
		wait_for_task(api, &task, self.task_wait, cancel).await
	}

	async fn start_task(
		&self,
		api: &dyn ManagementApi,
		object: &ManagedObjectReference,
		method: &str,
		body: Value,
		cancel: &CancellationToken,
	) -> Result<ManagedObjectReference> {
		let returned = wait::cancellable(cancel, method, api.invoke(object, method, body)).await?;
		let task = task_reference(&returned, method)?;
		info!(target = "snapview.lifecycle", object = %object, method, task = %task.value, "task started");
		Ok(task)
	}
}

/// A temporary clone that must be released when inspection ends.
pub struct LinkedClone {
	lifecycle: VmLifecycle,
	name: String,
	reference: ManagedObjectReference,
}

impl LinkedClone {
	pub fn name(&self) -> &str {
		&self.name
	}

	pub fn reference(&self) -> &ManagedObjectReference {
		&self.reference
	}

	/// The clone's own disks (no snapshot involved).
	pub async fn disk_info(&self, cancel: &CancellationToken) -> Result<SnapshotDiskInfo> {
		self.lifecycle.resolver.clone_disk_info(&self.name, cancel).await
	}

	/// Deletes the clone. Runs to completion even when the caller's operation
	/// was cancelled; failure leaves the clone behind and is logged.
	pub async fn release(self) {
		if let Err(err) = self.lifecycle.delete_vm(&self.name, &CancellationToken::new()).await {
			error!(target = "snapview.lifecycle", clone = %self.name, error = %err, "failed to delete inspection clone");
		}
	}
}

/// `<vm>-inspect-clone-<unix seconds>`.
pub fn inspection_clone_name(vm_name: &str, now: SystemTime) -> String {
	let secs = now.duration_since(UNIX_EPOCH).map(|d| d.as_secs()).unwrap_or_default();
	format!("{vm_name}-inspect-clone-{secs}")
}
