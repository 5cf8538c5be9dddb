//! In-memory management endpoint for tests.
//!
//! [`FakeState`] is the controller: it owns an inventory of objects with JSON
//! properties, scripts login and task outcomes, and counts calls. It hands out
//! [`FakeConnector`]s (for a [`crate::SessionManager`]) and pre-authenticated
//! [`FakeApi`] handles (for calling inventory helpers directly).
//!
//! # Example
//!
//! ```ignore
//! let mut inventory = FakeInventory::standard();
//! inventory.add_vm("vm-42", "web01", "group-v3");
//! let state = FakeState::new(inventory);
//! state.set_login(LoginBehavior::FailTimes(2));
//!
//! let session = SessionManager::new(config, Arc::new(state.connector()))?;
//! session.connect(&CancellationToken::new()).await?;
//! assert_eq!(state.login_calls(), 3);
//! ```

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::{Map, Value, json};
use snapview_protocol::{ManagedObjectReference, UserSession, kinds};

use crate::api::{ConnectTarget, Connector, ManagementApi};
use crate::error::{Error, Result};

pub const ROOT_FOLDER: &str = "group-d1";
pub const DATACENTER: &str = "datacenter-2";
pub const VM_FOLDER: &str = "group-v3";
pub const HOST_FOLDER: &str = "group-h4";
pub const CLUSTER: &str = "domain-c7";
pub const HOST: &str = "host-10";

#[derive(Debug, Clone)]
struct FakeObject {
	reference: ManagedObjectReference,
	properties: Map<String, Value>,
}

/// Objects keyed by their identifier.
#[derive(Debug, Clone)]
pub struct FakeInventory {
	root: ManagedObjectReference,
	objects: HashMap<String, FakeObject>,
}

impl FakeInventory {
	/// An empty inventory with only a root folder.
	pub fn new() -> Self {
		let root = ManagedObjectReference::new(kinds::FOLDER, ROOT_FOLDER);
		let mut inventory = Self {
			root: root.clone(),
			objects: HashMap::new(),
		};
		inventory.insert(root, [("name", json!("Datacenters")), ("childEntity", json!([]))]);
		inventory
	}

	/// `dc1` with a VM folder and `cluster1/esx01.example.com`.
	pub fn standard() -> Self {
		let mut inventory = Self::new();
		inventory.add_datacenter(DATACENTER, "dc1", ROOT_FOLDER);
		inventory.add_cluster(CLUSTER, "cluster1", HOST_FOLDER);
		inventory.add_host(HOST, "esx01.example.com", CLUSTER);
		inventory
	}

	pub fn root(&self) -> &ManagedObjectReference {
		&self.root
	}

	/// Adds a data-center named `name` with `vm` and `host` folders
	/// (`group-v*` / `group-h*` for the first one).
	pub fn add_datacenter(&mut self, id: &str, name: &str, parent: &str) -> &mut Self {
		let (vm_folder, host_folder) = if id == DATACENTER {
			(VM_FOLDER.to_string(), HOST_FOLDER.to_string())
		} else {
			(format!("{id}-vm"), format!("{id}-host"))
		};
		let reference = ManagedObjectReference::new(kinds::DATACENTER, id);
		self.insert(
			reference.clone(),
			[
				("name", json!(name)),
				("parent", self.reference_json(parent)),
				("vmFolder", json!(ManagedObjectReference::new(kinds::FOLDER, &vm_folder))),
				("hostFolder", json!(ManagedObjectReference::new(kinds::FOLDER, &host_folder))),
			],
		);
		self.attach(parent, &reference);
		self.insert(
			ManagedObjectReference::new(kinds::FOLDER, &vm_folder),
			[("name", json!("vm")), ("parent", json!(reference)), ("childEntity", json!([]))],
		);
		self.insert(
			ManagedObjectReference::new(kinds::FOLDER, &host_folder),
			[("name", json!("host")), ("parent", json!(reference)), ("childEntity", json!([]))],
		);
		self
	}

	pub fn add_folder(&mut self, id: &str, name: &str, parent: &str) -> &mut Self {
		let reference = ManagedObjectReference::new(kinds::FOLDER, id);
		self.insert(
			reference.clone(),
			[("name", json!(name)), ("parent", self.reference_json(parent)), ("childEntity", json!([]))],
		);
		self.attach(parent, &reference);
		self
	}

	pub fn add_vapp(&mut self, id: &str, name: &str, parent: &str) -> &mut Self {
		let reference = ManagedObjectReference::new(kinds::VIRTUAL_APP, id);
		self.insert(reference.clone(), [("name", json!(name)), ("parent", self.reference_json(parent)), ("vm", json!([]))]);
		self.attach(parent, &reference);
		self
	}

	pub fn add_cluster(&mut self, id: &str, name: &str, parent: &str) -> &mut Self {
		let reference = ManagedObjectReference::new(kinds::CLUSTER_COMPUTE_RESOURCE, id);
		self.insert(reference.clone(), [("name", json!(name)), ("parent", self.reference_json(parent)), ("host", json!([]))]);
		self.attach(parent, &reference);
		self
	}

	pub fn add_host(&mut self, id: &str, name: &str, parent: &str) -> &mut Self {
		let reference = ManagedObjectReference::new(kinds::HOST_SYSTEM, id);
		self.insert(reference.clone(), [("name", json!(name)), ("parent", self.reference_json(parent))]);
		if let Some(cluster) = self.objects.get_mut(parent) {
			if let Some(Value::Array(hosts)) = cluster.properties.get_mut("host") {
				hosts.push(json!(reference));
			}
		}
		self
	}

	/// Adds a powered-off VM on the standard host, with no disks and no snapshots.
	pub fn add_vm(&mut self, id: &str, name: &str, parent: &str) -> &mut Self {
		let reference = ManagedObjectReference::new(kinds::VIRTUAL_MACHINE, id);
		self.insert(
			reference.clone(),
			[
				("name", json!(name)),
				("parent", self.reference_json(parent)),
				("config", json!({ "name": name, "uuid": format!("uuid-{id}"), "hardware": { "device": [] } })),
				(
					"runtime",
					json!({ "host": ManagedObjectReference::new(kinds::HOST_SYSTEM, HOST), "powerState": "poweredOff" }),
				),
				("snapshot", Value::Null),
			],
		);
		self.attach(parent, &reference);
		self
	}

	/// Appends a `VirtualDisk` with a flat backing; `parent` sets an explicit parent file.
	pub fn add_disk(&mut self, vm: &str, file_name: &str, parent: Option<&str>) -> &mut Self {
		let mut backing = json!({
			"_typeName": "VirtualDiskFlatVer2BackingInfo",
			"fileName": file_name,
			"diskMode": "persistent",
		});
		if let Some(parent) = parent {
			backing["parent"] = json!({ "_typeName": "VirtualDiskFlatVer2BackingInfo", "fileName": parent });
		}
		self.add_device(vm, json!({ "_typeName": "VirtualDisk", "backing": backing }))
	}

	/// Appends a raw device; `key` is assigned when missing.
	pub fn add_device(&mut self, vm: &str, mut device: Value) -> &mut Self {
		if let Some(Value::Array(devices)) = self
			.objects
			.get_mut(vm)
			.and_then(|object| object.properties.get_mut("config"))
			.and_then(|config| config.pointer_mut("/hardware/device"))
		{
			if device.get("key").is_none() {
				device["key"] = json!(2000 + devices.len());
			}
			devices.push(device);
		}
		self
	}

	/// Installs a snapshot tree; `current` names the current snapshot's id.
	pub fn set_snapshots(&mut self, vm: &str, roots: Vec<FakeSnapshot>, current: Option<&str>) -> &mut Self {
		let value = json!({
			"currentSnapshot": current.map(|id| ManagedObjectReference::new(kinds::VIRTUAL_MACHINE_SNAPSHOT, id)),
			"rootSnapshotList": roots.iter().map(FakeSnapshot::to_json).collect::<Vec<_>>(),
		});
		self.set_property(vm, "snapshot", value)
	}

	pub fn set_power_state(&mut self, vm: &str, state: &str) -> &mut Self {
		if let Some(runtime) = self.objects.get_mut(vm).and_then(|object| object.properties.get_mut("runtime")) {
			runtime["powerState"] = json!(state);
		}
		self
	}

	pub fn set_property(&mut self, id: &str, name: &str, value: Value) -> &mut Self {
		if let Some(object) = self.objects.get_mut(id) {
			object.properties.insert(name.to_string(), value);
		}
		self
	}

	pub fn property(&self, id: &str, name: &str) -> Option<&Value> {
		self.objects.get(id)?.properties.get(name)
	}

	pub fn contains(&self, id: &str) -> bool {
		self.objects.contains_key(id)
	}

	/// Identifier of the first object named `name`.
	pub fn id_of(&self, name: &str) -> Option<&str> {
		self.objects
			.iter()
			.find(|(_, object)| object.properties.get("name").and_then(Value::as_str) == Some(name))
			.map(|(id, _)| id.as_str())
	}

	fn insert<const N: usize>(&mut self, reference: ManagedObjectReference, properties: [(&str, Value); N]) {
		let properties = properties.into_iter().map(|(k, v)| (k.to_string(), v)).collect();
		self.objects.insert(reference.value.clone(), FakeObject { reference, properties });
	}

	fn reference_json(&self, id: &str) -> Value {
		self.objects.get(id).map(|object| json!(object.reference)).unwrap_or(Value::Null)
	}

	fn attach(&mut self, parent: &str, child: &ManagedObjectReference) {
		let Some(parent) = self.objects.get_mut(parent) else {
			return;
		};
		let key = if parent.reference.is_kind(kinds::VIRTUAL_APP) { "vm" } else { "childEntity" };
		if let Some(Value::Array(children)) = parent.properties.get_mut(key) {
			children.push(json!(child));
		}
	}

	fn detach(&mut self, child: &ManagedObjectReference) {
		for object in self.objects.values_mut() {
			for key in ["childEntity", "vm"] {
				if let Some(Value::Array(children)) = object.properties.get_mut(key) {
					children.retain(|entry| ManagedObjectReference::from_value(entry).as_ref() != Some(child));
				}
			}
		}
	}

	fn reference(&self, id: &str) -> Option<ManagedObjectReference> {
		self.objects.get(id).map(|object| object.reference.clone())
	}
}

impl Default for FakeInventory {
	fn default() -> Self {
		Self::new()
	}
}

/// Snapshot tree node builder.
#[derive(Debug, Clone)]
pub struct FakeSnapshot {
	id: String,
	name: String,
	children: Vec<FakeSnapshot>,
}

impl FakeSnapshot {
	pub fn new(id: &str, name: &str) -> Self {
		Self {
			id: id.to_string(),
			name: name.to_string(),
			children: Vec::new(),
		}
	}

	pub fn child(mut self, child: FakeSnapshot) -> Self {
		self.children.push(child);
		self
	}

	fn to_json(&self) -> Value {
		json!({
			"snapshot": ManagedObjectReference::new(kinds::VIRTUAL_MACHINE_SNAPSHOT, &self.id),
			"name": self.name,
			"createTime": "2024-01-01T10:00:00Z",
			"childSnapshotList": self.children.iter().map(FakeSnapshot::to_json).collect::<Vec<_>>(),
		})
	}
}

/// Scripted login outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoginBehavior {
	Succeed,
	AlwaysFail,
	/// Fail the next `n` logins, then succeed.
	FailTimes(u32),
}

/// Scripted outcome of one `*_Task` method.
#[derive(Debug, Clone)]
pub enum TaskOutcome {
	/// Apply the method's default effect and succeed.
	Succeed,
	/// Fail with this localized message.
	Fail(String),
	/// Apply the effect at once but report `running` for the first `n` reads
	/// of the task's `info`.
	SucceedAfterPolls(u32),
}

/// One recorded `invoke` call.
#[derive(Debug, Clone)]
pub struct Invocation {
	pub object: ManagedObjectReference,
	pub method: String,
	pub body: Value,
}

#[derive(Debug)]
struct Inner {
	inventory: FakeInventory,
	login: LoginBehavior,
	verify_fails: bool,
	unreachable: bool,
	generation: u64,
	opens: u32,
	logins: u32,
	logouts: u32,
	probes: u32,
	task_outcomes: HashMap<String, TaskOutcome>,
	/// Task id to remaining `running` reads.
	pending_tasks: HashMap<String, u32>,
	invocations: Vec<Invocation>,
	next_id: u64,
}

/// Shared controller of the fake endpoint.
#[derive(Debug, Clone)]
pub struct FakeState {
	inner: Arc<Mutex<Inner>>,
}

impl FakeState {
	pub fn new(inventory: FakeInventory) -> Self {
		Self {
			inner: Arc::new(Mutex::new(Inner {
				inventory,
				login: LoginBehavior::Succeed,
				verify_fails: false,
				unreachable: false,
				generation: 0,
				opens: 0,
				logins: 0,
				logouts: 0,
				probes: 0,
				task_outcomes: HashMap::new(),
				pending_tasks: HashMap::new(),
				invocations: Vec::new(),
				next_id: 100,
			})),
		}
	}

	pub fn connector(&self) -> FakeConnector {
		FakeConnector { state: self.clone() }
	}

	/// A handle that is already logged in.
	pub fn api(&self) -> FakeApi {
		let generation = self.inner.lock().generation;
		let api = self.unauthenticated_api();
		*api.session.lock() = Some(generation);
		api
	}

	fn unauthenticated_api(&self) -> FakeApi {
		let root = self.inner.lock().inventory.root().clone();
		FakeApi {
			state: self.clone(),
			root,
			session: Mutex::new(None),
		}
	}

	pub fn set_login(&self, behavior: LoginBehavior) {
		self.inner.lock().login = behavior;
	}

	/// Logins succeed but the follow-up session check reports no session.
	pub fn set_verify_fails(&self, fails: bool) {
		self.inner.lock().verify_fails = fails;
	}

	/// Opening new handles fails with a connection error.
	pub fn set_unreachable(&self, unreachable: bool) {
		self.inner.lock().unreachable = unreachable;
	}

	/// Invalidates every session issued so far, as a server-side timeout would.
	pub fn expire_sessions(&self) {
		self.inner.lock().generation += 1;
	}

	pub fn set_task_outcome(&self, method: &str, outcome: TaskOutcome) {
		self.inner.lock().task_outcomes.insert(method.to_string(), outcome);
	}

	/// Mutates the inventory in place.
	pub fn with_inventory<R>(&self, f: impl FnOnce(&mut FakeInventory) -> R) -> R {
		f(&mut self.inner.lock().inventory)
	}

	pub fn open_calls(&self) -> u32 {
		self.inner.lock().opens
	}

	pub fn login_calls(&self) -> u32 {
		self.inner.lock().logins
	}

	pub fn logout_calls(&self) -> u32 {
		self.inner.lock().logouts
	}

	pub fn session_probes(&self) -> u32 {
		self.inner.lock().probes
	}

	pub fn invocations(&self) -> Vec<Invocation> {
		self.inner.lock().invocations.clone()
	}

	/// Methods invoked so far, in order.
	pub fn invoked_methods(&self) -> Vec<String> {
		self.inner.lock().invocations.iter().map(|call| call.method.clone()).collect()
	}
}

/// Opens [`FakeApi`] handles.
#[derive(Debug, Clone)]
pub struct FakeConnector {
	state: FakeState,
}

#[async_trait]
impl Connector for FakeConnector {
	async fn open(&self, target: &ConnectTarget) -> Result<Arc<dyn ManagementApi>> {
		{
			let mut inner = self.state.inner.lock();
			inner.opens += 1;
			if inner.unreachable {
				return Err(Error::Connection {
					target: target.host.clone(),
					message: "connection refused".into(),
				});
			}
		}
		Ok(Arc::new(self.state.unauthenticated_api()))
	}
}

/// One handle to the fake endpoint.
#[derive(Debug)]
pub struct FakeApi {
	state: FakeState,
	root: ManagedObjectReference,
	/// Session generation this handle authenticated in.
	session: Mutex<Option<u64>>,
}

impl FakeApi {
	fn authenticated(&self, inner: &Inner) -> bool {
		*self.session.lock() == Some(inner.generation)
	}

	fn require_session(&self, inner: &Inner) -> Result<()> {
		if self.authenticated(inner) {
			Ok(())
		} else {
			Err(Error::Authentication("NotAuthenticated: the session is not authenticated".into()))
		}
	}

	fn user_session(name: &str) -> UserSession {
		UserSession {
			key: "52b5e1c4-fake".into(),
			user_name: name.to_string(),
			..UserSession::default()
		}
	}
}

#[async_trait]
impl ManagementApi for FakeApi {
	async fn login(&self, username: &str, _password: &str) -> Result<UserSession> {
		let mut inner = self.state.inner.lock();
		inner.logins += 1;
		let fail = match inner.login {
			LoginBehavior::Succeed => false,
			LoginBehavior::AlwaysFail => true,
			LoginBehavior::FailTimes(0) => false,
			LoginBehavior::FailTimes(n) => {
				inner.login = LoginBehavior::FailTimes(n - 1);
				true
			}
		};
		if fail {
			return Err(Error::Authentication("InvalidLogin: Cannot complete login due to an incorrect user name or password.".into()));
		}
		*self.session.lock() = Some(inner.generation);
		Ok(Self::user_session(username))
	}

	async fn current_session(&self) -> Result<Option<UserSession>> {
		let mut inner = self.state.inner.lock();
		inner.probes += 1;
		if inner.verify_fails || !self.authenticated(&inner) {
			return Ok(None);
		}
		Ok(Some(Self::user_session("administrator@vsphere.local")))
	}

	async fn logout(&self) -> Result<()> {
		let mut inner = self.state.inner.lock();
		inner.logouts += 1;
		let was_valid = self.authenticated(&inner);
		*self.session.lock() = None;
		if was_valid {
			Ok(())
		} else {
			Err(Error::Authentication("NotAuthenticated: session already gone".into()))
		}
	}

	fn root_folder(&self) -> &ManagedObjectReference {
		&self.root
	}

	async fn property(&self, object: &ManagedObjectReference, name: &str) -> Result<Value> {
		let mut inner = self.state.inner.lock();
		self.require_session(&inner)?;
		if name == "info" {
			if let Some(remaining) = inner.pending_tasks.get_mut(&object.value) {
				if *remaining > 0 {
					*remaining -= 1;
					return Ok(json!({ "key": object.value, "state": "running", "progress": 50 }));
				}
			}
		}
		let Some(found) = inner.inventory.objects.get(&object.value) else {
			return Err(Error::Remote {
				fault: "ManagedObjectNotFound".into(),
				message: format!("The object '{object}' has already been deleted or has not been completely created"),
			});
		};
		Ok(found.properties.get(name).cloned().unwrap_or(Value::Null))
	}

	async fn find_by_uuid(&self, _datacenter: Option<&ManagedObjectReference>, uuid: &str) -> Result<Option<ManagedObjectReference>> {
		let inner = self.state.inner.lock();
		self.require_session(&inner)?;
		Ok(inner
			.inventory
			.objects
			.values()
			.filter(|object| object.reference.is_kind(kinds::VIRTUAL_MACHINE))
			.find(|object| object.properties.get("config").and_then(|config| config.get("uuid")).and_then(Value::as_str) == Some(uuid))
			.map(|object| object.reference.clone()))
	}

	async fn invoke(&self, object: &ManagedObjectReference, method: &str, body: Value) -> Result<Value> {
		let mut inner = self.state.inner.lock();
		self.require_session(&inner)?;
		if !inner.inventory.contains(&object.value) {
			return Err(Error::Remote {
				fault: "ManagedObjectNotFound".into(),
				message: format!("The object '{object}' has already been deleted"),
			});
		}
		inner.invocations.push(Invocation {
			object: object.clone(),
			method: method.to_string(),
			body: body.clone(),
		});

		let outcome = inner.task_outcomes.get(method).cloned().unwrap_or(TaskOutcome::Succeed);
		inner.next_id += 1;
		let task_id = format!("task-{}", inner.next_id);
		let info = match outcome {
			TaskOutcome::Fail(message) => json!({
				"key": task_id,
				"state": "error",
				"error": { "localizedMessage": message, "fault": { "_typeName": "SystemError" } },
			}),
			TaskOutcome::Succeed => {
				let result = apply_task(&mut inner, object, method, &body);
				json!({ "key": task_id, "state": "success", "progress": 100, "result": result })
			}
			TaskOutcome::SucceedAfterPolls(polls) => {
				let result = apply_task(&mut inner, object, method, &body);
				inner.pending_tasks.insert(task_id.clone(), polls);
				json!({ "key": task_id, "state": "success", "progress": 100, "result": result })
			}
		};

		let task = ManagedObjectReference::new(kinds::TASK, &task_id);
		inner.inventory.insert(task.clone(), [("info", info)]);
		Ok(json!(task))
	}
}

/// Default effect of a successful task; returns the task result.
fn apply_task(inner: &mut Inner, object: &ManagedObjectReference, method: &str, body: &Value) -> Value {
	inner.next_id += 1;
	let id = inner.next_id;
	let inventory = &mut inner.inventory;
	match method {
		"CreateSnapshot_Task" => {
			let snapshot = ManagedObjectReference::new(kinds::VIRTUAL_MACHINE_SNAPSHOT, format!("snapshot-{id}"));
			let name = body.get("name").and_then(Value::as_str).unwrap_or_default();
			let node = json!({ "snapshot": snapshot, "name": name, "childSnapshotList": [] });
			let tree = inventory.property(&object.value, "snapshot").cloned().unwrap_or(Value::Null);
			let tree = match tree {
				Value::Null => json!({ "currentSnapshot": snapshot, "rootSnapshotList": [node] }),
				mut tree => {
					if let Some(Value::Array(roots)) = tree.get_mut("rootSnapshotList") {
						roots.push(node);
					}
					tree["currentSnapshot"] = json!(snapshot);
					tree
				}
			};
			inventory.set_property(&object.value, "snapshot", tree);
			json!(snapshot)
		}
		"CloneVM_Task" => {
			let clone_id = format!("vm-{id}");
			let name = body.get("name").and_then(Value::as_str).unwrap_or("clone").to_string();
			let folder = body
				.get("folder")
				.and_then(ManagedObjectReference::from_value)
				.map(|folder| folder.value)
				.unwrap_or_else(|| VM_FOLDER.to_string());
			let config = inventory.property(&object.value, "config").cloned();
			inventory.add_vm(&clone_id, &name, &folder);
			if let Some(mut config) = config {
				config["name"] = json!(name);
				config["uuid"] = json!(format!("uuid-{clone_id}"));
				inventory.set_property(&clone_id, "config", config);
			}
			inventory.reference(&clone_id).map(|vm| json!(vm)).unwrap_or(Value::Null)
		}
		"PowerOffVM_Task" => {
			inventory.set_power_state(&object.value, "poweredOff");
			Value::Null
		}
		"PowerOnVM_Task" => {
			inventory.set_power_state(&object.value, "poweredOn");
			Value::Null
		}
		"Destroy_Task" => {
			inventory.detach(object);
			inventory.objects.remove(&object.value);
			Value::Null
		}
		_ => Value::Null,
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[tokio::test]
	async fn expired_sessions_stop_authenticating() {
		let state = FakeState::new(FakeInventory::standard());
		let api = state.api();
		assert!(api.current_session().await.unwrap().is_some());
		assert!(api.property(&ManagedObjectReference::new(kinds::FOLDER, ROOT_FOLDER), "name").await.is_ok());

		state.expire_sessions();
		assert!(api.current_session().await.unwrap().is_none());
		let err = api.property(&ManagedObjectReference::new(kinds::FOLDER, ROOT_FOLDER), "name").await.unwrap_err();
		assert_eq!(err.kind(), crate::ErrorKind::Authentication);
	}

	#[tokio::test]
	async fn failing_tasks_report_their_message() {
		let mut inventory = FakeInventory::standard();
		inventory.add_vm("vm-42", "web01", VM_FOLDER);
		let state = FakeState::new(inventory);
		state.set_task_outcome("Destroy_Task", TaskOutcome::Fail("The operation is not allowed in the current state.".into()));
		let api = state.api();

		let task = api
			.invoke(&ManagedObjectReference::new(kinds::VIRTUAL_MACHINE, "vm-42"), "Destroy_Task", json!({}))
			.await
			.unwrap();
		let task = ManagedObjectReference::from_value(&task).unwrap();
		let info = api.property(&task, "info").await.unwrap();
		assert_eq!(info["state"], "error");
		assert_eq!(info["error"]["localizedMessage"], "The operation is not allowed in the current state.");
		assert_eq!(state.invoked_methods(), vec!["Destroy_Task"]);
	}
}
