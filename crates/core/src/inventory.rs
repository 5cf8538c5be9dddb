//! Inventory tree walking on top of property reads.

use std::collections::VecDeque;

use snapview_protocol::{ManagedObjectReference, kinds};
use tracing::{debug, trace};

use crate::api::{self, ManagementApi};
use crate::error::{Error, Result};

/// A data-center and its name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Datacenter {
	pub reference: ManagedObjectReference,
	pub name: String,
}

/// Direct children of a folder (`childEntity`), a vApp (`vm`) or nothing.
pub async fn children(api: &dyn ManagementApi, container: &ManagedObjectReference) -> Result<Vec<ManagedObjectReference>> {
	if container.is_kind(kinds::FOLDER) {
		api::references(api, container, "childEntity").await
	} else if container.is_kind(kinds::VIRTUAL_APP) {
		api::references(api, container, "vm").await
	} else {
		Ok(Vec::new())
	}
}

/// Every data-center reachable from the root folder, in breadth-first order.
pub async fn datacenters(api: &dyn ManagementApi) -> Result<Vec<Datacenter>> {
	let mut found = Vec::new();
	let mut queue = VecDeque::from([api.root_folder().clone()]);
	while let Some(container) = queue.pop_front() {
		for child in children(api, &container).await? {
			if child.is_kind(kinds::DATACENTER) {
				let name = api::object_name(api, &child).await?;
				found.push(Datacenter { reference: child, name });
			} else if child.is_kind(kinds::FOLDER) {
				queue.push_back(child);
			}
		}
	}
	Ok(found)
}

/// The data-center named `preferred`, or the only one when no name is given.
pub async fn default_datacenter(api: &dyn ManagementApi, preferred: Option<&str>) -> Result<Datacenter> {
	let mut all = datacenters(api).await?;
	if let Some(name) = preferred {
		return all
			.into_iter()
			.find(|dc| dc.name == name)
			.ok_or_else(|| Error::not_found("datacenter", name));
	}
	match all.len() {
		0 => Err(Error::not_found("datacenter", "<default>")),
		1 => Ok(all.remove(0)),
		_ => Err(Error::Config(format!(
			"multiple datacenters found ({}); set vcenter.datacenter",
			all.iter().map(|dc| dc.name.as_str()).collect::<Vec<_>>().join(", ")
		))),
	}
}

async fn vm_folder(api: &dyn ManagementApi, datacenter: &Datacenter) -> Result<ManagedObjectReference> {
	api::reference(api, &datacenter.reference, "vmFolder")
		.await?
		.ok_or_else(|| Error::Protocol(format!("datacenter {} has no vmFolder", datacenter.name)))
}

/// Breadth-first search of the data-center's VM folder, descending into
/// sub-folders and vApps. The first VM whose name equals `name` wins.
pub async fn find_vm(api: &dyn ManagementApi, datacenter: &Datacenter, name: &str) -> Result<Option<ManagedObjectReference>> {
	let mut queue = VecDeque::from([vm_folder(api, datacenter).await?]);
	while let Some(container) = queue.pop_front() {
		for child in children(api, &container).await? {
			if child.is_kind(kinds::VIRTUAL_MACHINE) {
				let candidate = api::object_name(api, &child).await?;
				trace!(target = "snapview.resolver", vm = %child, name = %candidate, "visiting vm");
				if candidate == name {
					return Ok(Some(child));
				}
			} else if child.is_kind(kinds::FOLDER) || child.is_kind(kinds::VIRTUAL_APP) {
				queue.push_back(child);
			}
		}
	}
	Ok(None)
}

/// Every VM under the data-center's VM folder, in the same breadth-first
/// order [`find_vm`] visits them.
pub async fn vms(api: &dyn ManagementApi, datacenter: &Datacenter) -> Result<Vec<ManagedObjectReference>> {
	let mut found = Vec::new();
	let mut queue = VecDeque::from([vm_folder(api, datacenter).await?]);
	while let Some(container) = queue.pop_front() {
		for child in children(api, &container).await? {
			if child.is_kind(kinds::VIRTUAL_MACHINE) {
				found.push(child);
			} else if child.is_kind(kinds::FOLDER) || child.is_kind(kinds::VIRTUAL_APP) {
				queue.push_back(child);
			}
		}
	}
	debug!(target = "snapview.resolver", datacenter = %datacenter.name, count = found.len(), "listed vms");
	Ok(found)
}

/// Slash-delimited inventory path, e.g. `/dc1/host/cluster1/esx01.example.com`.
///
/// Built from `parent` pointers up to, but excluding, the root folder.
pub async fn inventory_path(api: &dyn ManagementApi, object: &ManagedObjectReference) -> Result<String> {
	let root = api.root_folder();
	let mut names = Vec::new();
	let mut cursor = Some(object.clone());

	while let Some(current) = cursor {
		if &current == root {
			break;
		}
		names.push(api::object_name(api, &current).await?);
		cursor = api::reference(api, &current, "parent").await?;
	}

	names.reverse();
	let path = format!("/{}", names.join("/"));
	debug!(target = "snapview.resolver", object = %object, %path, "inventory path");
	Ok(path)
}
