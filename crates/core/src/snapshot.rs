//! Snapshot trees as plain values.

use serde::Serialize;
use snapview_protocol::{ManagedObjectReference, VirtualMachineSnapshotTree};

/// One snapshot and its descendants.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SnapshotNode {
	pub reference: ManagedObjectReference,
	pub name: String,
	pub description: Option<String>,
	pub created: Option<String>,
	pub children: Vec<SnapshotNode>,
}

impl SnapshotNode {
	pub fn new(reference: ManagedObjectReference, name: impl Into<String>, children: Vec<SnapshotNode>) -> Self {
		Self {
			reference,
			name: name.into(),
			description: None,
			created: None,
			children,
		}
	}

	pub fn id(&self) -> &str {
		&self.reference.value
	}
}

impl From<&VirtualMachineSnapshotTree> for SnapshotNode {
	fn from(tree: &VirtualMachineSnapshotTree) -> Self {
		Self {
			reference: tree.snapshot.clone(),
			name: tree.name.clone(),
			description: tree.description.clone().filter(|d| !d.is_empty()),
			created: tree.create_time.clone(),
			children: tree.child_snapshot_list.iter().map(SnapshotNode::from).collect(),
		}
	}
}

/// Depth-first, pre-order search across every root and all descendants.
/// Returns the first node named `name`.
pub fn find_snapshot<'a>(roots: &'a [SnapshotNode], name: &str) -> Option<&'a SnapshotNode> {
	roots.iter().find_map(|node| {
		if node.name == name {
			Some(node)
		} else {
			find_snapshot(&node.children, name)
		}
	})
}

/// Flat listing entry for display.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SnapshotSummary {
	pub id: String,
	pub name: String,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub description: Option<String>,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub created: Option<String>,
	pub depth: usize,
	pub current: bool,
}

/// Pre-order flattening; `current` marks the VM's current snapshot.
pub fn flatten(roots: &[SnapshotNode], current: Option<&ManagedObjectReference>) -> Vec<SnapshotSummary> {
	let mut out = Vec::new();
	let mut stack: Vec<(&SnapshotNode, usize)> = roots.iter().rev().map(|node| (node, 0)).collect();
	while let Some((node, depth)) = stack.pop() {
		out.push(SnapshotSummary {
			id: node.id().to_string(),
			name: node.name.clone(),
			description: node.description.clone(),
			created: node.created.clone(),
			depth,
			current: current.is_some_and(|c| c == &node.reference),
		});
		stack.extend(node.children.iter().rev().map(|child| (child, depth + 1)));
	}
	out
}
