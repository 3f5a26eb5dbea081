//! Persisted forest of service nodes.
//!
//! Parent/child edges are plain id references in a node table; subtree,
//! descendant and ancestor queries are computed on demand. Removing a node
//! removes its whole subtree.

use crate::error::{Result, TreeopsError};
use crate::inventory::VmId;
use crate::paths;
use crate::types::ResourceKind;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;

pub type NodeId = u64;

// ---------------------------------------------------------------------------
// ResourceRef / ResourceAttachment
// ---------------------------------------------------------------------------

/// A controllable resource owned by a service node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ResourceRef {
    Vm { id: VmId },
    /// Another service node driven as a nested resource.
    Service { id: NodeId },
}

impl ResourceRef {
    pub fn kind(&self) -> ResourceKind {
        match self {
            ResourceRef::Vm { .. } => ResourceKind::Vm,
            ResourceRef::Service { .. } => ResourceKind::Service,
        }
    }

    pub fn id(&self) -> u64 {
        match self {
            ResourceRef::Vm { id } | ResourceRef::Service { id } => *id,
        }
    }
}

impl fmt::Display for ResourceRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.kind().label(), self.id())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceAttachment {
    pub owner: NodeId,
    pub resource: ResourceRef,
}

impl ResourceAttachment {
    pub fn kind(&self) -> ResourceKind {
        self.resource.kind()
    }
}

// ---------------------------------------------------------------------------
// ServiceNode
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceNode {
    pub id: NodeId,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent: Option<NodeId>,
    #[serde(default)]
    pub attachments: Vec<ResourceAttachment>,
    pub created_at: DateTime<Utc>,
}

impl ServiceNode {
    pub fn has_parent(&self) -> bool {
        self.parent.is_some()
    }

    pub fn direct_vms(&self) -> Vec<VmId> {
        self.attachments
            .iter()
            .filter_map(|a| match a.resource {
                ResourceRef::Vm { id } => Some(id),
                ResourceRef::Service { .. } => None,
            })
            .collect()
    }
}

// ---------------------------------------------------------------------------
// ServiceTree
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceTree {
    #[serde(default = "default_version")]
    pub version: u32,
    #[serde(default = "default_next_id")]
    pub next_id: NodeId,
    #[serde(default)]
    pub nodes: BTreeMap<NodeId, ServiceNode>,
    pub last_updated: DateTime<Utc>,
}

fn default_version() -> u32 {
    1
}

fn default_next_id() -> NodeId {
    1
}

impl Default for ServiceTree {
    fn default() -> Self {
        Self::new()
    }
}

impl ServiceTree {
    pub fn new() -> Self {
        Self {
            version: 1,
            next_id: 1,
            nodes: BTreeMap::new(),
            last_updated: Utc::now(),
        }
    }

    // -----------------------------------------------------------------------
    // Persistence
    // -----------------------------------------------------------------------

    pub fn load(root: &Path) -> Result<Self> {
        let path = paths::tree_path(root);
        if !path.exists() {
            return Err(TreeopsError::NotInitialized);
        }
        let data = std::fs::read_to_string(&path)?;
        let tree: ServiceTree = serde_yaml::from_str(&data)?;
        Ok(tree)
    }

    pub fn save(&self, root: &Path) -> Result<()> {
        let path = paths::tree_path(root);
        let data = serde_yaml::to_string(self)?;
        crate::io::atomic_write(&path, data.as_bytes())
    }

    // -----------------------------------------------------------------------
    // Structure
    // -----------------------------------------------------------------------

    pub fn add_service(&mut self, name: impl Into<String>, parent: Option<NodeId>) -> Result<NodeId> {
        if let Some(p) = parent {
            self.get(p)?;
        }
        let id = self.next_id;
        self.next_id += 1;
        self.nodes.insert(
            id,
            ServiceNode {
                id,
                name: name.into(),
                parent,
                attachments: Vec::new(),
                created_at: Utc::now(),
            },
        );
        self.last_updated = Utc::now();
        Ok(id)
    }

    /// Remove a node and its whole subtree. Attachments elsewhere that point
    /// at a removed node as a nested service are dropped as well.
    ///
    /// Returns the removed ids in pre-order.
    pub fn remove_service(&mut self, id: NodeId) -> Result<Vec<NodeId>> {
        let removed = self.subtree(id)?;
        for node_id in &removed {
            self.nodes.remove(node_id);
        }
        for node in self.nodes.values_mut() {
            node.attachments.retain(|a| match a.resource {
                ResourceRef::Service { id } => !removed.contains(&id),
                ResourceRef::Vm { .. } => true,
            });
        }
        self.last_updated = Utc::now();
        Ok(removed)
    }

    pub fn get(&self, id: NodeId) -> Result<&ServiceNode> {
        self.nodes.get(&id).ok_or(TreeopsError::ServiceNotFound(id))
    }

    pub fn contains(&self, id: NodeId) -> bool {
        self.nodes.contains_key(&id)
    }

    pub fn roots(&self) -> Vec<&ServiceNode> {
        self.nodes.values().filter(|n| n.parent.is_none()).collect()
    }

    /// Direct children, ordered by id.
    pub fn children(&self, id: NodeId) -> Vec<&ServiceNode> {
        self.nodes
            .values()
            .filter(|n| n.parent == Some(id))
            .collect()
    }

    /// The node itself followed by every descendant, pre-order.
    pub fn subtree(&self, id: NodeId) -> Result<Vec<NodeId>> {
        Ok(self
            .subtree_with_depth(id)?
            .into_iter()
            .map(|(node, _)| node)
            .collect())
    }

    /// Pre-order walk of the subtree, pairing each node with its depth
    /// relative to `id` (which is depth 0).
    pub fn subtree_with_depth(&self, id: NodeId) -> Result<Vec<(NodeId, usize)>> {
        self.get(id)?;
        let mut out: Vec<(NodeId, usize)> = Vec::new();
        let mut stack = vec![(id, 0usize)];
        while let Some((node, depth)) = stack.pop() {
            // A hand-edited parent cycle must not loop forever.
            if out.iter().any(|(seen, _)| *seen == node) {
                continue;
            }
            out.push((node, depth));
            // Reverse so the lowest id is visited first.
            for child in self.children(node).into_iter().rev() {
                stack.push((child.id, depth + 1));
            }
        }
        Ok(out)
    }

    pub fn descendants(&self, id: NodeId) -> Result<Vec<NodeId>> {
        let mut all = self.subtree(id)?;
        all.remove(0);
        Ok(all)
    }

    /// Ancestors from the parent up to the root.
    pub fn ancestors(&self, id: NodeId) -> Result<Vec<NodeId>> {
        let mut out = Vec::new();
        let mut current = self.get(id)?.parent;
        while let Some(p) = current {
            if out.contains(&p) {
                break;
            }
            out.push(p);
            current = self.nodes.get(&p).and_then(|n| n.parent);
        }
        Ok(out)
    }

    pub fn root_of(&self, id: NodeId) -> Result<NodeId> {
        Ok(self.ancestors(id)?.last().copied().unwrap_or(id))
    }

    // -----------------------------------------------------------------------
    // Attachments
    // -----------------------------------------------------------------------

    pub fn owner_of(&self, resource: &ResourceRef) -> Option<NodeId> {
        self.nodes
            .values()
            .find(|n| n.attachments.iter().any(|a| a.resource == *resource))
            .map(|n| n.id)
    }

    /// Every node a run rooted at `id` acts on: its subtree plus, transitively,
    /// the subtrees of nested services attached anywhere in it.
    pub fn reachable(&self, id: NodeId) -> Result<Vec<NodeId>> {
        self.get(id)?;
        let mut seen = Vec::new();
        let mut pending = vec![id];
        while let Some(next) = pending.pop() {
            if !self.contains(next) {
                continue;
            }
            for node in self.subtree(next)? {
                if seen.contains(&node) {
                    continue;
                }
                seen.push(node);
                for a in &self.get(node)?.attachments {
                    if let ResourceRef::Service { id } = a.resource {
                        pending.push(id);
                    }
                }
            }
        }
        Ok(seen)
    }

    /// Attach a resource to `node`. A resource belongs to at most one node,
    /// and a nested service may not sit in its owner's ancestry or subtree.
    pub fn attach(&mut self, node: NodeId, resource: ResourceRef) -> Result<()> {
        self.get(node)?;
        if let Some(owner) = self.owner_of(&resource) {
            return Err(TreeopsError::AlreadyAttached(format!(
                "{} <{}> is already connected to service {}.",
                resource.kind().label(),
                resource.id(),
                owner
            )));
        }
        if let ResourceRef::Service { id } = resource {
            self.get(id)?;
            if self.subtree(node)?.contains(&id) || self.ancestors(node)?.contains(&id) {
                return Err(TreeopsError::InvalidAttachment(format!(
                    "service {id} is in the hierarchy of service {node}"
                )));
            }
            let driven = self.reachable(id)?;
            if driven.contains(&node) || self.ancestors(node)?.iter().any(|a| driven.contains(a)) {
                return Err(TreeopsError::InvalidAttachment(format!(
                    "service {id} already drives service {node}"
                )));
            }
        }
        if let Some(n) = self.nodes.get_mut(&node) {
            n.attachments.push(ResourceAttachment {
                owner: node,
                resource,
            });
        }
        self.last_updated = Utc::now();
        Ok(())
    }

    pub fn detach(&mut self, node: NodeId, resource: ResourceRef) -> Result<()> {
        let n = self
            .nodes
            .get_mut(&node)
            .ok_or(TreeopsError::ServiceNotFound(node))?;
        let before = n.attachments.len();
        n.attachments.retain(|a| a.resource != resource);
        if n.attachments.len() == before {
            return Err(TreeopsError::NotAttached {
                service: node,
                resource: resource.to_string(),
            });
        }
        self.last_updated = Utc::now();
        Ok(())
    }

    /// Every VM in the subtree of `id`, in pre-order.
    pub fn all_vms(&self, id: NodeId) -> Result<Vec<VmId>> {
        let mut vms = Vec::new();
        for node in self.subtree(id)? {
            vms.extend(self.get(node)?.direct_vms());
        }
        Ok(vms)
    }

    pub fn total_vms(&self, id: NodeId) -> Result<usize> {
        Ok(self.all_vms(id)?.len())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
