//! Depth-ordered grouping of a service subtree.
//!
//! Group `k` holds the attachments of the nodes at the `k`-th non-empty depth
//! below the run root. Depths without attachments do not produce a group, so
//! every index in `0..=last_group_index` addresses a non-empty group.

use crate::error::Result;
use crate::tree::{NodeId, ResourceAttachment, ServiceTree};
use crate::types::Direction;
use serde::Serialize;
use std::collections::BTreeMap;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Group {
    /// Depth below the run root the group was taken from.
    pub depth: usize,
    pub attachments: Vec<ResourceAttachment>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GroupPartition {
    root: NodeId,
    groups: Vec<Group>,
}

impl GroupPartition {
    /// Partition the subtree of `root` for the current tree snapshot.
    pub fn build(tree: &ServiceTree, root: NodeId) -> Result<Self> {
        let mut by_depth: BTreeMap<usize, Vec<ResourceAttachment>> = BTreeMap::new();
        for (node, depth) in tree.subtree_with_depth(root)? {
            let attachments = &tree.get(node)?.attachments;
            if !attachments.is_empty() {
                by_depth
                    .entry(depth)
                    .or_default()
                    .extend(attachments.iter().cloned());
            }
        }
        let groups = by_depth
            .into_iter()
            .map(|(depth, attachments)| Group { depth, attachments })
            .collect();
        Ok(Self { root, groups })
    }

    pub fn root(&self) -> NodeId {
        self.root
    }

    pub fn groups(&self) -> &[Group] {
        &self.groups
    }

    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }

    pub fn group(&self, index: usize) -> Option<&Group> {
        self.groups.get(index)
    }

    /// Index of the last group, `None` when the subtree owns no resources.
    pub fn last_group_index(&self) -> Option<usize> {
        self.groups.len().checked_sub(1)
    }

    /// Where a run walking in `direction` begins.
    pub fn first_group_index(&self, direction: Direction) -> Option<usize> {
        match direction {
            Direction::Forward if !self.is_empty() => Some(0),
            Direction::Forward => None,
            Direction::Backward => self.last_group_index(),
        }
    }

    /// `current + direction` when that group exists, `None` when the run is done.
    pub fn next_group_index(&self, current: usize, direction: Direction) -> Option<usize> {
        let next = match direction {
            Direction::Forward => current.checked_add(1)?,
            Direction::Backward => current.checked_sub(1)?,
        };
        (next < self.groups.len()).then_some(next)
    }

    /// Map a group index received from the queue onto this snapshot.
    ///
    /// The tree may have shrunk since the stage was queued: a backward run
    /// resumes from the last group, a forward run past the end has nothing
    /// left to do.
    pub fn resume_index(&self, requested: usize, direction: Direction) -> Option<usize> {
        let last = self.last_group_index()?;
        if requested <= last {
            return Some(requested);
        }
        match direction {
            Direction::Backward => Some(last),
            Direction::Forward => None,
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tree::ResourceRef;

    fn vm(id: u64) -> ResourceRef {
        ResourceRef::Vm { id }
    }

    /// R(V1) -> C(V2) -> G()
    fn scenario() -> (ServiceTree, NodeId) {
        let mut tree = ServiceTree::new();
        let r = tree.add_service("R", None).unwrap();
        let c = tree.add_service("C", Some(r)).unwrap();
        tree.add_service("G", Some(c)).unwrap();
        tree.attach(r, vm(1)).unwrap();
        tree.attach(c, vm(2)).unwrap();
        (tree, r)
    }

    fn ids(group: &Group) -> Vec<u64> {
        group.attachments.iter().map(|a| a.resource.id()).collect()
    }

    #[test]
    fn scenario_groups_by_depth() {
        let (tree, r) = scenario();
        let p = GroupPartition::build(&tree, r).unwrap();
        assert_eq!(p.groups().len(), 2);
        assert_eq!(ids(p.group(0).unwrap()), vec![1]);
        assert_eq!(ids(p.group(1).unwrap()), vec![2]);
        assert_eq!(p.last_group_index(), Some(1));
        assert_eq!(p.next_group_index(0, Direction::Forward), Some(1));
        assert_eq!(p.next_group_index(1, Direction::Forward), None);
        assert_eq!(p.next_group_index(1, Direction::Backward), Some(0));
        assert_eq!(p.next_group_index(0, Direction::Backward), None);
    }

    #[test]
    fn empty_depths_are_skipped() {
        // R() -> A() -> B(V3); R -> C(V4) ; B sits at depth 2, C at depth 1
        let mut tree = ServiceTree::new();
        let r = tree.add_service("R", None).unwrap();
        let a = tree.add_service("A", Some(r)).unwrap();
        let b = tree.add_service("B", Some(a)).unwrap();
        let c = tree.add_service("C", Some(r)).unwrap();
        tree.attach(b, vm(3)).unwrap();
        tree.attach(c, vm(4)).unwrap();

        let p = GroupPartition::build(&tree, r).unwrap();
        assert_eq!(p.last_group_index(), Some(1));
        assert_eq!(p.group(0).unwrap().depth, 1);
        assert_eq!(ids(p.group(0).unwrap()), vec![4]);
        assert_eq!(p.group(1).unwrap().depth, 2);
        assert_eq!(ids(p.group(1).unwrap()), vec![3]);
        for g in p.groups() {
            assert!(!g.attachments.is_empty());
        }
    }

    #[test]
    fn tree_without_attachments_has_no_groups() {
        let mut tree = ServiceTree::new();
        let r = tree.add_service("R", None).unwrap();
        tree.add_service("C", Some(r)).unwrap();
        let p = GroupPartition::build(&tree, r).unwrap();
        assert!(p.is_empty());
        assert_eq!(p.last_group_index(), None);
        assert_eq!(p.first_group_index(Direction::Forward), None);
        assert_eq!(p.first_group_index(Direction::Backward), None);
        assert_eq!(p.next_group_index(0, Direction::Forward), None);
    }

    #[test]
    fn next_index_always_in_range() {
        let (tree, r) = scenario();
        let p = GroupPartition::build(&tree, r).unwrap();
        let last = p.last_group_index().unwrap();
        for current in 0..=last + 3 {
            for d in [Direction::Forward, Direction::Backward] {
                if let Some(next) = p.next_group_index(current, d) {
                    assert!(next <= last);
                    assert!(!p.group(next).unwrap().attachments.is_empty());
                }
            }
        }
    }

    #[test]
    fn partition_is_stable_for_a_snapshot() {
        let (tree, r) = scenario();
        let a = GroupPartition::build(&tree, r).unwrap();
        let b = GroupPartition::build(&tree, r).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn sibling_order_follows_preorder() {
        let mut tree = ServiceTree::new();
        let r = tree.add_service("R", None).unwrap();
        let x = tree.add_service("X", Some(r)).unwrap();
        let y = tree.add_service("Y", Some(r)).unwrap();
        tree.attach(y, vm(20)).unwrap();
        tree.attach(x, vm(10)).unwrap();
        tree.attach(x, vm(11)).unwrap();
        let p = GroupPartition::build(&tree, r).unwrap();
        assert_eq!(ids(p.group(0).unwrap()), vec![10, 11, 20]);
    }

    #[test]
    fn resume_index_clamps_backward_runs() {
        let (tree, r) = scenario();
        let p = GroupPartition::build(&tree, r).unwrap();
        assert_eq!(p.resume_index(1, Direction::Forward), Some(1));
        assert_eq!(p.resume_index(5, Direction::Backward), Some(1));
        assert_eq!(p.resume_index(5, Direction::Forward), None);
    }
}
