use std::collections::{BTreeMap, HashSet, VecDeque};
use std::fmt::Write as _;
use std::sync::Arc;

use serde::Serialize;

use crate::database::models::{AmId, AmParent, DmId, NodeRef, RankCounts};
use crate::database::store::{HierarchyStore, HierarchyTx, StoreError};

/// Where a new AM can still be placed under the fan-out cap.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PlacementCandidates {
    pub dms: Vec<DmId>,
    pub ams: Vec<AmId>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TreeNode {
    pub node: NodeRef,
    pub name: String,
    pub children: Vec<TreeNode>,
}

impl TreeNode {
    /// Indented one-node-per-line rendering.
    pub fn render(&self) -> String {
        let mut out = String::new();
        self.render_into(&mut out, 0);
        out
    }

    fn render_into(&self, out: &mut String, depth: usize) {
        let _ = writeln!(out, "{}{} {}", "  ".repeat(depth), self.node, self.name);
        for child in &self.children {
            child.render_into(out, depth + 1);
        }
    }

    /// Nodes in this subtree, root included.
    pub fn size(&self) -> usize {
        1 + self.children.iter().map(TreeNode::size).sum::<usize>()
    }
}

/// Read-only queries over the hierarchy for reporting.
pub struct DirectoryService {
    store: Arc<dyn HierarchyStore>,
    fan_out_cap: usize,
}

impl DirectoryService {
    pub fn new(store: Arc<dyn HierarchyStore>, fan_out_cap: usize) -> Self {
        Self { store, fan_out_cap }
    }

    /// Direct children. Admins see every CCM; a DM's sub-DMs come before its
    /// AMs.
    pub async fn children(&self, node: NodeRef) -> Result<Vec<NodeRef>, StoreError> {
        let mut tx = self.store.begin().await?;
        let children = children_in(&mut *tx, node).await;
        tx.rollback().await?;
        children
    }

    /// Every descendant, breadth-first.
    pub async fn downline(&self, node: NodeRef) -> Result<Vec<NodeRef>, StoreError> {
        let mut tx = self.store.begin().await?;
        let mut seen = HashSet::from([node]);
        let mut queue = VecDeque::from([node]);
        let mut downline = Vec::new();

        while let Some(current) = queue.pop_front() {
            let children = match children_in(&mut *tx, current).await {
                Ok(children) => children,
                Err(err) => {
                    tx.rollback().await?;
                    return Err(err);
                }
            };
            for child in children {
                if seen.insert(child) {
                    downline.push(child);
                    queue.push_back(child);
                }
            }
        }

        tx.rollback().await?;
        Ok(downline)
    }

    pub async fn counts(&self) -> Result<RankCounts, StoreError> {
        let mut tx = self.store.begin().await?;
        let counts = tx.counts().await;
        tx.rollback().await?;
        counts
    }

    pub async fn placement_candidates(&self) -> Result<PlacementCandidates, StoreError> {
        let mut tx = self.store.begin().await?;
        let dms = tx.dms().await;
        let ams = tx.ams().await;
        tx.rollback().await?;
        let (dms, ams) = (dms?, ams?);

        let mut under_dm: BTreeMap<DmId, usize> = BTreeMap::new();
        let mut under_am: BTreeMap<AmId, usize> = BTreeMap::new();
        for am in &ams {
            match am.parent {
                AmParent::Dm(dm) => *under_dm.entry(dm).or_default() += 1,
                AmParent::Am(parent) => *under_am.entry(parent).or_default() += 1,
                AmParent::Root => {}
            }
        }

        Ok(PlacementCandidates {
            dms: dms
                .iter()
                .map(|dm| dm.id)
                .filter(|id| under_dm.get(id).copied().unwrap_or(0) < self.fan_out_cap)
                .collect(),
            ams: ams
                .iter()
                .map(|am| am.id)
                .filter(|id| under_am.get(id).copied().unwrap_or(0) < self.fan_out_cap)
                .collect(),
        })
    }

    /// The whole forest from one snapshot: admins, CCMs with their subtrees,
    /// then DMs and AMs that have no parent.
    pub async fn tree(&self) -> Result<Vec<TreeNode>, StoreError> {
        let mut tx = self.store.begin().await?;
        let snapshot = Snapshot::load(&mut *tx).await;
        tx.rollback().await?;
        Ok(snapshot?.forest())
    }
}

async fn children_in(tx: &mut dyn HierarchyTx, node: NodeRef) -> Result<Vec<NodeRef>, StoreError> {
    let children = match node {
        NodeRef::Admin(_) => tx.ccms().await?.into_iter().map(|ccm| NodeRef::Ccm(ccm.id)).collect(),
        NodeRef::Ccm(id) => tx.dm_ids_under_ccm(id).await?.into_iter().map(NodeRef::Dm).collect(),
        NodeRef::Dm(id) => {
            let mut children: Vec<NodeRef> = tx.sub_dm_ids(id).await?.into_iter().map(NodeRef::Dm).collect();
            children.extend(tx.am_ids_under_dm(id).await?.into_iter().map(NodeRef::Am));
            children
        }
        NodeRef::Am(id) => tx.sub_am_ids(id).await?.into_iter().map(NodeRef::Am).collect(),
    };
    Ok(children)
}

#[derive(Default)]
struct Snapshot {
    names: BTreeMap<NodeRef, String>,
    children: BTreeMap<NodeRef, Vec<NodeRef>>,
    roots: Vec<NodeRef>,
}

impl Snapshot {
    async fn load(tx: &mut dyn HierarchyTx) -> Result<Self, StoreError> {
        let mut snapshot = Snapshot::default();

        for admin in tx.admins().await? {
            let node = NodeRef::Admin(admin.id);
            snapshot.names.insert(node, admin.profile.name);
            snapshot.roots.push(node);
        }
        for ccm in tx.ccms().await? {
            let node = NodeRef::Ccm(ccm.id);
            snapshot.names.insert(node, ccm.profile.name);
            snapshot.roots.push(node);
        }

        let mut dm_roots = Vec::new();
        for dm in tx.dms().await? {
            let node = NodeRef::Dm(dm.id);
            snapshot.names.insert(node, dm.profile.name);
            match dm.parent.node() {
                Some(parent) => snapshot.children.entry(parent).or_default().push(node),
                None => dm_roots.push(node),
            }
        }

        let mut am_roots = Vec::new();
        for am in tx.ams().await? {
            let node = NodeRef::Am(am.id);
            snapshot.names.insert(node, am.profile.name);
            match am.parent.node() {
                Some(parent) => snapshot.children.entry(parent).or_default().push(node),
                None => am_roots.push(node),
            }
        }

        snapshot.roots.extend(dm_roots);
        snapshot.roots.extend(am_roots);
        Ok(snapshot)
    }

    fn forest(&self) -> Vec<TreeNode> {
        let mut visited = HashSet::new();
        self.roots
            .iter()
            .filter_map(|root| self.build(*root, &mut visited))
            .collect()
    }

    fn build(&self, node: NodeRef, visited: &mut HashSet<NodeRef>) -> Option<TreeNode> {
        if !visited.insert(node) {
            return None;
        }
        let children = self
            .children
            .get(&node)
            .map(|children| {
                children
                    .iter()
                    .filter_map(|child| self.build(*child, visited))
                    .collect()
            })
            .unwrap_or_default();
        Some(TreeNode {
            node,
            name: self.names.get(&node).cloned().unwrap_or_default(),
            children,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::models::{AdminId, CcmId};

    #[test]
    fn render_indents_by_depth() {
        let tree = TreeNode {
            node: NodeRef::Ccm(CcmId(1)),
            name: "Asha".to_string(),
            children: vec![TreeNode {
                node: NodeRef::Dm(DmId(3)),
                name: "Ravi".to_string(),
                children: vec![TreeNode {
                    node: NodeRef::Am(AmId(7)),
                    name: "Meena".to_string(),
                    children: Vec::new(),
                }],
            }],
        };
        assert_eq!(tree.render(), "ccm#1 Asha\n  dm#3 Ravi\n    am#7 Meena\n");
        assert_eq!(tree.size(), 3);
    }

    #[test]
    fn forest_skips_revisited_nodes() {
        let admin = NodeRef::Admin(AdminId(1));
        let mut snapshot = Snapshot::default();
        snapshot.names.insert(admin, "Root".to_string());
        snapshot.roots = vec![admin, admin];
        assert_eq!(snapshot.forest().len(), 1);
    }
}
