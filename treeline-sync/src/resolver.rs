//! IdentityResolver: map every source node to a target document.
//!
//! Priority per node (project root matched by convention):
//! 1. stored back-reference to a live target; several claimants of one
//!    target are tie-broken by reverse match, then ancestor names, then name
//! 2. a live target whose back-reference is this node
//! 3. an unclaimed live target with the same name
//! 4. an archived target to restore, else create
//!
//! Excluded and out-of-scope nodes take part in steps 1-3 so the targets
//! they own are never treated as deleted. In step 3 they come after every
//! active node.

use std::collections::{BTreeMap, HashMap};

use treeline_core::types::{TargetEntity, TargetId, TargetKind};

use crate::context::SyncContext;
use crate::report::Finding;
use crate::target_index::TargetIndex;
use crate::tree::{NodeIdx, SourceTree};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    /// Matched a live target.
    Existing(TargetId),
    /// Matched an archived target that will be restored in place.
    Restore(TargetId),
    Create,
}

impl Resolution {
    pub fn target(&self) -> Option<&TargetId> {
        match self {
            Resolution::Existing(id) | Resolution::Restore(id) => Some(id),
            Resolution::Create => None,
        }
    }
}

/// Source node ⇄ target id bijection for one run.
#[derive(Debug, Clone, Default)]
pub struct IdentityMap {
    by_node: HashMap<NodeIdx, Resolution>,
    by_target: HashMap<TargetId, NodeIdx>,
}

impl IdentityMap {
    pub fn get(&self, idx: NodeIdx) -> Option<&Resolution> {
        self.by_node.get(&idx)
    }

    pub fn target_of(&self, idx: NodeIdx) -> Option<&TargetId> {
        self.get(idx).and_then(Resolution::target)
    }

    pub fn node_of(&self, id: &TargetId) -> Option<NodeIdx> {
        self.by_target.get(id).copied()
    }

    pub fn is_claimed(&self, id: &TargetId) -> bool {
        self.by_target.contains_key(id)
    }

    /// Set the resolution of `idx`, releasing any target it held before.
    pub fn assign(&mut self, idx: NodeIdx, resolution: Resolution) {
        if let Some(old) = self.by_node.get(&idx).and_then(Resolution::target) {
            self.by_target.remove(old);
        }
        if let Some(id) = resolution.target() {
            self.by_target.insert(id.clone(), idx);
        }
        self.by_node.insert(idx, resolution);
    }

    pub fn len(&self) -> usize {
        self.by_node.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_node.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (NodeIdx, &Resolution)> {
        self.by_node.iter().map(|(&idx, r)| (idx, r))
    }
}

/// Output of [`resolve`].
#[derive(Debug, Clone, Default)]
pub struct Resolved {
    pub identities: IdentityMap,
    /// Live assets nobody claimed, parents before children.
    pub unclaimed: Vec<TargetId>,
}

pub fn resolve(ctx: &mut SyncContext<'_>, tree: &SourceTree, index: &TargetIndex) -> Resolved {
    let mut ids = IdentityMap::default();
    let root = tree.root();
    match index.project() {
        Some(project) => ids.assign(root, Resolution::Existing(project.id.clone())),
        None => ids.assign(root, Resolution::Create),
    }

    let order: Vec<NodeIdx> = tree.bfs().into_iter().filter(|&i| i != root).collect();

    // Step 1: stored back-references, one winner per target.
    let mut claimants: BTreeMap<TargetId, Vec<NodeIdx>> = BTreeMap::new();
    for &idx in &order {
        if let Some(id) = &tree.node(idx).back_reference {
            if index
                .get_live(id)
                .is_some_and(|e| e.kind == TargetKind::Asset)
            {
                claimants.entry(id.clone()).or_default().push(idx);
            }
        }
    }
    for (id, nodes) in &claimants {
        let Some(target) = index.get(id) else {
            continue;
        };
        let winner = pick_claimant(tree, target, nodes);
        if nodes.len() > 1 {
            let losers = nodes
                .iter()
                .filter(|&&n| Some(n) != winner)
                .map(|&n| tree.path(n))
                .collect::<Vec<_>>();
            ctx.reporter.push_many(Finding::IdentityConflict, losers);
        }
        if let Some(winner) = winner {
            tracing::debug!(path = %tree.path(winner), target = %id, "existing (by back-reference)");
            ids.assign(winner, Resolution::Existing(id.clone()));
        }
    }

    // Step 2: reverse references.
    for &idx in &order {
        if ids.get(idx).is_some() {
            continue;
        }
        let by_reverse = tree.node(idx).source_id().and_then(|sid| {
            index
                .by_back_reference(sid)
                .find(|e| e.kind == TargetKind::Asset && !ids.is_claimed(&e.id))
        });
        if let Some(target) = by_reverse {
            tracing::debug!(path = %tree.path(idx), target = %target.id, "existing (by reverse reference)");
            ids.assign(idx, Resolution::Existing(target.id.clone()));
        }
    }

    // Steps 3-4. Active nodes pick by name first; an excluded node never
    // takes a name ahead of an active one.
    let (active, inactive): (Vec<NodeIdx>, Vec<NodeIdx>) =
        order.iter().copied().partition(|&idx| tree.is_active(idx));
    for idx in active.into_iter().chain(inactive) {
        if ids.get(idx).is_some() {
            continue;
        }
        let node = tree.node(idx);

        let by_name = index
            .by_name(&node.name)
            .find(|e| e.kind == TargetKind::Asset && !ids.is_claimed(&e.id));
        if let Some(target) = by_name {
            tracing::debug!(path = %tree.path(idx), target = %target.id, "existing (by name)");
            ids.assign(idx, Resolution::Existing(target.id.clone()));
            continue;
        }

        if !node.is_active() {
            continue;
        }
        match find_restorable(tree, idx, index, &ids) {
            Some(id) => {
                tracing::debug!(path = %tree.path(idx), target = %id, "archived match");
                ids.assign(idx, Resolution::Restore(id));
            }
            None => {
                tracing::debug!(path = %tree.path(idx), "new");
                ids.assign(idx, Resolution::Create);
            }
        }
    }

    let mut unclaimed: Vec<&TargetEntity> = index.live().filter(|e| !ids.is_claimed(&e.id)).collect();
    unclaimed.sort_by(|a, b| {
        (index.depth(&a.id), &a.name, &a.id).cmp(&(index.depth(&b.id), &b.name, &b.id))
    });
    for target in &unclaimed {
        tracing::debug!(path = %target.display_path(), "unclaimed");
    }

    Resolved {
        identities: ids,
        unclaimed: unclaimed.into_iter().map(|e| e.id.clone()).collect(),
    }
}

/// Winner among the nodes whose stored back-reference names `target`.
/// A sole claimant always wins.
pub fn pick_claimant(tree: &SourceTree, target: &TargetEntity, claimants: &[NodeIdx]) -> Option<NodeIdx> {
    if let [only] = claimants {
        return Some(*only);
    }
    let reverse = target.data.back_reference.as_ref();
    claimants
        .iter()
        .copied()
        .find(|&c| reverse.is_some() && tree.node(c).source_id() == reverse)
        .or_else(|| {
            claimants
                .iter()
                .copied()
                .find(|&c| tree.ancestor_names(c) == target.data.ancestor_names)
        })
        .or_else(|| {
            claimants
                .iter()
                .copied()
                .find(|&c| tree.node(c).name == target.name)
        })
}

/// Archived target `idx` may take over instead of creating a new one.
fn find_restorable(
    tree: &SourceTree,
    idx: NodeIdx,
    index: &TargetIndex,
    ids: &IdentityMap,
) -> Option<TargetId> {
    let node = tree.node(idx);
    let ancestors = tree.ancestor_names(idx);

    // Stored reference wins outright; a protected one only when unmoved.
    if let Some(archived) = node
        .back_reference
        .as_ref()
        .and_then(|id| index.get_archived(id))
        .filter(|e| !ids.is_claimed(&e.id))
    {
        let unmoved = archived.name == node.name && archived.data.ancestor_names == ancestors;
        return (index.is_changeable(&archived.id) || unmoved).then(|| archived.id.clone());
    }

    let candidates: Vec<&TargetEntity> = index
        .by_name(&node.name)
        .filter(|e| e.is_archived() && !ids.is_claimed(&e.id))
        .collect();
    if let Some(same_place) = candidates.iter().find(|e| e.data.ancestor_names == ancestors) {
        return Some(same_place.id.clone());
    }

    let parent_target = match node.parent {
        Some(p) if p != tree.root() => ids.target_of(p),
        _ => None,
    };
    let changeable: Vec<&&TargetEntity> = candidates
        .iter()
        .filter(|e| index.is_changeable(&e.id))
        .collect();
    changeable
        .iter()
        .find(|e| e.parent.as_ref() == parent_target)
        .or_else(|| changeable.first())
        .map(|e| e.id.clone())
}
