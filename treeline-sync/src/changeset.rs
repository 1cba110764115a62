//! ChangeSetBuilder: turn resolved identities into an ordered list of store
//! operations.
//!
//! Three passes over the arena:
//!
//! 1. unclaimed targets (parents first): archive, merge into a planned
//!    create, recreate on the source side, or report as unresolvable
//! 2. matched pairs whose name or parent differ: keep the source change when
//!    the target is changeable, otherwise revert the source (recreating a
//!    lost ancestor chain when needed)
//! 3. desired target data for every active node, recomputed top-down, diffed
//!    against the stored documents
//!
//! Nothing is written here. The arena is updated in memory (reverts,
//! recreated nodes, exclusions) so the plan stays consistent with itself.

use std::collections::HashSet;

use treeline_core::types::{
    AttrMap, EntityData, EntityPatch, NewTargetEntity, TargetEntity, TargetId, TargetKind,
    WorkProductId, DEFAULT_ENTITY_TYPE,
};

use crate::context::SyncContext;
use crate::report::{Finding, UnresolvableCause};
use crate::resolver::{IdentityMap, Resolution, Resolved};
use crate::target_index::TargetIndex;
use crate::tree::{AssetNode, ExclusionReason, NodeIdx, NodeKind, NodeOrigin, NodeState, SourceNode, SourceTree};

// ---------------------------------------------------------------------------
// Plan types
// ---------------------------------------------------------------------------

/// Parent of a target document as the plan sees it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParentRef {
    /// Project level (`parent: None`).
    Project,
    Existing(TargetId),
    /// A document created earlier in the same run.
    Planned(NodeIdx),
}

impl ParentRef {
    pub fn matches(&self, parent: Option<&TargetId>) -> bool {
        match self {
            ParentRef::Project => parent.is_none(),
            ParentRef::Existing(id) => parent == Some(id),
            ParentRef::Planned(_) => false,
        }
    }
}

/// Source-side operation, applied before any target write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SourceOp {
    /// Create the source entity of a recreated node (and its tasks), then
    /// point it at `target`.
    Create { node: NodeIdx, target: TargetId },
    /// Rename and/or reparent a loaded node to its current arena values.
    Move { node: NodeIdx },
}

#[derive(Debug, Clone, PartialEq)]
pub struct PlannedCreate {
    pub node: NodeIdx,
    /// 0 for the project document.
    pub depth: usize,
    pub parent: ParentRef,
    /// `doc.parent` is filled in when the parent's id is known.
    pub doc: NewTargetEntity,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PlannedUpdate {
    pub target: TargetId,
    pub patch: EntityPatch,
    /// New parent created in the same run; resolved at apply time.
    pub pending_parent: Option<NodeIdx>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ChangeSet {
    pub source_ops: Vec<SourceOp>,
    /// Ordered by depth, parents first.
    pub creates: Vec<PlannedCreate>,
    pub updates: Vec<PlannedUpdate>,
    pub archives: Vec<TargetId>,
    pub orphans: Vec<WorkProductId>,
    /// Source nodes whose stored back-reference must be rewritten.
    pub back_references: Vec<(NodeIdx, TargetId)>,
}

impl ChangeSet {
    pub fn is_empty(&self) -> bool {
        self.source_ops.is_empty()
            && self.creates.is_empty()
            && self.updates.is_empty()
            && self.archives.is_empty()
            && self.orphans.is_empty()
            && self.back_references.is_empty()
    }
}

// ---------------------------------------------------------------------------
// Builder
// ---------------------------------------------------------------------------

/// Build the change set. `scoped` is true when a selection scope restricts
/// the run; unclaimed targets at project level are then left alone.
pub fn build(
    ctx: &mut SyncContext<'_>,
    tree: &mut SourceTree,
    index: &TargetIndex,
    resolved: &mut Resolved,
    scoped: bool,
) -> ChangeSet {
    let mut builder = Builder {
        ctx,
        tree,
        index,
        ids: &mut resolved.identities,
        changes: ChangeSet::default(),
        scoped,
    };
    builder.unclaimed(&resolved.unclaimed);
    builder.structure();
    builder.data();
    builder.changes.orphans = index.orphans().to_vec();
    if !builder.changes.orphans.is_empty() {
        let ids = builder.changes.orphans.iter().map(|id| id.to_string()).collect::<Vec<_>>();
        builder.ctx.reporter.push_many(Finding::OrphanedWorkProducts, ids);
    }

    let changes = builder.changes;
    tracing::debug!(
        source_ops = changes.source_ops.len(),
        creates = changes.creates.len(),
        updates = changes.updates.len(),
        archives = changes.archives.len(),
        orphans = changes.orphans.len(),
        back_references = changes.back_references.len(),
        "change set built"
    );
    changes
}

struct Builder<'r, 'a> {
    ctx: &'r mut SyncContext<'a>,
    tree: &'r mut SourceTree,
    index: &'r TargetIndex,
    ids: &'r mut IdentityMap,
    changes: ChangeSet,
    scoped: bool,
}

impl<'r, 'a> Builder<'r, 'a> {
    // -- pass 1 -------------------------------------------------------------

    fn unclaimed(&mut self, unclaimed: &[TargetId]) {
        let index = self.index;
        let mut skipped: HashSet<TargetId> = HashSet::new();
        for id in unclaimed {
            let Some(target) = index.get(id) else {
                continue;
            };
            if target.parent.as_ref().is_some_and(|p| skipped.contains(p)) || !self.in_scope(target) {
                skipped.insert(id.clone());
                continue;
            }

            if index.is_changeable(id) {
                tracing::debug!(path = %target.display_path(), "archive");
                self.changes.archives.push(id.clone());
                continue;
            }

            if let Some(node) = self.merge_candidate(target) {
                tracing::debug!(path = %target.display_path(), "planned create merged into protected entity");
                self.ids.assign(node, Resolution::Existing(id.clone()));
                continue;
            }

            if self.tree.has_name(&target.name) {
                self.ctx.reporter.push(
                    Finding::Unresolvable(UnresolvableCause::NameCollision),
                    target.display_path(),
                );
                skipped.insert(id.clone());
                continue;
            }

            let parent = match &target.parent {
                None => Some(self.tree.root()),
                Some(pid) => self.ids.node_of(pid),
            };
            match parent {
                Some(parent) if self.tree.is_active(parent) => {
                    self.recreate(target, parent);
                }
                _ => {
                    tracing::debug!(path = %target.display_path(), "parent not reconciled; left untouched");
                    skipped.insert(id.clone());
                }
            }
        }
    }

    /// Whether an unclaimed target belongs to the part of the tree this run
    /// acts upon: its nearest claimed ancestor must be an active node.
    fn in_scope(&self, target: &TargetEntity) -> bool {
        for ancestor in self.index.parent_chain(&target.id) {
            if let Some(node) = self.ids.node_of(&ancestor.id) {
                return self.tree.is_active(node);
            }
        }
        !self.scoped
    }

    /// A node planned for creation at the same place under the same name.
    fn merge_candidate(&self, target: &TargetEntity) -> Option<NodeIdx> {
        self.tree.bfs().into_iter().find(|&idx| {
            let node = self.tree.node(idx);
            node.is_active()
                && node.name == target.name
                && self.ids.get(idx) == Some(&Resolution::Create)
                && self.tree.ancestor_names(idx) == target.data.ancestor_names
        })
    }

    /// Add a source node cloned from `target` under `parent`.
    fn recreate(&mut self, target: &TargetEntity, parent: NodeIdx) -> NodeIdx {
        let mut flat_attrs = AttrMap::new();
        let mut hier_attrs = AttrMap::new();
        for (key, value) in &target.data.attrs {
            if self.ctx.config.is_internal(key) || value.is_null() {
                continue;
            }
            if self.ctx.config.is_hierarchical(key) {
                hier_attrs.insert(key.clone(), value.clone());
            } else {
                flat_attrs.insert(key.clone(), value.clone());
            }
        }

        let idx = self.tree.push(SourceNode {
            origin: NodeOrigin::Recreated,
            name: target.name.clone(),
            kind: NodeKind::Asset(AssetNode {
                entity_type: target
                    .data
                    .entity_type
                    .clone()
                    .unwrap_or_else(|| DEFAULT_ENTITY_TYPE.to_string()),
                tasks: target.data.tasks.clone(),
            }),
            parent: Some(parent),
            children: Vec::new(),
            flat_attrs,
            own_hier_attrs: hier_attrs,
            hier_attrs: AttrMap::new(),
            back_reference: Some(target.id.clone()),
            ignore: false,
            state: NodeState::Active,
        });
        let resolution = if target.is_archived() {
            Resolution::Restore(target.id.clone())
        } else {
            Resolution::Existing(target.id.clone())
        };
        self.tree.resolve_hierarchical(idx);
        self.ids.assign(idx, resolution);
        self.changes.source_ops.push(SourceOp::Create {
            node: idx,
            target: target.id.clone(),
        });
        self.ctx.reporter.push(Finding::Recreated, self.tree.path(idx));
        idx
    }

    // -- pass 2 -------------------------------------------------------------

    fn structure(&mut self) {
        let index = self.index;
        let root = self.tree.root();
        for idx in self.tree.bfs() {
            if idx == root || !self.tree.is_active(idx) {
                continue;
            }
            let Some(target) = self.ids.target_of(idx).and_then(|id| index.get(id)) else {
                continue;
            };
            let name_ok = self.tree.node(idx).name == target.name;
            let parent_ok = self.parent_ref(idx).matches(target.parent.as_ref());
            if name_ok && parent_ok {
                continue;
            }
            if index.is_changeable(&target.id) {
                tracing::debug!(
                    path = %self.tree.path(idx),
                    renamed = !name_ok,
                    moved = !parent_ok,
                    "structural change adopted"
                );
                continue;
            }

            let path = self.tree.path(idx);
            if !name_ok {
                let colliding: Vec<NodeIdx> = self
                    .tree
                    .named_except(&target.name, idx)
                    .into_iter()
                    .filter(|&n| !self.reverts_name(n))
                    .collect();
                if !colliding.is_empty() {
                    self.rename_collision(idx, path, colliding);
                    continue;
                }
            }
            let old_parent = self.tree.node(idx).parent;
            if !parent_ok {
                match self.restore_parent(target) {
                    Ok(parent) => self.tree.reparent(idx, parent),
                    Err((cause, at)) => {
                        self.ctx
                            .reporter
                            .push(Finding::Unresolvable(cause), at.unwrap_or(path));
                        self.tree.exclude_subtree(idx, ExclusionReason::Unresolvable);
                        continue;
                    }
                }
            }
            if !name_ok {
                self.tree.node_mut(idx).name = target.name.clone();
            }
            if self.tree.node(idx).parent != old_parent {
                self.tree.resolve_hierarchical(idx);
            }

            let reverted = format!("{path} -> {}", self.tree.path(idx));
            if !name_ok {
                self.ctx.reporter.push(Finding::RenamedBack, reverted.clone());
            }
            if !parent_ok {
                self.ctx.reporter.push(Finding::MovedBack, reverted);
            }
            if matches!(self.tree.node(idx).origin, NodeOrigin::Loaded(_)) {
                self.changes.source_ops.push(SourceOp::Move { node: idx });
            }
        }

        let tree = &*self.tree;
        self.changes.source_ops.retain(|op| match op {
            SourceOp::Create { node, .. } | SourceOp::Move { node } => tree.is_active(*node),
        });
    }

    /// Whether `idx` is still waiting for its own name to be reverted, which
    /// frees its current name.
    fn reverts_name(&self, idx: NodeIdx) -> bool {
        if !self.tree.is_active(idx) {
            return false;
        }
        self.ids
            .target_of(idx)
            .and_then(|id| self.index.get(id))
            .is_some_and(|t| !self.index.is_changeable(&t.id) && t.name != self.tree.node(idx).name)
    }

    /// A protected entity can't take its name back because other source
    /// entities hold it: leave the source untouched and exclude them all.
    fn rename_collision(&mut self, idx: NodeIdx, path: String, colliding: Vec<NodeIdx>) {
        let mut paths = vec![path];
        paths.extend(colliding.iter().map(|&n| self.tree.path(n)));
        tracing::error!(path = %paths[0], "previous name taken; entity excluded");
        self.ctx
            .reporter
            .push_many(Finding::Unresolvable(UnresolvableCause::NameTaken), paths);
        self.tree.exclude_subtree(idx, ExclusionReason::Unresolvable);
        for node in colliding {
            self.tree.exclude_subtree(node, ExclusionReason::Unresolvable);
        }
    }

    /// Source node that should parent an entity whose target sits under
    /// `target.parent`, recreating missing ancestors on the way.
    fn restore_parent(
        &mut self,
        target: &TargetEntity,
    ) -> Result<NodeIdx, (UnresolvableCause, Option<String>)> {
        let index = self.index;
        let Some(old_parent) = &target.parent else {
            return Ok(self.tree.root());
        };
        if let Some(node) = self.ids.node_of(old_parent) {
            return if self.tree.is_active(node) {
                Ok(node)
            } else {
                Err((UnresolvableCause::ParentExcluded, None))
            };
        }

        let mut chain: Vec<&TargetEntity> = Vec::new();
        let mut anchor = self.tree.root();
        let mut cur = Some(old_parent);
        while let Some(id) = cur {
            let Some(entity) = index.get(id) else {
                return Err((UnresolvableCause::ParentMissing, None));
            };
            if chain.iter().any(|e| e.id == entity.id) {
                return Err((UnresolvableCause::ParentMissing, None));
            }
            if self.tree.has_name(&entity.name) {
                return Err((UnresolvableCause::NameCollision, Some(entity.display_path())));
            }
            chain.push(entity);
            match &entity.parent {
                None => break,
                Some(pid) => match self.ids.node_of(pid) {
                    Some(node) if self.tree.is_active(node) => {
                        anchor = node;
                        break;
                    }
                    Some(_) => return Err((UnresolvableCause::ParentExcluded, None)),
                    None => cur = Some(pid),
                },
            }
        }

        for entity in chain.into_iter().rev() {
            anchor = self.recreate(entity, anchor);
        }
        Ok(anchor)
    }

    // -- pass 3 -------------------------------------------------------------

    fn data(&mut self) {
        let index = self.index;
        let root = self.tree.root();
        for idx in self.tree.bfs() {
            if !self.tree.is_active(idx) {
                continue;
            }
            let Some(resolution) = self.ids.get(idx).cloned() else {
                continue;
            };
            if idx == root {
                self.project_data(&resolution);
                continue;
            }

            let node = self.tree.node(idx);
            let ancestor_names = self.tree.ancestor_names(idx);
            let desired = EntityData {
                hierarchy_path: ancestor_names.join("/"),
                ancestor_names,
                back_reference: node.source_id().cloned(),
                entity_type: node.entity_type().map(str::to_string),
                tasks: node.tasks().to_vec(),
                attrs: node.merged_attrs(),
            };
            let name = node.name.clone();
            let parent = self.parent_ref(idx);

            match resolution {
                Resolution::Create => {
                    tracing::debug!(path = %self.tree.path(idx), "create");
                    self.changes.creates.push(PlannedCreate {
                        node: idx,
                        depth: self.tree.depth(idx),
                        parent,
                        doc: NewTargetEntity {
                            name,
                            kind: TargetKind::Asset,
                            parent: None,
                            data: desired,
                        },
                    });
                }
                Resolution::Existing(id) => {
                    let Some(target) = index.get(&id) else {
                        continue;
                    };
                    let (patch, pending_parent) = diff(target, &name, &parent, &desired);
                    if !patch.is_empty() || pending_parent.is_some() {
                        self.changes.updates.push(PlannedUpdate {
                            target: id.clone(),
                            patch,
                            pending_parent,
                        });
                    }
                    self.repair_back_reference(idx, &id);
                }
                Resolution::Restore(id) => {
                    let (patch, pending_parent) = restore_patch(&name, &parent, desired);
                    self.ctx.reporter.push(Finding::Restored, self.tree.path(idx));
                    self.changes.updates.push(PlannedUpdate {
                        target: id.clone(),
                        patch,
                        pending_parent,
                    });
                    self.repair_back_reference(idx, &id);
                }
            }
        }
        self.changes.creates.sort_by_key(|c| c.depth);
    }

    fn project_data(&mut self, resolution: &Resolution) {
        let root = self.tree.root();
        let node = self.tree.node(root);
        let attrs = node.merged_attrs();
        match resolution {
            Resolution::Create => {
                self.changes.creates.push(PlannedCreate {
                    node: root,
                    depth: 0,
                    parent: ParentRef::Project,
                    doc: NewTargetEntity {
                        name: node.name.clone(),
                        kind: TargetKind::Project,
                        parent: None,
                        data: EntityData {
                            back_reference: node.source_id().cloned(),
                            attrs,
                            ..EntityData::default()
                        },
                    },
                });
            }
            Resolution::Existing(id) | Resolution::Restore(id) => {
                let Some(target) = self.index.get(id) else {
                    return;
                };
                let mut patch = EntityPatch {
                    attrs: changed_attrs(&target.data.attrs, &attrs),
                    ..EntityPatch::default()
                };
                if let Some(sid) = node.source_id() {
                    if target.data.back_reference.as_ref() != Some(sid) {
                        patch.back_reference = Some(sid.clone());
                    }
                }
                if !patch.is_empty() {
                    self.changes.updates.push(PlannedUpdate {
                        target: id.clone(),
                        patch,
                        pending_parent: None,
                    });
                }
                let id = id.clone();
                self.repair_back_reference(root, &id);
            }
        }
    }

    fn repair_back_reference(&mut self, idx: NodeIdx, target: &TargetId) {
        let node = self.tree.node(idx);
        if matches!(node.origin, NodeOrigin::Loaded(_)) && node.back_reference.as_ref() != Some(target) {
            tracing::debug!(path = %self.tree.path(idx), target = %target, "back-reference rewritten");
            self.changes.back_references.push((idx, target.clone()));
        }
    }

    /// Where the target of `idx` should hang given the current arena.
    fn parent_ref(&self, idx: NodeIdx) -> ParentRef {
        match self.tree.node(idx).parent {
            Some(parent) if parent != self.tree.root() => match self.ids.get(parent) {
                Some(Resolution::Existing(id)) | Some(Resolution::Restore(id)) => {
                    ParentRef::Existing(id.clone())
                }
                Some(Resolution::Create) => ParentRef::Planned(parent),
                None => ParentRef::Project,
            },
            _ => ParentRef::Project,
        }
    }
}

// ---------------------------------------------------------------------------
// Diffing
// ---------------------------------------------------------------------------

/// Field-level difference between a stored document and its desired state.
/// Attributes are only ever set, never removed.
pub fn diff(
    target: &TargetEntity,
    name: &str,
    parent: &ParentRef,
    desired: &EntityData,
) -> (EntityPatch, Option<NodeIdx>) {
    let mut patch = EntityPatch::default();
    let mut pending_parent = None;
    if target.name != name {
        patch.name = Some(name.to_string());
    }
    match parent {
        ParentRef::Project if target.parent.is_some() => patch.parent = Some(None),
        ParentRef::Existing(id) if target.parent.as_ref() != Some(id) => {
            patch.parent = Some(Some(id.clone()));
        }
        ParentRef::Planned(node) => pending_parent = Some(*node),
        _ => {}
    }
    if target.data.ancestor_names != desired.ancestor_names {
        patch.ancestor_names = Some(desired.ancestor_names.clone());
    }
    if target.data.hierarchy_path != desired.hierarchy_path {
        patch.hierarchy_path = Some(desired.hierarchy_path.clone());
    }
    if desired.back_reference.is_some() && target.data.back_reference != desired.back_reference {
        patch.back_reference = desired.back_reference.clone();
    }
    if desired.entity_type.is_some() && target.data.entity_type != desired.entity_type {
        patch.entity_type = desired.entity_type.clone();
    }
    if target.data.tasks != desired.tasks {
        patch.tasks = Some(desired.tasks.clone());
    }
    patch.attrs = changed_attrs(&target.data.attrs, &desired.attrs);
    (patch, pending_parent)
}

fn changed_attrs(current: &AttrMap, desired: &AttrMap) -> AttrMap {
    desired
        .iter()
        .filter(|(k, v)| current.get(*k) != Some(*v))
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect()
}

/// Full rewrite of an archived document brought back to life.
fn restore_patch(name: &str, parent: &ParentRef, desired: EntityData) -> (EntityPatch, Option<NodeIdx>) {
    let (parent, pending_parent) = match parent {
        ParentRef::Project => (Some(None), None),
        ParentRef::Existing(id) => (Some(Some(id.clone())), None),
        ParentRef::Planned(node) => (None, Some(*node)),
    };
    let patch = EntityPatch {
        name: Some(name.to_string()),
        kind: Some(TargetKind::Asset),
        parent,
        ancestor_names: Some(desired.ancestor_names),
        hierarchy_path: Some(desired.hierarchy_path),
        back_reference: desired.back_reference,
        entity_type: desired.entity_type,
        tasks: Some(desired.tasks),
        attrs: desired.attrs,
    };
    (patch, pending_parent)
}
