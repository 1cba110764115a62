//! Synchronizer: apply a [`ChangeSet`] to both stores in ordered batches.
//!
//! 1. source-side recreations and reverts, one call each, then commit
//! 2. target inserts, one batch per depth (parents first), each new id
//!    written back onto its source node
//! 3. target field patches, one bulk call
//! 4. archivals, one bulk call
//! 5. orphaned work products, one bulk call
//! 6. back-reference repairs on the source side
//!
//! There is no rollback. A failing store call aborts with the
//! [`StoreError`]; everything the plan writes is derived from both stores,
//! so a re-run converges.

use std::collections::HashMap;

use serde::Serialize;

use treeline_core::error::StoreError;
use treeline_core::types::{
    EntityPatch, NewTargetEntity, SourceId, TargetId, Value, DEFAULT_ENTITY_TYPE, TASK_ENTITY_TYPE,
};

use crate::changeset::{ChangeSet, ParentRef, PlannedCreate, SourceOp};
use crate::context::SyncContext;
use crate::tree::{NodeIdx, SourceTree};

/// What was (or, on a dry run, would be) written.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ApplyStats {
    pub source_created: usize,
    pub source_moved: usize,
    pub attributes_written: usize,
    pub created: usize,
    pub updated: usize,
    pub archived: usize,
    pub work_products_deleted: usize,
    pub dry_run: bool,
}

impl ApplyStats {
    /// Counts of a plan without touching either store.
    pub fn planned(changes: &ChangeSet) -> Self {
        let source_created = changes
            .source_ops
            .iter()
            .filter(|op| matches!(op, SourceOp::Create { .. }))
            .count();
        ApplyStats {
            source_created,
            source_moved: changes.source_ops.len() - source_created,
            attributes_written: changes.back_references.len(),
            created: changes.creates.len(),
            updated: changes.updates.len(),
            archived: changes.archives.len(),
            work_products_deleted: changes.orphans.len(),
            dry_run: true,
        }
    }

    pub fn total(&self) -> usize {
        self.source_created
            + self.source_moved
            + self.created
            + self.updated
            + self.archived
            + self.work_products_deleted
    }
}

pub fn apply(
    ctx: &mut SyncContext<'_>,
    tree: &SourceTree,
    changes: ChangeSet,
    dry_run: bool,
) -> Result<ApplyStats, StoreError> {
    if dry_run {
        let stats = ApplyStats::planned(&changes);
        tracing::info!(project = %ctx.project, operations = stats.total(), "[dry-run] nothing written");
        return Ok(stats);
    }

    let mut stats = ApplyStats::default();
    let mut source_ids: HashMap<NodeIdx, SourceId> = tree
        .iter()
        .filter_map(|(idx, node)| node.source_id().map(|sid| (idx, sid.clone())))
        .collect();

    // 1. source side
    let mut back_ref_patches: Vec<(TargetId, EntityPatch)> = Vec::new();
    for op in &changes.source_ops {
        match op {
            SourceOp::Create { node, target } => {
                let sid = create_source(ctx, tree, *node, target, &source_ids, &mut stats)?;
                back_ref_patches.push((
                    target.clone(),
                    EntityPatch {
                        back_reference: Some(sid.clone()),
                        ..EntityPatch::default()
                    },
                ));
                source_ids.insert(*node, sid);
            }
            SourceOp::Move { node } => {
                let (Some(sid), Some(parent)) = (
                    source_ids.get(node),
                    tree.node(*node).parent.and_then(|p| source_ids.get(&p)),
                ) else {
                    continue;
                };
                let name = &tree.node(*node).name;
                tracing::debug!(path = %tree.path(*node), "source entity reverted");
                ctx.source.move_entity(sid, name, parent)?;
                stats.source_moved += 1;
            }
        }
    }
    if !changes.source_ops.is_empty() {
        ctx.source.commit()?;
    }

    // 2. inserts
    let mut created: HashMap<NodeIdx, TargetId> = HashMap::new();
    let mut written = 0;
    for level in by_depth(changes.creates) {
        let (nodes, docs): (Vec<NodeIdx>, Vec<NewTargetEntity>) = level
            .into_iter()
            .map(|create| {
                let mut doc = create.doc;
                doc.parent = match create.parent {
                    ParentRef::Project => None,
                    ParentRef::Existing(id) => Some(id),
                    ParentRef::Planned(parent) => created.get(&parent).cloned(),
                };
                (create.node, doc)
            })
            .unzip();
        let ids = ctx.target.insert_many(&ctx.project, docs)?;
        stats.created += ids.len();
        for (node, id) in nodes.into_iter().zip(ids) {
            if let Some(sid) = source_ids.get(&node) {
                ctx.source.write_attribute(
                    sid,
                    &ctx.config.back_reference_key,
                    Value::String(id.to_string()),
                )?;
                written += 1;
            }
            created.insert(node, id);
        }
    }
    if written > 0 {
        ctx.source.commit()?;
        stats.attributes_written += written;
    }

    // 3. patches
    let mut patches: Vec<(TargetId, EntityPatch)> = Vec::new();
    for update in changes.updates {
        let mut patch = update.patch;
        if let Some(parent) = update.pending_parent {
            patch.parent = Some(created.get(&parent).cloned());
        }
        patches.push((update.target, patch));
    }
    for (target, patch) in back_ref_patches {
        match patches.iter_mut().find(|(id, _)| id == &target) {
            Some((_, existing)) => existing.merge(patch),
            None => patches.push((target, patch)),
        }
    }
    if !patches.is_empty() {
        stats.updated = patches.len();
        ctx.target.bulk_update(&ctx.project, patches)?;
    }

    // 4. archivals
    if !changes.archives.is_empty() {
        ctx.target.bulk_mark_archived(&ctx.project, &changes.archives)?;
        stats.archived = changes.archives.len();
    }

    // 5. orphans
    if !changes.orphans.is_empty() {
        ctx.target.delete_work_products(&ctx.project, &changes.orphans)?;
        stats.work_products_deleted = changes.orphans.len();
    }

    // 6. back-reference repairs
    let mut repaired = 0;
    for (node, target) in &changes.back_references {
        let Some(sid) = source_ids.get(node) else {
            continue;
        };
        ctx.source.write_attribute(
            sid,
            &ctx.config.back_reference_key,
            Value::String(target.to_string()),
        )?;
        repaired += 1;
    }
    if repaired > 0 {
        ctx.source.commit()?;
        stats.attributes_written += repaired;
    }

    tracing::info!(
        project = %ctx.project,
        source_created = stats.source_created,
        source_moved = stats.source_moved,
        created = stats.created,
        updated = stats.updated,
        archived = stats.archived,
        work_products_deleted = stats.work_products_deleted,
        "changes applied"
    );
    Ok(stats)
}

/// Create the source entity of a recreated node plus its tasks, and point
/// it at `target`. Attribute keys the source store does not define are
/// skipped.
fn create_source(
    ctx: &mut SyncContext<'_>,
    tree: &SourceTree,
    idx: NodeIdx,
    target: &TargetId,
    source_ids: &HashMap<NodeIdx, SourceId>,
    stats: &mut ApplyStats,
) -> Result<SourceId, StoreError> {
    let node = tree.node(idx);
    let parent = node
        .parent
        .and_then(|p| source_ids.get(&p))
        .ok_or_else(|| StoreError::Unavailable {
            store: "source",
            reason: format!("parent of '{}' has no source id", tree.path(idx)),
        })?;
    let entity_type = node.entity_type().unwrap_or(DEFAULT_ENTITY_TYPE);
    let sid = ctx.source.create_entity(parent, &node.name, entity_type)?;
    tracing::debug!(path = %tree.path(idx), id = %sid, "source entity recreated");
    stats.source_created += 1;

    ctx.source.write_attribute(
        &sid,
        &ctx.config.back_reference_key,
        Value::String(target.to_string()),
    )?;
    stats.attributes_written += 1;
    for (key, value) in node.merged_attrs() {
        match ctx.source.write_attribute(&sid, &key, value) {
            Ok(()) => stats.attributes_written += 1,
            Err(StoreError::UnknownAttribute { key }) => {
                tracing::debug!(key = %key, "attribute not defined on source; skipped");
            }
            Err(e) => return Err(e),
        }
    }
    for task in node.tasks() {
        ctx.source.create_entity(&sid, task, TASK_ENTITY_TYPE)?;
    }
    Ok(sid)
}

/// Split planned creates into depth levels, shallowest first.
fn by_depth(mut creates: Vec<PlannedCreate>) -> Vec<Vec<PlannedCreate>> {
    creates.sort_by_key(|c| c.depth);
    let mut levels: Vec<Vec<PlannedCreate>> = Vec::new();
    for create in creates {
        match levels.last_mut() {
            Some(level) if level[0].depth == create.depth => level.push(create),
            _ => levels.push(vec![create]),
        }
    }
    levels
}
