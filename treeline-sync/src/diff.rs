//! Dry-run preview: what every target document would look like after the
//! planned change set, as unified diffs of their YAML rendering.

use std::path::Path;

use serde::Serialize;
use similar::TextDiff;

use treeline_core::config;
use treeline_core::snapshot::{SnapshotSourceStore, SnapshotTargetStore};
use treeline_core::types::{ProjectName, TargetEntity, TargetId, TargetKind};

use crate::changeset::ParentRef;
use crate::context::SyncContext;
use crate::error::SyncError;
use crate::pipeline::{self, Plan, SyncOptions};
use crate::report::SyncReport;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DiffAction {
    Create,
    Update,
    Restore,
    Archive,
}

/// A single target document diff.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EntityDiff {
    pub path: String,
    pub action: DiffAction,
    pub unified_diff: String,
}

/// Diff result for a project.
#[derive(Debug, Clone, Serialize)]
pub struct DiffProjectResult {
    pub project: ProjectName,
    pub diffs: Vec<EntityDiff>,
    pub report: SyncReport,
}

/// Target-side diffs of `plan`, in apply order (creates, updates,
/// archivals). Documents created in the same run are shown as parents by
/// their path.
pub fn entity_diffs(plan: &Plan) -> Result<Vec<EntityDiff>, SyncError> {
    let mut diffs = Vec::new();

    for create in &plan.changes.creates {
        let path = plan.tree.path(create.node);
        let mut doc = create.doc.clone();
        if doc.parent.is_none() {
            doc.parent = planned_parent(plan, &create.parent);
        }
        let after = doc.into_entity(TargetId::from("<new>"));
        diffs.push(render(path, DiffAction::Create, None, &after)?);
    }

    for update in &plan.changes.updates {
        let Some(before) = plan.index.get(&update.target) else {
            continue;
        };
        let mut after = before.clone();
        update.patch.apply_to(&mut after);
        if let Some(parent) = update.pending_parent {
            after.parent = Some(TargetId::from(format!("<new {}>", plan.tree.path(parent))));
        }
        let action = if before.is_archived() {
            DiffAction::Restore
        } else {
            DiffAction::Update
        };
        diffs.push(render(after.display_path(), action, Some(before), &after)?);
    }

    for id in &plan.changes.archives {
        let Some(before) = plan.index.get(id) else {
            continue;
        };
        let mut after = before.clone();
        after.kind = TargetKind::Archived;
        diffs.push(render(before.display_path(), DiffAction::Archive, Some(before), &after)?);
    }

    Ok(diffs)
}

fn planned_parent(plan: &Plan, parent: &ParentRef) -> Option<TargetId> {
    match parent {
        ParentRef::Project => None,
        ParentRef::Existing(id) => Some(id.clone()),
        ParentRef::Planned(node) => {
            Some(TargetId::from(format!("<new {}>", plan.tree.path(*node))))
        }
    }
}

fn render(
    path: String,
    action: DiffAction,
    before: Option<&TargetEntity>,
    after: &TargetEntity,
) -> Result<EntityDiff, SyncError> {
    let old = match before {
        Some(entity) => to_yaml(entity)?,
        None => String::new(),
    };
    let new = to_yaml(after)?;
    let old_header = format!("a/{path}");
    let new_header = format!("b/{path}");
    let unified_diff = TextDiff::from_lines(&old, &new)
        .unified_diff()
        .header(&old_header, &new_header)
        .context_radius(3)
        .to_string();
    Ok(EntityDiff {
        path,
        action,
        unified_diff,
    })
}

fn to_yaml(entity: &TargetEntity) -> Result<String, SyncError> {
    serde_yaml::to_string(entity).map_err(|e| SyncError::Store(e.into()))
}

/// Plan a run for `project` under `home` and diff it. Nothing is written.
pub fn diff_project_at(
    home: &Path,
    project: &ProjectName,
    options: SyncOptions,
) -> Result<DiffProjectResult, SyncError> {
    let config = config::load_at(home)?;
    let mut source = SnapshotSourceStore::open_at(home, project)?;
    let mut target = SnapshotTargetStore::open_at(home, project)?;
    let mut ctx = SyncContext::new(project.clone(), config, &mut source, &mut target)?;

    let diffs = match pipeline::plan(&mut ctx, &options)? {
        Some(plan) => entity_diffs(&plan)?,
        None => Vec::new(),
    };
    let report = std::mem::take(&mut ctx.reporter).finish(pipeline::report_title(project));
    Ok(DiffProjectResult {
        project: project.clone(),
        diffs,
        report,
    })
}
