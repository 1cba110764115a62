//! Run orchestration: load → filter → index → resolve → plan → apply → report.
//!
//! [`plan`] and [`run`] work on any pair of stores through a
//! [`SyncContext`]; [`sync_project_at`] wires them to the snapshot stores
//! under a home directory and holds the project lock for the run.

use std::path::Path;
use std::time::Instant;

use serde::Serialize;

use treeline_core::config;
use treeline_core::error::StoreError;
use treeline_core::snapshot::{self, SnapshotSourceStore, SnapshotTargetStore};
use treeline_core::types::ProjectName;

use crate::changeset::{self, ChangeSet};
use crate::context::SyncContext;
use crate::error::SyncError;
use crate::filter::{self, Scope};
use crate::lock::ProjectLock;
use crate::loader;
use crate::report::SyncReport;
use crate::resolver::{self, IdentityMap};
use crate::synchronizer::{self, ApplyStats};
use crate::target_index::{self, TargetIndex};
use crate::tree::SourceTree;

#[derive(Debug, Clone, Default)]
pub struct SyncOptions {
    /// Plan and report without writing to either store.
    pub dry_run: bool,
    /// Restrict the run to selected entities.
    pub scope: Option<Scope>,
}

/// Everything the planning phases produced.
#[derive(Debug, Clone)]
pub struct Plan {
    pub tree: SourceTree,
    pub index: TargetIndex,
    pub identities: IdentityMap,
    pub changes: ChangeSet,
}

/// Outcome of one run.
#[derive(Debug, Clone, Serialize)]
pub struct SyncRun {
    pub report: SyncReport,
    pub stats: ApplyStats,
}

pub fn report_title(project: &ProjectName) -> String {
    format!("Synchronization report for {project}")
}

/// Run every read-only phase. `Ok(None)` when the project itself is not
/// synchronized (the reason is in the reporter).
pub fn plan(ctx: &mut SyncContext<'_>, options: &SyncOptions) -> Result<Option<Plan>, SyncError> {
    let started = Instant::now();
    let Some(mut tree) = loader::load(ctx)? else {
        return Ok(None);
    };
    tracing::debug!(elapsed_ms = started.elapsed().as_millis() as u64, "phase: load");

    let phase = Instant::now();
    filter::apply(ctx, &mut tree, options.scope.as_ref());
    tracing::debug!(elapsed_ms = phase.elapsed().as_millis() as u64, "phase: filter");

    let phase = Instant::now();
    let index = target_index::load(ctx)?;
    tracing::debug!(elapsed_ms = phase.elapsed().as_millis() as u64, "phase: index");

    let phase = Instant::now();
    let mut resolved = resolver::resolve(ctx, &tree, &index);
    tracing::debug!(elapsed_ms = phase.elapsed().as_millis() as u64, "phase: resolve");

    let phase = Instant::now();
    let scoped = tree.iter().any(|(_, n)| n.state == crate::tree::NodeState::OutOfScope);
    let changes = changeset::build(ctx, &mut tree, &index, &mut resolved, scoped);
    tracing::debug!(elapsed_ms = phase.elapsed().as_millis() as u64, "phase: plan");

    Ok(Some(Plan {
        tree,
        index,
        identities: resolved.identities,
        changes,
    }))
}

/// Plan and apply. Findings never fail a run; store errors do.
pub fn run(ctx: &mut SyncContext<'_>, options: SyncOptions) -> Result<SyncRun, SyncError> {
    let started = Instant::now();
    let stats = match plan(ctx, &options)? {
        Some(plan) => {
            let phase = Instant::now();
            let stats = synchronizer::apply(ctx, &plan.tree, plan.changes, options.dry_run)?;
            tracing::debug!(elapsed_ms = phase.elapsed().as_millis() as u64, "phase: apply");
            stats
        }
        None => ApplyStats {
            dry_run: options.dry_run,
            ..ApplyStats::default()
        },
    };

    let report = std::mem::take(&mut ctx.reporter).finish(report_title(&ctx.project));
    tracing::info!(
        project = %ctx.project,
        findings = report.items.len(),
        errors = report.has_errors(),
        elapsed_ms = started.elapsed().as_millis() as u64,
        "synchronization finished"
    );
    Ok(SyncRun { report, stats })
}

/// Synchronize `project` between the snapshot stores under `home`.
pub fn sync_project_at(
    home: &Path,
    project: &ProjectName,
    options: SyncOptions,
) -> Result<SyncRun, SyncError> {
    let config = config::load_at(home)?;
    if !snapshot::source_path_at(home, project).exists() {
        return Err(StoreError::ProjectNotFound {
            store: "source",
            project: project.clone(),
        }
        .into());
    }
    let _lock = ProjectLock::acquire_at(home, project)?;
    let mut source = SnapshotSourceStore::open_at(home, project)?;
    let mut target = SnapshotTargetStore::open_at(home, project)?;
    let mut ctx = SyncContext::new(project.clone(), config, &mut source, &mut target)?;
    run(&mut ctx, options)
}

/// `sync_project_at` convenience wrapper.
pub fn sync_project(project: &ProjectName, options: SyncOptions) -> Result<SyncRun, SyncError> {
    let home = dirs::home_dir().ok_or(StoreError::HomeNotFound)?;
    sync_project_at(&home, project, options)
}
