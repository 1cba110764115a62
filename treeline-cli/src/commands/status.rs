//! `treeline status`: per-project store overview and last sync age.

use std::path::Path;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use clap::Args;
use colored::Colorize;
use serde::Serialize;
use tabled::{settings::Style, Table, Tabled};

use treeline_core::snapshot;
use treeline_core::types::{ProjectName, TargetKind};
use treeline_sync::target_index::TargetIndex;

use super::home_dir;

/// Arguments for `treeline status`.
#[derive(Args, Debug)]
pub struct StatusArgs {
    /// Show a single project instead of every known one.
    pub project: Option<String>,

    /// Emit machine-readable JSON.
    #[arg(long)]
    pub json: bool,
}

impl StatusArgs {
    pub fn run(self) -> Result<()> {
        let home = home_dir()?;
        let projects = match self.project.as_deref() {
            Some(name) => vec![ProjectName::from(name)],
            None => snapshot::list_projects_at(&home).context("failed to list projects")?,
        };

        let mut rows = Vec::with_capacity(projects.len());
        for project in &projects {
            rows.push(
                project_status(&home, project)
                    .with_context(|| format!("status check failed for '{project}'"))?,
            );
        }

        if self.json {
            println!(
                "{}",
                serde_json::to_string_pretty(&rows).context("failed to serialize status JSON")?
            );
            return Ok(());
        }

        print_table(rows);
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize)]
struct ProjectStatus {
    project: String,
    source_entities: usize,
    live: usize,
    archived: usize,
    protected: usize,
    orphaned_work_products: usize,
    last_sync_at: Option<String>,
    last_sync_age: String,
}

#[derive(Tabled)]
struct StatusTableRow {
    #[tabled(rename = "project")]
    project: String,
    #[tabled(rename = "source")]
    source: usize,
    #[tabled(rename = "live")]
    live: usize,
    #[tabled(rename = "archived")]
    archived: usize,
    #[tabled(rename = "protected")]
    protected: usize,
    #[tabled(rename = "orphans")]
    orphans: usize,
    #[tabled(rename = "last sync")]
    last_sync: String,
}

fn project_status(home: &Path, project: &ProjectName) -> Result<ProjectStatus> {
    let source = snapshot::load_source_at(home, project)?;
    let target = snapshot::load_target_at(home, project)?;

    let source_entities = source.entities.iter().filter(|e| !e.is_task()).count();
    let synced_at = target.synced_at;
    let index = TargetIndex::build(target.entities, &target.work_products);
    let live = index.live().filter(|e| e.kind != TargetKind::Project).count();

    Ok(ProjectStatus {
        project: project.to_string(),
        source_entities,
        live,
        archived: index.archived().count(),
        protected: index.non_changeable_count(),
        orphaned_work_products: index.orphans().len(),
        last_sync_at: synced_at.map(|t| t.to_rfc3339()),
        last_sync_age: synced_at.map_or_else(|| "never".to_string(), format_age),
    })
}

fn format_age(timestamp: DateTime<Utc>) -> String {
    let seconds = Utc::now()
        .signed_duration_since(timestamp)
        .num_seconds()
        .max(0) as u64;
    if seconds < 60 {
        return format!("{seconds}s ago");
    }
    if seconds < 60 * 60 {
        return format!("{}m ago", seconds / 60);
    }
    if seconds < 60 * 60 * 24 {
        return format!("{}h ago", seconds / (60 * 60));
    }
    format!("{}d ago", seconds / (60 * 60 * 24))
}

fn print_table(rows: Vec<ProjectStatus>) {
    println!(
        "Treeline v{} | {} projects",
        env!("CARGO_PKG_VERSION"),
        rows.len()
    );
    if rows.is_empty() {
        println!("No projects found.");
        return;
    }

    let never_synced = rows.iter().filter(|r| r.last_sync_at.is_none()).count();
    let table_rows: Vec<StatusTableRow> = rows
        .into_iter()
        .map(|row| StatusTableRow {
            project: row.project,
            source: row.source_entities,
            live: row.live,
            archived: row.archived,
            protected: row.protected,
            orphans: row.orphaned_work_products,
            last_sync: if row.last_sync_at.is_some() {
                row.last_sync_age
            } else {
                row.last_sync_age.yellow().to_string()
            },
        })
        .collect();
    let mut table = Table::new(table_rows);
    table.with(Style::rounded());
    println!("{table}");

    if never_synced > 0 {
        println!("Run 'treeline sync <project>' to populate the target store.");
    }
}
