//! `treeline sync <project>`: reconcile one project and print the report.

use anyhow::{Context, Result};
use clap::Args;
use colored::Colorize;

use treeline_core::types::ProjectName;
use treeline_sync::{sync_project_at, ApplyStats, Severity, SyncOptions, SyncReport};

use super::{home_dir, scope};

/// Arguments for `treeline sync`.
#[derive(Args, Debug)]
pub struct SyncArgs {
    /// Project to synchronize.
    pub project: String,

    /// Plan and report without writing to either store.
    #[arg(long)]
    pub dry_run: bool,

    /// Restrict the run to these source entity ids (and their subtrees).
    #[arg(long = "select", value_name = "ID")]
    pub select: Vec<String>,

    /// Emit the report as JSON.
    #[arg(long)]
    pub json: bool,
}

impl SyncArgs {
    pub fn run(self) -> Result<()> {
        let home = home_dir()?;
        let project = ProjectName::from(self.project.as_str());
        let options = SyncOptions {
            dry_run: self.dry_run,
            scope: scope(&self.select),
        };

        let run = sync_project_at(&home, &project, options)
            .with_context(|| format!("sync failed for '{project}'"))?;

        if self.json {
            println!(
                "{}",
                serde_json::to_string_pretty(&run).context("failed to serialize sync JSON")?
            );
            return Ok(());
        }

        print_stats(&project, &run.stats);
        print_report(&run.report);
        Ok(())
    }
}

fn print_stats(project: &ProjectName, stats: &ApplyStats) {
    let prefix = if stats.dry_run { "[dry-run] " } else { "" };
    if stats.total() == 0 && stats.attributes_written == 0 {
        println!("{prefix}✓ '{project}': nothing to do");
        return;
    }
    println!(
        "{prefix}✓ '{project}' synced ({} created, {} updated, {} archived)",
        stats.created, stats.updated, stats.archived
    );
    if stats.source_created + stats.source_moved > 0 {
        println!(
            "  source: {} recreated, {} reverted",
            stats.source_created, stats.source_moved
        );
    }
    if stats.work_products_deleted > 0 {
        println!("  {} orphaned work products removed", stats.work_products_deleted);
    }
}

pub(crate) fn print_report(report: &SyncReport) {
    if report.is_empty() {
        return;
    }
    println!("{}", report.title.bold());
    for severity in [Severity::Error, Severity::Warning, Severity::Info] {
        let items: Vec<_> = report.items_of(severity).collect();
        if items.is_empty() {
            continue;
        }
        println!("{}", severity_label(severity));
        for item in items {
            println!("  {}", item.message);
            for path in &item.paths {
                println!("    · {path}");
            }
        }
    }
}

fn severity_label(severity: Severity) -> String {
    match severity {
        Severity::Error => "ERROR".red().bold().to_string(),
        Severity::Warning => "WARNING".yellow().bold().to_string(),
        Severity::Info => "INFO".bright_black().bold().to_string(),
    }
}
