//! `treeline diff <project>`: unified diffs of what sync would write.

use anyhow::{Context, Result};
use clap::Args;

use treeline_core::types::ProjectName;
use treeline_sync::{diff_project_at, SyncOptions};

use super::{home_dir, scope, sync::print_report};

/// Arguments for `treeline diff`.
#[derive(Args, Debug)]
pub struct DiffArgs {
    /// Project to diff.
    pub project: String,

    /// Restrict the preview to these source entity ids.
    #[arg(long = "select", value_name = "ID")]
    pub select: Vec<String>,
}

impl DiffArgs {
    pub fn run(self) -> Result<()> {
        let home = home_dir()?;
        let project = ProjectName::from(self.project.as_str());
        let options = SyncOptions {
            dry_run: true,
            scope: scope(&self.select),
        };

        let result = diff_project_at(&home, &project, options)
            .with_context(|| format!("diff failed for '{project}'"))?;

        if result.diffs.is_empty() {
            println!("No differences for '{}'.", result.project);
        }
        for diff in &result.diffs {
            print!("{}", diff.unified_diff);
            if !diff.unified_diff.ends_with('\n') {
                println!();
            }
        }
        print_report(&result.report);
        Ok(())
    }
}
