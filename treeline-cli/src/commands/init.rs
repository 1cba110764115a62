//! `treeline init [--force]`

use anyhow::{bail, Context, Result};
use clap::Args;

use treeline_core::config::{self, SyncConfig};

use super::home_dir;

/// Write `~/.treeline/config.yaml` with default settings.
#[derive(Args, Debug)]
pub struct InitArgs {
    /// Overwrite an existing configuration.
    #[arg(long)]
    pub force: bool,
}

impl InitArgs {
    pub fn run(self) -> Result<()> {
        let home = home_dir()?;
        let path = config::config_path_at(&home);
        if path.exists() && !self.force {
            bail!(
                "{} already exists; pass --force to overwrite it",
                path.display()
            );
        }

        config::save_at(&home, &SyncConfig::default())
            .with_context(|| format!("failed to write {}", path.display()))?;
        println!("✓ Wrote default configuration");
        println!("  Saved to: {}", path.display());
        Ok(())
    }
}
