pub mod diff;
pub mod init;
pub mod status;
pub mod sync;

use std::path::PathBuf;

use anyhow::{Context, Result};
use treeline_core::types::SourceId;
use treeline_sync::Scope;

pub(crate) fn home_dir() -> Result<PathBuf> {
    dirs::home_dir().context("could not determine home directory")
}

/// `--select` values as a scope; none selected means the whole project.
pub(crate) fn scope(selected: &[String]) -> Option<Scope> {
    if selected.is_empty() {
        return None;
    }
    Some(Scope {
        selected: selected.iter().map(|s| SourceId::from(s.as_str())).collect(),
    })
}
