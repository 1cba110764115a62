//! Per-run state shared by every phase.

use treeline_core::config::{NamePolicy, SyncConfig};
use treeline_core::error::ConfigError;
use treeline_core::store::{SourceStore, TargetStore};
use treeline_core::types::ProjectName;

use crate::report::Reporter;

/// Both store handles, the configuration and the reporter for one run.
///
/// Built fresh for every run and passed by reference into each phase; the
/// store handles are released when the context is dropped.
pub struct SyncContext<'a> {
    pub project: ProjectName,
    pub config: SyncConfig,
    pub policy: NamePolicy,
    pub source: &'a mut dyn SourceStore,
    pub target: &'a mut dyn TargetStore,
    pub reporter: Reporter,
}

impl<'a> SyncContext<'a> {
    /// Compile the naming policy and assemble the context. Fails before any
    /// store is touched when the config is invalid.
    pub fn new(
        project: ProjectName,
        config: SyncConfig,
        source: &'a mut dyn SourceStore,
        target: &'a mut dyn TargetStore,
    ) -> Result<Self, ConfigError> {
        let policy = config.compile()?;
        Ok(Self {
            project,
            config,
            policy,
            source,
            target,
            reporter: Reporter::new(),
        })
    }
}
