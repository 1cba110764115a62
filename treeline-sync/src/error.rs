//! Error types for treeline-sync.
//!
//! Only fatal conditions are errors. Conflicts found while reconciling are
//! [`crate::report::Finding`]s and never abort a run.

use std::path::PathBuf;

use thiserror::Error;

use treeline_core::error::{ConfigError, StoreError};
use treeline_core::types::ProjectName;

/// All errors that can abort a synchronization run.
#[derive(Debug, Error)]
pub enum SyncError {
    /// A store call failed. Nothing is rolled back; re-running converges.
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    #[error("config error: {0}")]
    Config(#[from] ConfigError),

    /// Another run holds the project lock.
    #[error("project '{project}' is already being synchronized (lock held at {path})")]
    Locked { project: ProjectName, path: PathBuf },

    /// An I/O error, with annotated path for context.
    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The back-reference attribute is not defined on the source project.
    #[error("custom attribute '{key}' is missing or not readable on the project entity")]
    MissingBackReferenceAttribute { key: String },

    /// The source store listed no project entity.
    #[error("project '{project}' has no root entity in the source store")]
    ProjectNotFound { project: ProjectName },
}

/// Convenience constructor for [`SyncError::Io`].
pub(crate) fn io_err(path: impl Into<PathBuf>, source: std::io::Error) -> SyncError {
    SyncError::Io {
        path: path.into(),
        source,
    }
}
