//! Error types for treeline-core.

use std::path::PathBuf;

use thiserror::Error;

use crate::types::{ProjectName, SourceId, TargetId};

/// Failures talking to either store. Always fatal for a synchronization run.
#[derive(Debug, Error)]
pub enum StoreError {
    /// An I/O error, with annotated path for context.
    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// YAML serialization error (write/save path).
    #[error("YAML serialization error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// YAML parse error on load, with the offending file.
    #[error("failed to parse snapshot at {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },

    /// The store has no data for the requested project.
    #[error("project '{project}' not found in {store} store")]
    ProjectNotFound {
        store: &'static str,
        project: ProjectName,
    },

    #[error("source entity '{id}' not found")]
    SourceEntityNotFound { id: SourceId },

    #[error("target entity '{id}' not found")]
    TargetEntityNotFound { id: TargetId },

    /// The custom attribute is not defined (or not readable) in the source store.
    #[error("custom attribute '{key}' is not defined")]
    UnknownAttribute { key: String },

    /// The store could not be reached or refused the call.
    #[error("{store} store unavailable: {reason}")]
    Unavailable {
        store: &'static str,
        reason: String,
    },

    /// `dirs::home_dir()` returned `None`.
    #[error("cannot determine home directory; set $HOME or equivalent")]
    HomeNotFound,
}

/// Configuration load / validation failures.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config at {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },

    #[error("YAML serialization error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// A naming pattern did not compile.
    #[error("invalid {kind} name pattern '{pattern}': {source}")]
    InvalidPattern {
        kind: &'static str,
        pattern: String,
        #[source]
        source: regex::Error,
    },

    #[error("config key '{field}' must not be empty")]
    EmptyKey { field: &'static str },

    #[error("cannot determine home directory; set $HOME or equivalent")]
    HomeNotFound,
}

/// Convenience constructor for [`StoreError::Io`].
pub(crate) fn io_err(path: impl Into<PathBuf>, source: std::io::Error) -> StoreError {
    StoreError::Io {
        path: path.into(),
        source,
    }
}
