//! Treeline core library: domain types, store contracts, snapshot
//! persistence, configuration, errors.
//!
//! - [`types`]: newtypes, source records, target documents, patches
//! - [`store`]: [`SourceStore`] / [`TargetStore`] collaborator traits
//! - [`snapshot`]: YAML-backed implementations of both stores
//! - [`config`]: [`SyncConfig`] and the compiled [`NamePolicy`]
//! - [`error`]: [`StoreError`], [`ConfigError`]

pub mod config;
pub mod error;
pub mod snapshot;
pub mod store;
pub mod types;

pub use config::{NameKind, NamePolicy, SyncConfig};
pub use error::{ConfigError, StoreError};
pub use snapshot::{SnapshotSourceStore, SnapshotTargetStore, SourceSnapshot, TargetSnapshot};
pub use store::{SourceStore, TargetStore};
pub use types::{
    AttrMap, EntityData, EntityPatch, EntityQuery, NewTargetEntity, ProjectName, SourceId,
    SourceRecord, TargetEntity, TargetId, TargetKind, Value, WorkProductId, WorkProductRecord,
};
