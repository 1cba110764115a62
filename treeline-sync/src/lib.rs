//! # treeline-sync
//!
//! Batch, idempotent reconciliation of a production-tracking tree (source)
//! into a pipeline asset store (target).
//!
//! Phases run strictly in order, each over the state the previous one left:
//!
//! - [`loader`]: source records → arena ([`tree::SourceTree`])
//! - [`filter`]: ignore flag, duplicate/illegal names, selection scope
//! - [`target_index`]: target documents, lookups, changeability
//! - [`resolver`]: source node ⇄ target document identities
//! - [`changeset`]: archive / recreate / revert / patch plan
//! - [`synchronizer`]: ordered batches against both stores
//! - [`report`]: findings grouped by severity
//!
//! Call [`sync_project_at`] for the snapshot stores under a home directory,
//! or [`pipeline::run`] with any [`SyncContext`].

pub mod changeset;
pub mod context;
pub mod diff;
pub mod error;
pub mod filter;
pub mod loader;
pub mod lock;
pub mod pipeline;
pub mod report;
pub mod resolver;
pub mod synchronizer;
pub mod target_index;
pub mod tree;

pub use context::SyncContext;
pub use diff::{diff_project_at, DiffAction, DiffProjectResult, EntityDiff};
pub use error::SyncError;
pub use filter::Scope;
pub use lock::ProjectLock;
pub use pipeline::{run, sync_project, sync_project_at, SyncOptions, SyncRun};
pub use report::{Finding, ReportItem, Severity, SyncReport};
pub use synchronizer::ApplyStats;
