//! A store failure mid-run aborts without rollback; the next run converges.

mod common;

use common::{project, run_with, World};
use treeline_core::{
    EntityPatch, EntityQuery, NewTargetEntity, ProjectName, SnapshotSourceStore,
    SnapshotTargetStore, StoreError, TargetEntity, TargetId, TargetStore, WorkProductId,
    WorkProductRecord,
};
use treeline_sync::{SyncError, SyncOptions};

/// Delegates to a snapshot store, failing one chosen batch call.
struct FailingTarget {
    inner: SnapshotTargetStore,
    fail_insert_call: Option<usize>,
    fail_update: bool,
    inserts: usize,
}

impl FailingTarget {
    fn new(inner: SnapshotTargetStore) -> Self {
        Self {
            inner,
            fail_insert_call: None,
            fail_update: false,
            inserts: 0,
        }
    }

    fn unavailable() -> StoreError {
        StoreError::Unavailable {
            store: "target",
            reason: "connection reset".into(),
        }
    }
}

impl TargetStore for FailingTarget {
    fn find_entities(
        &self,
        project: &ProjectName,
        query: &EntityQuery,
    ) -> Result<Vec<TargetEntity>, StoreError> {
        self.inner.find_entities(project, query)
    }

    fn find_work_products(&self, project: &ProjectName) -> Result<Vec<WorkProductRecord>, StoreError> {
        self.inner.find_work_products(project)
    }

    fn insert_many(
        &mut self,
        project: &ProjectName,
        docs: Vec<NewTargetEntity>,
    ) -> Result<Vec<TargetId>, StoreError> {
        let call = self.inserts;
        self.inserts += 1;
        if self.fail_insert_call == Some(call) {
            return Err(Self::unavailable());
        }
        self.inner.insert_many(project, docs)
    }

    fn bulk_update(
        &mut self,
        project: &ProjectName,
        patches: Vec<(TargetId, EntityPatch)>,
    ) -> Result<(), StoreError> {
        if self.fail_update {
            return Err(Self::unavailable());
        }
        self.inner.bulk_update(project, patches)
    }

    fn bulk_mark_archived(&mut self, project: &ProjectName, ids: &[TargetId]) -> Result<(), StoreError> {
        self.inner.bulk_mark_archived(project, ids)
    }

    fn delete_work_products(
        &mut self,
        project: &ProjectName,
        ids: &[WorkProductId],
    ) -> Result<(), StoreError> {
        self.inner.delete_work_products(project, ids)
    }
}

/// Run once against a failing target, folding both stores back into `world`.
fn run_failing(world: &mut World, configure: impl FnOnce(&mut FailingTarget)) -> Result<(), SyncError> {
    let project = project();
    let mut source = SnapshotSourceStore::in_memory(&project, world.source.clone());
    let mut target = FailingTarget::new(SnapshotTargetStore::in_memory(&project, world.target.clone()));
    configure(&mut target);
    let result = run_with(&mut source, &mut target, SyncOptions::default()).map(|_| ());
    world.source = source.into_snapshot();
    world.target = target.inner.into_snapshot();
    result
}

#[test]
fn failed_insert_batch_is_completed_by_the_next_run() {
    let mut world = World::basic();
    // Batches: project, sequences, shots. The third one fails.
    let err = run_failing(&mut world, |t| t.fail_insert_call = Some(2)).unwrap_err();
    assert!(matches!(err, SyncError::Store(StoreError::Unavailable { .. })), "got: {err}");
    assert_eq!(world.target.entities.len(), 3);
    assert!(world.target.entity_by_name("Shot010").is_none());

    let run = world.sync();
    assert_eq!(run.stats.created, 1);
    assert_eq!(world.target.entities.len(), 4);
    let seq = world.target_id("Seq01");
    assert_eq!(world.target_named("Shot010").parent, Some(seq));

    assert_eq!(world.sync().stats.total(), 0);
}

#[test]
fn failed_patch_batch_is_retried_by_the_next_run() {
    let mut world = World::basic();
    world.sync();
    let shot = world.target_id("Shot010");
    world.rename_source("a1", "Shot011");

    let err = run_failing(&mut world, |t| t.fail_update = true).unwrap_err();
    assert!(matches!(err, SyncError::Store(_)));
    assert_eq!(world.target.entity(&shot).map(|e| e.name.as_str()), Some("Shot010"));

    world.sync();
    assert_eq!(world.target.entity(&shot).map(|e| e.name.as_str()), Some("Shot011"));
    assert_eq!(world.sync().stats.total(), 0);
}

#[test]
fn failed_recreate_patch_converges() {
    let mut world = World::basic();
    world.sync();
    world.publish("Shot010");
    world.delete_source("a1");

    // Source entity is recreated, the back-reference patch on the target fails.
    assert!(run_failing(&mut world, |t| t.fail_update = true).is_err());
    let recreated = world.source_named("Shot010").id.clone();

    let run = world.sync();
    assert_eq!(run.stats.source_created, 0);
    assert_eq!(
        world.target_named("Shot010").data.back_reference,
        Some(recreated)
    );
    assert_eq!(world.sync().stats.total(), 0);
}
