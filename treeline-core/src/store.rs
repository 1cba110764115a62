//! Collaborator contracts for the two stores.
//!
//! The engine only ever talks to these traits. Both are synchronous: a run is
//! single-threaded and the store calls are its only blocking points.

use crate::error::StoreError;
use crate::types::{
    EntityPatch, EntityQuery, NewTargetEntity, ProjectName, SourceId, SourceRecord, TargetEntity,
    TargetId, Value, WorkProductId, WorkProductRecord,
};

/// Production-tracking system (source tree).
pub trait SourceStore {
    /// Every entity of the project with its parent link and attribute
    /// values, the project entity included.
    fn list_entities(&self, project: &ProjectName) -> Result<Vec<SourceRecord>, StoreError>;

    /// Current value of a custom attribute. Fails with
    /// [`StoreError::UnknownAttribute`] when the key is not defined.
    fn read_attribute(&self, id: &SourceId, key: &str) -> Result<Value, StoreError>;

    fn write_attribute(&mut self, id: &SourceId, key: &str, value: Value)
        -> Result<(), StoreError>;

    /// Create an entity under `parent` and return its new id.
    fn create_entity(
        &mut self,
        parent: &SourceId,
        name: &str,
        entity_type: &str,
    ) -> Result<SourceId, StoreError>;

    /// Rename and/or reparent an entity.
    fn move_entity(
        &mut self,
        id: &SourceId,
        name: &str,
        parent: &SourceId,
    ) -> Result<(), StoreError>;

    /// Flush pending operations.
    fn commit(&mut self) -> Result<(), StoreError>;
}

/// Pipeline asset store (target store).
pub trait TargetStore {
    /// Live and archived documents of the project matching `query`,
    /// the project document included for `All` / `ById` / `ByName`.
    fn find_entities(
        &self,
        project: &ProjectName,
        query: &EntityQuery,
    ) -> Result<Vec<TargetEntity>, StoreError>;

    fn find_work_products(
        &self,
        project: &ProjectName,
    ) -> Result<Vec<WorkProductRecord>, StoreError>;

    /// Insert documents; returns the assigned ids in input order.
    fn insert_many(
        &mut self,
        project: &ProjectName,
        docs: Vec<NewTargetEntity>,
    ) -> Result<Vec<TargetId>, StoreError>;

    fn bulk_update(
        &mut self,
        project: &ProjectName,
        patches: Vec<(TargetId, EntityPatch)>,
    ) -> Result<(), StoreError>;

    fn bulk_mark_archived(
        &mut self,
        project: &ProjectName,
        ids: &[TargetId],
    ) -> Result<(), StoreError>;

    fn delete_work_products(
        &mut self,
        project: &ProjectName,
        ids: &[WorkProductId],
    ) -> Result<(), StoreError>;
}
