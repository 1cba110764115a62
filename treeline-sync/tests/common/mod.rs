//! Shared fixtures: an in-memory "world" of both stores and a runner.

#![allow(dead_code)]

use treeline_core::{
    AttrMap, ProjectName, SnapshotSourceStore, SnapshotTargetStore, SourceId, SourceRecord,
    SourceSnapshot, SourceStore, SyncConfig, TargetEntity, TargetId, TargetSnapshot, TargetStore, Value,
    WorkProductId, WorkProductRecord,
};
use treeline_sync::{pipeline, SyncContext, SyncError, SyncOptions, SyncRun};

pub const PROJECT: &str = "show";

pub fn project() -> ProjectName {
    ProjectName::from(PROJECT)
}

pub fn record(id: &str, name: &str, entity_type: &str, parent: Option<&str>) -> SourceRecord {
    SourceRecord {
        id: SourceId::from(id),
        name: name.into(),
        entity_type: entity_type.into(),
        parent_id: parent.map(SourceId::from),
        attrs: AttrMap::new(),
    }
}

pub fn with_attr(mut record: SourceRecord, key: &str, value: Value) -> SourceRecord {
    record.attrs.insert(key.to_string(), value);
    record
}

/// Both stores of one project, held in memory between runs.
#[derive(Debug, Clone, Default)]
pub struct World {
    pub source: SourceSnapshot,
    pub target: TargetSnapshot,
}

impl World {
    /// `show → Seq01 → Shot010 (task anim)`, `show → Seq02`; nothing synced.
    pub fn basic() -> Self {
        Self::from_records(vec![
            with_attr(record("p", PROJECT, "Project", None), "fps", Value::Int(24)),
            record("s1", "Seq01", "Sequence", Some("p")),
            record("a1", "Shot010", "Shot", Some("s1")),
            record("k1", "anim", "Task", Some("a1")),
            record("s2", "Seq02", "Sequence", Some("p")),
        ])
    }

    pub fn from_records(entities: Vec<SourceRecord>) -> Self {
        World {
            source: SourceSnapshot {
                attribute_keys: ["target_id", "ignore_sync", "fps", "frame_start", "label"]
                    .iter()
                    .map(|k| k.to_string())
                    .collect(),
                entities,
                next_seq: 0,
            },
            target: TargetSnapshot::default(),
        }
    }

    pub fn run(&mut self, options: SyncOptions) -> Result<SyncRun, SyncError> {
        let project = project();
        let mut source = SnapshotSourceStore::in_memory(&project, self.source.clone());
        let mut target = SnapshotTargetStore::in_memory(&project, self.target.clone());
        let result = run_with(&mut source, &mut target, options);
        self.source = source.into_snapshot();
        self.target = target.into_snapshot();
        result
    }

    pub fn sync(&mut self) -> SyncRun {
        self.run(SyncOptions::default()).expect("sync")
    }

    pub fn target_named(&self, name: &str) -> &TargetEntity {
        self.target
            .entity_by_name(name)
            .unwrap_or_else(|| panic!("no target entity named {name}"))
    }

    pub fn target_id(&self, name: &str) -> TargetId {
        self.target_named(name).id.clone()
    }

    pub fn source_named(&self, name: &str) -> &SourceRecord {
        self.source
            .entity_by_name(name)
            .unwrap_or_else(|| panic!("no source entity named {name}"))
    }

    /// Attach a work product to the target entity `owner`.
    pub fn publish(&mut self, owner: &str) {
        let owner = self.target_id(owner);
        let id = WorkProductId::from(format!("wp-{}", self.target.work_products.len()));
        self.target.work_products.push(WorkProductRecord {
            id,
            owner,
            name: "modelMain".into(),
        });
    }

    pub fn rename_source(&mut self, id: &str, name: &str) {
        self.source_mut(id).name = name.to_string();
    }

    pub fn move_source(&mut self, id: &str, parent: &str) {
        self.source_mut(id).parent_id = Some(SourceId::from(parent));
    }

    /// Remove `id` and everything below it.
    pub fn delete_source(&mut self, id: &str) {
        let mut doomed = vec![SourceId::from(id)];
        let mut i = 0;
        while i < doomed.len() {
            let parent = doomed[i].clone();
            doomed.extend(
                self.source
                    .entities
                    .iter()
                    .filter(|e| e.parent_id.as_ref() == Some(&parent))
                    .map(|e| e.id.clone()),
            );
            i += 1;
        }
        self.source.entities.retain(|e| !doomed.contains(&e.id));
    }

    pub fn source_mut(&mut self, id: &str) -> &mut SourceRecord {
        let id = SourceId::from(id);
        self.source
            .entities
            .iter_mut()
            .find(|e| e.id == id)
            .unwrap_or_else(|| panic!("no source entity {id}"))
    }

    /// Parent name of a source record, `None` for the project.
    pub fn source_parent_name(&self, name: &str) -> Option<String> {
        let record = self.source_named(name);
        let parent = record.parent_id.as_ref()?;
        self.source.entity(parent).map(|p| p.name.clone())
    }
}

/// Run the pipeline against arbitrary store handles.
pub fn run_with<S: SourceStore, T: TargetStore>(
    source: &mut S,
    target: &mut T,
    options: SyncOptions,
) -> Result<SyncRun, SyncError> {
    let mut config = SyncConfig::default();
    config.hierarchical_keys = vec!["fps".into(), "frame_start".into()];
    let mut ctx = SyncContext::new(project(), config, source, target)?;
    pipeline::run(&mut ctx, options)
}
