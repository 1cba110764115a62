//! YAML snapshot stores.
//!
//! # Storage layout
//!
//! ```text
//! ~/.treeline/
//!   config.yaml
//!   projects/
//!     <project>/
//!       source.yaml   (production-tracking tree: mode 0600)
//!       target.yaml   (pipeline asset documents + work products: mode 0600)
//!       sync.lock     (held for the duration of a run)
//! ```
//!
//! # API pattern
//!
//! Every function touching the filesystem has two forms:
//! - `fn_at(home: &Path, …)`: explicit home; used in tests with `TempDir`
//! - `fn(…)`: derives home from `dirs::home_dir()`, delegates to `_at`
//!
//! Both stores can also run purely in memory (`in_memory`), in which case
//! nothing is ever written to disk.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::{io_err, StoreError};
use crate::store::{SourceStore, TargetStore};
use crate::types::{
    EntityPatch, EntityQuery, NewTargetEntity, ProjectName, SourceId, SourceRecord, TargetEntity,
    TargetId, TargetKind, Value, WorkProductId, WorkProductRecord,
};

// ---------------------------------------------------------------------------
// 1. Snapshot payloads
// ---------------------------------------------------------------------------

/// On-disk source tree.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct SourceSnapshot {
    /// Custom attribute keys defined in the source system.
    #[serde(default)]
    pub attribute_keys: BTreeSet<String>,
    #[serde(default)]
    pub entities: Vec<SourceRecord>,
    #[serde(default)]
    pub next_seq: u64,
}

impl SourceSnapshot {
    pub fn entity(&self, id: &SourceId) -> Option<&SourceRecord> {
        self.entities.iter().find(|e| &e.id == id)
    }

    pub fn entity_by_name(&self, name: &str) -> Option<&SourceRecord> {
        self.entities.iter().find(|e| e.name == name)
    }
}

/// On-disk target store contents.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct TargetSnapshot {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub synced_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub entities: Vec<TargetEntity>,
    #[serde(default)]
    pub work_products: Vec<WorkProductRecord>,
    #[serde(default)]
    pub next_seq: u64,
}

impl TargetSnapshot {
    pub fn entity(&self, id: &TargetId) -> Option<&TargetEntity> {
        self.entities.iter().find(|e| &e.id == id)
    }

    pub fn entity_by_name(&self, name: &str) -> Option<&TargetEntity> {
        self.entities
            .iter()
            .find(|e| e.kind != TargetKind::Project && e.name == name)
    }

    pub fn project(&self) -> Option<&TargetEntity> {
        self.entities.iter().find(|e| e.kind == TargetKind::Project)
    }
}

// ---------------------------------------------------------------------------
// 2. Path helpers
// ---------------------------------------------------------------------------

/// `<home>/.treeline/`
pub fn root_dir_at(home: &Path) -> PathBuf {
    home.join(".treeline")
}

/// `<home>/.treeline/projects/<project>/`: pure, no I/O.
pub fn project_path_at(home: &Path, project: &ProjectName) -> PathBuf {
    root_dir_at(home).join("projects").join(&project.0)
}

/// `<home>/.treeline/projects/<project>/`
///
/// Creates the directory (mode `0700`) if it does not yet exist.
pub fn project_dir_at(home: &Path, project: &ProjectName) -> Result<PathBuf, StoreError> {
    let dir = project_path_at(home, project);
    if !dir.exists() {
        std::fs::create_dir_all(&dir).map_err(|e| io_err(&dir, e))?;
        set_dir_permissions(&dir)?;
    }
    Ok(dir)
}

pub fn source_path_at(home: &Path, project: &ProjectName) -> PathBuf {
    project_path_at(home, project).join("source.yaml")
}

pub fn target_path_at(home: &Path, project: &ProjectName) -> PathBuf {
    project_path_at(home, project).join("target.yaml")
}

/// Names of every project directory under `<home>/.treeline/projects/`, sorted.
pub fn list_projects_at(home: &Path) -> Result<Vec<ProjectName>, StoreError> {
    let dir = root_dir_at(home).join("projects");
    if !dir.exists() {
        return Ok(vec![]);
    }
    let mut names: Vec<ProjectName> = std::fs::read_dir(&dir)
        .map_err(|e| io_err(&dir, e))?
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().map(|t| t.is_dir()).unwrap_or(false))
        .map(|e| ProjectName::from(e.file_name().to_string_lossy().into_owned()))
        .collect();
    names.sort();
    Ok(names)
}

/// `list_projects_at` convenience wrapper.
pub fn list_projects() -> Result<Vec<ProjectName>, StoreError> {
    list_projects_at(&home()?)
}

// ---------------------------------------------------------------------------
// 3. Load / save (atomic)
// ---------------------------------------------------------------------------

/// Load the source snapshot of `project`.
///
/// Returns `StoreError::ProjectNotFound` if absent, `StoreError::Parse`
/// (with path) if malformed YAML.
pub fn load_source_at(home: &Path, project: &ProjectName) -> Result<SourceSnapshot, StoreError> {
    load_yaml(&source_path_at(home, project), "source", project)
}

/// Load the target snapshot of `project`. A missing file is an empty store:
/// the first run against a project creates everything.
pub fn load_target_at(home: &Path, project: &ProjectName) -> Result<TargetSnapshot, StoreError> {
    let path = target_path_at(home, project);
    if !path.exists() {
        return Ok(TargetSnapshot::default());
    }
    load_yaml(&path, "target", project)
}

pub fn save_source_at(
    home: &Path,
    project: &ProjectName,
    snapshot: &SourceSnapshot,
) -> Result<(), StoreError> {
    project_dir_at(home, project)?;
    write_atomic(&source_path_at(home, project), &serde_yaml::to_string(snapshot)?)
}

pub fn save_target_at(
    home: &Path,
    project: &ProjectName,
    snapshot: &TargetSnapshot,
) -> Result<(), StoreError> {
    project_dir_at(home, project)?;
    write_atomic(&target_path_at(home, project), &serde_yaml::to_string(snapshot)?)
}

fn load_yaml<T: serde::de::DeserializeOwned>(
    path: &Path,
    store: &'static str,
    project: &ProjectName,
) -> Result<T, StoreError> {
    if !path.exists() {
        return Err(StoreError::ProjectNotFound {
            store,
            project: project.clone(),
        });
    }
    let contents = std::fs::read_to_string(path).map_err(|e| io_err(path, e))?;
    serde_yaml::from_str(&contents).map_err(|e| StoreError::Parse {
        path: path.to_path_buf(),
        source: e,
    })
}

/// serialize → `<file>.tmp` sibling → `chmod 0600` → `rename`.
fn write_atomic(path: &Path, contents: &str) -> Result<(), StoreError> {
    let tmp = path.with_extension("yaml.tmp");
    std::fs::write(&tmp, contents).map_err(|e| io_err(&tmp, e))?;
    set_file_permissions(&tmp)?;
    if let Err(e) = std::fs::rename(&tmp, path) {
        let _ = std::fs::remove_file(&tmp);
        return Err(io_err(path, e));
    }
    Ok(())
}

/// Deterministic 24-hex-char id derived from project, salt and a sequence.
pub fn mint_id(project: &ProjectName, salt: &str, seq: u64) -> String {
    let mut h = Sha256::new();
    h.update(project.0.as_bytes());
    h.update(b"\0");
    h.update(salt.as_bytes());
    h.update(b"\0");
    h.update(seq.to_le_bytes());
    let digest = hex::encode(h.finalize());
    digest[..24].to_string()
}

// ---------------------------------------------------------------------------
// 4. Source store
// ---------------------------------------------------------------------------

/// [`SourceStore`] over a [`SourceSnapshot`]. Mutations are buffered and
/// written on [`SourceStore::commit`].
#[derive(Debug)]
pub struct SnapshotSourceStore {
    project: ProjectName,
    snapshot: SourceSnapshot,
    home: Option<PathBuf>,
    dirty: bool,
}

impl SnapshotSourceStore {
    pub fn open_at(home: &Path, project: &ProjectName) -> Result<Self, StoreError> {
        let snapshot = load_source_at(home, project)?;
        Ok(Self {
            project: project.clone(),
            snapshot,
            home: Some(home.to_path_buf()),
            dirty: false,
        })
    }

    /// `open_at` convenience wrapper.
    pub fn open(project: &ProjectName) -> Result<Self, StoreError> {
        Self::open_at(&home()?, project)
    }

    pub fn in_memory(project: &ProjectName, snapshot: SourceSnapshot) -> Self {
        Self {
            project: project.clone(),
            snapshot,
            home: None,
            dirty: false,
        }
    }

    pub fn snapshot(&self) -> &SourceSnapshot {
        &self.snapshot
    }

    pub fn into_snapshot(self) -> SourceSnapshot {
        self.snapshot
    }

    fn check_project(&self, project: &ProjectName) -> Result<(), StoreError> {
        if project != &self.project {
            return Err(StoreError::ProjectNotFound {
                store: "source",
                project: project.clone(),
            });
        }
        Ok(())
    }

    fn check_key(&self, key: &str) -> Result<(), StoreError> {
        if !self.snapshot.attribute_keys.contains(key) {
            return Err(StoreError::UnknownAttribute {
                key: key.to_string(),
            });
        }
        Ok(())
    }

    fn entity_mut(&mut self, id: &SourceId) -> Result<&mut SourceRecord, StoreError> {
        self.snapshot
            .entities
            .iter_mut()
            .find(|e| &e.id == id)
            .ok_or_else(|| StoreError::SourceEntityNotFound { id: id.clone() })
    }

    fn require(&self, id: &SourceId) -> Result<&SourceRecord, StoreError> {
        self.snapshot
            .entity(id)
            .ok_or_else(|| StoreError::SourceEntityNotFound { id: id.clone() })
    }
}

impl SourceStore for SnapshotSourceStore {
    fn list_entities(&self, project: &ProjectName) -> Result<Vec<SourceRecord>, StoreError> {
        self.check_project(project)?;
        Ok(self.snapshot.entities.clone())
    }

    fn read_attribute(&self, id: &SourceId, key: &str) -> Result<Value, StoreError> {
        self.check_key(key)?;
        let entity = self.require(id)?;
        Ok(entity.attrs.get(key).cloned().unwrap_or_default())
    }

    fn write_attribute(
        &mut self,
        id: &SourceId,
        key: &str,
        value: Value,
    ) -> Result<(), StoreError> {
        self.check_key(key)?;
        let entity = self.entity_mut(id)?;
        if value.is_null() {
            entity.attrs.remove(key);
        } else {
            entity.attrs.insert(key.to_string(), value);
        }
        self.dirty = true;
        Ok(())
    }

    fn create_entity(
        &mut self,
        parent: &SourceId,
        name: &str,
        entity_type: &str,
    ) -> Result<SourceId, StoreError> {
        self.require(parent)?;
        self.snapshot.next_seq += 1;
        let id = SourceId(mint_id(&self.project, "source", self.snapshot.next_seq));
        self.snapshot.entities.push(SourceRecord {
            id: id.clone(),
            name: name.to_string(),
            entity_type: entity_type.to_string(),
            parent_id: Some(parent.clone()),
            attrs: Default::default(),
        });
        self.dirty = true;
        Ok(id)
    }

    fn move_entity(
        &mut self,
        id: &SourceId,
        name: &str,
        parent: &SourceId,
    ) -> Result<(), StoreError> {
        self.require(parent)?;
        let entity = self.entity_mut(id)?;
        entity.name = name.to_string();
        entity.parent_id = Some(parent.clone());
        self.dirty = true;
        Ok(())
    }

    fn commit(&mut self) -> Result<(), StoreError> {
        if !self.dirty {
            return Ok(());
        }
        if let Some(home) = &self.home {
            save_source_at(home, &self.project, &self.snapshot)?;
        }
        self.dirty = false;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// 5. Target store
// ---------------------------------------------------------------------------

/// [`TargetStore`] over a [`TargetSnapshot`]. Every batch call is persisted
/// immediately; there is no rollback across batches.
#[derive(Debug)]
pub struct SnapshotTargetStore {
    project: ProjectName,
    snapshot: TargetSnapshot,
    home: Option<PathBuf>,
}

impl SnapshotTargetStore {
    pub fn open_at(home: &Path, project: &ProjectName) -> Result<Self, StoreError> {
        let snapshot = load_target_at(home, project)?;
        Ok(Self {
            project: project.clone(),
            snapshot,
            home: Some(home.to_path_buf()),
        })
    }

    /// `open_at` convenience wrapper.
    pub fn open(project: &ProjectName) -> Result<Self, StoreError> {
        Self::open_at(&home()?, project)
    }

    pub fn in_memory(project: &ProjectName, snapshot: TargetSnapshot) -> Self {
        Self {
            project: project.clone(),
            snapshot,
            home: None,
        }
    }

    pub fn snapshot(&self) -> &TargetSnapshot {
        &self.snapshot
    }

    pub fn into_snapshot(self) -> TargetSnapshot {
        self.snapshot
    }

    fn check_project(&self, project: &ProjectName) -> Result<(), StoreError> {
        if project != &self.project {
            return Err(StoreError::ProjectNotFound {
                store: "target",
                project: project.clone(),
            });
        }
        Ok(())
    }

    fn persist(&mut self) -> Result<(), StoreError> {
        self.snapshot.synced_at = Some(Utc::now());
        if let Some(home) = &self.home {
            save_target_at(home, &self.project, &self.snapshot)?;
        }
        Ok(())
    }
}

impl TargetStore for SnapshotTargetStore {
    fn find_entities(
        &self,
        project: &ProjectName,
        query: &EntityQuery,
    ) -> Result<Vec<TargetEntity>, StoreError> {
        self.check_project(project)?;
        Ok(self
            .snapshot
            .entities
            .iter()
            .filter(|e| query.matches(e))
            .cloned()
            .collect())
    }

    fn find_work_products(
        &self,
        project: &ProjectName,
    ) -> Result<Vec<WorkProductRecord>, StoreError> {
        self.check_project(project)?;
        Ok(self.snapshot.work_products.clone())
    }

    fn insert_many(
        &mut self,
        project: &ProjectName,
        docs: Vec<NewTargetEntity>,
    ) -> Result<Vec<TargetId>, StoreError> {
        self.check_project(project)?;
        let mut ids = Vec::with_capacity(docs.len());
        for doc in docs {
            self.snapshot.next_seq += 1;
            let id = TargetId(mint_id(&self.project, "target", self.snapshot.next_seq));
            self.snapshot.entities.push(doc.into_entity(id.clone()));
            ids.push(id);
        }
        self.persist()?;
        Ok(ids)
    }

    fn bulk_update(
        &mut self,
        project: &ProjectName,
        patches: Vec<(TargetId, EntityPatch)>,
    ) -> Result<(), StoreError> {
        self.check_project(project)?;
        for (id, patch) in &patches {
            let entity = self
                .snapshot
                .entities
                .iter_mut()
                .find(|e| &e.id == id)
                .ok_or_else(|| StoreError::TargetEntityNotFound { id: id.clone() })?;
            patch.apply_to(entity);
        }
        self.persist()
    }

    fn bulk_mark_archived(
        &mut self,
        project: &ProjectName,
        ids: &[TargetId],
    ) -> Result<(), StoreError> {
        self.check_project(project)?;
        for entity in self.snapshot.entities.iter_mut() {
            if entity.kind == TargetKind::Asset && ids.contains(&entity.id) {
                entity.kind = TargetKind::Archived;
            }
        }
        self.persist()
    }

    fn delete_work_products(
        &mut self,
        project: &ProjectName,
        ids: &[WorkProductId],
    ) -> Result<(), StoreError> {
        self.check_project(project)?;
        self.snapshot.work_products.retain(|w| !ids.contains(&w.id));
        self.persist()
    }
}

// ---------------------------------------------------------------------------
// Private helpers
// ---------------------------------------------------------------------------

fn home() -> Result<PathBuf, StoreError> {
    dirs::home_dir().ok_or(StoreError::HomeNotFound)
}

#[cfg(unix)]
fn set_dir_permissions(path: &Path) -> Result<(), StoreError> {
    use std::os::unix::fs::PermissionsExt;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o700))
        .map_err(|e| io_err(path, e))
}
#[cfg(not(unix))]
fn set_dir_permissions(_path: &Path) -> Result<(), StoreError> {
    Ok(())
}

#[cfg(unix)]
fn set_file_permissions(path: &Path) -> Result<(), StoreError> {
    use std::os::unix::fs::PermissionsExt;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))
        .map_err(|e| io_err(path, e))
}
#[cfg(not(unix))]
fn set_file_permissions(_path: &Path) -> Result<(), StoreError> {
    Ok(())
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{AttrMap, EntityData};
    use tempfile::TempDir;

    fn project() -> ProjectName {
        ProjectName::from("show")
    }

    fn source_snapshot() -> SourceSnapshot {
        SourceSnapshot {
            attribute_keys: ["target_id".to_string()].into_iter().collect(),
            entities: vec![SourceRecord {
                id: SourceId::from("p"),
                name: "show".into(),
                entity_type: "Project".into(),
                parent_id: None,
                attrs: AttrMap::new(),
            }],
            next_seq: 0,
        }
    }

    #[test]
    fn project_path_is_correct() {
        let home = TempDir::new().unwrap();
        let path = source_path_at(home.path(), &project());
        assert!(path.ends_with(".treeline/projects/show/source.yaml"));
    }

    #[test]
    fn missing_source_snapshot_is_project_not_found() {
        let home = TempDir::new().unwrap();
        let err = SnapshotSourceStore::open_at(home.path(), &project()).unwrap_err();
        assert!(matches!(err, StoreError::ProjectNotFound { store: "source", .. }));
    }

    #[test]
    fn missing_target_snapshot_is_empty() {
        let home = TempDir::new().unwrap();
        let snapshot = load_target_at(home.path(), &project()).unwrap();
        assert!(snapshot.entities.is_empty());
    }

    #[test]
    fn source_commit_persists_and_cleans_tmp() {
        let home = TempDir::new().unwrap();
        save_source_at(home.path(), &project(), &source_snapshot()).unwrap();

        let mut store = SnapshotSourceStore::open_at(home.path(), &project()).unwrap();
        let id = store
            .create_entity(&SourceId::from("p"), "Seq01", "Sequence")
            .unwrap();
        store
            .write_attribute(&id, "target_id", Value::from("t-1"))
            .unwrap();
        store.commit().unwrap();

        let loaded = load_source_at(home.path(), &project()).unwrap();
        let created = loaded.entity(&id).expect("created entity persisted");
        assert_eq!(created.name, "Seq01");
        assert_eq!(created.attrs.get("target_id"), Some(&Value::from("t-1")));
        let tmp = source_path_at(home.path(), &project()).with_extension("yaml.tmp");
        assert!(!tmp.exists(), ".tmp must be gone after commit");
    }

    #[test]
    fn unknown_attribute_is_rejected() {
        let mut store = SnapshotSourceStore::in_memory(&project(), source_snapshot());
        let err = store
            .write_attribute(&SourceId::from("p"), "nope", Value::Bool(true))
            .unwrap_err();
        assert!(matches!(err, StoreError::UnknownAttribute { .. }));
        let err = store.read_attribute(&SourceId::from("p"), "nope").unwrap_err();
        assert!(matches!(err, StoreError::UnknownAttribute { .. }));
    }

    #[test]
    fn target_batches_persist_each_call() {
        let home = TempDir::new().unwrap();
        let mut store = SnapshotTargetStore::open_at(home.path(), &project()).unwrap();
        let ids = store
            .insert_many(
                &project(),
                vec![NewTargetEntity {
                    name: "Seq01".into(),
                    kind: TargetKind::Asset,
                    parent: None,
                    data: EntityData::default(),
                }],
            )
            .unwrap();
        let persisted = load_target_at(home.path(), &project()).unwrap();
        assert_eq!(persisted.entities.len(), 1);
        assert!(persisted.synced_at.is_some());

        store.bulk_mark_archived(&project(), &ids).unwrap();
        let persisted = load_target_at(home.path(), &project()).unwrap();
        assert_eq!(persisted.entities[0].kind, TargetKind::Archived);
    }

    #[test]
    fn bulk_update_unknown_id_fails() {
        let mut store = SnapshotTargetStore::in_memory(&project(), TargetSnapshot::default());
        let err = store
            .bulk_update(
                &project(),
                vec![(TargetId::from("missing"), EntityPatch::default())],
            )
            .unwrap_err();
        assert!(matches!(err, StoreError::TargetEntityNotFound { .. }));
    }

    #[test]
    fn minted_ids_are_stable_and_distinct() {
        let a = mint_id(&project(), "target", 1);
        let b = mint_id(&project(), "target", 2);
        assert_eq!(a.len(), 24);
        assert_eq!(a, mint_id(&project(), "target", 1));
        assert_ne!(a, b);
        assert_ne!(a, mint_id(&project(), "source", 1));
    }

    #[test]
    fn list_projects_sorted() {
        let home = TempDir::new().unwrap();
        project_dir_at(home.path(), &ProjectName::from("zeta")).unwrap();
        project_dir_at(home.path(), &ProjectName::from("alpha")).unwrap();
        let names = list_projects_at(home.path()).unwrap();
        assert_eq!(
            names,
            vec![ProjectName::from("alpha"), ProjectName::from("zeta")]
        );
    }
}
