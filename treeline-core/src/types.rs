//! Domain types shared by the source tree, the target store and the engine.
//!
//! Attribute payloads are closed: every value is a [`Value`], never a nested
//! document. All types are serializable via serde + serde_yaml.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Newtypes
// ---------------------------------------------------------------------------

macro_rules! string_newtype {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub String);

        impl $name {
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                self.0.fmt(f)
            }
        }

        impl From<String> for $name {
            fn from(s: String) -> Self {
                Self(s)
            }
        }

        impl From<&str> for $name {
            fn from(s: &str) -> Self {
                Self(s.to_owned())
            }
        }
    };
}

string_newtype!(
    /// Name of a project; the unit of one synchronization run.
    ProjectName
);
string_newtype!(
    /// Identity of an entity in the production-tracking (source) system.
    SourceId
);
string_newtype!(
    /// Identity of a document in the pipeline asset (target) store.
    TargetId
);
string_newtype!(
    /// Identity of a work-product record in the target store.
    WorkProductId
);

// ---------------------------------------------------------------------------
// Attribute values
// ---------------------------------------------------------------------------

/// Closed union of attribute values.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(untagged)]
pub enum Value {
    #[default]
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    String(String),
}

/// Attribute map keyed by attribute name. Ordered so that serialized
/// snapshots and diffs are stable.
pub type AttrMap = BTreeMap<String, Value>;

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Loose truthiness used for flag attributes (`ignore_sync` and friends).
    pub fn is_truthy(&self) -> bool {
        match self {
            Value::Null => false,
            Value::Bool(b) => *b,
            Value::Int(i) => *i != 0,
            Value::Float(f) => *f != 0.0,
            Value::String(s) => !s.is_empty(),
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s.as_str()),
            _ => None,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => write!(f, "null"),
            Value::Bool(b) => write!(f, "{b}"),
            Value::Int(i) => write!(f, "{i}"),
            Value::Float(x) => write!(f, "{x}"),
            Value::String(s) => write!(f, "{s}"),
        }
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Value::Int(i)
    }
}

impl From<f64> for Value {
    fn from(x: f64) -> Self {
        Value::Float(x)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::String(s.to_owned())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::String(s)
    }
}

// ---------------------------------------------------------------------------
// Source side
// ---------------------------------------------------------------------------

/// Entity type name the source system uses for leaf tasks.
pub const TASK_ENTITY_TYPE: &str = "Task";

/// Entity type used when the source system gives no better hint.
pub const DEFAULT_ENTITY_TYPE: &str = "Folder";

/// One entity as listed by the source system, attribute values included.
///
/// The project entity is the single record without a `parent_id`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceRecord {
    pub id: SourceId,
    pub name: String,
    pub entity_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<SourceId>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub attrs: AttrMap,
}

impl SourceRecord {
    pub fn is_project(&self) -> bool {
        self.parent_id.is_none()
    }

    pub fn is_task(&self) -> bool {
        self.entity_type.eq_ignore_ascii_case(TASK_ENTITY_TYPE)
    }
}

// ---------------------------------------------------------------------------
// Target side
// ---------------------------------------------------------------------------

/// Document kind in the target store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TargetKind {
    Project,
    Asset,
    /// Soft-deleted asset, kept for restoration.
    Archived,
}

impl fmt::Display for TargetKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TargetKind::Project => write!(f, "project"),
            TargetKind::Asset => write!(f, "asset"),
            TargetKind::Archived => write!(f, "archived"),
        }
    }
}

/// Structural and attribute data of a target document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct EntityData {
    /// Names of every ancestor below the project, outermost first.
    #[serde(default)]
    pub ancestor_names: Vec<String>,
    /// `ancestor_names` joined with `/`.
    #[serde(default)]
    pub hierarchy_path: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub back_reference: Option<SourceId>,
    /// Source object type; reused when the source node must be recreated.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub entity_type: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tasks: Vec<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub attrs: AttrMap,
}

/// A document in the target store (project, live asset or archived asset).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TargetEntity {
    pub id: TargetId,
    pub name: String,
    pub kind: TargetKind,
    /// Visual parent; `None` means the project is the parent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent: Option<TargetId>,
    #[serde(default)]
    pub data: EntityData,
}

impl TargetEntity {
    pub fn is_live(&self) -> bool {
        self.kind != TargetKind::Archived
    }

    pub fn is_archived(&self) -> bool {
        self.kind == TargetKind::Archived
    }

    /// `Seq01/Shot010`-style display path.
    pub fn display_path(&self) -> String {
        let mut items = self.data.ancestor_names.clone();
        items.push(self.name.clone());
        items.join("/")
    }
}

/// A document to insert; the store assigns its id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewTargetEntity {
    pub name: String,
    pub kind: TargetKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent: Option<TargetId>,
    #[serde(default)]
    pub data: EntityData,
}

impl NewTargetEntity {
    pub fn into_entity(self, id: TargetId) -> TargetEntity {
        TargetEntity {
            id,
            name: self.name,
            kind: self.kind,
            parent: self.parent,
            data: self.data,
        }
    }
}

/// Field-level update of a target document. `None` fields are untouched;
/// `attrs` entries are set one by one.
#[derive(Debug, Clone, PartialEq, Serialize, Default)]
pub struct EntityPatch {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub kind: Option<TargetKind>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent: Option<Option<TargetId>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ancestor_names: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hierarchy_path: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub back_reference: Option<SourceId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub entity_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tasks: Option<Vec<String>>,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub attrs: AttrMap,
}

impl EntityPatch {
    pub fn is_empty(&self) -> bool {
        self.name.is_none()
            && self.kind.is_none()
            && self.parent.is_none()
            && self.ancestor_names.is_none()
            && self.hierarchy_path.is_none()
            && self.back_reference.is_none()
            && self.entity_type.is_none()
            && self.tasks.is_none()
            && self.attrs.is_empty()
    }

    /// Apply the patch in place.
    pub fn apply_to(&self, entity: &mut TargetEntity) {
        if let Some(name) = &self.name {
            entity.name = name.clone();
        }
        if let Some(kind) = self.kind {
            entity.kind = kind;
        }
        if let Some(parent) = &self.parent {
            entity.parent = parent.clone();
        }
        if let Some(names) = &self.ancestor_names {
            entity.data.ancestor_names = names.clone();
        }
        if let Some(path) = &self.hierarchy_path {
            entity.data.hierarchy_path = path.clone();
        }
        if let Some(back_ref) = &self.back_reference {
            entity.data.back_reference = Some(back_ref.clone());
        }
        if let Some(entity_type) = &self.entity_type {
            entity.data.entity_type = Some(entity_type.clone());
        }
        if let Some(tasks) = &self.tasks {
            entity.data.tasks = tasks.clone();
        }
        for (key, value) in &self.attrs {
            entity.data.attrs.insert(key.clone(), value.clone());
        }
    }

    /// Fold `other` into `self`; fields set in `other` win.
    pub fn merge(&mut self, other: EntityPatch) {
        if other.name.is_some() {
            self.name = other.name;
        }
        if other.kind.is_some() {
            self.kind = other.kind;
        }
        if other.parent.is_some() {
            self.parent = other.parent;
        }
        if other.ancestor_names.is_some() {
            self.ancestor_names = other.ancestor_names;
        }
        if other.hierarchy_path.is_some() {
            self.hierarchy_path = other.hierarchy_path;
        }
        if other.back_reference.is_some() {
            self.back_reference = other.back_reference;
        }
        if other.entity_type.is_some() {
            self.entity_type = other.entity_type;
        }
        if other.tasks.is_some() {
            self.tasks = other.tasks;
        }
        self.attrs.extend(other.attrs);
    }
}

/// A published artifact attached to a target entity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkProductRecord {
    pub id: WorkProductId,
    pub owner: TargetId,
    pub name: String,
}

/// Lookup selector for [`crate::store::TargetStore::find_entities`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EntityQuery {
    All,
    ById(TargetId),
    ByName(String),
    /// `None` selects entities whose parent is the project.
    ByParent(Option<TargetId>),
}

impl EntityQuery {
    pub fn matches(&self, entity: &TargetEntity) -> bool {
        match self {
            EntityQuery::All => true,
            EntityQuery::ById(id) => &entity.id == id,
            EntityQuery::ByName(name) => &entity.name == name,
            EntityQuery::ByParent(parent) => {
                entity.kind != TargetKind::Project && &entity.parent == parent
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn asset(id: &str, name: &str, parent: Option<&str>) -> TargetEntity {
        TargetEntity {
            id: TargetId::from(id),
            name: name.to_string(),
            kind: TargetKind::Asset,
            parent: parent.map(TargetId::from),
            data: EntityData::default(),
        }
    }

    #[test]
    fn newtype_display() {
        assert_eq!(ProjectName::from("show").to_string(), "show");
        assert_eq!(SourceId::from("s-1").to_string(), "s-1");
        assert_eq!(TargetId::from(String::from("t-1")).as_str(), "t-1");
    }

    #[test]
    fn value_yaml_roundtrip_keeps_variants() {
        let mut attrs = AttrMap::new();
        attrs.insert("fps".into(), Value::Float(25.0));
        attrs.insert("frame_start".into(), Value::Int(1001));
        attrs.insert("locked".into(), Value::Bool(true));
        attrs.insert("label".into(), Value::from("hero"));
        attrs.insert("note".into(), Value::Null);

        let yaml = serde_yaml::to_string(&attrs).expect("serialize");
        let back: AttrMap = serde_yaml::from_str(&yaml).expect("deserialize");
        assert_eq!(back, attrs);
    }

    #[test]
    fn value_truthiness() {
        assert!(Value::Bool(true).is_truthy());
        assert!(!Value::Bool(false).is_truthy());
        assert!(!Value::Null.is_truthy());
        assert!(Value::Int(2).is_truthy());
        assert!(!Value::from("").is_truthy());
    }

    #[test]
    fn patch_apply_and_merge() {
        let mut entity = asset("t1", "Shot010", None);
        let mut patch = EntityPatch {
            name: Some("Shot011".into()),
            ..EntityPatch::default()
        };
        patch.merge(EntityPatch {
            parent: Some(Some(TargetId::from("t0"))),
            attrs: AttrMap::from([("fps".to_string(), Value::Int(24))]),
            ..EntityPatch::default()
        });
        assert!(!patch.is_empty());
        patch.apply_to(&mut entity);
        assert_eq!(entity.name, "Shot011");
        assert_eq!(entity.parent, Some(TargetId::from("t0")));
        assert_eq!(entity.data.attrs.get("fps"), Some(&Value::Int(24)));
    }

    #[test]
    fn empty_patch_is_empty() {
        assert!(EntityPatch::default().is_empty());
    }

    #[test]
    fn query_by_parent_skips_project() {
        let project = TargetEntity {
            kind: TargetKind::Project,
            ..asset("p", "show", None)
        };
        let top = asset("t1", "Seq01", None);
        let query = EntityQuery::ByParent(None);
        assert!(!query.matches(&project));
        assert!(query.matches(&top));
    }

    #[test]
    fn display_path_joins_ancestors() {
        let mut entity = asset("t1", "Shot010", Some("t0"));
        entity.data.ancestor_names = vec!["Seq01".into()];
        assert_eq!(entity.display_path(), "Seq01/Shot010");
    }

    #[test]
    fn task_records_are_detected() {
        let record = SourceRecord {
            id: SourceId::from("x"),
            name: "anim".into(),
            entity_type: "task".into(),
            parent_id: Some(SourceId::from("p")),
            attrs: AttrMap::new(),
        };
        assert!(record.is_task());
        assert!(!record.is_project());
    }
}
