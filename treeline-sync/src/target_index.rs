//! TargetTreeIndex: the project's documents in the target store, indexed,
//! with changeability computed once.
//!
//! An entity is non-changeable when it, or anything below it, owns a work
//! product. Triggers may be archived; their ancestors are still protected.

use std::collections::{HashMap, HashSet};

use treeline_core::error::StoreError;
use treeline_core::types::{
    EntityQuery, SourceId, TargetEntity, TargetId, TargetKind, WorkProductId, WorkProductRecord,
};

use crate::context::SyncContext;

/// Which kind of trigger marked an entity non-changeable.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mark {
    Live,
    Archived,
}

#[derive(Debug, Clone, Default)]
pub struct TargetIndex {
    entities: Vec<TargetEntity>,
    by_id: HashMap<TargetId, usize>,
    by_back_reference: HashMap<SourceId, Vec<usize>>,
    by_name: HashMap<String, Vec<usize>>,
    by_parent: HashMap<Option<TargetId>, Vec<usize>>,
    project: Option<usize>,
    marks: HashMap<TargetId, Mark>,
    orphans: Vec<WorkProductId>,
    work_products: usize,
}

/// Fetch and index the target side of `ctx.project`.
pub fn load(ctx: &SyncContext<'_>) -> Result<TargetIndex, StoreError> {
    let entities = ctx.target.find_entities(&ctx.project, &EntityQuery::All)?;
    let work_products = ctx.target.find_work_products(&ctx.project)?;
    let index = TargetIndex::build(entities, &work_products);
    tracing::debug!(
        project = %ctx.project,
        live = index.live().count(),
        archived = index.archived().count(),
        non_changeable = index.non_changeable_count(),
        orphans = index.orphans().len(),
        "target index built"
    );
    Ok(index)
}

impl TargetIndex {
    pub fn build(entities: Vec<TargetEntity>, work_products: &[WorkProductRecord]) -> Self {
        let mut index = TargetIndex {
            work_products: work_products.len(),
            ..TargetIndex::default()
        };
        for (slot, entity) in entities.iter().enumerate() {
            index.by_id.insert(entity.id.clone(), slot);
            if entity.kind == TargetKind::Project {
                index.project.get_or_insert(slot);
                continue;
            }
            if let Some(back_ref) = &entity.data.back_reference {
                index
                    .by_back_reference
                    .entry(back_ref.clone())
                    .or_default()
                    .push(slot);
            }
            index
                .by_name
                .entry(entity.name.clone())
                .or_default()
                .push(slot);
            index
                .by_parent
                .entry(entity.parent.clone())
                .or_default()
                .push(slot);
        }
        index.entities = entities;
        index.compute_changeability(work_products);
        index
    }

    fn compute_changeability(&mut self, work_products: &[WorkProductRecord]) {
        let mut live_triggers = Vec::new();
        let mut archived_triggers = Vec::new();
        let mut orphans = Vec::new();
        let mut seen: HashSet<TargetId> = HashSet::new();
        for wp in work_products {
            let Some(owner) = self.get(&wp.owner) else {
                orphans.push(wp.id.clone());
                continue;
            };
            if !seen.insert(owner.id.clone()) {
                continue;
            }
            if owner.is_archived() {
                archived_triggers.push(owner.id.clone());
            } else {
                live_triggers.push(owner.id.clone());
            }
        }
        self.orphans = orphans;

        // Live triggers first so archived walks can stop on their marks.
        for (triggers, mark) in [(live_triggers, Mark::Live), (archived_triggers, Mark::Archived)] {
            for trigger in triggers {
                let mut cur = Some(trigger);
                let mut visited: HashSet<TargetId> = HashSet::new();
                while let Some(id) = cur {
                    if !visited.insert(id.clone()) {
                        break;
                    }
                    match (self.marks.get(&id), mark) {
                        (Some(Mark::Live), _) => break,
                        (Some(Mark::Archived), Mark::Archived) => break,
                        _ => {}
                    }
                    self.marks.insert(id.clone(), mark);
                    cur = self.get(&id).and_then(|e| e.parent.clone());
                }
            }
        }
    }

    pub fn get(&self, id: &TargetId) -> Option<&TargetEntity> {
        self.by_id.get(id).map(|&slot| &self.entities[slot])
    }

    pub fn get_live(&self, id: &TargetId) -> Option<&TargetEntity> {
        self.get(id).filter(|e| e.is_live())
    }

    pub fn get_archived(&self, id: &TargetId) -> Option<&TargetEntity> {
        self.get(id).filter(|e| e.is_archived())
    }

    pub fn project(&self) -> Option<&TargetEntity> {
        self.project.map(|slot| &self.entities[slot])
    }

    /// Non-project entities whose `back_reference` is `id`.
    pub fn by_back_reference<'a>(&'a self, id: &SourceId) -> impl Iterator<Item = &'a TargetEntity> + 'a {
        self.slots(self.by_back_reference.get(id))
    }

    pub fn by_name<'a>(&'a self, name: &str) -> impl Iterator<Item = &'a TargetEntity> + 'a {
        self.slots(self.by_name.get(name))
    }

    /// Children of `parent` (`None` = project level).
    pub fn children_of<'a>(&'a self, parent: Option<&TargetId>) -> impl Iterator<Item = &'a TargetEntity> + 'a {
        self.slots(self.by_parent.get(&parent.cloned()))
    }

    fn slots<'a>(&'a self, slots: Option<&'a Vec<usize>>) -> impl Iterator<Item = &'a TargetEntity> + 'a {
        slots
            .into_iter()
            .flatten()
            .map(move |&slot| &self.entities[slot])
    }

    /// Live assets (the project excluded).
    pub fn live(&self) -> impl Iterator<Item = &TargetEntity> {
        self.entities.iter().filter(|e| e.kind == TargetKind::Asset)
    }

    pub fn archived(&self) -> impl Iterator<Item = &TargetEntity> {
        self.entities.iter().filter(|e| e.is_archived())
    }

    /// Whether name and parent of `id` may change. Unknown ids (documents
    /// planned in this run) are changeable; the project never is.
    pub fn is_changeable(&self, id: &TargetId) -> bool {
        if self.get(id).is_some_and(|e| e.kind == TargetKind::Project) {
            return false;
        }
        !self.marks.contains_key(id)
    }

    pub fn non_changeable_count(&self) -> usize {
        self.marks
            .keys()
            .filter(|id| self.get(id).is_some_and(|e| e.kind != TargetKind::Project))
            .count()
    }

    /// Work products whose owner no longer exists.
    pub fn orphans(&self) -> &[WorkProductId] {
        &self.orphans
    }

    pub fn work_product_count(&self) -> usize {
        self.work_products
    }

    /// Parent chain of `id` from its parent outwards, stopping at the project
    /// level or at a missing link. Cycles are cut.
    pub fn parent_chain(&self, id: &TargetId) -> Vec<&TargetEntity> {
        let mut chain = Vec::new();
        let mut seen: HashSet<&TargetId> = HashSet::new();
        let mut cur = self.get(id).and_then(|e| e.parent.as_ref());
        while let Some(pid) = cur {
            if !seen.insert(pid) {
                break;
            }
            let Some(parent) = self.get(pid) else {
                break;
            };
            chain.push(parent);
            cur = parent.parent.as_ref();
        }
        chain
    }

    /// Number of ancestors of `id` in the target tree.
    pub fn depth(&self, id: &TargetId) -> usize {
        self.parent_chain(id).len()
    }
}
