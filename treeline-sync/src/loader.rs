//! SourceTreeLoader: fetch the production-tracking tree of one project into
//! the arena.
//!
//! Read-only. Leaf tasks are folded into their parent's task list, attribute
//! values are split into flat and hierarchical maps, and hierarchical values
//! are propagated top-down (closest non-null ancestor wins).

use std::collections::{HashMap, VecDeque};

use treeline_core::config::NameKind;
use treeline_core::error::StoreError;
use treeline_core::types::{AttrMap, SourceId, SourceRecord, TargetId, Value};

use crate::context::SyncContext;
use crate::error::SyncError;
use crate::report::Finding;
use crate::tree::{AssetNode, NodeIdx, NodeKind, NodeOrigin, NodeState, SourceNode, SourceTree};

/// Load the tree of `ctx.project`.
///
/// Returns `Ok(None)` when the project itself must not be synchronized
/// (ignore flag set or illegal project name); the reason is reported.
pub fn load(ctx: &mut SyncContext<'_>) -> Result<Option<SourceTree>, SyncError> {
    let records = ctx.source.list_entities(&ctx.project)?;
    let project = records
        .iter()
        .find(|r| r.is_project())
        .ok_or_else(|| SyncError::ProjectNotFound {
            project: ctx.project.clone(),
        })?;

    let key = ctx.config.back_reference_key.clone();
    match ctx.source.read_attribute(&project.id, &key) {
        Ok(_) => {}
        Err(StoreError::UnknownAttribute { .. }) => {
            return Err(SyncError::MissingBackReferenceAttribute { key });
        }
        Err(e) => return Err(e.into()),
    }

    if project
        .attrs
        .get(&ctx.config.ignore_key)
        .is_some_and(Value::is_truthy)
    {
        ctx.reporter.push(Finding::ProjectIgnored, project.name.clone());
        return Ok(None);
    }
    if !ctx.policy.is_valid(NameKind::Project, &project.name) {
        ctx.reporter.push(Finding::InvalidName, project.name.clone());
        return Ok(None);
    }

    let tree = build_tree(ctx, &records, project);
    tracing::debug!(
        project = %ctx.project,
        records = records.len(),
        nodes = tree.len(),
        "source tree loaded"
    );
    Ok(Some(tree))
}

/// Pure part of [`load`]: records → arena.
fn build_tree(ctx: &SyncContext<'_>, records: &[SourceRecord], project: &SourceRecord) -> SourceTree {
    let mut children: HashMap<&SourceId, Vec<&SourceRecord>> = HashMap::new();
    for record in records {
        if let Some(parent) = &record.parent_id {
            children.entry(parent).or_default().push(record);
        }
    }

    let mut tree = SourceTree::new(make_node(ctx, project, None));
    let mut queue: VecDeque<(NodeIdx, &SourceRecord)> = VecDeque::from([(tree.root(), project)]);
    let mut visited = 1usize;
    while let Some((idx, record)) = queue.pop_front() {
        let Some(kids) = children.get(&record.id) else {
            continue;
        };
        for kid in kids {
            visited += 1;
            if kid.is_task() {
                if let NodeKind::Asset(asset) = &mut tree.node_mut(idx).kind {
                    asset.tasks.push(kid.name.clone());
                } else {
                    tracing::debug!(task = %kid.name, "task directly under project skipped");
                }
                continue;
            }
            let child = tree.push(make_node(ctx, kid, Some(idx)));
            queue.push_back((child, kid));
        }
    }

    if visited < records.len() {
        tracing::debug!(
            unreachable = records.len() - visited,
            "records without a path to the project skipped"
        );
    }

    let root = tree.root();
    tree.resolve_hierarchical(root);
    tree
}

fn make_node(ctx: &SyncContext<'_>, record: &SourceRecord, parent: Option<NodeIdx>) -> SourceNode {
    let mut flat_attrs = AttrMap::new();
    let mut hier_attrs = AttrMap::new();
    let mut back_reference = None;
    let mut ignore = false;

    for (key, value) in &record.attrs {
        if key == &ctx.config.back_reference_key {
            back_reference = value
                .as_str()
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(TargetId::from);
        } else if key == &ctx.config.ignore_key {
            ignore = value.is_truthy();
        } else if value.is_null() {
            continue;
        } else if ctx.config.is_hierarchical(key) {
            hier_attrs.insert(key.clone(), value.clone());
        } else {
            flat_attrs.insert(key.clone(), value.clone());
        }
    }

    let kind = match parent {
        None => NodeKind::Project,
        Some(_) => NodeKind::Asset(AssetNode {
            entity_type: record.entity_type.clone(),
            tasks: Vec::new(),
        }),
    };

    SourceNode {
        origin: NodeOrigin::Loaded(record.id.clone()),
        name: record.name.clone(),
        kind,
        parent,
        children: Vec::new(),
        flat_attrs,
        own_hier_attrs: hier_attrs,
        hier_attrs: AttrMap::new(),
        back_reference,
        ignore,
        state: NodeState::Active,
    }
}
