//! ValidationFilter: contain structurally invalid subtrees.
//!
//! Each filter computes a set of subtree roots from a read-only view of the
//! arena, then the set is applied in one step. Excluded nodes stay in the
//! arena (flagged) so their targets are left untouched.
//!
//! Order: ignore flag, then names (global duplicates and per-kind patterns),
//! then task names, then the optional selection scope.

use std::collections::{BTreeMap, HashSet};

use treeline_core::config::{NameKind, NamePolicy};
use treeline_core::types::SourceId;

use crate::context::SyncContext;
use crate::report::Finding;
use crate::tree::{ExclusionReason, NodeIdx, NodeState, SourceTree};

/// Restricts a run to selected entities, their ancestors and descendants.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Scope {
    pub selected: Vec<SourceId>,
}

/// Counts of what the filters removed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FilterStats {
    pub ignored: usize,
    pub invalid: usize,
    pub out_of_scope: usize,
    pub tasks_dropped: usize,
}

/// Run every filter over `tree`.
pub fn apply(ctx: &mut SyncContext<'_>, tree: &mut SourceTree, scope: Option<&Scope>) -> FilterStats {
    let mut stats = FilterStats::default();

    for idx in ignored_roots(tree) {
        ctx.reporter.push(Finding::Ignored, tree.path(idx));
        stats.ignored += tree.exclude_subtree(idx, ExclusionReason::Ignored).len();
    }

    let violations = name_violations(tree, &ctx.policy);
    for (name, claimants) in &violations.duplicates {
        let paths = claimants.iter().map(|&i| tree.path(i)).collect::<Vec<_>>();
        ctx.reporter
            .push_many(Finding::DuplicateName { name: name.clone() }, paths);
    }
    for &idx in &violations.invalid {
        ctx.reporter.push(Finding::InvalidName, tree.path(idx));
    }
    for (name, claimants) in violations.duplicates {
        tracing::debug!(name = %name, count = claimants.len(), "duplicate name");
        for idx in claimants {
            stats.invalid += tree.exclude_subtree(idx, ExclusionReason::DuplicateName).len();
        }
    }
    for idx in violations.invalid {
        stats.invalid += tree.exclude_subtree(idx, ExclusionReason::InvalidName).len();
    }

    stats.tasks_dropped = drop_invalid_tasks(ctx, tree);

    if let Some(scope) = scope {
        stats.out_of_scope = apply_scope(tree, scope);
    }

    tracing::debug!(
        ignored = stats.ignored,
        invalid = stats.invalid,
        out_of_scope = stats.out_of_scope,
        tasks_dropped = stats.tasks_dropped,
        "filters applied"
    );
    stats
}

/// Topmost active nodes carrying the ignore flag. Descendants of a flagged
/// node are covered by its subtree whatever their own flag says.
pub fn ignored_roots(tree: &SourceTree) -> Vec<NodeIdx> {
    let mut roots = Vec::new();
    let mut covered: HashSet<NodeIdx> = HashSet::new();
    for idx in tree.bfs() {
        if idx == tree.root() || !tree.is_active(idx) {
            continue;
        }
        let node = tree.node(idx);
        if node.parent.is_some_and(|p| covered.contains(&p)) {
            covered.insert(idx);
            continue;
        }
        if node.ignore {
            covered.insert(idx);
            roots.push(idx);
        }
    }
    roots
}

#[derive(Debug, Default)]
pub struct NameViolations {
    /// Names with more than one claimant anywhere in the tree.
    pub duplicates: BTreeMap<String, Vec<NodeIdx>>,
    /// Nodes whose name fails the asset pattern.
    pub invalid: Vec<NodeIdx>,
}

/// Duplicate and illegal names among the active non-project nodes. Names are
/// compared across the whole tree, not per parent.
pub fn name_violations(tree: &SourceTree, policy: &NamePolicy) -> NameViolations {
    let mut by_name: BTreeMap<&str, Vec<NodeIdx>> = BTreeMap::new();
    let mut violations = NameViolations::default();
    for idx in tree.bfs() {
        if idx == tree.root() || !tree.is_active(idx) {
            continue;
        }
        let name = tree.node(idx).name.as_str();
        let claimants = by_name.entry(name).or_default();
        if claimants.is_empty() && !policy.is_valid(NameKind::Asset, name) {
            violations.invalid.push(idx);
        }
        claimants.push(idx);
    }
    violations.duplicates = by_name
        .into_iter()
        .filter(|(_, ids)| ids.len() > 1)
        .map(|(name, ids)| (name.to_string(), ids))
        .collect();
    // A duplicated illegal name is reported once, as a duplicate.
    violations
        .invalid
        .retain(|idx| !violations.duplicates.contains_key(&tree.node(*idx).name));
    violations
}

/// Remove task names failing the task pattern from their active owners.
fn drop_invalid_tasks(ctx: &mut SyncContext<'_>, tree: &mut SourceTree) -> usize {
    let mut dropped = 0;
    for idx in tree.bfs() {
        if !tree.is_active(idx) {
            continue;
        }
        let bad: Vec<String> = tree
            .node(idx)
            .tasks()
            .iter()
            .filter(|t| !ctx.policy.is_valid(NameKind::Task, t))
            .cloned()
            .collect();
        if bad.is_empty() {
            continue;
        }
        let path = tree.path(idx);
        for task in &bad {
            ctx.reporter
                .push(Finding::InvalidTaskName, format!("{path}/{task}"));
        }
        if let crate::tree::NodeKind::Asset(asset) = &mut tree.node_mut(idx).kind {
            asset.tasks.retain(|t| !bad.contains(t));
        }
        dropped += bad.len();
    }
    dropped
}

/// Mark every active node outside the scope. Returns how many were marked.
/// A selection naming the project (or nothing resolvable) keeps everything.
pub fn apply_scope(tree: &mut SourceTree, scope: &Scope) -> usize {
    let mut selected = Vec::new();
    for id in &scope.selected {
        match tree.find(id) {
            Some(idx) if idx == tree.root() => return 0,
            Some(idx) if tree.is_active(idx) => selected.push(idx),
            Some(_) => tracing::debug!(id = %id, "selected entity is excluded"),
            None => tracing::debug!(id = %id, "selected entity not found"),
        }
    }
    if selected.is_empty() {
        return 0;
    }

    let mut keep: HashSet<NodeIdx> = HashSet::from([tree.root()]);
    for &idx in &selected {
        keep.extend(tree.ancestors(idx));
        keep.extend(tree.bfs_from(idx));
    }

    let mut marked = 0;
    for idx in tree.bfs() {
        if keep.contains(&idx) || !tree.is_active(idx) {
            continue;
        }
        tree.node_mut(idx).state = NodeState::OutOfScope;
        marked += 1;
    }
    marked
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tree::fixtures::{node, small_tree};
    use treeline_core::SyncConfig;

    fn policy() -> NamePolicy {
        SyncConfig::default().compile().unwrap()
    }

    #[test]
    fn duplicates_are_global_not_per_parent() {
        let mut tree = small_tree();
        let seq02 = tree.find(&SourceId::from("s2")).unwrap();
        tree.push(node("dup", "Shot010", Some(seq02)));
        let violations = name_violations(&tree, &policy());
        assert_eq!(violations.duplicates.len(), 1);
        assert_eq!(violations.duplicates["Shot010"].len(), 2);
        assert!(violations.invalid.is_empty());
    }

    #[test]
    fn illegal_name_is_invalid() {
        let mut tree = small_tree();
        let seq02 = tree.find(&SourceId::from("s2")).unwrap();
        let bad = tree.push(node("bad", "shot/01", Some(seq02)));
        let violations = name_violations(&tree, &policy());
        assert_eq!(violations.invalid, vec![bad]);
    }

    #[test]
    fn ignore_flag_is_evaluated_top_down() {
        let mut tree = small_tree();
        let seq01 = tree.find(&SourceId::from("s1")).unwrap();
        tree.node_mut(seq01).ignore = true;
        let shot = tree.find(&SourceId::from("s1a")).unwrap();
        tree.node_mut(shot).ignore = true;
        assert_eq!(ignored_roots(&tree), vec![seq01]);
    }

    #[test]
    fn scope_keeps_ancestors_and_descendants() {
        let mut tree = small_tree();
        let marked = apply_scope(
            &mut tree,
            &Scope {
                selected: vec![SourceId::from("s1")],
            },
        );
        assert_eq!(marked, 1);
        let seq02 = tree.find(&SourceId::from("s2")).unwrap();
        assert_eq!(tree.node(seq02).state, NodeState::OutOfScope);
        assert!(tree.is_active(tree.find(&SourceId::from("s1b")).unwrap()));
    }

    #[test]
    fn scope_with_project_selected_keeps_all() {
        let mut tree = small_tree();
        let marked = apply_scope(
            &mut tree,
            &Scope {
                selected: vec![SourceId::from("p"), SourceId::from("s1")],
            },
        );
        assert_eq!(marked, 0);
    }
}
