//! Arena model of the source tree.
//!
//! Every node gets a stable [`NodeIdx`] at load time; parent/children links
//! are index arrays. Nodes are never removed: filters and conflict handling
//! flip [`NodeState`] instead, so indices stay valid for the whole run.

use std::collections::{HashMap, VecDeque};

use treeline_core::types::{AttrMap, SourceId, TargetId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeIdx(pub usize);

/// Payload of a non-project node.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct AssetNode {
    /// Source object type (`Sequence`, `Shot`, `Folder`, …).
    pub entity_type: String,
    /// Names of leaf tasks folded into this node.
    pub tasks: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NodeKind {
    Project,
    Asset(AssetNode),
}

/// Where a node came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NodeOrigin {
    /// Listed by the source store.
    Loaded(SourceId),
    /// Planned in this run, cloned from a target entity; the source store
    /// assigns its id when the plan is applied.
    Recreated,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExclusionReason {
    Ignored,
    DuplicateName,
    InvalidName,
    Unresolvable,
    /// Some ancestor was excluded.
    Ancestor,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeState {
    Active,
    Excluded(ExclusionReason),
    /// Outside the selection scope: resolved, never acted upon.
    OutOfScope,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SourceNode {
    pub origin: NodeOrigin,
    pub name: String,
    pub kind: NodeKind,
    pub parent: Option<NodeIdx>,
    pub children: Vec<NodeIdx>,
    pub flat_attrs: AttrMap,
    /// Inheritable attributes defined on the node itself.
    pub own_hier_attrs: AttrMap,
    /// Inheritable attributes resolved against the ancestors; see
    /// [`SourceTree::resolve_hierarchical`].
    pub hier_attrs: AttrMap,
    /// Stored back-reference attribute value.
    pub back_reference: Option<TargetId>,
    /// Own value of the ignore flag.
    pub ignore: bool,
    pub state: NodeState,
}

impl SourceNode {
    pub fn source_id(&self) -> Option<&SourceId> {
        match &self.origin {
            NodeOrigin::Loaded(id) => Some(id),
            NodeOrigin::Recreated => None,
        }
    }

    pub fn is_active(&self) -> bool {
        self.state == NodeState::Active
    }

    pub fn tasks(&self) -> &[String] {
        match &self.kind {
            NodeKind::Asset(asset) => &asset.tasks,
            NodeKind::Project => &[],
        }
    }

    pub fn entity_type(&self) -> Option<&str> {
        match &self.kind {
            NodeKind::Asset(asset) => Some(asset.entity_type.as_str()),
            NodeKind::Project => None,
        }
    }

    /// Flat and hierarchical attributes merged; flat values win.
    pub fn merged_attrs(&self) -> AttrMap {
        let mut attrs = self.hier_attrs.clone();
        attrs.extend(self.flat_attrs.iter().map(|(k, v)| (k.clone(), v.clone())));
        attrs
    }
}

#[derive(Debug, Clone)]
pub struct SourceTree {
    nodes: Vec<SourceNode>,
    root: NodeIdx,
    by_source_id: HashMap<SourceId, NodeIdx>,
}

impl SourceTree {
    /// Start a tree from its project node.
    pub fn new(root: SourceNode) -> Self {
        let mut tree = Self {
            nodes: Vec::new(),
            root: NodeIdx(0),
            by_source_id: HashMap::new(),
        };
        tree.root = tree.push(root);
        tree
    }

    /// Append a node, linking it under its parent.
    pub fn push(&mut self, node: SourceNode) -> NodeIdx {
        let idx = NodeIdx(self.nodes.len());
        if let Some(id) = node.source_id() {
            self.by_source_id.insert(id.clone(), idx);
        }
        if let Some(parent) = node.parent {
            self.nodes[parent.0].children.push(idx);
        }
        self.nodes.push(node);
        idx
    }

    pub fn root(&self) -> NodeIdx {
        self.root
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn node(&self, idx: NodeIdx) -> &SourceNode {
        &self.nodes[idx.0]
    }

    pub fn node_mut(&mut self, idx: NodeIdx) -> &mut SourceNode {
        &mut self.nodes[idx.0]
    }

    pub fn find(&self, id: &SourceId) -> Option<NodeIdx> {
        self.by_source_id.get(id).copied()
    }

    pub fn iter(&self) -> impl Iterator<Item = (NodeIdx, &SourceNode)> {
        self.nodes.iter().enumerate().map(|(i, n)| (NodeIdx(i), n))
    }

    /// Breadth-first order starting at `from` (included).
    pub fn bfs_from(&self, from: NodeIdx) -> Vec<NodeIdx> {
        let mut order = Vec::new();
        let mut queue = VecDeque::from([from]);
        while let Some(idx) = queue.pop_front() {
            order.push(idx);
            queue.extend(self.nodes[idx.0].children.iter().copied());
        }
        order
    }

    /// Breadth-first order of the whole tree, root first.
    pub fn bfs(&self) -> Vec<NodeIdx> {
        self.bfs_from(self.root)
    }

    /// Ancestors of `idx` from its parent up to the root.
    pub fn ancestors(&self, idx: NodeIdx) -> Vec<NodeIdx> {
        let mut out = Vec::new();
        let mut cur = self.nodes[idx.0].parent;
        while let Some(p) = cur {
            out.push(p);
            cur = self.nodes[p.0].parent;
        }
        out
    }

    /// Names of the ancestors below the project, outermost first.
    pub fn ancestor_names(&self, idx: NodeIdx) -> Vec<String> {
        let mut names: Vec<String> = self
            .ancestors(idx)
            .into_iter()
            .filter(|&a| a != self.root)
            .map(|a| self.nodes[a.0].name.clone())
            .collect();
        names.reverse();
        names
    }

    /// Display path below the project, e.g. `Seq01/Shot010`. The project
    /// itself displays as its name.
    pub fn path(&self, idx: NodeIdx) -> String {
        if idx == self.root {
            return self.nodes[idx.0].name.clone();
        }
        let mut items = self.ancestor_names(idx);
        items.push(self.nodes[idx.0].name.clone());
        items.join("/")
    }

    pub fn depth(&self, idx: NodeIdx) -> usize {
        self.ancestors(idx).len()
    }

    pub fn is_active(&self, idx: NodeIdx) -> bool {
        self.nodes[idx.0].is_active()
    }

    /// Exclude `idx` and its whole subtree. Nodes already excluded keep
    /// their original reason. Returns the newly excluded nodes.
    pub fn exclude_subtree(&mut self, idx: NodeIdx, reason: ExclusionReason) -> Vec<NodeIdx> {
        let mut excluded = Vec::new();
        for (n, member) in self.bfs_from(idx).into_iter().enumerate() {
            let node = &mut self.nodes[member.0];
            if matches!(node.state, NodeState::Excluded(_)) {
                continue;
            }
            node.state = NodeState::Excluded(if n == 0 {
                reason
            } else {
                ExclusionReason::Ancestor
            });
            excluded.push(member);
        }
        excluded
    }

    /// Move `idx` under `new_parent`, keeping children order stable.
    pub fn reparent(&mut self, idx: NodeIdx, new_parent: NodeIdx) {
        if let Some(old) = self.nodes[idx.0].parent {
            self.nodes[old.0].children.retain(|&c| c != idx);
        }
        self.nodes[idx.0].parent = Some(new_parent);
        self.nodes[new_parent.0].children.push(idx);
    }

    /// Whether any node of the tree, whatever its state, is named `name`.
    pub fn has_name(&self, name: &str) -> bool {
        self.nodes.iter().any(|n| n.name == name)
    }

    /// Every node other than `except`, whatever its state, named `name`.
    pub fn named_except(&self, name: &str, except: NodeIdx) -> Vec<NodeIdx> {
        self.iter()
            .filter(|&(idx, n)| idx != except && n.name == name)
            .map(|(idx, _)| idx)
            .collect()
    }

    /// Recompute `hier_attrs` of `from` and its subtree, top-down: the
    /// parent's resolved values overlaid with the node's own.
    pub fn resolve_hierarchical(&mut self, from: NodeIdx) {
        for idx in self.bfs_from(from) {
            let mut attrs = match self.nodes[idx.0].parent {
                Some(parent) => self.nodes[parent.0].hier_attrs.clone(),
                None => AttrMap::new(),
            };
            let node = &mut self.nodes[idx.0];
            attrs.extend(node.own_hier_attrs.iter().map(|(k, v)| (k.clone(), v.clone())));
            node.hier_attrs = attrs;
        }
    }
}

// ---------------------------------------------------------------------------
// Test fixtures
// ---------------------------------------------------------------------------


#[cfg(test)]
mod tests {
    use super::fixtures::*;
    use super::*;
    use treeline_core::types::Value;

    #[test]
    fn paths_exclude_project() {
        let tree = small_tree();
        let shot = tree.find(&SourceId::from("s1a")).unwrap();
        assert_eq!(tree.path(shot), "Seq01/Shot010");
        assert_eq!(tree.ancestor_names(shot), vec!["Seq01".to_string()]);
        assert_eq!(tree.path(tree.root()), "show");
        assert_eq!(tree.depth(shot), 2);
    }

    #[test]
    fn bfs_visits_parents_first() {
        let tree = small_tree();
        let order: Vec<String> = tree
            .bfs()
            .into_iter()
            .map(|i| tree.node(i).name.clone())
            .collect();
        assert_eq!(order, vec!["show", "Seq01", "Seq02", "Shot010", "Shot020"]);
    }

    #[test]
    fn exclude_cascades_with_ancestor_reason() {
        let mut tree = small_tree();
        let seq01 = tree.find(&SourceId::from("s1")).unwrap();
        let excluded = tree.exclude_subtree(seq01, ExclusionReason::DuplicateName);
        assert_eq!(excluded.len(), 3);
        assert_eq!(
            tree.node(seq01).state,
            NodeState::Excluded(ExclusionReason::DuplicateName)
        );
        let shot = tree.find(&SourceId::from("s1b")).unwrap();
        assert_eq!(
            tree.node(shot).state,
            NodeState::Excluded(ExclusionReason::Ancestor)
        );
        assert!(tree.is_active(tree.find(&SourceId::from("s2")).unwrap()));
    }

    #[test]
    fn reparent_moves_child_links() {
        let mut tree = small_tree();
        let shot = tree.find(&SourceId::from("s1a")).unwrap();
        let seq02 = tree.find(&SourceId::from("s2")).unwrap();
        tree.reparent(shot, seq02);
        assert_eq!(tree.path(shot), "Seq02/Shot010");
        assert_eq!(tree.node(seq02).children, vec![shot]);
    }

    #[test]
    fn reparent_then_resolve_inherits_from_new_parent() {
        let mut tree = small_tree();
        let seq01 = tree.find(&SourceId::from("s1")).unwrap();
        let seq02 = tree.find(&SourceId::from("s2")).unwrap();
        let shot = tree.find(&SourceId::from("s1a")).unwrap();
        tree.node_mut(seq01).own_hier_attrs.insert("fps".into(), Value::Int(25));
        tree.node_mut(seq02).own_hier_attrs.insert("fps".into(), Value::Int(30));
        tree.node_mut(shot).own_hier_attrs.insert("frame_start".into(), Value::Int(1001));
        tree.resolve_hierarchical(tree.root());
        assert_eq!(tree.node(shot).hier_attrs.get("fps"), Some(&Value::Int(25)));

        tree.reparent(shot, seq02);
        tree.resolve_hierarchical(shot);
        assert_eq!(tree.node(shot).hier_attrs.get("fps"), Some(&Value::Int(30)));
        assert_eq!(
            tree.node(shot).hier_attrs.get("frame_start"),
            Some(&Value::Int(1001))
        );
    }

    #[test]
    fn named_except_skips_the_given_node() {
        let tree = small_tree();
        let shot = tree.find(&SourceId::from("s1a")).unwrap();
        assert!(tree.named_except("Shot010", shot).is_empty());
        assert_eq!(tree.named_except("Shot020", shot).len(), 1);
    }

    #[test]
    fn merged_attrs_prefer_flat() {
        let mut n = node("x", "x", Some(NodeIdx(0)));
        n.hier_attrs.insert("fps".into(), Value::Int(24));
        n.flat_attrs.insert("fps".into(), Value::Int(25));
        n.flat_attrs.insert("label".into(), Value::from("hero"));
        let merged = n.merged_attrs();
        assert_eq!(merged.get("fps"), Some(&Value::Int(25)));
        assert_eq!(merged.len(), 2);
    }
}
