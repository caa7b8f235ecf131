use serde::Serialize;

use super::task::{Task, TaskId};

/// A task as rendered: the persisted record plus client-only state
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TreeNode {
    #[serde(flatten)]
    pub task: Task,
    /// Children sorted by position
    pub children: Vec<TreeNode>,
    /// Whether the node is open in the tree view (never persisted)
    pub is_expanded: bool,
}

impl TreeNode {
    pub fn new(task: Task) -> Self {
        TreeNode {
            task,
            children: Vec::new(),
            is_expanded: false,
        }
    }

    pub fn id(&self) -> &TaskId {
        &self.task.id
    }

    /// Number of nodes in this subtree, including this one
    pub fn subtree_len(&self) -> usize {
        1 + self.children.iter().map(TreeNode::subtree_len).sum::<usize>()
    }

    /// Distance from this node to its deepest descendant (0 for a leaf)
    pub fn height(&self) -> usize {
        self.children
            .iter()
            .map(|c| c.height() + 1)
            .max()
            .unwrap_or(0)
    }

    /// Child counts in pre-order; two subtrees with equal shapes are isomorphic
    pub fn shape(&self) -> Vec<usize> {
        let mut out = Vec::new();
        shape_into(self, &mut out);
        out
    }
}

fn shape_into(node: &TreeNode, out: &mut Vec<usize>) {
    out.push(node.children.len());
    for child in &node.children {
        shape_into(child, out);
    }
}

/// An immutable snapshot of the rendered forest.
///
/// Every mutation produces a new `Forest`; the coordinator swaps snapshots
/// wholesale so readers never observe a half-updated children list.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Forest {
    /// Parent id of the top-level nodes (`None` = the forest of projects)
    pub scope: Option<TaskId>,
    /// Level of nodes whose parent is `scope`
    pub base_level: usize,
    pub roots: Vec<TreeNode>,
}

impl Forest {
    pub fn new(roots: Vec<TreeNode>) -> Self {
        Forest {
            scope: None,
            base_level: 0,
            roots,
        }
    }

    pub fn scoped(scope: Option<TaskId>, base_level: usize, roots: Vec<TreeNode>) -> Self {
        Forest {
            scope,
            base_level,
            roots,
        }
    }

    /// Same scope, new top-level nodes
    pub fn with_roots(&self, roots: Vec<TreeNode>) -> Self {
        Forest {
            scope: self.scope.clone(),
            base_level: self.base_level,
            roots,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.roots.is_empty()
    }

    /// Total number of nodes
    pub fn len(&self) -> usize {
        self.roots.iter().map(TreeNode::subtree_len).sum()
    }

    pub fn find(&self, id: &TaskId) -> Option<&TreeNode> {
        find_in(&self.roots, id)
    }

    pub fn contains(&self, id: &TaskId) -> bool {
        self.find(id).is_some()
    }

    /// Chain of nodes from the top-level ancestor down to `id` (inclusive)
    pub fn path_to(&self, id: &TaskId) -> Option<Vec<&TreeNode>> {
        let mut path = Vec::new();
        if path_in(&self.roots, id, &mut path) {
            Some(path)
        } else {
            None
        }
    }

    /// Derived hierarchy level of a node (0 = project).
    ///
    /// `None` when the node is unknown, or when it hangs off a top-level node
    /// whose parent is neither a root marker nor the scope: its ancestors were
    /// never loaded, so its depth is not known.
    pub fn level(&self, id: &TaskId) -> Option<usize> {
        let path = self.path_to(id)?;
        let top = path.first()?;
        let top_level = match &top.task.parent_id {
            None => 0,
            Some(parent) if self.scope.as_ref() == Some(parent) => self.base_level,
            Some(_) => return None,
        };
        Some(top_level + path.len() - 1)
    }

    /// Children of `parent`, where `None` (or the scope id) means the top level.
    /// Returns `None` when the parent is not held locally.
    pub fn children_of(&self, parent: Option<&TaskId>) -> Option<&[TreeNode]> {
        match parent {
            None => Some(&self.roots),
            Some(p) if self.scope.as_ref() == Some(p) => Some(&self.roots),
            Some(p) => self.find(p).map(|n| n.children.as_slice()),
        }
    }

    /// Ids of every descendant of `id` held locally (pre-order, excluding `id`)
    pub fn descendant_ids(&self, id: &TaskId) -> Vec<TaskId> {
        let mut out = Vec::new();
        if let Some(node) = self.find(id) {
            for child in &node.children {
                collect_ids(child, &mut out);
            }
        }
        out
    }

    /// Visit every node in pre-order
    pub fn for_each(&self, f: &mut dyn FnMut(&TreeNode)) {
        for_each_node(&self.roots, f);
    }
}

fn find_in<'a>(nodes: &'a [TreeNode], id: &TaskId) -> Option<&'a TreeNode> {
    for node in nodes {
        if &node.task.id == id {
            return Some(node);
        }
        if let Some(found) = find_in(&node.children, id) {
            return Some(found);
        }
    }
    None
}

fn path_in<'a>(nodes: &'a [TreeNode], id: &TaskId, path: &mut Vec<&'a TreeNode>) -> bool {
    for node in nodes {
        path.push(node);
        if &node.task.id == id || path_in(&node.children, id, path) {
            return true;
        }
        path.pop();
    }
    false
}

fn collect_ids(node: &TreeNode, out: &mut Vec<TaskId>) {
    out.push(node.task.id.clone());
    for child in &node.children {
        collect_ids(child, out);
    }
}

fn for_each_node(nodes: &[TreeNode], f: &mut dyn FnMut(&TreeNode)) {
    for node in nodes {
        f(node);
        for_each_node(&node.children, f);
    }
}
