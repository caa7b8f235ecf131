use std::collections::{HashMap, HashSet};

use serde::Serialize;

use crate::model::task::{Task, TaskId, TaskStatus};
use crate::model::tree::TreeNode;

/// A partial field update addressed by id
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TaskPatch {
    pub task_id: TaskId,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub position: Option<f64>,
    /// `Some(None)` detaches to the top level; `None` leaves the parent alone
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<Option<TaskId>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<TaskStatus>,
}

impl TaskPatch {
    pub fn new(task_id: TaskId) -> Self {
        TaskPatch {
            task_id,
            position: None,
            parent_id: None,
            status: None,
        }
    }

    pub fn apply_to(&self, task: &mut Task) {
        if let Some(position) = self.position {
            task.position = position;
        }
        if let Some(parent) = &self.parent_id {
            task.parent_id = parent.clone();
        }
        if let Some(status) = self.status {
            task.status = status;
        }
    }
}

/// Fold a fresh batch of records into the current forest.
///
/// Matching nodes take every server-owned field from the batch but keep their
/// children and expansion state; unseen records are added collapsed and
/// childless; nodes missing from the batch are kept. A record lands under its
/// parent when the parent is held, otherwise at the top level.
pub fn merge_task_updates(current: &[TreeNode], fresh: &[Task]) -> Vec<TreeNode> {
    let mut arena = Arena::from_nodes(current);
    for task in fresh {
        arena.upsert(task.clone());
    }
    arena.into_tree()
}

/// Recompute `is_expanded` everywhere from a single set of open ids
pub fn update_tree_expansion(nodes: &[TreeNode], expanded: &HashSet<TaskId>) -> Vec<TreeNode> {
    nodes
        .iter()
        .map(|node| TreeNode {
            task: node.task.clone(),
            children: update_tree_expansion(&node.children, expanded),
            is_expanded: expanded.contains(&node.task.id),
        })
        .collect()
}

/// Ids of every expanded node
pub fn collect_expanded(nodes: &[TreeNode]) -> HashSet<TaskId> {
    let mut out = HashSet::new();
    collect_expanded_into(nodes, &mut out);
    out
}

fn collect_expanded_into(nodes: &[TreeNode], out: &mut HashSet<TaskId>) {
    for node in nodes {
        if node.is_expanded {
            out.insert(node.task.id.clone());
        }
        collect_expanded_into(&node.children, out);
    }
}

/// Drop a node together with every locally held descendant.
/// Returns the new forest and the removed ids (empty if `id` was not present).
pub fn remove_subtree(nodes: &[TreeNode], id: &TaskId) -> (Vec<TreeNode>, Vec<TaskId>) {
    let mut removed = Vec::new();
    let kept = remove_in(nodes, id, &mut removed);
    (kept, removed)
}

fn remove_in(nodes: &[TreeNode], id: &TaskId, removed: &mut Vec<TaskId>) -> Vec<TreeNode> {
    let mut out = Vec::with_capacity(nodes.len());
    for node in nodes {
        if &node.task.id == id {
            collect_subtree_ids(node, removed);
            continue;
        }
        out.push(TreeNode {
            task: node.task.clone(),
            children: remove_in(&node.children, id, removed),
            is_expanded: node.is_expanded,
        });
    }
    out
}

fn collect_subtree_ids(node: &TreeNode, out: &mut Vec<TaskId>) {
    out.push(node.task.id.clone());
    for child in &node.children {
        collect_subtree_ids(child, out);
    }
}

/// Apply patches by id and restructure. Patches for unknown ids are ignored.
pub fn patch_tasks(nodes: &[TreeNode], patches: &[TaskPatch]) -> Vec<TreeNode> {
    let mut arena = Arena::from_nodes(nodes);
    for patch in patches {
        arena.patch(patch);
    }
    arena.into_tree()
}

struct Entry {
    task: Task,
    is_expanded: bool,
}

/// Flat, id-indexed view of a forest used for restructuring
struct Arena {
    slots: Vec<Option<Entry>>,
    index: HashMap<TaskId, usize>,
}

impl Arena {
    fn from_nodes(nodes: &[TreeNode]) -> Self {
        let mut arena = Arena {
            slots: Vec::new(),
            index: HashMap::new(),
        };
        arena.push_nodes(nodes);
        arena
    }

    fn push_nodes(&mut self, nodes: &[TreeNode]) {
        for node in nodes {
            self.insert(node.task.clone(), node.is_expanded);
            self.push_nodes(&node.children);
        }
    }

    fn insert(&mut self, task: Task, is_expanded: bool) {
        match self.index.get(&task.id) {
            Some(&slot) => self.slots[slot] = Some(Entry { task, is_expanded }),
            None => {
                self.index.insert(task.id.clone(), self.slots.len());
                self.slots.push(Some(Entry { task, is_expanded }));
            }
        }
    }

    fn upsert(&mut self, task: Task) {
        match self.index.get(&task.id) {
            Some(&slot) => {
                if let Some(entry) = self.slots[slot].as_mut() {
                    entry.task = task;
                }
            }
            None => self.insert(task, false),
        }
    }

    fn patch(&mut self, patch: &TaskPatch) {
        if let Some(&slot) = self.index.get(&patch.task_id)
            && let Some(entry) = self.slots[slot].as_mut()
        {
            patch.apply_to(&mut entry.task);
        }
    }

    fn into_tree(mut self) -> Vec<TreeNode> {
        let mut top = Vec::new();
        let mut by_parent: HashMap<usize, Vec<usize>> = HashMap::new();
        for (slot, entry) in self.slots.iter().enumerate() {
            let Some(entry) = entry else { continue };
            let parent_slot = entry
                .task
                .parent_id
                .as_ref()
                .and_then(|p| self.index.get(p).copied())
                .filter(|&p| p != slot);
            match parent_slot {
                Some(p) => by_parent.entry(p).or_default().push(slot),
                None => top.push(slot),
            }
        }
        self.assemble(top, &by_parent)
    }

    fn assemble(&mut self, mut slots: Vec<usize>, by_parent: &HashMap<usize, Vec<usize>>) -> Vec<TreeNode> {
        slots.sort_by(|&a, &b| self.position(a).total_cmp(&self.position(b)));
        let mut nodes = Vec::with_capacity(slots.len());
        for slot in slots {
            // Taken before recursing so a parent cycle cannot re-enter
            let Some(entry) = self.slots[slot].take() else {
                continue;
            };
            let children = match by_parent.get(&slot) {
                Some(kids) => self.assemble(kids.clone(), by_parent),
                None => Vec::new(),
            };
            nodes.push(TreeNode {
                task: entry.task,
                children,
                is_expanded: entry.is_expanded,
            });
        }
        nodes
    }

    fn position(&self, slot: usize) -> f64 {
        self.slots[slot]
            .as_ref()
            .map_or(f64::INFINITY, |e| e.task.position)
    }
}
