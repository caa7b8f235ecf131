use std::collections::{HashMap, HashSet};

use indexmap::IndexMap;

use crate::model::task::{Task, TaskId};
use crate::model::tree::{Forest, TreeNode};

/// Build a nested forest out of a flat record set.
///
/// Items whose `parent_id` equals `scope` become top-level nodes; items whose
/// parent is in `items` are linked under it; everything else is outside the
/// scope and silently dropped. Every level is sorted by position, ties keep
/// input order. Duplicate ids: the last record wins.
pub fn build_tree(items: &[Task], scope: Option<&TaskId>) -> Vec<TreeNode> {
    let mut index: IndexMap<&TaskId, &Task> = IndexMap::with_capacity(items.len());
    for item in items {
        index.insert(&item.id, item);
    }

    let mut top: Vec<&Task> = Vec::new();
    let mut by_parent: HashMap<&TaskId, Vec<&Task>> = HashMap::new();
    for task in index.values() {
        if task.parent_id.as_ref() == scope {
            top.push(task);
        } else if let Some(parent) = &task.parent_id
            && index.contains_key(parent)
        {
            by_parent.entry(parent).or_default().push(task);
        }
    }

    let mut emitted = HashSet::with_capacity(index.len());
    assemble(top, &by_parent, &mut emitted)
}

/// `build_tree` wrapped in a `Forest` snapshot
pub fn build_forest(items: &[Task], scope: Option<&TaskId>, base_level: usize) -> Forest {
    Forest::scoped(scope.cloned(), base_level, build_tree(items, scope))
}

fn assemble<'a>(
    mut tasks: Vec<&'a Task>,
    by_parent: &HashMap<&TaskId, Vec<&'a Task>>,
    emitted: &mut HashSet<&'a TaskId>,
) -> Vec<TreeNode> {
    sort_by_position(&mut tasks);
    let mut nodes = Vec::with_capacity(tasks.len());
    for task in tasks {
        // A parent cycle that passes through the scope would otherwise recurse forever
        if !emitted.insert(&task.id) {
            continue;
        }
        let children = match by_parent.get(&task.id) {
            Some(kids) => assemble(kids.clone(), by_parent, emitted),
            None => Vec::new(),
        };
        nodes.push(TreeNode {
            task: task.clone(),
            children,
            is_expanded: false,
        });
    }
    nodes
}

/// Stable ascending sort on `position`
pub fn sort_by_position(tasks: &mut [&Task]) {
    tasks.sort_by(|a, b| a.position.total_cmp(&b.position));
}

pub(crate) fn sort_nodes(nodes: &mut [TreeNode]) {
    nodes.sort_by(|a, b| a.task.position.total_cmp(&b.task.position));
}

/// Pre-order flattening back into records
pub fn flatten(nodes: &[TreeNode]) -> Vec<Task> {
    let mut out = Vec::new();
    flatten_into(nodes, &mut out);
    out
}

fn flatten_into(nodes: &[TreeNode], out: &mut Vec<Task>) {
    for node in nodes {
        out.push(node.task.clone());
        flatten_into(&node.children, out);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::task::Origin;
    use pretty_assertions::assert_eq;

    fn root(id: &str, pos: f64) -> Task {
        Task::new_root(id.into(), id, Origin::Instance, pos)
    }

    fn child(id: &str, parent: &Task, pos: f64) -> Task {
        Task::new_child(id.into(), id, parent, pos)
    }

    fn sample() -> Vec<Task> {
        let p = root("p", 1000.0);
        let q = root("q", 500.0);
        let a = child("a", &p, 2000.0);
        let b = child("b", &p, 1000.0);
        let a1 = child("a1", &a, 1000.0);
        let mut orphan = child("orphan", &p, 10.0);
        orphan.parent_id = Some("gone".into());
        vec![a1, a, orphan, p, b, q]
    }

    fn ids(nodes: &[TreeNode]) -> Vec<&str> {
        nodes.iter().map(|n| n.id().as_str()).collect()
    }

    fn sorted_ids(tasks: &[Task]) -> Vec<String> {
        let mut v: Vec<String> = tasks.iter().map(|t| t.id.0.clone()).collect();
        v.sort();
        v
    }

    #[test]
    fn builds_sorted_forest() {
        let roots = build_tree(&sample(), None);
        assert_eq!(ids(&roots), vec!["q", "p"]);
        let p = &roots[1];
        assert_eq!(ids(&p.children), vec!["b", "a"]);
        assert_eq!(ids(&p.children[1].children), vec!["a1"]);
        assert!(roots.iter().all(|n| !n.is_expanded));
    }

    #[test]
    fn orphans_are_excluded() {
        let roots = build_tree(&sample(), None);
        let flat = flatten(&roots);
        assert!(!flat.iter().any(|t| t.id.as_str() == "orphan"));
        assert_eq!(flat.len(), 5);
    }

    #[test]
    fn flatten_is_permutation_of_reachable() {
        let items = sample();
        let flat = flatten(&build_tree(&items, None));
        let reachable: Vec<Task> = items
            .into_iter()
            .filter(|t| t.id.as_str() != "orphan")
            .collect();
        assert_eq!(sorted_ids(&flat), sorted_ids(&reachable));
    }

    #[test]
    fn scoped_build_uses_scope_children_as_top() {
        let roots = build_tree(&sample(), Some(&"p".into()));
        assert_eq!(ids(&roots), vec!["b", "a"]);
        assert_eq!(flatten(&roots).len(), 3);
    }

    #[test]
    fn every_level_is_non_decreasing() {
        let p = root("p", 1.0);
        let mut items = vec![p.clone()];
        for (i, pos) in [5.0, 3.0, 9.0, 1.0, 3.0].iter().enumerate() {
            items.push(child(&format!("c{}", i), &p, *pos));
        }
        let roots = build_tree(&items, None);
        let positions: Vec<f64> = roots[0].children.iter().map(|n| n.task.position).collect();
        assert!(positions.windows(2).all(|w| w[0] <= w[1]));
        // Equal positions keep input order
        assert_eq!(ids(&roots[0].children)[1..3].to_vec(), vec!["c1", "c4"]);
    }

    #[test]
    fn idempotent_for_identical_input() {
        let items = sample();
        assert_eq!(build_tree(&items, None), build_tree(&items, None));
    }

    #[test]
    fn origins_never_interleave() {
        let inst = Task::new_root("i".into(), "inst", Origin::Instance, 1.0);
        let tmpl = Task::new_root("t".into(), "tmpl", Origin::Template, 2.0);
        let items = vec![
            child("i1", &inst, 1.0),
            child("t1", &tmpl, 1.0),
            inst.clone(),
            tmpl.clone(),
            child("i2", &inst, 2.0),
        ];
        let roots = build_tree(&items, None);
        for top in &roots {
            let origin = top.task.origin;
            for t in flatten(std::slice::from_ref(top)) {
                assert_eq!(t.origin, origin);
            }
        }
    }

    #[test]
    fn cycle_through_scope_terminates() {
        let mut a = root("a", 1.0);
        let mut b = root("b", 2.0);
        a.parent_id = Some("b".into());
        b.parent_id = Some("a".into());
        let roots = build_tree(&[a, b], Some(&"a".into()));
        assert_eq!(flatten(&roots).len(), 2);
    }

    #[test]
    fn duplicate_ids_last_wins() {
        let p = root("p", 1.0);
        let mut newer = p.clone();
        newer.title = "renamed".into();
        let roots = build_tree(&[p, newer], None);
        assert_eq!(roots.len(), 1);
        assert_eq!(roots[0].task.title, "renamed");
    }
}
