use serde::{Deserialize, Serialize};

use crate::model::task::{Origin, TaskId, TaskStatus};
use crate::model::tree::Forest;
use crate::ops::merge::{TaskPatch, patch_tasks};
use crate::ops::position::{Allocation, PositionAllocator, PositionUpdate};

/// Error type for gestures rejected before any state change
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ValidationError {
    #[error("task not found: {0}")]
    NotFound(TaskId),
    #[error("drop target not found: {0}")]
    TargetNotFound(TaskId),
    #[error("task {task_id} is read-only: {locked_by} is locked")]
    Locked { task_id: TaskId, locked_by: TaskId },
    #[error("cannot drop into {0}: it is inside a locked subtree")]
    TargetLocked(TaskId),
    #[error("cannot move {0} into its own subtree")]
    IntoOwnSubtree(TaskId),
    #[error("moving {task_id} would nest tasks at level {level} (maximum is {max})")]
    MaxDepthExceeded {
        task_id: TaskId,
        level: usize,
        max: usize,
    },
    #[error("cannot move a {dragged} task into a {target} tree")]
    OriginMismatch { dragged: Origin, target: Origin },
    #[error("cannot move {0} to a different project")]
    CrossRoot(TaskId),
    #[error("status {status} is only valid for projects, not {task_id}")]
    ProjectOnlyStatus { task_id: TaskId, status: TaskStatus },
    #[error("a move of {0} is still being saved")]
    MoveInFlight(TaskId),
    #[error("cannot drop into {0}: its ancestors are not loaded")]
    AncestryNotLoaded(TaskId),
}

/// Where a dragged task was dropped
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DropTarget {
    /// Origin of the tree the drop landed in
    pub origin: Origin,
    /// New parent; `None` means the top level of the forest
    pub parent_id: Option<TaskId>,
    /// Board column, when dropping in board view
    #[serde(default)]
    pub status: Option<TaskStatus>,
    /// Index among the destination siblings (excluding the dragged task)
    pub index: usize,
}

/// The fields a move can change
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Placement {
    pub position: f64,
    pub parent_id: Option<TaskId>,
    pub status: TaskStatus,
}

/// A persistence call, matching exactly what a gesture changed
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PersistCall {
    Position {
        task_id: TaskId,
        position: f64,
    },
    PositionAndParent {
        task_id: TaskId,
        position: f64,
        parent_id: Option<TaskId>,
    },
    Status {
        task_id: TaskId,
        status: TaskStatus,
    },
    BulkPositions {
        updates: Vec<PositionUpdate>,
    },
}

/// A validated move: what to apply locally, how to undo it, what to persist
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MovePlan {
    pub task_id: TaskId,
    pub before: Placement,
    pub after: Placement,
    /// Optimistic patches (moved task first, then respaced siblings)
    pub apply: Vec<TaskPatch>,
    /// Patches restoring every touched task to its pre-drag values
    pub revert: Vec<TaskPatch>,
    pub calls: Vec<PersistCall>,
}

impl MovePlan {
    /// True when the drop lands where the task already is
    pub fn is_noop(&self) -> bool {
        self.calls.is_empty()
    }

    pub fn parent_changed(&self) -> bool {
        self.before.parent_id != self.after.parent_id
    }

    pub fn status_changed(&self) -> bool {
        self.before.status != self.after.status
    }

    pub fn renormalized(&self) -> bool {
        self.calls
            .iter()
            .any(|c| matches!(c, PersistCall::BulkPositions { .. }))
    }

    /// Every task id this plan writes
    pub fn touched_ids(&self) -> Vec<TaskId> {
        self.apply.iter().map(|p| p.task_id.clone()).collect()
    }
}

/// Validate a drop and compute its placement.
///
/// Rejects locked tasks (or tasks under a locked ancestor), locked or missing
/// destinations, drops into the task's own subtree, drops that would nest any
/// part of the moved subtree beyond `max_level`, cross-origin drops, and drops
/// into another project.
pub fn plan_move(
    forest: &Forest,
    task_id: &TaskId,
    target: &DropTarget,
    allocator: &PositionAllocator,
    max_level: usize,
) -> Result<MovePlan, ValidationError> {
    let path = forest
        .path_to(task_id)
        .ok_or_else(|| ValidationError::NotFound(task_id.clone()))?;
    if let Some(locked) = path.iter().find(|n| n.task.is_locked) {
        return Err(ValidationError::Locked {
            task_id: task_id.clone(),
            locked_by: locked.task.id.clone(),
        });
    }
    let node = path[path.len() - 1];
    let task = &node.task;

    if target.origin != task.origin {
        return Err(ValidationError::OriginMismatch {
            dragged: task.origin,
            target: target.origin,
        });
    }

    let dest_parent = target.parent_id.clone().or_else(|| forest.scope.clone());
    let dest_level = match &dest_parent {
        None => {
            // Only projects live at the top level; anything else would change root
            if !task.is_root() {
                return Err(ValidationError::CrossRoot(task_id.clone()));
            }
            0
        }
        Some(parent) if forest.scope.as_ref() == Some(parent) && !forest.contains(parent) => {
            forest.base_level
        }
        Some(parent) => {
            if parent == task_id || forest.descendant_ids(task_id).contains(parent) {
                return Err(ValidationError::IntoOwnSubtree(task_id.clone()));
            }
            let parent_path = forest
                .path_to(parent)
                .ok_or_else(|| ValidationError::TargetNotFound(parent.clone()))?;
            if parent_path.iter().any(|n| n.task.is_locked) {
                return Err(ValidationError::TargetLocked(parent.clone()));
            }
            let parent_node = parent_path[parent_path.len() - 1];
            if parent_node.task.origin != task.origin {
                return Err(ValidationError::OriginMismatch {
                    dragged: task.origin,
                    target: parent_node.task.origin,
                });
            }
            if parent_node.task.root_id != task.root_id {
                return Err(ValidationError::CrossRoot(task_id.clone()));
            }
            forest
                .level(parent)
                .ok_or_else(|| ValidationError::AncestryNotLoaded(parent.clone()))?
                + 1
        }
    };

    let deepest = dest_level + node.height();
    if deepest > max_level {
        return Err(ValidationError::MaxDepthExceeded {
            task_id: task_id.clone(),
            level: deepest,
            max: max_level,
        });
    }

    let new_status = target.status.unwrap_or(task.status);
    if new_status.is_project_only() && dest_parent.is_some() {
        return Err(ValidationError::ProjectOnlyStatus {
            task_id: task_id.clone(),
            status: new_status,
        });
    }

    let before = Placement {
        position: task.position,
        parent_id: task.parent_id.clone(),
        status: task.status,
    };

    // Destination container: all of the parent's children. In board view the
    // drop index counts places in one status column only.
    let container: Vec<(TaskId, f64, TaskStatus)> = forest
        .children_of(dest_parent.as_ref())
        .unwrap_or(&[])
        .iter()
        .filter(|n| n.task.origin == task.origin)
        .map(|n| (n.task.id.clone(), n.task.position, n.task.status))
        .collect();
    let current_slot = container.iter().position(|(id, ..)| id == task_id);
    let others: Vec<(TaskId, f64, TaskStatus)> = container
        .into_iter()
        .filter(|(id, ..)| id != task_id)
        .collect();
    let slot = match target.status {
        None => target.index.min(others.len()),
        Some(column) => column_slot(&others, column, target.index, current_slot),
    };
    let siblings: Vec<(TaskId, f64)> = others
        .into_iter()
        .map(|(id, position, _)| (id, position))
        .collect();

    let mut plan = MovePlan {
        task_id: task_id.clone(),
        before: before.clone(),
        after: Placement {
            position: before.position,
            parent_id: dest_parent.clone(),
            status: new_status,
        },
        apply: Vec::new(),
        revert: Vec::new(),
        calls: Vec::new(),
    };

    let stays_put = current_slot == Some(slot);
    let allocation = if stays_put {
        None
    } else {
        Some(allocator.allocate_in(&siblings, task_id, slot))
    };

    let mut respaced = Vec::new();
    match &allocation {
        None => {}
        Some(Allocation::Single(position)) => plan.after.position = *position,
        Some(Allocation::Renormalize(updates)) => {
            for update in updates {
                if &update.task_id == task_id {
                    plan.after.position = update.position;
                } else if let Some((_, old)) = siblings.iter().find(|(id, _)| id == &update.task_id)
                    && *old != update.position
                {
                    respaced.push((update.clone(), *old));
                }
            }
        }
    }

    let position_changed = plan.after.position != before.position;
    if !position_changed && !plan.parent_changed() && !plan.status_changed() {
        return Ok(plan);
    }

    plan.apply.push(TaskPatch {
        task_id: task_id.clone(),
        position: Some(plan.after.position),
        parent_id: Some(plan.after.parent_id.clone()),
        status: Some(plan.after.status),
    });
    plan.revert.push(TaskPatch {
        task_id: task_id.clone(),
        position: Some(before.position),
        parent_id: Some(before.parent_id.clone()),
        status: Some(before.status),
    });
    for (update, old) in &respaced {
        let mut forward = TaskPatch::new(update.task_id.clone());
        forward.position = Some(update.position);
        plan.apply.push(forward);
        let mut back = TaskPatch::new(update.task_id.clone());
        back.position = Some(*old);
        plan.revert.push(back);
    }

    let mut bulk: Vec<PositionUpdate> = respaced.into_iter().map(|(u, _)| u).collect();
    if plan.parent_changed() {
        plan.calls.push(PersistCall::PositionAndParent {
            task_id: task_id.clone(),
            position: plan.after.position,
            parent_id: plan.after.parent_id.clone(),
        });
    } else if position_changed {
        if bulk.is_empty() {
            plan.calls.push(PersistCall::Position {
                task_id: task_id.clone(),
                position: plan.after.position,
            });
        } else {
            bulk.insert(
                0,
                PositionUpdate {
                    task_id: task_id.clone(),
                    position: plan.after.position,
                },
            );
        }
    }
    if !bulk.is_empty() {
        plan.calls.push(PersistCall::BulkPositions { updates: bulk });
    }
    if plan.status_changed() {
        plan.calls.push(PersistCall::Status {
            task_id: task_id.clone(),
            status: plan.after.status,
        });
    }

    tracing::debug!(
        task = %task_id,
        position = plan.after.position,
        parent_changed = plan.parent_changed(),
        status_changed = plan.status_changed(),
        calls = plan.calls.len(),
        "planned move"
    );
    Ok(plan)
}

/// Slot in the full sibling list for the `index`-th place of a status column:
/// right after the column entry that precedes it, else right before the
/// column's first entry. An empty column keeps the task where it is, or
/// appends it when it comes from another parent.
fn column_slot(
    siblings: &[(TaskId, f64, TaskStatus)],
    column: TaskStatus,
    index: usize,
    current: Option<usize>,
) -> usize {
    let in_column: Vec<usize> = siblings
        .iter()
        .enumerate()
        .filter(|(_, (_, _, status))| *status == column)
        .map(|(i, _)| i)
        .collect();
    match index.min(in_column.len()).checked_sub(1) {
        Some(prev) => in_column[prev] + 1,
        None => in_column
            .first()
            .copied()
            .or(current)
            .unwrap_or(siblings.len()),
    }
}

/// The forest with the plan's optimistic changes applied
pub fn apply_plan(forest: &Forest, plan: &MovePlan) -> Forest {
    forest.with_roots(patch_tasks(&forest.roots, &plan.apply))
}

/// The forest with every task the plan touched put back where it was
pub fn revert_plan(forest: &Forest, plan: &MovePlan) -> Forest {
    forest.with_roots(patch_tasks(&forest.roots, &plan.revert))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::task::{MAX_LEVEL, Task};
    use crate::ops::build::build_forest;
    use pretty_assertions::assert_eq;

    fn child(id: &str, parent: &Task, pos: f64) -> Task {
        Task::new_child(id.into(), id, parent, pos)
    }

    fn items() -> Vec<Task> {
        let p = Task::new_root("P".into(), "Launch", Origin::Instance, 1000.0);
        let a = child("A", &p, 1000.0);
        let b = child("B", &p, 2000.0);
        let m = child("M", &a, 1000.0);
        let m2 = child("M2", &a, 2000.0);
        let t = child("T", &m, 1000.0);
        let s = child("S", &t, 1000.0);
        let t2 = child("T2", &m2, 1000.0);
        let b1 = child("b1", &b, 1000.0);
        let mut b2 = child("b2", &b, 2000.0);
        b2.status = TaskStatus::InProgress;
        let b3 = child("b3", &b, 3000.0);
        let q = Task::new_root("Q".into(), "Other", Origin::Instance, 2000.0);
        let q1 = child("q1", &q, 1000.0);
        let tt = Task::new_root("TT".into(), "Template", Origin::Template, 3000.0);
        let tt1 = child("tt1", &tt, 1000.0);
        vec![p, a, b, m, m2, t, s, t2, b1, b2, b3, q, q1, tt, tt1]
    }

    fn forest_with(edit: impl FnOnce(&mut Vec<Task>)) -> Forest {
        let mut tasks = items();
        edit(&mut tasks);
        build_forest(&tasks, None, 0)
    }

    fn forest() -> Forest {
        forest_with(|_| {})
    }

    fn target(parent: &str, index: usize) -> DropTarget {
        DropTarget {
            origin: Origin::Instance,
            parent_id: Some(parent.into()),
            status: None,
            index,
        }
    }

    fn plan(forest: &Forest, id: &str, target: &DropTarget) -> Result<MovePlan, ValidationError> {
        plan_move(forest, &id.into(), target, &PositionAllocator::default(), MAX_LEVEL)
    }

    fn child_ids(forest: &Forest, parent: &str) -> Vec<String> {
        forest
            .find(&parent.into())
            .unwrap()
            .children
            .iter()
            .map(|n| n.id().0.clone())
            .collect()
    }

    #[test]
    fn reorder_within_parent_is_position_only() {
        let forest = forest();
        let plan = plan(&forest, "b3", &target("B", 0)).unwrap();
        assert_eq!(
            plan.calls,
            vec![PersistCall::Position {
                task_id: "b3".into(),
                position: 500.0
            }]
        );
        let moved = apply_plan(&forest, &plan);
        assert_eq!(child_ids(&moved, "B"), vec!["b3", "b1", "b2"]);
    }

    #[test]
    fn reparent_sends_parent_with_position() {
        let forest = forest();
        let plan = plan(&forest, "b1", &target("A", 1)).unwrap();
        assert_eq!(
            plan.calls,
            vec![PersistCall::PositionAndParent {
                task_id: "b1".into(),
                position: 1500.0,
                parent_id: Some("A".into()),
            }]
        );
        let moved = apply_plan(&forest, &plan);
        assert_eq!(child_ids(&moved, "A"), vec!["M", "b1", "M2"]);
        assert_eq!(child_ids(&moved, "B"), vec!["b2", "b3"]);
    }

    #[test]
    fn board_column_drop_stages_status() {
        let forest = forest();
        let mut t = target("B", 1);
        t.status = Some(TaskStatus::InProgress);
        // Second place in the column: right after b2, still before b3
        let plan = plan(&forest, "b1", &t).unwrap();
        assert_eq!(
            plan.calls,
            vec![
                PersistCall::Position {
                    task_id: "b1".into(),
                    position: 2500.0
                },
                PersistCall::Status {
                    task_id: "b1".into(),
                    status: TaskStatus::InProgress
                },
            ]
        );
        let moved = apply_plan(&forest, &plan);
        assert_eq!(moved.find(&"b1".into()).unwrap().task.status, TaskStatus::InProgress);
        assert_eq!(child_ids(&moved, "B"), vec!["b2", "b1", "b3"]);
    }

    #[test]
    fn board_drop_into_empty_column_keeps_place() {
        let forest = forest();
        let mut t = target("B", 0);
        t.status = Some(TaskStatus::Blocked);
        let plan = plan(&forest, "b3", &t).unwrap();
        assert_eq!(
            plan.calls,
            vec![PersistCall::Status {
                task_id: "b3".into(),
                status: TaskStatus::Blocked
            }]
        );
    }

    #[test]
    fn board_renormalization_spans_every_column() {
        let forest = forest_with(|tasks| {
            for task in tasks.iter_mut() {
                match task.id.as_str() {
                    "b1" => task.position = 1.0,
                    "b2" => task.position = 1.00005,
                    "b3" => {
                        task.position = 5.0;
                        task.status = TaskStatus::InProgress;
                    }
                    _ => {}
                }
            }
        });
        let mut t = target("B", 0);
        t.status = Some(TaskStatus::InProgress);
        let plan = plan(&forest, "b3", &t).unwrap();
        assert!(plan.renormalized());

        let moved = apply_plan(&forest, &plan);
        assert_eq!(child_ids(&moved, "B"), vec!["b1", "b3", "b2"]);
        let positions: Vec<f64> = moved
            .find(&"B".into())
            .unwrap()
            .children
            .iter()
            .map(|n| n.task.position)
            .collect();
        assert_eq!(positions, vec![1000.0, 2000.0, 3000.0]);
    }

    #[test]
    fn dropping_in_place_is_noop() {
        let forest = forest();
        let plan = plan(&forest, "b2", &target("B", 1)).unwrap();
        assert!(plan.is_noop());
        assert!(plan.apply.is_empty());
        assert_eq!(apply_plan(&forest, &plan), forest);
    }

    #[test]
    fn revert_restores_previous_order_exactly() {
        let forest = forest();
        let plan = plan(&forest, "b1", &target("A", 0)).unwrap();
        let moved = apply_plan(&forest, &plan);
        assert_ne!(moved, forest);
        assert_eq!(revert_plan(&moved, &plan), forest);
    }

    #[test]
    fn locked_task_is_rejected() {
        let forest = forest_with(|t| t[3].is_locked = true); // M
        let err = plan(&forest, "M", &target("A", 2)).unwrap_err();
        assert!(matches!(err, ValidationError::Locked { ref locked_by, .. } if locked_by.as_str() == "M"));
    }

    #[test]
    fn descendant_of_locked_task_is_rejected() {
        let forest = forest_with(|t| t[1].is_locked = true); // A
        let err = plan(&forest, "T", &target("M2", 0)).unwrap_err();
        assert_eq!(
            err,
            ValidationError::Locked {
                task_id: "T".into(),
                locked_by: "A".into()
            }
        );
    }

    #[test]
    fn dropping_into_locked_subtree_is_rejected() {
        let forest = forest_with(|t| t[1].is_locked = true); // A
        let err = plan(&forest, "b1", &target("M", 0)).unwrap_err();
        assert_eq!(err, ValidationError::TargetLocked("M".into()));
    }

    #[test]
    fn depth_counts_the_moved_subtree() {
        let forest = forest();
        // T has a child, so under T2 (level 3) its child would land at level 5
        let err = plan(&forest, "T", &target("T2", 0)).unwrap_err();
        assert!(matches!(err, ValidationError::MaxDepthExceeded { level: 5, max: 4, .. }));
        // A leaf fits at level 4
        assert!(plan(&forest, "S", &target("T2", 0)).is_ok());
    }

    #[test]
    fn drop_under_detached_branch_is_rejected() {
        // Without P and A loaded, M and M2 float at the top with unknown depth
        let forest = forest_with(|tasks| tasks.retain(|t| t.id.as_str() != "P" && t.id.as_str() != "A"));
        assert_eq!(
            plan(&forest, "T", &target("T2", 0)).unwrap_err(),
            ValidationError::AncestryNotLoaded("T2".into())
        );
    }

    #[test]
    fn cross_origin_drop_is_rejected() {
        let forest = forest();
        let err = plan(&forest, "tt1", &target("A", 0)).unwrap_err();
        assert!(matches!(err, ValidationError::OriginMismatch { .. }));

        let mut into_template = target("TT", 0);
        into_template.origin = Origin::Template;
        let err = plan(&forest, "b1", &into_template).unwrap_err();
        assert!(matches!(
            err,
            ValidationError::OriginMismatch {
                dragged: Origin::Instance,
                target: Origin::Template
            }
        ));
    }

    #[test]
    fn cross_project_drop_is_rejected() {
        let forest = forest();
        assert_eq!(
            plan(&forest, "b1", &target("q1", 0)).unwrap_err(),
            ValidationError::CrossRoot("b1".into())
        );
        let mut top = target("P", 0);
        top.parent_id = None;
        assert_eq!(
            plan(&forest, "b1", &top).unwrap_err(),
            ValidationError::CrossRoot("b1".into())
        );
    }

    #[test]
    fn projects_reorder_among_roots() {
        let forest = forest();
        let mut top = target("P", 0);
        top.parent_id = None;
        let plan = plan(&forest, "Q", &top).unwrap();
        assert_eq!(plan.after.position, 500.0);
        assert!(!plan.parent_changed());
    }

    #[test]
    fn cannot_drop_into_own_subtree() {
        let forest = forest();
        assert_eq!(
            plan(&forest, "A", &target("T", 0)).unwrap_err(),
            ValidationError::IntoOwnSubtree("A".into())
        );
    }

    #[test]
    fn unknown_ids_are_rejected() {
        let forest = forest();
        assert_eq!(
            plan(&forest, "nope", &target("A", 0)).unwrap_err(),
            ValidationError::NotFound("nope".into())
        );
        assert_eq!(
            plan(&forest, "b1", &target("nope", 0)).unwrap_err(),
            ValidationError::TargetNotFound("nope".into())
        );
    }

    #[test]
    fn exhausted_gap_renormalizes_siblings() {
        let forest = forest_with(|t| {
            t[8].position = 1.0; // b1
            t[9].position = 1.00001; // b2
        });
        let plan = plan(&forest, "b3", &target("B", 1)).unwrap();
        assert!(plan.renormalized());
        let PersistCall::BulkPositions { updates } = &plan.calls[0] else {
            panic!("expected bulk update, got {:?}", plan.calls);
        };
        let mut written: Vec<(&str, f64)> = updates
            .iter()
            .map(|u| (u.task_id.as_str(), u.position))
            .collect();
        written.sort_by(|a, b| a.1.total_cmp(&b.1));
        assert_eq!(written, vec![("b1", 1000.0), ("b3", 2000.0), ("b2", 3000.0)]);

        let moved = apply_plan(&forest, &plan);
        assert_eq!(child_ids(&moved, "B"), vec!["b1", "b3", "b2"]);
        assert_eq!(revert_plan(&moved, &plan), forest);
    }
}
