use crate::model::task::{TaskId, TaskStatus};
use crate::model::tree::Forest;
use crate::ops::merge::TaskPatch;
use crate::ops::move_plan::ValidationError;

/// A validated status change plus the descendants it drags along
#[derive(Debug, Clone, PartialEq)]
pub struct StatusPlan {
    pub task_id: TaskId,
    pub before: TaskStatus,
    pub after: TaskStatus,
    /// Locally held descendants to complete once the parent is saved
    pub cascade: Vec<TaskId>,
}

impl StatusPlan {
    pub fn is_noop(&self) -> bool {
        self.before == self.after && self.cascade.is_empty()
    }

    pub fn apply_patch(&self) -> TaskPatch {
        status_patch(&self.task_id, self.after)
    }

    pub fn revert_patch(&self) -> TaskPatch {
        status_patch(&self.task_id, self.before)
    }
}

/// Plan a status change. Completing a task also completes every descendant
/// held in `forest` that is not complete yet, when `cascade_complete` is set.
pub fn plan_status(
    forest: &Forest,
    task_id: &TaskId,
    status: TaskStatus,
    cascade_complete: bool,
) -> Result<StatusPlan, ValidationError> {
    let node = forest
        .find(task_id)
        .ok_or_else(|| ValidationError::NotFound(task_id.clone()))?;
    if status.is_project_only() && !node.task.is_root() {
        return Err(ValidationError::ProjectOnlyStatus {
            task_id: task_id.clone(),
            status,
        });
    }

    let cascade = if status == TaskStatus::Complete && cascade_complete {
        forest
            .descendant_ids(task_id)
            .into_iter()
            .filter(|id| {
                forest
                    .find(id)
                    .is_some_and(|n| n.task.status != TaskStatus::Complete)
            })
            .collect()
    } else {
        Vec::new()
    };

    Ok(StatusPlan {
        task_id: task_id.clone(),
        before: node.task.status,
        after: status,
        cascade,
    })
}

pub fn status_patch(task_id: &TaskId, status: TaskStatus) -> TaskPatch {
    let mut patch = TaskPatch::new(task_id.clone());
    patch.status = Some(status);
    patch
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::task::{Origin, Task};
    use crate::ops::build::build_forest;

    fn forest() -> Forest {
        let p = Task::new_root("P".into(), "Launch", Origin::Instance, 1.0);
        let a = Task::new_child("A".into(), "A", &p, 1.0);
        let a1 = Task::new_child("a1".into(), "a1", &a, 1.0);
        let mut a2 = Task::new_child("a2".into(), "a2", &a, 2.0);
        a2.status = TaskStatus::Complete;
        let a3 = Task::new_child("a3".into(), "a3", &a1, 1.0);
        build_forest(&[p, a, a1, a2, a3], None, 0)
    }

    #[test]
    fn complete_cascades_to_open_descendants() {
        let plan = plan_status(&forest(), &"A".into(), TaskStatus::Complete, true).unwrap();
        assert_eq!(plan.before, TaskStatus::Todo);
        assert_eq!(plan.cascade, vec![TaskId::from("a1"), TaskId::from("a3")]);
    }

    #[test]
    fn cascade_can_be_disabled() {
        let plan = plan_status(&forest(), &"A".into(), TaskStatus::Complete, false).unwrap();
        assert!(plan.cascade.is_empty());
    }

    #[test]
    fn other_statuses_do_not_cascade() {
        let plan = plan_status(&forest(), &"A".into(), TaskStatus::Blocked, true).unwrap();
        assert!(plan.cascade.is_empty());
        assert_eq!(plan.apply_patch().status, Some(TaskStatus::Blocked));
        assert_eq!(plan.revert_patch().status, Some(TaskStatus::Todo));
    }

    #[test]
    fn project_statuses_only_on_roots() {
        let forest = forest();
        assert!(plan_status(&forest, &"P".into(), TaskStatus::Active, true).is_ok());
        assert!(matches!(
            plan_status(&forest, &"A".into(), TaskStatus::Planning, true),
            Err(ValidationError::ProjectOnlyStatus { .. })
        ));
    }

    #[test]
    fn unknown_task() {
        assert_eq!(
            plan_status(&forest(), &"x".into(), TaskStatus::Todo, true).unwrap_err(),
            ValidationError::NotFound("x".into())
        );
    }
}
