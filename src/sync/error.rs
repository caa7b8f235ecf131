use std::fmt;

use serde::Serialize;

use crate::model::task::TaskId;
use crate::ops::move_plan::ValidationError;
use crate::sync::store::StoreError;

/// Store operation that failed, for error context and logs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Operation {
    FetchChildren,
    FetchRoots,
    UpdatePosition,
    UpdatePositions,
    UpdateStatus,
    Delete,
    Clone,
    Create,
    Search,
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Operation::FetchChildren => "fetch children",
            Operation::FetchRoots => "fetch roots",
            Operation::UpdatePosition => "update position",
            Operation::UpdatePositions => "update positions",
            Operation::UpdateStatus => "update status",
            Operation::Delete => "delete",
            Operation::Clone => "clone",
            Operation::Create => "create",
            Operation::Search => "search",
        };
        f.write_str(name)
    }
}

/// Error type for coordinator operations
#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    /// Rejected before anything changed
    #[error(transparent)]
    Validation(#[from] ValidationError),

    /// The store call failed; any optimistic change has been rolled back
    #[error("{operation} failed{}: {source}", .task_id.as_ref().map(|id| format!(" for {id}")).unwrap_or_default())]
    Store {
        operation: Operation,
        task_id: Option<TaskId>,
        #[source]
        source: StoreError,
    },

    /// The store reported a clone whose subtree does not add up
    #[error("clone of {source_root_id} is incomplete: expected {expected} tasks, found {found}")]
    CloneAtomicity {
        source_root_id: TaskId,
        new_root_id: TaskId,
        expected: usize,
        found: usize,
    },
}

impl SyncError {
    pub fn store(operation: Operation, task_id: Option<&TaskId>, source: StoreError) -> Self {
        SyncError::Store {
            operation,
            task_id: task_id.cloned(),
            source,
        }
    }

    /// The task the failure concerns, when there is one
    pub fn task_id(&self) -> Option<&TaskId> {
        match self {
            SyncError::Validation(_) => None,
            SyncError::Store { task_id, .. } => task_id.as_ref(),
            SyncError::CloneAtomicity { source_root_id, .. } => Some(source_root_id),
        }
    }

    pub fn is_validation(&self) -> bool {
        matches!(self, SyncError::Validation(_))
    }
}
