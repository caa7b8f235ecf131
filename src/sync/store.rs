use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::io::lock::LockError;
use crate::model::task::{Origin, Task, TaskId, TaskStatus};
use crate::ops::clone::{CloneError, CloneRequest, CloneSummary};
use crate::ops::position::PositionUpdate;

/// Error type for the remote store
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("task not found: {0}")]
    NotFound(TaskId),
    #[error("store unavailable: {0}")]
    Unavailable(String),
    #[error("rejected by store: {0}")]
    Rejected(String),
    #[error("clone rejected: {0}")]
    Clone(#[from] CloneError),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("could not parse task store: {0}")]
    Json(#[from] serde_json::Error),
    #[error(transparent)]
    Lock(#[from] LockError),
}

/// One page of root tasks
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RootsPage {
    pub items: Vec<Task>,
    pub has_more: bool,
}

/// Fields for a task created from scratch
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewTask {
    pub title: String,
    /// `None` creates a project (or template, per `origin`)
    #[serde(default)]
    pub parent_id: Option<TaskId>,
    /// Only consulted for roots; children inherit their parent's origin
    pub origin: Origin,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub creator_id: Option<String>,
    #[serde(default)]
    pub is_locked: bool,
}

impl NewTask {
    pub fn project(title: impl Into<String>) -> Self {
        NewTask {
            title: title.into(),
            parent_id: None,
            origin: Origin::Instance,
            description: None,
            creator_id: None,
            is_locked: false,
        }
    }

    pub fn child(title: impl Into<String>, parent_id: TaskId) -> Self {
        NewTask {
            parent_id: Some(parent_id),
            ..NewTask::project(title)
        }
    }
}

/// The authoritative task table, reachable only asynchronously.
///
/// Calls may complete in any order; the engine never assumes otherwise.
#[async_trait]
pub trait TaskStore: Send + Sync {
    /// The whole subtree rooted at `task_id`, flat, root included
    async fn fetch_children(&self, task_id: &TaskId) -> Result<Vec<Task>, StoreError>;

    async fn fetch_roots_page(&self, offset: usize, limit: usize) -> Result<RootsPage, StoreError>;

    /// Partial update. `new_parent: None` leaves the parent untouched.
    async fn update_task_position(
        &self,
        task_id: &TaskId,
        position: f64,
        new_parent: Option<Option<TaskId>>,
    ) -> Result<Task, StoreError>;

    /// Several position writes for one gesture (renormalization)
    async fn update_positions(&self, updates: &[PositionUpdate]) -> Result<Vec<Task>, StoreError> {
        let mut echoes = Vec::with_capacity(updates.len());
        for update in updates {
            echoes.push(
                self.update_task_position(&update.task_id, update.position, None)
                    .await?,
            );
        }
        Ok(echoes)
    }

    async fn update_task_status(&self, task_id: &TaskId, status: TaskStatus) -> Result<Task, StoreError>;

    /// Deletes the task; the store cascades to descendants
    async fn delete_task(&self, task_id: &TaskId) -> Result<(), StoreError>;

    /// Copy a subtree. Must be all-or-nothing.
    async fn clone_subtree(&self, request: &CloneRequest) -> Result<CloneSummary, StoreError>;

    async fn create_task(&self, new: NewTask) -> Result<Task, StoreError>;

    /// Case-insensitive regex search over titles and descriptions
    async fn search_tasks(&self, query: &str, origin: Option<Origin>) -> Result<Vec<Task>, StoreError>;
}
