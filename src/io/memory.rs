use std::collections::{HashMap, VecDeque};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;

use crate::io::document::TaskDocument;
use crate::model::config::EngineConfig;
use crate::model::task::{Origin, Task, TaskId, TaskStatus};
use crate::ops::clone::{CloneRequest, CloneSummary};
use crate::ops::position::PositionUpdate;
use crate::sync::error::Operation;
use crate::sync::store::{NewTask, RootsPage, StoreError, TaskStore};

/// A store call as seen by [`MemoryStore`]
#[derive(Debug, Clone, PartialEq)]
pub struct Call {
    pub operation: Operation,
    pub task_id: Option<TaskId>,
}

#[derive(Debug, Clone)]
struct FailureRule {
    operation: Operation,
    task_id: Option<TaskId>,
    remaining: Option<usize>,
}

impl FailureRule {
    fn matches(&self, operation: Operation, task_id: Option<&TaskId>) -> bool {
        self.operation == operation
            && self.remaining != Some(0)
            && self.task_id.as_ref().is_none_or(|id| Some(id) == task_id)
    }
}

/// In-process `TaskStore` with call recording, injected failures and
/// per-call latency.
pub struct MemoryStore {
    doc: Mutex<TaskDocument>,
    config: EngineConfig,
    calls: Mutex<Vec<Call>>,
    failures: Mutex<Vec<FailureRule>>,
    delays: Mutex<HashMap<Operation, VecDeque<Duration>>>,
}

impl MemoryStore {
    pub fn new(tasks: Vec<Task>) -> Self {
        MemoryStore::with_document(TaskDocument::new(tasks), EngineConfig::default())
    }

    pub fn with_document(doc: TaskDocument, config: EngineConfig) -> Self {
        MemoryStore {
            doc: Mutex::new(doc),
            config,
            calls: Mutex::new(Vec::new()),
            failures: Mutex::new(Vec::new()),
            delays: Mutex::new(HashMap::new()),
        }
    }

    /// Snapshot of the stored table
    pub fn document(&self) -> TaskDocument {
        self.doc.lock().clone()
    }

    pub fn task(&self, id: &TaskId) -> Option<Task> {
        self.doc.lock().get(id).cloned()
    }

    /// Fail every `operation` call (for `task_id` only, when given)
    pub fn fail_on(&self, operation: Operation, task_id: Option<&TaskId>) {
        self.failures.lock().push(FailureRule {
            operation,
            task_id: task_id.cloned(),
            remaining: None,
        });
    }

    /// Fail the next `operation` call only
    pub fn fail_once(&self, operation: Operation) {
        self.failures.lock().push(FailureRule {
            operation,
            task_id: None,
            remaining: Some(1),
        });
    }

    pub fn clear_failures(&self) {
        self.failures.lock().clear();
    }

    /// Hold the next `operation` call for `delay` before it runs
    pub fn delay_next(&self, operation: Operation, delay: Duration) {
        self.delays
            .lock()
            .entry(operation)
            .or_default()
            .push_back(delay);
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().clone()
    }

    /// Calls that write
    pub fn writes(&self) -> Vec<Call> {
        self.calls()
            .into_iter()
            .filter(|c| {
                !matches!(
                    c.operation,
                    Operation::FetchChildren | Operation::FetchRoots | Operation::Search
                )
            })
            .collect()
    }

    pub fn clear_calls(&self) {
        self.calls.lock().clear();
    }

    async fn enter(&self, operation: Operation, task_id: Option<&TaskId>) -> Result<(), StoreError> {
        self.calls.lock().push(Call {
            operation,
            task_id: task_id.cloned(),
        });
        let delay = self
            .delays
            .lock()
            .get_mut(&operation)
            .and_then(VecDeque::pop_front);
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let mut failures = self.failures.lock();
        if let Some(rule) = failures.iter_mut().find(|r| r.matches(operation, task_id)) {
            if let Some(remaining) = rule.remaining.as_mut() {
                *remaining -= 1;
            }
            return Err(StoreError::Unavailable(format!("injected {operation} failure")));
        }
        Ok(())
    }
}

#[async_trait]
impl TaskStore for MemoryStore {
    async fn fetch_children(&self, task_id: &TaskId) -> Result<Vec<Task>, StoreError> {
        self.enter(Operation::FetchChildren, Some(task_id)).await?;
        self.doc.lock().subtree(task_id)
    }

    async fn fetch_roots_page(&self, offset: usize, limit: usize) -> Result<RootsPage, StoreError> {
        self.enter(Operation::FetchRoots, None).await?;
        Ok(self.doc.lock().roots_page(offset, limit))
    }

    async fn update_task_position(
        &self,
        task_id: &TaskId,
        position: f64,
        new_parent: Option<Option<TaskId>>,
    ) -> Result<Task, StoreError> {
        self.enter(Operation::UpdatePosition, Some(task_id)).await?;
        self.doc
            .lock()
            .set_position(task_id, position, new_parent, &self.config, Utc::now())
    }

    async fn update_positions(&self, updates: &[PositionUpdate]) -> Result<Vec<Task>, StoreError> {
        self.enter(Operation::UpdatePositions, updates.first().map(|u| &u.task_id))
            .await?;
        self.doc.lock().set_positions(updates, Utc::now())
    }

    async fn update_task_status(&self, task_id: &TaskId, status: TaskStatus) -> Result<Task, StoreError> {
        self.enter(Operation::UpdateStatus, Some(task_id)).await?;
        self.doc.lock().set_status(task_id, status, Utc::now())
    }

    async fn delete_task(&self, task_id: &TaskId) -> Result<(), StoreError> {
        self.enter(Operation::Delete, Some(task_id)).await?;
        self.doc.lock().delete(task_id).map(|_| ())
    }

    async fn clone_subtree(&self, request: &CloneRequest) -> Result<CloneSummary, StoreError> {
        self.enter(Operation::Clone, Some(&request.source_root_id)).await?;
        self.doc
            .lock()
            .clone_subtree(request, &self.config, Utc::now(), &mut TaskId::generate)
    }

    async fn create_task(&self, new: NewTask) -> Result<Task, StoreError> {
        self.enter(Operation::Create, new.parent_id.as_ref()).await?;
        self.doc
            .lock()
            .create(new, TaskId::generate(), &self.config, Utc::now())
    }

    async fn search_tasks(&self, query: &str, origin: Option<Origin>) -> Result<Vec<Task>, StoreError> {
        self.enter(Operation::Search, None).await?;
        self.doc.lock().search(query, origin)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> MemoryStore {
        let p = Task::new_root("P".into(), "Launch", Origin::Instance, 1000.0);
        let a = Task::new_child("A".into(), "Design", &p, 1000.0);
        MemoryStore::new(vec![p, a])
    }

    #[tokio::test]
    async fn records_calls_in_order() {
        let store = store();
        store.fetch_children(&"P".into()).await.unwrap();
        store
            .update_task_status(&"A".into(), TaskStatus::Blocked)
            .await
            .unwrap();
        let ops: Vec<Operation> = store.calls().iter().map(|c| c.operation).collect();
        assert_eq!(ops, vec![Operation::FetchChildren, Operation::UpdateStatus]);
        assert_eq!(store.writes().len(), 1);
    }

    #[tokio::test]
    async fn targeted_failure_spares_other_tasks() {
        let store = store();
        store.fail_on(Operation::UpdateStatus, Some(&"A".into()));
        assert!(
            store
                .update_task_status(&"A".into(), TaskStatus::Blocked)
                .await
                .is_err()
        );
        assert!(
            store
                .update_task_status(&"P".into(), TaskStatus::Active)
                .await
                .is_ok()
        );
        assert_eq!(store.task(&"A".into()).unwrap().status, TaskStatus::Todo);
    }

    #[tokio::test]
    async fn one_shot_failure() {
        let store = store();
        store.fail_once(Operation::FetchRoots);
        assert!(store.fetch_roots_page(0, 10).await.is_err());
        assert_eq!(store.fetch_roots_page(0, 10).await.unwrap().items.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn delays_apply_to_the_next_call() {
        let store = store();
        store.delay_next(Operation::FetchChildren, Duration::from_secs(5));
        let start = tokio::time::Instant::now();
        store.fetch_children(&"P".into()).await.unwrap();
        assert!(start.elapsed() >= Duration::from_secs(5));

        let start = tokio::time::Instant::now();
        store.fetch_children(&"P".into()).await.unwrap();
        assert!(start.elapsed() < Duration::from_secs(1));
    }
}
