use std::collections::HashSet;
use std::sync::Arc;

use futures::future::join_all;
use parking_lot::Mutex;
use serde::Serialize;

use crate::model::config::EngineConfig;
use crate::model::task::{Origin, Task, TaskId, TaskStatus};
use crate::model::tree::{Forest, TreeNode};
use crate::ops::clone::{CloneRequest, CloneSummary};
use crate::ops::merge::{
    TaskPatch, collect_expanded, merge_task_updates, patch_tasks, remove_subtree,
    update_tree_expansion,
};
use crate::ops::move_plan::{
    DropTarget, MovePlan, PersistCall, ValidationError, apply_plan, plan_move, revert_plan,
};
use crate::ops::position::PositionAllocator;
use crate::ops::status::{plan_status, status_patch};
use crate::sync::error::{Operation, SyncError};
use crate::sync::guard::{Guarded, StreamGuard};
use crate::sync::store::{NewTask, StoreError, TaskStore};

/// Logical request streams; only the newest response per stream is applied
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum StreamKey {
    Children(TaskId),
    RootsPage,
    Search,
}

/// Where a task is in the drag lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MovePhase {
    Idle,
    Dragging,
    /// Optimistically applied, waiting on the store
    Committing,
}

/// A drag that passed the up-front checks and has not been dropped yet
#[derive(Debug)]
pub struct DragSession {
    task_id: TaskId,
}

impl DragSession {
    pub fn task_id(&self) -> &TaskId {
        &self.task_id
    }
}

/// A settled move
#[derive(Debug, Clone, Serialize)]
pub struct MoveOutcome {
    pub plan: MovePlan,
    /// Number of store calls issued
    pub calls: usize,
}

/// Per-descendant results of a completion cascade
#[derive(Debug, Default)]
pub struct CascadeReport {
    pub updated: Vec<TaskId>,
    pub failed: Vec<(TaskId, StoreError)>,
}

impl CascadeReport {
    pub fn is_complete(&self) -> bool {
        self.failed.is_empty()
    }
}

#[derive(Debug)]
pub struct StatusOutcome {
    pub task_id: TaskId,
    pub before: TaskStatus,
    pub after: TaskStatus,
    pub cascade: CascadeReport,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageInfo {
    pub loaded: usize,
    pub has_more: bool,
}

/// A move call the store refused, after `accepted` went through
struct MoveFailure {
    operation: Operation,
    error: StoreError,
    accepted: Vec<TaskPatch>,
}

struct SyncState {
    forest: Arc<Forest>,
    expanded: HashSet<TaskId>,
    in_flight: HashSet<TaskId>,
    dragging: Option<TaskId>,
    roots_offset: usize,
    has_more_roots: bool,
}

impl SyncState {
    fn replace_roots(&mut self, roots: Vec<TreeNode>) {
        self.forest = Arc::new(self.forest.with_roots(roots));
    }

    /// Fold store records into the forest, expansion taken from the open set
    fn merge(&mut self, tasks: &[Task]) {
        let scope = self.forest.scope.clone();
        let fresh: Vec<Task> = tasks
            .iter()
            .filter(|t| scope.as_ref() != Some(&t.id))
            .cloned()
            .collect();
        let merged = merge_task_updates(&self.forest.roots, &fresh);
        let roots = update_tree_expansion(&merged, &self.expanded);
        self.replace_roots(roots);
    }

    fn patch(&mut self, patches: &[TaskPatch]) {
        if patches.is_empty() {
            return;
        }
        let roots = patch_tasks(&self.forest.roots, patches);
        self.replace_roots(roots);
    }

    /// Whether a record under `parent` belongs in this forest
    fn shows_parent(&self, parent: Option<&TaskId>) -> bool {
        match parent {
            None => self.forest.scope.is_none(),
            Some(p) => self.forest.scope.as_ref() == Some(p) || self.forest.contains(p),
        }
    }
}

/// Keeps a local forest consistent with a [`TaskStore`].
///
/// Every local change is applied optimistically to a fresh `Forest` snapshot
/// and undone (for the touched tasks only) if the store rejects it. Readers
/// take the current snapshot with [`TreeSync::forest`]; the state lock is
/// never held across a store call.
pub struct TreeSync<S> {
    store: Arc<S>,
    config: EngineConfig,
    allocator: PositionAllocator,
    guard: StreamGuard<StreamKey>,
    state: Mutex<SyncState>,
}

impl<S: TaskStore> TreeSync<S> {
    /// Engine over the full forest of projects and templates
    pub fn new(store: Arc<S>, config: EngineConfig) -> Self {
        TreeSync::with_forest(store, config, Forest::default())
    }

    /// Engine over the subtree below `scope`, whose children sit at `base_level`
    pub fn scoped(store: Arc<S>, config: EngineConfig, scope: TaskId, base_level: usize) -> Self {
        TreeSync::with_forest(store, config, Forest::scoped(Some(scope), base_level, Vec::new()))
    }

    pub fn with_forest(store: Arc<S>, config: EngineConfig, forest: Forest) -> Self {
        let expanded = collect_expanded(&forest.roots);
        TreeSync {
            store,
            allocator: PositionAllocator::from(&config),
            config,
            guard: StreamGuard::new(),
            state: Mutex::new(SyncState {
                forest: Arc::new(forest),
                expanded,
                in_flight: HashSet::new(),
                dragging: None,
                roots_offset: 0,
                has_more_roots: true,
            }),
        }
    }

    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// The current snapshot
    pub fn forest(&self) -> Arc<Forest> {
        Arc::clone(&self.state.lock().forest)
    }

    pub fn has_more_roots(&self) -> bool {
        self.state.lock().has_more_roots
    }

    pub fn move_phase(&self, task_id: &TaskId) -> MovePhase {
        let state = self.state.lock();
        if state.in_flight.contains(task_id) {
            MovePhase::Committing
        } else if state.dragging.as_ref() == Some(task_id) {
            MovePhase::Dragging
        } else {
            MovePhase::Idle
        }
    }

    // -- loading --

    /// Fetch the next page of roots and merge it in
    pub async fn load_next_roots_page(&self) -> Result<Guarded<PageInfo>, SyncError> {
        let offset = self.state.lock().roots_offset;
        let limit = self.config.page_size;
        let result = self
            .guard
            .run(StreamKey::RootsPage, |_| self.store.fetch_roots_page(offset, limit))
            .await;
        let Some(page) = settle(result, Operation::FetchRoots, None)?.into_current() else {
            return Ok(Guarded::Stale);
        };

        let info = PageInfo {
            loaded: page.items.len(),
            has_more: page.has_more,
        };
        let mut state = self.state.lock();
        state.roots_offset = offset + info.loaded;
        state.has_more_roots = page.has_more;
        state.merge(&page.items);
        tracing::debug!(offset, loaded = info.loaded, has_more = info.has_more, "loaded roots page");
        Ok(Guarded::Current(info))
    }

    /// Re-fetch the subtree under `task_id` and merge it in
    pub async fn refresh_children(&self, task_id: &TaskId) -> Result<Guarded<usize>, SyncError> {
        let result = self
            .guard
            .run(StreamKey::Children(task_id.clone()), |_| {
                self.store.fetch_children(task_id)
            })
            .await;
        let Some(tasks) = settle(result, Operation::FetchChildren, Some(task_id))?.into_current()
        else {
            return Ok(Guarded::Stale);
        };
        self.state.lock().merge(&tasks);
        Ok(Guarded::Current(tasks.len()))
    }

    /// Every roots page, then every root's subtree
    pub async fn load_all(&self) -> Result<(), SyncError> {
        if let Some(scope) = self.forest().scope.clone() {
            self.refresh_children(&scope).await?;
            return Ok(());
        }
        while self.has_more_roots() {
            match self.load_next_roots_page().await? {
                Guarded::Current(info) if info.loaded == 0 => break,
                _ => {}
            }
        }
        let roots: Vec<TaskId> = self.forest().roots.iter().map(|n| n.id().clone()).collect();
        for root in &roots {
            self.refresh_children(root).await?;
        }
        Ok(())
    }

    /// Replace the snapshot with a fresh full load. Unlike a merge this drops
    /// records the store no longer has; expansion state is kept.
    pub async fn reload(&self) -> Result<(), SyncError> {
        let empty = self.forest().with_roots(Vec::new());
        let fresh = TreeSync::with_forest(Arc::clone(&self.store), self.config.clone(), empty);
        fresh.load_all().await?;
        let (roots, offset) = {
            let fresh_state = fresh.state.lock();
            (fresh_state.forest.roots.clone(), fresh_state.roots_offset)
        };

        let mut state = self.state.lock();
        state.roots_offset = offset;
        state.has_more_roots = false;
        let roots = update_tree_expansion(&roots, &state.expanded);
        state.replace_roots(roots);
        Ok(())
    }

    pub async fn search(&self, query: &str, origin: Option<Origin>) -> Result<Guarded<Vec<Task>>, SyncError> {
        let result = self
            .guard
            .run(StreamKey::Search, |_| self.store.search_tasks(query, origin))
            .await;
        settle(result, Operation::Search, None)
    }

    // -- expansion --

    /// Returns whether anything changed
    pub fn set_expanded(&self, task_id: &TaskId, expanded: bool) -> bool {
        let mut state = self.state.lock();
        let changed = if expanded {
            state.expanded.insert(task_id.clone())
        } else {
            state.expanded.remove(task_id)
        };
        if changed {
            let roots = update_tree_expansion(&state.forest.roots, &state.expanded);
            state.replace_roots(roots);
        }
        changed
    }

    pub fn toggle_expanded(&self, task_id: &TaskId) -> bool {
        let open = self.state.lock().expanded.contains(task_id);
        self.set_expanded(task_id, !open);
        !open
    }

    /// Open a node and load what is under it
    pub async fn expand(&self, task_id: &TaskId) -> Result<Guarded<usize>, SyncError> {
        self.set_expanded(task_id, true);
        self.refresh_children(task_id).await
    }

    // -- moves --

    /// Start dragging `task_id`. Locked tasks cannot be picked up.
    pub fn begin_drag(&self, task_id: &TaskId) -> Result<DragSession, SyncError> {
        let mut state = self.state.lock();
        let path = state
            .forest
            .path_to(task_id)
            .ok_or_else(|| ValidationError::NotFound(task_id.clone()))?;
        if let Some(locked) = path.iter().find(|n| n.task.is_locked) {
            return Err(ValidationError::Locked {
                task_id: task_id.clone(),
                locked_by: locked.task.id.clone(),
            }
            .into());
        }
        if state.in_flight.contains(task_id) {
            return Err(ValidationError::MoveInFlight(task_id.clone()).into());
        }
        state.dragging = Some(task_id.clone());
        Ok(DragSession {
            task_id: task_id.clone(),
        })
    }

    pub fn cancel_drag(&self, session: DragSession) {
        let mut state = self.state.lock();
        if state.dragging.as_ref() == Some(&session.task_id) {
            state.dragging = None;
        }
    }

    /// Drop the dragged task on `target`: validate, apply optimistically,
    /// persist, and roll the touched tasks back if the store fails.
    pub async fn drop_task(&self, session: DragSession, target: &DropTarget) -> Result<MoveOutcome, SyncError> {
        let plan = {
            let mut state = self.state.lock();
            if state.dragging.as_ref() == Some(&session.task_id) {
                state.dragging = None;
            }
            if state.in_flight.contains(&session.task_id) {
                return Err(ValidationError::MoveInFlight(session.task_id).into());
            }
            let plan = plan_move(
                &state.forest,
                &session.task_id,
                target,
                &self.allocator,
                self.config.max_level,
            )?;
            if plan.is_noop() {
                return Ok(MoveOutcome { plan, calls: 0 });
            }
            state.forest = Arc::new(apply_plan(&state.forest, &plan));
            state.in_flight.insert(plan.task_id.clone());
            plan
        };

        let result = self.persist_move(&plan).await;

        let mut state = self.state.lock();
        state.in_flight.remove(&plan.task_id);
        match result {
            Ok(echoes) => {
                state.patch(&echoes);
                let calls = plan.calls.len();
                Ok(MoveOutcome { plan, calls })
            }
            Err(MoveFailure {
                operation,
                error,
                accepted,
            }) => {
                state.forest = Arc::new(revert_plan(&state.forest, &plan));
                // Writes the store already took stay applied
                state.patch(&accepted);
                if accepted.is_empty() {
                    tracing::warn!(task = %plan.task_id, %operation, %error, "move rolled back");
                } else {
                    tracing::warn!(
                        task = %plan.task_id,
                        %operation,
                        %error,
                        kept = accepted.len(),
                        "move partially persisted"
                    );
                }
                Err(SyncError::store(operation, Some(&plan.task_id), error))
            }
        }
    }

    /// `begin_drag` and `drop_task` in one step
    pub async fn move_task(&self, task_id: &TaskId, target: &DropTarget) -> Result<MoveOutcome, SyncError> {
        let session = self.begin_drag(task_id)?;
        self.drop_task(session, target).await
    }

    /// Issue the plan's calls in order; the first failure stops the rest and
    /// reports the echoes of the calls already accepted
    async fn persist_move(&self, plan: &MovePlan) -> Result<Vec<TaskPatch>, MoveFailure> {
        let mut echoes = Vec::new();
        for call in &plan.calls {
            let (operation, result) = match call {
                PersistCall::Position { task_id, position } => (
                    Operation::UpdatePosition,
                    self.store
                        .update_task_position(task_id, *position, None)
                        .await
                        .map(|echo| vec![position_echo(&echo)]),
                ),
                PersistCall::PositionAndParent {
                    task_id,
                    position,
                    parent_id,
                } => (
                    Operation::UpdatePosition,
                    self.store
                        .update_task_position(task_id, *position, Some(parent_id.clone()))
                        .await
                        .map(|echo| {
                            let mut patch = position_echo(&echo);
                            patch.parent_id = Some(echo.parent_id.clone());
                            vec![patch]
                        }),
                ),
                PersistCall::BulkPositions { updates } => (
                    Operation::UpdatePositions,
                    self.store
                        .update_positions(updates)
                        .await
                        .map(|echo| echo.iter().map(position_echo).collect()),
                ),
                PersistCall::Status { task_id, status } => (
                    Operation::UpdateStatus,
                    self.store
                        .update_task_status(task_id, *status)
                        .await
                        .map(|echo| vec![status_patch(&echo.id, echo.status)]),
                ),
            };
            match result {
                Ok(patches) => echoes.extend(patches),
                Err(error) => {
                    return Err(MoveFailure {
                        operation,
                        error,
                        accepted: echoes,
                    });
                }
            }
        }
        Ok(echoes)
    }

    // -- status --

    /// Change a task's status. Completing a task then completes its open
    /// descendants; those updates are best-effort and reported per task.
    pub async fn set_status(&self, task_id: &TaskId, status: TaskStatus) -> Result<StatusOutcome, SyncError> {
        let plan = {
            let mut state = self.state.lock();
            let plan = plan_status(&state.forest, task_id, status, self.config.cascade_complete)?;
            if plan.before != plan.after {
                state.patch(&[plan.apply_patch()]);
            }
            plan
        };

        if plan.before != plan.after {
            match self.store.update_task_status(task_id, plan.after).await {
                Ok(echo) => self.state.lock().patch(&[status_patch(&echo.id, echo.status)]),
                Err(err) => {
                    self.state.lock().patch(&[plan.revert_patch()]);
                    tracing::warn!(task = %task_id, error = %err, "status change rolled back");
                    return Err(SyncError::store(Operation::UpdateStatus, Some(task_id), err));
                }
            }
        }

        let store = &self.store;
        let results = join_all(plan.cascade.iter().map(|child| async move {
            let result = store.update_task_status(child, TaskStatus::Complete).await;
            (child.clone(), result)
        }))
        .await;

        let mut cascade = CascadeReport::default();
        let mut patches = Vec::new();
        for (child, result) in results {
            match result {
                Ok(echo) => {
                    patches.push(status_patch(&echo.id, echo.status));
                    cascade.updated.push(child);
                }
                Err(err) => {
                    tracing::warn!(task = %child, error = %err, "cascade update failed");
                    cascade.failed.push((child, err));
                }
            }
        }
        self.state.lock().patch(&patches);

        Ok(StatusOutcome {
            task_id: plan.task_id,
            before: plan.before,
            after: plan.after,
            cascade,
        })
    }

    // -- create / delete / clone --

    pub async fn create_task(&self, new: NewTask) -> Result<Task, SyncError> {
        let parent = new.parent_id.clone();
        let task = self
            .store
            .create_task(new)
            .await
            .map_err(|e| SyncError::store(Operation::Create, parent.as_ref(), e))?;
        let mut state = self.state.lock();
        if state.shows_parent(task.parent_id.as_ref()) {
            state.merge(std::slice::from_ref(&task));
        }
        Ok(task)
    }

    /// Delete a task; the store cascades, and so does the local forest.
    /// Returns the ids removed locally.
    pub async fn delete_task(&self, task_id: &TaskId) -> Result<Vec<TaskId>, SyncError> {
        self.store
            .delete_task(task_id)
            .await
            .map_err(|e| SyncError::store(Operation::Delete, Some(task_id), e))?;

        let removed = {
            let mut state = self.state.lock();
            let (roots, removed) = remove_subtree(&state.forest.roots, task_id);
            state.replace_roots(roots);
            for id in &removed {
                state.expanded.remove(id);
            }
            removed
        };
        for id in &removed {
            self.guard.cancel(&StreamKey::Children(id.clone()));
        }
        tracing::debug!(task = %task_id, removed = removed.len(), "deleted subtree");
        Ok(removed)
    }

    /// Clone a subtree on the store, then load the copy. The copy must come
    /// back whole; a partial copy is reported and not shown.
    pub async fn clone_subtree(&self, request: &CloneRequest) -> Result<CloneSummary, SyncError> {
        let summary = self
            .store
            .clone_subtree(request)
            .await
            .map_err(|e| SyncError::store(Operation::Clone, Some(&request.source_root_id), e))?;
        let copied = self
            .store
            .fetch_children(&summary.new_root_id)
            .await
            .map_err(|e| SyncError::store(Operation::FetchChildren, Some(&summary.new_root_id), e))?;

        if copied.len() != summary.task_count {
            tracing::warn!(
                source = %request.source_root_id,
                new_root = %summary.new_root_id,
                expected = summary.task_count,
                found = copied.len(),
                "clone came back incomplete"
            );
            return Err(SyncError::CloneAtomicity {
                source_root_id: request.source_root_id.clone(),
                new_root_id: summary.new_root_id.clone(),
                expected: summary.task_count,
                found: copied.len(),
            });
        }

        let mut state = self.state.lock();
        if state.shows_parent(request.new_parent_id.as_ref()) {
            state.merge(&copied);
        }
        tracing::info!(
            source = %request.source_root_id,
            new_root = %summary.new_root_id,
            tasks = summary.task_count,
            resources = summary.resource_count,
            "cloned subtree"
        );
        Ok(summary)
    }
}

fn settle<T>(
    result: Guarded<Result<T, StoreError>>,
    operation: Operation,
    task_id: Option<&TaskId>,
) -> Result<Guarded<T>, SyncError> {
    match result {
        Guarded::Current(Ok(value)) => Ok(Guarded::Current(value)),
        Guarded::Current(Err(err)) => Err(SyncError::store(operation, task_id, err)),
        Guarded::Stale => Ok(Guarded::Stale),
    }
}

fn position_echo(task: &Task) -> TaskPatch {
    let mut patch = TaskPatch::new(task.id.clone());
    patch.position = Some(task.position);
    patch
}
