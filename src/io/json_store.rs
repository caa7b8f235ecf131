use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use tempfile::NamedTempFile;

use crate::io::document::TaskDocument;
use crate::io::lock::FileLock;
use crate::model::config::EngineConfig;
use crate::model::task::{Origin, Task, TaskId, TaskStatus};
use crate::ops::clone::{CloneRequest, CloneSummary};
use crate::ops::position::PositionUpdate;
use crate::sync::store::{NewTask, RootsPage, StoreError, TaskStore};

const LOCK_TIMEOUT: Duration = Duration::from_secs(5);

/// `TaskStore` over a single JSON file.
///
/// Every write is a locked read-modify-write; the new file is written to a
/// temporary sibling and renamed over the old one, so a failed operation
/// leaves the previous contents in place. File work runs on tokio's blocking
/// pool.
#[derive(Debug, Clone)]
pub struct JsonFileStore {
    path: PathBuf,
    config: EngineConfig,
}

impl JsonFileStore {
    pub fn new(path: impl Into<PathBuf>, config: EngineConfig) -> Self {
        JsonFileStore {
            path: path.into(),
            config,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Current contents; a missing file reads as empty
    pub fn load(&self) -> Result<TaskDocument, StoreError> {
        match fs::read_to_string(&self.path) {
            Ok(text) if text.trim().is_empty() => Ok(TaskDocument::default()),
            Ok(text) => Ok(serde_json::from_str(&text)?),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(TaskDocument::default()),
            Err(e) => Err(e.into()),
        }
    }

    /// Replace the file with `doc` in one rename
    pub fn save(&self, doc: &TaskDocument) -> Result<(), StoreError> {
        let dir = self
            .path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."));
        let mut tmp = NamedTempFile::new_in(dir)?;
        serde_json::to_writer_pretty(tmp.as_file_mut(), doc)?;
        tmp.as_file().sync_all()?;
        tmp.persist(&self.path).map_err(|e| StoreError::Io(e.error))?;
        Ok(())
    }

    fn read<T>(&self, f: impl FnOnce(&TaskDocument) -> Result<T, StoreError>) -> Result<T, StoreError> {
        f(&self.load()?)
    }

    fn write<T>(&self, f: impl FnOnce(&mut TaskDocument) -> Result<T, StoreError>) -> Result<T, StoreError> {
        let _lock = FileLock::acquire(&self.path, LOCK_TIMEOUT)?;
        let mut doc = self.load()?;
        let out = f(&mut doc)?;
        self.save(&doc)?;
        Ok(out)
    }

    async fn blocking<T, F>(&self, f: F) -> Result<T, StoreError>
    where
        T: Send + 'static,
        F: FnOnce(&JsonFileStore) -> Result<T, StoreError> + Send + 'static,
    {
        let store = self.clone();
        tokio::task::spawn_blocking(move || f(&store))
            .await
            .map_err(|e| StoreError::Unavailable(format!("store worker failed: {e}")))?
    }
}

#[async_trait]
impl TaskStore for JsonFileStore {
    async fn fetch_children(&self, task_id: &TaskId) -> Result<Vec<Task>, StoreError> {
        let task_id = task_id.clone();
        self.blocking(move |store| store.read(|doc| doc.subtree(&task_id)))
            .await
    }

    async fn fetch_roots_page(&self, offset: usize, limit: usize) -> Result<RootsPage, StoreError> {
        self.blocking(move |store| store.read(|doc| Ok(doc.roots_page(offset, limit))))
            .await
    }

    async fn update_task_position(
        &self,
        task_id: &TaskId,
        position: f64,
        new_parent: Option<Option<TaskId>>,
    ) -> Result<Task, StoreError> {
        let task_id = task_id.clone();
        self.blocking(move |store| {
            store.write(|doc| doc.set_position(&task_id, position, new_parent, &store.config, Utc::now()))
        })
        .await
    }

    async fn update_positions(&self, updates: &[PositionUpdate]) -> Result<Vec<Task>, StoreError> {
        let updates = updates.to_vec();
        self.blocking(move |store| store.write(|doc| doc.set_positions(&updates, Utc::now())))
            .await
    }

    async fn update_task_status(&self, task_id: &TaskId, status: TaskStatus) -> Result<Task, StoreError> {
        let task_id = task_id.clone();
        self.blocking(move |store| store.write(|doc| doc.set_status(&task_id, status, Utc::now())))
            .await
    }

    async fn delete_task(&self, task_id: &TaskId) -> Result<(), StoreError> {
        let task_id = task_id.clone();
        self.blocking(move |store| store.write(|doc| doc.delete(&task_id).map(|_| ())))
            .await
    }

    async fn clone_subtree(&self, request: &CloneRequest) -> Result<CloneSummary, StoreError> {
        let request = request.clone();
        self.blocking(move |store| {
            store.write(|doc| doc.clone_subtree(&request, &store.config, Utc::now(), &mut TaskId::generate))
        })
        .await
    }

    async fn create_task(&self, new: NewTask) -> Result<Task, StoreError> {
        self.blocking(move |store| {
            store.write(|doc| doc.create(new, TaskId::generate(), &store.config, Utc::now()))
        })
        .await
    }

    async fn search_tasks(&self, query: &str, origin: Option<Origin>) -> Result<Vec<Task>, StoreError> {
        let query = query.to_owned();
        self.blocking(move |store| store.read(|doc| doc.search(&query, origin)))
            .await
    }
}
