use std::fs;
use std::path::{Path, PathBuf};

use crate::io::config_io::{CONFIG_FILE, ConfigError, read_config, write_config};
use crate::io::document::TaskDocument;
use crate::io::json_store::JsonFileStore;
use crate::model::config::CanopyConfig;
use crate::sync::store::StoreError;

pub const CANOPY_DIR: &str = "canopy";
pub const STORE_FILE: &str = "tasks.json";

/// Error type for locating and creating projects
#[derive(Debug, thiserror::Error)]
pub enum ProjectError {
    #[error("not a canopy project: no canopy/ directory found")]
    NotAProject,
    #[error("already a canopy project: {0}")]
    AlreadyInitialized(PathBuf),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// A canopy directory and its configuration
#[derive(Debug, Clone)]
pub struct Project {
    pub root: PathBuf,
    pub canopy_dir: PathBuf,
    pub config: CanopyConfig,
}

impl Project {
    pub fn store_path(&self) -> PathBuf {
        self.canopy_dir.join(STORE_FILE)
    }

    pub fn open_store(&self) -> JsonFileStore {
        JsonFileStore::new(self.store_path(), self.config.engine.clone())
    }
}

/// Walk up from `start` to the first directory holding `canopy/config.toml`
/// or `canopy/tasks.json`.
pub fn discover_project(start: &Path) -> Result<PathBuf, ProjectError> {
    let mut current = start.to_path_buf();
    loop {
        let dir = current.join(CANOPY_DIR);
        if dir.is_dir() && (dir.join(CONFIG_FILE).exists() || dir.join(STORE_FILE).exists()) {
            return Ok(current);
        }
        if !current.pop() {
            return Err(ProjectError::NotAProject);
        }
    }
}

pub fn load_project(root: &Path) -> Result<Project, ProjectError> {
    let canopy_dir = root.join(CANOPY_DIR);
    if !canopy_dir.is_dir() {
        return Err(ProjectError::NotAProject);
    }
    let config = read_config(&canopy_dir)?;
    Ok(Project {
        root: root.to_path_buf(),
        canopy_dir,
        config,
    })
}

/// Create `canopy/` with a config and an empty store
pub fn init_project(root: &Path, name: &str) -> Result<Project, ProjectError> {
    let canopy_dir = root.join(CANOPY_DIR);
    if canopy_dir.join(CONFIG_FILE).exists() {
        return Err(ProjectError::AlreadyInitialized(canopy_dir));
    }
    fs::create_dir_all(&canopy_dir)?;

    let mut config = CanopyConfig::default();
    config.project.name = name.to_string();
    write_config(&canopy_dir, &config)?;

    let project = Project {
        root: root.to_path_buf(),
        canopy_dir,
        config,
    };
    let store = project.open_store();
    if !store.path().exists() {
        store.save(&TaskDocument::default())?;
    }
    tracing::info!(root = %root.display(), "initialized project");
    Ok(project)
}
