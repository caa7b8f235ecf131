use std::fmt;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

/// Deepest level a task may sit at (0 = project, 4 = subtask).
pub const MAX_LEVEL: usize = 4;

/// Opaque task identifier
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskId(pub String);

impl TaskId {
    pub fn new(id: impl Into<String>) -> Self {
        TaskId(id.into())
    }

    /// A fresh random identifier
    pub fn generate() -> Self {
        TaskId(uuid::Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for TaskId {
    fn from(s: &str) -> Self {
        TaskId(s.to_string())
    }
}

impl From<String> for TaskId {
    fn from(s: String) -> Self {
        TaskId(s)
    }
}

/// Partition tag: live project data vs reusable template data
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Origin {
    Instance,
    Template,
}

impl fmt::Display for Origin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Origin::Instance => write!(f, "instance"),
            Origin::Template => write!(f, "template"),
        }
    }
}

impl std::str::FromStr for Origin {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "instance" => Ok(Origin::Instance),
            "template" => Ok(Origin::Template),
            other => Err(format!("unknown origin '{}'", other)),
        }
    }
}

/// Task status. `Planning` and `Active` only apply to projects.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Planning,
    Active,
    Todo,
    InProgress,
    Blocked,
    Complete,
}

impl TaskStatus {
    /// The character used inside the status box `[ ]`
    pub fn marker_char(self) -> char {
        match self {
            TaskStatus::Planning => '?',
            TaskStatus::Active => '*',
            TaskStatus::Todo => ' ',
            TaskStatus::InProgress => '>',
            TaskStatus::Blocked => '-',
            TaskStatus::Complete => 'x',
        }
    }

    pub fn is_project_only(self) -> bool {
        matches!(self, TaskStatus::Planning | TaskStatus::Active)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            TaskStatus::Planning => "planning",
            TaskStatus::Active => "active",
            TaskStatus::Todo => "todo",
            TaskStatus::InProgress => "in_progress",
            TaskStatus::Blocked => "blocked",
            TaskStatus::Complete => "complete",
        }
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for TaskStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "planning" => Ok(TaskStatus::Planning),
            "active" => Ok(TaskStatus::Active),
            "todo" => Ok(TaskStatus::Todo),
            "in_progress" | "in-progress" => Ok(TaskStatus::InProgress),
            "blocked" => Ok(TaskStatus::Blocked),
            "complete" | "done" => Ok(TaskStatus::Complete),
            other => Err(format!("unknown status '{}'", other)),
        }
    }
}

/// What a task is called at each level of the hierarchy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskKind {
    Project,
    Phase,
    Milestone,
    Task,
    Subtask,
}

impl TaskKind {
    pub fn for_level(level: usize) -> Option<TaskKind> {
        match level {
            0 => Some(TaskKind::Project),
            1 => Some(TaskKind::Phase),
            2 => Some(TaskKind::Milestone),
            3 => Some(TaskKind::Task),
            4 => Some(TaskKind::Subtask),
            _ => None,
        }
    }
}

/// A persisted task record. Everything here is owned by the store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    pub id: TaskId,
    /// `None` marks a root (project or template)
    #[serde(default)]
    pub parent_id: Option<TaskId>,
    /// Root ancestor; equals `id` for a root
    pub root_id: TaskId,
    pub origin: Origin,
    /// Sibling ordering key
    pub position: f64,
    pub status: TaskStatus,
    #[serde(default)]
    pub is_locked: bool,
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_date: Option<NaiveDate>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub due_date: Option<NaiveDate>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub creator_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Task {
    /// Create a root task (a project, or a template when `origin` is `Template`)
    pub fn new_root(id: TaskId, title: impl Into<String>, origin: Origin, position: f64) -> Self {
        let now = Utc::now();
        Task {
            root_id: id.clone(),
            id,
            parent_id: None,
            origin,
            position,
            status: TaskStatus::Planning,
            is_locked: false,
            title: title.into(),
            description: None,
            start_date: None,
            due_date: None,
            creator_id: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Create a child of `parent`, inheriting its root and origin
    pub fn new_child(id: TaskId, title: impl Into<String>, parent: &Task, position: f64) -> Self {
        let now = Utc::now();
        Task {
            id,
            parent_id: Some(parent.id.clone()),
            root_id: parent.root_id.clone(),
            origin: parent.origin,
            position,
            status: TaskStatus::Todo,
            is_locked: false,
            title: title.into(),
            description: None,
            start_date: None,
            due_date: None,
            creator_id: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn is_root(&self) -> bool {
        self.parent_id.is_none()
    }
}

/// A file or link attached to a task
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Resource {
    pub id: String,
    pub task_id: TaskId,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    pub created_at: DateTime<Utc>,
}
