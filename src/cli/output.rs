use serde::Serialize;

use crate::model::task::{Origin, Task, TaskId, TaskKind};
use crate::model::tree::{Forest, TreeNode};
use crate::ops::clone::CloneSummary;
use crate::ops::move_plan::PersistCall;
use crate::sync::coordinator::{MoveOutcome, StatusOutcome};

/// Ids are shown shortened to this many characters
pub const SHORT_ID_LEN: usize = 8;

// ---------------------------------------------------------------------------
// JSON output structs
// ---------------------------------------------------------------------------

#[derive(Serialize)]
pub struct MoveJson<'a> {
    pub task_id: &'a TaskId,
    pub position: f64,
    pub parent_id: Option<&'a TaskId>,
    pub status: String,
    pub calls: &'a [PersistCall],
}

#[derive(Serialize)]
pub struct StatusJson<'a> {
    pub task_id: &'a TaskId,
    pub before: String,
    pub after: String,
    pub cascaded: &'a [TaskId],
    pub failed: Vec<FailureJson<'a>>,
}

#[derive(Serialize)]
pub struct FailureJson<'a> {
    pub task_id: &'a TaskId,
    pub error: String,
}

#[derive(Serialize)]
pub struct RemovedJson<'a> {
    pub removed: &'a [TaskId],
}

pub fn move_to_json(outcome: &MoveOutcome) -> MoveJson<'_> {
    let after = &outcome.plan.after;
    MoveJson {
        task_id: &outcome.plan.task_id,
        position: after.position,
        parent_id: after.parent_id.as_ref(),
        status: after.status.to_string(),
        calls: &outcome.plan.calls,
    }
}

pub fn status_to_json(outcome: &StatusOutcome) -> StatusJson<'_> {
    StatusJson {
        task_id: &outcome.task_id,
        before: outcome.before.to_string(),
        after: outcome.after.to_string(),
        cascaded: &outcome.cascade.updated,
        failed: outcome
            .cascade
            .failed
            .iter()
            .map(|(task_id, err)| FailureJson {
                task_id,
                error: err.to_string(),
            })
            .collect(),
    }
}

// ---------------------------------------------------------------------------
// Human-readable formatting
// ---------------------------------------------------------------------------

pub fn short_id(id: &TaskId) -> &str {
    let s = id.as_str();
    match s.char_indices().nth(SHORT_ID_LEN) {
        Some((cut, _)) => &s[..cut],
        None => s,
    }
}

/// `[x] 1a2b3c4d Title`, plus markers for locks and templates
pub fn format_task_line(task: &Task) -> String {
    let mut line = format!(
        "[{}] {} {}",
        task.status.marker_char(),
        short_id(&task.id),
        task.title
    );
    if task.is_root() && task.origin == Origin::Template {
        line.push_str(" (template)");
    }
    if task.is_locked {
        line.push_str(" [locked]");
    }
    line
}

/// A node and everything under it, two spaces per level
pub fn format_task_tree(node: &TreeNode, indent: usize) -> Vec<String> {
    let mut lines = vec![format!("{}{}", "  ".repeat(indent), format_task_line(&node.task))];
    for child in &node.children {
        lines.extend(format_task_tree(child, indent + 1));
    }
    lines
}

pub fn format_forest(forest: &Forest, origin: Option<Origin>) -> Vec<String> {
    forest
        .roots
        .iter()
        .filter(|n| origin.is_none_or(|o| n.task.origin == o))
        .flat_map(|n| format_task_tree(n, 0))
        .collect()
}

/// Detail header for a single task: kind, status and dates
pub fn format_task_header(task: &Task, level: usize) -> String {
    let kind = TaskKind::for_level(level)
        .map(|k| format!("{k:?}").to_lowercase())
        .unwrap_or_else(|| "task".to_string());
    let mut header = format!("{} {} ({}, {})", kind, task.id, task.status, task.origin);
    if let Some(due) = task.due_date {
        header.push_str(&format!(" due {due}"));
    }
    header
}

pub fn format_move(outcome: &MoveOutcome) -> String {
    let plan = &outcome.plan;
    if plan.is_noop() {
        return format!("{} unchanged", short_id(&plan.task_id));
    }
    let mut out = format!("moved {}", short_id(&plan.task_id));
    if plan.parent_changed()
        && let Some(parent) = &plan.after.parent_id
    {
        out.push_str(&format!(" under {}", short_id(parent)));
    }
    if plan.status_changed() {
        out.push_str(&format!(" ({} → {})", plan.before.status, plan.after.status));
    }
    if plan.renormalized() {
        out.push_str(", siblings respaced");
    }
    out
}

pub fn format_status(outcome: &StatusOutcome) -> Vec<String> {
    let mut lines = vec![format!(
        "{}: {} → {}",
        short_id(&outcome.task_id),
        outcome.before,
        outcome.after
    )];
    if !outcome.cascade.updated.is_empty() {
        lines.push(format!("  completed {} subtasks", outcome.cascade.updated.len()));
    }
    for (id, err) in &outcome.cascade.failed {
        lines.push(format!("  could not complete {}: {}", short_id(id), err));
    }
    lines
}

pub fn format_clone(summary: &CloneSummary) -> String {
    format!(
        "cloned {} tasks and {} resources → {}",
        summary.task_count,
        summary.resource_count,
        short_id(&summary.new_root_id)
    )
}
