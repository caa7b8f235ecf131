use std::collections::HashMap;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Deserializer, Serialize};

use crate::model::task::{Origin, Resource, Task, TaskId, TaskStatus};
use crate::ops::build::{build_tree, flatten};

/// Error type for clone planning
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum CloneError {
    #[error("clone source not found: {0}")]
    SourceNotFound(TaskId),
    #[error("clone destination not found: {0}")]
    DestinationNotFound(TaskId),
    #[error("cannot clone {requested} tasks under {parent}, which is a {parent_origin} task")]
    OriginMismatch {
        parent: TaskId,
        parent_origin: Origin,
        requested: Origin,
    },
    #[error("cannot clone {0} into its own subtree")]
    IntoOwnSubtree(TaskId),
    #[error("clone would nest tasks at level {level} (maximum is {max})")]
    MaxDepthExceeded { level: usize, max: usize },
}

/// Root-only field overrides. An absent key keeps the source value;
/// `Some(None)` clears it.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CloneOverrides {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        deserialize_with = "present"
    )]
    pub description: Option<Option<String>>,
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        deserialize_with = "present"
    )]
    pub start_date: Option<Option<NaiveDate>>,
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        deserialize_with = "present"
    )]
    pub due_date: Option<Option<NaiveDate>>,
}

/// A key that is present (even as `null`) deserializes to `Some`
fn present<'de, T, D>(de: D) -> Result<Option<Option<T>>, D::Error>
where
    T: Deserialize<'de>,
    D: Deserializer<'de>,
{
    Option::<T>::deserialize(de).map(Some)
}

impl CloneOverrides {
    fn apply_to(&self, task: &mut Task) {
        if let Some(title) = &self.title {
            task.title = title.clone();
        }
        if let Some(description) = &self.description {
            task.description = description.clone();
        }
        if let Some(start) = self.start_date {
            task.start_date = start;
        }
        if let Some(due) = self.due_date {
            task.due_date = due;
        }
    }
}

/// A request to copy the subtree under `source_root_id`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CloneRequest {
    pub source_root_id: TaskId,
    /// Anchor for the cloned root; `None` creates a new project/template
    #[serde(default)]
    pub new_parent_id: Option<TaskId>,
    pub new_origin: Origin,
    pub creator_id: String,
    #[serde(default)]
    pub overrides: CloneOverrides,
}

/// What a successful clone produced
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CloneSummary {
    pub new_root_id: TaskId,
    pub task_count: usize,
    pub resource_count: usize,
}

/// The destination parent of a clone, as seen by the store
#[derive(Debug, Clone, Copy)]
pub struct CloneAnchor<'a> {
    pub parent: &'a Task,
    pub level: usize,
}

/// Fully remapped records, ready to be written in one step
#[derive(Debug, Clone, PartialEq)]
pub struct ClonePlan {
    pub tasks: Vec<Task>,
    pub resources: Vec<Resource>,
    /// Source id -> clone id
    pub id_map: HashMap<TaskId, TaskId>,
}

impl ClonePlan {
    pub fn root(&self) -> &Task {
        &self.tasks[0]
    }

    pub fn summary(&self) -> CloneSummary {
        CloneSummary {
            new_root_id: self.root().id.clone(),
            task_count: self.tasks.len(),
            resource_count: self.resources.len(),
        }
    }
}

/// Settings shared by every clone a store performs
pub struct CloneContext<'a> {
    pub anchor: Option<CloneAnchor<'a>>,
    /// Position of the cloned root among its new siblings
    pub root_position: f64,
    pub max_level: usize,
    pub now: DateTime<Utc>,
}

/// Remap the subtree rooted at `request.source_root_id` onto fresh identities.
///
/// `source` may contain unrelated records; only the root and its descendants
/// are cloned. The root is re-anchored under `ctx.anchor` (or becomes a new
/// root), every clone shares one root id and takes `request.new_origin`, and
/// overrides touch the root only. Resources of cloned tasks are copied and
/// relinked. Nothing is written here: the caller commits `ClonePlan` at once.
pub fn plan_clone(
    source: &[Task],
    resources: &[Resource],
    request: &CloneRequest,
    ctx: &CloneContext<'_>,
    next_id: &mut dyn FnMut() -> TaskId,
) -> Result<ClonePlan, CloneError> {
    let source_root = source
        .iter()
        .find(|t| t.id == request.source_root_id)
        .ok_or_else(|| CloneError::SourceNotFound(request.source_root_id.clone()))?;

    let subtree = build_tree(source, source_root.parent_id.as_ref())
        .into_iter()
        .find(|n| n.task.id == source_root.id)
        .ok_or_else(|| CloneError::SourceNotFound(request.source_root_id.clone()))?;
    let height = subtree.height();
    let originals = flatten(std::slice::from_ref(&subtree));

    let root_level = match &ctx.anchor {
        Some(anchor) => {
            if anchor.parent.origin != request.new_origin {
                return Err(CloneError::OriginMismatch {
                    parent: anchor.parent.id.clone(),
                    parent_origin: anchor.parent.origin,
                    requested: request.new_origin,
                });
            }
            if originals.iter().any(|t| t.id == anchor.parent.id) {
                return Err(CloneError::IntoOwnSubtree(request.source_root_id.clone()));
            }
            anchor.level + 1
        }
        None => 0,
    };
    if root_level + height > ctx.max_level {
        return Err(CloneError::MaxDepthExceeded {
            level: root_level + height,
            max: ctx.max_level,
        });
    }

    let id_map: HashMap<TaskId, TaskId> = originals
        .iter()
        .map(|t| (t.id.clone(), next_id()))
        .collect();
    let new_root_id = id_map[&source_root.id].clone();
    let root_id = match &ctx.anchor {
        Some(anchor) => anchor.parent.root_id.clone(),
        None => new_root_id.clone(),
    };

    let mut tasks = Vec::with_capacity(originals.len());
    for original in &originals {
        let mut copy = original.clone();
        copy.id = id_map[&original.id].clone();
        copy.root_id = root_id.clone();
        copy.origin = request.new_origin;
        copy.is_locked = false;
        copy.creator_id = Some(request.creator_id.clone());
        copy.created_at = ctx.now;
        copy.updated_at = ctx.now;

        if original.id == source_root.id {
            copy.parent_id = request.new_parent_id.clone();
            copy.position = ctx.root_position;
            if copy.parent_id.is_some() && copy.status.is_project_only() {
                copy.status = TaskStatus::Todo;
            }
            request.overrides.apply_to(&mut copy);
        } else {
            copy.parent_id = original
                .parent_id
                .as_ref()
                .and_then(|p| id_map.get(p))
                .cloned();
        }
        tasks.push(copy);
    }

    let copied_resources: Vec<Resource> = resources
        .iter()
        .filter_map(|r| {
            id_map.get(&r.task_id).map(|new_task| Resource {
                id: next_id().0,
                task_id: new_task.clone(),
                name: r.name.clone(),
                url: r.url.clone(),
                created_at: ctx.now,
            })
        })
        .collect();

    tracing::debug!(
        source = %request.source_root_id,
        new_root = %new_root_id,
        tasks = tasks.len(),
        resources = copied_resources.len(),
        "planned clone"
    );

    Ok(ClonePlan {
        tasks,
        resources: copied_resources,
        id_map,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::task::MAX_LEVEL;
    use pretty_assertions::assert_eq;

    fn template() -> (Vec<Task>, Vec<Resource>) {
        let mut root = Task::new_root("tpl".into(), "Onboarding", Origin::Template, 1000.0);
        root.description = Some("Template description".into());
        root.is_locked = true;
        let phase1 = Task::new_child("ph1".into(), "Prepare", &root, 1000.0);
        let phase2 = Task::new_child("ph2".into(), "Run", &root, 2000.0);
        let m1 = Task::new_child("m1".into(), "Kickoff", &phase1, 1000.0);
        let m2 = Task::new_child("m2".into(), "Review", &phase1, 2000.0);
        let t1 = Task::new_child("t1".into(), "Book room", &m1, 1000.0);
        let unrelated = Task::new_root("other".into(), "Other", Origin::Template, 2000.0);
        let resource = Resource {
            id: "r1".into(),
            task_id: "m1".into(),
            name: "agenda.pdf".into(),
            url: Some("https://files.example/agenda.pdf".into()),
            created_at: Utc::now(),
        };
        let stray = Resource {
            id: "r2".into(),
            task_id: "other".into(),
            name: "x".into(),
            url: None,
            created_at: Utc::now(),
        };
        (
            vec![root, phase1, phase2, m1, m2, t1, unrelated],
            vec![resource, stray],
        )
    }

    fn ids() -> impl FnMut() -> TaskId {
        let mut n = 0;
        move || {
            n += 1;
            TaskId::from(format!("new-{}", n))
        }
    }

    fn request() -> CloneRequest {
        CloneRequest {
            source_root_id: "tpl".into(),
            new_parent_id: None,
            new_origin: Origin::Instance,
            creator_id: "u1".into(),
            overrides: CloneOverrides::default(),
        }
    }

    fn ctx(anchor: Option<CloneAnchor<'_>>) -> CloneContext<'_> {
        CloneContext {
            anchor,
            root_position: 5000.0,
            max_level: MAX_LEVEL,
            now: Utc::now(),
        }
    }

    #[test]
    fn clone_is_isomorphic_with_fresh_ids() {
        let (tasks, resources) = template();
        let plan = plan_clone(&tasks, &resources, &request(), &ctx(None), &mut ids()).unwrap();
        let summary = plan.summary();

        assert_eq!(summary.task_count, 6);
        assert_eq!(summary.resource_count, 1);
        assert!(!tasks.iter().any(|t| t.id == summary.new_root_id));

        let source_tree = build_tree(&tasks, None);
        let clone_tree = build_tree(&plan.tasks, None);
        assert_eq!(clone_tree.len(), 1);
        assert_eq!(clone_tree[0].shape(), source_tree[0].shape());
    }

    #[test]
    fn new_project_rewrites_root_and_origin() {
        let (tasks, resources) = template();
        let plan = plan_clone(&tasks, &resources, &request(), &ctx(None), &mut ids()).unwrap();
        let root_id = plan.root().id.clone();
        assert!(plan.root().parent_id.is_none());
        for task in &plan.tasks {
            assert_eq!(task.root_id, root_id);
            assert_eq!(task.origin, Origin::Instance);
            assert!(!task.is_locked);
            assert_eq!(task.creator_id.as_deref(), Some("u1"));
        }
        // Parent links follow the id map
        let t1 = &plan.tasks.iter().find(|t| t.title == "Book room").unwrap();
        let m1_clone = &plan.id_map[&TaskId::from("m1")];
        assert_eq!(t1.parent_id.as_ref(), Some(m1_clone));
    }

    #[test]
    fn clone_into_existing_project_uses_its_root() {
        let (tasks, resources) = template();
        let project = Task::new_root("proj".into(), "Acme", Origin::Instance, 1.0);
        let phase = Task::new_child("phase".into(), "Phase", &project, 1.0);
        let mut req = request();
        req.source_root_id = "ph1".into();
        req.new_parent_id = Some("phase".into());
        let anchor = CloneAnchor {
            parent: &phase,
            level: 1,
        };
        let plan = plan_clone(&tasks, &resources, &req, &ctx(Some(anchor)), &mut ids()).unwrap();

        assert_eq!(plan.tasks.len(), 4);
        assert_eq!(plan.root().parent_id.as_ref(), Some(&TaskId::from("phase")));
        assert!(plan.tasks.iter().all(|t| t.root_id.as_str() == "proj"));
        assert_eq!(plan.root().position, 5000.0);
    }

    #[test]
    fn overrides_apply_to_root_only() {
        let (tasks, resources) = template();
        let mut req = request();
        req.overrides.title = Some("Acme onboarding".into());
        req.overrides.due_date = Some(NaiveDate::from_ymd_opt(2026, 12, 1));
        let plan = plan_clone(&tasks, &resources, &req, &ctx(None), &mut ids()).unwrap();

        assert_eq!(plan.root().title, "Acme onboarding");
        // Omitted override falls back to the source
        assert_eq!(plan.root().description.as_deref(), Some("Template description"));
        assert_eq!(plan.root().due_date, NaiveDate::from_ymd_opt(2026, 12, 1));
        assert!(plan.tasks[1..].iter().all(|t| t.due_date.is_none()));
        assert!(plan.tasks.iter().any(|t| t.title == "Prepare"));
    }

    #[test]
    fn explicit_null_clears_field() {
        let (tasks, resources) = template();
        let mut req = request();
        req.overrides = serde_json::from_str(r#"{"description": null}"#).unwrap();
        assert_eq!(req.overrides.description, Some(None));
        let plan = plan_clone(&tasks, &resources, &req, &ctx(None), &mut ids()).unwrap();
        assert!(plan.root().description.is_none());
    }

    #[test]
    fn absent_overrides_are_not_serialized() {
        let overrides = CloneOverrides {
            title: Some("x".into()),
            ..Default::default()
        };
        let json = serde_json::to_value(&overrides).unwrap();
        assert_eq!(json, serde_json::json!({"title": "x"}));

        let parsed: CloneOverrides = serde_json::from_str("{}").unwrap();
        assert_eq!(parsed, CloneOverrides::default());
    }

    #[test]
    fn resources_are_relinked() {
        let (tasks, resources) = template();
        let plan = plan_clone(&tasks, &resources, &request(), &ctx(None), &mut ids()).unwrap();
        let copy = &plan.resources[0];
        assert_eq!(copy.task_id, plan.id_map[&TaskId::from("m1")]);
        assert_ne!(copy.id, "r1");
        assert_eq!(copy.name, "agenda.pdf");
    }

    #[test]
    fn origin_must_match_anchor() {
        let (tasks, resources) = template();
        let project = Task::new_root("proj".into(), "Acme", Origin::Instance, 1.0);
        let mut req = request();
        req.new_parent_id = Some("proj".into());
        req.new_origin = Origin::Template;
        let anchor = CloneAnchor {
            parent: &project,
            level: 0,
        };
        let err = plan_clone(&tasks, &resources, &req, &ctx(Some(anchor)), &mut ids()).unwrap_err();
        assert!(matches!(err, CloneError::OriginMismatch { .. }));
    }

    #[test]
    fn depth_limit_counts_subtree_height() {
        let (tasks, resources) = template();
        let project = Task::new_root("proj".into(), "Acme", Origin::Instance, 1.0);
        let mut req = request();
        req.new_parent_id = Some("x".into());
        // template height is 3, so anchoring at level 1 reaches level 5
        let deep = Task::new_child("x".into(), "deep", &project, 1.0);
        let anchor = CloneAnchor {
            parent: &deep,
            level: 1,
        };
        let err = plan_clone(&tasks, &resources, &req, &ctx(Some(anchor)), &mut ids()).unwrap_err();
        assert_eq!(err, CloneError::MaxDepthExceeded { level: 5, max: 4 });
    }

    #[test]
    fn missing_source() {
        let (tasks, resources) = template();
        let mut req = request();
        req.source_root_id = "ghost".into();
        let err = plan_clone(&tasks, &resources, &req, &ctx(None), &mut ids()).unwrap_err();
        assert_eq!(err, CloneError::SourceNotFound("ghost".into()));
    }
}
