use std::collections::HashSet;

use chrono::{DateTime, Utc};
use regex::RegexBuilder;
use serde::{Deserialize, Serialize};

use crate::model::config::EngineConfig;
use crate::model::task::{Origin, Resource, Task, TaskId, TaskStatus};
use crate::ops::clone::{CloneAnchor, CloneContext, CloneError, CloneRequest, CloneSummary, plan_clone};
use crate::ops::position::{PositionAllocator, PositionUpdate};
use crate::sync::store::{NewTask, RootsPage, StoreError};

/// The persisted task table with the validation a store applies on write
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TaskDocument {
    #[serde(default)]
    pub tasks: Vec<Task>,
    #[serde(default)]
    pub resources: Vec<Resource>,
}

impl TaskDocument {
    pub fn new(tasks: Vec<Task>) -> Self {
        TaskDocument {
            tasks,
            resources: Vec::new(),
        }
    }

    pub fn get(&self, id: &TaskId) -> Option<&Task> {
        self.tasks.iter().find(|t| &t.id == id)
    }

    fn get_mut(&mut self, id: &TaskId) -> Result<&mut Task, StoreError> {
        self.tasks
            .iter_mut()
            .find(|t| &t.id == id)
            .ok_or_else(|| StoreError::NotFound(id.clone()))
    }

    /// Number of ancestors above `id` (0 = root). `None` for unknown ids or
    /// a broken parent chain.
    pub fn level(&self, id: &TaskId) -> Option<usize> {
        let mut current = self.get(id)?;
        let mut level = 0;
        while let Some(parent) = &current.parent_id {
            current = self.get(parent)?;
            level += 1;
            if level > self.tasks.len() {
                return None;
            }
        }
        Some(level)
    }

    fn children_positions(&self, parent: Option<&TaskId>) -> Vec<f64> {
        self.tasks
            .iter()
            .filter(|t| t.parent_id.as_ref() == parent)
            .map(|t| t.position)
            .collect()
    }

    /// `id` followed by all of its descendants, breadth first
    pub fn subtree(&self, id: &TaskId) -> Result<Vec<Task>, StoreError> {
        let root = self.get(id).ok_or_else(|| StoreError::NotFound(id.clone()))?;
        let mut seen: HashSet<&TaskId> = HashSet::from([&root.id]);
        let mut out = vec![root];
        let mut next = 0;
        while next < out.len() {
            let parent = &out[next].id;
            let children: Vec<&Task> = self
                .tasks
                .iter()
                .filter(|t| t.parent_id.as_ref() == Some(parent) && seen.insert(&t.id))
                .collect();
            out.extend(children);
            next += 1;
        }
        Ok(out.into_iter().cloned().collect())
    }

    /// Roots ordered by position, `limit` at a time
    pub fn roots_page(&self, offset: usize, limit: usize) -> RootsPage {
        let mut roots: Vec<&Task> = self.tasks.iter().filter(|t| t.is_root()).collect();
        roots.sort_by(|a, b| a.position.total_cmp(&b.position));
        let items: Vec<Task> = roots.iter().skip(offset).take(limit).map(|t| (*t).clone()).collect();
        RootsPage {
            has_more: offset + items.len() < roots.len(),
            items,
        }
    }

    /// Levels the subtree under `id` spans below it (0 for a leaf)
    fn height(&self, id: &TaskId) -> Result<usize, StoreError> {
        let subtree = self.subtree(id)?;
        let base = self.level(id).unwrap_or(0);
        Ok(subtree
            .iter()
            .filter_map(|t| self.level(&t.id))
            .map(|level| level.saturating_sub(base))
            .max()
            .unwrap_or(0))
    }

    /// Write a position and optionally a new parent. The parent must exist in
    /// the same tree, outside the task's own subtree, and shallow enough that
    /// the subtree stays within `config.max_level`.
    pub fn set_position(
        &mut self,
        id: &TaskId,
        position: f64,
        new_parent: Option<Option<TaskId>>,
        config: &EngineConfig,
        now: DateTime<Utc>,
    ) -> Result<Task, StoreError> {
        if !position.is_finite() {
            return Err(StoreError::Rejected(format!("position {position} is not finite")));
        }
        let task = self.get(id).ok_or_else(|| StoreError::NotFound(id.clone()))?;
        match &new_parent {
            Some(None) if !task.is_root() => {
                return Err(StoreError::Rejected(format!("{id} cannot become a root")));
            }
            Some(Some(parent_id)) => {
                let parent = self
                    .get(parent_id)
                    .ok_or_else(|| StoreError::NotFound(parent_id.clone()))?;
                if parent.root_id != task.root_id || parent.origin != task.origin {
                    return Err(StoreError::Rejected(format!(
                        "{parent_id} is in a different tree than {id}"
                    )));
                }
                if self.subtree(id)?.iter().any(|t| &t.id == parent_id) {
                    return Err(StoreError::Rejected(format!(
                        "cannot move {id} under its own descendant {parent_id}"
                    )));
                }
                let deepest = self.level(parent_id).unwrap_or(0) + 1 + self.height(id)?;
                if deepest > config.max_level {
                    return Err(StoreError::Rejected(format!(
                        "moving {id} under {parent_id} would nest tasks at level {deepest}, below level {}",
                        config.max_level
                    )));
                }
            }
            _ => {}
        }

        let task = self.write_position(id, position, now)?;
        if let Some(parent) = new_parent {
            task.parent_id = parent;
        }
        Ok(task.clone())
    }

    fn write_position(&mut self, id: &TaskId, position: f64, now: DateTime<Utc>) -> Result<&mut Task, StoreError> {
        let task = self.get_mut(id)?;
        task.position = position;
        task.updated_at = now;
        Ok(task)
    }

    /// Apply several position writes, all or none
    pub fn set_positions(&mut self, updates: &[PositionUpdate], now: DateTime<Utc>) -> Result<Vec<Task>, StoreError> {
        if let Some(missing) = updates.iter().find(|u| self.get(&u.task_id).is_none()) {
            return Err(StoreError::NotFound(missing.task_id.clone()));
        }
        if let Some(bad) = updates.iter().find(|u| !u.position.is_finite()) {
            return Err(StoreError::Rejected(format!("position {} is not finite", bad.position)));
        }
        updates
            .iter()
            .map(|u| self.write_position(&u.task_id, u.position, now).map(|t| t.clone()))
            .collect()
    }

    pub fn set_status(&mut self, id: &TaskId, status: TaskStatus, now: DateTime<Utc>) -> Result<Task, StoreError> {
        let task = self.get_mut(id)?;
        if status.is_project_only() && !task.is_root() {
            return Err(StoreError::Rejected(format!(
                "status {status} is only valid for projects"
            )));
        }
        task.status = status;
        task.updated_at = now;
        Ok(task.clone())
    }

    /// Remove a task, its descendants, and their resources.
    /// Returns the removed ids.
    pub fn delete(&mut self, id: &TaskId) -> Result<Vec<TaskId>, StoreError> {
        let removed: Vec<TaskId> = self.subtree(id)?.into_iter().map(|t| t.id).collect();
        let gone: HashSet<&TaskId> = removed.iter().collect();
        self.tasks.retain(|t| !gone.contains(&t.id));
        self.resources.retain(|r| !gone.contains(&r.task_id));
        Ok(removed)
    }

    /// Append a new task after its last sibling
    pub fn create(
        &mut self,
        new: NewTask,
        id: TaskId,
        config: &EngineConfig,
        now: DateTime<Utc>,
    ) -> Result<Task, StoreError> {
        let position = PositionAllocator::from(config)
            .append_after(&self.children_positions(new.parent_id.as_ref()));
        let mut task = match &new.parent_id {
            None => Task::new_root(id, new.title, new.origin, position),
            Some(parent_id) => {
                let parent = self
                    .get(parent_id)
                    .ok_or_else(|| StoreError::NotFound(parent_id.clone()))?;
                let level = self.level(parent_id).unwrap_or(0) + 1;
                if level > config.max_level {
                    return Err(StoreError::Rejected(format!(
                        "tasks cannot nest below level {}",
                        config.max_level
                    )));
                }
                Task::new_child(id, new.title, parent, position)
            }
        };
        task.description = new.description;
        task.creator_id = new.creator_id;
        task.is_locked = new.is_locked;
        task.created_at = now;
        task.updated_at = now;
        self.tasks.push(task.clone());
        Ok(task)
    }

    /// Copy a subtree in one step: either every record is added or none is
    pub fn clone_subtree(
        &mut self,
        request: &CloneRequest,
        config: &EngineConfig,
        now: DateTime<Utc>,
        next_id: &mut dyn FnMut() -> TaskId,
    ) -> Result<CloneSummary, StoreError> {
        let anchor = match &request.new_parent_id {
            Some(parent_id) => {
                let parent = self
                    .get(parent_id)
                    .ok_or_else(|| CloneError::DestinationNotFound(parent_id.clone()))?;
                let level = self
                    .level(parent_id)
                    .ok_or_else(|| CloneError::DestinationNotFound(parent_id.clone()))?;
                Some(CloneAnchor { parent, level })
            }
            None => None,
        };
        let ctx = CloneContext {
            anchor,
            root_position: PositionAllocator::from(config)
                .append_after(&self.children_positions(request.new_parent_id.as_ref())),
            max_level: config.max_level,
            now,
        };
        let plan = plan_clone(&self.tasks, &self.resources, request, &ctx, next_id)?;
        let summary = plan.summary();
        self.tasks.extend(plan.tasks);
        self.resources.extend(plan.resources);
        Ok(summary)
    }

    /// Case-insensitive regex match on title or description
    pub fn search(&self, query: &str, origin: Option<Origin>) -> Result<Vec<Task>, StoreError> {
        let pattern = RegexBuilder::new(query)
            .case_insensitive(true)
            .build()
            .map_err(|e| StoreError::Rejected(format!("invalid search pattern: {e}")))?;
        Ok(self
            .tasks
            .iter()
            .filter(|t| origin.is_none_or(|o| t.origin == o))
            .filter(|t| {
                pattern.is_match(&t.title)
                    || t.description.as_deref().is_some_and(|d| pattern.is_match(d))
            })
            .cloned()
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn doc() -> TaskDocument {
        let p = Task::new_root("P".into(), "Launch", Origin::Instance, 1000.0);
        let a = Task::new_child("A".into(), "Design", &p, 1000.0);
        let mut b = Task::new_child("B".into(), "Build", &p, 2000.0);
        b.description = Some("Wire the API".into());
        let a1 = Task::new_child("a1".into(), "Sketch", &a, 1000.0);
        let q = Task::new_root("Q".into(), "Other", Origin::Instance, 2000.0);
        let t = Task::new_root("T".into(), "Template", Origin::Template, 500.0);
        let mut doc = TaskDocument::new(vec![p, a, b, a1, q, t]);
        doc.resources.push(Resource {
            id: "r1".into(),
            task_id: "a1".into(),
            name: "brief".into(),
            url: None,
            created_at: Utc::now(),
        });
        doc
    }

    fn ids(tasks: &[Task]) -> Vec<&str> {
        tasks.iter().map(|t| t.id.as_str()).collect()
    }

    #[test]
    fn subtree_includes_root_first() {
        let doc = doc();
        assert_eq!(ids(&doc.subtree(&"P".into()).unwrap()), vec!["P", "A", "B", "a1"]);
        assert!(matches!(doc.subtree(&"x".into()), Err(StoreError::NotFound(_))));
    }

    #[test]
    fn roots_are_paged_in_position_order() {
        let doc = doc();
        let first = doc.roots_page(0, 2);
        assert_eq!(ids(&first.items), vec!["T", "P"]);
        assert!(first.has_more);
        let second = doc.roots_page(2, 2);
        assert_eq!(ids(&second.items), vec!["Q"]);
        assert!(!second.has_more);
    }

    #[test]
    fn position_write_leaves_parent_unless_given() {
        let mut doc = doc();
        let config = EngineConfig::default();
        let moved = doc
            .set_position(&"a1".into(), 1500.0, None, &config, Utc::now())
            .unwrap();
        assert_eq!(moved.parent_id, Some("A".into()));

        let moved = doc
            .set_position(&"a1".into(), 500.0, Some(Some("B".into())), &config, Utc::now())
            .unwrap();
        assert_eq!(moved.parent_id, Some("B".into()));
        assert_eq!(doc.get(&"a1".into()).unwrap().position, 500.0);
    }

    #[test]
    fn position_write_rejects_bad_parents() {
        let mut doc = doc();
        let before = doc.clone();
        let config = EngineConfig::default();
        let now = Utc::now();
        assert!(matches!(
            doc.set_position(&"A".into(), 1.0, Some(Some("a1".into())), &config, now),
            Err(StoreError::Rejected(_))
        ));
        assert!(matches!(
            doc.set_position(&"A".into(), 1.0, Some(Some("Q".into())), &config, now),
            Err(StoreError::Rejected(_))
        ));
        assert!(matches!(
            doc.set_position(&"A".into(), 1.0, Some(None), &config, now),
            Err(StoreError::Rejected(_))
        ));
        assert_eq!(doc, before);
    }

    #[test]
    fn position_write_keeps_subtree_within_depth() {
        let mut doc = doc();
        let before = doc.clone();
        let shallow = EngineConfig {
            max_level: 2,
            ..EngineConfig::default()
        };
        // A carries a1, so under B (level 1) a1 would sit at level 3
        let err = doc
            .set_position(&"A".into(), 1.0, Some(Some("B".into())), &shallow, Utc::now())
            .unwrap_err();
        assert!(matches!(err, StoreError::Rejected(ref msg) if msg.contains("level 3")));
        assert_eq!(doc, before);

        // The leaf fits
        let moved = doc
            .set_position(&"a1".into(), 1.0, Some(Some("B".into())), &shallow, Utc::now())
            .unwrap();
        assert_eq!(moved.parent_id, Some("B".into()));
    }

    #[test]
    fn bulk_positions_are_all_or_nothing() {
        let mut doc = doc();
        let before = doc.clone();
        let updates = vec![
            PositionUpdate {
                task_id: "A".into(),
                position: 1.0,
            },
            PositionUpdate {
                task_id: "missing".into(),
                position: 2.0,
            },
        ];
        assert!(doc.set_positions(&updates, Utc::now()).is_err());
        assert_eq!(doc, before);
    }

    #[test]
    fn delete_cascades_to_descendants_and_resources() {
        let mut doc = doc();
        let removed = doc.delete(&"A".into()).unwrap();
        assert_eq!(removed, vec![TaskId::from("A"), TaskId::from("a1")]);
        assert!(doc.get(&"a1".into()).is_none());
        assert!(doc.resources.is_empty());
    }

    #[test]
    fn create_appends_and_checks_depth() {
        let mut doc = doc();
        let config = EngineConfig::default();
        let task = doc
            .create(NewTask::child("Review", "P".into()), "C".into(), &config, Utc::now())
            .unwrap();
        assert_eq!(task.position, 3000.0);
        assert_eq!(task.root_id, TaskId::from("P"));

        let shallow = EngineConfig {
            max_level: 2,
            ..EngineConfig::default()
        };
        assert!(matches!(
            doc.create(NewTask::child("Too deep", "a1".into()), "D".into(), &shallow, Utc::now()),
            Err(StoreError::Rejected(_))
        ));
    }

    #[test]
    fn clone_failure_writes_nothing() {
        let mut doc = doc();
        let before = doc.clone();
        let request = CloneRequest {
            source_root_id: "P".into(),
            new_parent_id: Some("T".into()),
            new_origin: Origin::Instance,
            creator_id: "u1".into(),
            overrides: Default::default(),
        };
        let mut n = 0;
        let mut next_id = || {
            n += 1;
            TaskId::new(format!("c{n}"))
        };
        let err = doc
            .clone_subtree(&request, &EngineConfig::default(), Utc::now(), &mut next_id)
            .unwrap_err();
        assert!(matches!(err, StoreError::Clone(CloneError::OriginMismatch { .. })));
        assert_eq!(doc, before);
    }

    #[test]
    fn clone_adds_whole_subtree() {
        let mut doc = doc();
        let request = CloneRequest {
            source_root_id: "P".into(),
            new_parent_id: None,
            new_origin: Origin::Template,
            creator_id: "u1".into(),
            overrides: Default::default(),
        };
        let mut n = 0;
        let mut next_id = || {
            n += 1;
            TaskId::new(format!("c{n}"))
        };
        let summary = doc
            .clone_subtree(&request, &EngineConfig::default(), Utc::now(), &mut next_id)
            .unwrap();
        assert_eq!(summary.task_count, 4);
        assert_eq!(summary.resource_count, 1);
        let copy = doc.subtree(&summary.new_root_id).unwrap();
        assert_eq!(copy.len(), 4);
        assert!(copy.iter().all(|t| t.origin == Origin::Template));
        assert_eq!(doc.get(&summary.new_root_id).unwrap().position, 3000.0);
    }

    #[test]
    fn search_is_case_insensitive_and_filters_origin() {
        let doc = doc();
        assert_eq!(ids(&doc.search("api", None).unwrap()), vec!["B"]);
        assert_eq!(ids(&doc.search("^t", None).unwrap()), vec!["T"]);
        assert!(doc.search("^t", Some(Origin::Instance)).unwrap().is_empty());
        assert!(matches!(doc.search("(", None), Err(StoreError::Rejected(_))));
    }
}
