use serde::{Deserialize, Serialize};

use crate::model::config::EngineConfig;
use crate::model::task::TaskId;

/// A single position write
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PositionUpdate {
    pub task_id: TaskId,
    pub position: f64,
}

/// Result of placing a node among its siblings
#[derive(Debug, Clone, PartialEq)]
pub enum Allocation {
    /// Only the inserted node gets a new key
    Single(f64),
    /// The gap ran out: every sibling (inserted node included) is respaced
    Renormalize(Vec<PositionUpdate>),
}

/// Computes sibling ordering keys without touching untouched siblings
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PositionAllocator {
    pub step: f64,
    pub min_gap: f64,
}

impl Default for PositionAllocator {
    fn default() -> Self {
        PositionAllocator::from(&EngineConfig::default())
    }
}

impl From<&EngineConfig> for PositionAllocator {
    fn from(config: &EngineConfig) -> Self {
        PositionAllocator {
            step: config.position_step,
            min_gap: config.min_position_gap,
        }
    }
}

impl PositionAllocator {
    /// Key strictly between `prev` and `next` (either end may be open).
    /// Returns `None` when the two neighbours are too close to split.
    pub fn between(&self, prev: Option<f64>, next: Option<f64>) -> Option<f64> {
        match (prev, next) {
            (None, None) => Some(self.step),
            (Some(p), None) => {
                let candidate = p + self.step;
                (candidate > p).then_some(candidate)
            }
            (None, Some(n)) => {
                let candidate = if n > 0.0 { n / 2.0 } else { n - self.step };
                (candidate < n && n - candidate >= self.min_gap).then_some(candidate)
            }
            (Some(p), Some(n)) => {
                if n - p < self.min_gap {
                    return None;
                }
                let mid = (p + n) / 2.0;
                (p < mid && mid < n).then_some(mid)
            }
        }
    }

    /// Place `moving` at `index` within `siblings`.
    ///
    /// `siblings` must be sorted by position and must not contain `moving`.
    /// An out-of-range index appends.
    pub fn allocate_in(&self, siblings: &[(TaskId, f64)], moving: &TaskId, index: usize) -> Allocation {
        let index = index.min(siblings.len());
        let prev = index.checked_sub(1).map(|i| siblings[i].1);
        let next = siblings.get(index).map(|s| s.1);

        match self.between(prev, next) {
            Some(position) => Allocation::Single(position),
            None => {
                let mut ordered: Vec<TaskId> = siblings.iter().map(|(id, _)| id.clone()).collect();
                ordered.insert(index, moving.clone());
                Allocation::Renormalize(self.renormalize(&ordered))
            }
        }
    }

    /// Evenly spaced integer keys `step, 2*step, ...` in the given order
    pub fn renormalize(&self, ordered: &[TaskId]) -> Vec<PositionUpdate> {
        ordered
            .iter()
            .enumerate()
            .map(|(i, id)| PositionUpdate {
                task_id: id.clone(),
                position: self.step * (i as f64 + 1.0),
            })
            .collect()
    }

    /// Key for appending after the last of `siblings`
    pub fn append_after(&self, siblings: &[f64]) -> f64 {
        let last = siblings.iter().copied().fold(None, |acc: Option<f64>, p| {
            Some(acc.map_or(p, |a| a.max(p)))
        });
        match last {
            Some(p) => p + self.step,
            None => self.step,
        }
    }
}

/// Default-configured [`PositionAllocator::between`]
pub fn allocate_position(prev: Option<f64>, next: Option<f64>) -> Option<f64> {
    PositionAllocator::default().between(prev, next)
}
