pub mod build;
pub mod clone;
pub mod merge;
pub mod move_plan;
pub mod position;
pub mod status;

pub use build::{build_forest, build_tree, flatten};
pub use clone::{CloneOverrides, CloneRequest, CloneSummary, plan_clone};
pub use merge::{TaskPatch, merge_task_updates, patch_tasks, remove_subtree, update_tree_expansion};
pub use move_plan::{DropTarget, MovePlan, PersistCall, ValidationError, plan_move};
pub use position::{PositionAllocator, PositionUpdate, allocate_position};
pub use status::{StatusPlan, plan_status};
