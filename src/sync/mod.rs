pub mod coordinator;
pub mod error;
pub mod guard;
pub mod store;

pub use coordinator::{CascadeReport, DragSession, MoveOutcome, MovePhase, StreamKey, TreeSync};
pub use error::{Operation, SyncError};
pub use guard::{Guarded, StreamGuard};
pub use store::{NewTask, RootsPage, StoreError, TaskStore};
