pub mod config_io;
pub mod document;
pub mod json_store;
pub mod lock;
pub mod memory;
pub mod project_io;
pub mod watcher;
