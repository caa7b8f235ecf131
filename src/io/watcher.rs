use std::ffi::OsString;
use std::path::{Path, PathBuf};

use notify::{Config, Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::mpsc;

/// The store file changed on disk
#[derive(Debug, Clone, PartialEq)]
pub struct StoreChanged {
    pub path: PathBuf,
}

/// Watches one store file and reports writes to it.
///
/// The parent directory is watched rather than the file, since atomic
/// replacement swaps the file's inode on every write.
pub struct StoreWatcher {
    _watcher: RecommendedWatcher,
    rx: mpsc::UnboundedReceiver<StoreChanged>,
}

impl StoreWatcher {
    pub fn start(store_path: &Path) -> Result<Self, notify::Error> {
        let (tx, rx) = mpsc::unbounded_channel();
        let file_name = store_path.file_name().map(|n| n.to_os_string());
        let dir = store_path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."))
            .to_path_buf();

        let mut watcher = RecommendedWatcher::new(
            move |result: Result<Event, notify::Error>| {
                let Ok(event) = result else { return };
                if let Some(path) = store_event_path(&event, file_name.as_ref()) {
                    let _ = tx.send(StoreChanged { path });
                }
            },
            Config::default(),
        )?;
        watcher.watch(&dir, RecursiveMode::NonRecursive)?;
        tracing::debug!(dir = %dir.display(), "watching store");
        Ok(StoreWatcher {
            _watcher: watcher,
            rx,
        })
    }

    /// Wait for the next change, then swallow any that queued behind it
    pub async fn changed(&mut self) -> Option<StoreChanged> {
        let first = self.rx.recv().await?;
        while self.rx.try_recv().is_ok() {}
        Some(first)
    }
}

/// The store path touched by `event`, if it is a create/modify/remove of it
fn store_event_path(event: &Event, file_name: Option<&OsString>) -> Option<PathBuf> {
    if !matches!(
        event.kind,
        EventKind::Create(_) | EventKind::Modify(_) | EventKind::Remove(_)
    ) {
        return None;
    }
    event
        .paths
        .iter()
        .find(|p| p.file_name() == file_name.map(OsString::as_os_str))
        .cloned()
}
