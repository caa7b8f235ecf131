use std::fs::{self, File, OpenOptions};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

/// Exclusive advisory lock held for one read-modify-write of a store file.
///
/// The lock lives in a sibling `<file>.lock` so the store file itself can be
/// replaced atomically while the lock is held.
pub struct FileLock {
    _file: File,
    path: PathBuf,
}

/// Error type for lock operations
#[derive(Debug, thiserror::Error)]
pub enum LockError {
    #[error("could not open lock file {path}: {source}")]
    Open {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("timed out waiting for {path}: another canopy process is writing")]
    Timeout { path: PathBuf },
}

const RETRY_INTERVAL: Duration = Duration::from_millis(10);

impl FileLock {
    /// Lock the store at `store_path`, retrying until `timeout` elapses
    pub fn acquire(store_path: &Path, timeout: Duration) -> Result<Self, LockError> {
        let path = lock_path_for(store_path);
        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(false)
            .open(&path)
            .map_err(|source| LockError::Open {
                path: path.clone(),
                source,
            })?;

        let deadline = Instant::now() + timeout;
        while try_lock(&file).is_err() {
            if Instant::now() >= deadline {
                return Err(LockError::Timeout { path });
            }
            std::thread::sleep(RETRY_INTERVAL);
        }
        tracing::trace!(lock = %path.display(), "acquired store lock");
        Ok(FileLock { _file: file, path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for FileLock {
    fn drop(&mut self) {
        // flock is released with the descriptor; the file is just litter
        let _ = fs::remove_file(&self.path);
    }
}

fn lock_path_for(store_path: &Path) -> PathBuf {
    let mut name = store_path
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push(".lock");
    store_path.with_file_name(name)
}

#[cfg(unix)]
fn try_lock(file: &File) -> std::io::Result<()> {
    use std::os::unix::io::AsRawFd;
    let result = unsafe { libc::flock(file.as_raw_fd(), libc::LOCK_EX | libc::LOCK_NB) };
    if result == 0 {
        Ok(())
    } else {
        Err(std::io::Error::last_os_error())
    }
}

#[cfg(not(unix))]
fn try_lock(_file: &File) -> std::io::Result<()> {
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn lock_file_sits_next_to_store() {
        let path = lock_path_for(Path::new("/tmp/canopy/tasks.json"));
        assert_eq!(path, PathBuf::from("/tmp/canopy/tasks.json.lock"));
    }

    #[test]
    fn released_on_drop() {
        let tmp = TempDir::new().unwrap();
        let store = tmp.path().join("tasks.json");

        let lock = FileLock::acquire(&store, Duration::from_secs(1)).unwrap();
        assert!(lock.path().exists());
        drop(lock);
        assert!(!tmp.path().join("tasks.json.lock").exists());

        assert!(FileLock::acquire(&store, Duration::from_secs(1)).is_ok());
    }

    #[test]
    fn second_writer_times_out() {
        let tmp = TempDir::new().unwrap();
        let store = tmp.path().join("tasks.json");

        let _held = FileLock::acquire(&store, Duration::from_secs(1)).unwrap();
        let err = FileLock::acquire(&store, Duration::from_millis(30))
            .err()
            .unwrap();
        assert!(matches!(err, LockError::Timeout { .. }));
    }
}
