//! File backend: a JSON array on disk guarded by an advisory lock file.
//!
//! The lock lives in a companion file (`<queue-path>.lock`) rather than on
//! the queue file itself, so the queue file can be replaced by rename while
//! the lock is held.

use std::ffi::OsString;
use std::fs::{self, File, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

use fs2::FileExt;
use tracing::{debug, warn};

use crate::error::QueueError;
use crate::jobs::model::Job;
use crate::store::traits::{QueueStore, QueueTxn};

/// Path of the lock file guarding `path`.
pub fn lock_path_for(path: &Path) -> PathBuf {
    with_suffix(path, ".lock")
}

fn with_suffix(path: &Path, suffix: &str) -> PathBuf {
    let mut name = OsString::from(path.as_os_str());
    name.push(suffix);
    PathBuf::from(name)
}

/// Open (creating if needed) `lock_path` and block on an exclusive lock.
pub(crate) fn open_locked(lock_path: &Path) -> std::io::Result<File> {
    if let Some(parent) = lock_path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }
    let file = OpenOptions::new()
        .read(true)
        .write(true)
        .create(true)
        .truncate(false)
        .open(lock_path)?;
    FileExt::lock_exclusive(&file)?;
    Ok(file)
}

/// Queue store backed by a JSON file.
#[derive(Debug, Clone)]
pub struct FileQueueStore {
    path: PathBuf,
    lock_path: PathBuf,
}

impl FileQueueStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let lock_path = lock_path_for(&path);
        Self { path, lock_path }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn lock_path(&self) -> &Path {
        &self.lock_path
    }
}

impl QueueStore for FileQueueStore {
    fn acquire_exclusive(&self) -> Result<Box<dyn QueueTxn + '_>, QueueError> {
        let lock_file = open_locked(&self.lock_path).map_err(|source| QueueError::Lock {
            path: self.lock_path.clone(),
            source,
        })?;
        Ok(Box::new(FileTxn {
            store: self,
            lock_file,
        }))
    }
}

struct FileTxn<'a> {
    store: &'a FileQueueStore,
    lock_file: File,
}

impl QueueTxn for FileTxn<'_> {
    fn load(&mut self) -> Vec<Job> {
        let path = &self.store.path;
        let bytes = match fs::read(path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == ErrorKind::NotFound => return Vec::new(),
            Err(e) => {
                warn!(path = %path.display(), "Unreadable queue file, treating as empty: {e}");
                return Vec::new();
            }
        };

        if bytes.iter().all(u8::is_ascii_whitespace) {
            return Vec::new();
        }

        match serde_json::from_slice(&bytes) {
            Ok(jobs) => jobs,
            Err(e) => {
                warn!(path = %path.display(), "Corrupt queue file, treating as empty: {e}");
                Vec::new()
            }
        }
    }

    fn save(&mut self, jobs: &[Job]) -> Result<(), QueueError> {
        let path = &self.store.path;
        let tmp_path = with_suffix(path, ".tmp");
        let bytes = serde_json::to_vec(jobs)?;

        let write = || -> std::io::Result<()> {
            let mut tmp = File::create(&tmp_path)?;
            tmp.write_all(&bytes)?;
            tmp.sync_all()?;
            fs::rename(&tmp_path, path)
        };
        write().map_err(|source| QueueError::Write {
            path: path.clone(),
            source,
        })?;

        debug!(path = %path.display(), count = jobs.len(), "Queue saved");
        Ok(())
    }
}

impl Drop for FileTxn<'_> {
    fn drop(&mut self) {
        if let Err(e) = FileExt::unlock(&self.lock_file) {
            warn!(path = %self.store.lock_path.display(), "Failed to release queue lock: {e}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::jobs::model::JobState;

    fn store_in(dir: &tempfile::TempDir) -> FileQueueStore {
        FileQueueStore::new(dir.path().join("job_queue.json"))
    }

    #[test]
    fn lock_path_appends_suffix() {
        let path = Path::new("/srv/work/job_queue.json");
        assert_eq!(
            lock_path_for(path),
            PathBuf::from("/srv/work/job_queue.json.lock")
        );
    }

    #[test]
    fn missing_file_loads_empty() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(&dir);
        let mut txn = store.acquire_exclusive().unwrap();
        assert!(txn.load().is_empty());
    }

    #[test]
    fn save_then_load() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(&dir);
        let job = Job::new(serde_json::json!({"working_directory": "/tmp/a"}));

        {
            let mut txn = store.acquire_exclusive().unwrap();
            txn.save(std::slice::from_ref(&job)).unwrap();
        }

        let mut txn = store.acquire_exclusive().unwrap();
        let jobs = txn.load();
        assert_eq!(jobs, vec![job]);
        assert!(store.lock_path().exists());
    }

    #[test]
    fn corrupt_file_loads_empty_and_recovers() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(&dir);
        fs::write(store.path(), b"[{\"id\": \"6f1c2a7e-4b1d").unwrap();

        let mut txn = store.acquire_exclusive().unwrap();
        assert!(txn.load().is_empty());

        let job = Job::new(serde_json::json!({}));
        txn.save(std::slice::from_ref(&job)).unwrap();
        let jobs = txn.load();
        assert_eq!(jobs.len(), 1);
        assert_eq!(jobs[0].id, job.id);
        assert_eq!(jobs[0].state, JobState::Queued);
    }

    #[test]
    fn whitespace_file_loads_empty() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(&dir);
        fs::write(store.path(), b"  \n").unwrap();

        let mut txn = store.acquire_exclusive().unwrap();
        assert!(txn.load().is_empty());
    }

    #[test]
    fn lock_released_on_drop() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(&dir);

        let txn = store.acquire_exclusive().unwrap();
        let contender = OpenOptions::new()
            .read(true)
            .write(true)
            .open(store.lock_path())
            .unwrap();
        assert!(FileExt::try_lock_exclusive(&contender).is_err());

        drop(txn);
        assert!(FileExt::try_lock_exclusive(&contender).is_ok());
        FileExt::unlock(&contender).unwrap();
    }
}
