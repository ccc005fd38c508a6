use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{Mutex, OwnedMutexGuard};

/// Per-path commit locks shared by every refresh running in the process.
/// Two refreshes (for different users) that touch the same container path
/// commit it one after the other.
#[derive(Default)]
pub struct PathLocks {
    locks: DashMap<String, Arc<Mutex<()>>>,
}

impl PathLocks {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn lock(&self, path: &str) -> PathGuard<'_> {
        let mutex = self
            .locks
            .entry(path.to_owned())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();
        PathGuard {
            guard: Some(mutex.lock_owned().await),
            path: path.to_owned(),
            locks: self,
        }
    }

    /// Number of paths with a live entry in the table.
    pub fn tracked(&self) -> usize {
        self.locks.len()
    }
}

/// Holds one path's lock. The table entry is dropped with the last holder.
pub struct PathGuard<'a> {
    guard: Option<OwnedMutexGuard<()>>,
    path: String,
    locks: &'a PathLocks,
}

impl Drop for PathGuard<'_> {
    fn drop(&mut self) {
        // The guard owns a clone of the mutex; release it before counting.
        drop(self.guard.take());
        self.locks
            .locks
            .remove_if(&self.path, |_, mutex| Arc::strong_count(mutex) == 1);
    }
}
