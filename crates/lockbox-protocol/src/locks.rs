//! Per-file write serialization.
//!
//! The server holds a file's lock across every check-then-write on that
//! file, so there is a single writer per (owner, name) at any time.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{Mutex, OwnedMutexGuard};

use lockbox_core::FileRef;

/// Idle entries are pruned once the table grows past this many files.
const PRUNE_THRESHOLD: usize = 1024;

/// A table of async mutexes keyed by file.
#[derive(Default)]
pub struct FileLocks {
    locks: Mutex<HashMap<FileRef, Arc<Mutex<()>>>>,
}

impl FileLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait for exclusive access to `file`.
    ///
    /// The lock is released when the returned guard is dropped.
    pub async fn lock(&self, file: &FileRef) -> OwnedMutexGuard<()> {
        let lock = {
            let mut locks = self.locks.lock().await;
            if locks.len() > PRUNE_THRESHOLD {
                locks.retain(|_, lock| Arc::strong_count(lock) > 1);
            }
            locks.entry(file.clone()).or_default().clone()
        };
        lock.lock_owned().await
    }

    /// Number of files with a lock entry.
    pub async fn len(&self) -> usize {
        self.locks.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}
