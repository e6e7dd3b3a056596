//! Per-instance mutual exclusion.

use dashmap::DashMap;
use flowstate_core::InstanceId;
use parking_lot::{ArcMutexGuard, Mutex, RawMutex};
use std::sync::Arc;

/// Lock table keyed by instance id.
///
/// Two callers locking the same id run one after the other; callers on
/// different ids never wait on each other beyond the brief map lookup.
/// An entry lives only while some caller holds or waits for it.
#[derive(Debug, Default)]
pub struct InstanceLocks {
    locks: DashMap<InstanceId, Arc<Mutex<()>>>,
}

impl InstanceLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Blocks until the lock for `id` is available.
    pub fn lock(&self, id: &InstanceId) -> InstanceGuard<'_> {
        // Clone the Arc out first so the map shard is not held while waiting.
        let lock = self
            .locks
            .entry(id.clone())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();
        InstanceGuard {
            table: self,
            id: id.clone(),
            guard: Some(lock.lock_arc()),
        }
    }

    /// Number of ids currently held or waited on.
    pub fn len(&self) -> usize {
        self.locks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.locks.is_empty()
    }
}

/// Held for the duration of one instance's critical section.
///
/// Dropping the last guard for an id removes its table entry.
pub struct InstanceGuard<'a> {
    table: &'a InstanceLocks,
    id: InstanceId,
    guard: Option<ArcMutexGuard<RawMutex, ()>>,
}

impl Drop for InstanceGuard<'_> {
    fn drop(&mut self) {
        self.guard.take();
        // Waiters hold their own clone, so a count of one means only the
        // table still refers to the mutex. The check runs under the shard
        // lock, which `lock` also takes before cloning.
        self.table
            .locks
            .remove_if(&self.id, |_, lock| Arc::strong_count(lock) == 1);
    }
}
