//! Per-identity serialisation of read-modify-write sequences.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use terchat_shared::UserId;

/// One mutex per identity, created on first use.
///
/// Every operation on an identity's files runs under that identity's lock.
/// Callers never hold two identity locks at once, so no lock ordering is
/// needed.
#[derive(Debug, Default)]
pub(crate) struct LockTable {
    locks: Mutex<HashMap<UserId, Arc<Mutex<()>>>>,
}

impl LockTable {
    fn handle(&self, id: UserId) -> Arc<Mutex<()>> {
        let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
        locks.entry(id).or_default().clone()
    }

    /// Run `f` while holding the lock for `id`.
    pub(crate) fn with<T>(&self, id: UserId, f: impl FnOnce() -> T) -> T {
        let handle = self.handle(id);
        // Rewrites are atomic, so files behind a poisoned lock are still consistent.
        let _guard: MutexGuard<'_, ()> = handle.lock().unwrap_or_else(PoisonError::into_inner);
        f()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::thread;

    #[test]
    fn test_same_identity_is_serialised() {
        let table = Arc::new(LockTable::default());
        let inside = Arc::new(AtomicUsize::new(0));
        let max_seen = Arc::new(AtomicUsize::new(0));

        let workers: Vec<_> = (0..8)
            .map(|_| {
                let table = table.clone();
                let inside = inside.clone();
                let max_seen = max_seen.clone();
                thread::spawn(move || {
                    table.with(UserId(1), || {
                        let now = inside.fetch_add(1, Ordering::SeqCst) + 1;
                        max_seen.fetch_max(now, Ordering::SeqCst);
                        thread::sleep(std::time::Duration::from_millis(2));
                        inside.fetch_sub(1, Ordering::SeqCst);
                    })
                })
            })
            .collect();

        for worker in workers {
            worker.join().unwrap();
        }
        assert_eq!(max_seen.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_handles_are_shared_per_identity() {
        let table = LockTable::default();
        assert!(Arc::ptr_eq(&table.handle(UserId(1)), &table.handle(UserId(1))));
        assert!(!Arc::ptr_eq(&table.handle(UserId(1)), &table.handle(UserId(2))));
    }
}
