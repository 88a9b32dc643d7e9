//! In-process replay protection for payment proofs.
//!
//! Each canonical proof hash is admitted at most once. Entries are swept
//! lazily on writes once they are older than the retention window, which only
//! bounds memory: proof freshness is enforced separately by the pipeline.

use crate::services::clock::{Clock, SystemClock};
use ethers::types::H256;
use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Admission {
    pub accepted: bool,
}

pub struct ReplayGuard {
    seen: Mutex<HashMap<H256, u64>>,
    retention_secs: u64,
    clock: Arc<dyn Clock>,
}

impl ReplayGuard {
    pub fn new(retention_secs: u64) -> Self {
        Self::with_clock(retention_secs, Arc::new(SystemClock))
    }

    pub fn with_clock(retention_secs: u64, clock: Arc<dyn Clock>) -> Self {
        Self {
            seen: Mutex::new(HashMap::new()),
            retention_secs,
            clock,
        }
    }

    /// Records `hash` if it has not been seen, in one critical section.
    pub fn admit(&self, hash: H256) -> Admission {
        let now = self.clock.now_secs();
        let mut seen = self.lock();

        match seen.entry(hash) {
            Entry::Occupied(_) => return Admission { accepted: false },
            Entry::Vacant(slot) => {
                slot.insert(now);
            }
        }

        let retention = self.retention_secs;
        let before = seen.len();
        seen.retain(|key, first_seen| *key == hash || now.saturating_sub(*first_seen) <= retention);

        let evicted = before - seen.len();
        if evicted > 0 {
            tracing::debug!(evicted, remaining = seen.len(), "Swept expired proof hashes");
        }

        Admission { accepted: true }
    }

    pub fn contains(&self, hash: &H256) -> bool {
        self.lock().contains_key(hash)
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<H256, u64>> {
        // The map stays consistent even if a holder panicked.
        self.seen.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::clock::ManualClock;

    fn guard(retention: u64) -> (ReplayGuard, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new(1_000));
        (ReplayGuard::with_clock(retention, clock.clone()), clock)
    }

    #[test]
    fn admits_exactly_once() {
        let (guard, clock) = guard(600);
        let hash = H256::repeat_byte(1);

        assert!(guard.admit(hash).accepted);
        assert!(!guard.admit(hash).accepted);

        clock.advance(10_000);
        // Never swept because nothing else was written.
        assert!(!guard.admit(hash).accepted);
    }

    #[test]
    fn sweep_evicts_old_entries_on_write() {
        let (guard, clock) = guard(600);
        let old = H256::repeat_byte(1);
        assert!(guard.admit(old).accepted);

        clock.advance(600);
        assert!(guard.admit(H256::repeat_byte(2)).accepted);
        assert!(guard.contains(&old), "entry at exactly the retention age is kept");

        clock.advance(1);
        assert!(guard.admit(H256::repeat_byte(3)).accepted);
        assert!(!guard.contains(&old));
        assert_eq!(guard.len(), 2);

        // Once swept the hash is admissible again.
        assert!(guard.admit(old).accepted);
    }

    #[test]
    fn sweep_never_evicts_the_entry_just_inserted() {
        let (guard, clock) = guard(0);
        clock.advance(5);
        let hash = H256::repeat_byte(9);
        assert!(guard.admit(hash).accepted);
        assert!(guard.contains(&hash));
        assert!(!guard.admit(hash).accepted);
    }

    #[test]
    fn concurrent_identical_admissions_accept_once() {
        let guard = Arc::new(ReplayGuard::new(600));
        let hash = H256::repeat_byte(7);

        let accepted = std::thread::scope(|scope| {
            let handles: Vec<_> = (0..32)
                .map(|_| {
                    let guard = guard.clone();
                    scope.spawn(move || guard.admit(hash).accepted)
                })
                .collect();
            handles
                .into_iter()
                .map(|h| h.join().unwrap())
                .filter(|accepted| *accepted)
                .count()
        });

        assert_eq!(accepted, 1);
        assert_eq!(guard.len(), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_tasks_accept_once() {
        let guard = Arc::new(ReplayGuard::new(600));
        let hash = H256::repeat_byte(8);

        let tasks = (0..64).map(|_| {
            let guard = guard.clone();
            tokio::spawn(async move { guard.admit(hash).accepted })
        });
        let results = futures::future::join_all(tasks).await;

        let accepted = results.into_iter().filter(|r| *r.as_ref().unwrap()).count();
        assert_eq!(accepted, 1);
    }
}
