//! Counter storage for the fixed-window rate limiter.
//!
//! # Design Decisions
//! - Stores are injected behind [`CounterStore`] so a shared cache can replace
//!   the in-process map without touching call sites
//! - `update` is the only read-modify-write path and must be atomic per key
//! - Expired records are swept opportunistically by the limiter, never on a timer

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;

/// Counter state for one `{prefix}:{identity}` key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitRecord {
    /// Requests admitted in the current window (always >= 1).
    pub count: u32,
    /// End of the current window, in epoch milliseconds.
    pub reset_at_ms: u64,
}

impl RateLimitRecord {
    /// A record is logically absent once `now >= reset_at`.
    pub fn is_expired(&self, now_ms: u64) -> bool {
        now_ms >= self.reset_at_ms
    }
}

/// Storage for rate-limit counters.
pub trait CounterStore: Send + Sync {
    fn get(&self, key: &str) -> Option<RateLimitRecord>;

    fn set(&self, key: &str, record: RateLimitRecord);

    /// Atomically read and rewrite the slot for `key`.
    ///
    /// The closure sees the current record (if any); whatever it leaves in the
    /// slot is stored, and `None` removes the key.
    fn update(&self, key: &str, apply: &mut dyn FnMut(&mut Option<RateLimitRecord>));

    /// Remove every expired record, returning how many were dropped.
    fn sweep_expired(&self, now_ms: u64) -> usize;

    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Process-local store. Counters reset when the process restarts.
#[derive(Debug, Default)]
pub struct InMemoryCounterStore {
    records: DashMap<String, RateLimitRecord>,
}

impl InMemoryCounterStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl CounterStore for InMemoryCounterStore {
    fn get(&self, key: &str) -> Option<RateLimitRecord> {
        self.records.get(key).map(|r| *r.value())
    }

    fn set(&self, key: &str, record: RateLimitRecord) {
        self.records.insert(key.to_owned(), record);
    }

    fn update(&self, key: &str, apply: &mut dyn FnMut(&mut Option<RateLimitRecord>)) {
        // The entry guard holds the shard lock for the whole read-modify-write.
        match self.records.entry(key.to_owned()) {
            Entry::Occupied(mut entry) => {
                let mut slot = Some(*entry.get());
                apply(&mut slot);
                match slot {
                    Some(record) => {
                        *entry.get_mut() = record;
                    }
                    None => {
                        entry.remove();
                    }
                }
            }
            Entry::Vacant(entry) => {
                let mut slot = None;
                apply(&mut slot);
                if let Some(record) = slot {
                    entry.insert(record);
                }
            }
        }
    }

    fn sweep_expired(&self, now_ms: u64) -> usize {
        let before = self.records.len();
        self.records.retain(|_, record| !record.is_expired(now_ms));
        before.saturating_sub(self.records.len())
    }

    fn len(&self) -> usize {
        self.records.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(count: u32, reset_at_ms: u64) -> RateLimitRecord {
        RateLimitRecord { count, reset_at_ms }
    }

    #[test]
    fn test_get_set() {
        let store = InMemoryCounterStore::new();
        assert!(store.get("api:ip:1").is_none());
        assert!(store.is_empty());

        store.set("api:ip:1", record(1, 100));
        assert_eq!(store.get("api:ip:1"), Some(record(1, 100)));

        // Replaced, not merged
        store.set("api:ip:1", record(1, 200));
        assert_eq!(store.get("api:ip:1"), Some(record(1, 200)));
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_update_inserts_rewrites_and_removes() {
        let store = InMemoryCounterStore::new();

        store.update("k", &mut |slot| {
            assert!(slot.is_none());
            *slot = Some(record(1, 50));
        });
        assert_eq!(store.get("k"), Some(record(1, 50)));

        store.update("k", &mut |slot| {
            if let Some(r) = slot.as_mut() {
                r.count += 1;
            }
        });
        assert_eq!(store.get("k").map(|r| r.count), Some(2));

        store.update("k", &mut |slot| *slot = None);
        assert!(store.get("k").is_none());
    }

    #[test]
    fn test_sweep_removes_only_expired() {
        let store = InMemoryCounterStore::new();
        store.set("old", record(3, 100));
        store.set("boundary", record(1, 500));
        store.set("fresh", record(2, 1_000));

        let removed = store.sweep_expired(500);
        assert_eq!(removed, 2);
        assert!(store.get("old").is_none());
        assert!(store.get("boundary").is_none());
        assert!(store.get("fresh").is_some());
    }

    #[test]
    fn test_record_expiry_boundary() {
        let r = record(1, 1_000);
        assert!(!r.is_expired(999));
        assert!(r.is_expired(1_000));
    }
}
