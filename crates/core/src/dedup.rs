use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

pub const DEFAULT_DEDUP_TTL: Duration = Duration::from_secs(600);

/// Remembers inbound event ids so platform redeliveries are processed once.
pub trait DedupStore: Send + Sync {
    fn seen(&self, event_id: &str) -> bool;

    fn mark(&self, event_id: &str);

    /// Returns `true` the first time an id is observed within the TTL.
    fn check_and_mark(&self, event_id: &str) -> bool {
        if self.seen(event_id) {
            return false;
        }
        self.mark(event_id);
        true
    }
}

/// TTL map with lazy eviction. The single mutex also makes
/// `check_and_mark` atomic.
#[derive(Debug)]
pub struct InMemoryDedupStore {
    ttl: Duration,
    entries: Mutex<HashMap<String, Instant>>,
}

impl Default for InMemoryDedupStore {
    fn default() -> Self {
        Self::new(DEFAULT_DEDUP_TTL)
    }
}

impl InMemoryDedupStore {
    pub fn new(ttl: Duration) -> Self {
        Self { ttl, entries: Mutex::new(HashMap::new()) }
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, Instant>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn is_live(&self, marked_at: Instant, now: Instant) -> bool {
        now.saturating_duration_since(marked_at) < self.ttl
    }

    fn seen_at(&self, event_id: &str, now: Instant) -> bool {
        self.lock().get(event_id).is_some_and(|marked_at| self.is_live(*marked_at, now))
    }

    fn mark_at(&self, event_id: &str, now: Instant) {
        let mut entries = self.lock();
        entries.retain(|_, marked_at| self.is_live(*marked_at, now));
        entries.insert(event_id.to_owned(), now);
    }

    fn check_and_mark_at(&self, event_id: &str, now: Instant) -> bool {
        let mut entries = self.lock();
        entries.retain(|_, marked_at| self.is_live(*marked_at, now));
        if entries.contains_key(event_id) {
            return false;
        }
        entries.insert(event_id.to_owned(), now);
        true
    }
}

impl DedupStore for InMemoryDedupStore {
    fn seen(&self, event_id: &str) -> bool {
        self.seen_at(event_id, Instant::now())
    }

    fn mark(&self, event_id: &str) {
        self.mark_at(event_id, Instant::now());
    }

    fn check_and_mark(&self, event_id: &str) -> bool {
        self.check_and_mark_at(event_id, Instant::now())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::{Duration, Instant};

    use super::{DedupStore, InMemoryDedupStore};

    #[test]
    fn second_delivery_within_ttl_is_rejected() {
        let store = InMemoryDedupStore::new(Duration::from_secs(600));
        assert!(store.check_and_mark("Ev01"));
        assert!(!store.check_and_mark("Ev01"));
        assert!(store.check_and_mark("Ev02"));
        assert!(store.seen("Ev01"));
    }

    #[test]
    fn entries_expire_after_ttl() {
        let store = InMemoryDedupStore::new(Duration::from_secs(60));
        let start = Instant::now();

        assert!(store.check_and_mark_at("Ev01", start));
        assert!(!store.check_and_mark_at("Ev01", start + Duration::from_secs(59)));
        assert!(!store.seen_at("Ev01", start + Duration::from_secs(60)));
        assert!(store.check_and_mark_at("Ev01", start + Duration::from_secs(61)));
    }

    #[test]
    fn marking_evicts_expired_entries() {
        let store = InMemoryDedupStore::new(Duration::from_secs(10));
        let start = Instant::now();
        store.mark_at("old-1", start);
        store.mark_at("old-2", start);
        assert_eq!(store.len(), 2);

        store.mark_at("fresh", start + Duration::from_secs(30));
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn concurrent_check_and_mark_admits_exactly_one() {
        let store = Arc::new(InMemoryDedupStore::default());
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let store = Arc::clone(&store);
                std::thread::spawn(move || store.check_and_mark("EvRace"))
            })
            .collect();

        let admitted = handles
            .into_iter()
            .map(|handle| handle.join().expect("thread joins"))
            .filter(|admitted| *admitted)
            .count();
        assert_eq!(admitted, 1);
    }
}
