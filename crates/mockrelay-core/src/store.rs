//! `MockStore`: the per-session partitioned set of recorded mocks consulted
//! by the replay matcher.

use crate::mock::Mock;
use parking_lot::Mutex;

#[derive(Default)]
struct Inner {
    filtered: Vec<Mock>,
    unfiltered: Vec<Mock>,
    next_sort_order: u64,
}

/// A mutable partitioned set of mocks: fresh candidates live in `filtered`;
/// mocks that have been served (or lost priority) live in `unfiltered`.
///
/// Invariants: a mock appears in at most one bucket; `flag_used` only ever
/// progresses a mock from unused to used, never back.
pub struct MockStore {
    inner: Mutex<Inner>,
}

impl Default for MockStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MockStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner::default()),
        }
    }

    /// Insert a freshly recorded mock into the filtered bucket.
    pub fn insert_filtered(&self, mut mock: Mock) {
        let mut inner = self.inner.lock();
        mock.sort_order = inner.next_sort_order;
        inner.next_sort_order += 1;
        inner.filtered.push(mock);
    }

    /// Snapshot of the filtered bucket, ordered by insertion.
    pub fn filtered(&self) -> Vec<Mock> {
        self.inner.lock().filtered.clone()
    }

    /// Snapshot of the unfiltered bucket, ordered by insertion.
    pub fn unfiltered(&self) -> Vec<Mock> {
        self.inner.lock().unfiltered.clone()
    }

    /// CAS-like move of the mock identified by `old_id` from `filtered` to
    /// `unfiltered`. Returns the moved mock (with `sort_order` pushed to
    /// `u64::MAX`, per the matcher's priority rules) if `old_id` was still
    /// present in `filtered`; returns `None` if another caller already won
    /// the race, so callers should retry their match from the top.
    pub fn update_unfiltered(&self, old_id: &str) -> Option<Mock> {
        let mut inner = self.inner.lock();
        let pos = inner.filtered.iter().position(|m| m.id == old_id)?;
        let mut mock = inner.filtered.remove(pos);
        mock.sort_order = u64::MAX;
        inner.unfiltered.push(mock.clone());
        Some(mock)
    }

    /// Mark a mock used, wherever it currently lives. Idempotent.
    pub fn flag_used(&self, id: &str) {
        let mut inner = self.inner.lock();
        for mock in inner.filtered.iter_mut().chain(inner.unfiltered.iter_mut()) {
            if mock.id == id {
                mock.used = true;
            }
        }
    }

    /// Remove a mock from the filtered bucket.
    pub fn delete_filtered(&self, id: &str) {
        self.inner.lock().filtered.retain(|m| m.id != id);
    }

    /// Remove a mock from the unfiltered bucket.
    pub fn delete_unfiltered(&self, id: &str) {
        self.inner.lock().unfiltered.retain(|m| m.id != id);
    }

    /// Total number of mocks across both buckets.
    pub fn len(&self) -> usize {
        let inner = self.inner.lock();
        inner.filtered.len() + inner.unfiltered.len()
    }

    /// Whether the store holds no mocks.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::{Chunk, Kind, Spec};
    use chrono::Utc;
    use std::collections::HashMap;

    fn make_mock() -> Mock {
        let now = Utc::now();
        Mock::new(
            Kind::Http,
            Spec {
                requests: vec![Chunk::from_bytes(b"GET /")],
                responses: vec![Chunk::from_bytes(b"200 OK")],
                req_ts: now,
                res_ts: now,
                metadata: HashMap::new(),
            },
            "conn-1",
            "sess-1",
            false,
        )
        .unwrap()
    }

    #[test]
    fn move_is_one_shot() {
        let store = MockStore::new();
        let mock = make_mock();
        let id = mock.id.clone();
        store.insert_filtered(mock);

        assert!(store.update_unfiltered(&id).is_some());
        assert_eq!(store.filtered().len(), 0);
        assert_eq!(store.unfiltered().len(), 1);
        assert_eq!(store.unfiltered()[0].sort_order, u64::MAX);

        // Second attempt loses the race: the mock is no longer in filtered.
        assert!(store.update_unfiltered(&id).is_none());
    }

    #[test]
    fn flag_used_is_idempotent() {
        let store = MockStore::new();
        let mock = make_mock();
        let id = mock.id.clone();
        store.insert_filtered(mock);

        store.flag_used(&id);
        store.flag_used(&id);
        assert!(store.filtered()[0].used);
    }

    #[test]
    fn buckets_are_disjoint() {
        let store = MockStore::new();
        let mock = make_mock();
        let id = mock.id.clone();
        store.insert_filtered(mock);
        store.update_unfiltered(&id);

        let in_filtered = store.filtered().iter().any(|m| m.id == id);
        let in_unfiltered = store.unfiltered().iter().any(|m| m.id == id);
        assert!(!in_filtered);
        assert!(in_unfiltered);
    }
}
