use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use strainview_sources::CacheKey;

use crate::types::{Segment, SessionId};

use super::retention::{ActiveView, EntryStats, RetentionPolicy};

/// Identifies one insertion of a segment.
///
/// Epochs grow monotonically, so a reader can tell whether the entry it looked at has been
/// evicted or replaced in the meantime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Epoch(u64);

#[derive(Debug)]
struct StoredSegment {
    segment: Arc<Segment>,
    bytes: u64,
    last_access: u64,
    epoch: Epoch,
}

#[derive(Debug, Default)]
struct StoreInner {
    entries: HashMap<CacheKey, StoredSegment>,
    views: HashMap<SessionId, ActiveView>,
    total_bytes: u64,
    /// Logical clock for access recency.
    clock: u64,
    next_epoch: u64,
}

impl StoreInner {
    fn tick(&mut self) -> u64 {
        self.clock += 1;
        self.clock
    }

    fn remove(&mut self, key: &CacheKey) -> Option<StoredSegment> {
        let stored = self.entries.remove(key)?;
        self.total_bytes -= stored.bytes;
        Some(stored)
    }
}

/// The in-memory map of cached segments.
///
/// Every insertion enforces the [`CacheBudget`](crate::config::CacheBudget) through the
/// [`RetentionPolicy`]. Segments are handed out as `Arc`s, so an eviction never invalidates
/// samples a reader is still copying.
#[derive(Clone)]
pub struct SegmentStore {
    inner: Arc<Mutex<StoreInner>>,
    policy: RetentionPolicy,
}

impl fmt::Debug for SegmentStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = self.lock();
        f.debug_struct("SegmentStore")
            .field("entries", &inner.entries.len())
            .field("total_bytes", &inner.total_bytes)
            .field("views", &inner.views.len())
            .field("policy", &self.policy)
            .finish()
    }
}

impl SegmentStore {
    pub fn new(policy: RetentionPolicy) -> Self {
        Self {
            inner: Default::default(),
            policy,
        }
    }

    fn lock(&self) -> MutexGuard<'_, StoreInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Looks up a segment, marking it as most recently used.
    pub fn get(&self, key: &CacheKey) -> Option<Arc<Segment>> {
        let mut inner = self.lock();
        let now = inner.tick();
        let stored = inner.entries.get_mut(key)?;
        stored.last_access = now;
        Some(Arc::clone(&stored.segment))
    }

    /// The epoch of the current entry for `key`, if any.
    pub fn epoch(&self, key: &CacheKey) -> Option<Epoch> {
        self.lock().entries.get(key).map(|stored| stored.epoch)
    }

    pub fn contains(&self, key: &CacheKey) -> bool {
        self.lock().entries.contains_key(key)
    }

    /// Inserts a segment under its key, replacing any previous entry.
    ///
    /// Evicts other entries until the budget holds again. The inserted segment itself is
    /// never evicted by its own insertion.
    pub fn put(&self, segment: Arc<Segment>) -> Epoch {
        let key = *segment.key();
        let bytes = segment.byte_size();

        let mut inner = self.lock();
        inner.remove(&key);

        let epoch = Epoch(inner.next_epoch);
        inner.next_epoch += 1;
        let last_access = inner.tick();
        inner.entries.insert(
            key,
            StoredSegment {
                segment,
                bytes,
                last_access,
                epoch,
            },
        );
        inner.total_bytes += bytes;

        let stats: Vec<_> = inner
            .entries
            .iter()
            .map(|(key, stored)| EntryStats {
                key: *key,
                bytes: stored.bytes,
                last_access: stored.last_access,
            })
            .collect();
        let victims = self.policy.select_victims(&stats, &key, inner.views.values());
        for (victim, protection) in victims {
            if let Some(stored) = inner.remove(&victim) {
                tracing::debug!(key = %victim, bytes = stored.bytes, "evicting segment");
                metric!(counter("caches.eviction") += 1, "protection" => protection.as_str());
            }
        }

        tracing::trace!(key = %key, ?epoch, "stored segment");
        metric!(gauge("caches.memory.bytes") = inner.total_bytes);
        metric!(gauge("caches.memory.entries") = inner.entries.len() as u64);

        epoch
    }

    /// Removes the entry for `key` and frees its bytes. Other entries are untouched.
    pub fn evict(&self, key: &CacheKey) -> bool {
        let mut inner = self.lock();
        let evicted = inner.remove(key).is_some();
        if evicted {
            metric!(gauge("caches.memory.bytes") = inner.total_bytes);
            metric!(gauge("caches.memory.entries") = inner.entries.len() as u64);
        }
        evicted
    }

    /// Records what a session currently looks at, replacing its previous view.
    pub fn set_view(&self, session: SessionId, view: ActiveView) {
        self.lock().views.insert(session, view);
    }

    /// Forgets a session's view, so its files lose their protection.
    pub fn release_view(&self, session: SessionId) {
        self.lock().views.remove(&session);
    }

    pub fn active_views(&self) -> Vec<ActiveView> {
        self.lock().views.values().copied().collect()
    }

    pub fn len(&self) -> usize {
        self.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().entries.is_empty()
    }

    pub fn total_bytes(&self) -> u64 {
        self.lock().total_bytes
    }

    /// All cached keys, in no particular order.
    pub fn keys(&self) -> Vec<CacheKey> {
        self.lock().entries.keys().copied().collect()
    }
}

#[cfg(test)]
mod tests {
    use strainview_sources::{ArchiveFileIndex, SampleRate, Site};

    use super::*;
    use crate::config::{CacheBudget, CacheConfigs};

    fn store(max_entries: usize) -> SegmentStore {
        SegmentStore::new(RetentionPolicy::new(&CacheConfigs {
            budget: CacheBudget {
                max_entries,
                max_bytes: u64::MAX,
            },
            ..Default::default()
        }))
    }

    fn key(file: u64) -> CacheKey {
        CacheKey::new(Site::L1, SampleRate::Decimated, ArchiveFileIndex(file))
    }

    fn segment(file: u64) -> Arc<Segment> {
        Arc::new(Segment::new(key(file), vec![file as f64; 16]).unwrap())
    }

    #[test]
    fn test_put_get() {
        let store = store(4);
        assert!(store.get(&key(1)).is_none());

        let first = store.put(segment(1));
        assert_eq!(store.get(&key(1)).unwrap().samples()[0], 1.0);
        assert_eq!(store.epoch(&key(1)), Some(first));
        assert_eq!(store.total_bytes(), segment(1).byte_size());

        // Replacing an entry yields a newer epoch and does not double count.
        let second = store.put(segment(1));
        assert!(second > first);
        assert_eq!(store.len(), 1);
        assert_eq!(store.total_bytes(), segment(1).byte_size());
    }

    #[test]
    fn test_lru_eviction() {
        let store = store(2);
        store.put(segment(1));
        store.put(segment(2));
        // Touch 1, so 2 becomes least recently used.
        store.get(&key(1));
        store.put(segment(3));

        let mut keys = store.keys();
        keys.sort();
        assert_eq!(keys, [key(1), key(3)]);
        assert_eq!(store.total_bytes(), 2 * segment(1).byte_size());
    }

    #[test]
    fn test_evict() {
        let store = store(4);
        store.put(segment(1));
        store.put(segment(2));
        let held = store.get(&key(1)).unwrap();

        assert!(store.evict(&key(1)));
        assert!(!store.evict(&key(1)));
        assert!(store.contains(&key(2)));
        assert_eq!(store.total_bytes(), segment(2).byte_size());
        // Readers holding the segment keep their samples.
        assert_eq!(held.samples().len(), 16);
    }

    #[test]
    fn test_views_protect() {
        let store = store(2);
        let session = SessionId::new();
        store.set_view(
            session,
            ActiveView {
                site: Site::L1,
                sample_rate: SampleRate::Decimated,
                t_center: 4096.0 + 100.0,
            },
        );

        store.put(segment(1));
        store.put(segment(7));
        store.get(&key(7));
        store.put(segment(8));
        let mut keys = store.keys();
        keys.sort();
        assert_eq!(keys, [key(1), key(8)]);

        store.release_view(session);
        assert!(store.active_views().is_empty());
        store.put(segment(9));
        let mut keys = store.keys();
        keys.sort();
        assert_eq!(keys, [key(8), key(9)]);
    }
}
