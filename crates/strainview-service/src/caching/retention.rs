//! Decides which segments to drop when the store exceeds its budget.
//!
//! Segments are ranked into three tiers by what the active views still need:
//!
//!  - Files overlapping an active view's widest window (`center ± 32 s`) are needed to zoom out
//!    without refetching, and are evicted last.
//!  - Files within an additional `shift_window` margin serve center shifts and are evicted after
//!    unrelated files.
//!  - Everything else is evicted first.
//!
//! Within a tier the least recently used segment goes first. The segment that was just
//! inserted is never evicted, even if it alone exceeds the budget.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use strainview_sources::{ArchiveFileIndex, CacheKey, IntervalLength, SampleRate, Site};

use crate::config::{CacheBudget, CacheConfigs};
use crate::types::StrainRequest;

/// The part of the archive a session is currently looking at.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ActiveView {
    pub site: Site,
    pub sample_rate: SampleRate,
    pub t_center: f64,
}

impl ActiveView {
    pub fn of(request: &StrainRequest) -> Self {
        Self {
            site: request.site(),
            sample_rate: request.sample_rate(),
            t_center: request.t_center(),
        }
    }

    /// Keys of all files overlapping `center ± half_width`.
    fn keys_within(&self, half_width: f64) -> impl Iterator<Item = CacheKey> + '_ {
        ArchiveFileIndex::overlapping(self.t_center - half_width, self.t_center + half_width)
            .map(|file| CacheKey::new(self.site, self.sample_rate, file))
    }
}

/// How strongly the active views want to keep a segment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Protection {
    /// Not needed by any active view.
    None,
    /// Needed to shift an active view's center.
    Neighbour,
    /// Needed to zoom an active view out to the widest window.
    ZoomOut,
}

impl Protection {
    pub fn as_str(self) -> &'static str {
        match self {
            Protection::None => "none",
            Protection::Neighbour => "neighbour",
            Protection::ZoomOut => "zoom_out",
        }
    }
}

/// Bookkeeping of one stored segment, as seen by the policy.
#[derive(Debug, Clone, Copy)]
pub struct EntryStats {
    pub key: CacheKey,
    pub bytes: u64,
    /// Logical time of the last access; larger is more recent.
    pub last_access: u64,
}

/// Enforces the [`CacheBudget`] while protecting what active views need.
#[derive(Debug, Clone)]
pub struct RetentionPolicy {
    budget: CacheBudget,
    /// Neighbour margin in seconds.
    shift_window: f64,
    warned_zoom_out: Arc<AtomicBool>,
    warned_oversized: Arc<AtomicBool>,
}

impl RetentionPolicy {
    pub fn new(config: &CacheConfigs) -> Self {
        Self {
            budget: config.budget,
            shift_window: config.shift_window.as_secs_f64(),
            warned_zoom_out: Default::default(),
            warned_oversized: Default::default(),
        }
    }

    pub fn is_over_budget(&self, entries: usize, bytes: u64) -> bool {
        entries > self.budget.max_entries || bytes > self.budget.max_bytes
    }

    /// Whether a zoom-out protected segment ever had to be evicted.
    pub fn zoom_out_compromised(&self) -> bool {
        self.warned_zoom_out.load(Ordering::Relaxed)
    }

    /// Ranks every key the active views care about.
    pub fn protection_map<'a>(
        &self,
        views: impl IntoIterator<Item = &'a ActiveView>,
    ) -> HashMap<CacheKey, Protection> {
        let zoom = IntervalLength::MAX.as_secs() / 2.0;
        let mut map = HashMap::new();
        for view in views {
            for key in view.keys_within(zoom + self.shift_window) {
                map.entry(key).or_insert(Protection::Neighbour);
            }
            for key in view.keys_within(zoom) {
                map.insert(key, Protection::ZoomOut);
            }
        }
        map
    }

    /// Picks the entries to evict so that the rest fits the budget.
    ///
    /// `newest` is never picked. The victims are returned in eviction order, together with the
    /// protection they had.
    pub fn select_victims<'a>(
        &self,
        entries: &[EntryStats],
        newest: &CacheKey,
        views: impl IntoIterator<Item = &'a ActiveView>,
    ) -> Vec<(CacheKey, Protection)> {
        let mut count = entries.len();
        let mut bytes: u64 = entries.iter().map(|e| e.bytes).sum();
        if !self.is_over_budget(count, bytes) {
            return Vec::new();
        }

        let protection = self.protection_map(views);
        let protection_of = |key: &CacheKey| {
            protection
                .get(key)
                .copied()
                .unwrap_or(Protection::None)
        };

        let mut candidates: Vec<_> = entries
            .iter()
            .filter(|entry| entry.key != *newest)
            .map(|entry| (protection_of(&entry.key), entry))
            .collect();
        candidates.sort_by_key(|(protection, entry)| (*protection, entry.last_access));

        let mut victims = Vec::new();
        for (protection, entry) in candidates {
            if !self.is_over_budget(count, bytes) {
                break;
            }
            if protection == Protection::ZoomOut
                && !self.warned_zoom_out.swap(true, Ordering::Relaxed)
            {
                tracing::warn!(
                    key = %entry.key,
                    max_entries = self.budget.max_entries,
                    max_bytes = self.budget.max_bytes,
                    "cache budget too small to keep every active view zoomable, evicting protected segment",
                );
            }
            count -= 1;
            bytes -= entry.bytes;
            victims.push((entry.key, protection));
        }

        if self.is_over_budget(count, bytes) && !self.warned_oversized.swap(true, Ordering::Relaxed)
        {
            tracing::error!(
                key = %newest,
                bytes,
                max_bytes = self.budget.max_bytes,
                "cache budget cannot hold a single segment, keeping it anyway",
            );
        }

        victims
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    const SEGMENT: u64 = 100;

    fn policy(max_entries: usize) -> RetentionPolicy {
        RetentionPolicy::new(&CacheConfigs {
            budget: CacheBudget {
                max_entries,
                max_bytes: u64::MAX,
            },
            shift_window: Duration::from_millis(46_700),
            ..Default::default()
        })
    }

    fn key(file: u64) -> CacheKey {
        CacheKey::new(Site::H1, SampleRate::Decimated, ArchiveFileIndex(file))
    }

    fn stats(file: u64, last_access: u64) -> EntryStats {
        EntryStats {
            key: key(file),
            bytes: SEGMENT,
            last_access,
        }
    }

    fn view_at(t_center: f64) -> ActiveView {
        ActiveView {
            site: Site::H1,
            sample_rate: SampleRate::Decimated,
            t_center,
        }
    }

    #[test]
    fn test_within_budget() {
        let policy = policy(3);
        let entries = [stats(1, 1), stats(2, 2), stats(3, 3)];
        assert!(policy.select_victims(&entries, &key(3), []).is_empty());
    }

    #[test]
    fn test_lru_without_views() {
        let policy = policy(2);
        let entries = [stats(1, 5), stats(2, 1), stats(3, 9)];
        let victims = policy.select_victims(&entries, &key(3), []);
        assert_eq!(victims, [(key(2), Protection::None)]);
    }

    #[test]
    fn test_newest_is_kept() {
        let policy = policy(1);
        // The newest entry has the oldest access time but must survive.
        let entries = [stats(1, 5), stats(2, 0)];
        let victims = policy.select_victims(&entries, &key(2), []);
        assert_eq!(victims, [(key(1), Protection::None)]);
    }

    #[test]
    fn test_zoom_out_protected() {
        let policy = policy(2);
        // A view 10 s into file 5 needs files 4 and 5 for its widest window.
        let view = view_at(5.0 * 4096.0 + 10.0);
        let entries = [stats(4, 1), stats(5, 2), stats(9, 3), stats(10, 4)];

        let victims = policy.select_victims(&entries, &key(10), [&view]);
        assert_eq!(
            victims,
            [(key(9), Protection::None), (key(4), Protection::ZoomOut)]
        );
        assert!(policy.zoom_out_compromised());
    }

    #[test]
    fn test_neighbours_outlive_unrelated() {
        let policy = policy(2);
        // 40 s after the start of file 5: the zoom window stays inside file 5,
        // the shift margin reaches back into file 4.
        let view = view_at(5.0 * 4096.0 + 40.0);
        let map = policy.protection_map([&view]);
        assert_eq!(map.get(&key(5)), Some(&Protection::ZoomOut));
        assert_eq!(map.get(&key(4)), Some(&Protection::Neighbour));
        assert_eq!(map.get(&key(6)), None);

        let entries = [stats(4, 1), stats(5, 2), stats(7, 3), stats(8, 4)];
        let victims = policy.select_victims(&entries, &key(8), [&view]);
        assert_eq!(
            victims,
            [(key(7), Protection::None), (key(4), Protection::Neighbour)]
        );
        assert!(!policy.zoom_out_compromised());
    }

    #[test]
    fn test_other_rate_is_not_protected() {
        let policy = policy(1);
        let view = view_at(5.0 * 4096.0 + 10.0);
        let full_rate = CacheKey::new(Site::H1, SampleRate::Full, ArchiveFileIndex(5));
        let entries = [
            EntryStats {
                key: full_rate,
                bytes: SEGMENT,
                last_access: 9,
            },
            stats(5, 1),
        ];
        let victims = policy.select_victims(&entries, &key(5), [&view]);
        assert_eq!(victims, [(full_rate, Protection::None)]);
    }

    #[test]
    fn test_byte_ceiling() {
        let policy = RetentionPolicy::new(&CacheConfigs {
            budget: CacheBudget {
                max_entries: 10,
                max_bytes: 2 * SEGMENT,
            },
            ..Default::default()
        });
        let entries = [stats(1, 1), stats(2, 2), stats(3, 3)];
        let victims = policy.select_victims(&entries, &key(3), []);
        assert_eq!(victims, [(key(1), Protection::None)]);

        // A single entry above the ceiling survives.
        let big = EntryStats {
            key: key(4),
            bytes: 5 * SEGMENT,
            last_access: 4,
        };
        assert!(policy.select_victims(&[big], &key(4), []).is_empty());
    }
}
