use std::sync::Arc;
use std::time::{Duration, Instant};

use strainview_sources::{CacheKey, SampleSpan};

use crate::config::CacheConfigs;
use crate::types::{Availability, GapCause, Segment};

use super::FetchError;

/// What a fetch found out about an archive file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GapKind {
    /// The file as a whole could not be used.
    Absent(FetchError),
    /// The file exists, but parts of it are missing.
    Partial,
}

/// A remembered gap in the archive, valid until its deadline.
#[derive(Debug, Clone)]
pub struct GapMarker {
    pub kind: GapKind,
    /// The missing samples, in file offsets.
    pub spans: Vec<SampleSpan>,
    pub discovered: Instant,
    deadline: Instant,
}

impl GapMarker {
    /// Whether every sample in `needed` lies inside one of the missing spans.
    pub fn covers(&self, needed: &SampleSpan) -> bool {
        self.spans.iter().any(|span| span.contains(needed))
    }

    pub fn is_expired(&self) -> bool {
        self.deadline <= Instant::now()
    }

    /// How the samples covered by this marker show up in a buffer.
    pub fn cause(&self) -> GapCause {
        match &self.kind {
            GapKind::Absent(err) if err.is_transport() => GapCause::Unavailable(err.clone()),
            GapKind::Absent(_) => GapCause::NoData,
            GapKind::Partial => GapCause::Missing,
        }
    }
}

/// A struct implementing [`moka::Expiry`] that uses the [`GapMarker`] deadline as the
/// expiration time.
struct GapExpiration;

impl moka::Expiry<CacheKey, Arc<GapMarker>> for GapExpiration {
    fn expire_after_create(
        &self,
        _key: &CacheKey,
        value: &Arc<GapMarker>,
        current_time: Instant,
    ) -> Option<Duration> {
        Some(value.deadline.saturating_duration_since(current_time))
    }

    fn expire_after_update(
        &self,
        _key: &CacheKey,
        value: &Arc<GapMarker>,
        current_time: Instant,
        _current_duration: Option<Duration>,
    ) -> Option<Duration> {
        Some(value.deadline.saturating_duration_since(current_time))
    }
}

/// Remembers where the archive has no data, so those spans are not refetched.
///
/// Markers for files without data and for unreachable archives expire after different
/// durations. Every fetch outcome replaces the marker of its key; a complete file clears it.
#[derive(Clone)]
pub struct GapTracker {
    markers: moka::sync::Cache<CacheKey, Arc<GapMarker>>,
    retry_no_data_after: Duration,
    retry_transport_after: Duration,
}

impl std::fmt::Debug for GapTracker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GapTracker")
            .field("markers", &self.markers.entry_count())
            .field("retry_no_data_after", &self.retry_no_data_after)
            .field("retry_transport_after", &self.retry_transport_after)
            .finish()
    }
}

impl GapTracker {
    pub fn new(config: &CacheConfigs) -> Self {
        let markers = moka::sync::Cache::builder()
            .name("gaps")
            .max_capacity(100_000)
            .expire_after(GapExpiration)
            .build();

        Self {
            markers,
            retry_no_data_after: config.retry_no_data_after,
            retry_transport_after: config.retry_transport_after,
        }
    }

    fn insert(&self, key: CacheKey, kind: GapKind, spans: Vec<SampleSpan>, ttl: Duration) {
        let discovered = Instant::now();
        let marker = GapMarker {
            kind,
            spans,
            discovered,
            deadline: discovered + ttl,
        };
        tracing::debug!(%key, kind = ?marker.kind, ?ttl, "recording archive gap");
        self.markers.insert(key, Arc::new(marker));
    }

    /// Records a failed fetch. Internal errors are not recorded.
    pub fn record_failure(&self, key: CacheKey, error: &FetchError) {
        let ttl = match error {
            FetchError::InternalError => return,
            err if err.is_transport() => self.retry_transport_after,
            _ => self.retry_no_data_after,
        };
        let whole_file = SampleSpan::new(0, key.sample_rate.samples_per_file());
        self.insert(key, GapKind::Absent(error.clone()), vec![whole_file], ttl);
    }

    /// Records a successfully fetched file.
    ///
    /// Partially available files are remembered with their missing spans, absent ones as
    /// having no data. A complete file removes any earlier marker.
    pub fn record_segment(&self, segment: &Segment) {
        let key = *segment.key();
        match segment.availability() {
            Availability::Full => self.markers.invalidate(&key),
            Availability::Partial => self.insert(
                key,
                GapKind::Partial,
                segment.missing_spans(),
                self.retry_no_data_after,
            ),
            Availability::Absent => self.record_failure(key, &FetchError::NotFound),
        }
    }

    /// The live marker for `key`, if any.
    pub fn marker(&self, key: &CacheKey) -> Option<Arc<GapMarker>> {
        self.markers.get(key).filter(|marker| !marker.is_expired())
    }

    /// The live marker for `key`, if it covers all of `needed`.
    ///
    /// A marker that only partly covers the needed samples does not suppress a fetch.
    pub fn lookup(&self, key: &CacheKey, needed: &SampleSpan) -> Option<Arc<GapMarker>> {
        self.marker(key).filter(|marker| marker.covers(needed))
    }
}
