//! Types for the strain request API.
//!
//! [`StrainRequest`] is what a session asks for, [`Segment`] is what the archive delivers and
//! the store keeps, and [`StrainBuffer`] is what a request resolves to.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use strainview_sources::{
    ArchiveFileIndex, CacheKey, IntervalLength, SampleRange, SampleRate, Site,
};

mod buffer;
mod segment;

pub use buffer::{GapCause, GapSpan, StrainBuffer};
pub(crate) use buffer::BufferBuilder;
pub use segment::{Availability, Segment};

/// A request that can never reach the cache layer.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum InvalidRequest {
    /// The center time is NaN or infinite.
    #[error("center time {0} is not a finite GPS time")]
    NonFiniteCenter(f64),
    /// The interval length is outside the supported range.
    #[error("interval of {0}s is outside of {min}..={max}", min = IntervalLength::MIN, max = IntervalLength::MAX)]
    IntervalOutOfBounds(f64),
    /// The interval would start before GPS 0.
    #[error("interval starts at GPS {0}, before the GPS epoch")]
    BeforeGpsEpoch(f64),
    /// The interval ends past the last sample that can be indexed.
    #[error("center time {0} is beyond the supported GPS range")]
    BeyondGpsRange(f64),
}

/// A validated request for a window of strain samples.
///
/// The window is `[t_center - interval/2, t_center + interval/2)`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct StrainRequest {
    site: Site,
    sample_rate: SampleRate,
    t_center: f64,
    interval: IntervalLength,
    #[serde(skip)]
    range: SampleRange,
}

impl StrainRequest {
    /// Validates the parameters of a request.
    ///
    /// Out-of-range intervals are rejected rather than clamped, use
    /// [`IntervalLength::nearest_step`] to quantize user input first.
    pub fn new(
        site: Site,
        sample_rate: SampleRate,
        t_center: f64,
        interval: f64,
    ) -> Result<Self, InvalidRequest> {
        if !t_center.is_finite() {
            return Err(InvalidRequest::NonFiniteCenter(t_center));
        }
        let length =
            IntervalLength::new(interval).ok_or(InvalidRequest::IntervalOutOfBounds(interval))?;

        let t_start = t_center - length.as_secs() / 2.0;
        if t_start < 0.0 {
            return Err(InvalidRequest::BeforeGpsEpoch(t_start));
        }
        let range = SampleRange::for_interval(sample_rate, t_start, length.as_secs())
            .ok_or(InvalidRequest::BeyondGpsRange(t_center))?;

        Ok(Self {
            site,
            sample_rate,
            t_center,
            interval: length,
            range,
        })
    }

    /// The same window recentered on `t_center`.
    pub fn with_center(&self, t_center: f64) -> Result<Self, InvalidRequest> {
        Self::new(self.site, self.sample_rate, t_center, self.interval.as_secs())
    }

    /// The same center with a different window length.
    pub fn with_interval(&self, interval: f64) -> Result<Self, InvalidRequest> {
        Self::new(self.site, self.sample_rate, self.t_center, interval)
    }

    pub fn site(&self) -> Site {
        self.site
    }

    pub fn sample_rate(&self) -> SampleRate {
        self.sample_rate
    }

    pub fn t_center(&self) -> f64 {
        self.t_center
    }

    pub fn interval(&self) -> IntervalLength {
        self.interval
    }

    /// Start of the requested window.
    pub fn t_start(&self) -> f64 {
        self.t_center - self.interval.as_secs() / 2.0
    }

    /// End of the requested window, exclusive.
    pub fn t_end(&self) -> f64 {
        self.t_center + self.interval.as_secs() / 2.0
    }

    /// The requested samples.
    pub fn sample_range(&self) -> SampleRange {
        self.range
    }

    /// The cache key of one of the files backing this request.
    pub fn cache_key(&self, file: ArchiveFileIndex) -> CacheKey {
        CacheKey::new(self.site, self.sample_rate, file)
    }
}

impl fmt::Display for StrainRequest {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "{} @ {} Hz, {} ± {}",
            self.site,
            self.sample_rate,
            self.t_center,
            self.interval.as_secs() / 2.0
        )
    }
}

/// Identifies one user session and the view it keeps alive in the cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(Uuid);

impl SessionId {
    /// Generates a new random session id.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl FromStr for SessionId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.parse().map(Self)
    }
}
