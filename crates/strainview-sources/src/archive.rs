//! Mapping of GPS time intervals onto archive files.
//!
//! All arithmetic happens on integer sample indices counted from GPS 0. A requested interval
//! is converted once into an absolute [`SampleRange`], which is then cut at file boundaries.
//! Since the range is half-open, an interval ending exactly on a file boundary never touches
//! the following file.

use serde::{Deserialize, Serialize};

use crate::types::{ArchiveFileIndex, SampleRate};

/// Upper bound on absolute sample indices.
///
/// Indices below 2^53 are exact in `f64`, and file arithmetic on them cannot overflow.
pub const MAX_SAMPLE_INDEX: u64 = 1 << 53;

/// A half-open range of sample offsets `[start, end)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SampleSpan {
    /// First sample in the span.
    pub start: u64,
    /// One past the last sample in the span.
    pub end: u64,
}

impl SampleSpan {
    /// Creates a new [`SampleSpan`].
    pub fn new(start: u64, end: u64) -> Self {
        debug_assert!(start <= end, "inverted sample span {start}..{end}");
        Self { start, end }
    }

    /// Number of samples in the span.
    pub fn len(&self) -> u64 {
        self.end - self.start
    }

    /// Whether the span contains no samples.
    pub fn is_empty(&self) -> bool {
        self.start >= self.end
    }

    /// Whether `other` lies entirely within this span.
    pub fn contains(&self, other: &SampleSpan) -> bool {
        self.start <= other.start && other.end <= self.end
    }

    /// Whether the two spans share at least one sample.
    pub fn intersects(&self, other: &SampleSpan) -> bool {
        self.start < other.end && other.start < self.end
    }
}

/// A contiguous run of samples at one rate, in absolute sample indices since GPS 0.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SampleRange {
    /// The rate the indices are counted in.
    pub sample_rate: SampleRate,
    /// Absolute sample indices.
    pub span: SampleSpan,
}

impl SampleRange {
    /// Converts an interval starting at `t_start` and lasting `duration` seconds.
    ///
    /// The first sample is the one at or before `t_start`. The sample count is the duration
    /// rounded to whole samples, so equal durations always yield equal counts. Returns `None`
    /// for non-finite input, times before GPS 0, intervals shorter than half a sample and
    /// intervals ending past [`MAX_SAMPLE_INDEX`].
    pub fn for_interval(sample_rate: SampleRate, t_start: f64, duration: f64) -> Option<Self> {
        if !t_start.is_finite() || !duration.is_finite() || t_start < 0.0 {
            return None;
        }

        let hz = f64::from(sample_rate.hz());
        let count = (duration * hz).round();
        if count < 1.0 {
            return None;
        }

        let start = (t_start * hz).floor();
        if start + count > MAX_SAMPLE_INDEX as f64 {
            return None;
        }

        let start = start as u64;
        let span = SampleSpan::new(start, start + count as u64);
        Some(Self { sample_rate, span })
    }

    /// Number of samples in the range.
    pub fn len(&self) -> u64 {
        self.span.len()
    }

    /// Whether the range contains no samples.
    pub fn is_empty(&self) -> bool {
        self.span.is_empty()
    }

    /// GPS time of the first sample.
    pub fn t_start(&self) -> f64 {
        self.span.start as f64 / f64::from(self.sample_rate.hz())
    }

    /// Cuts the range at archive file boundaries.
    ///
    /// Slices are returned in time order. Ranges of at most one file length yield one or two
    /// slices.
    pub fn file_slices(&self) -> Vec<FileSlice> {
        if self.is_empty() {
            return Vec::new();
        }

        let per_file = self.sample_rate.samples_per_file();
        let SampleSpan { start, end } = self.span;
        let first = start / per_file;
        let last = (end - 1) / per_file;

        (first..=last)
            .map(|index| {
                let file_start = index * per_file;
                let slice_start = start.max(file_start);
                let slice_end = end.min(file_start + per_file);
                FileSlice {
                    file: ArchiveFileIndex(index),
                    span: SampleSpan::new(slice_start - file_start, slice_end - file_start),
                    offset: slice_start - start,
                }
            })
            .collect()
    }
}

/// The part of a [`SampleRange`] served by one archive file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FileSlice {
    /// The archive file.
    pub file: ArchiveFileIndex,
    /// Sample offsets within the file.
    pub span: SampleSpan,
    /// Position of the slice's first sample within the requested range.
    pub offset: u64,
}

/// Determines which archive files cover `[t_start, t_end)` and which samples of each are needed.
///
/// Returns an empty list for intervals that cannot be represented, see
/// [`SampleRange::for_interval`].
pub fn files_for_interval(sample_rate: SampleRate, t_start: f64, t_end: f64) -> Vec<FileSlice> {
    SampleRange::for_interval(sample_rate, t_start, t_end - t_start)
        .map(|range| range.file_slices())
        .unwrap_or_default()
}
