use std::fmt;

use serde::{Serialize, Serializer};

use strainview_sources::{FileSlice, SampleRange, SampleRate, Site};

use crate::caching::FetchError;
use crate::types::{Segment, StrainRequest};

/// Why samples of a buffer are missing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum GapCause {
    /// The archive file was fetched, but has no samples here.
    Missing,
    /// The archive has no file for this time.
    NoData,
    /// The archive could not be reached.
    Unavailable(#[serde(serialize_with = "serialize_display")] FetchError),
}

impl fmt::Display for GapCause {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            GapCause::Missing => f.write_str("data gap in archive"),
            GapCause::NoData => f.write_str("no data available"),
            GapCause::Unavailable(err) => write!(f, "archive unavailable ({err})"),
        }
    }
}

fn serialize_display<S: Serializer, T: fmt::Display>(
    value: &T,
    serializer: S,
) -> Result<S::Ok, S::Error> {
    serializer.collect_str(value)
}

/// A run of missing samples in a [`StrainBuffer`], as offsets into its samples.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GapSpan {
    /// First missing sample.
    pub start: usize,
    /// One past the last missing sample.
    pub end: usize,
    pub cause: GapCause,
    /// Whether the gap was already known, so no fetch was attempted for it.
    pub known: bool,
}

impl GapSpan {
    pub fn len(&self) -> usize {
        self.end - self.start
    }

    pub fn is_empty(&self) -> bool {
        self.start >= self.end
    }
}

/// The samples covering a requested window.
///
/// Always exactly as long as the request; samples inside gaps are NaN.
#[derive(Debug, Clone, Serialize)]
pub struct StrainBuffer {
    site: Site,
    sample_rate: SampleRate,
    t_start: f64,
    #[serde(skip)]
    samples: Vec<f64>,
    gaps: Vec<GapSpan>,
}

impl StrainBuffer {
    pub fn site(&self) -> Site {
        self.site
    }

    pub fn sample_rate(&self) -> SampleRate {
        self.sample_rate
    }

    /// GPS time of the first sample.
    pub fn t_start(&self) -> f64 {
        self.t_start
    }

    pub fn samples(&self) -> &[f64] {
        &self.samples
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn gaps(&self) -> &[GapSpan] {
        &self.gaps
    }

    /// Whether every sample is present.
    pub fn is_complete(&self) -> bool {
        self.gaps.is_empty()
    }

    /// Whether no sample at all is present.
    pub(crate) fn is_unsatisfied(&self) -> bool {
        self.gaps.iter().map(GapSpan::len).sum::<usize>() >= self.samples.len()
    }

    /// GPS time of the sample at `index`.
    pub fn time_of(&self, index: usize) -> f64 {
        self.t_start + index as f64 / f64::from(self.sample_rate.hz())
    }

    /// Usable/unusable flags in 1/8 s steps, probing the middle of every step.
    pub fn availability_flags(&self) -> Vec<bool> {
        let step = (self.sample_rate.hz() / 8) as usize;
        (0..self.samples.len() / step)
            .map(|i| !self.samples[i * step + step / 2].is_nan())
            .collect()
    }

    /// Human readable descriptions of gaps that were known before this request.
    pub fn describe_known_gaps(&self) -> Vec<String> {
        self.gaps
            .iter()
            .filter(|gap| gap.known)
            .map(|gap| {
                format!(
                    "{:.3}..{:.3} is too close to or inside a data gap: {}",
                    self.time_of(gap.start),
                    self.time_of(gap.end),
                    gap.cause
                )
            })
            .collect()
    }
}

/// Assembles a [`StrainBuffer`] slice by slice, in time order.
pub(crate) struct BufferBuilder {
    site: Site,
    range: SampleRange,
    samples: Vec<f64>,
    gaps: Vec<GapSpan>,
}

impl BufferBuilder {
    pub fn new(request: &StrainRequest) -> Self {
        let range = request.sample_range();
        Self {
            site: request.site(),
            range,
            samples: Vec::with_capacity(range.len() as usize),
            gaps: Vec::new(),
        }
    }

    /// Copies the samples of `slice` out of `segment`.
    ///
    /// NaN samples and samples beyond a truncated file become [`GapCause::Missing`] gaps.
    pub fn push_segment(&mut self, slice: &FileSlice, segment: &Segment) {
        debug_assert_eq!(slice.offset as usize, self.samples.len());
        let buffer_start = self.samples.len();

        let data = segment.samples();
        let start = slice.span.start as usize;
        let end = slice.span.end as usize;
        let available = end.min(data.len());
        if start < available {
            self.samples.extend_from_slice(&data[start..available]);
        }
        let filled = self.samples.len();
        self.samples.resize(buffer_start + (end - start), f64::NAN);

        let mut run_start = None;
        for offset in buffer_start..filled {
            match (self.samples[offset].is_nan(), run_start) {
                (true, None) => run_start = Some(offset),
                (false, Some(run)) => {
                    self.add_gap(run, offset, GapCause::Missing, false);
                    run_start = None;
                }
                _ => {}
            }
        }
        let end = self.samples.len();
        if let Some(run) = run_start.or((filled < end).then_some(filled)) {
            self.add_gap(run, end, GapCause::Missing, false);
        }
    }

    /// Fills `slice` with NaN, recording why.
    pub fn push_gap(&mut self, slice: &FileSlice, cause: GapCause, known: bool) {
        debug_assert_eq!(slice.offset as usize, self.samples.len());
        let start = self.samples.len();
        let end = start + slice.span.len() as usize;
        self.samples.resize(end, f64::NAN);
        self.add_gap(start, end, cause, known);
    }

    fn add_gap(&mut self, start: usize, end: usize, cause: GapCause, known: bool) {
        if let Some(last) = self.gaps.last_mut() {
            if last.end == start && last.cause == cause && last.known == known {
                last.end = end;
                return;
            }
        }
        self.gaps.push(GapSpan {
            start,
            end,
            cause,
            known,
        });
    }

    pub fn finish(self) -> StrainBuffer {
        debug_assert_eq!(self.samples.len() as u64, self.range.len());
        StrainBuffer {
            site: self.site,
            sample_rate: self.range.sample_rate,
            t_start: self.range.t_start(),
            samples: self.samples,
            gaps: self.gaps,
        }
    }
}
