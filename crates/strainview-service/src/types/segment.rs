use std::sync::Arc;

use serde::Serialize;

use strainview_sources::{CacheKey, SampleRate, SampleSpan};

use crate::caching::FetchError;

/// How much of an archive file holds usable samples.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Availability {
    /// Every sample of a full-length file is present.
    Full,
    /// Some samples are NaN, or the file is shorter than nominal.
    Partial,
    /// Not a single sample is present.
    Absent,
}

/// The decoded samples of one archive file.
///
/// NaN marks samples the archive has no data for. Cloning is cheap, the samples are shared.
#[derive(Debug, Clone)]
pub struct Segment {
    key: CacheKey,
    samples: Arc<[f64]>,
    availability: Availability,
}

impl Segment {
    /// Bookkeeping overhead charged to every segment on top of its samples.
    const OVERHEAD: u64 = (std::mem::size_of::<Segment>() + std::mem::size_of::<CacheKey>()) as u64;

    /// Wraps decoded samples, classifying their availability.
    ///
    /// Fails with [`FetchError::Malformed`] if there are more samples than a file can hold.
    pub fn new(key: CacheKey, samples: impl Into<Arc<[f64]>>) -> Result<Self, FetchError> {
        let samples = samples.into();
        let nominal = key.sample_rate.samples_per_file();
        if samples.len() as u64 > nominal {
            return Err(FetchError::Malformed(format!(
                "{} samples exceed the {nominal} samples of one file",
                samples.len()
            )));
        }

        let missing = samples.iter().filter(|s| s.is_nan()).count();
        let availability = if missing == samples.len() {
            Availability::Absent
        } else if missing == 0 && samples.len() as u64 == nominal {
            Availability::Full
        } else {
            Availability::Partial
        };

        Ok(Self {
            key,
            samples,
            availability,
        })
    }

    /// Memory charged for a complete file at the given rate.
    pub fn nominal_bytes(sample_rate: SampleRate) -> u64 {
        sample_rate.samples_per_file() * std::mem::size_of::<f64>() as u64 + Self::OVERHEAD
    }

    pub fn key(&self) -> &CacheKey {
        &self.key
    }

    pub fn samples(&self) -> &[f64] {
        &self.samples
    }

    pub fn availability(&self) -> Availability {
        self.availability
    }

    /// Memory charged against the cache budget.
    pub fn byte_size(&self) -> u64 {
        std::mem::size_of_val(&*self.samples) as u64 + Self::OVERHEAD
    }

    /// The runs of missing samples, including a truncated tail, in file offsets.
    pub fn missing_spans(&self) -> Vec<SampleSpan> {
        let mut spans = Vec::new();
        let mut run_start = None;
        for (offset, sample) in self.samples.iter().enumerate() {
            match (sample.is_nan(), run_start) {
                (true, None) => run_start = Some(offset as u64),
                (false, Some(start)) => {
                    spans.push(SampleSpan::new(start, offset as u64));
                    run_start = None;
                }
                _ => {}
            }
        }

        let len = self.samples.len() as u64;
        let nominal = self.key.sample_rate.samples_per_file();
        match run_start {
            Some(start) => spans.push(SampleSpan::new(start, nominal)),
            None if len < nominal => spans.push(SampleSpan::new(len, nominal)),
            None => {}
        }
        spans
    }
}
