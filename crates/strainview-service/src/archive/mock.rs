//! An in-memory archive for tests.

use std::collections::HashMap;
use std::ops::Range;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, OnceLock, PoisonError};
use std::time::Duration;

use futures::future::BoxFuture;

use strainview_sources::{CacheKey, SampleRate};

use super::ArchiveClient;
use crate::caching::FetchError;
use crate::types::Segment;
use crate::utils::defer::defer;

/// What the [`MockArchive`] answers for a key.
#[derive(Debug, Clone)]
pub enum MockResponse {
    /// A complete file of zeros.
    Full,
    /// The given samples.
    Samples(Arc<[f64]>),
    /// A failed fetch.
    Fail(FetchError),
    /// A fetch that never completes.
    Hang,
}

/// A complete file of zeros at the given rate, shared between all callers.
pub fn full_samples(sample_rate: SampleRate) -> Arc<[f64]> {
    static DECIMATED: OnceLock<Arc<[f64]>> = OnceLock::new();
    static FULL: OnceLock<Arc<[f64]>> = OnceLock::new();

    let cell = match sample_rate {
        SampleRate::Decimated => &DECIMATED,
        SampleRate::Full => &FULL,
    };
    let samples = cell.get_or_init(|| vec![0.0; sample_rate.samples_per_file() as usize].into());
    Arc::clone(samples)
}

/// A complete file of zeros with NaN in `missing`.
pub fn samples_with_gap(sample_rate: SampleRate, missing: Range<usize>) -> Arc<[f64]> {
    let mut samples = vec![0.0; sample_rate.samples_per_file() as usize];
    samples[missing].fill(f64::NAN);
    samples.into()
}

/// An archive answering from a table of scripted responses.
///
/// Counts every fetch, and how many fetches ran at the same time.
#[derive(Debug)]
pub struct MockArchive {
    latency: Duration,
    default: MockResponse,
    responses: Mutex<HashMap<CacheKey, MockResponse>>,
    calls: Mutex<Vec<CacheKey>>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl Default for MockArchive {
    fn default() -> Self {
        Self::new()
    }
}

impl MockArchive {
    /// An archive with complete files for every key.
    pub fn new() -> Self {
        Self {
            latency: Duration::ZERO,
            default: MockResponse::Full,
            responses: Default::default(),
            calls: Default::default(),
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
        }
    }

    /// Delays every response.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    /// Answers keys without a scripted response with `response`.
    pub fn with_default(mut self, response: MockResponse) -> Self {
        self.default = response;
        self
    }

    /// Scripts the response for `key`, replacing an earlier one.
    pub fn respond(&self, key: CacheKey, response: MockResponse) {
        self.responses
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(key, response);
    }

    /// All fetched keys, in order.
    pub fn fetched(&self) -> Vec<CacheKey> {
        self.calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// The number of fetches.
    pub fn calls(&self) -> usize {
        self.fetched().len()
    }

    /// The number of fetches of `key`.
    pub fn calls_for(&self, key: &CacheKey) -> usize {
        self.fetched().iter().filter(|k| *k == key).count()
    }

    /// The most fetches that were running at the same time.
    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    fn response_for(&self, key: &CacheKey) -> MockResponse {
        self.responses
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(key)
            .cloned()
            .unwrap_or_else(|| self.default.clone())
    }
}

impl ArchiveClient for MockArchive {
    fn name(&self) -> &'static str {
        "mock"
    }

    fn fetch<'a>(&'a self, key: &'a CacheKey) -> BoxFuture<'a, Result<Segment, FetchError>> {
        Box::pin(async move {
            self.calls
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .push(*key);
            let running = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_in_flight.fetch_max(running, Ordering::SeqCst);
            let _guard = defer(|| {
                self.in_flight.fetch_sub(1, Ordering::SeqCst);
            });

            let response = self.response_for(key);
            if !self.latency.is_zero() {
                tokio::time::sleep(self.latency).await;
            }

            match response {
                MockResponse::Full => Segment::new(*key, full_samples(key.sample_rate)),
                MockResponse::Samples(samples) => Segment::new(*key, samples),
                MockResponse::Fail(error) => Err(error),
                MockResponse::Hang => futures::future::pending().await,
            }
        })
    }
}
