//! Turns strain requests into buffers, fetching what the cache cannot serve.
//!
//! For every archive file a request touches, the [`FetchCoordinator`] either serves the cached
//! segment, reports a known gap, or waits for a fetch. Fetches are deduplicated: concurrent
//! requests for the same file wait on one shared channel, and the fetch runs in its own task so
//! that its result is committed even if every waiting request goes away.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use futures::channel::oneshot;
use futures::future::{self, BoxFuture, Shared};
use futures::{FutureExt, TryFutureExt};
use sentry::{Hub, SentryFutureExt};
use serde::Serialize;
use thiserror::Error;
use tokio::sync::mpsc;

use strainview_sources::{CacheKey, SampleSpan};

use crate::archive::ArchiveService;
use crate::caching::{ActiveView, FetchError, GapTracker, RetentionPolicy, SegmentStore};
use crate::config::{CacheConfigs, ConfigurationError};
use crate::types::{
    Availability, BufferBuilder, GapCause, Segment, SessionId, StrainBuffer, StrainRequest,
};
use crate::utils::defer::defer;

/// A status update for the user while a request waits on the archive.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum ProgressEvent {
    /// The request has to wait for this many archive files.
    FetchStarted { files: usize },
    /// All files the request waited for arrived.
    FetchComplete,
    /// One of the files could not be fetched.
    FetchFailed { reason: String },
}

impl fmt::Display for ProgressEvent {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Self::FetchStarted { files: 1 } => f.write_str("fetch started (1 file)"),
            Self::FetchStarted { files } => write!(f, "fetch started ({files} files)"),
            Self::FetchComplete => f.write_str("fetch complete"),
            Self::FetchFailed { reason } => write!(f, "fetch failed: {reason}"),
        }
    }
}

/// Where [`ProgressEvent`]s are sent.
pub type ProgressSender = mpsc::UnboundedSender<ProgressEvent>;

/// The whole requested interval is unsatisfiable.
///
/// Intervals with at least one usable sample resolve to a [`StrainBuffer`] with gaps instead.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ResolveError {
    /// The archive has no data for any part of the interval.
    #[error("no data available for the requested interval")]
    NoDataAvailable,
    /// The archive could not be reached.
    #[error("strain archive unavailable")]
    Unavailable(#[source] FetchError),
}

type FetchResult = Result<Arc<Segment>, FetchError>;

/// A fetch in progress. Every clone resolves to the same outcome.
type PendingFetch = Shared<oneshot::Receiver<FetchResult>>;

/// How one file of a request is served.
enum Plan {
    Cached(Arc<Segment>),
    KnownGap(GapCause),
    Fetch(BoxFuture<'static, FetchResult>),
}

/// How a failed fetch shows up in a buffer.
fn failure_cause(error: &FetchError) -> GapCause {
    match error {
        FetchError::NotFound | FetchError::Malformed(_) => GapCause::NoData,
        err => GapCause::Unavailable(err.clone()),
    }
}

fn send_progress(progress: Option<&ProgressSender>, event: ProgressEvent) {
    if let Some(sender) = progress {
        // The receiver is gone if the caller stopped listening.
        sender.send(event).ok();
    }
}

/// Resolves [`StrainRequest`]s against the segment cache and the archive.
///
/// Cloning is cheap and yields a handle to the same cache.
#[derive(Clone)]
pub struct FetchCoordinator {
    archive: ArchiveService,
    store: SegmentStore,
    gaps: GapTracker,
    pending: Arc<Mutex<HashMap<CacheKey, PendingFetch>>>,
}

impl fmt::Debug for FetchCoordinator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FetchCoordinator")
            .field("archive", &self.archive)
            .field("store", &self.store)
            .field("gaps", &self.gaps)
            .field("pending", &self.lock_pending().len())
            .finish()
    }
}

impl FetchCoordinator {
    /// Creates a coordinator with an empty cache.
    ///
    /// Fails if the cache budget cannot hold a single segment. A budget too small for the widest
    /// window at the full rate is accepted with a warning.
    pub fn new(archive: ArchiveService, config: &CacheConfigs) -> Result<Self, ConfigurationError> {
        let budget = config.budget;
        budget.validate()?;
        if !budget.fits_zoom_out() {
            tracing::warn!(
                max_entries = budget.max_entries,
                max_bytes = budget.max_bytes,
                "cache budget too small to guarantee zooming out at the full sample rate",
            );
        }

        Ok(Self {
            archive,
            store: SegmentStore::new(RetentionPolicy::new(config)),
            gaps: GapTracker::new(config),
            pending: Default::default(),
        })
    }

    pub fn store(&self) -> &SegmentStore {
        &self.store
    }

    pub fn gaps(&self) -> &GapTracker {
        &self.gaps
    }

    fn lock_pending(&self) -> MutexGuard<'_, HashMap<CacheKey, PendingFetch>> {
        self.pending.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Stops protecting the view of `session`.
    pub fn release(&self, session: SessionId) {
        self.store.release_view(session);
    }

    /// Resolves a request into a buffer of samples.
    ///
    /// The request becomes the active view of `session`, which the retention policy protects
    /// until the session moves on or is released. Progress is reported to `progress` only if the
    /// request has to wait for the archive.
    pub async fn resolve(
        &self,
        session: SessionId,
        request: &StrainRequest,
        progress: Option<&ProgressSender>,
    ) -> Result<StrainBuffer, ResolveError> {
        self.store.set_view(session, ActiveView::of(request));

        let slices = request.sample_range().file_slices();
        metric!(histogram("resolve.files") = slices.len() as u64);

        let mut plans = Vec::with_capacity(slices.len());
        for slice in &slices {
            plans.push(self.plan(request.cache_key(slice.file), &slice.span));
        }

        let fetches: Vec<_> = plans
            .iter_mut()
            .filter_map(|plan| match plan {
                Plan::Fetch(fetch) => Some(fetch),
                _ => None,
            })
            .collect();
        let waiting = fetches.len();
        if waiting > 0 {
            tracing::debug!(%request, files = waiting, "waiting for archive");
            send_progress(progress, ProgressEvent::FetchStarted { files: waiting });
        }
        let mut outcomes = future::join_all(fetches).await.into_iter();

        let mut builder = BufferBuilder::new(request);
        let mut failed = false;
        for (slice, plan) in slices.iter().zip(&plans) {
            match plan {
                Plan::Cached(segment) => builder.push_segment(slice, segment),
                Plan::KnownGap(cause) => builder.push_gap(slice, cause.clone(), true),
                Plan::Fetch(_) => {
                    let outcome = outcomes.next().unwrap_or(Err(FetchError::InternalError));
                    match outcome {
                        Ok(segment) => builder.push_segment(slice, &segment),
                        Err(err) => {
                            failed = true;
                            let reason = err.to_string();
                            send_progress(progress, ProgressEvent::FetchFailed { reason });
                            builder.push_gap(slice, failure_cause(&err), false);
                        }
                    }
                }
            }
        }
        if waiting > 0 && !failed {
            send_progress(progress, ProgressEvent::FetchComplete);
        }

        let buffer = builder.finish();
        if !buffer.is_unsatisfied() {
            return Ok(buffer);
        }

        let unavailable = buffer.gaps().iter().find_map(|gap| match &gap.cause {
            GapCause::Unavailable(err) => Some(err.clone()),
            _ => None,
        });
        match unavailable {
            Some(err) => Err(ResolveError::Unavailable(err)),
            None => Err(ResolveError::NoDataAvailable),
        }
    }

    /// Decides how the `needed` samples of the file at `key` are served.
    fn plan(&self, key: CacheKey, needed: &SampleSpan) -> Plan {
        metric!(counter("caches.access") += 1);

        if let Some(plan) = self.lookup(&key, needed) {
            return plan;
        }
        metric!(counter("caches.memory.miss") += 1);

        let (channel, fetch) = {
            let mut pending = self.lock_pending();
            if let Some(channel) = pending.get(&key) {
                // A concurrent request for the same file was deduplicated.
                metric!(counter("fetch.channel.hit") += 1);
                (channel.clone(), None)
            } else {
                // The fetch may have been committed between the lookup above and taking the lock.
                if let Some(plan) = self.lookup(&key, needed) {
                    return plan;
                }
                metric!(counter("fetch.channel.miss") += 1);

                let (channel, fetch) = self.create_channel(key);
                pending.insert(key, channel.clone());
                (channel, Some(fetch))
            }
        };

        // Spawned outside of the lock, since dropping the fetch unregisters it.
        if let Some(fetch) = fetch {
            tokio::spawn(fetch);
        }

        let future = channel.unwrap_or_else(move |_cancelled| {
            tracing::error!(%key, "archive fetch channel dropped");
            Err(FetchError::InternalError)
        });
        Plan::Fetch(Box::pin(future))
    }

    /// Serves `key` from the store or the gap tracker.
    fn lookup(&self, key: &CacheKey, needed: &SampleSpan) -> Option<Plan> {
        if let Some(segment) = self.store.get(key) {
            metric!(counter("caches.memory.hit") += 1);
            return Some(Plan::Cached(segment));
        }

        let marker = self.gaps.lookup(key, needed)?;
        metric!(counter("caches.gap.hit") += 1);
        tracing::trace!(
            %key,
            kind = ?marker.kind,
            age = ?marker.discovered.elapsed(),
            "serving known gap"
        );
        Some(Plan::KnownGap(marker.cause()))
    }

    /// Creates the channel for a new fetch of `key`, and the fetch that resolves it.
    ///
    /// The fetch commits its outcome, unregisters itself, and only then sends the outcome. Any
    /// request that does not find the channel finds the committed outcome instead.
    fn create_channel(&self, key: CacheKey) -> (PendingFetch, BoxFuture<'static, ()>) {
        let (sender, receiver) = oneshot::channel();

        let pending = Arc::clone(&self.pending);
        let remove_pending = defer(move || {
            pending
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .remove(&key);
        });

        let coordinator = self.clone();
        let fetch = async move {
            let result = coordinator.archive.fetch(&key).await;
            let result = coordinator.commit(key, result);
            // Drop the token first to unregister the channel. Later requests then find the
            // committed outcome in the store or the gap tracker.
            drop(remove_pending);
            sender.send(result).ok();
        }
        .bind_hub(Hub::new_from_top(Hub::current()));

        (receiver.shared(), Box::pin(fetch))
    }

    /// Records the outcome of a fetch in the store or the gap tracker.
    fn commit(&self, key: CacheKey, result: Result<Segment, FetchError>) -> FetchResult {
        match result {
            Ok(segment) => {
                self.gaps.record_segment(&segment);
                if segment.availability() == Availability::Absent {
                    return Err(FetchError::NotFound);
                }

                let segment = Arc::new(segment);
                let epoch = self.store.put(Arc::clone(&segment));
                tracing::trace!(%key, ?epoch, "committed segment");
                Ok(segment)
            }
            Err(err) => {
                self.gaps.record_failure(key, &err);
                Err(err)
            }
        }
    }
}
