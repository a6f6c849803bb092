//! Clients fetching whole files from the strain archive.
//!
//! An [`ArchiveClient`] fetches and decodes exactly one file per call. The [`ArchiveService`]
//! wraps a client with retries and the overall fetch timeout, and reports fetch metrics.

use std::error::Error;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::future::BoxFuture;

use strainview_sources::{ArchiveSourceConfig, CacheKey};

use crate::caching::FetchError;
use crate::config::Config;
use crate::types::Segment;

mod codec;
mod filesystem;
mod http;
#[cfg(any(test, feature = "test"))]
pub mod mock;

pub use codec::decode_segment;
pub use filesystem::FilesystemArchive;
pub use http::HttpArchive;

/// The user agent sent with every archive request.
pub const USER_AGENT: &str = concat!("strainview/", env!("CARGO_PKG_VERSION"));

impl FetchError {
    fn transport_error(mut error: &dyn Error) -> Self {
        while let Some(src) = error.source() {
            error = src;
        }
        Self::Transport(error.to_string())
    }
}

impl From<reqwest::Error> for FetchError {
    fn from(error: reqwest::Error) -> Self {
        if error.is_timeout() {
            tracing::debug!(error = &error as &dyn Error, "archive request timed out");
        }
        Self::transport_error(&error)
    }
}

/// The seam to the external archive.
///
/// Implementations fetch one complete file and decode it into a [`Segment`]. They do not
/// retry, cache or deduplicate; all of that happens further up.
pub trait ArchiveClient: fmt::Debug + Send + Sync + 'static {
    /// A short name of the archive type, used in logs and metrics.
    fn name(&self) -> &'static str;

    /// Fetches the file identified by `key`.
    fn fetch<'a>(&'a self, key: &'a CacheKey) -> BoxFuture<'a, Result<Segment, FetchError>>;
}

/// Creates the HTTP client used for archive requests.
pub fn create_client(connect_timeout: Duration, timeout: Duration) -> reqwest::Client {
    reqwest::ClientBuilder::new()
        .gzip(true)
        .connect_timeout(connect_timeout)
        .timeout(timeout)
        .pool_idle_timeout(Duration::from_secs(30))
        .user_agent(USER_AGENT)
        .build()
        .unwrap_or_else(|err| {
            tracing::error!(error = &err as &dyn Error, "failed to build archive client");
            reqwest::Client::new()
        })
}

/// Fetches archive files with retries and a timeout.
#[derive(Debug, Clone)]
pub struct ArchiveService {
    client: Arc<dyn ArchiveClient>,
    timeout: Duration,
    max_attempts: usize,
}

impl ArchiveService {
    pub fn new(client: Arc<dyn ArchiveClient>, timeout: Duration, max_attempts: usize) -> Self {
        Self {
            client,
            timeout,
            max_attempts: max_attempts.max(1),
        }
    }

    /// Creates the service for the archive configured in `config`.
    pub fn from_config(config: &Config) -> anyhow::Result<Self> {
        let source = config.archive()?;
        let client: Arc<dyn ArchiveClient> = match source {
            ArchiveSourceConfig::Http(source) => {
                let client = create_client(config.connect_timeout, config.fetch_timeout);
                Arc::new(HttpArchive::new(client, source.clone()))
            }
            ArchiveSourceConfig::Filesystem(source) => {
                Arc::new(FilesystemArchive::new(source.clone()))
            }
        };
        tracing::info!(archive = source.type_name(), "using strain archive");

        Ok(Self::new(client, config.fetch_timeout, config.max_retries))
    }

    /// Fetches one archive file.
    ///
    /// Transport failures are retried up to the configured number of attempts. The whole
    /// fetch, retries included, fails with [`FetchError::Timeout`] after the configured
    /// timeout.
    pub async fn fetch(&self, key: &CacheKey) -> Result<Segment, FetchError> {
        let archive = self.client.name();
        metric!(counter("fetch.started") += 1, "archive" => archive);
        let start = Instant::now();

        let job = retry(self.max_attempts, || self.client.fetch(key));
        let result = match tokio::time::timeout(self.timeout, job).await {
            Ok(result) => result,
            Err(_) => Err(FetchError::Timeout(self.timeout)),
        };

        let status = match &result {
            Ok(_) => "success",
            Err(err) => err.metric_tag(),
        };
        metric!(timer("fetch.duration") = start.elapsed(), "archive" => archive, "status" => status);

        match &result {
            Ok(segment) => {
                metric!(histogram("fetch.bytes") = segment.byte_size(), "archive" => archive);
                tracing::debug!(%key, availability = ?segment.availability(), "fetched archive file");
            }
            Err(err) => {
                metric!(counter("fetch.failure") += 1, "archive" => archive, "status" => status);
                tracing::debug!(%key, error = err as &dyn Error, "archive fetch failed");
            }
        }

        result
    }
}

/// Runs `task_gen` until it succeeds, fails permanently or `max_attempts` are used up.
pub async fn retry<G, F, T>(max_attempts: usize, task_gen: G) -> Result<T, FetchError>
where
    G: Fn() -> F,
    F: Future<Output = Result<T, FetchError>>,
{
    let mut tries = 0;
    loop {
        tries += 1;
        let result = task_gen().await;

        let should_retry = matches!(&result, Err(err) if err.is_retryable());
        if !should_retry || tries >= max_attempts {
            break result;
        }

        tokio::time::sleep(Duration::from_millis(20)).await;
    }
}
