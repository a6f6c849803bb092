use std::collections::BTreeMap;
use std::env;
use std::fmt;
use std::fs;
use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use sentry::types::Dsn;
use serde::{Deserialize, Deserializer, de};
use thiserror::Error;
use tracing::level_filters::LevelFilter;

use strainview_sources::{ArchiveSourceConfig, SampleRate};

use crate::types::Segment;

/// Controls the log format
#[derive(Clone, Copy, Debug, Eq, PartialEq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Auto detect (pretty for tty, simplified for other)
    Auto,
    /// With colors
    Pretty,
    /// Simplified log output
    Simplified,
    /// Dump out JSON lines
    Json,
}

/// Controls the logging system.
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct Logging {
    /// The log level for strainview.
    #[serde(deserialize_with = "deserialize_level_filter")]
    pub level: LevelFilter,
    /// Controls the log format.
    pub format: LogFormat,
    /// When set to true, backtraces are forced on.
    pub enable_backtraces: bool,
}

impl Default for Logging {
    fn default() -> Self {
        Logging {
            level: LevelFilter::INFO,
            format: LogFormat::Auto,
            enable_backtraces: true,
        }
    }
}

/// Control the metrics.
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct Metrics {
    /// host/port of statsd instance
    pub statsd: Option<String>,
    /// The prefix that should be added to all metrics.
    pub prefix: String,
    /// A tag name to report the hostname to, for each metric. Defaults to not sending such a tag.
    pub hostname_tag: Option<String>,
    /// A map containing custom tags and their values.
    ///
    /// These tags will be appended to every metric.
    pub custom_tags: BTreeMap<String, String>,
}

impl Default for Metrics {
    fn default() -> Self {
        Metrics {
            statsd: env::var("STATSD_SERVER").ok(),
            prefix: "strainview".into(),
            hostname_tag: None,
            custom_tags: BTreeMap::new(),
        }
    }
}

/// A cache budget that cannot satisfy the minimum guarantees.
///
/// Raised once at startup, never per request.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigurationError {
    /// The budget does not allow a single segment.
    #[error("cache budget allows no segments")]
    NoEntries,
    /// The byte ceiling is smaller than the smallest possible segment.
    #[error(
        "cache budget of {max_bytes} bytes cannot hold one {sample_rate} Hz segment ({segment_bytes} bytes)"
    )]
    BelowOneSegment {
        /// The configured byte ceiling.
        max_bytes: u64,
        /// The rate of the smallest segment.
        sample_rate: SampleRate,
        /// Size of one segment at that rate.
        segment_bytes: u64,
    },
}

/// Ceiling on the memory held by cached segments.
///
/// Both limits apply at once; the store evicts until neither is exceeded.
#[derive(Debug, Clone, Copy, Deserialize, Eq, PartialEq)]
#[serde(default)]
pub struct CacheBudget {
    /// Maximum number of cached segments, i.e. simultaneous site/file/rate combinations.
    pub max_entries: usize,
    /// Maximum number of bytes held by cached segments.
    pub max_bytes: u64,
}

impl Default for CacheBudget {
    fn default() -> Self {
        Self {
            max_entries: 8,
            max_bytes: 2 * 1024 * 1024 * 1024,
        }
    }
}

impl CacheBudget {
    /// Rejects budgets that cannot hold even one segment.
    pub fn validate(&self) -> Result<(), ConfigurationError> {
        if self.max_entries == 0 {
            return Err(ConfigurationError::NoEntries);
        }

        let segment_bytes = Segment::nominal_bytes(SampleRate::Decimated);
        if self.max_bytes < segment_bytes {
            return Err(ConfigurationError::BelowOneSegment {
                max_bytes: self.max_bytes,
                sample_rate: SampleRate::Decimated,
                segment_bytes,
            });
        }

        Ok(())
    }

    /// Whether a 64 s window straddling a file boundary fits at the full rate.
    pub fn fits_zoom_out(&self) -> bool {
        self.max_entries >= 2 && self.max_bytes >= 2 * Segment::nominal_bytes(SampleRate::Full)
    }
}

/// Tunables of the segment cache and the gap tracker.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq)]
#[serde(default)]
pub struct CacheConfigs {
    /// Memory ceiling for cached segments.
    pub budget: CacheBudget,

    /// How far the center may shift while still being served from neighbouring files.
    ///
    /// Files within this margin around an active view's widest window are kept in preference
    /// to unrelated files.
    #[serde(with = "humantime_serde")]
    pub shift_window: Duration,

    /// How long a "no data available" result suppresses further fetches of a file.
    #[serde(with = "humantime_serde")]
    pub retry_no_data_after: Duration,

    /// How long a transport failure suppresses further fetches of a file.
    #[serde(with = "humantime_serde")]
    pub retry_transport_after: Duration,

    /// Sessions idle for longer than this are dropped and stop protecting their files.
    #[serde(with = "humantime_serde")]
    pub session_idle_timeout: Duration,
}

impl Default for CacheConfigs {
    fn default() -> Self {
        Self {
            budget: CacheBudget::default(),
            shift_window: Duration::from_millis(46_700),
            retry_no_data_after: Duration::from_secs(5 * 60),
            retry_transport_after: Duration::from_secs(30),
            session_idle_timeout: Duration::from_secs(30 * 60),
        }
    }
}

#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Host and port to bind the HTTP webserver to.
    pub bind: String,

    /// Configuration for internal logging.
    pub logging: Logging,

    /// Configuration for reporting metrics to a statsd instance.
    pub metrics: Metrics,

    /// DSN to report internal errors to
    pub sentry_dsn: Option<Dsn>,

    /// The archive strain files are fetched from.
    pub archive: Option<ArchiveSourceConfig>,

    /// The maximum time a single archive file fetch may take, retries included.
    #[serde(with = "humantime_serde")]
    pub fetch_timeout: Duration,

    /// The timeout for establishing a connection to the archive.
    ///
    /// Applies to every individual attempt.
    #[serde(with = "humantime_serde")]
    pub connect_timeout: Duration,

    /// The number of attempts for one fetch when the archive cannot be reached.
    pub max_retries: usize,

    /// Cache budget and expiry.
    pub caches: CacheConfigs,
}

/// Checks if we are running in docker.
fn is_docker() -> bool {
    if fs::metadata("/.dockerenv").is_ok() {
        return true;
    }

    fs::read_to_string("/proc/self/cgroup")
        .map(|s| s.contains("/docker"))
        .unwrap_or(false)
}

/// Default value for the "bind" configuration.
fn default_bind() -> String {
    if is_docker() {
        "0.0.0.0:3031".to_owned()
    } else {
        "127.0.0.1:3031".to_owned()
    }
}

impl Default for Config {
    fn default() -> Self {
        Config {
            bind: default_bind(),
            logging: Logging::default(),
            metrics: Metrics::default(),
            sentry_dsn: None,
            archive: None,
            // One full-rate file is 512 MiB, this allows for a ~1 MB/s connection.
            fetch_timeout: Duration::from_secs(10 * 60),
            connect_timeout: Duration::from_secs(1),
            max_retries: 3,
            caches: CacheConfigs::default(),
        }
    }
}

impl Config {
    pub fn get(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(path) => Self::from_reader(
                fs::File::open(path).context("failed to open configuration file")?,
            ),
            None => Ok(Config::default()),
        }
    }

    fn from_reader(mut reader: impl std::io::Read) -> Result<Self> {
        let mut config = String::new();
        reader
            .read_to_string(&mut config)
            .context("failed reading config file")?;
        if config.trim().is_empty() {
            anyhow::bail!("config file empty");
        }
        serde_yaml::from_str(&config).context("failed to parse config YAML")
    }

    /// The configured archive, or an error explaining how to configure one.
    pub fn archive(&self) -> Result<&ArchiveSourceConfig> {
        self.archive
            .as_ref()
            .context("no archive configured, set `archive` in the configuration file")
    }
}

#[derive(Debug)]
struct LevelFilterVisitor;

impl de::Visitor<'_> for LevelFilterVisitor {
    type Value = LevelFilter;

    fn expecting(&self, formatter: &mut fmt::Formatter) -> std::fmt::Result {
        write!(
            formatter,
            r#"one of the strings "off", "error", "warn", "info", "debug", or "trace""#
        )
    }

    fn visit_str<E>(self, v: &str) -> Result<Self::Value, E>
    where
        E: de::Error,
    {
        match v {
            "off" => Ok(LevelFilter::OFF),
            "error" => Ok(LevelFilter::ERROR),
            "warn" => Ok(LevelFilter::WARN),
            "info" => Ok(LevelFilter::INFO),
            "debug" => Ok(LevelFilter::DEBUG),
            "trace" => Ok(LevelFilter::TRACE),
            _ => Err(de::Error::unknown_variant(
                v,
                &["off", "error", "warn", "info", "debug", "trace"],
            )),
        }
    }
}

fn deserialize_level_filter<'de, D: Deserializer<'de>>(
    deserializer: D,
) -> Result<LevelFilter, D::Error> {
    deserializer.deserialize_str(LevelFilterVisitor)
}
