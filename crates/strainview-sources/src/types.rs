use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Duration of one archive file in seconds.
///
/// The archive is partitioned into consecutive files of this length, aligned to GPS 0.
pub const FILE_DURATION: u64 = 4096;

/// Error returned when parsing a [`Site`] or [`SampleRate`] from user input.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseError {
    /// The name does not refer to a known detector site.
    #[error("unknown detector site `{0}`")]
    UnknownSite(String),
    /// The value is not one of the supported archive sample rates.
    #[error("unsupported sample rate `{0}`, expected 4096 or 16384")]
    UnsupportedRate(String),
}

/// A gravitational-wave detector site.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Site {
    /// LIGO Hanford.
    H1,
    /// LIGO Livingston.
    L1,
    /// Virgo.
    V1,
}

impl Site {
    /// All sites the archive serves.
    pub const ALL: [Site; 3] = [Site::H1, Site::L1, Site::V1];

    /// The canonical site name, as used in archive paths.
    pub fn as_str(self) -> &'static str {
        match self {
            Site::H1 => "H1",
            Site::L1 => "L1",
            Site::V1 => "V1",
        }
    }
}

impl fmt::Display for Site {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Site {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Site::ALL
            .into_iter()
            .find(|site| site.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| ParseError::UnknownSite(s.to_owned()))
    }
}

/// One of the two sample rates the archive stores.
///
/// Serialized as the rate in Hz.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "u32", into = "u32")]
pub enum SampleRate {
    /// The decimated rate, 4096 Hz.
    Decimated,
    /// The full detector rate, 16384 Hz.
    Full,
}

impl SampleRate {
    /// Ratio between the full and the decimated rate.
    pub const DECIMATION_FACTOR: u32 = 4;

    /// Samples per second.
    pub fn hz(self) -> u32 {
        match self {
            SampleRate::Decimated => 4096,
            SampleRate::Full => 4096 * Self::DECIMATION_FACTOR,
        }
    }

    /// Number of samples in one complete archive file.
    pub fn samples_per_file(self) -> u64 {
        FILE_DURATION * u64::from(self.hz())
    }
}

impl fmt::Display for SampleRate {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.hz())
    }
}

impl TryFrom<u32> for SampleRate {
    type Error = ParseError;

    fn try_from(hz: u32) -> Result<Self, Self::Error> {
        match hz {
            4096 => Ok(SampleRate::Decimated),
            16384 => Ok(SampleRate::Full),
            other => Err(ParseError::UnsupportedRate(other.to_string())),
        }
    }
}

impl From<SampleRate> for u32 {
    fn from(rate: SampleRate) -> Self {
        rate.hz()
    }
}

impl FromStr for SampleRate {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let hz: u32 = s
            .trim()
            .parse()
            .map_err(|_| ParseError::UnsupportedRate(s.to_owned()))?;
        hz.try_into()
    }
}

/// Index of an archive file: `floor(gps / FILE_DURATION)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ArchiveFileIndex(pub u64);

impl ArchiveFileIndex {
    /// All files overlapping the half-open time interval `[t_start, t_end)`.
    ///
    /// Times before GPS 0 are clamped; the iterator is empty if nothing remains.
    pub fn overlapping(t_start: f64, t_end: f64) -> impl Iterator<Item = Self> {
        let duration = FILE_DURATION as f64;
        let t_start = t_start.max(0.0);
        let (first, end) = if t_end.is_finite() && t_end > t_start {
            (
                (t_start / duration).floor() as u64,
                (t_end / duration).ceil() as u64,
            )
        } else {
            (0, 0)
        };
        (first..end).map(Self)
    }

    /// GPS time at which this file starts.
    pub fn start_gps(self) -> u64 {
        self.0 * FILE_DURATION
    }
}

impl fmt::Display for ArchiveFileIndex {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identity of one cached segment: a whole archive file of one site at one rate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct CacheKey {
    /// The detector site.
    pub site: Site,
    /// The archive rate.
    pub sample_rate: SampleRate,
    /// The archive file.
    pub file: ArchiveFileIndex,
}

impl CacheKey {
    /// Creates a new [`CacheKey`].
    pub fn new(site: Site, sample_rate: SampleRate, file: ArchiveFileIndex) -> Self {
        Self {
            site,
            sample_rate,
            file,
        }
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}/{}/{}", self.site, self.sample_rate, self.file)
    }
}
