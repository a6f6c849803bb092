use std::time::Duration;

use humantime::format_duration;
use thiserror::Error;

/// An error that happens when fetching an archive file.
///
/// These errors are remembered by the gap tracker, except for the
/// [`InternalError`](Self::InternalError) variant.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FetchError {
    /// The archive has no file for this key.
    #[error("no data available")]
    NotFound,
    /// The file could not be fetched within the configured timeout.
    #[error("archive fetch timed out after {}", format_duration(*.0))]
    Timeout(Duration),
    /// The file could not be fetched due to another problem,
    /// like connection loss, DNS resolution, or a 5xx server response.
    ///
    /// The attached string contains the archive's response.
    #[error("archive transfer failed: {0}")]
    Transport(String),
    /// The file was fetched successfully, but could not be decoded.
    #[error("malformed archive file: {0}")]
    Malformed(String),
    /// An unexpected error in strainview itself.
    ///
    /// This variant is never recorded as a gap.
    #[error("internal error")]
    InternalError,
}

impl FetchError {
    /// Whether the archive could not be reached, as opposed to having no usable data.
    pub fn is_transport(&self) -> bool {
        matches!(self, Self::Timeout(_) | Self::Transport(_))
    }

    /// Whether another attempt within the same fetch may succeed.
    pub fn is_retryable(&self) -> bool {
        self.is_transport()
    }

    /// The status tag used for metrics.
    pub fn metric_tag(&self) -> &'static str {
        match self {
            Self::NotFound => "notfound",
            Self::Timeout(_) => "timeout",
            Self::Transport(_) => "transport",
            Self::Malformed(_) => "malformed",
            Self::InternalError => "internal",
        }
    }

    #[track_caller]
    pub fn from_std_error<E: std::error::Error + 'static>(e: E) -> Self {
        let dynerr: &dyn std::error::Error = &e; // tracing expects a `&dyn Error`
        tracing::error!(error = dynerr);
        Self::InternalError
    }
}

impl From<std::io::Error> for FetchError {
    #[track_caller]
    fn from(err: std::io::Error) -> Self {
        Self::from_std_error(err)
    }
}

impl From<tokio::task::JoinError> for FetchError {
    #[track_caller]
    fn from(err: tokio::task::JoinError) -> Self {
        Self::from_std_error(err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display() {
        assert_eq!(
            FetchError::Timeout(Duration::from_secs(90)).to_string(),
            "archive fetch timed out after 1m 30s"
        );
        assert_eq!(FetchError::NotFound.to_string(), "no data available");
    }

    #[test]
    fn test_classification() {
        assert!(FetchError::Timeout(Duration::ZERO).is_transport());
        assert!(FetchError::Transport("reset".into()).is_retryable());
        assert!(!FetchError::NotFound.is_retryable());
        assert!(!FetchError::Malformed("odd length".into()).is_transport());
    }
}
