use std::sync::Arc;

use futures::future::BoxFuture;
use reqwest::{header, Client, StatusCode};

use strainview_sources::{CacheKey, HttpArchiveConfig};

use super::{decode_segment, ArchiveClient, USER_AGENT};
use crate::caching::FetchError;
use crate::types::Segment;

/// Fetches archive files from an HTTP server.
#[derive(Debug)]
pub struct HttpArchive {
    client: Client,
    config: Arc<HttpArchiveConfig>,
}

impl HttpArchive {
    pub fn new(client: Client, config: Arc<HttpArchiveConfig>) -> Self {
        Self { client, config }
    }

    async fn fetch_file(&self, key: CacheKey) -> Result<Segment, FetchError> {
        let url = self.config.url_for(&key).map_err(|error| {
            tracing::error!(
                %key,
                base = %self.config.url,
                error = &error as &dyn std::error::Error,
                "cannot build archive url"
            );
            FetchError::InternalError
        })?;

        tracing::debug!("Fetching archive file from `{}`", url);

        let mut builder = self.client.get(url);
        for (name, value) in self.config.headers.iter() {
            if let Ok(name) = header::HeaderName::from_bytes(name.as_bytes()) {
                builder = builder.header(name, value.as_str());
            }
        }
        builder = builder.header(header::USER_AGENT, USER_AGENT);

        let response = builder.send().await?;
        let status = response.status();
        if status == StatusCode::NOT_FOUND || status == StatusCode::GONE {
            return Err(FetchError::NotFound);
        }
        if !status.is_success() {
            return Err(FetchError::Transport(status.to_string()));
        }

        let bytes = response.bytes().await?;
        tokio::task::spawn_blocking(move || decode_segment(key, &bytes)).await?
    }
}

impl ArchiveClient for HttpArchive {
    fn name(&self) -> &'static str {
        "http"
    }

    fn fetch<'a>(&'a self, key: &'a CacheKey) -> BoxFuture<'a, Result<Segment, FetchError>> {
        Box::pin(self.fetch_file(*key))
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use strainview_sources::{ArchiveFileIndex, ArchiveSourceConfig, SampleRate, Site};

    use super::*;
    use crate::archive::create_client;
    use crate::test;
    use crate::types::Availability;

    fn http_archive(source: ArchiveSourceConfig) -> HttpArchive {
        let ArchiveSourceConfig::Http(config) = source else {
            panic!("expected an http archive");
        };
        let client = create_client(Duration::from_secs(1), Duration::from_secs(10));
        HttpArchive::new(client, config)
    }

    #[tokio::test]
    async fn test_fetch_file() {
        test::setup();
        let root = test::tempdir();
        let key = CacheKey::new(Site::L1, SampleRate::Decimated, ArchiveFileIndex(289797));
        test::write_archive_file(root.path(), &key, &[1.0, f64::NAN, 3.0]);

        let (server, source) = test::archive_server(root.path());
        let archive = http_archive(source);

        let segment = archive.fetch(&key).await.unwrap();
        assert_eq!(segment.samples().len(), 3);
        assert_eq!(segment.samples()[2], 3.0);
        assert_eq!(segment.availability(), Availability::Partial);
        assert_eq!(server.accesses(), 1);
    }

    #[tokio::test]
    async fn test_fetch_missing() {
        test::setup();
        let root = test::tempdir();
        let key = CacheKey::new(Site::V1, SampleRate::Full, ArchiveFileIndex(12));

        let (_server, source) = test::archive_server(root.path());
        let archive = http_archive(source);

        assert_eq!(archive.fetch(&key).await.unwrap_err(), FetchError::NotFound);
    }

    #[tokio::test]
    async fn test_fetch_unreachable() {
        test::setup();
        let source: ArchiveSourceConfig =
            serde_json::from_str(r#"{"type": "http", "url": "http://127.0.0.1:1/"}"#).unwrap();
        let archive = http_archive(source);
        let key = CacheKey::new(Site::H1, SampleRate::Decimated, ArchiveFileIndex(1));

        let error = archive.fetch(&key).await.unwrap_err();
        assert!(error.is_transport(), "{error:?}");
    }

    #[tokio::test]
    async fn test_fetch_unjoinable_base() {
        test::setup();
        let source: ArchiveSourceConfig =
            serde_json::from_str(r#"{"type": "http", "url": "mailto:archive@example.com"}"#)
                .unwrap();
        let archive = http_archive(source);
        let key = CacheKey::new(Site::H1, SampleRate::Decimated, ArchiveFileIndex(1));

        assert_eq!(archive.fetch(&key).await.unwrap_err(), FetchError::InternalError);
    }
}
