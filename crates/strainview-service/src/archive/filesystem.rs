use std::io;
use std::sync::Arc;

use futures::future::BoxFuture;

use strainview_sources::{CacheKey, FilesystemArchiveConfig};

use super::{decode_segment, ArchiveClient};
use crate::caching::FetchError;
use crate::types::Segment;

/// Reads archive files from a local directory.
#[derive(Debug)]
pub struct FilesystemArchive {
    config: Arc<FilesystemArchiveConfig>,
}

impl FilesystemArchive {
    pub fn new(config: Arc<FilesystemArchiveConfig>) -> Self {
        Self { config }
    }

    async fn fetch_file(&self, key: CacheKey) -> Result<Segment, FetchError> {
        let path = self.config.path_for(&key);
        tracing::debug!("Fetching archive file from {}", path.display());

        let bytes = tokio::fs::read(&path).await.map_err(|e| match e.kind() {
            io::ErrorKind::NotFound => FetchError::NotFound,
            _ => e.into(),
        })?;

        tokio::task::spawn_blocking(move || decode_segment(key, &bytes)).await?
    }
}

impl ArchiveClient for FilesystemArchive {
    fn name(&self) -> &'static str {
        "filesystem"
    }

    fn fetch<'a>(&'a self, key: &'a CacheKey) -> BoxFuture<'a, Result<Segment, FetchError>> {
        Box::pin(self.fetch_file(*key))
    }
}
