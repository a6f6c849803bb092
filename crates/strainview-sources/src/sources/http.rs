use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use url::Url;

use crate::paths::archive_path;
use crate::types::CacheKey;

/// Configuration for an archive served over HTTP.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct HttpArchiveConfig {
    /// Absolute URL of the archive root.
    pub url: Url,

    /// Additional headers to be sent to the archive with every request.
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
}

impl HttpArchiveConfig {
    /// Returns the URL of the archive file for `key`.
    ///
    /// The configured URL is treated as a directory, whether or not it ends in a slash.
    pub fn url_for(&self, key: &CacheKey) -> Result<Url, url::ParseError> {
        let mut base = self.url.clone();
        if !base.path().ends_with('/') {
            let path = format!("{}/", base.path());
            base.set_path(&path);
        }
        base.join(&archive_path(key))
    }
}
