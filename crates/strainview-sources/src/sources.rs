//! Archive source types.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

mod filesystem;
mod http;
pub use filesystem::*;
pub use http::*;

/// Configuration for the archive that strain files are fetched from.
#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ArchiveSourceConfig {
    /// Local file system.
    Filesystem(Arc<FilesystemArchiveConfig>),
    /// Static file server over HTTP.
    Http(Arc<HttpArchiveConfig>),
}

impl ArchiveSourceConfig {
    /// Name of this source type.
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Filesystem(..) => "filesystem",
            Self::Http(..) => "http",
        }
    }
}
