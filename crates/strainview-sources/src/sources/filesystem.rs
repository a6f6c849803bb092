use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::paths::archive_path;
use crate::types::CacheKey;

/// Configuration for reading archive files from the local file system.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct FilesystemArchiveConfig {
    /// Root of the archive directory.
    pub path: PathBuf,
}

impl FilesystemArchiveConfig {
    /// Returns the path of the archive file for `key`.
    pub fn path_for(&self, key: &CacheKey) -> PathBuf {
        self.path.join(archive_path(key))
    }
}
