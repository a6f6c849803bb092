use crate::types::CacheKey;

/// File extension of archive files.
pub const ARCHIVE_FILE_EXTENSION: &str = "strain";

/// Path of the archive file for `key`, relative to the archive root.
///
/// The layout is `{site}/{rate}/{file_index}.strain`, shared by all archive sources.
pub fn archive_path(key: &CacheKey) -> String {
    format!(
        "{}/{}/{}.{}",
        key.site, key.sample_rate, key.file, ARCHIVE_FILE_EXTENSION
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{ArchiveFileIndex, SampleRate, Site};

    #[test]
    fn test_archive_path() {
        let key = CacheKey::new(Site::H1, SampleRate::Decimated, ArchiveFileIndex(289797));
        assert_eq!(archive_path(&key), "H1/4096/289797.strain");
    }
}
