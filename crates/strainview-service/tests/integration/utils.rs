use std::path::Path;

use strainview_service::archive::ArchiveService;
use strainview_service::config::Config;
use strainview_service::coordinator::FetchCoordinator;
use strainview_sources::{ArchiveFileIndex, ArchiveSourceConfig, CacheKey, SampleRate, Site};

pub use strainview_test as test;

/// The archive file holding GW170817.
pub const EVENT_FILE: ArchiveFileIndex = ArchiveFileIndex(289797);
/// GPS start of [`EVENT_FILE`].
pub const BOUNDARY: f64 = 1187008512.0;

pub fn event_key() -> CacheKey {
    CacheKey::new(Site::H1, SampleRate::Decimated, EVENT_FILE)
}

/// A ramp of samples, so every sample can be told apart.
pub fn ramp(len: usize) -> Vec<f64> {
    (0..len).map(|i| i as f64 * 1e-21).collect()
}

/// Writes two seconds of the event file below `root`.
pub fn write_event_file(root: &Path) {
    test::write_archive_file(root, &event_key(), &ramp(2 * 4096));
}

pub fn coordinator(source: ArchiveSourceConfig) -> FetchCoordinator {
    let config = Config {
        archive: Some(source),
        max_retries: 1,
        ..Default::default()
    };
    let archive = ArchiveService::from_config(&config).unwrap();
    FetchCoordinator::new(archive, &config.caches).unwrap()
}
