//! The strain segment cache and fetch coordinator.
//!
//! A [`FetchCoordinator`](coordinator::FetchCoordinator) answers requests for a window of
//! strain samples from a memory-bounded store of whole archive files, fetching missing files
//! from an [`ArchiveClient`](archive::ArchiveClient) at most once per key at a time and
//! remembering where the archive has no data.

#[macro_use]
pub mod metrics;

pub mod archive;
pub mod caching;
pub mod config;
pub mod coordinator;
pub mod logging;
pub mod session;
pub mod types;
pub mod utils;

#[cfg(test)]
use strainview_test as test;
