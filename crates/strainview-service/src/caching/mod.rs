//! Memory-bounded storage of archive files and of the gaps between them.
//!
//! The [`SegmentStore`] holds whole archive files as shared sample arrays, bounded by a
//! [`CacheBudget`](crate::config::CacheBudget) that the [`RetentionPolicy`] enforces on every
//! insertion. The [`GapTracker`] separately remembers files, or parts of files, the archive
//! could not deliver, so they are not refetched on every request.

mod error;
mod gaps;
mod retention;
mod store;

pub use error::FetchError;
pub use gaps::{GapKind, GapMarker, GapTracker};
pub use retention::{ActiveView, EntryStats, Protection, RetentionPolicy};
pub use store::{Epoch, SegmentStore};
