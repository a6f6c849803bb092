//! Vocabulary shared by the strain cache.
//!
//! Includes the detector sites and sample rates the archive is organized by, the mapping of
//! GPS time intervals onto fixed-length archive files, and the configuration of the archive
//! sources files are fetched from.

#![warn(missing_docs)]

mod archive;
mod interval;
mod paths;
mod sources;
mod types;

pub use archive::*;
pub use interval::*;
pub use paths::*;
pub use sources::*;
pub use types::*;
