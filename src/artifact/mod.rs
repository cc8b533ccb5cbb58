//! Build artifacts: where they live and how the raw disk image is produced.
//!
//! - [`paths`] - per-profile artifact locations
//! - [`raw`] - block-aligned raw disk image copy
//! - [`checksum`] - SHA-256 digests for the run manifest

pub mod checksum;
pub mod paths;
pub mod raw;

pub use paths::{ArtifactLayout, ArtifactPaths, Profile};
pub use raw::{copy_block_aligned, RawCopy, RawSizing};
