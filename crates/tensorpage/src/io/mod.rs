//! File plumbing: byte-exact block transfers and the page manifest.

pub mod block;
pub mod manifest;

pub use manifest::{ManifestEntry, PageManifest};
