//! Data models for blobs as seen through the file-system adapter.

mod blob;

pub use blob::*;
