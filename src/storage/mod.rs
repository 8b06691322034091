//! Blob storage clients.
//!
//! A [`BlobClient`] is bound to one container and speaks in blob names; it knows nothing
//! about paths or directories.

mod memory;
mod rest;

pub use memory::*;
pub use rest::*;

use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::BoxStream;

use crate::error::FsResult;
use crate::models::{BlobListing, BlobProperties, ListBlobsRequest, PutBlobOptions};

/// Byte stream of blob content; the caller owns it and drops it when done.
pub type ByteStream = BoxStream<'static, FsResult<Bytes>>;

/// Default page size for List Blobs.
pub const DEFAULT_MAX_RESULTS: u32 = 5000;

/// Operations against a single container.
///
/// Absent blobs are reported as `FsError::Storage` with `ErrorCode::BlobNotFound`; a
/// non-overwriting put onto an existing name as `ErrorCode::BlobAlreadyExists`.
#[async_trait]
pub trait BlobClient: Send + Sync {
    /// Name of the container this client is bound to.
    fn container(&self) -> &str;

    /// Absolute public URL of the container, without trailing slash.
    fn container_url(&self) -> String;

    /// Creates the container with public blob access unless it already exists.
    async fn create_container_if_not_exists(&self) -> FsResult<()>;

    async fn put_blob(&self, name: &str, data: Bytes, options: &PutBlobOptions) -> FsResult<()>;

    async fn get_blob(&self, name: &str) -> FsResult<ByteStream>;

    async fn get_properties(&self, name: &str) -> FsResult<BlobProperties>;

    async fn delete_blob(&self, name: &str) -> FsResult<()>;

    /// Returns one page of results in lexicographic name order.
    async fn list_blobs(&self, request: &ListBlobsRequest) -> FsResult<BlobListing>;
}
