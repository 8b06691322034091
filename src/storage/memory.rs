//! In-process blob client.

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use bytes::Bytes;
use chrono::{DateTime, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use futures::stream::{self, StreamExt};
use md5::{Digest, Md5};
use parking_lot::{Mutex, RwLock};
use std::collections::HashSet;
use std::sync::Arc;

use crate::error::{ErrorCode, FsResult, StorageError};
use crate::models::{BlobItem, BlobListing, BlobProperties, ListBlobsRequest, PutBlobOptions};

use super::{BlobClient, ByteStream, DEFAULT_MAX_RESULTS};

/// Stored blob: properties plus content.
#[derive(Debug, Clone)]
struct StoredBlob {
    properties: BlobProperties,
    data: Bytes,
}

/// Blob client keeping one container in memory.
///
/// Listing follows the service: names sorted, `prefix` and `marker` filters, virtual
/// directories for a `delimiter`, pages of `maxresults`.
pub struct MemoryBlobClient {
    container: String,
    base_url: String,
    /// Blobs indexed by name.
    blobs: DashMap<Arc<str>, StoredBlob>,
    /// Container creation time, `None` until created.
    created_on: RwLock<Option<DateTime<Utc>>>,
    /// Error returned by the next operation, for exercising failure paths.
    injected_failure: Mutex<Option<ErrorCode>>,
}

impl MemoryBlobClient {
    /// Creates a client whose container already exists.
    pub fn new(container: impl Into<String>) -> Self {
        Self::with_base_url(container, "http://127.0.0.1:10000/devstoreaccount1")
    }

    /// Creates a client reporting URLs under `base_url` (the account endpoint).
    pub fn with_base_url(container: impl Into<String>, base_url: impl Into<String>) -> Self {
        Self {
            container: container.into(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            blobs: DashMap::new(),
            created_on: RwLock::new(Some(Utc::now())),
            injected_failure: Mutex::new(None),
        }
    }

    /// Creates a client whose container does not exist yet.
    pub fn without_container(container: impl Into<String>) -> Self {
        let client = Self::new(container);
        *client.created_on.write() = None;
        client
    }

    /// Makes the next operation fail with `code`.
    pub fn fail_next(&self, code: ErrorCode) {
        *self.injected_failure.lock() = Some(code);
    }

    /// Whether the container has been created.
    pub fn container_exists(&self) -> bool {
        self.created_on.read().is_some()
    }

    /// Number of stored blobs.
    pub fn len(&self) -> usize {
        self.blobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.blobs.is_empty()
    }

    fn check(&self) -> FsResult<()> {
        if let Some(code) = self.injected_failure.lock().take() {
            return Err(StorageError::new(code).into());
        }
        if !self.container_exists() {
            return Err(StorageError::new(ErrorCode::ContainerNotFound).into());
        }
        Ok(())
    }

    fn not_found() -> StorageError {
        StorageError::new(ErrorCode::BlobNotFound)
    }
}

#[async_trait]
impl BlobClient for MemoryBlobClient {
    fn container(&self) -> &str {
        &self.container
    }

    fn container_url(&self) -> String {
        format!("{}/{}", self.base_url, self.container)
    }

    async fn create_container_if_not_exists(&self) -> FsResult<()> {
        if let Some(code) = self.injected_failure.lock().take() {
            return Err(StorageError::new(code).into());
        }
        let mut created_on = self.created_on.write();
        if created_on.is_none() {
            *created_on = Some(Utc::now());
        }
        Ok(())
    }

    async fn put_blob(&self, name: &str, data: Bytes, options: &PutBlobOptions) -> FsResult<()> {
        self.check()?;

        let mut properties = BlobProperties::new(data.len() as u64);
        properties.content_type = options.content_type.clone();
        properties.cache_control = options.cache_control.clone();
        properties.content_md5 = Some(BASE64.encode(Md5::digest(&data)));
        let blob = StoredBlob { properties, data };

        match self.blobs.entry(Arc::from(name)) {
            Entry::Occupied(_) if !options.overwrite => {
                Err(StorageError::new(ErrorCode::BlobAlreadyExists).into())
            }
            Entry::Occupied(mut entry) => {
                let created_on = entry.get().properties.created_on;
                let mut blob = blob;
                blob.properties.created_on = created_on;
                entry.insert(blob);
                Ok(())
            }
            Entry::Vacant(entry) => {
                entry.insert(blob);
                Ok(())
            }
        }
    }

    async fn get_blob(&self, name: &str) -> FsResult<ByteStream> {
        self.check()?;
        let data = self
            .blobs
            .get(name)
            .map(|b| b.value().data.clone())
            .ok_or_else(Self::not_found)?;
        Ok(stream::once(async move { Ok(data) }).boxed())
    }

    async fn get_properties(&self, name: &str) -> FsResult<BlobProperties> {
        self.check()?;
        self.blobs
            .get(name)
            .map(|b| b.value().properties.clone())
            .ok_or_else(|| Self::not_found().into())
    }

    async fn delete_blob(&self, name: &str) -> FsResult<()> {
        self.check()?;
        self.blobs
            .remove(name)
            .map(|_| ())
            .ok_or_else(|| Self::not_found().into())
    }

    async fn list_blobs(&self, request: &ListBlobsRequest) -> FsResult<BlobListing> {
        self.check()?;

        let maxresults = request.maxresults.unwrap_or(DEFAULT_MAX_RESULTS).max(1) as usize;
        let prefix = request.prefix.as_deref().unwrap_or("");
        let marker = request.marker.as_deref();

        let mut names: Vec<Arc<str>> = self
            .blobs
            .iter()
            .filter(|entry| entry.key().starts_with(prefix))
            .filter(|entry| marker.map(|m| entry.key().as_ref() > m).unwrap_or(true))
            .map(|entry| entry.key().clone())
            .collect();
        names.sort();

        // Collapse names into virtual directories, counting each directory once toward
        // the page size like the service does.
        let mut listing = BlobListing::default();
        let mut seen_prefixes = HashSet::new();
        let mut taken = 0usize;
        let mut last_name: Option<String> = None;

        for name in &names {
            let name_after_prefix = &name[prefix.len()..];
            let virtual_prefix = request.delimiter.as_deref().and_then(|delim| {
                name_after_prefix
                    .find(delim)
                    .map(|idx| format!("{}{}{}", prefix, &name_after_prefix[..idx], delim))
            });

            if let Some(ref vp) = virtual_prefix {
                if seen_prefixes.contains(vp) {
                    last_name = Some(name.to_string());
                    continue;
                }
            }

            if taken == maxresults {
                listing.next_marker = last_name;
                break;
            }
            taken += 1;

            match virtual_prefix {
                Some(vp) => {
                    seen_prefixes.insert(vp.clone());
                    listing.prefixes.push(vp);
                }
                None => {
                    if let Some(entry) = self.blobs.get(name.as_ref()) {
                        listing.blobs.push(BlobItem {
                            name: name.to_string(),
                            properties: entry.value().properties.clone(),
                        });
                    }
                }
            }
            last_name = Some(name.to_string());
        }

        Ok(listing)
    }
}
