//! Blob data models.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Blob types supported by Azure Blob Storage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum BlobType {
    #[default]
    BlockBlob,
    PageBlob,
    AppendBlob,
}

impl BlobType {
    pub fn as_str(&self) -> &'static str {
        match self {
            BlobType::BlockBlob => "BlockBlob",
            BlobType::PageBlob => "PageBlob",
            BlobType::AppendBlob => "AppendBlob",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "BlockBlob" => Some(BlobType::BlockBlob),
            "PageBlob" => Some(BlobType::PageBlob),
            "AppendBlob" => Some(BlobType::AppendBlob),
            _ => None,
        }
    }
}

/// Blob properties returned by Get Blob Properties and List Blobs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlobProperties {
    pub content_length: u64,
    pub content_type: Option<String>,
    pub content_md5: Option<String>,
    pub cache_control: Option<String>,
    pub etag: String,
    pub last_modified: DateTime<Utc>,
    pub created_on: DateTime<Utc>,
    pub blob_type: BlobType,
}

impl BlobProperties {
    /// Creates properties for freshly written content.
    pub fn new(content_length: u64) -> Self {
        let now = Utc::now();
        Self {
            content_length,
            content_type: None,
            content_md5: None,
            cache_control: None,
            etag: new_etag(),
            last_modified: now,
            created_on: now,
            blob_type: BlobType::BlockBlob,
        }
    }
}

fn new_etag() -> String {
    format!("\"0x{}\"", uuid::Uuid::new_v4().simple())
}

/// One entry of a blob listing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlobItem {
    /// Blob name (full key).
    pub name: String,
    pub properties: BlobProperties,
}

/// Options for Put Blob.
#[derive(Debug, Clone, Default)]
pub struct PutBlobOptions {
    pub content_type: Option<String>,
    pub cache_control: Option<String>,
    /// When false the write fails with `BlobAlreadyExists` if the name is taken.
    pub overwrite: bool,
}

/// Query parameters for List Blobs.
#[derive(Debug, Clone, Default)]
pub struct ListBlobsRequest {
    pub prefix: Option<String>,
    pub delimiter: Option<String>,
    pub marker: Option<String>,
    pub maxresults: Option<u32>,
}

impl ListBlobsRequest {
    /// Flat listing of everything under `prefix`.
    pub fn flat(prefix: impl Into<String>) -> Self {
        Self {
            prefix: Some(prefix.into()).filter(|p: &String| !p.is_empty()),
            ..Self::default()
        }
    }

    /// Hierarchical listing of the level directly under `prefix`.
    pub fn hierarchical(prefix: impl Into<String>) -> Self {
        Self {
            delimiter: Some("/".to_string()),
            ..Self::flat(prefix)
        }
    }

    /// Continues a listing from a previous page's `next_marker`.
    pub fn with_marker(mut self, marker: Option<String>) -> Self {
        self.marker = marker;
        self
    }

    pub fn with_maxresults(mut self, maxresults: u32) -> Self {
        self.maxresults = Some(maxresults);
        self
    }
}

/// One page of a List Blobs response.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BlobListing {
    pub blobs: Vec<BlobItem>,
    /// Virtual directory prefixes (each ends with the delimiter).
    pub prefixes: Vec<String>,
    pub next_marker: Option<String>,
}

/// File metadata reported by the adapter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FileInfo {
    /// Key-relative path of the file.
    pub path: String,
    pub size: u64,
    pub content_type: Option<String>,
    pub cache_control: Option<String>,
    pub etag: String,
    pub created: DateTime<Utc>,
    pub last_modified: DateTime<Utc>,
}

impl FileInfo {
    pub fn new(path: String, properties: BlobProperties) -> Self {
        Self {
            path,
            size: properties.content_length,
            content_type: properties.content_type,
            cache_control: properties.cache_control,
            etag: properties.etag,
            created: properties.created_on,
            last_modified: properties.last_modified,
        }
    }
}
