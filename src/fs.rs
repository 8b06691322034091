//! The file-system contract and its blob-backed implementation.
//!
//! Directories are emulated: a directory `a/b` exists while at least one blob name starts
//! with `a/b/`, and deleting it deletes every such blob.

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use futures::stream::{self, BoxStream, StreamExt, TryStreamExt};
use std::collections::{HashSet, VecDeque};
use std::sync::Arc;
use tracing::{debug, info};

use crate::config::BlobFsConfig;
use crate::error::{FsError, FsResult};
use crate::models::{FileInfo, ListBlobsRequest, PutBlobOptions};
use crate::path::{self, FileFilter, SEPARATOR};
use crate::storage::{BlobClient, ByteStream};

/// Lazy stream of key-relative paths.
pub type PathStream = BoxStream<'static, FsResult<String>>;

/// Path-addressed file operations.
#[async_trait]
pub trait FileSystem: Send + Sync {
    /// Writes `content` at `path`. Without `overwrite`, an existing file is an
    /// [`FsError::AlreadyExists`] and stays untouched.
    async fn add_file(&self, path: &str, content: Bytes, overwrite: bool) -> FsResult<()>;

    /// Deletes one file; absent files are ignored.
    async fn delete_file(&self, path: &str) -> FsResult<()>;

    /// Deletes every file under `path`.
    ///
    /// Blob storage has no directory objects, so `recursive = false` still removes
    /// everything beneath `path`, nested levels included. Callers relying on a refusal to
    /// delete non-empty directories must check [`FileSystem::get_files`] themselves.
    async fn delete_directory(&self, path: &str, recursive: bool) -> FsResult<()>;

    async fn file_exists(&self, path: &str) -> FsResult<bool>;

    async fn directory_exists(&self, path: &str) -> FsResult<bool>;

    async fn get_created(&self, path: &str) -> FsResult<DateTime<Utc>>;

    async fn get_last_modified(&self, path: &str) -> FsResult<DateTime<Utc>>;

    async fn get_size(&self, path: &str) -> FsResult<u64>;

    /// Immediate child directories of `path`, as key-relative paths.
    fn get_directories(&self, path: &str) -> PathStream;

    /// Files directly under `path` whose name matches `filter` (e.g. `*.jpg`).
    fn get_files(&self, path: &str, filter: Option<&str>) -> PathStream;

    /// The key as a rooted path (`/images/a.jpg`).
    fn get_full_path(&self, path: &str) -> FsResult<String>;

    /// Strips URL, host, container and root prefixes from a full path or URL.
    fn get_relative_path(&self, full_path_or_url: &str) -> FsResult<String>;

    /// Public URL of the file; no I/O.
    fn get_url(&self, path: &str) -> FsResult<String>;

    async fn open_file(&self, path: &str) -> FsResult<ByteStream>;
}

/// [`FileSystem`] over one blob container.
pub struct BlobFileSystem {
    config: BlobFsConfig,
    client: Arc<dyn BlobClient>,
    /// Whether a virtual-path layer rewrites root-relative URLs for this host.
    virtual_path_active: bool,
}

impl std::fmt::Debug for BlobFileSystem {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BlobFileSystem")
            .field("config", &self.config)
            .field("virtual_path_active", &self.virtual_path_active)
            .finish_non_exhaustive()
    }
}

impl BlobFileSystem {
    pub fn new(config: BlobFsConfig, client: Arc<dyn BlobClient>) -> Self {
        Self {
            config,
            client,
            virtual_path_active: false,
        }
    }

    /// Declares whether the host runs a virtual-path layer that serves root-relative URLs.
    pub fn with_virtual_path(mut self, active: bool) -> Self {
        self.virtual_path_active = active;
        self
    }

    pub fn config(&self) -> &BlobFsConfig {
        &self.config
    }

    pub fn client(&self) -> &Arc<dyn BlobClient> {
        &self.client
    }

    /// Whether [`FileSystem::get_url`] produces root-relative URLs.
    pub fn uses_relative_urls(&self) -> bool {
        self.virtual_path_active && !self.config.virtual_path_disabled
    }

    /// Full metadata of one file.
    pub async fn get_info(&self, path: &str) -> FsResult<FileInfo> {
        let key = self.file_key(path)?;
        let properties = self.client.get_properties(&key).await.map_err(|e| absent_as(e, &key))?;
        Ok(FileInfo::new(key, properties))
    }

    /// Normalizes any accepted path form to a key.
    pub fn key_for(&self, path: &str) -> FsResult<String> {
        if path::is_url(path) {
            let container_url = self.client.container_url();
            let stripped = path::strip_url(path, Some(&container_url), Some(self.client.container()));
            return path::normalize(&stripped);
        }
        path::normalize(path)
    }

    /// Like [`Self::key_for`], but the root is not a file.
    fn file_key(&self, path: &str) -> FsResult<String> {
        let key = self.key_for(path)?;
        if key.is_empty() {
            return Err(FsError::invalid_path(path, "the root is not a file"));
        }
        Ok(key)
    }

    /// Pages through a listing lazily, yielding blob names and/or virtual directories.
    fn list_stream(&self, request: ListBlobsRequest, directories: bool) -> PathStream {
        struct State {
            client: Arc<dyn BlobClient>,
            request: ListBlobsRequest,
            buffered: VecDeque<String>,
            seen: HashSet<String>,
            done: bool,
        }

        let state = State {
            client: self.client.clone(),
            request,
            buffered: VecDeque::new(),
            seen: HashSet::new(),
            done: false,
        };

        stream::try_unfold(state, move |mut state| async move {
            loop {
                if let Some(item) = state.buffered.pop_front() {
                    return Ok::<_, FsError>(Some((item, state)));
                }
                if state.done {
                    return Ok(None);
                }

                let listing = state.client.list_blobs(&state.request).await?;
                state.done = listing.next_marker.is_none();
                state.request = state.request.with_marker(listing.next_marker);

                if directories {
                    for prefix in listing.prefixes {
                        let dir = prefix.trim_end_matches(SEPARATOR).to_string();
                        if state.seen.insert(dir.clone()) {
                            state.buffered.push_back(dir);
                        }
                    }
                } else {
                    state
                        .buffered
                        .extend(listing.blobs.into_iter().map(|blob| blob.name));
                }
            }
        })
        .boxed()
    }
}

/// Maps "blob not found" to [`FsError::NotFound`] for `key`.
fn absent_as(err: FsError, key: &str) -> FsError {
    if err.is_blob_not_found() {
        FsError::NotFound(key.to_string())
    } else {
        err
    }
}

/// Treats "blob not found" as a normal outcome.
fn absent_ok(result: FsResult<()>) -> FsResult<bool> {
    match result {
        Ok(()) => Ok(true),
        Err(e) if e.is_blob_not_found() => Ok(false),
        Err(e) => Err(e),
    }
}

#[async_trait]
impl FileSystem for BlobFileSystem {
    async fn add_file(&self, path: &str, content: Bytes, overwrite: bool) -> FsResult<()> {
        let key = self.file_key(path)?;

        let content_type = mime_guess::from_path(&key)
            .first_or(mime::APPLICATION_OCTET_STREAM)
            .to_string();
        let options = PutBlobOptions {
            content_type: Some(content_type),
            cache_control: Some(self.config.cache_control()),
            overwrite,
        };

        debug!("Adding {} ({} bytes, overwrite={})", key, content.len(), overwrite);
        match self.client.put_blob(&key, content, &options).await {
            Err(e) if !overwrite && e.storage_code().map(|c| c.is_already_exists()).unwrap_or(false) => {
                Err(FsError::AlreadyExists(key))
            }
            other => other,
        }
    }

    async fn delete_file(&self, path: &str) -> FsResult<()> {
        let key = self.file_key(path)?;
        if !absent_ok(self.client.delete_blob(&key).await)? {
            debug!("Delete of absent file {} ignored", key);
        }
        Ok(())
    }

    async fn delete_directory(&self, path: &str, recursive: bool) -> FsResult<()> {
        let key = self.key_for(path)?;
        let prefix = path::directory_prefix(&key);
        if !recursive {
            debug!("Non-recursive delete of '{}' removes all nested files", key);
        }

        let names: Vec<String> = self
            .list_stream(ListBlobsRequest::flat(prefix), false)
            .try_collect()
            .await?;

        let client = &self.client;
        let deleted = stream::iter(names)
            .map(|name| async move { absent_ok(client.delete_blob(&name).await) })
            .buffer_unordered(16)
            .try_fold(0usize, |count, deleted| async move { Ok(count + deleted as usize) })
            .await?;

        info!("Deleted directory '{}' ({} files)", key, deleted);
        Ok(())
    }

    async fn file_exists(&self, path: &str) -> FsResult<bool> {
        let key = self.key_for(path)?;
        if key.is_empty() {
            return Ok(false);
        }
        match self.client.get_properties(&key).await {
            Ok(_) => Ok(true),
            Err(e) if e.is_blob_not_found() => Ok(false),
            Err(e) => Err(e),
        }
    }

    async fn directory_exists(&self, path: &str) -> FsResult<bool> {
        let key = self.key_for(path)?;
        if key.is_empty() {
            return Ok(true);
        }
        let request = ListBlobsRequest::flat(path::directory_prefix(&key)).with_maxresults(1);
        let listing = self.client.list_blobs(&request).await?;
        Ok(!listing.blobs.is_empty())
    }

    async fn get_created(&self, path: &str) -> FsResult<DateTime<Utc>> {
        Ok(self.get_info(path).await?.created)
    }

    async fn get_last_modified(&self, path: &str) -> FsResult<DateTime<Utc>> {
        Ok(self.get_info(path).await?.last_modified)
    }

    async fn get_size(&self, path: &str) -> FsResult<u64> {
        Ok(self.get_info(path).await?.size)
    }

    fn get_directories(&self, path: &str) -> PathStream {
        match self.key_for(path) {
            Ok(key) => self.list_stream(
                ListBlobsRequest::hierarchical(path::directory_prefix(&key)),
                true,
            ),
            Err(e) => stream::once(async move { Err(e) }).boxed(),
        }
    }

    fn get_files(&self, path: &str, filter: Option<&str>) -> PathStream {
        let key = match self.key_for(path) {
            Ok(key) => key,
            Err(e) => return stream::once(async move { Err(e) }).boxed(),
        };
        let filter = FileFilter::new(filter);
        self.list_stream(
            ListBlobsRequest::hierarchical(path::directory_prefix(&key)),
            false,
        )
        .try_filter(move |name| futures::future::ready(filter.matches(name)))
        .boxed()
    }

    fn get_full_path(&self, path: &str) -> FsResult<String> {
        let key = self.key_for(path)?;
        Ok(format!("{}{}", SEPARATOR, key))
    }

    fn get_relative_path(&self, full_path_or_url: &str) -> FsResult<String> {
        self.key_for(full_path_or_url)
    }

    fn get_url(&self, path: &str) -> FsResult<String> {
        let key = path::encode_key(&self.key_for(path)?);
        if self.uses_relative_urls() {
            Ok(format!("/{}/{}", self.client.container(), key))
        } else {
            Ok(format!("{}/{}", self.client.container_url(), key))
        }
    }

    async fn open_file(&self, path: &str) -> FsResult<ByteStream> {
        let key = self.file_key(path)?;
        debug!("Opening {}", key);
        self.client.get_blob(&key).await.map_err(|e| absent_as(e, &key))
    }
}
