//! Process-wide cache of file-system instances keyed by configuration.

use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::OnceCell;
use tracing::info;

use crate::config::{BlobFsConfig, ConfigSource};
use crate::error::{FsError, FsResult};
use crate::fs::BlobFileSystem;
use crate::storage::{BlobClient, HttpBlobClient};

/// Builds the storage client for a resolved configuration.
pub type ClientFactory =
    Arc<dyn Fn(&BlobFsConfig) -> FsResult<Arc<dyn BlobClient>> + Send + Sync>;

type Slot = Arc<OnceCell<Arc<BlobFileSystem>>>;

/// Hands out one shared [`BlobFileSystem`] per distinct [`BlobFsConfig`].
///
/// Concurrent first requests for the same configuration construct a single instance and
/// create the container once. A failed construction leaves the slot empty so the next
/// request retries.
pub struct FileSystemRegistry {
    instances: DashMap<BlobFsConfig, Slot>,
    factory: ClientFactory,
    virtual_path_active: bool,
}

impl FileSystemRegistry {
    /// Registry producing REST clients.
    pub fn new() -> Self {
        Self::with_factory(Arc::new(|config: &BlobFsConfig| -> FsResult<Arc<dyn BlobClient>> {
            let client: Arc<dyn BlobClient> = Arc::new(HttpBlobClient::from_config(config)?);
            Ok(client)
        }))
    }

    pub fn with_factory(factory: ClientFactory) -> Self {
        Self {
            instances: DashMap::new(),
            factory,
            virtual_path_active: false,
        }
    }

    /// Marks the host as running a virtual-path layer; applies to instances created later.
    pub fn with_virtual_path(mut self, active: bool) -> Self {
        self.virtual_path_active = active;
        self
    }

    /// Returns the instance for `config`, constructing it on first use.
    pub async fn get_or_create(&self, config: BlobFsConfig) -> FsResult<Arc<BlobFileSystem>> {
        let slot = self
            .instances
            .entry(config.clone())
            .or_insert_with(|| Arc::new(OnceCell::new()))
            .clone();

        let fs = slot
            .get_or_try_init(|| async {
                let client = (self.factory)(&config)?;
                client.create_container_if_not_exists().await?;
                info!(
                    "Initialized blob file system for container '{}' at {}",
                    config.container_name,
                    client.container_url()
                );
                Ok::<_, FsError>(Arc::new(
                    BlobFileSystem::new(config.clone(), client)
                        .with_virtual_path(self.virtual_path_active),
                ))
            })
            .await?;

        Ok(fs.clone())
    }

    /// Resolves configuration from `source` and returns the matching instance.
    pub async fn from_source(&self, source: &dyn ConfigSource) -> FsResult<Arc<BlobFileSystem>> {
        let config = BlobFsConfig::from_source(source)?;
        self.get_or_create(config).await
    }

    /// Number of configurations seen so far.
    pub fn len(&self) -> usize {
        self.instances.len()
    }

    pub fn is_empty(&self) -> bool {
        self.instances.is_empty()
    }
}

impl Default for FileSystemRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryBlobClient;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn counting_registry(created: Arc<AtomicUsize>) -> FileSystemRegistry {
        FileSystemRegistry::with_factory(Arc::new(move |config: &BlobFsConfig| -> FsResult<Arc<dyn BlobClient>> {
            created.fetch_add(1, Ordering::SeqCst);
            let client: Arc<dyn BlobClient> =
                Arc::new(MemoryBlobClient::without_container(config.container_name.clone()));
            Ok(client)
        }))
    }

    fn config(container: &str) -> BlobFsConfig {
        BlobFsConfig::resolve(Some(container), Some("UseDevelopmentStorage=true"), None, None)
            .unwrap()
    }

    #[tokio::test]
    async fn test_same_config_shares_instance() {
        let created = Arc::new(AtomicUsize::new(0));
        let registry = counting_registry(created.clone());

        let a = registry.get_or_create(config("media")).await.unwrap();
        let b = registry.get_or_create(config("media")).await.unwrap();

        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(created.load(Ordering::SeqCst), 1);
        assert_eq!(registry.len(), 1);
    }

    #[tokio::test]
    async fn test_distinct_configs_get_distinct_instances() {
        let created = Arc::new(AtomicUsize::new(0));
        let registry = counting_registry(created.clone());

        let a = registry.get_or_create(config("media")).await.unwrap();
        let b = registry.get_or_create(config("uploads")).await.unwrap();

        assert!(!Arc::ptr_eq(&a, &b));
        assert_eq!(created.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_failed_construction_is_retried() {
        let attempts = Arc::new(AtomicUsize::new(0));
        let counter = attempts.clone();
        let registry = FileSystemRegistry::with_factory(Arc::new(move |config: &BlobFsConfig| -> FsResult<Arc<dyn BlobClient>> {
            let client = MemoryBlobClient::without_container(config.container_name.clone());
            if counter.fetch_add(1, Ordering::SeqCst) == 0 {
                client.fail_next(crate::error::ErrorCode::ServerBusy);
            }
            let client: Arc<dyn BlobClient> = Arc::new(client);
            Ok(client)
        }));

        assert!(registry.get_or_create(config("media")).await.is_err());
        assert!(registry.get_or_create(config("media")).await.is_ok());
        assert_eq!(attempts.load(Ordering::SeqCst), 2);
    }
}
