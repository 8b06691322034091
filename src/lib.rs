//! blobfs: path-based file operations over Azure Blob Storage.
//!
//! Hierarchical paths map onto a flat blob key space; directories are emulated from key
//! prefixes. Instances are shared per configuration through a [`FileSystemRegistry`].
//!
//! # Example
//!
//! ```no_run
//! use blobfs::{FileSystem, FileSystemRegistry, MapConfigSource};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), blobfs::FsError> {
//!     let source = MapConfigSource::new()
//!         .with("connection_string", "UseDevelopmentStorage=true")
//!         .with("container_name", "media");
//!     let fs = FileSystemRegistry::new().from_source(&source).await?;
//!     fs.add_file("images/logo.png", bytes::Bytes::from_static(b"..."), true).await?;
//!     println!("{}", fs.get_url("images/logo.png")?);
//!     Ok(())
//! }
//! ```

pub mod auth;
pub mod cli;
pub mod config;
pub mod connection;
pub mod date;
pub mod error;
pub mod fs;
pub mod models;
pub mod path;
pub mod registry;
pub mod storage;
pub mod xml;

// Re-exports for convenience
pub use config::{
    Args, BlobFsConfig, ConfigSource, EnvConfigSource, LayeredConfigSource, MapConfigSource,
    DEFAULT_ACCOUNT, DEFAULT_ACCOUNT_KEY, DEFAULT_BLOB_PORT,
};
pub use connection::{Credentials, StorageAccount};
pub use error::{ErrorCode, FsError, FsResult, StorageError, StorageResult};
pub use fs::{BlobFileSystem, FileSystem, PathStream};
pub use models::FileInfo;
pub use registry::FileSystemRegistry;
pub use storage::{BlobClient, ByteStream, HttpBlobClient, MemoryBlobClient};
