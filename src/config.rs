//! Configuration resolution.
//!
//! Raw string inputs come from an injected [`ConfigSource`] and are normalized into an
//! immutable [`BlobFsConfig`]. Resolution never touches the network.

use clap::Parser;
use std::collections::HashMap;

use crate::cli::Command;
use crate::connection::{is_dev_storage, StorageAccount};
use crate::error::{FsError, FsResult};

/// Default account name for development storage.
pub const DEFAULT_ACCOUNT: &str = "devstoreaccount1";

/// Default account key for development storage (base64 encoded).
pub const DEFAULT_ACCOUNT_KEY: &str =
    "Eby8vdM02xNOcqFlqUwJPLlmEtlCDXJ1OUzFT50uSRZ6IFsuFq2UVErCz4I6tq/K1SZFPTOtr/KBHBeksoGMGw==";

/// Default blob service port of the local emulator.
pub const DEFAULT_BLOB_PORT: u16 = 10000;

/// API version sent with every request.
pub const DEFAULT_API_VERSION: &str = "2021-10-04";

/// Container used when none is configured.
pub const DEFAULT_CONTAINER: &str = "media";

/// Client cache lifetime used when none is configured.
pub const DEFAULT_MAX_DAYS: u32 = 365;

/// Configuration keys understood by [`BlobFsConfig::from_source`].
pub mod keys {
    pub const CONNECTION_STRING: &str = "connection_string";
    pub const CONTAINER_NAME: &str = "container_name";
    pub const MAX_DAYS: &str = "max_days";
    pub const DISABLE_VIRTUAL_PATH: &str = "disable_virtual_path";
}

/// String-keyed configuration lookup supplied by the host.
pub trait ConfigSource: Send + Sync {
    fn get(&self, key: &str) -> Option<String>;
}

/// In-memory configuration.
#[derive(Debug, Clone, Default)]
pub struct MapConfigSource {
    values: HashMap<String, String>,
}

impl MapConfigSource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a value, replacing any previous one.
    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.values.insert(key.into(), value.into());
        self
    }

    pub fn set(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.values.insert(key.into(), value.into());
    }
}

impl ConfigSource for MapConfigSource {
    fn get(&self, key: &str) -> Option<String> {
        self.values.get(key).cloned()
    }
}

impl ConfigSource for HashMap<String, String> {
    fn get(&self, key: &str) -> Option<String> {
        HashMap::get(self, key).cloned()
    }
}

/// Reads `{PREFIX}{KEY}` environment variables, e.g. `BLOBFS_CONNECTION_STRING`.
#[derive(Debug, Clone)]
pub struct EnvConfigSource {
    prefix: String,
}

impl EnvConfigSource {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
        }
    }

    fn var_name(&self, key: &str) -> String {
        format!("{}{}", self.prefix, key.to_ascii_uppercase())
    }
}

impl Default for EnvConfigSource {
    fn default() -> Self {
        Self::new("BLOBFS_")
    }
}

impl ConfigSource for EnvConfigSource {
    fn get(&self, key: &str) -> Option<String> {
        std::env::var(self.var_name(key)).ok()
    }
}

/// Consults each source in order; the first one holding a key wins.
pub struct LayeredConfigSource {
    layers: Vec<Box<dyn ConfigSource>>,
}

impl LayeredConfigSource {
    pub fn new() -> Self {
        Self { layers: Vec::new() }
    }

    /// Appends a lower-priority layer.
    pub fn layer(mut self, source: impl ConfigSource + 'static) -> Self {
        self.layers.push(Box::new(source));
        self
    }
}

impl Default for LayeredConfigSource {
    fn default() -> Self {
        Self::new()
    }
}

impl ConfigSource for LayeredConfigSource {
    fn get(&self, key: &str) -> Option<String> {
        self.layers.iter().find_map(|layer| layer.get(key))
    }
}

/// Where the storage account lives.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ConnectionEndpoint {
    /// The local emulator selected by the development-storage sentinel.
    DevelopmentStorage,
    /// A remote (or explicitly addressed) account.
    Account(StorageAccount),
}

impl ConnectionEndpoint {
    /// Resolves the account the endpoint addresses.
    pub fn account(&self) -> StorageAccount {
        match self {
            ConnectionEndpoint::DevelopmentStorage => StorageAccount::development(),
            ConnectionEndpoint::Account(account) => account.clone(),
        }
    }
}

/// Validated, normalized configuration of one blob file system.
///
/// Equal raw inputs always produce equal records, which makes the record usable as the
/// identity of a [`crate::registry::FileSystemRegistry`] entry.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct BlobFsConfig {
    pub container_name: String,
    pub connection: ConnectionEndpoint,
    pub cache_max_days: u32,
    pub use_local_emulator: bool,
    pub virtual_path_disabled: bool,
}

impl BlobFsConfig {
    /// Resolves raw configuration values.
    ///
    /// Fails when the connection string is absent or blank, when the container name is not
    /// a valid container name, or when `max_days` is negative.
    pub fn resolve(
        container_name: Option<&str>,
        connection_string: Option<&str>,
        max_days: Option<&str>,
        virtual_path_disabled: Option<&str>,
    ) -> FsResult<Self> {
        let connection_string = connection_string
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .ok_or_else(|| FsError::Configuration("connection string is required".to_string()))?;

        let use_local_emulator = is_dev_storage(connection_string);
        let connection = if use_local_emulator {
            ConnectionEndpoint::DevelopmentStorage
        } else {
            ConnectionEndpoint::Account(StorageAccount::parse(connection_string)?)
        };

        let container_name = match container_name.map(str::trim).filter(|s| !s.is_empty()) {
            Some(name) => {
                validate_container_name(name)?;
                name.to_string()
            }
            None => DEFAULT_CONTAINER.to_string(),
        };

        Ok(Self {
            container_name,
            connection,
            cache_max_days: parse_max_days(max_days)?,
            use_local_emulator,
            virtual_path_disabled: parse_flag(virtual_path_disabled),
        })
    }

    /// Resolves configuration from a host-supplied source.
    pub fn from_source(source: &dyn ConfigSource) -> FsResult<Self> {
        let container = source.get(keys::CONTAINER_NAME);
        let connection = source.get(keys::CONNECTION_STRING);
        let max_days = source.get(keys::MAX_DAYS);
        let disable = source.get(keys::DISABLE_VIRTUAL_PATH);
        Self::resolve(
            container.as_deref(),
            connection.as_deref(),
            max_days.as_deref(),
            disable.as_deref(),
        )
    }

    /// `Cache-Control` value attached to uploaded content.
    pub fn cache_control(&self) -> String {
        format!("public, max-age={}", u64::from(self.cache_max_days) * 86_400)
    }
}

fn parse_max_days(value: Option<&str>) -> FsResult<u32> {
    let value = match value.map(str::trim).filter(|s| !s.is_empty()) {
        Some(v) => v,
        None => return Ok(DEFAULT_MAX_DAYS),
    };
    if let Some(magnitude) = value.strip_prefix('-') {
        if !magnitude.is_empty() && magnitude.bytes().all(|b| b.is_ascii_digit()) {
            if magnitude.bytes().all(|b| b == b'0') {
                return Ok(0);
            }
            return Err(FsError::Configuration(format!(
                "max days must not be negative, got {}",
                value
            )));
        }
    }
    match value.parse::<u32>() {
        Ok(days) => Ok(days),
        Err(_) => {
            tracing::debug!("Unusable max days '{}', using {}", value, DEFAULT_MAX_DAYS);
            Ok(DEFAULT_MAX_DAYS)
        }
    }
}

fn parse_flag(value: Option<&str>) -> bool {
    value
        .map(|v| matches!(v.trim().to_ascii_lowercase().as_str(), "true" | "1" | "yes"))
        .unwrap_or(false)
}

/// Azure container names: 3-63 chars of lowercase letters, digits and single hyphens,
/// starting and ending with a letter or digit. `$root` and `$web` are reserved names.
fn validate_container_name(name: &str) -> FsResult<()> {
    if name == "$root" || name == "$web" {
        return Ok(());
    }
    let valid_chars = name
        .chars()
        .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-');
    let valid = (3..=63).contains(&name.len())
        && valid_chars
        && !name.starts_with('-')
        && !name.ends_with('-')
        && !name.contains("--");
    if valid {
        Ok(())
    } else {
        Err(FsError::Configuration(format!(
            "invalid container name '{}'",
            name
        )))
    }
}

/// Command-line arguments for the `blobfs` tool.
#[derive(Parser, Debug, Clone)]
#[command(name = "blobfs")]
#[command(about = "Path-based file operations over Azure Blob Storage")]
#[command(version)]
pub struct Args {
    /// Storage connection string (overrides BLOBFS_CONNECTION_STRING).
    #[arg(long, global = true)]
    pub connection_string: Option<String>,

    /// Container name (overrides BLOBFS_CONTAINER_NAME).
    #[arg(long, short = 'c', global = true)]
    pub container: Option<String>,

    /// Client cache lifetime in days (overrides BLOBFS_MAX_DAYS).
    #[arg(long, global = true)]
    pub max_days: Option<String>,

    /// Produce absolute URLs even when a virtual-path layer is present.
    #[arg(long, global = true)]
    pub disable_virtual_path: bool,

    /// Enable debug logging.
    #[arg(long, short = 'd', global = true)]
    pub debug: bool,

    /// Enable silent mode (minimal logging).
    #[arg(long, short = 's', global = true)]
    pub silent: bool,

    #[command(subcommand)]
    pub command: Command,
}

impl Args {
    /// Command-line values as the highest-priority configuration layer.
    pub fn config_overrides(&self) -> MapConfigSource {
        let mut source = MapConfigSource::new();
        if let Some(ref cs) = self.connection_string {
            source.set(keys::CONNECTION_STRING, cs.clone());
        }
        if let Some(ref container) = self.container {
            source.set(keys::CONTAINER_NAME, container.clone());
        }
        if let Some(ref days) = self.max_days {
            source.set(keys::MAX_DAYS, days.clone());
        }
        if self.disable_virtual_path {
            source.set(keys::DISABLE_VIRTUAL_PATH, "true");
        }
        source
    }
}
