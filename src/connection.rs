//! Azure Storage connection string parsing.

use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use std::fmt;

use crate::config::{DEFAULT_ACCOUNT, DEFAULT_ACCOUNT_KEY, DEFAULT_BLOB_PORT};
use crate::error::{FsError, FsResult};

/// Connection string that selects the local storage emulator.
pub const DEV_STORAGE_SENTINEL: &str = "UseDevelopmentStorage=true";

/// Endpoint suffix used when a connection string names none.
pub const DEFAULT_ENDPOINT_SUFFIX: &str = "core.windows.net";

/// How requests to the account are authorized.
#[derive(Clone, PartialEq, Eq, Hash)]
pub enum Credentials {
    /// SharedKey signing with the base64 account key.
    SharedKey { account: String, key: String },
    /// Pre-signed SAS token appended to every request (without leading `?`).
    Sas(String),
    /// Public, unauthenticated access.
    Anonymous,
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Credentials::SharedKey { account, .. } => f
                .debug_struct("SharedKey")
                .field("account", account)
                .field("key", &"<redacted>")
                .finish(),
            Credentials::Sas(_) => f.write_str("Sas(<redacted>)"),
            Credentials::Anonymous => f.write_str("Anonymous"),
        }
    }
}

/// A storage account resolved from a connection string.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct StorageAccount {
    /// Account name, if the connection string named one.
    pub account_name: Option<String>,
    /// Blob service endpoint without trailing slash.
    pub blob_endpoint: String,
    pub credentials: Credentials,
}

impl StorageAccount {
    /// The well-known account served by a local emulator.
    pub fn development() -> Self {
        Self {
            account_name: Some(DEFAULT_ACCOUNT.to_string()),
            blob_endpoint: format!("http://127.0.0.1:{}/{}", DEFAULT_BLOB_PORT, DEFAULT_ACCOUNT),
            credentials: Credentials::SharedKey {
                account: DEFAULT_ACCOUNT.to_string(),
                key: DEFAULT_ACCOUNT_KEY.to_string(),
            },
        }
    }

    /// Parses a `Key=Value;Key=Value` connection string.
    pub fn parse(connection_string: &str) -> FsResult<Self> {
        let mut protocol = None;
        let mut account_name = None;
        let mut account_key = None;
        let mut blob_endpoint = None;
        let mut endpoint_suffix = None;
        let mut sas = None;

        for part in connection_string.split(';') {
            let part = part.trim();
            if part.is_empty() {
                continue;
            }
            // Values such as base64 keys and SAS tokens may contain '='.
            let (key, value) = part.split_once('=').ok_or_else(|| {
                FsError::Configuration(format!("malformed connection string segment '{}'", redact(part)))
            })?;
            let value = value.trim().to_string();
            match key.trim().to_ascii_lowercase().as_str() {
                "defaultendpointsprotocol" => protocol = Some(value),
                "accountname" => account_name = Some(value),
                "accountkey" => account_key = Some(value),
                "blobendpoint" => blob_endpoint = Some(value),
                "endpointsuffix" => endpoint_suffix = Some(value),
                "sharedaccesssignature" => sas = Some(value),
                "usedevelopmentstorage" if value.eq_ignore_ascii_case("true") => {
                    return Ok(Self::development());
                }
                other => {
                    tracing::debug!("Ignoring connection string key '{}'", other);
                }
            }
        }

        let blob_endpoint = match (blob_endpoint, &account_name) {
            (Some(endpoint), _) => endpoint.trim_end_matches('/').to_string(),
            (None, Some(account)) => format!(
                "{}://{}.blob.{}",
                protocol.as_deref().unwrap_or("https"),
                account,
                endpoint_suffix.as_deref().unwrap_or(DEFAULT_ENDPOINT_SUFFIX)
            ),
            (None, None) => {
                return Err(FsError::Configuration(
                    "connection string names neither AccountName nor BlobEndpoint".to_string(),
                ))
            }
        };

        url::Url::parse(&blob_endpoint).map_err(|e| {
            FsError::Configuration(format!("invalid blob endpoint '{}': {}", blob_endpoint, e))
        })?;

        let credentials = match (account_key, sas, &account_name) {
            (Some(key), _, Some(account)) => {
                BASE64.decode(&key).map_err(|_| {
                    FsError::Configuration("AccountKey is not valid base64".to_string())
                })?;
                Credentials::SharedKey {
                    account: account.clone(),
                    key,
                }
            }
            (Some(_), _, None) => {
                return Err(FsError::Configuration(
                    "AccountKey requires AccountName".to_string(),
                ))
            }
            (None, Some(token), _) => Credentials::Sas(token.trim_start_matches('?').to_string()),
            (None, None, _) => Credentials::Anonymous,
        };

        Ok(Self {
            account_name,
            blob_endpoint,
            credentials,
        })
    }
}

/// Returns true if `connection_string` selects the local emulator.
pub fn is_dev_storage(connection_string: &str) -> bool {
    connection_string.trim().eq_ignore_ascii_case(DEV_STORAGE_SENTINEL)
}

fn redact(segment: &str) -> String {
    match segment.split_once('=') {
        Some((key, _)) => format!("{}=...", key),
        None => segment.chars().take(16).collect(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dev_storage_sentinel_is_case_insensitive() {
        assert!(is_dev_storage("UseDevelopmentStorage=true"));
        assert!(is_dev_storage("  usedevelopmentstorage=TRUE "));
        assert!(!is_dev_storage("UseDevelopmentStorage=false"));
    }

    #[test]
    fn test_parse_account_key_connection_string() {
        let cs = format!(
            "DefaultEndpointsProtocol=https;AccountName=myaccount;AccountKey={};EndpointSuffix=core.windows.net",
            DEFAULT_ACCOUNT_KEY
        );
        let account = StorageAccount::parse(&cs).unwrap();
        assert_eq!(account.blob_endpoint, "https://myaccount.blob.core.windows.net");
        assert_eq!(account.account_name.as_deref(), Some("myaccount"));
        assert!(matches!(account.credentials, Credentials::SharedKey { .. }));
    }

    #[test]
    fn test_parse_explicit_blob_endpoint() {
        let cs = format!(
            "DefaultEndpointsProtocol=http;AccountName=devstoreaccount1;AccountKey={};BlobEndpoint=http://127.0.0.1:10000/devstoreaccount1/;",
            DEFAULT_ACCOUNT_KEY
        );
        let account = StorageAccount::parse(&cs).unwrap();
        assert_eq!(account.blob_endpoint, "http://127.0.0.1:10000/devstoreaccount1");
        assert_eq!(account, StorageAccount::development());
    }

    #[test]
    fn test_parse_sas_connection_string() {
        let cs = "BlobEndpoint=https://acct.blob.core.windows.net;SharedAccessSignature=?sv=2021-10-04&sig=abc%3D";
        let account = StorageAccount::parse(cs).unwrap();
        assert_eq!(
            account.credentials,
            Credentials::Sas("sv=2021-10-04&sig=abc%3D".to_string())
        );
    }

    #[test]
    fn test_parse_rejects_incomplete_strings() {
        assert!(matches!(
            StorageAccount::parse("DefaultEndpointsProtocol=https"),
            Err(FsError::Configuration(_))
        ));
        assert!(matches!(
            StorageAccount::parse("AccountName=a;AccountKey=not base64!"),
            Err(FsError::Configuration(_))
        ));
        assert!(matches!(
            StorageAccount::parse("garbage"),
            Err(FsError::Configuration(_))
        ));
    }

    #[test]
    fn test_debug_redacts_key() {
        let rendered = format!("{:?}", StorageAccount::development());
        assert!(!rendered.contains(DEFAULT_ACCOUNT_KEY));
        assert!(rendered.contains("<redacted>"));
    }
}
