//! Blob client speaking the Azure Blob Storage REST API.

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use bytes::Bytes;
use chrono::Utc;
use futures::StreamExt;
use md5::{Digest, Md5};
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use reqwest::{Method, Response, StatusCode};
use std::time::Duration;
use tracing::{debug, info, warn};
use url::Url;

use crate::auth::{append_sas_token, sign_request};
use crate::config::{BlobFsConfig, DEFAULT_API_VERSION};
use crate::connection::{Credentials, StorageAccount};
use crate::date::{format_http_date, parse_http_date};
use crate::error::{ErrorCode, FsError, FsResult, StorageError};
use crate::models::{BlobListing, BlobProperties, BlobType, ListBlobsRequest, PutBlobOptions};
use crate::path::encode_key;
use crate::xml::parse_blob_list;

use super::{BlobClient, ByteStream};

/// Options for [`HttpBlobClient`].
#[derive(Debug, Clone, Default)]
pub struct HttpClientOptions {
    /// Per-request timeout; `None` leaves requests unbounded.
    pub timeout: Option<Duration>,
}

/// Blob client for one container of a storage account.
pub struct HttpBlobClient {
    http: reqwest::Client,
    account: StorageAccount,
    container: String,
    container_url: Url,
}

impl HttpBlobClient {
    pub fn new(account: StorageAccount, container: impl Into<String>, options: HttpClientOptions) -> FsResult<Self> {
        let container = container.into();
        let container_url = Url::parse(&format!("{}/{}", account.blob_endpoint, container)).map_err(|e| {
            FsError::Configuration(format!("invalid container URL for '{}': {}", container, e))
        })?;

        let mut builder = reqwest::Client::builder();
        if let Some(timeout) = options.timeout {
            builder = builder.timeout(timeout);
        }

        Ok(Self {
            http: builder.build()?,
            account,
            container,
            container_url,
        })
    }

    /// Builds a client for the container and account a configuration names.
    pub fn from_config(config: &BlobFsConfig) -> FsResult<Self> {
        Self::new(
            config.connection.account(),
            config.container_name.clone(),
            HttpClientOptions::default(),
        )
    }

    fn blob_url(&self, name: &str) -> FsResult<Url> {
        Url::parse(&format!("{}/{}", self.container_url, encode_key(name)))
            .map_err(|_| FsError::invalid_path(name, "not representable in a URL"))
    }

    /// Adds the standard headers, authorizes, and sends.
    async fn send(
        &self,
        method: Method,
        mut url: Url,
        mut headers: HeaderMap,
        body: Option<Bytes>,
    ) -> FsResult<Response> {
        if let Credentials::Sas(ref token) = self.account.credentials {
            append_sas_token(&mut url, token);
        }

        headers.insert("x-ms-version", HeaderValue::from_static(DEFAULT_API_VERSION));
        headers.insert("x-ms-date", header_value(&format_http_date(&Utc::now()))?);
        headers.insert(
            "x-ms-client-request-id",
            header_value(&uuid::Uuid::new_v4().to_string())?,
        );
        let content_length = body.as_ref().map(|b| b.len()).unwrap_or(0);
        if method == Method::PUT {
            headers.insert(reqwest::header::CONTENT_LENGTH, header_value(&content_length.to_string())?);
        }

        let mut builder = self.http.request(method.clone(), url.clone()).headers(headers);
        if let Some(body) = body {
            builder = builder.body(body);
        }
        let mut request = builder.build()?;

        if let Credentials::SharedKey { ref account, ref key } = self.account.credentials {
            sign_request(&mut request, account, key)?;
        }

        debug!("{} {}", method, url.path());
        Ok(self.http.execute(request).await?)
    }

    /// Turns a non-success response into a service error.
    async fn error_from(response: Response) -> FsError {
        let status = response.status().as_u16();
        let headers = response.headers().clone();
        let code = headers.get("x-ms-error-code").and_then(|v| v.to_str().ok());
        let request_id = headers
            .get("x-ms-request-id")
            .and_then(|v| v.to_str().ok())
            .map(String::from);
        let body = response.text().await.unwrap_or_default();

        let mut error = StorageError::from_response(status, code, &body);
        if let Some(id) = request_id {
            error = error.with_request_id(id);
        }
        warn!("Blob service returned {}: {}", status, error);
        FsError::Storage(error)
    }

    /// Maps a missing-resource status on a blob request to `BlobNotFound`.
    ///
    /// HEAD responses carry no body, so a bare 404 has no error code.
    async fn blob_error_from(response: Response) -> FsError {
        let bare_404 = response.status() == StatusCode::NOT_FOUND
            && !response.headers().contains_key("x-ms-error-code");
        if bare_404 {
            return StorageError::new(ErrorCode::BlobNotFound).into();
        }
        Self::error_from(response).await
    }
}

fn header_value(value: &str) -> FsResult<HeaderValue> {
    HeaderValue::from_str(value).map_err(|_| {
        FsError::Storage(StorageError::with_message(
            ErrorCode::InvalidHeaderValue,
            format!("invalid header value '{}'", value),
        ))
    })
}

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|v| v.to_str().ok())
}

/// Reads blob properties from Get Blob Properties response headers.
fn properties_from_headers(headers: &HeaderMap) -> BlobProperties {
    let mut props = BlobProperties::new(
        header_str(headers, "content-length")
            .and_then(|v| v.parse().ok())
            .unwrap_or(0),
    );
    props.content_type = header_str(headers, "content-type").map(String::from);
    props.content_md5 = header_str(headers, "content-md5").map(String::from);
    props.cache_control = header_str(headers, "cache-control").map(String::from);
    props.etag = header_str(headers, "etag").unwrap_or_default().to_string();
    if let Some(dt) = header_str(headers, "last-modified").and_then(parse_http_date) {
        props.last_modified = dt;
    }
    // Fall back to Last-Modified when the service predates x-ms-creation-time.
    props.created_on = header_str(headers, "x-ms-creation-time")
        .and_then(parse_http_date)
        .unwrap_or(props.last_modified);
    props.blob_type = header_str(headers, "x-ms-blob-type")
        .and_then(BlobType::from_str)
        .unwrap_or_default();
    props
}

#[async_trait]
impl BlobClient for HttpBlobClient {
    fn container(&self) -> &str {
        &self.container
    }

    fn container_url(&self) -> String {
        self.container_url.as_str().trim_end_matches('/').to_string()
    }

    async fn create_container_if_not_exists(&self) -> FsResult<()> {
        let mut url = self.container_url.clone();
        url.set_query(Some("restype=container"));

        let mut headers = HeaderMap::new();
        headers.insert("x-ms-blob-public-access", HeaderValue::from_static("blob"));

        let response = self.send(Method::PUT, url, headers, Some(Bytes::new())).await?;
        match response.status() {
            StatusCode::CREATED => {
                info!("Created container {}", self.container);
                Ok(())
            }
            StatusCode::CONFLICT => {
                let err = Self::error_from(response).await;
                match err.storage_code() {
                    Some(ErrorCode::ContainerAlreadyExists) | Some(ErrorCode::ResourceAlreadyExists) => Ok(()),
                    _ => Err(err),
                }
            }
            _ => Err(Self::error_from(response).await),
        }
    }

    async fn put_blob(&self, name: &str, data: Bytes, options: &PutBlobOptions) -> FsResult<()> {
        let url = self.blob_url(name)?;

        let mut headers = HeaderMap::new();
        headers.insert("x-ms-blob-type", HeaderValue::from_static(BlobType::BlockBlob.as_str()));
        headers.insert("content-md5", header_value(&BASE64.encode(Md5::digest(&data)))?);
        if let Some(ref ct) = options.content_type {
            headers.insert("x-ms-blob-content-type", header_value(ct)?);
        }
        if let Some(ref cc) = options.cache_control {
            headers.insert("x-ms-blob-cache-control", header_value(cc)?);
        }
        if !options.overwrite {
            headers.insert(reqwest::header::IF_NONE_MATCH, HeaderValue::from_static("*"));
        }

        let response = self.send(Method::PUT, url, headers, Some(data)).await?;
        if response.status().is_success() {
            return Ok(());
        }

        let err = Self::error_from(response).await;
        if !options.overwrite && err.storage_code().map(|c| c.is_already_exists()).unwrap_or(false) {
            return Err(StorageError::new(ErrorCode::BlobAlreadyExists).into());
        }
        Err(err)
    }

    async fn get_blob(&self, name: &str) -> FsResult<ByteStream> {
        let url = self.blob_url(name)?;
        let response = self.send(Method::GET, url, HeaderMap::new(), None).await?;
        if !response.status().is_success() {
            return Err(Self::blob_error_from(response).await);
        }
        Ok(response
            .bytes_stream()
            .map(|chunk| chunk.map_err(FsError::from))
            .boxed())
    }

    async fn get_properties(&self, name: &str) -> FsResult<BlobProperties> {
        let url = self.blob_url(name)?;
        let response = self.send(Method::HEAD, url, HeaderMap::new(), None).await?;
        if !response.status().is_success() {
            return Err(Self::blob_error_from(response).await);
        }
        Ok(properties_from_headers(response.headers()))
    }

    async fn delete_blob(&self, name: &str) -> FsResult<()> {
        let url = self.blob_url(name)?;
        let mut headers = HeaderMap::new();
        headers.insert(
            HeaderName::from_static("x-ms-delete-snapshots"),
            HeaderValue::from_static("include"),
        );
        let response = self.send(Method::DELETE, url, headers, None).await?;
        if response.status().is_success() {
            Ok(())
        } else {
            Err(Self::blob_error_from(response).await)
        }
    }

    async fn list_blobs(&self, request: &ListBlobsRequest) -> FsResult<BlobListing> {
        let mut url = self.container_url.clone();
        {
            let mut query = url.query_pairs_mut();
            query.append_pair("restype", "container");
            query.append_pair("comp", "list");
            if let Some(ref prefix) = request.prefix {
                query.append_pair("prefix", prefix);
            }
            if let Some(ref delimiter) = request.delimiter {
                query.append_pair("delimiter", delimiter);
            }
            if let Some(ref marker) = request.marker {
                query.append_pair("marker", marker);
            }
            if let Some(maxresults) = request.maxresults {
                query.append_pair("maxresults", &maxresults.to_string());
            }
        }

        let response = self.send(Method::GET, url, HeaderMap::new(), None).await?;
        if !response.status().is_success() {
            return Err(Self::error_from(response).await);
        }
        let body = response.text().await?;
        Ok(parse_blob_list(&body)?)
    }
}
