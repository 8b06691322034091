//! Common test utilities.
//!
//! [`TestServer`] is a minimal Blob REST endpoint: it checks SharedKey signatures and keeps
//! one account's containers in [`MemoryBlobClient`]s.

#![allow(dead_code)]

use axum::body::{Body, Bytes};
use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, HeaderValue, Method, StatusCode, Uri};
use axum::response::{IntoResponse, Response};
use axum::routing::any;
use axum::Router;
use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use futures::TryStreamExt;
use hmac::{Hmac, Mac};
use parking_lot::Mutex;
use sha2::Sha256;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::net::TcpListener;

use blobfs::auth::build_string_to_sign;
use blobfs::date::format_http_date;
use blobfs::models::{BlobListing, ListBlobsRequest, PutBlobOptions};
use blobfs::{BlobClient, ErrorCode, FsError, MemoryBlobClient, DEFAULT_ACCOUNT, DEFAULT_ACCOUNT_KEY};

/// A request as the stub saw it.
#[derive(Debug, Clone)]
pub struct RecordedRequest {
    pub method: Method,
    pub path: String,
    pub query: HashMap<String, String>,
    pub headers: HeaderMap,
}

#[derive(Clone)]
struct StubState {
    base_url: String,
    containers: Arc<Mutex<HashMap<String, Arc<MemoryBlobClient>>>>,
    requests: Arc<Mutex<Vec<RecordedRequest>>>,
}

/// Test server wrapper.
pub struct TestServer {
    pub base_url: String,
    pub account: String,
    pub key: String,
    state: StubState,
}

impl TestServer {
    /// Creates and starts a test server on a random port.
    pub async fn start() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let base_url = format!("http://127.0.0.1:{}", port);

        let state = StubState {
            base_url: base_url.clone(),
            containers: Arc::new(Mutex::new(HashMap::new())),
            requests: Arc::new(Mutex::new(Vec::new())),
        };

        let app = Router::new()
            .route("/:account/:container", any(container_handler))
            .route("/:account/:container/*blob", any(blob_handler))
            .with_state(state.clone());

        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        Self {
            base_url,
            account: DEFAULT_ACCOUNT.to_string(),
            key: DEFAULT_ACCOUNT_KEY.to_string(),
            state,
        }
    }

    /// Connection string addressing this server with the default account key.
    pub fn connection_string(&self) -> String {
        format!(
            "DefaultEndpointsProtocol=http;AccountName={};AccountKey={};BlobEndpoint={}/{};",
            self.account, self.key, self.base_url, self.account
        )
    }

    /// Returns the URL for a container.
    pub fn container_url(&self, container: &str) -> String {
        format!("{}/{}/{}", self.base_url, self.account, container)
    }

    /// Direct access to a container's contents, if it has been created.
    pub fn container(&self, name: &str) -> Option<Arc<MemoryBlobClient>> {
        self.state.containers.lock().get(name).cloned()
    }

    /// Every request received so far.
    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.state.requests.lock().clone()
    }

    /// The most recent request with `method`.
    pub fn last_request(&self, method: Method) -> Option<RecordedRequest> {
        self.requests().into_iter().rev().find(|r| r.method == method)
    }
}

fn error_response(status: StatusCode, code: ErrorCode) -> Response {
    let body = format!(
        "<?xml version=\"1.0\" encoding=\"utf-8\"?><Error><Code>{}</Code><Message>{}</Message></Error>",
        code.as_str(),
        code.default_message()
    );
    let mut response = (status, body).into_response();
    response
        .headers_mut()
        .insert("x-ms-error-code", HeaderValue::from_static(code.as_str()));
    response
}

fn storage_error_response(err: FsError) -> Response {
    match err.storage_code() {
        Some(ErrorCode::BlobAlreadyExists) => {
            error_response(StatusCode::CONFLICT, ErrorCode::BlobAlreadyExists)
        }
        Some(code) if code.is_not_found() => error_response(StatusCode::NOT_FOUND, code),
        Some(ErrorCode::ContainerNotFound) => {
            error_response(StatusCode::NOT_FOUND, ErrorCode::ContainerNotFound)
        }
        Some(code) => error_response(StatusCode::SERVICE_UNAVAILABLE, code),
        None => error_response(StatusCode::INTERNAL_SERVER_ERROR, ErrorCode::InternalError),
    }
}

/// Records the request and checks its SharedKey signature.
fn authorize(
    state: &StubState,
    method: &Method,
    uri: &Uri,
    query: &HashMap<String, String>,
    headers: &HeaderMap,
) -> Result<(), Response> {
    state.requests.lock().push(RecordedRequest {
        method: method.clone(),
        path: uri.path().to_string(),
        query: query.clone(),
        headers: headers.clone(),
    });

    let url = url::Url::parse(&format!("{}{}", state.base_url, uri)).unwrap();
    let string_to_sign = build_string_to_sign(method, &url, headers, DEFAULT_ACCOUNT);
    let key = BASE64.decode(DEFAULT_ACCOUNT_KEY).unwrap();
    let mut mac = Hmac::<Sha256>::new_from_slice(&key).unwrap();
    mac.update(string_to_sign.as_bytes());
    let expected = format!(
        "SharedKey {}:{}",
        DEFAULT_ACCOUNT,
        BASE64.encode(mac.finalize().into_bytes())
    );

    let actual = headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .unwrap_or("");
    if actual == expected {
        Ok(())
    } else {
        Err(error_response(StatusCode::FORBIDDEN, ErrorCode::AuthenticationFailed))
    }
}

async fn container_handler(
    State(state): State<StubState>,
    Path((_account, container)): Path<(String, String)>,
    Query(query): Query<HashMap<String, String>>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
) -> Response {
    if let Err(response) = authorize(&state, &method, &uri, &query, &headers) {
        return response;
    }

    match (method, query.get("comp").map(String::as_str)) {
        (Method::PUT, None) => {
            let mut containers = state.containers.lock();
            if containers.contains_key(&container) {
                return error_response(StatusCode::CONFLICT, ErrorCode::ContainerAlreadyExists);
            }
            let base = format!("{}/{}", state.base_url, DEFAULT_ACCOUNT);
            containers.insert(
                container.clone(),
                Arc::new(MemoryBlobClient::with_base_url(container, base)),
            );
            StatusCode::CREATED.into_response()
        }
        (Method::GET, Some("list")) => {
            let client = match state.containers.lock().get(&container).cloned() {
                Some(client) => client,
                None => return error_response(StatusCode::NOT_FOUND, ErrorCode::ContainerNotFound),
            };
            let request = ListBlobsRequest {
                prefix: query.get("prefix").cloned(),
                delimiter: query.get("delimiter").cloned(),
                marker: query.get("marker").cloned(),
                maxresults: query.get("maxresults").and_then(|v| v.parse().ok()),
            };
            match client.list_blobs(&request).await {
                Ok(listing) => (
                    StatusCode::OK,
                    [("content-type", "application/xml")],
                    serialize_listing(&container, &request, &listing),
                )
                    .into_response(),
                Err(e) => storage_error_response(e),
            }
        }
        _ => error_response(StatusCode::BAD_REQUEST, ErrorCode::InvalidQueryParameterValue),
    }
}

async fn blob_handler(
    State(state): State<StubState>,
    Path((_account, container, blob)): Path<(String, String, String)>,
    Query(query): Query<HashMap<String, String>>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    if let Err(response) = authorize(&state, &method, &uri, &query, &headers) {
        return response;
    }

    let client = match state.containers.lock().get(&container).cloned() {
        Some(client) => client,
        None => return error_response(StatusCode::NOT_FOUND, ErrorCode::ContainerNotFound),
    };
    let header = |name: &str| headers.get(name).and_then(|v| v.to_str().ok()).map(String::from);

    match method {
        Method::PUT => {
            let options = PutBlobOptions {
                content_type: header("x-ms-blob-content-type"),
                cache_control: header("x-ms-blob-cache-control"),
                overwrite: header("if-none-match").as_deref() != Some("*"),
            };
            match client.put_blob(&blob, body, &options).await {
                Ok(()) => StatusCode::CREATED.into_response(),
                Err(e) => storage_error_response(e),
            }
        }
        Method::GET => match client.get_blob(&blob).await {
            Ok(stream) => {
                let chunks: Vec<Bytes> = stream.try_collect().await.unwrap_or_default();
                (StatusCode::OK, Body::from(chunks.concat())).into_response()
            }
            Err(e) => storage_error_response(e),
        },
        // HEAD errors carry no body and no error code header, as with the real service.
        Method::HEAD => match client.get_properties(&blob).await {
            Ok(props) => {
                let mut response = StatusCode::OK.into_response();
                let out = response.headers_mut();
                if let Some(ct) = props.content_type {
                    out.insert("content-type", HeaderValue::from_str(&ct).unwrap());
                }
                if let Some(cc) = props.cache_control {
                    out.insert("cache-control", HeaderValue::from_str(&cc).unwrap());
                }
                out.insert("etag", HeaderValue::from_str(&props.etag).unwrap());
                out.insert(
                    "last-modified",
                    HeaderValue::from_str(&format_http_date(&props.last_modified)).unwrap(),
                );
                out.insert(
                    "x-ms-creation-time",
                    HeaderValue::from_str(&format_http_date(&props.created_on)).unwrap(),
                );
                out.insert("x-ms-blob-type", HeaderValue::from_static("BlockBlob"));
                response
            }
            Err(_) => StatusCode::NOT_FOUND.into_response(),
        },
        Method::DELETE => match client.delete_blob(&blob).await {
            Ok(()) => StatusCode::ACCEPTED.into_response(),
            Err(e) => storage_error_response(e),
        },
        _ => error_response(StatusCode::METHOD_NOT_ALLOWED, ErrorCode::InvalidInput),
    }
}

fn xml_escape(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}

fn serialize_listing(container: &str, request: &ListBlobsRequest, listing: &BlobListing) -> String {
    let mut xml = String::from("<?xml version=\"1.0\" encoding=\"utf-8\"?>");
    xml.push_str(&format!(
        "<EnumerationResults ContainerName=\"{}\">",
        xml_escape(container)
    ));
    if let Some(ref prefix) = request.prefix {
        xml.push_str(&format!("<Prefix>{}</Prefix>", xml_escape(prefix)));
    }
    if let Some(ref delimiter) = request.delimiter {
        xml.push_str(&format!("<Delimiter>{}</Delimiter>", xml_escape(delimiter)));
    }
    xml.push_str("<Blobs>");
    for blob in &listing.blobs {
        let p = &blob.properties;
        xml.push_str("<Blob>");
        xml.push_str(&format!("<Name>{}</Name>", xml_escape(&blob.name)));
        xml.push_str("<Properties>");
        xml.push_str(&format!(
            "<Creation-Time>{}</Creation-Time>",
            format_http_date(&p.created_on)
        ));
        xml.push_str(&format!(
            "<Last-Modified>{}</Last-Modified>",
            format_http_date(&p.last_modified)
        ));
        xml.push_str(&format!("<Etag>{}</Etag>", xml_escape(&p.etag)));
        xml.push_str(&format!("<Content-Length>{}</Content-Length>", p.content_length));
        if let Some(ref ct) = p.content_type {
            xml.push_str(&format!("<Content-Type>{}</Content-Type>", xml_escape(ct)));
        }
        xml.push_str("<BlobType>BlockBlob</BlobType>");
        xml.push_str("</Properties></Blob>");
    }
    for prefix in &listing.prefixes {
        xml.push_str(&format!(
            "<BlobPrefix><Name>{}</Name></BlobPrefix>",
            xml_escape(prefix)
        ));
    }
    xml.push_str("</Blobs>");
    match listing.next_marker {
        Some(ref marker) => xml.push_str(&format!("<NextMarker>{}</NextMarker>", xml_escape(marker))),
        None => xml.push_str("<NextMarker />"),
    }
    xml.push_str("</EnumerationResults>");
    xml
}
