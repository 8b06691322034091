//! SharedKey request signing for the Azure Blob Storage API.

use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use hmac::{Hmac, Mac};
use http::{HeaderMap, HeaderValue, Method};
use sha2::Sha256;
use std::collections::BTreeMap;
use url::Url;

use crate::error::{FsError, FsResult};

type HmacSha256 = Hmac<Sha256>;

/// Signs `request` in place by adding a `SharedKey` Authorization header.
///
/// Must run after every `x-ms-*` and content header has been set.
pub fn sign_request(request: &mut reqwest::Request, account: &str, account_key: &str) -> FsResult<()> {
    let string_to_sign =
        build_string_to_sign(request.method(), request.url(), request.headers(), account);
    let signature = compute_signature(&string_to_sign, account_key)?;

    let value = HeaderValue::from_str(&format!("SharedKey {}:{}", account, signature))
        .map_err(|_| FsError::Configuration("account name is not a valid header value".to_string()))?;
    request.headers_mut().insert(http::header::AUTHORIZATION, value);
    Ok(())
}

/// Builds the string-to-sign for SharedKey authentication.
pub fn build_string_to_sign(method: &Method, url: &Url, headers: &HeaderMap, account: &str) -> String {
    let header = |name: &str| -> String {
        headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("")
            .to_string()
    };

    let mut parts = Vec::with_capacity(12);

    // VERB
    parts.push(method.as_str().to_uppercase());

    // Content headers (must be in this exact order)
    parts.push(header("content-encoding"));
    parts.push(header("content-language"));
    // Content-Length should be empty string if 0 or not present
    let content_length = header("content-length");
    parts.push(if content_length == "0" { String::new() } else { content_length });
    parts.push(header("content-md5"));
    parts.push(header("content-type"));

    // Date header - if x-ms-date is present, leave Date empty (x-ms-date is in canonicalized headers)
    if headers.contains_key("x-ms-date") {
        parts.push(String::new());
    } else {
        parts.push(header("date"));
    }

    // Conditional headers
    for name in [
        "if-modified-since",
        "if-match",
        "if-none-match",
        "if-unmodified-since",
        "range",
    ] {
        parts.push(header(name));
    }

    // [headers].join("\n") + "\n" + canonicalizedHeaders + canonicalizedResource
    format!(
        "{}\n{}{}",
        parts.join("\n"),
        canonicalized_headers(headers),
        canonicalized_resource(url, account)
    )
}

/// x-ms-* headers sorted by name, one `name:value\n` line each.
fn canonicalized_headers(headers: &HeaderMap) -> String {
    let mut ms_headers: Vec<(&str, &str)> = headers
        .iter()
        .filter_map(|(name, value)| {
            let name = name.as_str();
            if name.starts_with("x-ms-") {
                value.to_str().ok().map(|v| (name, v))
            } else {
                None
            }
        })
        .collect();
    ms_headers.sort_by(|a, b| a.0.cmp(b.0));

    let mut result = String::new();
    for (name, value) in ms_headers {
        let normalized_value = value.split_whitespace().collect::<Vec<_>>().join(" ");
        result.push_str(&name.to_lowercase());
        result.push(':');
        result.push_str(&normalized_value);
        result.push('\n');
    }
    result
}

/// `/{account}{path}` followed by decoded query parameters sorted by lowercase name.
///
/// For path-style endpoints such as the emulator the path already starts with the account,
/// giving `/devstoreaccount1/devstoreaccount1/container`.
fn canonicalized_resource(url: &Url, account: &str) -> String {
    let mut resource = format!("/{}{}", account, url.path());

    let mut params: BTreeMap<String, Vec<String>> = BTreeMap::new();
    for (key, value) in url.query_pairs() {
        params
            .entry(key.to_lowercase())
            .or_default()
            .push(value.into_owned());
    }

    for (key, mut values) in params {
        values.sort();
        resource.push('\n');
        resource.push_str(&key);
        resource.push(':');
        resource.push_str(&values.join(","));
    }

    resource
}

/// Computes HMAC-SHA256 signature.
fn compute_signature(string_to_sign: &str, account_key: &str) -> FsResult<String> {
    let key_bytes = BASE64
        .decode(account_key)
        .map_err(|_| FsError::Configuration("Invalid account key encoding".to_string()))?;

    let mut mac = HmacSha256::new_from_slice(&key_bytes)
        .map_err(|_| FsError::Configuration("Failed to create HMAC".to_string()))?;

    mac.update(string_to_sign.as_bytes());
    let result = mac.finalize();

    Ok(BASE64.encode(result.into_bytes()))
}
