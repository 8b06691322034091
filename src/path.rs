//! Path to blob-key translation.
//!
//! Blob names form a flat key space. A path such as `\images\2024\\cat.jpg` and
//! `/images/2024/cat.jpg` both map to the key `images/2024/cat.jpg`; directories exist only
//! as the `images/2024/` prefix shared by keys.

use percent_encoding::{percent_decode_str, utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};
use regex::Regex;

use crate::error::{FsError, FsResult};

/// Canonical key separator.
pub const SEPARATOR: char = '/';

/// Azure limit on blob name length.
pub const MAX_BLOB_NAME_LEN: usize = 1024;

/// Characters escaped when a key is placed in a URL path. `/` stays literal.
const KEY_ENCODE_SET: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'/')
    .remove(b'-')
    .remove(b'_')
    .remove(b'.')
    .remove(b'~');

/// Normalizes a hierarchical path into a blob key.
///
/// The root normalizes to the empty key. `..` segments are rejected rather than resolved.
pub fn normalize(path: &str) -> FsResult<String> {
    if path.chars().any(|c| c.is_control()) {
        return Err(FsError::invalid_path(path, "contains control characters"));
    }

    let mut segments = Vec::new();
    for segment in path.split(['/', '\\']) {
        match segment {
            "" | "." => continue,
            ".." => return Err(FsError::invalid_path(path, "parent-directory traversal")),
            s => segments.push(s),
        }
    }

    let key = segments.join("/");
    if key.len() > MAX_BLOB_NAME_LEN {
        return Err(FsError::invalid_path(path, "longer than 1024 characters"));
    }
    Ok(key)
}

/// Returns the listing prefix for the directory `key` (`""` for the root).
pub fn directory_prefix(key: &str) -> String {
    if key.is_empty() {
        String::new()
    } else {
        format!("{}{}", key, SEPARATOR)
    }
}

/// Returns the last segment of a key.
pub fn file_name(key: &str) -> &str {
    key.rsplit(SEPARATOR).next().unwrap_or(key)
}

/// Returns true if `path` carries an `http(s)` scheme.
pub fn is_url(path: &str) -> bool {
    let path = path.trim_start();
    let has_scheme =
        |scheme: &str| path.get(..scheme.len()).map_or(false, |p| p.eq_ignore_ascii_case(scheme));
    has_scheme("http://") || has_scheme("https://")
}

/// Strips the scheme and authority from a URL, returning its decoded path.
///
/// If the URL lies under `base` (a container URL), the base is stripped as well so the
/// remainder is relative to the container root. A URL on any other host loses a leading
/// `container` segment instead. Query and fragment are discarded.
pub fn strip_url(path: &str, base: Option<&str>, container: Option<&str>) -> String {
    let trimmed = path.trim();
    if let Some(base) = base {
        let base = base.trim_end_matches(SEPARATOR);
        let under_base = trimmed
            .get(..base.len())
            .map_or(false, |p| p.eq_ignore_ascii_case(base));
        if let Some(rest) = trimmed.get(base.len()..).filter(|r| under_base && r.starts_with(SEPARATOR)) {
            return decode(strip_query(rest));
        }
    }

    let path = match url::Url::parse(trimmed) {
        Ok(url) => decode(url.path()),
        Err(_) => {
            // Not parseable: drop "scheme://host" by hand.
            let after_scheme = trimmed.split_once("://").map(|(_, r)| r).unwrap_or(trimmed);
            let path = after_scheme.find(SEPARATOR).map(|i| &after_scheme[i..]).unwrap_or("");
            decode(strip_query(path))
        }
    };

    match container {
        Some(container) => strip_container(path, container),
        None => path,
    }
}

/// Removes a leading `/{container}` segment from a decoded URL path.
fn strip_container(path: String, container: &str) -> String {
    let rest = path
        .strip_prefix(SEPARATOR)
        .and_then(|p| p.strip_prefix(container))
        .filter(|r| r.is_empty() || r.starts_with(SEPARATOR));
    match rest {
        Some(rest) if rest.is_empty() => SEPARATOR.to_string(),
        Some(rest) => rest.to_string(),
        None => path,
    }
}

fn strip_query(path: &str) -> &str {
    path.split(['?', '#']).next().unwrap_or(path)
}

fn decode(path: &str) -> String {
    percent_decode_str(path).decode_utf8_lossy().into_owned()
}

/// Percent-encodes a key for use in a URL path.
pub fn encode_key(key: &str) -> String {
    utf8_percent_encode(key, KEY_ENCODE_SET).to_string()
}

/// Case-insensitive glob filter over file names, e.g. `*.jpg` or `thumb_??.png`.
#[derive(Debug, Clone)]
pub struct FileFilter {
    pattern: Option<Regex>,
}

impl FileFilter {
    /// Builds a filter. `None`, blank, `*` and `*.*` all match every name.
    pub fn new(glob: Option<&str>) -> Self {
        let glob = match glob.map(str::trim) {
            None | Some("") | Some("*") | Some("*.*") => return Self { pattern: None },
            Some(g) => g,
        };

        let mut re = String::from("(?i)^");
        for c in glob.chars() {
            match c {
                '*' => re.push_str(".*"),
                '?' => re.push('.'),
                c => re.push_str(&regex::escape(&c.to_string())),
            }
        }
        re.push('$');

        Self {
            // Every non-wildcard character is escaped, so the pattern always compiles.
            pattern: Regex::new(&re).ok(),
        }
    }

    /// Tests the last segment of `key`.
    pub fn matches(&self, key: &str) -> bool {
        match self.pattern {
            Some(ref re) => re.is_match(file_name(key)),
            None => true,
        }
    }
}
