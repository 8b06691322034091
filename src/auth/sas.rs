//! Shared access signature tokens.

use url::Url;

/// Appends a SAS token's parameters to `url`, keeping any existing query.
pub fn append_sas_token(url: &mut Url, token: &str) {
    let token = token.trim_start_matches('?');
    if token.is_empty() {
        return;
    }
    let query = match url.query() {
        Some(existing) if !existing.is_empty() => format!("{}&{}", existing, token),
        _ => token.to_string(),
    };
    url.set_query(Some(&query));
}
