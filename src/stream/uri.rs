//! Encoding and decoding of stream metadata carried as URI query parameters.
//!
//! The wire contract for a member stream is a single URI: the canonical
//! transport-stream id under the `cast://` scheme, with tokens, capabilities
//! and the screen flag denormalized into query parameters. Everything here is
//! pure string work; structured types live in [`super::models`].

/// Scheme prefix marking a locally-published transport stream.
pub const CAST_PREFIX: &str = "cast://";

/// Canonical URI for a transport-stream id.
pub fn uri_for_stream_id(stream_id: &str) -> String {
    format!("{CAST_PREFIX}{stream_id}")
}

/// Extracts the canonical transport-stream id, ignoring query and fragment.
/// Returns `None` for URIs outside the `cast://` scheme (remote/URL streams).
pub fn parse_stream_id(uri: &str) -> Option<String> {
    let rest = uri.strip_prefix(CAST_PREFIX)?;
    let end = rest.find(|c| c == '?' || c == '#').unwrap_or(rest.len());
    let stream_id = &rest[..end];

    if stream_id.is_empty() {
        return None;
    }

    Some(stream_id.to_string())
}

/// The URI up to (not including) its query string.
pub fn strip_query(uri: &str) -> &str {
    match uri.find('?') {
        Some(index) => &uri[..index],
        None => uri,
    }
}

/// Decoded query parameters, in order of appearance. A key without `=` maps
/// to an empty value.
pub fn query_params(uri: &str) -> Vec<(String, String)> {
    let query_start = match uri.find('?') {
        Some(index) => index + 1,
        None => return Vec::new(),
    };
    let query_end = uri[query_start..]
        .find('#')
        .map(|offset| query_start + offset)
        .unwrap_or(uri.len());

    uri[query_start..query_end]
        .split('&')
        .filter(|pair| !pair.is_empty())
        .map(|pair| match pair.split_once('=') {
            Some((key, value)) => (key.to_string(), value.to_string()),
            None => (pair.to_string(), String::new()),
        })
        .collect()
}

/// Value of one query parameter, if present.
pub fn query_param(uri: &str, name: &str) -> Option<String> {
    query_params(uri)
        .into_iter()
        .find(|(key, _)| key == name)
        .map(|(_, value)| value)
}

/// Appends `name=value` to the URI's query string, keeping any `#fragment`
/// at the end where it belongs.
pub fn append_query_param(uri: &str, name: &str, value: &str) -> String {
    let query_index = uri.find('?');
    let separator = if query_index.is_some() { '&' } else { '?' };
    let hash_search_start = query_index.unwrap_or(uri.len());
    let hash_index = uri[hash_search_start..]
        .find('#')
        .map(|offset| hash_search_start + offset);

    match hash_index {
        Some(index) => format!(
            "{}{}{}={}{}",
            &uri[..index],
            separator,
            name,
            value,
            &uri[index..]
        ),
        None => format!("{uri}{separator}{name}={value}"),
    }
}
