//! Header conversion and merge helpers.
//!
//! Two merge semantics are exposed: `add_headers` appends values next to
//! whatever is already present, `set_headers` replaces values of the same
//! name. `HeaderPolicy` picks one for the listener.

use super::types::{HeaderMultimap, HeaderPolicy};
use crate::error::ConfigError;
use hyper::header::{
    HeaderMap, HeaderName, HeaderValue, CONNECTION, CONTENT_LENGTH, HOST, TRANSFER_ENCODING,
};

static KEEP_ALIVE: HeaderName = HeaderName::from_static("keep-alive");

/// Build a `HeaderMap` from a multimap, keeping value order per name.
pub fn to_header_map(source: &HeaderMultimap) -> Result<HeaderMap, ConfigError> {
    let mut headers = HeaderMap::new();
    for (name, values) in source {
        let header_name =
            HeaderName::from_bytes(name.as_bytes()).map_err(|e| ConfigError::InvalidHeader {
                name: name.clone(),
                reason: e.to_string(),
            })?;
        for value in values {
            let header_value =
                HeaderValue::from_str(value).map_err(|e| ConfigError::InvalidHeader {
                    name: name.clone(),
                    reason: e.to_string(),
                })?;
            headers.append(header_name.clone(), header_value);
        }
    }
    Ok(headers)
}

/// Flatten a `HeaderMap` into a multimap keyed by lower-case header name.
pub fn to_multimap(headers: &HeaderMap) -> HeaderMultimap {
    let mut map = HeaderMultimap::new();
    for (name, value) in headers {
        map.entry(name.as_str().to_string())
            .or_default()
            .push(String::from_utf8_lossy(value.as_bytes()).into_owned());
    }
    map
}

/// Append every value of `source` to `dest`.
pub fn add_headers(dest: &mut HeaderMap, source: &HeaderMap) {
    for (name, value) in source {
        dest.append(name.clone(), value.clone());
    }
}

/// Replace the values in `dest` of every name present in `source`.
pub fn set_headers(dest: &mut HeaderMap, source: &HeaderMap) {
    for name in source.keys() {
        dest.remove(name);
    }
    add_headers(dest, source);
}

pub fn merge_headers(dest: &mut HeaderMap, source: &HeaderMap, policy: HeaderPolicy) {
    match policy {
        HeaderPolicy::Add => add_headers(dest, source),
        HeaderPolicy::Set => set_headers(dest, source),
    }
}

/// Request headers that may be echoed back; connection-level headers and
/// the framing headers hyper computes itself are dropped.
pub(crate) fn echoable(request_headers: &HeaderMap) -> HeaderMap {
    let mut headers = request_headers.clone();
    for name in [&HOST, &CONTENT_LENGTH, &TRANSFER_ENCODING, &CONNECTION, &KEEP_ALIVE] {
        headers.remove(name);
    }
    headers
}
