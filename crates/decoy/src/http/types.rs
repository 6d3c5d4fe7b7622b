//! HTTP rule, response and captured-request types.

use crate::capture::CapturedRecord;
use crate::config::duration_ms;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::borrow::Cow;
use std::collections::BTreeMap;
use std::time::Duration;

/// Ordered header multimap: name -> values in insertion order.
pub type HeaderMultimap = BTreeMap<String, Vec<String>>;

fn default_method() -> String {
    "GET".to_string()
}

fn default_status() -> u16 {
    200
}

/// Maps a selector (and method) to a configured response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Rule {
    /// URI, or a regular expression tested against the normalised URI
    pub selector: String,
    #[serde(default)]
    pub selector_is_regex: bool,
    #[serde(default = "default_method")]
    pub method: String,
    #[serde(default)]
    pub response: ResponseSpec,
}

impl Rule {
    pub fn literal(
        selector: impl Into<String>,
        method: impl Into<String>,
        response: ResponseSpec,
    ) -> Self {
        Self {
            selector: selector.into(),
            selector_is_regex: false,
            method: method.into(),
            response,
        }
    }

    pub fn regex(
        pattern: impl Into<String>,
        method: impl Into<String>,
        response: ResponseSpec,
    ) -> Self {
        Self {
            selector: pattern.into(),
            selector_is_regex: true,
            method: method.into(),
            response,
        }
    }
}

/// Canned HTTP response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResponseSpec {
    #[serde(default = "default_status")]
    pub status: u16,
    #[serde(default)]
    pub body: ResponseBody,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub headers: HeaderMultimap,
    /// Artificial delay before responding
    #[serde(default, rename = "delayMs", with = "duration_ms")]
    pub delay: Duration,
    /// Copy the request headers into the response before applying `headers`
    #[serde(default)]
    pub echo_request_headers: bool,
}

impl Default for ResponseSpec {
    fn default() -> Self {
        Self::new(default_status())
    }
}

impl ResponseSpec {
    pub fn new(status: u16) -> Self {
        Self {
            status,
            body: ResponseBody::Empty,
            headers: HeaderMultimap::new(),
            delay: Duration::ZERO,
            echo_request_headers: false,
        }
    }

    pub fn with_body(mut self, body: impl Into<ResponseBody>) -> Self {
        self.body = body.into();
        self
    }

    /// Append a header value (repeated names keep every value).
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers
            .entry(name.into())
            .or_default()
            .push(value.into());
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn with_echo_request_headers(mut self, echo: bool) -> Self {
        self.echo_request_headers = echo;
        self
    }
}

/// Response body value.
///
/// Integers, booleans and strings are written as their literal text; any
/// other value is written as JSON.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ResponseBody {
    #[default]
    Empty,
    Boolean(bool),
    Integer(i64),
    Text(String),
    /// Raw bytes, only available when building configs in code
    #[serde(skip)]
    Bytes(Vec<u8>),
    Structured(serde_json::Value),
}

impl ResponseBody {
    pub fn encode(&self) -> Result<Bytes, serde_json::Error> {
        Ok(match self {
            ResponseBody::Empty => Bytes::new(),
            ResponseBody::Boolean(b) => Bytes::from(b.to_string()),
            ResponseBody::Integer(i) => Bytes::from(i.to_string()),
            ResponseBody::Text(s) => Bytes::from(s.clone()),
            ResponseBody::Bytes(b) => Bytes::from(b.clone()),
            ResponseBody::Structured(value) => Bytes::from(serde_json::to_vec(value)?),
        })
    }
}

impl From<&str> for ResponseBody {
    fn from(value: &str) -> Self {
        ResponseBody::Text(value.to_string())
    }
}

impl From<String> for ResponseBody {
    fn from(value: String) -> Self {
        ResponseBody::Text(value)
    }
}

impl From<i64> for ResponseBody {
    fn from(value: i64) -> Self {
        ResponseBody::Integer(value)
    }
}

impl From<bool> for ResponseBody {
    fn from(value: bool) -> Self {
        ResponseBody::Boolean(value)
    }
}

impl From<Vec<u8>> for ResponseBody {
    fn from(value: Vec<u8>) -> Self {
        ResponseBody::Bytes(value)
    }
}

impl From<serde_json::Value> for ResponseBody {
    fn from(value: serde_json::Value) -> Self {
        match value {
            serde_json::Value::Null => ResponseBody::Empty,
            serde_json::Value::Bool(b) => ResponseBody::Boolean(b),
            serde_json::Value::String(s) => ResponseBody::Text(s),
            serde_json::Value::Number(n) => match n.as_i64() {
                Some(i) => ResponseBody::Integer(i),
                None => ResponseBody::Structured(serde_json::Value::Number(n)),
            },
            other => ResponseBody::Structured(other),
        }
    }
}

/// What to do with a request no rule matches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum MissPolicy {
    /// Reply 404 and carry on
    #[default]
    NotFound,
    /// Reply 404 and append `HandlerError::Unmatched` to the error log
    Strict,
}

/// How configured response headers combine with headers already present.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum HeaderPolicy {
    /// Append configured values next to existing ones
    #[default]
    Add,
    /// Replace existing values of the same name
    Set,
}

/// A request received by the HTTP listener.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpRequest {
    /// Normalised request target, query string included
    pub uri: String,
    pub method: String,
    pub headers: HeaderMultimap,
    pub body: Vec<u8>,
}

impl HttpRequest {
    pub fn body_text(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(&self.body)
    }

    /// First value of a header, matched case-insensitively.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .and_then(|(_, values)| values.first())
            .map(String::as_str)
    }
}

/// Record produced by the HTTP listener.
pub type HttpRecord = CapturedRecord<HttpRequest>;

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_literal_bodies_encode_as_text() {
        assert_eq!(ResponseBody::from(42i64).encode().unwrap(), "42");
        assert_eq!(ResponseBody::from(true).encode().unwrap(), "true");
        assert_eq!(ResponseBody::from("plain").encode().unwrap(), "plain");
        assert!(ResponseBody::Empty.encode().unwrap().is_empty());
    }

    #[test]
    fn test_structured_body_encodes_as_json() {
        let body = ResponseBody::from(json!({"metric": "cpu", "value": 1}));
        let encoded = body.encode().unwrap();
        let parsed: serde_json::Value = serde_json::from_slice(&encoded).unwrap();
        assert_eq!(parsed, json!({"metric": "cpu", "value": 1}));
    }

    #[test]
    fn test_json_scalars_map_to_literal_variants() {
        assert_eq!(ResponseBody::from(json!(7)), ResponseBody::Integer(7));
        assert_eq!(ResponseBody::from(json!(false)), ResponseBody::Boolean(false));
        assert_eq!(ResponseBody::from(json!(null)), ResponseBody::Empty);
        assert!(matches!(
            ResponseBody::from(json!(1.5)),
            ResponseBody::Structured(_)
        ));
    }

    #[test]
    fn test_body_deserializes_untagged() {
        let spec: ResponseSpec = serde_json::from_str(r#"{"body": 12}"#).unwrap();
        assert_eq!(spec.body, ResponseBody::Integer(12));
        assert_eq!(spec.status, 200);

        let spec: ResponseSpec = serde_json::from_str(r#"{"body": [1, 2]}"#).unwrap();
        assert_eq!(spec.body, ResponseBody::Structured(json!([1, 2])));

        let spec: ResponseSpec = serde_json::from_str("{}").unwrap();
        assert_eq!(spec.body, ResponseBody::Empty);
    }

    #[test]
    fn test_with_header_keeps_repeated_values() {
        let spec = ResponseSpec::new(200)
            .with_header("X-Trace", "a")
            .with_header("X-Trace", "b");
        assert_eq!(spec.headers["X-Trace"], vec!["a", "b"]);
    }

    #[test]
    fn test_request_header_lookup_is_case_insensitive() {
        let mut headers = HeaderMultimap::new();
        headers.insert("content-type".to_string(), vec!["text/plain".to_string()]);
        let request = HttpRequest {
            uri: "/a".to_string(),
            method: "GET".to_string(),
            headers,
            body: b"x".to_vec(),
        };
        assert_eq!(request.header("Content-Type"), Some("text/plain"));
        assert_eq!(request.body_text(), "x");
    }
}
