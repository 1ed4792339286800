//! Response envelope returned to the bridge

use std::collections::BTreeMap;
use std::path::PathBuf;

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use bytes::{Bytes, BytesMut};
use http::{HeaderMap, StatusCode, header::CONTENT_TYPE};
use serde::{Serialize, Serializer};
use url::Url;

use crate::Result;
use crate::backend::types::BackendResponse;

/// Materialized response body
#[derive(Debug, Clone, PartialEq)]
pub enum ResponseBody {
    /// No payload (HEAD, 204, or zero-length body)
    Empty,
    /// Body declared as JSON and parsed successfully
    Json(serde_json::Value),
    /// UTF-8 text
    Text(String),
    /// Anything else, serialized as base64
    Bytes(Bytes),
    /// Body written to disk by a download
    File {
        /// Destination path
        path: PathBuf,
        /// Bytes written
        bytes_written: u64,
    },
}

impl ResponseBody {
    /// Decode a fully buffered body using the response content type
    fn decode(content: Bytes, content_type: Option<&str>) -> Self {
        if content.is_empty() {
            return ResponseBody::Empty;
        }

        let is_json = content_type
            .map(|ct| ct.to_ascii_lowercase().contains("json"))
            .unwrap_or(false);

        if is_json {
            if let Ok(value) = serde_json::from_slice(&content) {
                return ResponseBody::Json(value);
            }
        }

        match std::str::from_utf8(&content) {
            Ok(text) => ResponseBody::Text(text.to_string()),
            Err(_) => ResponseBody::Bytes(content),
        }
    }
}

impl Serialize for ResponseBody {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        match self {
            ResponseBody::Empty => serializer.serialize_none(),
            ResponseBody::Json(value) => value.serialize(serializer),
            ResponseBody::Text(text) => serializer.serialize_str(text),
            ResponseBody::Bytes(bytes) => serializer.serialize_str(&STANDARD.encode(bytes)),
            ResponseBody::File { path, .. } => serializer.serialize_str(&path.to_string_lossy()),
        }
    }
}

/// HTTP response envelope.
///
/// A non-2xx status is a normal outcome with `ok == false`, never an error.
#[derive(Debug, Clone, Serialize)]
pub struct Response {
    /// HTTP status code
    pub code: u16,
    /// Response headers; repeated values are joined with `, `
    pub headers: BTreeMap<String, String>,
    /// Response body
    #[serde(rename = "data")]
    pub body: ResponseBody,
    /// Whether the status is in the 2xx range
    pub ok: bool,
    /// Final URL after redirects
    #[serde(serialize_with = "serialize_url")]
    pub url: Url,
}

fn serialize_url<S: Serializer>(url: &Url, serializer: S) -> std::result::Result<S::Ok, S::Error> {
    serializer.serialize_str(url.as_str())
}

impl Response {
    pub(crate) fn new(status: StatusCode, headers: &HeaderMap, url: Url, body: ResponseBody) -> Self {
        Self {
            code: status.as_u16(),
            headers: flatten_headers(headers),
            body,
            ok: status.is_success(),
            url,
        }
    }

    /// Drain a transport response into an envelope
    pub(crate) async fn from_backend(mut response: BackendResponse) -> Result<Self> {
        let mut buffer = BytesMut::new();
        while let Some(chunk) = response.body_receiver.recv().await {
            buffer.extend_from_slice(&chunk?);
        }

        let content_type = response
            .headers
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok());
        let body = ResponseBody::decode(buffer.freeze(), content_type);

        Ok(Self::new(response.status, &response.headers, response.url, body))
    }

    /// Get a header value, case-insensitively
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }

    /// Check if the response status indicates a client error (4xx)
    pub fn is_client_error(&self) -> bool {
        (400..500).contains(&self.code)
    }

    /// Check if the response status indicates a server error (5xx)
    pub fn is_server_error(&self) -> bool {
        (500..600).contains(&self.code)
    }

    /// Body as text, when it was decoded as text or JSON
    pub fn text(&self) -> Option<String> {
        match &self.body {
            ResponseBody::Text(text) => Some(text.clone()),
            ResponseBody::Json(value) => Some(value.to_string()),
            _ => None,
        }
    }
}

fn flatten_headers(headers: &HeaderMap) -> BTreeMap<String, String> {
    let mut flattened: BTreeMap<String, String> = BTreeMap::new();
    for (name, value) in headers {
        let value = String::from_utf8_lossy(value.as_bytes()).into_owned();
        flattened
            .entry(name.as_str().to_string())
            .and_modify(|existing| {
                existing.push_str(", ");
                existing.push_str(&value);
            })
            .or_insert(value);
    }
    flattened
}

#[cfg(test)]
mod tests {
    use super::*;
    use http::HeaderValue;

    fn url() -> Url {
        Url::parse("https://example.com/api").unwrap()
    }

    #[test]
    fn test_decode_json_only_when_declared() {
        let body = ResponseBody::decode(Bytes::from_static(br#"{"a":1}"#), Some("application/json"));
        assert_eq!(body, ResponseBody::Json(serde_json::json!({"a": 1})));

        let body = ResponseBody::decode(Bytes::from_static(br#"{"a":1}"#), Some("text/plain"));
        assert_eq!(body, ResponseBody::Text(r#"{"a":1}"#.to_string()));
    }

    #[test]
    fn test_decode_binary_and_empty() {
        let body = ResponseBody::decode(Bytes::from_static(&[0xff, 0xfe]), None);
        assert_eq!(body, ResponseBody::Bytes(Bytes::from_static(&[0xff, 0xfe])));
        assert_eq!(ResponseBody::decode(Bytes::new(), None), ResponseBody::Empty);
    }

    #[test]
    fn test_non_success_is_not_ok() {
        let response = Response::new(StatusCode::NOT_FOUND, &HeaderMap::new(), url(), ResponseBody::Empty);
        assert!(!response.ok);
        assert!(response.is_client_error());
        assert_eq!(response.code, 404);
    }

    #[test]
    fn test_repeated_headers_are_joined() {
        let mut headers = HeaderMap::new();
        headers.append("x-multi", HeaderValue::from_static("a"));
        headers.append("x-multi", HeaderValue::from_static("b"));
        let response = Response::new(StatusCode::OK, &headers, url(), ResponseBody::Empty);
        assert_eq!(response.header("X-Multi"), Some("a, b"));
    }

    #[test]
    fn test_envelope_serialization() {
        let response = Response::new(
            StatusCode::OK,
            &HeaderMap::new(),
            url(),
            ResponseBody::Bytes(Bytes::from_static(b"\xff")),
        );
        let json = serde_json::to_value(&response).unwrap();
        assert_eq!(json["code"], 200);
        assert_eq!(json["ok"], true);
        assert_eq!(json["data"], "/w==");
        assert_eq!(json["url"], "https://example.com/api");
    }
}
