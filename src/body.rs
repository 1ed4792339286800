//! Request body types

use bytes::Bytes;
use serde::Deserialize;
use std::borrow::Cow;
use std::collections::BTreeMap;
use std::path::PathBuf;

/// Request body types
#[derive(Debug, Clone, Deserialize)]
#[serde(from = "BodyOptions")]
pub enum Body {
    /// Empty body
    Empty,

    /// Raw bytes with content type
    Bytes {
        /// The content
        content: Bytes,
        /// Content type
        content_type: String,
    },

    /// Form-encoded data
    Form {
        /// Form fields
        fields: Vec<(Cow<'static, str>, Cow<'static, str>)>,
    },

    /// Multipart form data held in memory
    Multipart {
        /// Multipart parts
        parts: Vec<MultipartPart>,
    },

    /// JSON data
    Json {
        /// JSON value
        value: serde_json::Value,
    },

    /// File streamed from disk as the raw body
    File {
        /// Source file
        path: PathBuf,
        /// Content type
        content_type: String,
    },

    /// File streamed from disk as one part of a multipart form
    MultipartFile {
        /// Form field name carrying the file
        file_key: String,
        /// Source file
        path: PathBuf,
        /// Additional text fields sent before the file
        fields: Vec<(String, String)>,
    },
}

/// A part of multipart form data
#[derive(Debug, Clone)]
pub struct MultipartPart {
    /// Field name
    pub name: String,
    /// Content
    pub content: Bytes,
    /// Content type
    pub content_type: Option<String>,
    /// Filename
    pub filename: Option<String>,
}

impl Body {
    /// Create an empty body
    pub fn empty() -> Self {
        Self::Empty
    }

    /// Create a body from bytes
    pub fn bytes(content: impl Into<Bytes>, content_type: impl Into<String>) -> Self {
        Self::Bytes {
            content: content.into(),
            content_type: content_type.into(),
        }
    }

    /// Create a body from text
    pub fn text(content: impl Into<String>) -> Self {
        Self::Bytes {
            content: content.into().into(),
            content_type: "text/plain; charset=utf-8".to_string(),
        }
    }

    /// Create a form body
    pub fn form(fields: Vec<(impl Into<Cow<'static, str>>, impl Into<Cow<'static, str>>)>) -> Self {
        Self::Form {
            fields: fields
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }

    /// Create a JSON body
    pub fn json(value: impl serde::Serialize) -> Result<Self, crate::Error> {
        Ok(Self::Json {
            value: serde_json::to_value(value)?,
        })
    }

    /// Create a multipart body
    pub fn multipart(parts: Vec<MultipartPart>) -> Self {
        Self::Multipart { parts }
    }

    /// Stream a file from disk as the request body.
    ///
    /// The file is opened when the request is dispatched and read through a
    /// fixed-size buffer, so large files are never held in memory.
    pub fn file(path: impl Into<PathBuf>, content_type: Option<String>) -> Self {
        Self::File {
            path: path.into(),
            content_type: content_type.unwrap_or_else(|| "application/octet-stream".to_string()),
        }
    }

    /// Stream a file from disk as the `file_key` part of a multipart form,
    /// preceded by text `fields`
    pub fn multipart_file(
        file_key: impl Into<String>,
        path: impl Into<PathBuf>,
        fields: Vec<(String, String)>,
    ) -> Self {
        Self::MultipartFile {
            file_key: file_key.into(),
            path: path.into(),
            fields,
        }
    }

    /// Whether the body can be produced again for a retried attempt.
    ///
    /// Streamed files are consumed by the first send.
    pub fn is_replayable(&self) -> bool {
        !matches!(self, Body::File { .. } | Body::MultipartFile { .. })
    }
}

// Convenience From implementations
impl From<String> for Body {
    fn from(content: String) -> Self {
        Self::text(content)
    }
}

impl From<&str> for Body {
    fn from(content: &str) -> Self {
        Self::text(content)
    }
}

impl From<Vec<u8>> for Body {
    fn from(content: Vec<u8>) -> Self {
        Self::bytes(content, "application/octet-stream")
    }
}

impl From<Bytes> for Body {
    fn from(content: Bytes) -> Self {
        Self::bytes(content, "application/octet-stream")
    }
}

impl From<serde_json::Value> for Body {
    fn from(value: serde_json::Value) -> Self {
        Self::Json { value }
    }
}

impl MultipartPart {
    /// Create a text part
    pub fn text(name: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            content: content.into().into(),
            content_type: Some("text/plain; charset=utf-8".to_string()),
            filename: None,
        }
    }

    /// Create a file part
    pub fn file(
        name: impl Into<String>,
        content: impl Into<Bytes>,
        filename: impl Into<String>,
        content_type: Option<String>,
    ) -> Self {
        Self {
            name: name.into(),
            content: content.into(),
            content_type,
            filename: Some(filename.into()),
        }
    }
}

/// Body shape accepted from the bridge as JSON
#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
enum BodyOptions {
    Form {
        fields: BTreeMap<String, String>,
    },
    Multipart {
        parts: Vec<PartOptions>,
    },
    #[serde(rename_all = "camelCase")]
    Raw {
        content: String,
        content_type: Option<String>,
    },
    Json {
        value: serde_json::Value,
    },
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PartOptions {
    name: String,
    content: String,
    content_type: Option<String>,
    filename: Option<String>,
}

impl From<BodyOptions> for Body {
    fn from(options: BodyOptions) -> Self {
        match options {
            BodyOptions::Form { fields } => {
                Body::form(fields.into_iter().collect::<Vec<(String, String)>>())
            }
            BodyOptions::Multipart { parts } => Body::Multipart {
                parts: parts
                    .into_iter()
                    .map(|part| MultipartPart {
                        name: part.name,
                        content: part.content.into(),
                        content_type: part.content_type,
                        filename: part.filename,
                    })
                    .collect(),
            },
            BodyOptions::Raw {
                content,
                content_type,
            } => match content_type {
                Some(content_type) => Body::bytes(content, content_type),
                None => Body::text(content),
            },
            BodyOptions::Json { value } => Body::Json { value },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_body_text_creation() {
        match Body::text("Hello, World!") {
            Body::Bytes {
                content,
                content_type,
            } => {
                assert_eq!(content.as_ref(), b"Hello, World!");
                assert_eq!(content_type, "text/plain; charset=utf-8");
            }
            _ => panic!("Expected Body::Bytes variant"),
        }
    }

    #[test]
    fn test_streamed_bodies_are_not_replayable() {
        assert!(Body::text("x").is_replayable());
        assert!(Body::form(vec![("a", "b")]).is_replayable());
        assert!(!Body::file("/tmp/upload.bin", None).is_replayable());

        let multipart = Body::MultipartFile {
            file_key: "file".to_string(),
            path: PathBuf::from("/tmp/upload.bin"),
            fields: Vec::new(),
        };
        assert!(!multipart.is_replayable());
    }

    #[test]
    fn test_deserialize_form_body() {
        let body: Body = serde_json::from_value(serde_json::json!({
            "type": "form",
            "fields": { "username": "john_doe", "remember": "true" }
        }))
        .expect("form body");

        match body {
            Body::Form { fields } => {
                assert_eq!(fields.len(), 2);
                assert_eq!(fields[0].0, "remember");
                assert_eq!(fields[1].1, "john_doe");
            }
            other => panic!("Expected Body::Form, got {:?}", other),
        }
    }

    #[test]
    fn test_deserialize_raw_body_defaults_to_text() {
        let body: Body = serde_json::from_value(serde_json::json!({
            "type": "raw",
            "content": "plain"
        }))
        .expect("raw body");

        match body {
            Body::Bytes { content_type, .. } => {
                assert_eq!(content_type, "text/plain; charset=utf-8")
            }
            other => panic!("Expected Body::Bytes, got {:?}", other),
        }
    }

    #[test]
    fn test_deserialize_multipart_body() {
        let body: Body = serde_json::from_value(serde_json::json!({
            "type": "multipart",
            "parts": [
                { "name": "description", "content": "hello" },
                { "name": "file", "content": "data", "filename": "a.txt", "contentType": "text/plain" }
            ]
        }))
        .expect("multipart body");

        match body {
            Body::Multipart { parts } => {
                assert_eq!(parts.len(), 2);
                assert_eq!(parts[1].filename.as_deref(), Some("a.txt"));
                assert_eq!(parts[1].content_type.as_deref(), Some("text/plain"));
            }
            other => panic!("Expected Body::Multipart, got {:?}", other),
        }
    }
}
