//! Error types and bridge error payloads

use std::path::PathBuf;

use serde::Serialize;
use thiserror::Error;

/// Result type for this crate
pub type Result<T> = std::result::Result<T, Error>;

/// Errors surfaced by client, request and transfer operations
#[derive(Debug, Error)]
pub enum Error {
    /// Base URL or request URL could not be parsed
    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    /// Operation on a base URL that has no registered client
    #[error("No client registered for {0}")]
    UnknownClient(String),

    /// Client identity bundle could not be read, decrypted or installed
    #[error("Certificate import failed: {0}")]
    CertificateImport(String),

    /// Network-level failure (not an HTTP status)
    #[error("Network error: {message}")]
    Network {
        /// Error message
        message: String,
    },

    /// Read or write timeout elapsed
    #[error("Request timed out")]
    Timeout,

    /// Local file or directory operation failed
    #[error("Filesystem error at {}: {source}", path.display())]
    Filesystem {
        /// Path involved in the failing operation
        path: PathBuf,
        /// Underlying I/O error
        #[source]
        source: std::io::Error,
    },

    /// Download response carried no payload
    #[error("Response body is empty")]
    EmptyBody,

    /// Operation was aborted by explicit cancellation
    #[error("Request was cancelled")]
    Cancelled,

    /// Header name or value is not valid HTTP
    #[error("Invalid header: {0}")]
    InvalidHeader(String),

    /// Credential store failure
    #[error("Credential store error: {0}")]
    Credential(String),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    pub(crate) fn filesystem(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Error::Filesystem {
            path: path.into(),
            source,
        }
    }

    /// Stable error code reported across the bridge
    pub fn code(&self) -> &'static str {
        match self {
            Error::InvalidUrl(_) => "InvalidUrl",
            Error::UnknownClient(_) => "UnknownClient",
            Error::CertificateImport(_) => "CertificateImportError",
            Error::Network { .. } | Error::Timeout => "IOError",
            Error::Filesystem { .. } => "FilesystemError",
            Error::EmptyBody => "EmptyBody",
            Error::Cancelled => "CancelledError",
            Error::InvalidHeader(_) => "InvalidHeader",
            Error::Credential(_) => "CredentialError",
            Error::Json(_) => "JsonError",
            Error::Internal(_) => "InternalError",
        }
    }

    /// Whether this is a timeout-classified I/O error
    pub fn is_timeout(&self) -> bool {
        matches!(self, Error::Timeout)
    }

    /// Whether the failure is transient and may be retried
    pub(crate) fn is_retriable(&self) -> bool {
        matches!(self, Error::Network { .. } | Error::Timeout)
    }
}

impl From<reqwest::Error> for Error {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            return Error::Timeout;
        }

        // reqwest reports read timeouts as body/decode errors wrapping an io::Error
        let mut source = std::error::Error::source(&err);
        while let Some(inner) = source {
            if let Some(io) = inner.downcast_ref::<std::io::Error>() {
                if io.kind() == std::io::ErrorKind::TimedOut {
                    return Error::Timeout;
                }
            }
            source = inner.source();
        }

        if err.is_builder() {
            Error::Internal(format!("Failed to build request: {}", err))
        } else {
            Error::Network {
                message: err.to_string(),
            }
        }
    }
}

/// Structured error handed to the bridge layer
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ErrorPayload {
    /// Stable error code, see [`Error::code`]
    pub code: String,
    /// Human readable description
    pub message: String,
}

impl From<&Error> for ErrorPayload {
    fn from(err: &Error) -> Self {
        Self {
            code: err.code().to_string(),
            message: err.to_string(),
        }
    }
}

impl From<Error> for ErrorPayload {
    fn from(err: Error) -> Self {
        Self::from(&err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_io_codes_share_bridge_code() {
        assert_eq!(Error::Timeout.code(), "IOError");
        let network = Error::Network {
            message: "connection refused".to_string(),
        };
        assert_eq!(network.code(), "IOError");
        assert!(Error::Timeout.is_timeout());
        assert!(!network.is_timeout());
    }

    #[test]
    fn test_retriable_classification() {
        assert!(Error::Timeout.is_retriable());
        assert!(!Error::EmptyBody.is_retriable());
        assert!(!Error::Cancelled.is_retriable());
    }

    #[test]
    fn test_payload_from_error() {
        let payload = ErrorPayload::from(Error::UnknownClient("https://h/api".to_string()));
        assert_eq!(payload.code, "UnknownClient");
        assert_eq!(payload.message, "No client registered for https://h/api");

        let json = serde_json::to_value(&payload).expect("payload serializes");
        assert_eq!(json["code"], "UnknownClient");
    }

    #[test]
    fn test_filesystem_display() {
        let err = Error::filesystem(
            "/tmp/x",
            std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied"),
        );
        assert_eq!(err.code(), "FilesystemError");
        assert!(err.to_string().contains("/tmp/x"));
    }
}
