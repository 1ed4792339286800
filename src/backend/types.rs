//! Shared types between the transport and the request layer

use crate::body::Body;
use http::{HeaderMap, Method, StatusCode};
use std::{sync::Arc, time::Duration};
use tokio::sync::mpsc;
use url::Url;

/// Transport-level HTTP request
pub struct BackendRequest {
    /// HTTP method for the request
    pub method: Method,
    /// URL for the request
    pub url: Url,
    /// Headers for the request
    pub headers: HeaderMap,
    /// Optional body content
    pub body: Option<Body>,
    /// Total deadline for this call, on top of the transport's read timeout
    pub timeout: Option<Duration>,
    /// Optional progress callback for streamed uploads
    pub progress_callback: Option<ProgressCallback>,
}

/// Transport-level HTTP response
pub struct BackendResponse {
    /// HTTP status code
    pub status: StatusCode,
    /// Response headers
    pub headers: HeaderMap,
    /// Final URL after redirects
    pub url: Url,
    /// Stream of response body bytes
    pub body_receiver: mpsc::Receiver<Result<bytes::Bytes, crate::Error>>,
}

/// Callback type for progress reporting: `(bytes_transferred, total_bytes)`
pub type ProgressCallback = Arc<dyn Fn(u64, Option<u64>) + Send + Sync + 'static>;
