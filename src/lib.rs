//! Multi-client HTTP engine for application bridges
//!
//! This crate keeps one configured HTTP client per base URL and routes calls
//! through it: persistent headers, bearer tokens read from a pluggable
//! credential store, client certificates, a shared cookie jar and retry
//! policy. Large payloads stream to and from disk through fixed-size buffers
//! and every transfer can be cancelled by task id.
//!
//! Everything is async and designed to run on tokio. [`NetworkService`] is the
//! entry point.

#![cfg_attr(docsrs, feature(doc_cfg))]
#![deny(missing_docs)]

pub use auth::BearerToken;
pub use body::{Body, MultipartPart};
pub use client::{
    DownloadBuilder, ManagedClient, MultipartUpload, TransferOptions, TransferOutcome,
    UploadBuilder,
};
pub use cookies::{Cookie, CookieJar};
pub use credentials::{CredentialStore, MemoryCredentialStore};
pub use error::{Error, ErrorPayload, Result};
pub use events::{ClientEvent, EventSink};
pub use registry::{BaseUrl, ClientRegistry};
pub use request::{RequestBuilder, RequestOptions};
pub use response::{Response, ResponseBody};
pub use retry::{RetryPolicy, RetryStrategy};
pub use service::{NetworkService, NetworkServiceBuilder, TransferHandle};
pub use session::{ClientOptions, P12Configuration, RequestAdapterConfiguration, SessionConfiguration};
pub use tasks::{TaskGuard, TaskRegistry};

// Re-export http types for convenience
pub use http::Method;

mod auth;
mod backend;
mod body;
mod client;
mod cookies;
mod credentials;
mod error;
mod events;
mod registry;
mod request;
mod response;
mod retry;
mod service;
mod session;
mod tasks;
