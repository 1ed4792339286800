//! Managed HTTP client bound to one base URL

pub mod download;
pub mod upload;

pub use download::DownloadBuilder;
pub use upload::UploadBuilder;

use crate::auth::TokenBinding;
use crate::backend::types::BackendResponse;
use crate::backend::{Backend, ClientIdentity};
use crate::cookies::CookieJar;
use crate::credentials::CredentialStore;
use crate::events::EventSink;
use crate::registry::BaseUrl;
use crate::request::{RequestBuilder, parse_header};
use crate::retry::RetryPolicy;
use crate::session::ClientOptions;
use crate::{Error, Response, Result};
use arc_swap::ArcSwap;
use http::{HeaderMap, Method, StatusCode};
use serde::Deserialize;
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use tokio_util::sync::CancellationToken;
use url::Url;

/// Collaborators shared by every client of a service
#[derive(Clone)]
pub(crate) struct ClientContext {
    pub(crate) credentials: Arc<dyn CredentialStore>,
    pub(crate) events: EventSink,
    pub(crate) cookie_jar: Arc<CookieJar>,
}

/// Options for downloads and uploads
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct TransferOptions {
    /// Headers for this transfer; they override persistent headers
    pub headers: HashMap<String, String>,
    /// Total deadline in milliseconds
    pub timeout_interval: Option<u64>,
    /// Upload method, `POST` when absent
    pub method: Option<String>,
    /// Content type of a raw upload
    pub content_type: Option<String>,
    /// Send the upload as one part of a multipart form
    pub multipart: Option<MultipartUpload>,
}

/// Multipart shape of an upload
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MultipartUpload {
    /// Form field carrying the file
    #[serde(default = "MultipartUpload::default_file_key")]
    pub file_key: String,
    /// Text fields sent along with the file
    #[serde(default)]
    pub data: BTreeMap<String, String>,
}

impl MultipartUpload {
    fn default_file_key() -> String {
        "file".to_string()
    }
}

/// Final state of a transfer
#[derive(Debug)]
pub enum TransferOutcome {
    /// The transfer ran to completion; the envelope may still carry `ok == false`
    Completed(Response),
    /// The transfer was cancelled before completing
    Cancelled,
}

impl TransferOutcome {
    /// Treat cancellation as [`Error::Cancelled`]
    pub fn into_result(self) -> Result<Response> {
        match self {
            TransferOutcome::Completed(response) => Ok(response),
            TransferOutcome::Cancelled => Err(Error::Cancelled),
        }
    }

    /// Whether the transfer was cancelled
    pub fn is_cancelled(&self) -> bool {
        matches!(self, TransferOutcome::Cancelled)
    }
}

/// HTTP client owning one transport for one base URL.
///
/// Persistent headers, the bearer token binding and the client certificate
/// apply to every call made through it. The transport can be rebuilt with a
/// new client certificate while calls are in flight: calls already
/// dispatched finish on the transport they started with.
pub struct ManagedClient {
    base_url: Option<BaseUrl>,
    options: ClientOptions,
    backend: ArcSwap<Backend>,
    headers: RwLock<HeaderMap>,
    rebuild: tokio::sync::Mutex<()>,
    session: Mutex<CancellationToken>,
    context: ClientContext,
}

impl ManagedClient {
    /// Build a client, importing the configured client certificate first
    pub(crate) async fn new(
        base_url: BaseUrl,
        options: ClientOptions,
        context: ClientContext,
    ) -> Result<Self> {
        let mut headers = HeaderMap::new();
        for (name, value) in &options.headers {
            let (name, value) = parse_header(name, value)?;
            headers.insert(name, value);
        }

        let identity = match &options.client_p12_configuration {
            Some(p12) => Some(load_identity(&p12.path, &p12.password).await?),
            None => None,
        };
        let has_identity = identity.is_some();

        let config = options
            .session_configuration
            .backend_config(&context.cookie_jar, identity);
        let backend = Backend::with_config(config).map_err(|e| {
            if has_identity {
                Error::CertificateImport(e.to_string())
            } else {
                e
            }
        })?;

        tracing::debug!("Created client for {}", base_url);

        Ok(Self::assemble(Some(base_url), options, backend, headers, context))
    }

    /// Client without a base URL, used for absolute URLs no registered client claims
    pub(crate) fn generic(context: ClientContext) -> Result<Self> {
        let options = ClientOptions::default();
        let config = options
            .session_configuration
            .backend_config(&context.cookie_jar, None);
        let backend = Backend::with_config(config)?;
        Ok(Self::assemble(None, options, backend, HeaderMap::new(), context))
    }

    fn assemble(
        base_url: Option<BaseUrl>,
        options: ClientOptions,
        backend: Backend,
        headers: HeaderMap,
        context: ClientContext,
    ) -> Self {
        Self {
            base_url,
            options,
            backend: ArcSwap::from_pointee(backend),
            headers: RwLock::new(headers),
            rebuild: tokio::sync::Mutex::new(()),
            session: Mutex::new(CancellationToken::new()),
            context,
        }
    }

    /// Base URL this client serves, `None` for the generic client
    pub fn base_url(&self) -> Option<&BaseUrl> {
        self.base_url.as_ref()
    }

    /// Snapshot of the persistent headers (lower-cased names)
    pub fn headers(&self) -> BTreeMap<String, String> {
        self.headers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|(name, value)| {
                (
                    name.as_str().to_string(),
                    String::from_utf8_lossy(value.as_bytes()).into_owned(),
                )
            })
            .collect()
    }

    /// Merge `headers` into the persistent set, last write wins.
    ///
    /// Nothing is applied if any pair is invalid.
    pub fn add_headers<K, V>(&self, headers: impl IntoIterator<Item = (K, V)>) -> Result<()>
    where
        K: AsRef<str>,
        V: AsRef<str>,
    {
        let parsed = headers
            .into_iter()
            .map(|(name, value)| parse_header(name.as_ref(), value.as_ref()))
            .collect::<Result<Vec<_>>>()?;

        let mut current = self.headers.write().unwrap_or_else(PoisonError::into_inner);
        for (name, value) in parsed {
            current.insert(name, value);
        }
        Ok(())
    }

    /// Install a PKCS#12 client certificate by rebuilding the transport.
    ///
    /// Headers, cookies and options carry over. On any failure the current
    /// transport stays in place. Concurrent imports are applied one at a time.
    pub async fn import_client_p12(&self, path: impl AsRef<Path>, password: &str) -> Result<()> {
        let path = path.as_ref();
        let _rebuild = self.rebuild.lock().await;

        let identity = load_identity(path, password).await?;
        let config = self
            .options
            .session_configuration
            .backend_config(&self.context.cookie_jar, Some(identity));
        let backend =
            Backend::with_config(config).map_err(|e| Error::CertificateImport(e.to_string()))?;

        self.backend.store(Arc::new(backend));
        tracing::debug!(
            "Installed client certificate from {} for {}",
            path.display(),
            self.describe()
        );
        Ok(())
    }

    /// Cancel every in-flight call of this client.
    ///
    /// Calls started afterwards are cancelled immediately.
    pub fn shutdown(&self) {
        tracing::debug!("Shutting down client for {}", self.describe());
        self.lock_session().cancel();
    }

    /// Create a GET request
    pub fn get(&self, endpoint: &str) -> RequestBuilder<'_> {
        self.request(Method::GET, endpoint)
    }

    /// Create a POST request
    pub fn post(&self, endpoint: &str) -> RequestBuilder<'_> {
        self.request(Method::POST, endpoint)
    }

    /// Create a PUT request
    pub fn put(&self, endpoint: &str) -> RequestBuilder<'_> {
        self.request(Method::PUT, endpoint)
    }

    /// Create a PATCH request
    pub fn patch(&self, endpoint: &str) -> RequestBuilder<'_> {
        self.request(Method::PATCH, endpoint)
    }

    /// Create a DELETE request
    pub fn delete(&self, endpoint: &str) -> RequestBuilder<'_> {
        self.request(Method::DELETE, endpoint)
    }

    /// Create a HEAD request
    pub fn head(&self, endpoint: &str) -> RequestBuilder<'_> {
        self.request(Method::HEAD, endpoint)
    }

    /// Create a request with any method
    pub fn request(&self, method: Method, endpoint: &str) -> RequestBuilder<'_> {
        RequestBuilder::new(self, method, endpoint)
    }

    /// Download `endpoint` to `destination`
    pub fn download(&self, endpoint: &str, destination: impl Into<PathBuf>) -> DownloadBuilder<'_> {
        DownloadBuilder::new(self, endpoint, destination.into())
    }

    /// Upload the file at `source` to `endpoint`
    pub fn upload(&self, endpoint: &str, source: impl Into<PathBuf>) -> UploadBuilder<'_> {
        UploadBuilder::new(self, endpoint, source.into())
    }

    /// Resolve `endpoint` against the base URL.
    ///
    /// Absolute URLs are used verbatim but must lie under the base URL, so
    /// persistent headers and the bearer token never reach another host.
    pub fn resolve(&self, endpoint: &str) -> Result<Url> {
        let lower = endpoint.to_ascii_lowercase();
        if lower.starts_with("http://") || lower.starts_with("https://") {
            let url = Url::parse(endpoint)
                .map_err(|e| Error::InvalidUrl(format!("{}: {}", endpoint, e)))?;
            if let Some(base) = &self.base_url {
                if !base.contains(&url) {
                    return Err(Error::InvalidUrl(format!(
                        "{} is outside {}",
                        endpoint, base
                    )));
                }
            }
            return Ok(url);
        }

        match &self.base_url {
            Some(base) => base.join(endpoint),
            None => Err(Error::InvalidUrl(format!(
                "{} is not an absolute URL",
                endpoint
            ))),
        }
    }

    /// Child of the current session scope for a new call
    pub(crate) fn cancellation_scope(&self) -> CancellationToken {
        self.lock_session().child_token()
    }

    pub(crate) fn transport(&self) -> Arc<Backend> {
        self.backend.load_full()
    }

    pub(crate) fn header_map(&self) -> HeaderMap {
        self.headers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub(crate) fn retry_policy(&self) -> Option<&RetryPolicy> {
        self.options.retry_policy_configuration.as_ref()
    }

    pub(crate) fn token_binding(&self) -> Option<TokenBinding<'_>> {
        self.base_url.as_ref().map(|base_url| TokenBinding {
            store: self.context.credentials.as_ref(),
            alias: base_url.as_str(),
            events: &self.context.events,
        })
    }

    /// Apply response side effects; returns true when the session scope was renewed
    pub(crate) fn observe(&self, response: &BackendResponse) -> bool {
        if let (Some(header), Some(binding)) = (
            &self
                .options
                .request_adapter_configuration
                .bearer_auth_token_response_header,
            self.token_binding(),
        ) {
            binding.capture(header, &response.headers);
        }

        if response.status == StatusCode::UNAUTHORIZED
            && self
                .options
                .session_configuration
                .cancel_requests_on_unauthorized
        {
            tracing::debug!(
                "401 from {}, cancelling other calls for {}",
                response.url,
                self.describe()
            );
            let mut session = self.lock_session();
            session.cancel();
            *session = CancellationToken::new();
            return true;
        }

        false
    }

    fn lock_session(&self) -> std::sync::MutexGuard<'_, CancellationToken> {
        self.session.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn describe(&self) -> &str {
        self.base_url
            .as_ref()
            .map(BaseUrl::as_str)
            .unwrap_or("generic client")
    }
}

impl fmt::Debug for ManagedClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ManagedClient")
            .field("base_url", &self.base_url)
            .finish_non_exhaustive()
    }
}

async fn load_identity(path: &Path, password: &str) -> Result<ClientIdentity> {
    let der = tokio::fs::read(path).await.map_err(|e| {
        Error::CertificateImport(format!("Failed to read {}: {}", path.display(), e))
    })?;
    ClientIdentity::from_pkcs12_der(&der, password)
}
