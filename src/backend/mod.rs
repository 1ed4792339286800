//! Transport abstraction for HTTP execution

pub mod reqwest;
pub mod types;

use crate::{Error, Result, cookies::CookieJar};
use std::{fmt, sync::Arc, time::Duration};
use types::{BackendRequest, BackendResponse};

/// Size of the intermediate buffer used when streaming files to or from disk
pub const TRANSFER_BUFFER_SIZE: usize = 64 * 1024;

/// Default read and write timeout
pub const DEFAULT_TIMEOUT: Duration = Duration::from_millis(60_000);

/// Configuration for transport creation
#[derive(Clone, Debug)]
pub struct BackendConfig {
    /// Bound on each read from the connection
    pub read_timeout: Duration,
    /// Bound on stalls while streaming a request body from disk
    pub write_timeout: Duration,
    /// Follow HTTP redirects
    pub follow_redirects: bool,
    /// User agent string
    pub user_agent: Option<String>,
    /// Accept certificates that do not chain to a trusted root
    pub trust_self_signed_certificates: bool,
    /// Maximum idle connections kept per host
    pub max_connections_per_host: Option<usize>,
    /// Shared cookie jar; `None` disables cookies
    pub cookie_jar: Option<Arc<CookieJar>>,
    /// Client identity presented for mutual TLS
    pub identity: Option<ClientIdentity>,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            read_timeout: DEFAULT_TIMEOUT,
            write_timeout: DEFAULT_TIMEOUT,
            follow_redirects: true,
            user_agent: None,
            trust_self_signed_certificates: false,
            max_connections_per_host: None,
            cookie_jar: None,
            identity: None,
        }
    }
}

/// Decrypted client certificate and key for mutual TLS
#[derive(Clone)]
pub struct ClientIdentity(::reqwest::Identity);

impl ClientIdentity {
    /// Decrypt a PKCS#12 bundle with `password`.
    ///
    /// Fails when the password is wrong or the bundle is malformed.
    pub fn from_pkcs12_der(der: &[u8], password: &str) -> Result<Self> {
        ::reqwest::Identity::from_pkcs12_der(der, password)
            .map(Self)
            .map_err(|e| Error::CertificateImport(e.to_string()))
    }

    pub(crate) fn inner(&self) -> &::reqwest::Identity {
        &self.0
    }
}

impl fmt::Debug for ClientIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("ClientIdentity(..)")
    }
}

/// HTTP transport implementations
#[derive(Clone, Debug)]
pub enum Backend {
    /// Cross-platform implementation using reqwest
    Reqwest(reqwest::ReqwestBackend),
}

impl Backend {
    /// Build the default transport with configuration
    pub fn with_config(config: BackendConfig) -> Result<Self> {
        Ok(Backend::Reqwest(reqwest::ReqwestBackend::with_config(
            config,
        )?))
    }

    /// Execute an HTTP request
    pub async fn execute(&self, request: BackendRequest) -> Result<BackendResponse> {
        match self {
            Backend::Reqwest(r) => r.execute(request).await,
        }
    }
}
