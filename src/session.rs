//! Client configuration accepted when a client is created

use crate::backend::{BackendConfig, ClientIdentity};
use crate::cookies::CookieJar;
use crate::retry::RetryPolicy;
use serde::Deserialize;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

/// Transport-level settings for one client
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SessionConfiguration {
    /// Read timeout in milliseconds
    pub read_timeout: u64,
    /// Write timeout in milliseconds
    pub write_timeout: u64,
    /// Follow HTTP redirects
    pub follow_redirects: bool,
    /// Store and send cookies through the shared jar
    pub use_cookies: bool,
    /// User agent string
    pub user_agent: Option<String>,
    /// Maximum idle connections kept per host
    pub max_connections_per_host: Option<usize>,
    /// Accept server certificates that do not chain to a trusted root
    pub trust_self_signed_server_certificate: bool,
    /// Cancel the client's other in-flight calls when a call gets a 401
    pub cancel_requests_on_unauthorized: bool,
}

impl Default for SessionConfiguration {
    fn default() -> Self {
        Self {
            read_timeout: 60_000,
            write_timeout: 60_000,
            follow_redirects: true,
            use_cookies: true,
            user_agent: None,
            max_connections_per_host: None,
            trust_self_signed_server_certificate: false,
            cancel_requests_on_unauthorized: false,
        }
    }
}

impl SessionConfiguration {
    pub(crate) fn backend_config(
        &self,
        cookie_jar: &Arc<CookieJar>,
        identity: Option<ClientIdentity>,
    ) -> BackendConfig {
        BackendConfig {
            read_timeout: Duration::from_millis(self.read_timeout),
            write_timeout: Duration::from_millis(self.write_timeout),
            follow_redirects: self.follow_redirects,
            user_agent: self.user_agent.clone(),
            trust_self_signed_certificates: self.trust_self_signed_server_certificate,
            max_connections_per_host: self.max_connections_per_host,
            cookie_jar: self.use_cookies.then(|| cookie_jar.clone()),
            identity,
        }
    }
}

/// How responses feed the session token
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RequestAdapterConfiguration {
    /// Response header whose value is stored as the bearer token
    pub bearer_auth_token_response_header: Option<String>,
}

/// PKCS#12 bundle imported when the client is created
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct P12Configuration {
    /// Path of the bundle on disk
    pub path: PathBuf,
    /// Password protecting the bundle
    #[serde(default)]
    pub password: String,
}

/// Options for [`NetworkService::create_client_for`](crate::NetworkService::create_client_for).
///
/// Deserializes from the camelCase JSON the bridge forwards:
///
/// ```
/// let options: courier::ClientOptions = serde_json::from_str(r#"{
///     "headers": {"X-App": "demo"},
///     "sessionConfiguration": {"readTimeout": 5000},
///     "retryPolicyConfiguration": {"type": "linear", "retryLimit": 3}
/// }"#).unwrap();
/// assert_eq!(options.session_configuration.read_timeout, 5000);
/// ```
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ClientOptions {
    /// Persistent headers sent with every request
    pub headers: HashMap<String, String>,
    /// Transport settings
    pub session_configuration: SessionConfiguration,
    /// Retry policy; `None` disables retries
    pub retry_policy_configuration: Option<RetryPolicy>,
    /// Token capture settings
    pub request_adapter_configuration: RequestAdapterConfiguration,
    /// Client certificate imported at creation
    #[serde(rename = "clientP12Configuration")]
    pub client_p12_configuration: Option<P12Configuration>,
}

impl ClientOptions {
    /// Create default options
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a persistent header
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }

    /// Set the read timeout
    pub fn read_timeout(mut self, timeout: Duration) -> Self {
        self.session_configuration.read_timeout = timeout.as_millis() as u64;
        self
    }

    /// Set the write timeout
    pub fn write_timeout(mut self, timeout: Duration) -> Self {
        self.session_configuration.write_timeout = timeout.as_millis() as u64;
        self
    }

    /// Set user agent
    pub fn user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.session_configuration.user_agent = Some(user_agent.into());
        self
    }

    /// Enable or disable cookies
    pub fn use_cookies(mut self, use_cookies: bool) -> Self {
        self.session_configuration.use_cookies = use_cookies;
        self
    }

    /// Enable or disable following redirects
    pub fn follow_redirects(mut self, follow: bool) -> Self {
        self.session_configuration.follow_redirects = follow;
        self
    }

    /// Accept self-signed server certificates (for testing only)
    pub fn trust_self_signed_server_certificate(mut self, trust: bool) -> Self {
        self.session_configuration.trust_self_signed_server_certificate = trust;
        self
    }

    /// Cancel other in-flight calls of the client on a 401 response
    pub fn cancel_requests_on_unauthorized(mut self, cancel: bool) -> Self {
        self.session_configuration.cancel_requests_on_unauthorized = cancel;
        self
    }

    /// Set the retry policy
    pub fn retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.retry_policy_configuration = Some(policy);
        self
    }

    /// Capture the bearer token from the named response header
    pub fn bearer_auth_token_response_header(mut self, name: impl Into<String>) -> Self {
        self.request_adapter_configuration
            .bearer_auth_token_response_header = Some(name.into());
        self
    }

    /// Import a PKCS#12 bundle when the client is created
    pub fn client_p12(mut self, path: impl Into<PathBuf>, password: impl Into<String>) -> Self {
        self.client_p12_configuration = Some(P12Configuration {
            path: path.into(),
            password: password.into(),
        });
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let options = ClientOptions::default();
        let session = &options.session_configuration;
        assert_eq!(session.read_timeout, 60_000);
        assert_eq!(session.write_timeout, 60_000);
        assert!(session.follow_redirects);
        assert!(session.use_cookies);
        assert!(!session.cancel_requests_on_unauthorized);
        assert!(options.retry_policy_configuration.is_none());
    }

    #[test]
    fn test_deserialize_bridge_options() {
        let options: ClientOptions = serde_json::from_value(serde_json::json!({
            "headers": {"X-Requested-With": "XMLHttpRequest"},
            "sessionConfiguration": {
                "readTimeout": 5000,
                "useCookies": false,
                "cancelRequestsOnUnauthorized": true
            },
            "requestAdapterConfiguration": {
                "bearerAuthTokenResponseHeader": "token"
            },
            "clientP12Configuration": {"path": "/certs/client.p12", "password": "pw"}
        }))
        .expect("options");

        assert_eq!(options.headers["X-Requested-With"], "XMLHttpRequest");
        assert_eq!(options.session_configuration.read_timeout, 5000);
        assert_eq!(options.session_configuration.write_timeout, 60_000);
        assert!(!options.session_configuration.use_cookies);
        assert!(options.session_configuration.cancel_requests_on_unauthorized);
        assert_eq!(
            options
                .request_adapter_configuration
                .bearer_auth_token_response_header
                .as_deref(),
            Some("token")
        );
        let p12 = options.client_p12_configuration.expect("p12");
        assert_eq!(p12.path, PathBuf::from("/certs/client.p12"));
        assert_eq!(p12.password, "pw");
    }

    #[test]
    fn test_backend_config_respects_cookie_flag() {
        let jar = Arc::new(CookieJar::new());
        let session = SessionConfiguration {
            use_cookies: false,
            read_timeout: 1500,
            ..Default::default()
        };
        let config = session.backend_config(&jar, None);
        assert!(config.cookie_jar.is_none());
        assert_eq!(config.read_timeout, Duration::from_millis(1500));

        let config = SessionConfiguration::default().backend_config(&jar, None);
        assert!(config.cookie_jar.is_some());
    }
}
