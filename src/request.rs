//! Request options, builders and the executor that dispatches calls

use crate::backend::types::{BackendRequest, BackendResponse, ProgressCallback};
use crate::client::ManagedClient;
use crate::retry::RetryPolicy;
use crate::{Error, Response, Result, body::Body};
use http::header::{AUTHORIZATION, HeaderMap, HeaderName, HeaderValue};
use http::Method;
use serde::Deserialize;
use std::collections::HashMap;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use url::Url;

/// Per-call options
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RequestOptions {
    /// Headers for this call; they override persistent headers
    pub headers: HashMap<String, String>,
    /// Request body
    pub body: Option<Body>,
    /// Total deadline for the call in milliseconds
    pub timeout_interval: Option<u64>,
    /// Retry policy overriding the client's
    pub retry_policy_configuration: Option<RetryPolicy>,
}

impl RequestOptions {
    /// Create empty options
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a header
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }

    /// Set the request body
    pub fn body(mut self, body: impl Into<Body>) -> Self {
        self.body = Some(body.into());
        self
    }

    /// Set the total deadline
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout_interval = Some(timeout.as_millis() as u64);
        self
    }

    /// Override the client's retry policy
    pub fn retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.retry_policy_configuration = Some(policy);
        self
    }
}

/// Parse one header pair, rejecting names or values that are not valid HTTP
pub(crate) fn parse_header(name: &str, value: &str) -> Result<(HeaderName, HeaderValue)> {
    let header_name = HeaderName::from_bytes(name.as_bytes())
        .map_err(|_| Error::InvalidHeader(format!("invalid name {:?}", name)))?;
    let header_value = HeaderValue::from_str(value)
        .map_err(|_| Error::InvalidHeader(format!("invalid value for {}", name)))?;
    Ok((header_name, header_value))
}

/// Request builder bound to one client
///
/// # Examples
///
/// ```no_run
/// # use courier::{ClientOptions, NetworkService};
/// # async fn example() -> courier::Result<()> {
/// let service = NetworkService::new()?;
/// let client = service
///     .create_client_for("https://api.example.com", ClientOptions::default())
///     .await?;
///
/// let response = client
///     .get("/users")
///     .header("Accept", "application/json")
///     .send()
///     .await?;
/// println!("{} {:?}", response.code, response.body);
/// # Ok(())
/// # }
/// ```
pub struct RequestBuilder<'a> {
    client: &'a ManagedClient,
    method: Method,
    endpoint: String,
    options: RequestOptions,
}

impl<'a> RequestBuilder<'a> {
    pub(crate) fn new(client: &'a ManagedClient, method: Method, endpoint: impl Into<String>) -> Self {
        Self {
            client,
            method,
            endpoint: endpoint.into(),
            options: RequestOptions::default(),
        }
    }

    /// Add a header
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.options.headers.insert(name.into(), value.into());
        self
    }

    /// Set the request body
    pub fn body(mut self, body: impl Into<Body>) -> Self {
        self.options.body = Some(body.into());
        self
    }

    /// Set a JSON body
    pub fn json(mut self, value: impl serde::Serialize) -> Result<Self> {
        self.options.body = Some(Body::json(value)?);
        Ok(self)
    }

    /// Set a form body
    pub fn form(
        mut self,
        fields: Vec<(
            impl Into<std::borrow::Cow<'static, str>>,
            impl Into<std::borrow::Cow<'static, str>>,
        )>,
    ) -> Self {
        self.options.body = Some(Body::form(fields));
        self
    }

    /// Set a text body
    pub fn text(mut self, content: impl Into<String>) -> Self {
        self.options.body = Some(Body::text(content));
        self
    }

    /// Set the total deadline
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.options.timeout_interval = Some(timeout.as_millis() as u64);
        self
    }

    /// Override the client's retry policy
    pub fn retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.options.retry_policy_configuration = Some(policy);
        self
    }

    /// Replace all options at once
    pub fn options(mut self, options: RequestOptions) -> Self {
        self.options = options;
        self
    }

    /// Send the request and materialize the response
    pub async fn send(self) -> Result<Response> {
        let url = self.client.resolve(&self.endpoint)?;
        let token = self.client.cancellation_scope();

        let dispatched = Call {
            client: self.client,
            method: self.method,
            url,
            options: self.options,
            progress: None,
            token: token.clone(),
        }
        .dispatch()
        .await?;

        dispatched.into_response(&token).await
    }
}

/// One logical call, possibly spanning several attempts
pub(crate) struct Call<'a> {
    pub(crate) client: &'a ManagedClient,
    pub(crate) method: Method,
    pub(crate) url: Url,
    pub(crate) options: RequestOptions,
    pub(crate) progress: Option<ProgressCallback>,
    pub(crate) token: CancellationToken,
}

/// Response head of a finished call, body not yet read
pub(crate) struct Dispatched {
    pub(crate) response: BackendResponse,
    /// The call's cancellation scope was renewed after a 401; the body is
    /// read without observing the old scope.
    pub(crate) detached: bool,
}

impl Call<'_> {
    /// Send the call, retrying per policy, until a final response head or error
    pub(crate) async fn dispatch(self) -> Result<Dispatched> {
        let Call {
            client,
            method,
            url,
            options,
            progress,
            token,
        } = self;
        let RequestOptions {
            headers: extra_headers,
            body,
            timeout_interval,
            retry_policy_configuration,
        } = options;

        let headers = compose_headers(client, &extra_headers)?;
        let timeout = timeout_interval.map(Duration::from_millis);

        let mut policy = retry_policy_configuration
            .or_else(|| client.retry_policy().cloned())
            .filter(|policy| policy.allows_method(&method));
        if policy.is_some() && body.as_ref().is_some_and(|body| !body.is_replayable()) {
            tracing::debug!(
                "Retries disabled for {} {}: body is streamed and cannot be replayed",
                method,
                url
            );
            policy = None;
        }

        let mut retry = 0u32;
        loop {
            // Load once per attempt so a rebuilt transport applies to the next attempt only
            let transport = client.transport();
            let request = BackendRequest {
                method: method.clone(),
                url: url.clone(),
                headers: headers.clone(),
                body: body.clone(),
                timeout,
                progress_callback: progress.clone(),
            };

            let result = tokio::select! {
                biased;
                _ = token.cancelled() => return Err(Error::Cancelled),
                result = transport.execute(request) => result,
            };

            let remaining = policy.as_ref().filter(|policy| retry < policy.retry_limit);
            match (result, remaining) {
                (Ok(response), Some(policy)) if policy.retries_status(response.status.as_u16()) => {
                    tracing::debug!(
                        "{} {} returned {}, retry {} of {}",
                        method,
                        url,
                        response.status,
                        retry + 1,
                        policy.retry_limit
                    );
                }
                (Ok(response), _) => {
                    let detached = client.observe(&response);
                    return Ok(Dispatched { response, detached });
                }
                (Err(e), Some(policy)) if e.is_retriable() => {
                    tracing::debug!(
                        "{} {} failed: {}, retry {} of {}",
                        method,
                        url,
                        e,
                        retry + 1,
                        policy.retry_limit
                    );
                }
                (Err(e), _) => {
                    tracing::debug!("{} {} failed: {}", method, url, e);
                    return Err(e);
                }
            }

            let delay = remaining.map(|policy| policy.delay(retry)).unwrap_or_default();
            retry += 1;

            tokio::select! {
                biased;
                _ = token.cancelled() => return Err(Error::Cancelled),
                _ = tokio::time::sleep(delay) => {}
            }
        }
    }
}

impl Dispatched {
    /// Read the whole body into an envelope, observing `token` unless detached
    pub(crate) async fn into_response(self, token: &CancellationToken) -> Result<Response> {
        if self.detached {
            return Response::from_backend(self.response).await;
        }

        tokio::select! {
            biased;
            _ = token.cancelled() => Err(Error::Cancelled),
            response = Response::from_backend(self.response) => response,
        }
    }
}

/// Persistent headers, then the bearer token, then per-call headers
fn compose_headers(client: &ManagedClient, extra: &HashMap<String, String>) -> Result<HeaderMap> {
    let mut headers = client.header_map();

    if let Some(authorization) = client.token_binding().and_then(|binding| binding.authorization()) {
        headers.insert(AUTHORIZATION, authorization);
    }

    for (name, value) in extra {
        let (name, value) = parse_header(name, value)?;
        headers.insert(name, value);
    }

    Ok(headers)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_header_rejects_invalid() {
        assert!(parse_header("X-Test", "ok").is_ok());
        assert!(matches!(
            parse_header("bad header", "v"),
            Err(Error::InvalidHeader(_))
        ));
        assert!(matches!(
            parse_header("X-Test", "line\nbreak"),
            Err(Error::InvalidHeader(_))
        ));
    }

    #[test]
    fn test_request_options_from_json() {
        let options: RequestOptions = serde_json::from_value(serde_json::json!({
            "headers": {"X-Test": "1"},
            "body": {"type": "json", "value": {"a": 1}},
            "timeoutInterval": 2500,
            "retryPolicyConfiguration": {"retryLimit": 0}
        }))
        .expect("options");

        assert_eq!(options.headers["X-Test"], "1");
        assert!(matches!(options.body, Some(Body::Json { .. })));
        assert_eq!(options.timeout_interval, Some(2500));
        assert_eq!(options.retry_policy_configuration.unwrap().retry_limit, 0);
    }
}
