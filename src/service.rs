//! Process-wide service owning clients, credentials and in-flight transfers

use std::collections::{BTreeMap, HashMap};
use std::future::Future;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use http::Method;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;

use crate::client::{ClientContext, ManagedClient, TransferOptions, TransferOutcome};
use crate::cookies::CookieJar;
use crate::credentials::{CredentialStore, MemoryCredentialStore};
use crate::events::{ClientEvent, EventSink};
use crate::registry::{BaseUrl, ClientRegistry};
use crate::request::RequestOptions;
use crate::session::ClientOptions;
use crate::tasks::TaskRegistry;
use crate::{Error, Response, Result};

/// Entry point for the bridge layer.
///
/// Owns one [`ManagedClient`] per base URL, the shared cookie jar, the
/// credential store used for bearer tokens and the registry of cancellable
/// transfers. All methods take `&self` and may be called from any thread.
///
/// # Examples
///
/// ```no_run
/// use courier::{ClientOptions, NetworkService, RequestOptions};
///
/// # async fn example() -> courier::Result<()> {
/// let service = NetworkService::new()?;
/// service
///     .create_client_for(
///         "https://api.example.com",
///         ClientOptions::default().header("X-App", "demo"),
///     )
///     .await?;
///
/// let response = service
///     .get("https://api.example.com", "/status", RequestOptions::default())
///     .await?;
/// assert!(response.ok);
/// # Ok(())
/// # }
/// ```
pub struct NetworkService {
    registry: ClientRegistry,
    tasks: TaskRegistry,
    context: ClientContext,
    generic: Arc<ManagedClient>,
    runtime: Option<Handle>,
}

impl NetworkService {
    /// Create a service with an in-memory credential store and no event listener
    pub fn new() -> Result<Self> {
        Self::builder().build()
    }

    /// Create a service builder
    pub fn builder() -> NetworkServiceBuilder {
        NetworkServiceBuilder::new()
    }

    /// Create (or replace) the client for `base_url`.
    ///
    /// The client, including any configured certificate, is fully built
    /// before the registry changes; a failure leaves the previous client in
    /// place.
    pub async fn create_client_for(
        &self,
        base_url: &str,
        options: ClientOptions,
    ) -> Result<Arc<ManagedClient>> {
        let base_url = BaseUrl::parse(base_url)?;
        let client = Arc::new(
            ManagedClient::new(base_url.clone(), options, self.context.clone()).await?,
        );

        if let Some(previous) = self.registry.insert(base_url.clone(), client.clone()) {
            tracing::debug!("Replaced client for {}", base_url);
            previous.shutdown();
        }
        Ok(client)
    }

    /// Shut down and remove the client for `base_url`, forgetting its
    /// session token and cookies
    pub fn invalidate_client_for(&self, base_url: &str) -> Result<()> {
        let base_url = BaseUrl::parse(base_url)?;
        let client = self
            .registry
            .remove(&base_url)
            .ok_or_else(|| Error::UnknownClient(base_url.to_string()))?;

        client.shutdown();
        if let Some(binding) = client.token_binding() {
            binding.forget();
        }
        self.context
            .cookie_jar
            .remove_cookies_for_url(&base_url.to_url()?);

        tracing::debug!("Invalidated client for {}", base_url);
        Ok(())
    }

    /// Client registered exactly at `base_url`
    pub fn client_for(&self, base_url: &str) -> Result<Arc<ManagedClient>> {
        let base_url = BaseUrl::parse(base_url)?;
        self.registry
            .get(&base_url)
            .ok_or_else(|| Error::UnknownClient(base_url.to_string()))
    }

    /// Client whose base URL is the longest prefix of `url`
    pub fn resolve_client_for(&self, url: &str) -> Option<Arc<ManagedClient>> {
        self.registry.resolve(url)
    }

    /// Registered base URLs
    pub fn clients(&self) -> Vec<BaseUrl> {
        self.registry.base_urls()
    }

    /// Persistent headers of the client for `base_url`
    pub fn client_headers_for(&self, base_url: &str) -> Result<BTreeMap<String, String>> {
        Ok(self.client_for(base_url)?.headers())
    }

    /// Merge headers into the client for `base_url`
    pub fn add_client_headers_for(
        &self,
        base_url: &str,
        headers: HashMap<String, String>,
    ) -> Result<()> {
        self.client_for(base_url)?.add_headers(headers)
    }

    /// Install a PKCS#12 client certificate on the client for `base_url`
    pub async fn import_client_p12_for(
        &self,
        base_url: &str,
        path: impl AsRef<Path>,
        password: &str,
    ) -> Result<()> {
        self.client_for(base_url)?
            .import_client_p12(path, password)
            .await
    }

    /// Send a request through the client for `base_url`
    pub async fn request(
        &self,
        method: Method,
        base_url: &str,
        endpoint: &str,
        options: RequestOptions,
    ) -> Result<Response> {
        let client = self.client_for(base_url)?;
        client.request(method, endpoint).options(options).send().await
    }

    /// Send a HEAD request
    pub async fn head(&self, base_url: &str, endpoint: &str, options: RequestOptions) -> Result<Response> {
        self.request(Method::HEAD, base_url, endpoint, options).await
    }

    /// Send a GET request
    pub async fn get(&self, base_url: &str, endpoint: &str, options: RequestOptions) -> Result<Response> {
        self.request(Method::GET, base_url, endpoint, options).await
    }

    /// Send a POST request
    pub async fn post(&self, base_url: &str, endpoint: &str, options: RequestOptions) -> Result<Response> {
        self.request(Method::POST, base_url, endpoint, options).await
    }

    /// Send a PUT request
    pub async fn put(&self, base_url: &str, endpoint: &str, options: RequestOptions) -> Result<Response> {
        self.request(Method::PUT, base_url, endpoint, options).await
    }

    /// Send a PATCH request
    pub async fn patch(&self, base_url: &str, endpoint: &str, options: RequestOptions) -> Result<Response> {
        self.request(Method::PATCH, base_url, endpoint, options).await
    }

    /// Send a DELETE request
    pub async fn delete(&self, base_url: &str, endpoint: &str, options: RequestOptions) -> Result<Response> {
        self.request(Method::DELETE, base_url, endpoint, options).await
    }

    /// Blocking variant of [`request`](Self::request).
    ///
    /// Runs on the service's multi-threaded runtime. Call it from a thread
    /// the runtime does not own. Any thread with a tokio runtime context,
    /// including `spawn_blocking` threads, is rejected with `Internal`; use
    /// the async [`request`](Self::request) there instead.
    pub fn request_sync(
        &self,
        method: Method,
        base_url: &str,
        endpoint: &str,
        options: RequestOptions,
    ) -> Result<Response> {
        if Handle::try_current().is_ok() {
            return Err(Error::Internal(
                "request_sync called from within an async context".to_string(),
            ));
        }
        let runtime = self.runtime()?;
        runtime.block_on(self.request(method, base_url, endpoint, options))
    }

    /// Send a request to an absolute URL.
    ///
    /// The registered client with the longest matching base URL is used;
    /// URLs no client claims go through a generic client without persistent
    /// headers or token injection.
    pub async fn fetch(&self, method: Method, url: &str, options: RequestOptions) -> Result<Response> {
        let client = self
            .registry
            .resolve(url)
            .unwrap_or_else(|| self.generic.clone());
        client.request(method, url).options(options).send().await
    }

    /// Start downloading `endpoint` to `destination` under `task_id`.
    ///
    /// The task is registered before this returns, so a following
    /// [`cancel_request`](Self::cancel_request) always reaches it. Await the
    /// returned handle for the outcome.
    pub fn download(
        &self,
        base_url: &str,
        endpoint: &str,
        destination: impl Into<PathBuf>,
        task_id: &str,
        options: TransferOptions,
    ) -> Result<TransferHandle> {
        let client = self.client_for(base_url)?;
        let runtime = self.runtime()?;

        let token = client.cancellation_scope();
        let guard = self.tasks.register(task_id, token.clone());
        let events = self.context.events.clone();
        let progress_id = task_id.to_string();
        let endpoint = endpoint.to_string();
        let destination = destination.into();

        let handle = runtime.spawn(async move {
            let _guard = guard;
            client
                .download(&endpoint, destination)
                .options(options)
                .cancellation(token)
                .progress(move |written, total| {
                    events.emit(ClientEvent::DownloadProgress {
                        task_id: progress_id.clone(),
                        bytes_transferred: written,
                        total_bytes: total,
                    })
                })
                .send()
                .await
        });

        Ok(TransferHandle {
            task_id: task_id.to_string(),
            handle,
        })
    }

    /// Start uploading the file at `source` to `endpoint` under `task_id`
    pub fn upload(
        &self,
        base_url: &str,
        endpoint: &str,
        source: impl Into<PathBuf>,
        task_id: &str,
        options: TransferOptions,
    ) -> Result<TransferHandle> {
        let client = self.client_for(base_url)?;
        let runtime = self.runtime()?;

        let token = client.cancellation_scope();
        let guard = self.tasks.register(task_id, token.clone());
        let events = self.context.events.clone();
        let progress_id = task_id.to_string();
        let endpoint = endpoint.to_string();
        let source = source.into();

        let handle = runtime.spawn(async move {
            let _guard = guard;
            client
                .upload(&endpoint, source)
                .options(options)?
                .cancellation(token)
                .progress(move |sent, total| {
                    events.emit(ClientEvent::UploadProgress {
                        task_id: progress_id.clone(),
                        bytes_transferred: sent,
                        total_bytes: total,
                    })
                })
                .send()
                .await
        });

        Ok(TransferHandle {
            task_id: task_id.to_string(),
            handle,
        })
    }

    /// Cancel the transfer registered under `task_id`; unknown ids are ignored
    pub fn cancel_request(&self, task_id: &str) {
        self.tasks.cancel(task_id);
    }

    /// Whether a transfer is registered under `task_id`
    pub fn is_request_active(&self, task_id: &str) -> bool {
        self.tasks.is_active(task_id)
    }

    /// Cancel every transfer and shut down every client
    pub fn shutdown(&self) {
        self.tasks.cancel_all();
        for client in self.registry.drain() {
            client.shutdown();
        }
        self.generic.shutdown();
    }

    /// Cookie jar shared by every client
    pub fn cookie_jar(&self) -> &Arc<CookieJar> {
        &self.context.cookie_jar
    }

    fn runtime(&self) -> Result<&Handle> {
        self.runtime
            .as_ref()
            .ok_or_else(|| Error::Internal("No tokio runtime available".to_string()))
    }
}

/// Completion of a spawned transfer
#[derive(Debug)]
pub struct TransferHandle {
    task_id: String,
    handle: JoinHandle<Result<TransferOutcome>>,
}

impl TransferHandle {
    /// Task id the transfer is registered under
    pub fn task_id(&self) -> &str {
        &self.task_id
    }
}

impl Future for TransferHandle {
    type Output = Result<TransferOutcome>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.handle).poll(cx).map(|joined| match joined {
            Ok(result) => result,
            Err(e) if e.is_cancelled() => Ok(TransferOutcome::Cancelled),
            Err(e) => Err(Error::Internal(format!("Transfer task failed: {}", e))),
        })
    }
}

/// Builder for [`NetworkService`]
#[derive(Default)]
pub struct NetworkServiceBuilder {
    credentials: Option<Arc<dyn CredentialStore>>,
    events: EventSink,
    cookie_jar: Option<Arc<CookieJar>>,
    runtime: Option<Handle>,
}

impl NetworkServiceBuilder {
    /// Create a new builder
    pub fn new() -> Self {
        Self::default()
    }

    /// Store bearer tokens in `store`
    pub fn credential_store(mut self, store: Arc<dyn CredentialStore>) -> Self {
        self.credentials = Some(store);
        self
    }

    /// Deliver events through `events`
    pub fn events(mut self, events: EventSink) -> Self {
        self.events = events;
        self
    }

    /// Share an existing cookie jar
    pub fn cookie_jar(mut self, cookie_jar: Arc<CookieJar>) -> Self {
        self.cookie_jar = Some(cookie_jar);
        self
    }

    /// Run transfers and blocking requests on `runtime`.
    ///
    /// Defaults to the runtime the service is built on, if any.
    pub fn runtime(mut self, runtime: Handle) -> Self {
        self.runtime = Some(runtime);
        self
    }

    /// Build the service
    pub fn build(self) -> Result<NetworkService> {
        let context = ClientContext {
            credentials: self
                .credentials
                .unwrap_or_else(|| Arc::new(MemoryCredentialStore::new())),
            events: self.events,
            cookie_jar: self.cookie_jar.unwrap_or_default(),
        };
        let generic = Arc::new(ManagedClient::generic(context.clone())?);

        Ok(NetworkService {
            registry: ClientRegistry::new(),
            tasks: TaskRegistry::new(),
            context,
            generic,
            runtime: self.runtime.or_else(|| Handle::try_current().ok()),
        })
    }
}
