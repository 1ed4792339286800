//! Upload builder for streaming files from disk

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use http::Method;
use tokio_util::sync::CancellationToken;

use super::download::settle;
use super::{ManagedClient, TransferOptions, TransferOutcome};
use crate::backend::types::ProgressCallback;
use crate::body::Body;
use crate::request::{Call, RequestOptions};
use crate::{Error, Result};

/// Builder for uploading a local file.
///
/// The file is streamed as the request body, raw or as one part of a
/// multipart form, with `Content-Length` taken from the file's metadata.
/// Streamed bodies cannot be replayed, so uploads are never retried.
///
/// # Examples
///
/// ```no_run
/// # use courier::{ClientOptions, NetworkService};
/// # async fn example() -> courier::Result<()> {
/// let service = NetworkService::new()?;
/// let client = service
///     .create_client_for("https://files.example.com", ClientOptions::default())
///     .await?;
///
/// let outcome = client
///     .upload("/files", "/tmp/photo.jpg")
///     .multipart("photo", [("album", "holidays")])
///     .progress(|sent, total| println!("{} of {:?}", sent, total))
///     .send()
///     .await?;
/// # Ok(())
/// # }
/// ```
pub struct UploadBuilder<'a> {
    client: &'a ManagedClient,
    endpoint: String,
    source: PathBuf,
    method: Method,
    content_type: Option<String>,
    multipart: Option<(String, Vec<(String, String)>)>,
    options: RequestOptions,
    progress_callback: Option<ProgressCallback>,
    token: Option<CancellationToken>,
}

impl<'a> UploadBuilder<'a> {
    pub(crate) fn new(client: &'a ManagedClient, endpoint: &str, source: PathBuf) -> Self {
        Self {
            client,
            endpoint: endpoint.to_string(),
            source,
            method: Method::POST,
            content_type: None,
            multipart: None,
            options: RequestOptions::default(),
            progress_callback: None,
            token: None,
        }
    }

    /// Set the HTTP method (default `POST`)
    pub fn method(mut self, method: Method) -> Self {
        self.method = method;
        self
    }

    /// Add a header
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.options.headers.insert(name.into(), value.into());
        self
    }

    /// Set the content type of a raw upload
    pub fn content_type(mut self, content_type: impl Into<String>) -> Self {
        self.content_type = Some(content_type.into());
        self
    }

    /// Send the file as the `file_key` part of a multipart form with extra text fields
    pub fn multipart<K, V>(
        mut self,
        file_key: impl Into<String>,
        fields: impl IntoIterator<Item = (K, V)>,
    ) -> Self
    where
        K: Into<String>,
        V: Into<String>,
    {
        let fields = fields
            .into_iter()
            .map(|(k, v)| (k.into(), v.into()))
            .collect();
        self.multipart = Some((file_key.into(), fields));
        self
    }

    /// Set the total deadline
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.options.timeout_interval = Some(timeout.as_millis() as u64);
        self
    }

    /// Apply bridge supplied options
    pub fn options(mut self, options: TransferOptions) -> Result<Self> {
        if let Some(method) = &options.method {
            self.method = Method::from_bytes(method.to_ascii_uppercase().as_bytes())
                .map_err(|_| Error::Internal(format!("Invalid method {}", method)))?;
        }
        if let Some(multipart) = options.multipart {
            self.multipart = Some((multipart.file_key, multipart.data.into_iter().collect()));
        }
        if options.content_type.is_some() {
            self.content_type = options.content_type;
        }
        self.options.headers.extend(options.headers);
        self.options.timeout_interval = options.timeout_interval;
        Ok(self)
    }

    /// Set a callback receiving `(bytes_sent, total_bytes)`
    pub fn progress<F>(mut self, callback: F) -> Self
    where
        F: Fn(u64, Option<u64>) + Send + Sync + 'static,
    {
        self.progress_callback = Some(Arc::new(callback));
        self
    }

    /// Run under `token` instead of a fresh child of the client's session
    pub fn cancellation(mut self, token: CancellationToken) -> Self {
        self.token = Some(token);
        self
    }

    /// Execute the upload and read the server's response.
    ///
    /// # Errors
    ///
    /// - `FilesystemError` if the source is missing, unreadable or not a
    ///   regular file
    /// - `IOError` on network failure or a stalled body
    pub async fn send(self) -> Result<TransferOutcome> {
        let UploadBuilder {
            client,
            endpoint,
            source,
            method,
            content_type,
            multipart,
            mut options,
            progress_callback,
            token,
        } = self;

        let url = client.resolve(&endpoint)?;

        let metadata = tokio::fs::metadata(&source)
            .await
            .map_err(|e| Error::filesystem(&source, e))?;
        if !metadata.is_file() {
            return Err(Error::filesystem(
                &source,
                std::io::Error::new(std::io::ErrorKind::InvalidInput, "not a regular file"),
            ));
        }

        options.body = Some(match multipart {
            Some((file_key, fields)) => Body::multipart_file(file_key, source, fields),
            None => Body::file(source, content_type),
        });

        let token = token.unwrap_or_else(|| client.cancellation_scope());
        let call = Call {
            client,
            method,
            url,
            options,
            progress: progress_callback,
            token: token.clone(),
        };

        let dispatched = match call.dispatch().await {
            Ok(dispatched) => dispatched,
            Err(Error::Cancelled) => return Ok(TransferOutcome::Cancelled),
            Err(e) => return Err(e),
        };

        settle(dispatched.into_response(&token).await)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::{ClientContext, MultipartUpload};
    use crate::cookies::CookieJar;
    use crate::credentials::MemoryCredentialStore;
    use crate::events::EventSink;
    use crate::registry::BaseUrl;
    use crate::session::ClientOptions;

    async fn client() -> ManagedClient {
        let context = ClientContext {
            credentials: Arc::new(MemoryCredentialStore::new()),
            events: EventSink::disabled(),
            cookie_jar: Arc::new(CookieJar::new()),
        };
        ManagedClient::new(
            BaseUrl::parse("http://127.0.0.1:9").unwrap(),
            ClientOptions::default(),
            context,
        )
        .await
        .unwrap()
    }

    #[tokio::test]
    async fn test_missing_source_is_filesystem_error() {
        let client = client().await;
        let result = client.upload("/files", "/nonexistent/source.bin").send().await;
        assert_eq!(result.unwrap_err().code(), "FilesystemError");
    }

    #[tokio::test]
    async fn test_directory_source_is_filesystem_error() {
        let dir = tempfile::tempdir().unwrap();
        let client = client().await;
        let result = client.upload("/files", dir.path()).send().await;
        assert_eq!(result.unwrap_err().code(), "FilesystemError");
    }

    #[tokio::test]
    async fn test_options_apply_method_and_multipart() {
        let client = client().await;
        let builder = client
            .upload("/files", "/tmp/a.bin")
            .options(TransferOptions {
                method: Some("put".to_string()),
                multipart: Some(MultipartUpload {
                    file_key: "attachment".to_string(),
                    data: [("name".to_string(), "a".to_string())].into_iter().collect(),
                }),
                ..Default::default()
            })
            .unwrap();

        assert_eq!(builder.method, Method::PUT);
        let (file_key, fields) = builder.multipart.as_ref().unwrap();
        assert_eq!(file_key, "attachment");
        assert_eq!(fields, &vec![("name".to_string(), "a".to_string())]);
    }
}
