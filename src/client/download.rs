//! Download builder for streaming responses to disk

use std::path::{Path, PathBuf};
use std::time::Duration;

use http::Method;
use http::header::CONTENT_LENGTH;
use tokio::io::{AsyncWriteExt, BufWriter};
use tokio_util::sync::CancellationToken;

use super::{ManagedClient, TransferOptions, TransferOutcome};
use crate::backend::TRANSFER_BUFFER_SIZE;
use crate::backend::types::{BackendResponse, ProgressCallback};
use crate::request::{Call, RequestOptions};
use crate::response::{Response, ResponseBody};
use crate::{Error, Result};

/// Builder for downloading a resource to a local file.
///
/// The body is written through a fixed-size buffer as it arrives, so large
/// files are never held in memory. A non-2xx response resolves with an
/// envelope whose `ok` is false and leaves the destination untouched.
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
/// let response = client
///     .download("/reports/2024.pdf", "/tmp/reports/2024.pdf")
///     .progress(|written, total| {
///         if let Some(total) = total {
///             println!("{:.1}%", written as f64 / total as f64 * 100.0);
///         }
///     })
///     .send()
///     .await?
///     .into_result()?;
/// println!("{:?}", response.body);
/// # Ok(())
/// # }
/// ```
pub struct DownloadBuilder<'a> {
    client: &'a ManagedClient,
    endpoint: String,
    destination: PathBuf,
    options: RequestOptions,
    progress_callback: Option<ProgressCallback>,
    token: Option<CancellationToken>,
}

impl<'a> DownloadBuilder<'a> {
    pub(crate) fn new(client: &'a ManagedClient, endpoint: &str, destination: PathBuf) -> Self {
        Self {
            client,
            endpoint: endpoint.to_string(),
            destination,
            options: RequestOptions::default(),
            progress_callback: None,
            token: None,
        }
    }

    /// Add a header
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.options.headers.insert(name.into(), value.into());
        self
    }

    /// Set the total deadline
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.options.timeout_interval = Some(timeout.as_millis() as u64);
        self
    }

    /// Apply bridge supplied options; upload-only fields are ignored
    pub fn options(mut self, options: TransferOptions) -> Self {
        self.options.headers.extend(options.headers);
        self.options.timeout_interval = options.timeout_interval;
        self
    }

    /// Set a callback receiving `(bytes_written, total_bytes)`
    pub fn progress<F>(mut self, callback: F) -> Self
    where
        F: Fn(u64, Option<u64>) + Send + Sync + 'static,
    {
        self.progress_callback = Some(std::sync::Arc::new(callback));
        self
    }

    /// Run under `token` instead of a fresh child of the client's session
    pub fn cancellation(mut self, token: CancellationToken) -> Self {
        self.token = Some(token);
        self
    }

    /// Execute the download.
    ///
    /// # Errors
    ///
    /// - `FilesystemError` if the parent directory or the file cannot be
    ///   created or written
    /// - `EmptyBody` if a successful response carries no bytes; no file is
    ///   created
    /// - `IOError` on network failure
    ///
    /// A partially written file is left in place when the transfer fails or
    /// is cancelled.
    pub async fn send(self) -> Result<TransferOutcome> {
        let DownloadBuilder {
            client,
            endpoint,
            destination,
            options,
            progress_callback,
            token,
        } = self;

        let url = client.resolve(&endpoint)?;

        if let Some(parent) = destination.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| Error::filesystem(parent, e))?;
        }

        let token = token.unwrap_or_else(|| client.cancellation_scope());
        let call = Call {
            client,
            method: Method::GET,
            url,
            options,
            progress: None,
            token: token.clone(),
        };

        let dispatched = match call.dispatch().await {
            Ok(dispatched) => dispatched,
            Err(Error::Cancelled) => return Ok(TransferOutcome::Cancelled),
            Err(e) => return Err(e),
        };

        if !dispatched.response.status.is_success() {
            tracing::debug!(
                "Download from {} returned {}, destination left untouched",
                dispatched.response.url,
                dispatched.response.status
            );
            return settle(dispatched.into_response(&token).await);
        }

        write_to_file(dispatched.response, &destination, &token, progress_callback).await
    }
}

/// Map a cancelled call onto [`TransferOutcome::Cancelled`]
pub(crate) fn settle(result: Result<Response>) -> Result<TransferOutcome> {
    match result {
        Ok(response) => Ok(TransferOutcome::Completed(response)),
        Err(Error::Cancelled) => Ok(TransferOutcome::Cancelled),
        Err(e) => Err(e),
    }
}

async fn write_to_file(
    response: BackendResponse,
    destination: &Path,
    token: &CancellationToken,
    progress_callback: Option<ProgressCallback>,
) -> Result<TransferOutcome> {
    let BackendResponse {
        status,
        headers,
        url,
        mut body_receiver,
    } = response;

    let total_bytes = headers
        .get(CONTENT_LENGTH)
        .and_then(|v| v.to_str().ok())
        .and_then(|s| s.parse::<u64>().ok());

    // Wait for the first bytes before creating the file
    let mut chunk = loop {
        let next = tokio::select! {
            biased;
            _ = token.cancelled() => return Ok(TransferOutcome::Cancelled),
            next = body_receiver.recv() => next,
        };
        match next {
            Some(Ok(bytes)) if bytes.is_empty() => continue,
            Some(Ok(bytes)) => break bytes,
            Some(Err(e)) => return Err(e),
            None => return Err(Error::EmptyBody),
        }
    };

    let file = tokio::fs::File::create(destination)
        .await
        .map_err(|e| Error::filesystem(destination, e))?;
    let mut writer = BufWriter::with_capacity(TRANSFER_BUFFER_SIZE, file);
    let mut bytes_written = 0u64;

    loop {
        writer
            .write_all(&chunk)
            .await
            .map_err(|e| Error::filesystem(destination, e))?;
        bytes_written += chunk.len() as u64;

        if let Some(callback) = &progress_callback {
            callback(bytes_written, total_bytes);
        }

        let next = tokio::select! {
            biased;
            _ = token.cancelled() => None,
            next = body_receiver.recv() => Some(next),
        };

        chunk = match next {
            Some(Some(Ok(bytes))) => bytes,
            Some(None) => break,
            Some(Some(Err(e))) => {
                let _ = writer.flush().await;
                return Err(e);
            }
            None => {
                let _ = writer.flush().await;
                tracing::debug!(
                    "Download to {} cancelled after {} bytes",
                    destination.display(),
                    bytes_written
                );
                return Ok(TransferOutcome::Cancelled);
            }
        };
    }

    writer
        .shutdown()
        .await
        .map_err(|e| Error::filesystem(destination, e))?;

    tracing::debug!(
        "Downloaded {} bytes to {}",
        bytes_written,
        destination.display()
    );

    Ok(TransferOutcome::Completed(Response::new(
        status,
        &headers,
        url,
        ResponseBody::File {
            path: destination.to_path_buf(),
            bytes_written,
        },
    )))
}
