//! Reqwest backend for cross-platform HTTP support

use crate::backend::types::{BackendRequest, BackendResponse, ProgressCallback};
use crate::backend::{BackendConfig, TRANSFER_BUFFER_SIZE};
use crate::body::Body;
use crate::{Error, Result};
use futures_util::StreamExt;
use http::header::{CONTENT_LENGTH, CONTENT_TYPE, HeaderMap, HeaderValue};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tokio_util::io::ReaderStream;

/// Reqwest backend for cross-platform HTTP
#[derive(Clone, Debug)]
pub struct ReqwestBackend {
    client: reqwest::Client,
    config: BackendConfig,
}

impl ReqwestBackend {
    /// Create a new Reqwest backend with configuration.
    ///
    /// No connect timeout is configured: calls are bounded by the read and
    /// write timeouts only.
    pub fn with_config(config: BackendConfig) -> Result<Self> {
        let mut builder = reqwest::Client::builder()
            .read_timeout(config.read_timeout)
            .redirect(if config.follow_redirects {
                reqwest::redirect::Policy::default()
            } else {
                reqwest::redirect::Policy::none()
            });

        if let Some(user_agent) = &config.user_agent {
            builder = builder.user_agent(user_agent.clone());
        }

        if config.trust_self_signed_certificates {
            builder = builder.danger_accept_invalid_certs(true);
        }

        if let Some(max) = config.max_connections_per_host {
            builder = builder.pool_max_idle_per_host(max);
        }

        if let Some(cookie_jar) = &config.cookie_jar {
            builder = builder.cookie_provider(cookie_jar.clone());
        }

        // PKCS#12 identities are only understood by the native TLS stack
        builder = match &config.identity {
            Some(identity) => builder.use_native_tls().identity(identity.inner().clone()),
            None => builder.use_rustls_tls(),
        };

        let client = builder
            .build()
            .map_err(|e| Error::Internal(format!("Failed to create reqwest client: {}", e)))?;

        Ok(Self { client, config })
    }

    /// Execute an HTTP request using reqwest
    pub async fn execute(&self, request: BackendRequest) -> Result<BackendResponse> {
        let BackendRequest {
            method,
            url,
            mut headers,
            body,
            timeout,
            progress_callback,
        } = request;
        let is_head = method == http::Method::HEAD;

        let mut watchdog = None;
        let body = match body {
            Some(Body::Empty) | None => None,
            Some(Body::Multipart { parts }) => {
                headers.remove(CONTENT_TYPE);
                let mut form = reqwest::multipart::Form::new();
                for part in parts {
                    let mut part_builder = reqwest::multipart::Part::bytes(part.content.to_vec());

                    if let Some(filename) = &part.filename {
                        part_builder = part_builder.file_name(filename.clone());
                    }

                    if let Some(content_type) = &part.content_type {
                        part_builder = part_builder.mime_str(content_type).map_err(|e| {
                            Error::Internal(format!("Invalid content type: {}", e))
                        })?;
                    }

                    form = form.part(part.name.clone(), part_builder);
                }
                Some(RequestPayload::Multipart(form))
            }
            Some(Body::File { path, content_type }) => {
                let file = self.file_stream(&path, progress_callback).await?;
                set_default_header(&mut headers, CONTENT_TYPE, &content_type)?;
                headers.insert(CONTENT_LENGTH, HeaderValue::from(file.len));
                watchdog = Some(file.watchdog);
                Some(RequestPayload::Raw(file.body))
            }
            Some(Body::MultipartFile {
                file_key,
                path,
                fields,
            }) => {
                headers.remove(CONTENT_TYPE);
                let file = self.file_stream(&path, progress_callback).await?;
                let file_name = path
                    .file_name()
                    .and_then(|name| name.to_str())
                    .unwrap_or("file")
                    .to_string();

                let mut form = reqwest::multipart::Form::new();
                for (name, value) in fields {
                    form = form.text(name, value);
                }
                let part = reqwest::multipart::Part::stream_with_length(file.body, file.len)
                    .file_name(file_name);
                form = form.part(file_key, part);

                watchdog = Some(file.watchdog);
                Some(RequestPayload::Multipart(form))
            }
            Some(body) => {
                let (content, content_type) = self.convert_body(body)?;
                set_default_header(&mut headers, CONTENT_TYPE, &content_type)?;
                Some(RequestPayload::Raw(content))
            }
        };

        // Build request
        let mut req_builder = self.client.request(method, url).headers(headers);

        if let Some(timeout) = timeout {
            req_builder = req_builder.timeout(timeout);
        }

        match body {
            Some(RequestPayload::Raw(body)) => req_builder = req_builder.body(body),
            Some(RequestPayload::Multipart(form)) => req_builder = req_builder.multipart(form),
            None => {}
        }

        // Send request, racing the write watchdog when a body is streamed
        let send = req_builder.send();
        let response = match watchdog {
            Some(watchdog) => tokio::select! {
                response = send => response?,
                _ = watchdog.expired() => {
                    tracing::debug!("Request body stalled for {:?}", watchdog.timeout);
                    return Err(Error::Timeout);
                }
            },
            None => send.await?,
        };

        let status = response.status();
        let headers = response.headers().clone();
        let url = response.url().clone();

        // Create channel for streaming body
        let (tx, rx) = mpsc::channel(32);

        if !is_head {
            tokio::spawn(async move {
                let mut stream = response.bytes_stream();
                while let Some(chunk) = stream.next().await {
                    match chunk {
                        Ok(bytes) => {
                            if tx.send(Ok(bytes)).await.is_err() {
                                break;
                            }
                        }
                        Err(e) => {
                            let _ = tx.send(Err(Error::from(e))).await;
                            break;
                        }
                    }
                }
            });
        }

        Ok(BackendResponse {
            status,
            headers,
            url,
            body_receiver: rx,
        })
    }

    fn convert_body(&self, body: Body) -> Result<(reqwest::Body, String)> {
        match body {
            Body::Bytes {
                content,
                content_type,
            } => Ok((reqwest::Body::from(content), content_type)),
            Body::Form { fields } => {
                let form_data = fields
                    .iter()
                    .map(|(k, v)| format!("{}={}", urlencoding::encode(k), urlencoding::encode(v)))
                    .collect::<Vec<_>>()
                    .join("&");
                Ok((
                    reqwest::Body::from(form_data),
                    "application/x-www-form-urlencoded".to_string(),
                ))
            }
            Body::Json { value } => {
                let json_bytes = serde_json::to_vec(&value)?;
                Ok((
                    reqwest::Body::from(json_bytes),
                    "application/json".to_string(),
                ))
            }
            Body::Empty | Body::Multipart { .. } | Body::File { .. } | Body::MultipartFile { .. } => {
                Err(Error::Internal(
                    "Streamed and multipart bodies are encoded separately".to_string(),
                ))
            }
        }
    }

    /// Open `path` as a body stream read through a fixed-size buffer
    async fn file_stream(
        &self,
        path: &Path,
        progress_callback: Option<ProgressCallback>,
    ) -> Result<FileStream> {
        let file = tokio::fs::File::open(path)
            .await
            .map_err(|e| Error::filesystem(path, e))?;
        let len = file
            .metadata()
            .await
            .map_err(|e| Error::filesystem(path, e))?
            .len();

        let watchdog = Arc::new(WriteWatchdog::new(self.config.write_timeout));
        if len == 0 {
            watchdog.finish();
        }

        let progress = watchdog.clone();
        let mut sent = 0u64;
        let stream =
            ReaderStream::with_capacity(file, TRANSFER_BUFFER_SIZE).inspect(move |chunk| {
                if let Ok(bytes) = chunk {
                    sent += bytes.len() as u64;
                    progress.touch();
                    if let Some(callback) = &progress_callback {
                        callback(sent, Some(len));
                    }
                    if sent >= len {
                        progress.finish();
                    }
                }
            });

        Ok(FileStream {
            body: reqwest::Body::wrap_stream(stream),
            len,
            watchdog,
        })
    }
}

enum RequestPayload {
    Raw(reqwest::Body),
    Multipart(reqwest::multipart::Form),
}

struct FileStream {
    body: reqwest::Body,
    len: u64,
    watchdog: Arc<WriteWatchdog>,
}

fn set_default_header(
    headers: &mut HeaderMap,
    name: http::header::HeaderName,
    value: &str,
) -> Result<()> {
    if !headers.contains_key(&name) {
        let value = HeaderValue::from_str(value)
            .map_err(|_| Error::InvalidHeader(format!("{}: {}", name, value)))?;
        headers.insert(name, value);
    }
    Ok(())
}

/// Detects a streamed request body that stopped being pulled by the connection
struct WriteWatchdog {
    timeout: Duration,
    last_progress: Mutex<Instant>,
    finished: AtomicBool,
}

impl WriteWatchdog {
    fn new(timeout: Duration) -> Self {
        Self {
            timeout,
            last_progress: Mutex::new(Instant::now()),
            finished: AtomicBool::new(false),
        }
    }

    fn touch(&self) {
        *self
            .last_progress
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Instant::now();
    }

    fn finish(&self) {
        self.finished.store(true, Ordering::Release);
    }

    fn last_progress(&self) -> Instant {
        *self
            .last_progress
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Resolves once no chunk was pulled for `timeout`; never resolves after
    /// the whole body has been handed to the connection.
    async fn expired(&self) {
        loop {
            if self.finished.load(Ordering::Acquire) {
                std::future::pending::<()>().await;
            }

            let deadline = self.last_progress() + self.timeout;
            tokio::time::sleep_until(tokio::time::Instant::from_std(deadline)).await;

            if !self.finished.load(Ordering::Acquire)
                && self.last_progress().elapsed() >= self.timeout
            {
                return;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_watchdog_fires_without_progress() {
        let watchdog = WriteWatchdog::new(Duration::from_millis(20));
        let fired = tokio::time::timeout(Duration::from_secs(2), watchdog.expired()).await;
        assert!(fired.is_ok());
    }

    #[tokio::test]
    async fn test_watchdog_disarmed_after_finish() {
        let watchdog = WriteWatchdog::new(Duration::from_millis(20));
        watchdog.finish();
        let fired = tokio::time::timeout(Duration::from_millis(100), watchdog.expired()).await;
        assert!(fired.is_err());
    }

    #[test]
    fn test_set_default_header_keeps_caller_value() {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("text/csv"));
        set_default_header(&mut headers, CONTENT_TYPE, "application/json").unwrap();
        assert_eq!(headers[CONTENT_TYPE], "text/csv");

        let mut empty = HeaderMap::new();
        set_default_header(&mut empty, CONTENT_TYPE, "application/json").unwrap();
        assert_eq!(empty[CONTENT_TYPE], "application/json");
    }

    #[test]
    fn test_backend_builds_with_defaults() {
        let backend = ReqwestBackend::with_config(BackendConfig::default());
        assert!(backend.is_ok());
    }
}
