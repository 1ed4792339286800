//! Fire-and-forget notifications for the application layer

use serde::Serialize;
use tokio::sync::mpsc;

/// Event delivered to the application layer
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "camelCase")]
pub enum ClientEvent {
    /// Authentication state for a server could not be read or written
    #[serde(rename_all = "camelCase")]
    ClientError {
        /// Base URL of the affected client
        server_url: String,
        /// Error code, see [`Error::code`](crate::Error::code)
        error_code: String,
        /// Human readable description
        error_description: String,
    },

    /// Bytes sent for an upload task
    #[serde(rename_all = "camelCase")]
    UploadProgress {
        /// Caller supplied task identifier
        task_id: String,
        /// Bytes sent so far
        bytes_transferred: u64,
        /// Total bytes, when known
        total_bytes: Option<u64>,
    },

    /// Bytes written for a download task
    #[serde(rename_all = "camelCase")]
    DownloadProgress {
        /// Caller supplied task identifier
        task_id: String,
        /// Bytes written so far
        bytes_transferred: u64,
        /// Total bytes, when known
        total_bytes: Option<u64>,
    },
}

/// Sending half of the event channel.
///
/// Emitting never blocks and never fails; events are dropped when nobody is
/// listening.
#[derive(Debug, Clone, Default)]
pub struct EventSink {
    sender: Option<mpsc::UnboundedSender<ClientEvent>>,
}

impl EventSink {
    /// Create a sink together with the receiver the bridge drains
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<ClientEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { sender: Some(tx) }, rx)
    }

    /// A sink that discards everything
    pub fn disabled() -> Self {
        Self::default()
    }

    /// Deliver an event without waiting
    pub fn emit(&self, event: ClientEvent) {
        if let Some(sender) = &self.sender {
            if sender.send(event).is_err() {
                tracing::debug!("Event receiver dropped, discarding event");
            }
        }
    }

    pub(crate) fn client_error(&self, server_url: &str, error: &crate::Error) {
        self.emit(ClientEvent::ClientError {
            server_url: server_url.to_string(),
            error_code: error.code().to_string(),
            error_description: error.to_string(),
        });
    }
}
