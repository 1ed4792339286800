//! Session token handling for bearer authentication
//!
//! The token for a client lives in the [`CredentialStore`] under the client's
//! base URL. It is read before each call and, when the client names a
//! capture header, written back from responses. Store failures never fail
//! the call; they are reported as [`ClientEvent::ClientError`](crate::ClientEvent).

use std::fmt;

use http::{HeaderMap, HeaderValue};

use crate::credentials::CredentialStore;
use crate::events::EventSink;
use crate::{Error, Result};

/// Bearer token for one server
#[derive(Clone, PartialEq, Eq)]
pub struct BearerToken(String);

impl BearerToken {
    /// Wrap a raw token
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    /// Decode a stored token
    fn from_stored(bytes: Vec<u8>) -> Result<Self> {
        String::from_utf8(bytes)
            .map(Self)
            .map_err(|_| Error::Credential("Stored token is not valid UTF-8".to_string()))
    }

    /// Value of the `Authorization` header for this token
    pub fn to_header_value(&self) -> Result<HeaderValue> {
        let mut value = HeaderValue::from_str(&format!("Bearer {}", self.0))
            .map_err(|_| Error::Credential("Stored token is not a valid header value".to_string()))?;
        value.set_sensitive(true);
        Ok(value)
    }

    /// Raw token
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for BearerToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("BearerToken(..)")
    }
}

/// Binds a client's base URL to the credential store and event channel
pub(crate) struct TokenBinding<'a> {
    pub(crate) store: &'a dyn CredentialStore,
    pub(crate) alias: &'a str,
    pub(crate) events: &'a EventSink,
}

impl TokenBinding<'_> {
    /// `Authorization` header for the stored token, if one exists.
    ///
    /// An absent token is silent; a failing store or an unusable token emits
    /// an event and the call proceeds unauthenticated.
    pub(crate) fn authorization(&self) -> Option<HeaderValue> {
        let lookup = self
            .store
            .get(self.alias)
            .and_then(|stored| stored.map(BearerToken::from_stored).transpose())
            .and_then(|token| token.map(|t| t.to_header_value()).transpose());

        match lookup {
            Ok(value) => value,
            Err(e) => {
                tracing::warn!("Failed to load token for {}: {}", self.alias, e);
                self.events.client_error(self.alias, &e);
                None
            }
        }
    }

    /// Store the value of `header` from `headers` as the new token
    pub(crate) fn capture(&self, header: &str, headers: &HeaderMap) {
        let Some(value) = headers.get(header) else {
            return;
        };

        let stored = match value.to_str() {
            Ok(token) if !token.is_empty() => self.store.set(self.alias, token.as_bytes()),
            Ok(_) => return,
            Err(_) => Err(Error::Credential(format!(
                "Header {} is not a valid token",
                header
            ))),
        };

        match stored {
            Ok(()) => tracing::debug!("Captured token for {} from {}", self.alias, header),
            Err(e) => {
                tracing::warn!("Failed to store token for {}: {}", self.alias, e);
                self.events.client_error(self.alias, &e);
            }
        }
    }

    /// Remove the stored token
    pub(crate) fn forget(&self) {
        if let Err(e) = self.store.delete(self.alias) {
            tracing::warn!("Failed to delete token for {}: {}", self.alias, e);
            self.events.client_error(self.alias, &e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::credentials::MemoryCredentialStore;
    use crate::events::ClientEvent;

    struct BrokenStore;

    impl CredentialStore for BrokenStore {
        fn get(&self, _alias: &str) -> Result<Option<Vec<u8>>> {
            Err(Error::Credential("locked".to_string()))
        }

        fn set(&self, _alias: &str, _value: &[u8]) -> Result<()> {
            Err(Error::Credential("locked".to_string()))
        }

        fn delete(&self, _alias: &str) -> Result<()> {
            Ok(())
        }
    }

    #[test]
    fn test_bearer_header_value() {
        let value = BearerToken::new("token123").to_header_value().unwrap();
        assert_eq!(value, "Bearer token123");
        assert!(value.is_sensitive());
        assert_eq!(format!("{:?}", BearerToken::new("secret")), "BearerToken(..)");
    }

    #[test]
    fn test_absent_token_is_silent() {
        let store = MemoryCredentialStore::new();
        let (events, mut rx) = EventSink::channel();
        let binding = TokenBinding {
            store: &store,
            alias: "https://h/api",
            events: &events,
        };

        assert!(binding.authorization().is_none());
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_capture_then_inject() {
        let store = MemoryCredentialStore::new();
        let events = EventSink::disabled();
        let binding = TokenBinding {
            store: &store,
            alias: "https://h/api",
            events: &events,
        };

        let mut headers = HeaderMap::new();
        headers.insert("token", HeaderValue::from_static("abc"));
        binding.capture("token", &headers);

        assert_eq!(binding.authorization().unwrap(), "Bearer abc");

        binding.forget();
        assert!(binding.authorization().is_none());
    }

    #[test]
    fn test_store_failure_emits_event() {
        let (events, mut rx) = EventSink::channel();
        let binding = TokenBinding {
            store: &BrokenStore,
            alias: "https://h/api",
            events: &events,
        };

        assert!(binding.authorization().is_none());
        let mut headers = HeaderMap::new();
        headers.insert("token", HeaderValue::from_static("abc"));
        binding.capture("token", &headers);

        for _ in 0..2 {
            match rx.try_recv().expect("event") {
                ClientEvent::ClientError {
                    server_url,
                    error_code,
                    ..
                } => {
                    assert_eq!(server_url, "https://h/api");
                    assert_eq!(error_code, "CredentialError");
                }
                other => panic!("unexpected event {:?}", other),
            }
        }
    }
}
