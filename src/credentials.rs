//! Credential store contract used for session tokens
//!
//! Secure storage lives outside this crate. The host platform implements
//! [`CredentialStore`] on top of its keychain or keystore and hands it to the
//! [`NetworkService`](crate::NetworkService) as `Arc<dyn CredentialStore>`.
//! Aliases are canonical base URL strings.

use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};

use crate::Result;

/// Opaque key/value storage for per-server secrets.
///
/// Encryption and decryption are entirely the implementor's responsibility.
pub trait CredentialStore: Send + Sync {
    /// Fetch the secret stored under `alias`, if any
    fn get(&self, alias: &str) -> Result<Option<Vec<u8>>>;

    /// Store `value` under `alias`, replacing any previous value
    fn set(&self, alias: &str, value: &[u8]) -> Result<()>;

    /// Remove the secret stored under `alias`; absent aliases are not an error
    fn delete(&self, alias: &str) -> Result<()>;
}

/// In-process credential store with no persistence
#[derive(Debug, Default)]
pub struct MemoryCredentialStore {
    entries: Mutex<HashMap<String, Vec<u8>>>,
}

impl MemoryCredentialStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }
}

impl CredentialStore for MemoryCredentialStore {
    fn get(&self, alias: &str) -> Result<Option<Vec<u8>>> {
        let entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(entries.get(alias).cloned())
    }

    fn set(&self, alias: &str, value: &[u8]) -> Result<()> {
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        entries.insert(alias.to_string(), value.to_vec());
        Ok(())
    }

    fn delete(&self, alias: &str) -> Result<()> {
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        entries.remove(alias);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_memory_store_round_trip() {
        let store = MemoryCredentialStore::new();
        assert_eq!(store.get("https://h/api").unwrap(), None);

        store.set("https://h/api", b"token-1").unwrap();
        store.set("https://h/api", b"token-2").unwrap();
        assert_eq!(store.get("https://h/api").unwrap(), Some(b"token-2".to_vec()));

        store.delete("https://h/api").unwrap();
        store.delete("https://h/api").unwrap();
        assert_eq!(store.get("https://h/api").unwrap(), None);
    }
}
