//! Access-key storage for the remote model.
//!
//! Keys live only for the process; nothing is written to disk.

use std::sync::RwLock;

use tracing::info;

use crate::error::DebateError;

/// Literal prefix every accepted key must carry.
pub const KEY_PREFIX: &str = "sk-";

/// Where the reply generator looks up its access key.
pub trait CredentialStore: Send + Sync {
    fn get(&self) -> Option<String>;

    /// Store a key. Keys without the `sk-` prefix are rejected with a
    /// user-facing message and the previous key is kept.
    fn set(&self, key: &str) -> Result<(), DebateError>;
}

/// Check a key against the prefix rule, returning the trimmed key.
pub fn validate_key(key: &str) -> Result<&str, DebateError> {
    let key = key.trim();
    if !key.starts_with(KEY_PREFIX) {
        return Err(DebateError::InvalidCredential(format!(
            "Please enter a DashScope API key starting with {}",
            KEY_PREFIX
        )));
    }
    Ok(key)
}

/// In-memory, session-scoped key store.
#[derive(Debug, Default)]
pub struct SessionKeyStore {
    key: RwLock<Option<String>>,
}

impl SessionKeyStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl CredentialStore for SessionKeyStore {
    fn get(&self) -> Option<String> {
        self.key
            .read()
            .map(|k| k.clone())
            .unwrap_or_else(|poisoned| poisoned.into_inner().clone())
    }

    fn set(&self, key: &str) -> Result<(), DebateError> {
        let key = validate_key(key)?.to_string();
        let mut slot = self
            .key
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        *slot = Some(key);
        info!("API key saved");
        Ok(())
    }
}
