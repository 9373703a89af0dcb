//! Secure string store seam
//!
//! The platform keychain/keystore lives outside this crate. Everything that
//! persists key material goes through [`SecureStore`].

use std::collections::HashMap;

use parking_lot::RwLock;
use zeroize::Zeroizing;

use crate::error::Result;

/// Persistent owner of key material
pub trait SecureStore: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<String>>;

    /// Store `value` under `key`; `None` removes the entry.
    fn set(&self, key: &str, value: Option<String>) -> Result<()>;

    /// Remove an entry, overwriting its memory where the backend allows.
    fn delete(&self, key: &str) -> Result<()> {
        self.set(key, None)
    }

    fn get_by_id(&self, namespace: &str, id: &str) -> Result<Option<String>> {
        self.get(&namespaced(namespace, id))
    }

    fn store(&self, namespace: &str, id: &str, value: String) -> Result<()> {
        self.set(&namespaced(namespace, id), Some(value))
    }

    fn remove(&self, namespace: &str, id: &str) -> Result<()> {
        self.delete(&namespaced(namespace, id))
    }

    fn has(&self, namespace: &str, id: &str) -> Result<bool> {
        Ok(self.get_by_id(namespace, id)?.is_some())
    }
}

fn namespaced(namespace: &str, id: &str) -> String {
    format!("{}.{}", namespace, id)
}

/// In-process store; values are zeroized when replaced or removed
#[derive(Default)]
pub struct MemoryStore {
    entries: RwLock<HashMap<String, Zeroizing<String>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }
}

impl SecureStore for MemoryStore {
    fn get(&self, key: &str) -> Result<Option<String>> {
        Ok(self.entries.read().get(key).map(|value| (**value).clone()))
    }

    fn set(&self, key: &str, value: Option<String>) -> Result<()> {
        let mut entries = self.entries.write();
        match value {
            Some(value) => {
                entries.insert(key.to_string(), Zeroizing::new(value));
            }
            None => {
                entries.remove(key);
            }
        }
        Ok(())
    }
}
