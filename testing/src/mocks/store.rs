//! In-memory credential store.

use courier_session_core::error::StoreError;
use courier_session_core::providers::{CredentialKey, CredentialStore};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

/// In-memory credential store.
///
/// Clones share the same map. Writes can be made to fail to exercise
/// persistence error paths.
#[derive(Debug, Clone, Default)]
pub struct InMemoryCredentialStore {
    values: Arc<Mutex<HashMap<CredentialKey, String>>>,
    fail_writes: Arc<AtomicBool>,
}

impl InMemoryCredentialStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Store pre-populated with the given entries.
    #[must_use]
    pub fn with_entries(entries: &[(CredentialKey, &str)]) -> Self {
        let store = Self::new();
        {
            #[allow(clippy::unwrap_used)] // Test mock: mutex poisoning is a test failure
            let mut values = store.values.lock().unwrap();
            for (key, value) in entries {
                values.insert(*key, (*value).to_string());
            }
        }
        store
    }

    /// Make subsequent `set` and `delete` calls fail.
    pub fn fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    /// Current value for `key`, bypassing the async trait.
    #[must_use]
    #[allow(clippy::unwrap_used)] // Test mock: mutex poisoning is a test failure
    pub fn value(&self, key: CredentialKey) -> Option<String> {
        self.values.lock().unwrap().get(&key).cloned()
    }

    /// `true` if nothing is stored.
    #[must_use]
    #[allow(clippy::unwrap_used)] // Test mock: mutex poisoning is a test failure
    pub fn is_empty(&self) -> bool {
        self.values.lock().unwrap().is_empty()
    }

    fn check_writable(&self) -> Result<(), StoreError> {
        if self.fail_writes.load(Ordering::SeqCst) {
            Err(StoreError::Backend("writes disabled".into()))
        } else {
            Ok(())
        }
    }
}

impl CredentialStore for InMemoryCredentialStore {
    #[allow(clippy::unwrap_used)] // Test mock: mutex poisoning is a test failure
    async fn get(&self, key: CredentialKey) -> Result<Option<String>, StoreError> {
        Ok(self.values.lock().unwrap().get(&key).cloned())
    }

    #[allow(clippy::unwrap_used)] // Test mock: mutex poisoning is a test failure
    async fn set(&self, key: CredentialKey, value: &str) -> Result<(), StoreError> {
        self.check_writable()?;
        self.values.lock().unwrap().insert(key, value.to_string());
        Ok(())
    }

    #[allow(clippy::unwrap_used)] // Test mock: mutex poisoning is a test failure
    async fn delete(&self, key: CredentialKey) -> Result<(), StoreError> {
        self.check_writable()?;
        self.values.lock().unwrap().remove(&key);
        Ok(())
    }
}
