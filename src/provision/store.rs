// Cardiac Node — Credential Store
//
// Persistent credential storage.
//
// The node only needs two strings under one namespace, so the backend is a
// tiny key/value trait.  NVS implements it on the device; `MemoryStore`
// does on the host.

use std::collections::HashMap;

use crate::config::{NVS_KEY_PASSWORD, NVS_KEY_SSID};
use crate::error::StoreError;
use crate::net::Credentials;

pub trait CredentialStore {
    fn get(&mut self, key: &str) -> Result<Option<String>, StoreError>;

    fn put(&mut self, key: &str, value: &str) -> Result<(), StoreError>;

    /// Removing a missing key is not an error.
    fn remove(&mut self, key: &str) -> Result<(), StoreError>;

    fn contains(&mut self, key: &str) -> Result<bool, StoreError> {
        Ok(self.get(key)?.is_some())
    }
}

/// Stored credentials, if a non-empty network name is present.  Values are
/// trusted as stored.
pub fn load_credentials<S: CredentialStore + ?Sized>(
    store: &mut S,
) -> Result<Option<Credentials>, StoreError> {
    let ssid = match store.get(NVS_KEY_SSID)? {
        Some(ssid) if !ssid.is_empty() => ssid,
        _ => return Ok(None),
    };
    let password = store.get(NVS_KEY_PASSWORD)?.unwrap_or_default();
    Ok(Some(Credentials { ssid, password }))
}

pub fn save_credentials<S: CredentialStore + ?Sized>(
    store: &mut S,
    credentials: &Credentials,
) -> Result<(), StoreError> {
    store.put(NVS_KEY_SSID, &credentials.ssid)?;
    store.put(NVS_KEY_PASSWORD, &credentials.password)
}

pub fn clear_credentials<S: CredentialStore + ?Sized>(store: &mut S) -> Result<(), StoreError> {
    store.remove(NVS_KEY_SSID)?;
    store.remove(NVS_KEY_PASSWORD)
}

/// Volatile store for host runs and tests.
#[derive(Debug, Default, Clone)]
pub struct MemoryStore {
    values: HashMap<String, String>,
    fail_writes: bool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_credentials(credentials: &Credentials) -> Self {
        let mut store = Self::default();
        store.values.insert(NVS_KEY_SSID.into(), credentials.ssid.clone());
        store
            .values
            .insert(NVS_KEY_PASSWORD.into(), credentials.password.clone());
        store
    }

    /// Make every subsequent `put`/`remove` fail.
    pub fn fail_writes(&mut self, fail: bool) {
        self.fail_writes = fail;
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    fn check_writable(&self) -> Result<(), StoreError> {
        if self.fail_writes {
            Err(StoreError::Backend("write rejected".into()))
        } else {
            Ok(())
        }
    }
}

impl CredentialStore for MemoryStore {
    fn get(&mut self, key: &str) -> Result<Option<String>, StoreError> {
        Ok(self.values.get(key).cloned())
    }

    fn put(&mut self, key: &str, value: &str) -> Result<(), StoreError> {
        self.check_writable()?;
        self.values.insert(key.to_owned(), value.to_owned());
        Ok(())
    }

    fn remove(&mut self, key: &str) -> Result<(), StoreError> {
        self.check_writable()?;
        self.values.remove(key);
        Ok(())
    }
}
