// Cardiac Node — NVS credential store

use esp_idf_svc::nvs::{EspDefaultNvsPartition, EspNvs, NvsDefault};

use crate::config::{NVS_NAMESPACE, WIFI_PASSWORD_MAX};
use crate::error::StoreError;
use crate::provision::CredentialStore;

fn backend(e: impl core::fmt::Display) -> StoreError {
    StoreError::Backend(e.to_string())
}

pub struct NvsStore {
    nvs: EspNvs<NvsDefault>,
}

impl NvsStore {
    pub fn new(partition: EspDefaultNvsPartition) -> anyhow::Result<Self> {
        Ok(Self {
            nvs: EspNvs::new(partition, NVS_NAMESPACE, true)?,
        })
    }
}

impl CredentialStore for NvsStore {
    fn get(&mut self, key: &str) -> Result<Option<String>, StoreError> {
        // Longest value is a passphrase plus the terminator.
        let mut buf = [0u8; WIFI_PASSWORD_MAX + 1];
        self.nvs
            .get_str(key, &mut buf)
            .map(|value| value.map(str::to_owned))
            .map_err(backend)
    }

    fn put(&mut self, key: &str, value: &str) -> Result<(), StoreError> {
        self.nvs.set_str(key, value).map_err(backend)
    }

    fn remove(&mut self, key: &str) -> Result<(), StoreError> {
        self.nvs.remove(key).map(|_| ()).map_err(backend)
    }
}
