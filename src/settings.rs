// SkWatch - Persisted Settings
//
// Settings records are serde structs encoded with postcard and stored as
// opaque blobs in a key/value `ConfigStore` (NVS on the device).

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use anyhow::Context;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::config::*;

/// Byte-oriented key/value storage provided by the platform.
pub trait ConfigStore: Send {
    fn load(&self, key: &str) -> anyhow::Result<Option<Vec<u8>>>;
    fn save(&mut self, key: &str, value: &[u8]) -> anyhow::Result<()>;
}

/// In-process store used by the host simulator and tests.
#[derive(Debug, Default, Clone)]
pub struct MemoryStore {
    entries: HashMap<String, Vec<u8>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ConfigStore for MemoryStore {
    fn load(&self, key: &str) -> anyhow::Result<Option<Vec<u8>>> {
        Ok(self.entries.get(key).cloned())
    }

    fn save(&mut self, key: &str, value: &[u8]) -> anyhow::Result<()> {
        self.entries.insert(key.to_owned(), value.to_vec());
        Ok(())
    }
}

/// Thread-safe handle to the configuration store, cheap to clone.
#[derive(Clone)]
pub struct SettingsStore {
    inner: Arc<Mutex<Box<dyn ConfigStore>>>,
}

impl SettingsStore {
    pub fn new(store: impl ConfigStore + 'static) -> Self {
        Self {
            inner: Arc::new(Mutex::new(Box::new(store))),
        }
    }

    /// Load a record, falling back to its default when it is missing or
    /// cannot be decoded.
    pub fn load<T: DeserializeOwned + Default>(&self, key: &str) -> T {
        let store = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        match store.load(key) {
            Ok(Some(bytes)) => match postcard::from_bytes(&bytes) {
                Ok(value) => value,
                Err(e) => {
                    log::warn!("Settings `{}` unreadable ({}), using defaults", key, e);
                    T::default()
                }
            },
            Ok(None) => T::default(),
            Err(e) => {
                log::warn!("Settings `{}` could not be loaded: {:#}", key, e);
                T::default()
            }
        }
    }

    pub fn save<T: Serialize>(&self, key: &str, value: &T) -> anyhow::Result<()> {
        let bytes = postcard::to_allocvec(value)
            .with_context(|| format!("encoding settings `{key}`"))?;
        let mut store = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        store
            .save(key, &bytes)
            .with_context(|| format!("saving settings `{key}`"))
    }
}

// ---------------------------------------------------------------------------
// Records
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HardwareSettings {
    pub screen_timeout_secs: u32,
    pub double_tap_wakeup: bool,
    pub tilt_wakeup: bool,
    pub touch_wakeup: bool,
}

impl Default for HardwareSettings {
    fn default() -> Self {
        Self {
            screen_timeout_secs: DEFAULT_SCREEN_TIMEOUT_SECS,
            double_tap_wakeup: false,
            tilt_wakeup: false,
            touch_wakeup: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KnownNetwork {
    pub ssid: String,
    pub password: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WifiSettings {
    pub enabled: bool,
    pub ssid: String,
    pub password: String,
    pub known_networks: Vec<KnownNetwork>,
    pub retry_schedule_secs: Vec<u32>,
}

impl Default for WifiSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            ssid: String::new(),
            password: String::new(),
            known_networks: Vec::new(),
            retry_schedule_secs: DEFAULT_RETRY_SCHEDULE_SECS.to_vec(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_records_load_as_defaults() {
        let store = SettingsStore::new(MemoryStore::new());
        let hw: HardwareSettings = store.load(SETTINGS_KEY_HARDWARE);
        assert_eq!(hw, HardwareSettings::default());
        let wifi: WifiSettings = store.load(SETTINGS_KEY_WIFI);
        assert_eq!(wifi.retry_schedule_secs.len(), 8);
        assert!(!wifi.enabled);
    }

    #[test]
    fn saved_records_are_read_back() {
        let store = SettingsStore::new(MemoryStore::new());
        let wifi = WifiSettings {
            enabled: true,
            ssid: "Boat".into(),
            password: "secret1".into(),
            known_networks: vec![KnownNetwork {
                ssid: "Marina".into(),
                password: "harbour".into(),
            }],
            ..WifiSettings::default()
        };
        store.save(SETTINGS_KEY_WIFI, &wifi).unwrap();

        let loaded: WifiSettings = store.clone().load(SETTINGS_KEY_WIFI);
        assert_eq!(loaded, wifi);
    }

    #[test]
    fn corrupt_record_falls_back_to_default() {
        let mut raw = MemoryStore::new();
        raw.save(SETTINGS_KEY_HARDWARE, &[0xff, 0xff, 0xff]).unwrap();
        let store = SettingsStore::new(raw);

        let hw: HardwareSettings = store.load(SETTINGS_KEY_HARDWARE);
        assert_eq!(hw, HardwareSettings::default());
    }
}
