use std::collections::BTreeMap;

use crate::settings::KnownNetwork;

/// Credentials of networks joined before, keyed by ssid. Only saves the user
/// from typing a password twice.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct KnownNetworks {
    entries: BTreeMap<String, String>,
}

impl KnownNetworks {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_settings(networks: &[KnownNetwork]) -> Self {
        let mut known = Self::new();
        for network in networks {
            known.insert(&network.ssid, &network.password);
        }
        known
    }

    pub fn to_settings(&self) -> Vec<KnownNetwork> {
        self.entries
            .iter()
            .map(|(ssid, password)| KnownNetwork {
                ssid: ssid.clone(),
                password: password.clone(),
            })
            .collect()
    }

    /// Last write wins.
    pub fn insert(&mut self, ssid: &str, password: &str) {
        self.entries.insert(ssid.to_owned(), password.to_owned());
    }

    pub fn is_known(&self, ssid: &str) -> bool {
        self.entries.contains_key(ssid)
    }

    pub fn get_known_password(&self, ssid: &str) -> Option<&str> {
        self.entries.get(ssid).map(String::as_str)
    }

    pub fn forget(&mut self, ssid: &str) -> bool {
        self.entries.remove(ssid).is_some()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
