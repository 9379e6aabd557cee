use esp_idf_svc::nvs::{EspDefaultNvsPartition, EspNvs, NvsDefault};

use crate::config::*;
use crate::settings::ConfigStore;

/// Settings blobs in the `skwatch` NVS namespace.
pub struct NvsStore {
    nvs: EspNvs<NvsDefault>,
}

impl NvsStore {
    pub fn new(partition: EspDefaultNvsPartition) -> anyhow::Result<Self> {
        let nvs = EspNvs::new(partition, NVS_NAMESPACE, true)?;
        Ok(Self { nvs })
    }
}

impl ConfigStore for NvsStore {
    fn load(&self, key: &str) -> anyhow::Result<Option<Vec<u8>>> {
        let mut buf = vec![0u8; SETTINGS_BLOB_MAX];
        Ok(self.nvs.get_blob(key, &mut buf)?.map(<[u8]>::to_vec))
    }

    fn save(&mut self, key: &str, value: &[u8]) -> anyhow::Result<()> {
        self.nvs.set_blob(key, value)?;
        Ok(())
    }
}
