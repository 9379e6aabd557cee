use std::time::Duration;

use crate::error::{Error, Result};

/// Ordered reconnect delays. Lookups past the end stay on the last entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetrySchedule {
    delays: Vec<Duration>,
}

impl RetrySchedule {
    pub fn new(delays: Vec<Duration>) -> Result<Self> {
        if delays.is_empty() {
            return Err(Error::EmptyRetrySchedule);
        }
        Ok(Self { delays })
    }

    pub fn from_secs(secs: &[u32]) -> Result<Self> {
        Self::new(secs.iter().map(|s| Duration::from_secs(u64::from(*s))).collect())
    }

    pub fn delay(&self, index: usize) -> Duration {
        self.delays[index.min(self.last_index())]
    }

    pub fn last_index(&self) -> usize {
        self.delays.len() - 1
    }

}

impl Default for RetrySchedule {
    fn default() -> Self {
        Self {
            delays: crate::config::DEFAULT_RETRY_SCHEDULE_SECS
                .iter()
                .map(|s| Duration::from_secs(u64::from(*s)))
                .collect(),
        }
    }
}
