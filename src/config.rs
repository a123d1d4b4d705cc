use std::time::Duration;

use serde::Deserialize;
use url::Url;

use crate::{log::DEFAULT_PAGE_SIZE, policy::FailurePolicy};

pub const ENV_PREFIX: &str = "ORDERCHECK_";

/// Delay applied once per consumer invocation unless overridden.
pub const DEFAULT_PROCESSING_DELAY: Duration = Duration::from_secs(2);

/// SQS never hands out more than ten messages per receive call.
pub const MAX_BATCH_SIZE: i32 = 10;

#[derive(Clone, Debug, Default, Deserialize)]
pub struct Config {
    pub db_path: Option<String>,
    pub queue_url: Option<Url>,
    /// Overrides the SQS endpoint, e.g. for a local SQS-compatible server
    pub endpoint_url: Option<Url>,
    pub region: Option<String>,
    pub failure_policy: Option<FailurePolicy>,
    pub processing_delay_ms: Option<u64>,
    pub page_size: Option<u32>,
    pub batch_size: Option<i32>,
    pub wait_time_seconds: Option<i32>,
}

impl Config {
    pub fn load() -> eyre::Result<Self> {
        Ok(envy::prefixed(ENV_PREFIX).from_env::<Self>()?)
    }

    pub fn db_path(&self) -> &str {
        self.db_path.as_deref().unwrap_or("ordercheck.db")
    }

    pub fn queue_url(&self) -> eyre::Result<&Url> {
        self.queue_url
            .as_ref()
            .ok_or_else(|| eyre::eyre!("{ENV_PREFIX}QUEUE_URL is not set"))
    }

    pub fn failure_policy(&self) -> FailurePolicy {
        self.failure_policy.unwrap_or_default()
    }

    pub fn processing_delay(&self) -> Duration {
        self.processing_delay_ms
            .map(Duration::from_millis)
            .unwrap_or(DEFAULT_PROCESSING_DELAY)
    }

    pub fn page_size(&self) -> u32 {
        self.page_size.unwrap_or(DEFAULT_PAGE_SIZE).max(1)
    }

    pub fn batch_size(&self) -> i32 {
        self.batch_size.unwrap_or(MAX_BATCH_SIZE).clamp(1, MAX_BATCH_SIZE)
    }

    pub fn wait_time_seconds(&self) -> i32 {
        self.wait_time_seconds.unwrap_or(20).clamp(0, 20)
    }
}
