//! Persisted query counter compared against a fixed quota.
//!
//! Read-modify-write is not atomic across callers. Each widget runs at most
//! one send at a time, which is the only writer in normal operation.

use crate::storage::KeyValueStore;
use serde_json::Value;
use shared::storage_keys;
use shared::usage::UsageSnapshot;
use shared::{AssistantError, AssistantResult};
use std::sync::Arc;

pub const DEFAULT_QUOTA: u32 = 25;

pub struct UsageTracker {
    storage: Arc<dyn KeyValueStore>,
    quota: u32,
}

impl UsageTracker {
    pub fn new(storage: Arc<dyn KeyValueStore>) -> Self {
        Self::with_quota(storage, DEFAULT_QUOTA)
    }

    pub fn with_quota(storage: Arc<dyn KeyValueStore>, quota: u32) -> Self {
        Self { storage, quota }
    }

    pub async fn get(&self) -> AssistantResult<UsageSnapshot> {
        let usage = self.read().await?;
        Ok(UsageSnapshot::new(usage, self.quota))
    }

    pub async fn increment(&self) -> AssistantResult<UsageSnapshot> {
        let usage = self.read().await?.saturating_add(1);
        self.write(usage).await?;
        tracing::debug!(usage, quota = self.quota, "usage incremented");
        Ok(UsageSnapshot::new(usage, self.quota))
    }

    pub async fn reset(&self) -> AssistantResult<UsageSnapshot> {
        self.write(0).await?;
        tracing::info!("usage counter reset");
        Ok(UsageSnapshot::new(0, self.quota))
    }

    async fn read(&self) -> AssistantResult<u32> {
        let value = self
            .storage
            .get(storage_keys::USAGE)
            .await
            .map_err(AssistantError::storage)?;
        // Anything other than a non-negative integer counts as zero
        Ok(value
            .as_ref()
            .and_then(Value::as_u64)
            .map(|n| u32::try_from(n).unwrap_or(u32::MAX))
            .unwrap_or(0))
    }

    async fn write(&self, usage: u32) -> AssistantResult<()> {
        self.storage
            .set(storage_keys::USAGE, Value::from(usage))
            .await
            .map_err(AssistantError::storage)
    }
}
