use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};

use crate::rate_limiter::{SlotStore, SlotStoreError};

/// Slot store that is always unavailable.
#[derive(Debug, Default, Clone, Copy)]
pub struct FailingSlotStore;

#[async_trait]
impl SlotStore for FailingSlotStore {
    async fn reserve(
        &self,
        _user_id: &str,
        _now: DateTime<Utc>,
        _spacing: Duration,
        _ttl: Duration,
    ) -> Result<DateTime<Utc>, SlotStoreError> {
        Err(SlotStoreError::Unavailable("connection refused".to_string()))
    }
}
