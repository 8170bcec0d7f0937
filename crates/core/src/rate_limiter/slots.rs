//! Per-user next-available slot storage.

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, RwLock};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SlotStoreError {
    #[error("Slot store unavailable: {0}")]
    Unavailable(String),

    #[error("Database error: {0}")]
    Database(String),
}

/// Atomic per-user slot reservation.
#[async_trait]
pub trait SlotStore: Send + Sync {
    /// In one atomic step: `slot = max(now, stored)`, `stored = slot + spacing`, return `slot`.
    ///
    /// A stored value older than `ttl` past its last write counts as absent.
    async fn reserve(
        &self,
        user_id: &str,
        now: DateTime<Utc>,
        spacing: Duration,
        ttl: Duration,
    ) -> Result<DateTime<Utc>, SlotStoreError>;
}

#[derive(Debug, Clone, Copy)]
struct Slot {
    next_available: DateTime<Utc>,
    expires_at: DateTime<Utc>,
}

/// Slots held in process memory. Each user has an entry of its own.
#[derive(Default)]
pub struct InMemorySlotStore {
    slots: RwLock<HashMap<String, Arc<Mutex<Option<Slot>>>>>,
}

impl InMemorySlotStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn entry(&self, user_id: &str) -> Arc<Mutex<Option<Slot>>> {
        if let Some(entry) = self.slots.read().unwrap().get(user_id) {
            return entry.clone();
        }
        self.slots
            .write()
            .unwrap()
            .entry(user_id.to_string())
            .or_default()
            .clone()
    }
}

#[async_trait]
impl SlotStore for InMemorySlotStore {
    async fn reserve(
        &self,
        user_id: &str,
        now: DateTime<Utc>,
        spacing: Duration,
        ttl: Duration,
    ) -> Result<DateTime<Utc>, SlotStoreError> {
        let entry = self.entry(user_id);
        let mut slot = entry.lock().unwrap();

        let stored = slot
            .filter(|s| s.expires_at > now)
            .map(|s| s.next_available);
        let reserved = match stored {
            Some(next) if next > now => next,
            _ => now,
        };
        let next_available = reserved + spacing;
        *slot = Some(Slot {
            next_available,
            expires_at: next_available + ttl,
        });

        Ok(reserved)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_reservations_are_spaced() {
        let store = InMemorySlotStore::new();
        let now = Utc::now();
        let spacing = Duration::seconds(15);
        let ttl = Duration::hours(1);

        let first = store.reserve("alice", now, spacing, ttl).await.unwrap();
        let second = store.reserve("alice", now, spacing, ttl).await.unwrap();
        let third = store.reserve("alice", now, spacing, ttl).await.unwrap();

        assert_eq!(first, now);
        assert_eq!(second, now + spacing);
        assert_eq!(third, now + spacing * 2);
    }

    #[tokio::test]
    async fn test_users_do_not_share_slots() {
        let store = InMemorySlotStore::new();
        let now = Utc::now();
        let spacing = Duration::seconds(15);
        let ttl = Duration::hours(1);

        store.reserve("alice", now, spacing, ttl).await.unwrap();
        let bob = store.reserve("bob", now, spacing, ttl).await.unwrap();
        assert_eq!(bob, now);
    }

    #[tokio::test]
    async fn test_past_slot_starts_now() {
        let store = InMemorySlotStore::new();
        let earlier = Utc::now() - Duration::minutes(5);
        let ttl = Duration::hours(1);
        store
            .reserve("alice", earlier, Duration::seconds(15), ttl)
            .await
            .unwrap();

        let now = Utc::now();
        let slot = store
            .reserve("alice", now, Duration::seconds(15), ttl)
            .await
            .unwrap();
        assert_eq!(slot, now);
    }

    #[tokio::test]
    async fn test_expired_slot_is_ignored() {
        let store = InMemorySlotStore::new();
        let now = Utc::now();
        let ttl = Duration::seconds(1);

        // Far-future slot that expires immediately after its write
        store
            .reserve("alice", now, Duration::hours(2), ttl)
            .await
            .unwrap();
        let later = now + Duration::hours(3);
        let slot = store
            .reserve("alice", later, Duration::seconds(15), ttl)
            .await
            .unwrap();
        assert_eq!(slot, later);
    }

    #[tokio::test]
    async fn test_concurrent_reservations_are_distinct() {
        let store = Arc::new(InMemorySlotStore::new());
        let now = Utc::now();
        let spacing = Duration::seconds(1);

        let mut handles = Vec::new();
        for _ in 0..20 {
            let store = store.clone();
            handles.push(tokio::spawn(async move {
                store
                    .reserve("alice", now, spacing, Duration::hours(1))
                    .await
                    .unwrap()
            }));
        }

        let mut slots = Vec::new();
        for handle in handles {
            slots.push(handle.await.unwrap());
        }
        slots.sort();
        slots.dedup();
        assert_eq!(slots.len(), 20);
        assert_eq!(slots[19], now + spacing * 19);
    }
}
