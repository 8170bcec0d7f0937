//! Privileged classification and slot reservation.

use chrono::{DateTime, Duration, Utc};
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::Instant;
use tracing::{debug, warn};

use super::config::RateLimitConfig;
use super::slots::SlotStore;
use crate::metrics::RATE_LIMITER_DEGRADED;
use crate::remote::PublishClient;

/// Rate class of a user.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateClass {
    pub privileged: bool,
}

impl RateClass {
    pub const NORMAL: RateClass = RateClass { privileged: false };
    pub const PRIVILEGED: RateClass = RateClass { privileged: true };
}

pub struct RateLimiter {
    config: RateLimitConfig,
    slots: Arc<dyn SlotStore>,
    publisher: Arc<dyn PublishClient>,
    classifications: RwLock<HashMap<String, (RateClass, Instant)>>,
}

impl RateLimiter {
    pub fn new(
        config: RateLimitConfig,
        slots: Arc<dyn SlotStore>,
        publisher: Arc<dyn PublishClient>,
    ) -> Self {
        Self {
            config,
            slots,
            publisher,
            classifications: RwLock::new(HashMap::new()),
        }
    }

    /// Classify a user by remote group membership.
    ///
    /// A failed lookup classifies the user as normal.
    pub async fn classify(&self, user_id: &str, credential: Option<&str>) -> RateClass {
        let ttl = std::time::Duration::from_secs(self.config.classification_cache_secs);
        if let Some((class, at)) = self.classifications.read().unwrap().get(user_id) {
            if at.elapsed() < ttl {
                return *class;
            }
        }

        let Some(credential) = credential else {
            debug!(user = %user_id, "No remote credential, classifying as normal");
            return RateClass::NORMAL;
        };

        let class = match self.publisher.user_groups(credential).await {
            Ok(groups) => RateClass {
                privileged: groups
                    .iter()
                    .any(|g| self.config.privileged_groups.contains(g)),
            },
            Err(e) => {
                warn!(user = %user_id, error = %e, "Group lookup failed, classifying as normal");
                return RateClass::NORMAL;
            }
        };

        debug!(user = %user_id, privileged = class.privileged, "Classified user");
        self.classifications
            .write()
            .unwrap()
            .insert(user_id.to_string(), (class, Instant::now()));
        class
    }

    /// Minimum time between two upload starts of one user.
    pub fn spacing(&self, privileged: bool) -> Duration {
        if privileged {
            Duration::milliseconds(self.config.privileged_spacing_ms as i64)
        } else {
            let period_ms = (self.config.period_secs * 1000) as i64;
            Duration::milliseconds(period_ms / self.config.uploads_per_period.max(1) as i64)
        }
    }

    /// Reserve the user's next upload slot.
    ///
    /// Never fails: when the slot store is unavailable the slot is `now`.
    pub async fn reserve_slot(&self, user_id: &str, privileged: bool) -> DateTime<Utc> {
        let now = Utc::now();
        let ttl = Duration::seconds(self.config.slot_ttl_secs as i64);

        match self
            .slots
            .reserve(user_id, now, self.spacing(privileged), ttl)
            .await
        {
            Ok(slot) => slot,
            Err(e) => {
                warn!(
                    user = %user_id,
                    error = %e,
                    "RateLimiterDegraded: slot store unavailable, failing open"
                );
                RATE_LIMITER_DEGRADED.inc();
                now
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rate_limiter::InMemorySlotStore;
    use crate::remote::RemoteError;
    use crate::testing::{FailingSlotStore, MockPublishClient};

    fn limiter(publisher: Arc<MockPublishClient>, slots: Arc<dyn SlotStore>) -> RateLimiter {
        RateLimiter::new(RateLimitConfig::default(), slots, publisher)
    }

    #[tokio::test]
    async fn test_privileged_group_membership() {
        let publisher = Arc::new(MockPublishClient::new());
        publisher.set_groups("admin-token", &["user", "sysop"]).await;
        publisher.set_groups("user-token", &["user", "autoconfirmed"]).await;
        let limiter = limiter(publisher, Arc::new(InMemorySlotStore::new()));

        assert!(limiter.classify("root", Some("admin-token")).await.privileged);
        assert!(!limiter.classify("alice", Some("user-token")).await.privileged);
        assert!(!limiter.classify("anon", None).await.privileged);
    }

    #[tokio::test]
    async fn test_group_lookup_failure_is_normal() {
        let publisher = Arc::new(MockPublishClient::new());
        publisher
            .set_next_error(RemoteError::Transient("timeout".to_string()))
            .await;
        let limiter = limiter(publisher, Arc::new(InMemorySlotStore::new()));

        assert_eq!(limiter.classify("root", Some("t")).await, RateClass::NORMAL);
    }

    #[tokio::test]
    async fn test_classification_is_cached() {
        let publisher = Arc::new(MockPublishClient::new());
        publisher.set_groups("t", &["patroller"]).await;
        let limiter = limiter(publisher.clone(), Arc::new(InMemorySlotStore::new()));

        limiter.classify("root", Some("t")).await;
        limiter.classify("root", Some("t")).await;
        assert_eq!(publisher.group_lookups().await, 1);
    }

    #[test]
    fn test_spacing() {
        let publisher = Arc::new(MockPublishClient::new());
        let limiter = limiter(publisher, Arc::new(InMemorySlotStore::new()));
        assert_eq!(limiter.spacing(false), Duration::seconds(15));
        assert_eq!(limiter.spacing(true), Duration::zero());
    }

    #[tokio::test]
    async fn test_normal_reservations_are_spaced() {
        let publisher = Arc::new(MockPublishClient::new());
        let limiter = limiter(publisher, Arc::new(InMemorySlotStore::new()));

        let first = limiter.reserve_slot("alice", false).await;
        let second = limiter.reserve_slot("alice", false).await;
        assert_eq!(second - first, Duration::seconds(15));

        let p1 = limiter.reserve_slot("root", true).await;
        let p2 = limiter.reserve_slot("root", true).await;
        assert!(p2 - p1 < Duration::seconds(1));
    }

    #[tokio::test]
    async fn test_slot_store_failure_fails_open() {
        let publisher = Arc::new(MockPublishClient::new());
        let limiter = limiter(publisher, Arc::new(FailingSlotStore));

        let before = Utc::now();
        let slot = limiter.reserve_slot("alice", false).await;
        assert!(slot >= before);
        assert!(slot <= Utc::now());
    }
}
