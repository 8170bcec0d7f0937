//! Per-user upload rate limiting.

mod config;
mod limiter;
mod slots;
mod sqlite;

pub use config::{RateLimitConfig, SlotBackend};
pub use limiter::{RateClass, RateLimiter};
pub use slots::{InMemorySlotStore, SlotStore, SlotStoreError};
pub use sqlite::SqliteSlotStore;
