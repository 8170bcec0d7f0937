//! Retry and cancel operations on batches and requests.

mod manager;
mod types;

pub use manager::RetryCancelManager;
pub use types::{CancelOutcome, ManagerError, RetryOutcome};
