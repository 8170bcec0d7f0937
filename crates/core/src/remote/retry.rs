//! Bounded retries with exponential backoff for transient remote failures.

use std::future::Future;
use std::time::Duration;

use tokio::time::sleep;
use tracing::warn;

use super::config::RemoteConfig;
use super::types::RemoteError;
use crate::metrics::REMOTE_REQUESTS;

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub initial: Duration,
    pub multiplier: f64,
    pub max_delay: Duration,
}

impl RetryPolicy {
    pub fn from_config(config: &RemoteConfig) -> Self {
        Self {
            max_attempts: config.max_attempts.max(1),
            initial: Duration::from_millis(config.backoff_initial_ms),
            multiplier: 2.0,
            max_delay: Duration::from_millis(config.backoff_max_ms),
        }
    }

    /// Delay before retry number `attempt` (zero based).
    pub fn delay(&self, attempt: u32) -> Duration {
        let delay = self.initial.as_secs_f64() * self.multiplier.powf(attempt as f64);
        std::cmp::min(Duration::from_secs_f64(delay), self.max_delay)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_config(&RemoteConfig::default())
    }
}

/// Run `operation`, retrying only `RemoteError::Transient` failures.
pub async fn with_retries<F, Fut, T>(
    policy: &RetryPolicy,
    name: &str,
    mut operation: F,
) -> Result<T, RemoteError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, RemoteError>>,
{
    let mut attempt = 0;
    let result = loop {
        match operation().await {
            Ok(value) => break Ok(value),
            Err(error) if error.is_transient() && attempt + 1 < policy.max_attempts => {
                let delay = policy.delay(attempt);
                warn!(
                    operation = name,
                    attempt = attempt + 1,
                    delay_ms = delay.as_millis() as u64,
                    error = %error,
                    "Transient failure, retrying"
                );
                sleep(delay).await;
                attempt += 1;
            }
            Err(error) => break Err(error),
        }
    };

    let label = match &result {
        Ok(_) => "success",
        Err(error) => error.kind(),
    };
    REMOTE_REQUESTS.with_label_values(&[name, label]).inc();
    result
}
