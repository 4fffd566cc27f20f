//! Retry helpers for the orchestrator backend.

use std::time::Duration;
use tracing::{debug, error, warn};

/// Exponential backoff settings
#[derive(Debug, Clone, PartialEq)]
pub struct RetryConfig {
    /// Total attempts, the first one included
    pub max_attempts: u32,
    pub initial_delay: Duration,
    pub backoff_multiplier: f32,
    pub max_delay: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            initial_delay: Duration::from_millis(200),
            backoff_multiplier: 2.0,
            max_delay: Duration::from_secs(5),
        }
    }
}

impl RetryConfig {
    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts.max(1);
        self
    }

    pub fn with_initial_delay(mut self, delay: Duration) -> Self {
        self.initial_delay = delay;
        self
    }
}

/// Retry with exponential backoff.
///
/// Errors for which `retryable` returns false are returned immediately. After
/// the last attempt the final error is returned unchanged.
pub async fn retry_async<F, Fut, T, E, P>(
    operation: F,
    config: &RetryConfig,
    retryable: P,
    operation_name: &str,
) -> Result<T, E>
where
    F: Fn() -> Fut,
    Fut: std::future::Future<Output = Result<T, E>>,
    E: std::fmt::Display,
    P: Fn(&E) -> bool,
{
    let max_attempts = config.max_attempts.max(1);
    let mut delay = config.initial_delay;
    let mut attempt = 1;

    loop {
        match operation().await {
            Ok(result) => {
                if attempt > 1 {
                    debug!(
                        "Operation '{}' succeeded after {} attempts",
                        operation_name, attempt
                    );
                }
                return Ok(result);
            }
            Err(err) if !retryable(&err) => return Err(err),
            Err(err) if attempt >= max_attempts => {
                error!(
                    "Operation '{}' failed after {} attempts: {}",
                    operation_name, max_attempts, err
                );
                return Err(err);
            }
            Err(err) => {
                warn!(
                    "Operation '{}' failed on attempt {}/{}: {}",
                    operation_name, attempt, max_attempts, err
                );
                debug!("Retrying '{}' in {:?}", operation_name, delay);
                tokio::time::sleep(delay).await;
                delay = Duration::from_secs_f32(delay.as_secs_f32() * config.backoff_multiplier)
                    .min(config.max_delay);
                attempt += 1;
            }
        }
    }
}
