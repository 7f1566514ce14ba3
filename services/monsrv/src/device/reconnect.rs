//! Bounded reconnection with a fixed, injectable delay

use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use errors::ServiceErrorTrait;
use tracing::{info, warn};

/// Reconnection policy configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReconnectPolicy {
    /// Reconnect attempts after the initial failure
    pub max_attempts: u32,
    /// Wait before each attempt
    pub delay: Duration,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            delay: Duration::from_secs(2),
        }
    }
}

/// Source of the inter-attempt wait
#[async_trait]
pub trait RetryDelay: Send + Sync {
    async fn wait(&self, delay: Duration);
}

/// Real sleeping delay
#[derive(Debug, Clone, Copy, Default)]
pub struct TokioDelay;

#[async_trait]
impl RetryDelay for TokioDelay {
    async fn wait(&self, delay: Duration) {
        tokio::time::sleep(delay).await;
    }
}

/// Outcome statistics of one reconnect cycle
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReconnectStats {
    pub attempts: u32,
    pub succeeded: bool,
}

/// Runs one bounded reconnect cycle
pub struct ReconnectHelper<'a> {
    policy: &'a ReconnectPolicy,
    delay: &'a dyn RetryDelay,
    stats: ReconnectStats,
}

impl<'a> ReconnectHelper<'a> {
    pub fn new(policy: &'a ReconnectPolicy, delay: &'a dyn RetryDelay) -> Self {
        Self {
            policy,
            delay,
            stats: ReconnectStats::default(),
        }
    }

    pub fn stats(&self) -> ReconnectStats {
        self.stats
    }

    /// Try `connect_fn` up to `max_attempts` times, waiting before each try
    ///
    /// Stops early on a non-retryable error and returns it. When every
    /// attempt fails with a retryable error the last one is returned.
    pub async fn execute_reconnect<F, Fut, T, E>(&mut self, mut connect_fn: F) -> Result<T, E>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: ServiceErrorTrait,
    {
        let mut last_error = None;

        for attempt in 1..=self.policy.max_attempts {
            info!(
                "Waiting {:?} before reconnection attempt {}/{}",
                self.policy.delay, attempt, self.policy.max_attempts
            );
            self.delay.wait(self.policy.delay).await;
            self.stats.attempts = attempt;

            match connect_fn().await {
                Ok(value) => {
                    info!("Reconnection successful (attempt {})", attempt);
                    self.stats.succeeded = true;
                    return Ok(value);
                },
                Err(e) if e.is_retryable() => {
                    warn!("Reconnection attempt {} failed: {}", attempt, e);
                    last_error = Some(e);
                },
                Err(e) => {
                    warn!("Reconnection aborted on non-retryable error: {}", e);
                    return Err(e);
                },
            }
        }

        match last_error {
            Some(e) => {
                warn!(
                    "Maximum reconnection attempts ({}) exceeded",
                    self.policy.max_attempts
                );
                Err(e)
            },
            // max_attempts == 0: one direct attempt
            None => connect_fn().await,
        }
    }
}

#[cfg(test)]
#[allow(clippy::disallowed_methods)] // Test code - unwrap is acceptable
mod tests {
    use super::*;
    use crate::error::{ConnectionErrorKind, DeviceError, Endpoint, ValidationError};
    use parking_lot::Mutex;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[derive(Default)]
    struct RecordingDelay {
        waits: Mutex<Vec<Duration>>,
    }

    #[async_trait]
    impl RetryDelay for RecordingDelay {
        async fn wait(&self, delay: Duration) {
            self.waits.lock().push(delay);
        }
    }

    fn refused() -> DeviceError {
        let endpoint = Endpoint {
            host: "10.0.0.1".into(),
            port: 502,
            unit_id: 1,
        };
        DeviceError::connection(ConnectionErrorKind::Refused, &endpoint, "refused")
    }

    #[test]
    fn test_default_policy() {
        let policy = ReconnectPolicy::default();
        assert_eq!(policy.max_attempts, 3);
        assert_eq!(policy.delay, Duration::from_secs(2));
    }

    #[tokio::test]
    async fn test_exhausts_bound_with_delay_before_each_attempt() {
        let policy = ReconnectPolicy::default();
        let delay = RecordingDelay::default();
        let calls = AtomicU32::new(0);
        let calls_ref = &calls;
        let mut helper = ReconnectHelper::new(&policy, &delay);

        let result: Result<(), DeviceError> = helper
            .execute_reconnect(move || async move {
                calls_ref.fetch_add(1, Ordering::SeqCst);
                Err(refused())
            })
            .await;

        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert_eq!(*delay.waits.lock(), vec![Duration::from_secs(2); 3]);
        assert_eq!(helper.stats().attempts, 3);
        assert!(!helper.stats().succeeded);
    }

    #[tokio::test]
    async fn test_stops_on_first_success() {
        let policy = ReconnectPolicy::default();
        let delay = RecordingDelay::default();
        let calls = AtomicU32::new(0);
        let calls_ref = &calls;
        let mut helper = ReconnectHelper::new(&policy, &delay);

        let result = helper
            .execute_reconnect(move || async move {
                if calls_ref.fetch_add(1, Ordering::SeqCst) == 0 {
                    Err(refused())
                } else {
                    Ok(42)
                }
            })
            .await;

        assert_eq!(result.unwrap(), 42);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert_eq!(delay.waits.lock().len(), 2);
        assert!(helper.stats().succeeded);
    }

    #[tokio::test]
    async fn test_non_retryable_error_aborts() {
        let policy = ReconnectPolicy::default();
        let delay = RecordingDelay::default();
        let calls = AtomicU32::new(0);
        let calls_ref = &calls;
        let mut helper = ReconnectHelper::new(&policy, &delay);

        let result: Result<(), DeviceError> = helper
            .execute_reconnect(move || async move {
                calls_ref.fetch_add(1, Ordering::SeqCst);
                Err(DeviceError::from(ValidationError::InvalidQuantity(0)))
            })
            .await;

        assert!(matches!(result, Err(DeviceError::Validation(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
