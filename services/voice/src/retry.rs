//! Resilient call wrapper.
//!
//! Every outbound request goes through [`call`], which retries transient
//! remote failures with exponential backoff and uniform jitter, and returns
//! fatal failures immediately. The policy is a process-wide constant, not
//! per-call state.

use crate::error::VoiceError;
use rand::Rng;
use std::future::Future;
use std::time::Duration;
use tracing::warn;

/// Bounded-retry parameters shared by every outbound request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, including the first one.
    pub max_attempts: u32,
    pub base_delay: Duration,
    /// Upper bound of the uniform jitter added to each backoff delay.
    pub jitter_range: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(500),
            jitter_range: Duration::from_millis(250),
        }
    }
}

impl RetryPolicy {
    /// Delay before the retry following `attempt` (zero-indexed):
    /// `base_delay * 2^attempt + uniform(0, jitter_range)`.
    ///
    /// Successive delays grow exponentially with randomized jitter so that
    /// simultaneous failures do not retry in lockstep.
    pub fn backoff_delay(&self, attempt: u32) -> Duration {
        let exponential = self.base_delay.saturating_mul(2u32.saturating_pow(attempt));
        if self.jitter_range.is_zero() {
            return exponential;
        }
        let jitter = rand::rng().random_range(Duration::ZERO..self.jitter_range);
        exponential.saturating_add(jitter)
    }
}

/// Runs `operation`, retrying transient failures up to `max_attempts` times.
///
/// Fatal failures are returned on first occurrence; when attempts are
/// exhausted the last transient error is returned. Each retry logs the
/// attempt number and the computed delay, never the payload.
pub async fn call<T, F, Fut>(policy: &RetryPolicy, mut operation: F) -> Result<T, VoiceError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, VoiceError>>,
{
    let mut attempt = 0;
    loop {
        match operation().await {
            Ok(value) => return Ok(value),
            Err(err) if err.is_transient() && attempt + 1 < policy.max_attempts => {
                let delay = policy.backoff_delay(attempt);
                warn!(
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    "transient remote failure, retrying"
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(err) => return Err(err),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;
    use std::rc::Rc;

    fn fast_policy() -> RetryPolicy {
        RetryPolicy {
            max_attempts: 3,
            base_delay: Duration::from_millis(1),
            jitter_range: Duration::ZERO,
        }
    }

    #[test]
    fn backoff_delays_grow_exponentially_without_jitter() {
        let policy = RetryPolicy {
            max_attempts: 4,
            base_delay: Duration::from_millis(100),
            jitter_range: Duration::ZERO,
        };
        assert_eq!(policy.backoff_delay(0), Duration::from_millis(100));
        assert_eq!(policy.backoff_delay(1), Duration::from_millis(200));
        assert_eq!(policy.backoff_delay(2), Duration::from_millis(400));
    }

    #[test]
    fn backoff_jitter_stays_within_range() {
        let policy = RetryPolicy {
            max_attempts: 3,
            base_delay: Duration::from_millis(100),
            jitter_range: Duration::from_millis(50),
        };
        for _ in 0..32 {
            let delay = policy.backoff_delay(1);
            assert!(delay >= Duration::from_millis(200));
            assert!(delay < Duration::from_millis(250));
        }
    }

    #[tokio::test]
    async fn transient_failures_then_success_uses_three_attempts() {
        let attempts = Rc::new(Cell::new(0u32));
        let counter = attempts.clone();
        let result = call(&fast_policy(), move || {
            let counter = counter.clone();
            async move {
                counter.set(counter.get() + 1);
                if counter.get() < 3 {
                    Err(VoiceError::TransientRemote("overloaded".into()))
                } else {
                    Ok(42)
                }
            }
        })
        .await;
        assert_eq!(result.unwrap(), 42);
        assert_eq!(attempts.get(), 3);
    }

    #[tokio::test]
    async fn fatal_failure_returns_after_one_attempt() {
        let attempts = Rc::new(Cell::new(0u32));
        let counter = attempts.clone();
        let result: Result<(), _> = call(&fast_policy(), move || {
            let counter = counter.clone();
            async move {
                counter.set(counter.get() + 1);
                Err(VoiceError::FatalRemote("invalid api key".into()))
            }
        })
        .await;
        assert!(matches!(result, Err(VoiceError::FatalRemote(_))));
        assert_eq!(attempts.get(), 1);
    }

    #[tokio::test]
    async fn exhausted_retries_return_the_last_error() {
        let attempts = Rc::new(Cell::new(0u32));
        let counter = attempts.clone();
        let result: Result<(), _> = call(&fast_policy(), move || {
            let counter = counter.clone();
            async move {
                counter.set(counter.get() + 1);
                Err(VoiceError::TransientRemote(format!(
                    "unavailable #{}",
                    counter.get()
                )))
            }
        })
        .await;
        assert_eq!(attempts.get(), 3);
        match result {
            Err(VoiceError::TransientRemote(message)) => assert_eq!(message, "unavailable #3"),
            other => panic!("unexpected result: {other:?}"),
        }
    }
}
