//! Bounded retry around single index store calls.

use std::fmt;
use std::future::Future;
use std::time::Duration;

use tracing::warn;

use crate::{StoreError, StoreResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDisposition {
    Retryable,
    NonRetryable,
}

/// Decides whether a failed call may be attempted again.
pub type Classifier = fn(&StoreError) -> RetryDisposition;

pub fn classify_store_error(err: &StoreError) -> RetryDisposition {
    err.disposition()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackoffPolicy {
    pub max_retries: usize,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_millis(50),
            max_delay: Duration::from_secs(2),
        }
    }
}

impl BackoffPolicy {
    /// No sleeping between attempts.
    pub fn immediate(max_retries: usize) -> Self {
        Self {
            max_retries,
            base_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
        }
    }

    pub fn delay_for_attempt(&self, attempt_index: usize) -> Duration {
        let factor = 1u32.checked_shl(attempt_index as u32).unwrap_or(u32::MAX);
        let delay = self.base_delay.saturating_mul(factor);
        delay.min(self.max_delay)
    }

    /// Upper bound on the time one call can spend sleeping between attempts.
    pub fn max_total_delay(&self) -> Duration {
        (0..self.max_retries)
            .map(|attempt| self.delay_for_attempt(attempt))
            .sum()
    }
}

#[derive(Clone, Copy)]
pub struct RetryPolicy {
    pub backoff: BackoffPolicy,
    pub classifier: Classifier,
}

impl RetryPolicy {
    pub fn new(backoff: BackoffPolicy) -> Self {
        Self {
            backoff,
            classifier: classify_store_error,
        }
    }

    pub fn with_classifier(mut self, classifier: Classifier) -> Self {
        self.classifier = classifier;
        self
    }

    pub fn classify(&self, err: &StoreError) -> RetryDisposition {
        (self.classifier)(err)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(BackoffPolicy::default())
    }
}

impl fmt::Debug for RetryPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RetryPolicy")
            .field("backoff", &self.backoff)
            .finish_non_exhaustive()
    }
}

/// Runs `call` until it succeeds, fails with a non-retryable error, or the
/// retry budget is spent.
pub async fn with_retry<T, F, Fut>(op: &'static str, policy: &RetryPolicy, mut call: F) -> StoreResult<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = StoreResult<T>>,
{
    let mut attempt = 0usize;
    loop {
        let err = match call().await {
            Ok(value) => return Ok(value),
            Err(err) => err,
        };

        if policy.classify(&err) == RetryDisposition::NonRetryable {
            return Err(err);
        }

        if attempt >= policy.backoff.max_retries {
            return Err(StoreError::RetriesExhausted {
                op,
                attempts: attempt + 1,
                last: Box::new(err),
            });
        }

        let delay = policy.backoff.delay_for_attempt(attempt);
        warn!(
            op,
            attempt = attempt + 1,
            delay_ms = delay.as_millis() as u64,
            error = %err,
            "transient storage failure; retrying"
        );
        tokio::time::sleep(delay).await;
        attempt += 1;
    }
}
