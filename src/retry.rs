//! Bounded retry with exponential backoff for remote calls.
//!
//! # Overview
//!
//! Every page fetch and media download runs through [`RetryPolicy::execute`].
//! Failures are classified into a [`FailureType`]:
//! - [`FailureType::Transient`] - retried here with a short backoff
//! - [`FailureType::RateLimited`] - surfaced after one attempt, the caller waits minutes or hours
//! - [`FailureType::CapacityExceeded`] - surfaced after one attempt, same as rate limiting
//! - [`FailureType::Permanent`] - surfaced after one attempt, retrying cannot help
//!
//! Unlike a typical retry loop, the policy sleeps before **every** attempt,
//! including the first. Strict upstream rate limits count bursts, so the
//! first request of a run is throttled like any other.
//!
//! # Example
//!
//! ```
//! use std::time::Duration;
//! use blupen_core::retry::RetryPolicy;
//!
//! let policy = RetryPolicy::new(4, Duration::from_secs(1), Duration::from_secs(60));
//! assert_eq!(policy.delay_before(1), Duration::from_secs(1));
//! assert_eq!(policy.delay_before(3), Duration::from_secs(4));
//! ```

use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, instrument, warn};

/// Default maximum attempts.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 4;

/// Default base delay (1 second).
pub const DEFAULT_BASE_DELAY: Duration = Duration::from_secs(1);

/// Default maximum delay cap (64 seconds).
pub const DEFAULT_MAX_DELAY: Duration = Duration::from_secs(64);

/// Classification of a failed remote call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureType {
    /// Temporary failure that may succeed on retry.
    ///
    /// Examples: network errors, 5xx responses, malformed bodies.
    Transient,

    /// The upstream service reported a rate limit.
    RateLimited,

    /// The upstream service reported it is over capacity.
    CapacityExceeded,

    /// Failure that will not succeed regardless of retries.
    ///
    /// Examples: contract violations, missing accounts, local I/O errors.
    Permanent,
}

impl FailureType {
    /// Whether the retry loop may try again after this failure.
    #[must_use]
    pub fn is_retryable(self) -> bool {
        matches!(self, Self::Transient)
    }
}

/// Errors that know their own [`FailureType`].
pub trait Classify {
    /// Classifies this error for retry decisions.
    fn failure_type(&self) -> FailureType;
}

/// Decision on whether to try a failed call again.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetryDecision {
    /// Try again.
    Retry {
        /// Sleep before the next attempt.
        delay: Duration,
        /// The next attempt number (1-indexed).
        attempt: u32,
    },

    /// Stop and surface the failure.
    DoNotRetry {
        /// Human-readable reason.
        reason: String,
    },
}

/// Outcome of a call that never succeeded.
#[derive(Debug, Error)]
pub enum RetryError<E> {
    /// Every attempt failed with a transient error.
    #[error("gave up after {attempts} attempts: {last}")]
    Exhausted {
        /// Attempts made
        attempts: u32,
        /// Error from the final attempt
        last: E,
    },

    /// A non-retryable failure stopped the loop early.
    #[error("stopped at attempt {attempt} ({failure:?}): {error}")]
    Aborted {
        /// Attempt that failed
        attempt: u32,
        /// Classification of the failure
        failure: FailureType,
        /// The error itself
        error: E,
    },
}

impl<E> RetryError<E> {
    /// Number of attempts actually made.
    #[must_use]
    pub fn attempts(&self) -> u32 {
        match self {
            Self::Exhausted { attempts, .. } => *attempts,
            Self::Aborted { attempt, .. } => *attempt,
        }
    }

    /// The underlying error of the last attempt.
    #[must_use]
    pub fn into_inner(self) -> E {
        match self {
            Self::Exhausted { last, .. } => last,
            Self::Aborted { error, .. } => error,
        }
    }
}

/// Something that can wait for a duration.
///
/// Production code sleeps on the Tokio timer; tests substitute a recorder.
#[async_trait]
pub trait Sleeper: Send + Sync + fmt::Debug {
    /// Waits for `delay`.
    async fn sleep(&self, delay: Duration);
}

/// [`Sleeper`] backed by `tokio::time::sleep`.
#[derive(Debug, Default, Clone, Copy)]
pub struct TokioSleeper;

#[async_trait]
impl Sleeper for TokioSleeper {
    async fn sleep(&self, delay: Duration) {
        tokio::time::sleep(delay).await;
    }
}

/// Retry configuration with exponential backoff.
///
/// # Delay Calculation
///
/// ```text
/// delay_before(attempt) = min(base_delay * 2^(attempt - 1), max_delay)
/// ```
///
/// With defaults the sleeps are 1s, 2s, 4s, 8s before attempts one to four.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    max_attempts: u32,
    base_delay: Duration,
    max_delay: Duration,
    sleeper: Arc<dyn Sleeper>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_ATTEMPTS, DEFAULT_BASE_DELAY, DEFAULT_MAX_DELAY)
    }
}

impl RetryPolicy {
    /// Creates a policy that sleeps on the Tokio timer.
    ///
    /// `max_attempts` is raised to at least one.
    #[must_use]
    pub fn new(max_attempts: u32, base_delay: Duration, max_delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_delay,
            max_delay,
            sleeper: Arc::new(TokioSleeper),
        }
    }

    /// Replaces the sleeper.
    #[must_use]
    pub fn with_sleeper(mut self, sleeper: Arc<dyn Sleeper>) -> Self {
        self.sleeper = sleeper;
        self
    }

    /// Returns the maximum number of attempts configured.
    #[must_use]
    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Returns the base delay.
    #[must_use]
    pub fn base_delay(&self) -> Duration {
        self.base_delay
    }

    /// Returns the delay cap.
    #[must_use]
    pub fn max_delay(&self) -> Duration {
        self.max_delay
    }

    /// Sleep taken before the given 1-indexed attempt.
    #[must_use]
    pub fn delay_before(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1);
        let factor = 2_u32.checked_pow(exponent).unwrap_or(u32::MAX);
        self.base_delay.saturating_mul(factor).min(self.max_delay)
    }

    /// Determines whether to try again after `attempt` failed.
    #[instrument(skip(self), fields(max_attempts = self.max_attempts))]
    pub fn should_retry(&self, failure_type: FailureType, attempt: u32) -> RetryDecision {
        match failure_type {
            FailureType::RateLimited => {
                return RetryDecision::DoNotRetry {
                    reason: "rate limited - caller must wait before retrying".to_string(),
                };
            }
            FailureType::CapacityExceeded => {
                return RetryDecision::DoNotRetry {
                    reason: "over capacity - caller must wait before retrying".to_string(),
                };
            }
            FailureType::Permanent => {
                return RetryDecision::DoNotRetry {
                    reason: "permanent failure - retry would not help".to_string(),
                };
            }
            FailureType::Transient => {}
        }

        if attempt >= self.max_attempts {
            debug!(attempt, max = self.max_attempts, "max attempts reached");
            return RetryDecision::DoNotRetry {
                reason: format!("max attempts ({}) exhausted", self.max_attempts),
            };
        }

        let next = attempt + 1;
        RetryDecision::Retry {
            delay: self.delay_before(next),
            attempt: next,
        }
    }

    /// Runs `op` until it succeeds, fails with a non-retryable error, or
    /// attempts run out. `op` receives the 1-indexed attempt number.
    ///
    /// # Errors
    ///
    /// Returns [`RetryError::Aborted`] for rate-limit, capacity and permanent
    /// failures (after exactly that attempt), and [`RetryError::Exhausted`]
    /// once `max_attempts` transient failures have occurred.
    #[instrument(skip(self, op), fields(max_attempts = self.max_attempts))]
    pub async fn execute<T, E, F, Fut>(&self, label: &str, mut op: F) -> Result<T, RetryError<E>>
    where
        E: Classify + fmt::Display,
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let mut attempt = 1;
        let mut delay = self.delay_before(attempt);
        loop {
            debug!(label, attempt, delay_ms = delay.as_millis(), "sleeping before attempt");
            self.sleeper.sleep(delay).await;

            let error = match op(attempt).await {
                Ok(value) => return Ok(value),
                Err(error) => error,
            };
            let failure = error.failure_type();
            warn!(
                label,
                attempt,
                max_attempts = self.max_attempts,
                failure = ?failure,
                error = %error,
                "attempt failed"
            );

            match self.should_retry(failure, attempt) {
                RetryDecision::Retry {
                    delay: next_delay,
                    attempt: next_attempt,
                } => {
                    attempt = next_attempt;
                    delay = next_delay;
                }
                RetryDecision::DoNotRetry { reason } => {
                    debug!(label, attempt, reason = %reason, "not retrying");
                    return Err(if failure.is_retryable() {
                        RetryError::Exhausted {
                            attempts: attempt,
                            last: error,
                        }
                    } else {
                        RetryError::Aborted {
                            attempt,
                            failure,
                            error,
                        }
                    });
                }
            }
        }
    }
}

/// Serializable retry tuning, as read from configuration and stored in
/// snapshot parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrySettings {
    /// Attempts per call
    pub max_attempts: u32,
    /// Delay before the first attempt, in seconds
    pub base_delay_secs: u64,
    /// Delay cap, in seconds
    pub max_delay_secs: u64,
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            base_delay_secs: DEFAULT_BASE_DELAY.as_secs(),
            max_delay_secs: DEFAULT_MAX_DELAY.as_secs(),
        }
    }
}

impl RetrySettings {
    /// Builds a policy sleeping on the Tokio timer.
    #[must_use]
    pub fn policy(&self) -> RetryPolicy {
        RetryPolicy::new(
            self.max_attempts,
            Duration::from_secs(self.base_delay_secs),
            Duration::from_secs(self.max_delay_secs),
        )
    }
}
