//! Bounded retry with pluggable backoff.
//!
//! Every network-facing stage retries through [`retry_with_backoff`]. The
//! stage supplies a [`RetryPolicy`] (how many extra attempts and how long to
//! wait before each one), a predicate deciding which errors are worth another
//! attempt, and the operation itself, which receives the attempt number so it
//! can vary its request (relaxed TLS trust, a mutated search query).
//!
//! # Delay schedules
//!
//! | Backoff | Delay before attempt `k >= 1` |
//! |---------|-------------------------------|
//! | `None` | zero |
//! | `Fixed(d)` | `d` |
//! | `Exponential` | `min(cap, base * 2^k) + U[0, max_jitter)` |
//!
//! # Example
//!
//! ```
//! use std::time::Duration;
//! use illustrator_core::retry::{Backoff, RetryPolicy, retry_with_backoff};
//!
//! # async fn example() {
//! let policy = RetryPolicy::new(2, Backoff::None);
//! let result: Result<u32, &str> = retry_with_backoff(&policy, "example", |_| true, |attempt| async move {
//!     if attempt < 2 { Err("flaky") } else { Ok(attempt) }
//! })
//! .await;
//! assert_eq!(result, Ok(2));
//! # }
//! ```

use std::fmt::Display;
use std::future::Future;
use std::time::Duration;

use rand::Rng;
use tracing::debug;

/// Base delay of the exponential search schedule.
pub const DEFAULT_BACKOFF_BASE: Duration = Duration::from_secs(1);

/// Upper bound on the exponential base delay (jitter is added on top).
pub const DEFAULT_BACKOFF_CAP: Duration = Duration::from_secs(30);

/// Maximum jitter added to exponential delays.
pub const DEFAULT_BACKOFF_JITTER: Duration = Duration::from_secs(2);

/// Delay schedule applied between attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backoff {
    /// Retry immediately.
    None,
    /// Same pause before every retry.
    Fixed(Duration),
    /// Doubling delay, capped, with random jitter.
    Exponential {
        /// Delay unit multiplied by `2^attempt`.
        base: Duration,
        /// Cap applied before jitter.
        cap: Duration,
        /// Exclusive upper bound of the uniform jitter.
        max_jitter: Duration,
    },
}

impl Backoff {
    /// The search schedule: `min(30s, 2^k s) + U[0, 2s)`.
    #[must_use]
    pub fn exponential() -> Self {
        Self::Exponential {
            base: DEFAULT_BACKOFF_BASE,
            cap: DEFAULT_BACKOFF_CAP,
            max_jitter: DEFAULT_BACKOFF_JITTER,
        }
    }

    /// Delay before `attempt`, excluding jitter.
    #[must_use]
    pub fn base_delay(&self, attempt: u32) -> Duration {
        match *self {
            Self::None => Duration::ZERO,
            Self::Fixed(delay) => delay,
            Self::Exponential { base, cap, .. } => {
                let factor = 2_u32.checked_pow(attempt).unwrap_or(u32::MAX);
                base.checked_mul(factor).unwrap_or(cap).min(cap)
            }
        }
    }

    /// Delay before `attempt`, including jitter.
    #[must_use]
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let jitter = match *self {
            Self::Exponential { max_jitter, .. } => random_below(max_jitter),
            Self::None | Self::Fixed(_) => Duration::ZERO,
        };
        self.base_delay(attempt) + jitter
    }
}

/// How many extra attempts to make, and how long to wait before each.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    max_retries: u32,
    backoff: Backoff,
}

impl RetryPolicy {
    /// Creates a policy allowing `max_retries` attempts after the first.
    #[must_use]
    pub fn new(max_retries: u32, backoff: Backoff) -> Self {
        Self {
            max_retries,
            backoff,
        }
    }

    /// Same schedule with a different retry budget.
    #[must_use]
    pub fn with_max_retries(self, max_retries: u32) -> Self {
        Self {
            max_retries,
            ..self
        }
    }

    /// Extra attempts allowed after the first.
    #[must_use]
    pub fn max_retries(&self) -> u32 {
        self.max_retries
    }

    /// The delay schedule.
    #[must_use]
    pub fn backoff(&self) -> Backoff {
        self.backoff
    }
}

/// Runs `op` until it succeeds, returns a non-retryable error, or the retry
/// budget is spent. Returns the last error on exhaustion.
///
/// `op` receives the zero-based attempt number.
pub async fn retry_with_backoff<T, E, F, Fut, P>(
    policy: &RetryPolicy,
    label: &str,
    is_retryable: P,
    mut op: F,
) -> Result<T, E>
where
    E: Display,
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, E>>,
    P: Fn(&E) -> bool,
{
    let mut attempt = 0;
    loop {
        if attempt > 0 {
            let delay = policy.backoff.delay_for(attempt);
            debug!(
                label,
                attempt,
                max_retries = policy.max_retries,
                delay_ms = delay.as_millis(),
                "backing off before retry"
            );
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
        }

        match op(attempt).await {
            Ok(value) => return Ok(value),
            Err(error) => {
                if !is_retryable(&error) {
                    debug!(label, attempt, error = %error, "error is not retryable");
                    return Err(error);
                }
                if attempt >= policy.max_retries {
                    debug!(label, attempt, error = %error, "retry budget exhausted");
                    return Err(error);
                }
                debug!(label, attempt, error = %error, "attempt failed; will retry");
            }
        }
        attempt += 1;
    }
}

/// Uniform random duration in `[0, upper)`; zero when `upper` is zero.
pub(crate) fn random_below(upper: Duration) -> Duration {
    let upper_ms = u64::try_from(upper.as_millis()).unwrap_or(u64::MAX);
    if upper_ms == 0 {
        return Duration::ZERO;
    }
    Duration::from_millis(rand::thread_rng().gen_range(0..upper_ms))
}

/// Uniform random duration in `[low, high)`; `low` when the range is empty.
pub(crate) fn random_between(low: Duration, high: Duration) -> Duration {
    if high <= low {
        return low;
    }
    low + random_below(high - low)
}
