//! Bounded-retry polling for eventually-consistent state.
//!
//! Distributed fixtures report readiness asynchronously: a broker registers a
//! moment after its port is bound, a topic's partitions elect leaders a moment
//! after the topic is created. [`wait_for_passing`] turns such "eventually
//! true" conditions into a synchronous assertion:
//!
//! - the check runs at a fixed interval, built on `backon`'s constant backoff;
//! - at most `floor(timeout / interval)` attempts are made;
//! - success returns immediately with the check's value;
//! - [`CheckError::Unmet`] is retried, and when the budget runs out the
//!   **last** unmet message is surfaced as [`Error::ConditionNotMet`];
//! - [`CheckError::Fatal`] is never retried and comes back as
//!   [`Error::Fatal`] with the original error as its source.
//!
//! # Example
//!
//! ```rust,no_run
//! use std::time::Duration;
//! use kafkaesque_testkit::ensure;
//! use kafkaesque_testkit::retry::{RetryPolicy, wait_for_passing};
//!
//! # async fn example(flag: std::sync::Arc<std::sync::atomic::AtomicBool>) -> kafkaesque_testkit::error::Result<()> {
//! let policy = RetryPolicy::new(Duration::from_secs(5), Duration::from_millis(300));
//! wait_for_passing(policy, || async {
//!     ensure!(flag.load(std::sync::atomic::Ordering::SeqCst), "flag still unset");
//!     Ok(())
//! })
//! .await?;
//! # Ok(())
//! # }
//! ```

use std::future::Future;
use std::time::Duration;

use backon::{ConstantBuilder, ExponentialBuilder, Retryable};

use crate::constants::{BOOTSTRAP_CONNECT_RETRIES, BOOTSTRAP_RETRY_DELAY, DEFAULT_POLL_INTERVAL};
use crate::error::{CheckError, Error, Result};

/// Timeout and fixed poll interval of a polling loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    timeout: Duration,
    poll_interval: Duration,
}

impl RetryPolicy {
    /// Create a policy. Validation happens when the policy is used.
    pub const fn new(timeout: Duration, poll_interval: Duration) -> Self {
        Self {
            timeout,
            poll_interval,
        }
    }

    /// Policy with the default 300ms interval.
    pub const fn with_timeout(timeout: Duration) -> Self {
        Self::new(timeout, DEFAULT_POLL_INTERVAL)
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn poll_interval(&self) -> Duration {
        self.poll_interval
    }

    /// `floor(timeout / poll_interval)`, or 0 for a zero interval.
    pub fn max_attempts(&self) -> u32 {
        let interval = self.poll_interval.as_nanos();
        if interval == 0 {
            return 0;
        }
        u32::try_from(self.timeout.as_nanos() / interval).unwrap_or(u32::MAX)
    }

    /// Check the policy and return the attempt budget.
    ///
    /// A zero interval is rejected outright; a timeout that allows no attempt
    /// at all is rejected with [`Error::TimeoutTooShort`].
    pub fn validate(&self) -> Result<u32> {
        if self.poll_interval.is_zero() {
            return Err(Error::InvalidPolicy(
                "poll interval must be greater than zero".to_string(),
            ));
        }

        match self.max_attempts() {
            0 => Err(Error::TimeoutTooShort {
                timeout: self.timeout,
                interval: self.poll_interval,
            }),
            attempts => Ok(attempts),
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::with_timeout(crate::constants::DEFAULT_READY_TIMEOUT)
    }
}

/// Run `check` until it passes or the policy's attempt budget is spent.
///
/// Sleeps exactly one poll interval between attempts and never after the last
/// one. The check is invoked at most [`RetryPolicy::max_attempts`] times.
pub async fn wait_for_passing<T, F, Fut>(policy: RetryPolicy, check: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = std::result::Result<T, CheckError>>,
{
    let attempts = policy.validate()?;

    let backoff = ConstantBuilder::default()
        .with_delay(policy.poll_interval)
        .with_max_times((attempts - 1) as usize);

    let result = check
        .retry(backoff)
        .when(CheckError::is_retryable)
        .notify(|err: &CheckError, delay: Duration| {
            tracing::debug!(error = %err, retry_in = ?delay, "Condition not met yet");
        })
        .await;

    match result {
        Ok(value) => Ok(value),
        Err(CheckError::Unmet(message)) => {
            tracing::warn!(
                attempts,
                timeout = ?policy.timeout,
                last_failure = %message,
                "Condition still not met after retry budget"
            );
            Err(Error::ConditionNotMet { message, attempts })
        }
        Err(CheckError::Fatal(source)) => Err(Error::Fatal { source }),
    }
}

/// Backoff for a worker's bootstrap connection attempts.
///
/// Short, jittered and bounded: a broker that refuses connections this many
/// times is treated as absent and the worker fails setup.
pub fn bootstrap_policy() -> ExponentialBuilder {
    ExponentialBuilder::default()
        .with_min_delay(BOOTSTRAP_RETRY_DELAY)
        .with_max_delay(BOOTSTRAP_RETRY_DELAY * 4)
        .with_max_times(BOOTSTRAP_CONNECT_RETRIES)
        .with_jitter()
}

/// Return [`CheckError::Unmet`] from the enclosing check unless `cond` holds.
///
/// ```rust
/// use kafkaesque_testkit::ensure;
/// use kafkaesque_testkit::error::CheckError;
///
/// fn check(leaders: usize) -> Result<(), CheckError> {
///     ensure!(leaders == 3, "expected 3 leaders, found {}", leaders);
///     Ok(())
/// }
///
/// assert!(check(3).is_ok());
/// assert_eq!(check(1).unwrap_err().to_string(), "expected 3 leaders, found 1");
/// ```
#[macro_export]
macro_rules! ensure {
    ($cond:expr, $($arg:tt)+) => {
        if !$cond {
            return ::core::result::Result::Err($crate::error::CheckError::Unmet(format!($($arg)+)));
        }
    };
}
