//! Harness-wide configuration.
//!
//! Every fixture reads its timing knobs from a [`HarnessConfig`]. The defaults
//! match what single-node integration tests need; CI machines that are slower
//! than a laptop can stretch them through the environment:
//!
//! | Variable | Default |
//! |----------|---------|
//! | `KAFKAESQUE_TESTKIT_HOST` | `127.0.0.1` |
//! | `KAFKAESQUE_TESTKIT_POLL_INTERVAL_MS` | `300` |
//! | `KAFKAESQUE_TESTKIT_READY_TIMEOUT_MS` | `15000` |
//! | `KAFKAESQUE_TESTKIT_TOPIC_TIMEOUT_MS` | `5000` |
//! | `KAFKAESQUE_TESTKIT_SHUTDOWN_TIMEOUT_MS` | `10000` |
//! | `KAFKAESQUE_TESTKIT_REGISTRATION_DELAY_MS` | `200` |
//! | `KAFKAESQUE_TESTKIT_ELECTION_INTERVAL_MS` | `100` |
//!
//! Unparseable values fall back to the default.

use std::time::Duration;

use crate::constants::{
    DEFAULT_ELECTION_INTERVAL, DEFAULT_POLL_INTERVAL, DEFAULT_READY_TIMEOUT,
    DEFAULT_REGISTRATION_DELAY, DEFAULT_SHUTDOWN_TIMEOUT, DEFAULT_TOPIC_LEADER_TIMEOUT,
};
use crate::retry::RetryPolicy;

/// Timing and addressing shared by all fixtures.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HarnessConfig {
    /// Host every embedded service binds and advertises.
    pub host: String,

    /// Sleep between readiness/propagation check attempts.
    pub poll_interval: Duration,

    /// Default budget of `BrokerHandle::check_ready`.
    pub ready_timeout: Duration,

    /// Budget for partition leaders to appear after topic creation.
    pub topic_timeout: Duration,

    /// Bound on each await-stop/await-shutdown join during release.
    pub shutdown_timeout: Duration,

    /// Delay before the embedded broker registers with its coordinator.
    pub registration_delay: Duration,

    /// Tick of the embedded controller's leader election.
    pub election_interval: Duration,
}

impl Default for HarnessConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            poll_interval: DEFAULT_POLL_INTERVAL,
            ready_timeout: DEFAULT_READY_TIMEOUT,
            topic_timeout: DEFAULT_TOPIC_LEADER_TIMEOUT,
            shutdown_timeout: DEFAULT_SHUTDOWN_TIMEOUT,
            registration_delay: DEFAULT_REGISTRATION_DELAY,
            election_interval: DEFAULT_ELECTION_INTERVAL,
        }
    }
}

impl HarnessConfig {
    /// Create configuration from environment variables.
    pub fn from_env() -> Self {
        let defaults = Self::default();

        let host = std::env::var("KAFKAESQUE_TESTKIT_HOST")
            .ok()
            .filter(|h| !h.trim().is_empty())
            .unwrap_or(defaults.host);

        Self {
            host,
            poll_interval: env_millis("KAFKAESQUE_TESTKIT_POLL_INTERVAL_MS")
                .filter(|d| !d.is_zero())
                .unwrap_or(defaults.poll_interval),
            ready_timeout: env_millis("KAFKAESQUE_TESTKIT_READY_TIMEOUT_MS")
                .unwrap_or(defaults.ready_timeout),
            topic_timeout: env_millis("KAFKAESQUE_TESTKIT_TOPIC_TIMEOUT_MS")
                .unwrap_or(defaults.topic_timeout),
            shutdown_timeout: env_millis("KAFKAESQUE_TESTKIT_SHUTDOWN_TIMEOUT_MS")
                .unwrap_or(defaults.shutdown_timeout),
            registration_delay: env_millis("KAFKAESQUE_TESTKIT_REGISTRATION_DELAY_MS")
                .unwrap_or(defaults.registration_delay),
            election_interval: env_millis("KAFKAESQUE_TESTKIT_ELECTION_INTERVAL_MS")
                .filter(|d| !d.is_zero())
                .unwrap_or(defaults.election_interval),
        }
    }

    /// Policy used by readiness checks with the given budget.
    pub fn ready_policy(&self, timeout: Duration) -> RetryPolicy {
        RetryPolicy::new(timeout, self.poll_interval)
    }

    /// Policy used while waiting for partition leaders.
    pub fn topic_policy(&self) -> RetryPolicy {
        RetryPolicy::new(self.topic_timeout, self.poll_interval)
    }
}

fn env_millis(key: &str) -> Option<Duration> {
    std::env::var(key)
        .ok()
        .and_then(|v| v.trim().parse::<u64>().ok())
        .map(Duration::from_millis)
}
