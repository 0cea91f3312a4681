//! Integration tests for HarnessConfig::from_env()

use std::env;
use std::time::Duration;

use kafkaesque_testkit::config::HarnessConfig;
use serial_test::serial;

/// All environment variables read by HarnessConfig::from_env().
const ALL_CONFIG_ENV_VARS: &[&str] = &[
    "KAFKAESQUE_TESTKIT_HOST",
    "KAFKAESQUE_TESTKIT_POLL_INTERVAL_MS",
    "KAFKAESQUE_TESTKIT_READY_TIMEOUT_MS",
    "KAFKAESQUE_TESTKIT_TOPIC_TIMEOUT_MS",
    "KAFKAESQUE_TESTKIT_SHUTDOWN_TIMEOUT_MS",
    "KAFKAESQUE_TESTKIT_REGISTRATION_DELAY_MS",
    "KAFKAESQUE_TESTKIT_ELECTION_INTERVAL_MS",
];

/// Run `f` with exactly `vars` set among the harness variables, restoring
/// the previous values afterwards. Callers are `#[serial]`.
fn with_env_vars<F, R>(vars: &[(&str, &str)], f: F) -> R
where
    F: FnOnce() -> R,
{
    let originals: Vec<_> = ALL_CONFIG_ENV_VARS
        .iter()
        .map(|k| (*k, env::var(*k).ok()))
        .collect();

    for key in ALL_CONFIG_ENV_VARS {
        unsafe { env::remove_var(key) };
    }
    for (key, value) in vars {
        unsafe { env::set_var(key, value) };
    }

    let result = f();

    for (key, original) in originals {
        match original {
            Some(v) => unsafe { env::set_var(key, v) },
            None => unsafe { env::remove_var(key) },
        }
    }

    result
}

#[test]
#[serial]
fn test_from_env_defaults() {
    with_env_vars(&[], || {
        assert_eq!(HarnessConfig::from_env(), HarnessConfig::default());
    });
}

#[test]
#[serial]
fn test_from_env_overrides_timing() {
    with_env_vars(
        &[
            ("KAFKAESQUE_TESTKIT_POLL_INTERVAL_MS", "50"),
            ("KAFKAESQUE_TESTKIT_READY_TIMEOUT_MS", "60000"),
            ("KAFKAESQUE_TESTKIT_TOPIC_TIMEOUT_MS", "20000"),
            ("KAFKAESQUE_TESTKIT_SHUTDOWN_TIMEOUT_MS", "2000"),
            ("KAFKAESQUE_TESTKIT_REGISTRATION_DELAY_MS", "0"),
            ("KAFKAESQUE_TESTKIT_ELECTION_INTERVAL_MS", "25"),
        ],
        || {
            let config = HarnessConfig::from_env();
            assert_eq!(config.poll_interval, Duration::from_millis(50));
            assert_eq!(config.ready_timeout, Duration::from_secs(60));
            assert_eq!(config.topic_timeout, Duration::from_secs(20));
            assert_eq!(config.shutdown_timeout, Duration::from_secs(2));
            assert_eq!(config.registration_delay, Duration::ZERO);
            assert_eq!(config.election_interval, Duration::from_millis(25));
            assert_eq!(config.ready_policy(config.ready_timeout).max_attempts(), 1200);
        },
    );
}

#[test]
#[serial]
fn test_from_env_custom_host() {
    with_env_vars(&[("KAFKAESQUE_TESTKIT_HOST", "localhost")], || {
        assert_eq!(HarnessConfig::from_env().host, "localhost");
    });
}

#[test]
#[serial]
fn test_from_env_ignores_invalid_values() {
    with_env_vars(
        &[
            ("KAFKAESQUE_TESTKIT_HOST", "   "),
            ("KAFKAESQUE_TESTKIT_POLL_INTERVAL_MS", "0"),
            ("KAFKAESQUE_TESTKIT_READY_TIMEOUT_MS", "fifteen"),
            ("KAFKAESQUE_TESTKIT_ELECTION_INTERVAL_MS", "-5"),
        ],
        || {
            let config = HarnessConfig::from_env();
            let defaults = HarnessConfig::default();
            assert_eq!(config.host, defaults.host);
            assert_eq!(config.poll_interval, defaults.poll_interval);
            assert_eq!(config.ready_timeout, defaults.ready_timeout);
            assert_eq!(config.election_interval, defaults.election_interval);
        },
    );
}
