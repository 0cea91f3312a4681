//! Logging configuration for harness users.
//!
//! The fixtures log every lifecycle edge through `tracing`. Test binaries
//! install a subscriber once:
//!
//! ```rust,no_run
//! use kafkaesque_testkit::telemetry::init_test_logging;
//!
//! #[tokio::test]
//! async fn my_test() {
//!     init_test_logging();
//!     // ...
//! }
//! ```
//!
//! # Environment Variables
//!
//! - `LOG_FORMAT`: `json` or `pretty` (default: `pretty`)
//! - `RUST_LOG`: log level filter (default: `info`)

use std::sync::Once;

use tracing_subscriber::prelude::*;

/// Log output format.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum LogFormat {
    /// Human-readable output (default).
    #[default]
    Pretty,
    /// One JSON object per event.
    Json,
}

impl std::str::FromStr for LogFormat {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s.to_lowercase().as_str() {
            "json" => LogFormat::Json,
            _ => LogFormat::Pretty,
        })
    }
}

impl LogFormat {
    /// Read from LOG_FORMAT environment variable.
    pub fn from_env() -> Self {
        std::env::var("LOG_FORMAT")
            .map(|s| s.parse().unwrap_or_default())
            .unwrap_or_default()
    }
}

fn env_filter() -> tracing_subscriber::EnvFilter {
    tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"))
}

/// Install a global subscriber writing to stdout.
///
/// Fails if a global subscriber is already installed.
pub fn init_logging(format: LogFormat) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    match format {
        LogFormat::Json => {
            tracing_subscriber::registry()
                .with(env_filter())
                .with(tracing_subscriber::fmt::layer().json())
                .try_init()?;
        }
        LogFormat::Pretty => {
            tracing_subscriber::registry()
                .with(env_filter())
                .with(tracing_subscriber::fmt::layer())
                .try_init()?;
        }
    }

    Ok(())
}

static TEST_LOGGING: Once = Once::new();

/// Install a subscriber that writes through the test harness' captured output.
///
/// Safe to call from every test; only the first call installs anything, and an
/// already-installed subscriber is left in place.
pub fn init_test_logging() {
    TEST_LOGGING.call_once(|| {
        let result = tracing_subscriber::registry()
            .with(env_filter())
            .with(tracing_subscriber::fmt::layer().with_test_writer())
            .try_init();
        if result.is_err() {
            tracing::debug!("Global subscriber already installed, keeping it");
        }
    });
}
