//! Crate-level errors.
//!
//! # Error Taxonomy
//!
//! - **Poll exhaustion** ([`Error::ConditionNotMet`]): a [`wait_for_passing`]
//!   loop ran out of attempts. The message is the one reported by the *last*
//!   failing check, so the caller sees the real unmet condition.
//! - **Fatal poll failure** ([`Error::Fatal`]): the check failed with something
//!   other than an unmet condition. Never retried; the original error is kept
//!   as the source.
//! - **Setup failure** ([`Error::Setup`]): an embedded service did not start.
//!   Returned from constructors; no handle exists, so nothing needs releasing.
//! - **Teardown failure**: never returned from `release()` paths that must keep
//!   going. Those are logged with `tracing::warn!` and the sequence continues.
//!
//! # Checks
//!
//! Closures polled by [`wait_for_passing`] return `Result<T, CheckError>`.
//! [`CheckError::Unmet`] is retried; [`CheckError::Fatal`] is not. Any crate
//! [`Error`] converts into [`CheckError::Fatal`], so `?` works inside checks.
//!
//! [`wait_for_passing`]: crate::retry::wait_for_passing

use std::time::Duration;
use std::{io, result};

use thiserror::Error as ThisError;

pub type Result<T> = result::Result<T, Error>;

/// Boxed error used for causes that come from outside the crate.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Errors raised by the harness and its embedded services.
#[derive(Debug, ThisError)]
pub enum Error {
    /// A polled condition never held within the policy's budget.
    ///
    /// Displays exactly as the last failing check's message.
    #[error("{message}")]
    ConditionNotMet { message: String, attempts: u32 },

    /// A polled check failed with a non-retryable error.
    #[error("non-retryable failure while polling: {source}")]
    Fatal {
        #[source]
        source: BoxError,
    },

    /// The policy's timeout allows zero attempts.
    #[error("poll timeout {timeout:?} is shorter than the poll interval {interval:?}")]
    TimeoutTooShort {
        timeout: Duration,
        interval: Duration,
    },

    /// The retry policy itself is malformed.
    #[error("invalid retry policy: {0}")]
    InvalidPolicy(String),

    /// An embedded service failed to start.
    #[error("failed to start {service}: {reason}")]
    Setup {
        service: &'static str,
        reason: String,
    },

    /// An operation was issued on a handle that has already been released.
    #[error("{handle} handle has already been released")]
    Released { handle: &'static str },

    /// The underlying service is no longer running.
    #[error("{service} is not running")]
    ServiceStopped { service: &'static str },

    /// Topic name or partition layout is not acceptable.
    #[error("invalid topic: {0}")]
    InvalidTopic(String),

    /// Topic already exists.
    #[error("topic '{0}' already exists")]
    TopicExists(String),

    /// Topic does not exist.
    #[error("topic '{0}' does not exist")]
    UnknownTopic(String),

    /// Requested replication factor exceeds the number of live brokers.
    #[error("replication factor {requested} larger than available brokers {available}")]
    InvalidReplicationFactor { requested: u16, available: usize },

    /// Connector already registered with the herder.
    #[error("connector '{0}' already exists")]
    ConnectorExists(String),

    /// Connector not registered with the herder.
    #[error("connector '{0}' not found")]
    UnknownConnector(String),

    /// Connector configuration rejected by the herder.
    #[error("invalid connector config: {0}")]
    InvalidConnectorConfig(String),

    /// Configuration error.
    #[error("configuration error: {0}")]
    Config(String),

    /// A converter could not encode or decode a value.
    #[error("conversion error: {0}")]
    Conversion(String),

    /// A bounded wait expired.
    #[error("{operation} did not complete within {timeout:?}")]
    Timeout {
        operation: &'static str,
        timeout: Duration,
    },

    /// Filesystem or network error.
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// JSON encoding or decoding error.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl Error {
    /// Build a setup error for `service`.
    pub fn setup(service: &'static str, reason: impl Into<String>) -> Self {
        Error::Setup {
            service,
            reason: reason.into(),
        }
    }

    /// Returns true if retrying the same operation may succeed.
    ///
    /// Only transient network conditions and stalled waits qualify; everything
    /// else needs the caller to change something first.
    pub fn is_retriable(&self) -> bool {
        match self {
            Error::Io(e) => Self::is_io_error_retryable(e),
            Error::Timeout { .. } => true,

            Error::ConditionNotMet { .. }
            | Error::Fatal { .. }
            | Error::TimeoutTooShort { .. }
            | Error::InvalidPolicy(_)
            | Error::Setup { .. }
            | Error::Released { .. }
            | Error::ServiceStopped { .. }
            | Error::InvalidTopic(_)
            | Error::TopicExists(_)
            | Error::UnknownTopic(_)
            | Error::InvalidReplicationFactor { .. }
            | Error::ConnectorExists(_)
            | Error::UnknownConnector(_)
            | Error::InvalidConnectorConfig(_)
            | Error::Config(_)
            | Error::Conversion(_)
            | Error::Serialization(_) => false,
        }
    }

    fn is_io_error_retryable(e: &io::Error) -> bool {
        matches!(
            e.kind(),
            io::ErrorKind::ConnectionRefused
                | io::ErrorKind::ConnectionReset
                | io::ErrorKind::ConnectionAborted
                | io::ErrorKind::TimedOut
                | io::ErrorKind::Interrupted
                | io::ErrorKind::WouldBlock
        )
    }
}

/// Outcome of a single failed check inside a polling loop.
#[derive(Debug)]
pub enum CheckError {
    /// The condition does not hold yet. Retried until the policy is exhausted.
    Unmet(String),
    /// Any other failure. Propagated immediately.
    Fatal(BoxError),
}

impl CheckError {
    /// Build an unmet-condition failure.
    pub fn unmet(message: impl Into<String>) -> Self {
        CheckError::Unmet(message.into())
    }

    /// Build a fatal failure from any error.
    pub fn fatal(error: impl Into<BoxError>) -> Self {
        CheckError::Fatal(error.into())
    }

    /// Whether the poller should try again after this failure.
    pub fn is_retryable(&self) -> bool {
        matches!(self, CheckError::Unmet(_))
    }
}

impl std::fmt::Display for CheckError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CheckError::Unmet(message) => f.write_str(message),
            CheckError::Fatal(source) => write!(f, "{}", source),
        }
    }
}

impl From<Error> for CheckError {
    fn from(e: Error) -> Self {
        CheckError::Fatal(Box::new(e))
    }
}

impl From<io::Error> for CheckError {
    fn from(e: io::Error) -> Self {
        CheckError::Fatal(Box::new(e))
    }
}
