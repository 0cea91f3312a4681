//! Shared value types.

use std::fmt;
use std::net::SocketAddr;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Broker identifier, as registered with the coordinator.
pub type BrokerId = i32;

/// Address a started service listens on.
///
/// Produced by a handle once its service has bound a port and consumed by
/// dependent handles (a worker connecting to a broker). The port is always
/// in `1..=65535`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ServiceEndpoint {
    host: String,
    port: u16,
}

impl ServiceEndpoint {
    /// Create an endpoint, rejecting an empty host or port 0.
    ///
    /// A bracketed IPv6 host is stored without its brackets.
    pub fn new(host: impl Into<String>, port: u16) -> Result<Self> {
        let mut host = host.into();
        if let Some(inner) = host.strip_prefix('[').and_then(|h| h.strip_suffix(']')) {
            host = inner.to_string();
        }
        if host.trim().is_empty() {
            return Err(Error::Config("endpoint host cannot be empty".to_string()));
        }
        if port == 0 {
            return Err(Error::Config(format!(
                "endpoint port for host '{}' must be in 1..=65535",
                host
            )));
        }
        Ok(Self { host, port })
    }

    /// Endpoint for a bound socket address.
    pub fn from_socket_addr(addr: SocketAddr) -> Result<Self> {
        Self::new(addr.ip().to_string(), addr.port())
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    /// `host:port`, the form used by connect strings and bootstrap lists.
    /// IPv6 hosts are bracketed.
    pub fn address(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for ServiceEndpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.host.contains(':') {
            write!(f, "[{}]:{}", self.host, self.port)
        } else {
            write!(f, "{}:{}", self.host, self.port)
        }
    }
}

impl FromStr for ServiceEndpoint {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let (host, port) = s
            .trim()
            .rsplit_once(':')
            .ok_or_else(|| Error::Config(format!("endpoint '{}' is not host:port", s)))?;
        let port = port
            .parse::<u16>()
            .map_err(|_| Error::Config(format!("endpoint '{}' has an invalid port", s)))?;
        Self::new(host, port)
    }
}

/// Lifecycle shared by every handle: `Created -> Ready -> Released`.
///
/// `Released` is terminal; operations on a released handle fail with
/// [`Error::Released`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Lifecycle {
    /// Service started, readiness not yet observed.
    Created,
    /// Readiness observed at least once.
    Ready,
    /// Service stopped and resources returned.
    Released,
}

impl Lifecycle {
    /// Fail with [`Error::Released`] for a released handle.
    pub fn ensure_live(&self, handle: &'static str) -> Result<()> {
        match self {
            Lifecycle::Released => Err(Error::Released { handle }),
            Lifecycle::Created | Lifecycle::Ready => Ok(()),
        }
    }

    pub fn is_released(&self) -> bool {
        matches!(self, Lifecycle::Released)
    }
}

impl fmt::Display for Lifecycle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Lifecycle::Created => write!(f, "created"),
            Lifecycle::Ready => write!(f, "ready"),
            Lifecycle::Released => write!(f, "released"),
        }
    }
}
