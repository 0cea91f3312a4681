//! # Kafkaesque Testkit
//! Ephemeral Kafka-style fixtures for integration tests.
//!
//! This crate starts a coordination service, a single-node broker and a
//! standalone connect worker inside the test process, each bound to a
//! freshly allocated port and a temporary directory, and tears them down in
//! a fixed order when the test is done.
//!
//! # Goals
//! - Turn eventually-consistent cluster state into plain assertions
//! - Never leak a port, a directory or a background task, even on failure
//! - Keep every fixture independent so tests can run in parallel
//!
//! ## Getting started
//! ```toml
//! [dev-dependencies]
//! kafkaesque-testkit = "0.1"
//! ```
//!
//! ### A broker with a unique topic
//! [`BrokerHandle`](broker::BrokerHandle) owns a broker and its coordinator.
//! Construction returns as soon as the broker is bound; readiness is polled
//! explicitly.
//!
//! ```rust,no_run
//! use kafkaesque_testkit::prelude::*;
//!
//! #[tokio::test]
//! async fn orders_topic() -> Result<()> {
//!     let config = HarnessConfig::from_env();
//!     let mut broker = BrokerHandle::start(&config).await?;
//!
//!     let topic = broker.create_unique_topic("orders").await?;
//!     assert!(topic.starts_with("orders"));
//!
//!     broker.release().await
//! }
//! ```
//!
//! ### Waiting for any condition
//! [`wait_for_passing`](retry::wait_for_passing) polls a check at a fixed
//! interval and surfaces the last failure message when it gives up.
//!
//! ```rust,no_run
//! use kafkaesque_testkit::prelude::*;
//! use kafkaesque_testkit::ensure;
//!
//! # async fn example(broker: &BrokerHandle, topic: &str) -> Result<()> {
//! let coordinator = broker.coordinator()?;
//! wait_for_passing(RetryPolicy::with_timeout(std::time::Duration::from_secs(5)), || {
//!     let coordinator = coordinator.clone();
//!     async move {
//!         let topics = coordinator.topics().await?;
//!         ensure!(topics.iter().any(|t| t == topic), "{} not listed yet", topic);
//!         Ok(())
//!     }
//! })
//! .await
//! # }
//! ```
//!
//! ### Connect worker
//! [`with_kafka_connect`](scoped::with_kafka_connect) starts a worker against
//! a broker port, hands the herder to the test body and stops the worker
//! afterwards.

#![forbid(unsafe_code)]

pub mod error;
pub mod types;

pub mod config;
pub mod constants;
mod net;
pub mod ports;
pub mod retry;
pub mod tasks;
pub mod telemetry;
pub mod topic;

pub mod broker;
pub mod connect;
pub mod coordinator;
pub mod scoped;

pub mod prelude {
    //! Everything a test needs to start fixtures and poll them.
    pub use crate::broker::BrokerHandle;
    pub use crate::config::HarnessConfig;
    pub use crate::connect::{Herder, StandaloneHerder, WorkerHandle};
    pub use crate::coordinator::{Coordinator, CoordinatorHandle};
    pub use crate::error::{CheckError, Error, Result};
    pub use crate::retry::{RetryPolicy, wait_for_passing};
    pub use crate::scoped::{with_kafka_connect, with_local_kafka};
    pub use crate::telemetry::init_test_logging;
    pub use crate::types::{BrokerId, Lifecycle, ServiceEndpoint};
}
