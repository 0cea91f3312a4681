//! Scoped fixtures: start, run a test body, always release.
//!
//! ```rust,no_run
//! use kafkaesque_testkit::config::HarnessConfig;
//! use kafkaesque_testkit::scoped::{with_kafka_connect, with_local_kafka};
//! use kafkaesque_testkit::connect::Herder;
//!
//! # async fn example() -> kafkaesque_testkit::error::Result<()> {
//! let config = HarnessConfig::from_env();
//! with_local_kafka(&config, |port| {
//!     let config = config.clone();
//!     async move {
//!         with_kafka_connect(&config, port, |herder| async move {
//!             assert!(herder.connectors().await?.is_empty());
//!             Ok(())
//!         })
//!         .await
//!     }
//! })
//! .await
//! # }
//! ```
//!
//! The body's result is returned after release. Release failures are
//! logged and never replace the body's result. A panicking body unwinds
//! through the handle's `Drop`, which signals shutdown without waiting.

use std::future::Future;
use std::sync::Arc;

use tracing::warn;

use crate::broker::BrokerHandle;
use crate::config::HarnessConfig;
use crate::connect::{StandaloneHerder, WorkerHandle};
use crate::error::Error;
use crate::types::ServiceEndpoint;

/// Run `body` with the local port of a fresh, ready broker.
pub async fn with_local_kafka<F, Fut, T, E>(config: &HarnessConfig, body: F) -> Result<T, E>
where
    F: FnOnce(u16) -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: From<Error>,
{
    let mut broker = BrokerHandle::start(config).await?;

    let result = async {
        broker.check_ready().await?;
        let port = broker.local_port()?;
        body(port).await
    }
    .await;

    if let Err(e) = broker.release().await {
        warn!(error = %e, "Failed to release broker after test body");
    }
    result
}

/// Run `body` with the herder of a fresh worker pointed at `broker_port` on
/// the configured host.
pub async fn with_kafka_connect<F, Fut, T, E>(
    config: &HarnessConfig,
    broker_port: u16,
    body: F,
) -> Result<T, E>
where
    F: FnOnce(Arc<StandaloneHerder>) -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: From<Error>,
{
    let broker = ServiceEndpoint::new(config.host.clone(), broker_port)?;
    let mut worker = WorkerHandle::start(config, &broker).await?;

    let result = async {
        let herder = worker.herder()?;
        body(herder).await
    }
    .await;

    if let Err(e) = worker.release().await {
        warn!(error = %e, "Failed to release worker after test body");
    }
    result
}
