//! Scoped ownership of a broker and the coordinator behind it.
//!
//! # Lifecycle
//!
//! ```text
//! start() ──► Created ──check_ready()──► Ready ──release()──► Released
//!                │                                    ▲
//!                └────────────release()───────────────┘
//! ```
//!
//! Construction alone never implies readiness: the broker registers with its
//! coordinator asynchronously. [`BrokerHandle::check_ready`] and
//! [`BrokerHandle::create_unique_topic`] bridge that gap with
//! [`wait_for_passing`].

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use tempfile::TempDir;
use tracing::{info, warn};

use super::{BrokerConfig, EmbeddedBroker};
use crate::config::HarnessConfig;
use crate::coordinator::{Coordinator, CoordinatorHandle};
use crate::ensure;
use crate::error::{CheckError, Error, Result};
use crate::ports;
use crate::retry::wait_for_passing;
use crate::topic::TopicName;
use crate::types::{BrokerId, Lifecycle, ServiceEndpoint};

const HANDLE: &str = "broker";

/// Owns one embedded broker, its log directory and its coordinator.
pub struct BrokerHandle {
    config: HarnessConfig,
    broker: EmbeddedBroker,
    log_dir: Option<TempDir>,
    coordinator: CoordinatorHandle,
    lifecycle: Lifecycle,
}

impl BrokerHandle {
    /// Start a coordinator and a broker bound to it.
    ///
    /// Returns once the broker's port is bound. Does not wait for readiness.
    pub async fn start(config: &HarnessConfig) -> Result<Self> {
        let coordinator = CoordinatorHandle::start(config).await?;
        Self::start_with_coordinator(config, coordinator).await
    }

    /// Start a broker against an already running coordinator, taking
    /// ownership of it.
    ///
    /// If the broker fails to start, the coordinator is released before the
    /// error is returned.
    pub async fn start_with_coordinator(
        config: &HarnessConfig,
        mut coordinator: CoordinatorHandle,
    ) -> Result<Self> {
        match launch(config, &coordinator).await {
            Ok((broker, log_dir)) => Ok(Self {
                config: config.clone(),
                broker,
                log_dir: Some(log_dir),
                coordinator,
                lifecycle: Lifecycle::Created,
            }),
            Err(e) => {
                if let Err(release_err) = coordinator.release().await {
                    warn!(error = %release_err, "Failed to release coordinator after broker setup failure");
                }
                Err(e)
            }
        }
    }

    pub fn lifecycle(&self) -> Lifecycle {
        self.lifecycle
    }

    pub fn broker_id(&self) -> Result<BrokerId> {
        self.lifecycle.ensure_live(HANDLE)?;
        Ok(self.broker.broker_id())
    }

    /// Port the broker actually bound.
    pub fn local_port(&self) -> Result<u16> {
        self.lifecycle.ensure_live(HANDLE)?;
        Ok(self.broker.local_port())
    }

    pub fn endpoint(&self) -> Result<ServiceEndpoint> {
        self.lifecycle.ensure_live(HANDLE)?;
        Ok(self.broker.endpoint().clone())
    }

    /// Connect string of the coordinator this broker is registered with.
    pub fn connect_string(&self) -> Result<String> {
        self.lifecycle.ensure_live(HANDLE)?;
        self.coordinator.connect_string()
    }

    pub fn coordinator(&self) -> Result<Arc<dyn Coordinator>> {
        self.lifecycle.ensure_live(HANDLE)?;
        self.coordinator.coordinator()
    }

    pub fn broker(&self) -> Result<&EmbeddedBroker> {
        self.lifecycle.ensure_live(HANDLE)?;
        Ok(&self.broker)
    }

    /// Log directory, `None` once released.
    pub fn log_dir(&self) -> Option<&Path> {
        self.log_dir.as_ref().map(TempDir::path)
    }

    /// Wait up to the configured ready timeout for the health indicator.
    pub async fn check_ready(&mut self) -> Result<()> {
        self.check_ready_within(self.config.ready_timeout).await
    }

    /// Wait up to `timeout` for the health indicator to be set.
    ///
    /// A broker that is no longer running, or that failed to register with
    /// its coordinator, fails immediately instead of polling out the budget.
    pub async fn check_ready_within(&mut self, timeout: Duration) -> Result<()> {
        self.lifecycle.ensure_live(HANDLE)?;

        let broker = &self.broker;
        wait_for_passing(self.config.ready_policy(timeout), || async {
            if !broker.is_running() {
                return Err(CheckError::from(Error::ServiceStopped { service: HANDLE }));
            }
            if let Some(reason) = broker.registration_error() {
                return Err(CheckError::from(Error::setup(HANDLE, reason)));
            }
            ensure!(
                broker.is_healthy(),
                "broker {} health indicator is not set",
                broker.broker_id()
            );
            Ok(())
        })
        .await?;

        if self.lifecycle == Lifecycle::Created {
            info!(broker_id = self.broker.broker_id(), "Broker ready");
        }
        self.lifecycle = Lifecycle::Ready;
        Ok(())
    }

    /// Create a single-partition topic named `prefix` + random suffix.
    pub async fn create_unique_topic(&mut self, prefix: &str) -> Result<String> {
        self.create_unique_topic_with(prefix, 1).await
    }

    /// Create a topic named `prefix` + random suffix with `partitions`
    /// partitions and wait until every partition has a leader.
    pub async fn create_unique_topic_with(
        &mut self,
        prefix: &str,
        partitions: u32,
    ) -> Result<String> {
        self.check_ready().await?;

        let topic = TopicName::unique(prefix, partitions)?;
        let coordinator = self.coordinator.coordinator()?;
        coordinator.create_topic(topic.name(), partitions, 1).await?;

        let name = topic.name();
        wait_for_passing(self.config.topic_policy(), || {
            let coordinator = coordinator.clone();
            async move {
                let Some(metadata) = coordinator.topic_metadata(name).await? else {
                    return Err(CheckError::unmet(format!(
                        "topic {} is not visible in the coordinator yet",
                        name
                    )));
                };
                ensure!(
                    metadata.partitions.len() == partitions as usize,
                    "topic {} reports {} of {} partitions",
                    name,
                    metadata.partitions.len(),
                    partitions
                );
                let leaderless = metadata.leaderless_partitions();
                ensure!(
                    leaderless.is_empty(),
                    "topic {} partitions {:?} have no leader yet",
                    name,
                    leaderless
                );
                Ok(())
            }
        })
        .await?;

        info!(topic = name, partitions, "Unique topic created");
        Ok(topic.into_name())
    }

    /// Shut the broker down, wait for it, then release the coordinator.
    ///
    /// Each step runs even if an earlier one failed; failures are logged.
    pub async fn release(&mut self) -> Result<()> {
        self.lifecycle.ensure_live(HANDLE)?;
        self.lifecycle = Lifecycle::Released;
        let broker_id = self.broker.broker_id();

        if let Err(e) = self.broker.shutdown().await {
            warn!(broker_id, error = %e, "Broker shutdown failed, continuing release");
        }
        if let Err(e) = self.broker.await_shutdown().await {
            warn!(broker_id, error = %e, "Broker did not stop cleanly");
        }

        if let Some(dir) = self.log_dir.take() {
            let path = dir.path().to_path_buf();
            if let Err(e) = dir.close() {
                warn!(path = %path.display(), error = %e, "Failed to remove broker log dir");
            }
        }

        if let Err(e) = self.coordinator.release().await {
            warn!(error = %e, "Coordinator release failed");
        }

        info!(broker_id, "Broker released");
        Ok(())
    }
}

impl Drop for BrokerHandle {
    fn drop(&mut self) {
        if !self.lifecycle.is_released() {
            self.broker.signal_shutdown();
        }
    }
}

async fn launch(
    config: &HarnessConfig,
    coordinator: &CoordinatorHandle,
) -> Result<(EmbeddedBroker, TempDir)> {
    let log_dir = tempfile::Builder::new()
        .prefix("kafka")
        .tempdir()
        .map_err(|e| Error::setup(HANDLE, format!("cannot create log dir: {}", e)))?;
    let port = ports::allocate()?;

    let broker_config = BrokerConfig {
        registration_delay: config.registration_delay,
        election_interval: config.election_interval,
        shutdown_timeout: config.shutdown_timeout,
        ..BrokerConfig::single_node(
            config.host.clone(),
            port,
            log_dir.path(),
            coordinator.connect_string()?,
        )
    };

    let broker = EmbeddedBroker::start(broker_config, coordinator.coordinator()?).await?;
    Ok((broker, log_dir))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fast_config() -> HarnessConfig {
        HarnessConfig {
            poll_interval: Duration::from_millis(50),
            registration_delay: Duration::from_millis(20),
            election_interval: Duration::from_millis(20),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_lifecycle_transitions() {
        let mut handle = BrokerHandle::start(&fast_config()).await.unwrap();
        assert_eq!(handle.lifecycle(), Lifecycle::Created);

        handle.check_ready().await.unwrap();
        assert_eq!(handle.lifecycle(), Lifecycle::Ready);

        handle.release().await.unwrap();
        assert_eq!(handle.lifecycle(), Lifecycle::Released);
        assert!(matches!(
            handle.release().await,
            Err(Error::Released { handle: "broker" })
        ));
    }

    #[tokio::test]
    async fn test_release_removes_directories() {
        let mut handle = BrokerHandle::start(&fast_config()).await.unwrap();
        let log_dir = handle.log_dir().unwrap().to_path_buf();
        assert!(log_dir.is_dir());

        handle.release().await.unwrap();
        assert!(!log_dir.exists());
        assert!(handle.log_dir().is_none());
    }

    #[tokio::test]
    async fn test_check_ready_fails_fast_when_broker_stopped() {
        let mut handle = BrokerHandle::start(&fast_config()).await.unwrap();
        handle.broker().unwrap().shutdown().await.unwrap();

        let started = std::time::Instant::now();
        let err = handle.check_ready().await.unwrap_err();
        assert!(matches!(err, Error::Fatal { .. }));
        assert!(started.elapsed() < Duration::from_secs(1));

        handle.release().await.unwrap();
    }

    #[tokio::test]
    async fn test_create_unique_topic_elects_leaders() {
        let mut handle = BrokerHandle::start(&fast_config()).await.unwrap();
        let topic = handle.create_unique_topic_with("events", 3).await.unwrap();

        let metadata = handle
            .coordinator()
            .unwrap()
            .topic_metadata(&topic)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(metadata.partitions.len(), 3);
        assert!(metadata.all_partitions_led());

        handle.release().await.unwrap();
    }
}
