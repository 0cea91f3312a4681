//! Integration tests for the broker and coordinator handles.
//!
//! **Note:** These tests bind TCP listeners on 127.0.0.1.

use std::io;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::AsyncReadExt;
use tokio::net::TcpStream;
use kafkaesque_testkit::coordinator::{
    BrokerInfo, EmbeddedCoordinator, EmbeddedCoordinatorConfig, PartitionMetadata, TopicMetadata,
};
use kafkaesque_testkit::prelude::*;
use kafkaesque_testkit::topic::validate_topic_name;

fn fast_config() -> HarnessConfig {
    HarnessConfig {
        poll_interval: Duration::from_millis(100),
        ready_timeout: Duration::from_secs(5),
        registration_delay: Duration::from_millis(20),
        election_interval: Duration::from_millis(20),
        ..HarnessConfig::default()
    }
}

// ============================================================================
// Faulty Coordinator
// ============================================================================

/// Delegates to an embedded coordinator but hides partition leaders from the
/// first `lag` metadata reads of topics starting with `topic_prefix`, and
/// optionally refuses broker registrations.
struct FaultyCoordinator {
    inner: Arc<EmbeddedCoordinator>,
    topic_prefix: &'static str,
    lag: u32,
    reject_registration: Option<&'static str>,
    metadata_calls: Arc<AtomicU32>,
}

#[async_trait]
impl Coordinator for FaultyCoordinator {
    fn connect_string(&self) -> String {
        self.inner.connect_string()
    }

    fn is_running(&self) -> bool {
        self.inner.is_running()
    }

    async fn shutdown(&self) -> Result<()> {
        self.inner.shutdown().await
    }

    fn signal_shutdown(&self) {
        self.inner.signal_shutdown();
    }

    async fn register_broker(&self, broker: BrokerInfo) -> Result<()> {
        if let Some(reason) = self.reject_registration {
            return Err(Error::Io(io::Error::new(io::ErrorKind::ConnectionReset, reason)));
        }
        self.inner.register_broker(broker).await
    }

    async fn unregister_broker(&self, broker_id: BrokerId) -> Result<()> {
        self.inner.unregister_broker(broker_id).await
    }

    async fn live_brokers(&self) -> Result<Vec<BrokerInfo>> {
        self.inner.live_brokers().await
    }

    async fn create_topic(
        &self,
        topic: &str,
        partitions: u32,
        replication_factor: u16,
    ) -> Result<()> {
        self.inner
            .create_topic(topic, partitions, replication_factor)
            .await
    }

    async fn delete_topic(&self, topic: &str) -> Result<bool> {
        self.inner.delete_topic(topic).await
    }

    async fn topics(&self) -> Result<Vec<String>> {
        self.inner.topics().await
    }

    async fn topic_metadata(&self, topic: &str) -> Result<Option<TopicMetadata>> {
        let metadata = self.inner.topic_metadata(topic).await?;
        if !topic.starts_with(self.topic_prefix) {
            return Ok(metadata);
        }

        let call = self.metadata_calls.fetch_add(1, Ordering::SeqCst) + 1;
        if call > self.lag {
            return Ok(metadata);
        }
        Ok(metadata.map(|m| TopicMetadata {
            partitions: m
                .partitions
                .into_iter()
                .map(|p| PartitionMetadata { leader: None, ..p })
                .collect(),
            ..m
        }))
    }

    async fn leaderless_partitions(&self) -> Result<Vec<(String, u32)>> {
        self.inner.leaderless_partitions().await
    }

    async fn elect_leader(&self, topic: &str, partition: u32, leader: BrokerId) -> Result<bool> {
        self.inner.elect_leader(topic, partition, leader).await
    }
}

async fn lagging_coordinator(
    prefix: &'static str,
    lag: u32,
) -> (CoordinatorHandle, Arc<AtomicU32>) {
    faulty_coordinator(prefix, lag, None).await
}

async fn faulty_coordinator(
    prefix: &'static str,
    lag: u32,
    reject_registration: Option<&'static str>,
) -> (CoordinatorHandle, Arc<AtomicU32>) {
    let data_dir = tempfile::Builder::new()
        .prefix("coordinator")
        .tempdir()
        .unwrap();
    let inner = EmbeddedCoordinator::start(EmbeddedCoordinatorConfig::new(
        "127.0.0.1",
        0,
        data_dir.path(),
    ))
    .await
    .unwrap();

    let metadata_calls = Arc::new(AtomicU32::new(0));
    let faulty = FaultyCoordinator {
        inner: Arc::new(inner),
        topic_prefix: prefix,
        lag,
        reject_registration,
        metadata_calls: metadata_calls.clone(),
    };
    (
        CoordinatorHandle::wrap(Arc::new(faulty), data_dir),
        metadata_calls,
    )
}

// ============================================================================
// Readiness and Topics
// ============================================================================

#[tokio::test]
async fn test_broker_becomes_ready() {
    init_test_logging();
    let mut broker = BrokerHandle::start(&fast_config()).await.unwrap();
    assert_eq!(broker.lifecycle(), Lifecycle::Created);

    broker.check_ready().await.unwrap();
    assert_eq!(broker.lifecycle(), Lifecycle::Ready);
    assert!(broker.local_port().unwrap() > 0);

    let live = broker.coordinator().unwrap().live_brokers().await.unwrap();
    assert_eq!(live.len(), 1);
    assert_eq!(live[0].broker_id, broker.broker_id().unwrap());

    broker.release().await.unwrap();
}

#[tokio::test]
async fn test_unique_topics_do_not_collide() {
    init_test_logging();
    let mut broker = BrokerHandle::start(&fast_config()).await.unwrap();

    let first = broker.create_unique_topic("orders").await.unwrap();
    let second = broker.create_unique_topic("orders").await.unwrap();

    assert_ne!(first, second);
    for topic in [&first, &second] {
        assert!(topic.starts_with("orders"), "{}", topic);
        validate_topic_name(topic).unwrap();
    }

    let topics = broker.coordinator().unwrap().topics().await.unwrap();
    assert!(topics.contains(&first));
    assert!(topics.contains(&second));

    broker.release().await.unwrap();
}

#[tokio::test]
async fn test_unique_topic_sanitizes_prefix() {
    init_test_logging();
    let mut broker = BrokerHandle::start(&fast_config()).await.unwrap();

    let topic = broker.create_unique_topic("my orders/v2").await.unwrap();
    assert!(topic.starts_with("my_orders_v2"), "{}", topic);

    broker.release().await.unwrap();
}

#[tokio::test]
async fn test_multi_partition_topic_waits_for_lagging_leaders() {
    init_test_logging();
    let config = fast_config();
    let (coordinator, metadata_calls) = lagging_coordinator("events", 2).await;
    let mut broker = BrokerHandle::start_with_coordinator(&config, coordinator)
        .await
        .unwrap();

    let topic = broker.create_unique_topic_with("events", 3).await.unwrap();

    // Two reads without leaders, then the real metadata.
    assert_eq!(metadata_calls.load(Ordering::SeqCst), 3);

    let metadata = broker
        .coordinator()
        .unwrap()
        .topic_metadata(&topic)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(metadata.partitions.len(), 3);
    assert!(metadata.all_partitions_led());

    broker.release().await.unwrap();
}

#[tokio::test]
async fn test_leaderless_topic_times_out_with_last_message() {
    init_test_logging();
    let config = HarnessConfig {
        topic_timeout: Duration::from_millis(500),
        ..fast_config()
    };
    let (coordinator, _) = lagging_coordinator("stuck", u32::MAX).await;
    let mut broker = BrokerHandle::start_with_coordinator(&config, coordinator)
        .await
        .unwrap();

    let err = broker.create_unique_topic_with("stuck", 2).await.unwrap_err();
    assert!(matches!(err, Error::ConditionNotMet { attempts: 5, .. }));
    assert!(err.to_string().contains("have no leader yet"), "{}", err);

    broker.release().await.unwrap();
}

#[tokio::test]
async fn test_rejected_registration_fails_check_ready_promptly() {
    init_test_logging();
    let (coordinator, _) = faulty_coordinator("unused", 0, Some("session expired")).await;
    let mut broker = BrokerHandle::start_with_coordinator(&fast_config(), coordinator)
        .await
        .unwrap();

    let started = std::time::Instant::now();
    let err = broker.check_ready().await.unwrap_err();
    assert!(started.elapsed() < Duration::from_secs(2));
    match &err {
        Error::Fatal { source } => {
            assert!(source.to_string().contains("session expired"), "{}", source)
        }
        other => panic!("expected fatal error, got {:?}", other),
    }
    assert_eq!(broker.lifecycle(), Lifecycle::Created);

    broker.release().await.unwrap();
}

#[tokio::test]
async fn test_zero_partitions_rejected() {
    init_test_logging();
    let mut broker = BrokerHandle::start(&fast_config()).await.unwrap();

    assert!(matches!(
        broker.create_unique_topic_with("orders", 0).await,
        Err(Error::InvalidTopic(_))
    ));

    broker.release().await.unwrap();
}

// ============================================================================
// Release
// ============================================================================

#[tokio::test]
async fn test_release_removes_directories() {
    init_test_logging();
    let mut broker = BrokerHandle::start(&fast_config()).await.unwrap();
    broker.check_ready().await.unwrap();

    let log_dir = broker.log_dir().unwrap().to_path_buf();
    assert!(log_dir.join("meta.properties").exists());

    broker.release().await.unwrap();
    assert_eq!(broker.lifecycle(), Lifecycle::Released);
    assert!(!log_dir.exists());
    assert!(broker.log_dir().is_none());
}

#[tokio::test]
async fn test_coordinator_release_removes_data_dir() {
    init_test_logging();
    let mut coordinator = CoordinatorHandle::start(&fast_config()).await.unwrap();
    let data_dir = coordinator.data_dir().unwrap().to_path_buf();
    let service = coordinator.coordinator().unwrap();
    assert!(data_dir.exists());

    coordinator.release().await.unwrap();
    assert!(!data_dir.exists());
    assert!(!service.is_running());
    assert!(matches!(
        service.topics().await,
        Err(Error::ServiceStopped { .. })
    ));
    assert!(matches!(
        coordinator.connect_string(),
        Err(Error::Released { handle: "coordinator" })
    ));
}

#[tokio::test]
async fn test_coordinator_release_after_unclean_exit_removes_data_dir() {
    init_test_logging();
    let mut coordinator = CoordinatorHandle::start(&fast_config()).await.unwrap();
    let data_dir = coordinator.data_dir().unwrap().to_path_buf();
    let service = coordinator.coordinator().unwrap();

    service.signal_shutdown();
    coordinator.release().await.unwrap();
    assert!(!data_dir.exists());
    assert!(!service.is_running());
}

#[tokio::test]
async fn test_coordinator_release_closes_idle_admin_connections() {
    init_test_logging();
    let mut coordinator = CoordinatorHandle::start(&fast_config()).await.unwrap();
    let mut idle = TcpStream::connect(coordinator.connect_string().unwrap())
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;

    coordinator.release().await.unwrap();

    let mut buf = [0u8; 16];
    let read = tokio::time::timeout(Duration::from_secs(2), idle.read(&mut buf))
        .await
        .expect("idle admin connection still open after release");
    assert_eq!(read.unwrap_or(0), 0);
}

#[tokio::test]
async fn test_check_ready_after_release_fails_promptly() {
    init_test_logging();
    let mut broker = BrokerHandle::start(&fast_config()).await.unwrap();
    broker.release().await.unwrap();

    let start = std::time::Instant::now();
    let err = broker.check_ready().await.unwrap_err();
    assert!(matches!(err, Error::Released { handle: "broker" }));
    assert!(start.elapsed() < Duration::from_millis(100));

    assert!(matches!(
        broker.create_unique_topic("orders").await,
        Err(Error::Released { .. })
    ));
    assert!(matches!(
        broker.broker_id(),
        Err(Error::Released { handle: "broker" })
    ));
    assert!(broker.release().await.is_err());
}

#[tokio::test]
async fn test_release_before_ready() {
    init_test_logging();
    let config = HarnessConfig {
        registration_delay: Duration::from_secs(30),
        ..fast_config()
    };
    let mut broker = BrokerHandle::start(&config).await.unwrap();
    let coordinator = broker.coordinator().unwrap();

    broker.release().await.unwrap();
    assert!(!coordinator.is_running());
}

#[tokio::test]
async fn test_brokers_are_independent() {
    init_test_logging();
    let mut first = BrokerHandle::start(&fast_config()).await.unwrap();
    let mut second = BrokerHandle::start(&fast_config()).await.unwrap();

    assert_ne!(first.local_port().unwrap(), second.local_port().unwrap());
    assert_ne!(first.connect_string().unwrap(), second.connect_string().unwrap());

    first.release().await.unwrap();
    second.check_ready().await.unwrap();
    second.release().await.unwrap();
}
