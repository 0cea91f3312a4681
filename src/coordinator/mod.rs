//! Coordination service: broker registry and topic/partition metadata.
//!
//! The broker and the harness never reach into the coordinator's internals;
//! they talk to it through the [`Coordinator`] trait. The default backend is
//! [`EmbeddedCoordinator`], an in-process service that binds a TCP port like
//! a real coordination service would. Tests can wrap or replace it to inject
//! behaviour, e.g. a metadata source that lags behind leader election.
//!
//! # Available Implementations
//!
//! - [`EmbeddedCoordinator`]: in-memory state plus a four-letter-word TCP
//!   admin listener (`ruok`, `stat`, `srvr`)
//!
//! # Ownership
//!
//! A [`CoordinatorHandle`] owns one coordinator and its data directory. The
//! broker holds a clone of the `Arc<dyn Coordinator>` but never stops it;
//! only the handle does.

mod embedded;
mod handle;

pub use embedded::{EmbeddedCoordinator, EmbeddedCoordinatorConfig};
pub use handle::CoordinatorHandle;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::types::BrokerId;

/// A broker as registered with the coordinator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BrokerInfo {
    pub broker_id: BrokerId,
    pub host: String,
    pub port: u16,
    pub registered_at_ms: u64,
}

/// Leadership of one partition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PartitionMetadata {
    pub partition: u32,
    /// Elected leader, `None` while the election is pending.
    pub leader: Option<BrokerId>,
    pub replicas: Vec<BrokerId>,
}

impl PartitionMetadata {
    pub fn has_leader(&self) -> bool {
        self.leader.is_some()
    }
}

/// Coordinator-visible metadata of one topic.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TopicMetadata {
    pub name: String,
    pub replication_factor: u16,
    pub partitions: Vec<PartitionMetadata>,
}

impl TopicMetadata {
    /// Partitions still waiting for a leader.
    pub fn leaderless_partitions(&self) -> Vec<u32> {
        self.partitions
            .iter()
            .filter(|p| !p.has_leader())
            .map(|p| p.partition)
            .collect()
    }

    /// True when every partition has an elected leader.
    pub fn all_partitions_led(&self) -> bool {
        self.partitions.iter().all(PartitionMetadata::has_leader)
    }
}

/// Operations the harness and the broker need from a coordination service.
#[async_trait]
pub trait Coordinator: Send + Sync {
    // ========================================================================
    // Lifecycle
    // ========================================================================

    /// Connection string (`host:port`) brokers use to reach this service.
    fn connect_string(&self) -> String;

    /// True while the service accepts requests.
    fn is_running(&self) -> bool;

    /// Stop the service. Later operations fail with `ServiceStopped`.
    async fn shutdown(&self) -> Result<()>;

    /// Non-blocking stop for `Drop` paths. Nothing is awaited.
    fn signal_shutdown(&self) {}

    // ========================================================================
    // Broker Registration
    // ========================================================================

    /// Register (or re-register) a broker.
    async fn register_broker(&self, broker: BrokerInfo) -> Result<()>;

    /// Remove a broker and drop every leadership it holds.
    async fn unregister_broker(&self, broker_id: BrokerId) -> Result<()>;

    /// Brokers currently registered, ordered by id.
    async fn live_brokers(&self) -> Result<Vec<BrokerInfo>>;

    // ========================================================================
    // Topic Metadata
    // ========================================================================

    /// Create a topic with `partitions` leaderless partitions.
    ///
    /// Leaders are assigned asynchronously by a broker's controller; callers
    /// must poll [`Coordinator::topic_metadata`] to observe them.
    async fn create_topic(&self, topic: &str, partitions: u32, replication_factor: u16)
    -> Result<()>;

    /// Delete a topic. Returns false if it did not exist.
    async fn delete_topic(&self, topic: &str) -> Result<bool>;

    /// All topic names, sorted.
    async fn topics(&self) -> Result<Vec<String>>;

    /// Partition-to-leader mapping of a topic, `None` if it does not exist.
    async fn topic_metadata(&self, topic: &str) -> Result<Option<TopicMetadata>>;

    // ========================================================================
    // Leader Election
    // ========================================================================

    /// Every (topic, partition) without a leader.
    async fn leaderless_partitions(&self) -> Result<Vec<(String, u32)>>;

    /// Record `leader` as the leader of a partition.
    ///
    /// Returns false if the partition no longer exists or already has a
    /// leader, so concurrent controllers cannot overwrite each other.
    async fn elect_leader(&self, topic: &str, partition: u32, leader: BrokerId) -> Result<bool>;
}
