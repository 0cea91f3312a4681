//! In-process coordination service.
//!
//! Holds brokers and topic metadata in memory behind a `tokio` `RwLock` and
//! binds a TCP admin port that answers four-letter words:
//!
//! - `ruok`: `imok`
//! - `stat` / `srvr`: `brokers: N` and `topics: N`, one per line
//!
//! Any other word closes the connection without a reply.
//!
//! Every topic change is mirrored to `snapshot.json` in the data directory
//! so a failed test leaves something to look at while the directory lives.

use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{RwLock, broadcast};
use tracing::{debug, info, warn};

use super::{BrokerInfo, Coordinator, PartitionMetadata, TopicMetadata};
use crate::constants::{
    CONNECTION_READ_TIMEOUT, COORDINATOR_SNAPSHOT_FILE, DEFAULT_SHUTDOWN_TIMEOUT,
};
use crate::error::{Error, Result};
use crate::net;
use crate::tasks::TaskRegistry;
use crate::topic::validate_topic_name;
use crate::types::BrokerId;

const SERVICE: &str = "coordinator";

/// Settings of an [`EmbeddedCoordinator`].
#[derive(Debug, Clone)]
pub struct EmbeddedCoordinatorConfig {
    pub host: String,
    /// Admin port. `0` lets the OS choose.
    pub port: u16,
    /// Directory receiving `snapshot.json`. Must exist.
    pub data_dir: PathBuf,
    /// Bound on joining the listener task at shutdown.
    pub shutdown_timeout: Duration,
}

impl EmbeddedCoordinatorConfig {
    pub fn new(host: impl Into<String>, port: u16, data_dir: impl Into<PathBuf>) -> Self {
        Self {
            host: host.into(),
            port,
            data_dir: data_dir.into(),
            shutdown_timeout: DEFAULT_SHUTDOWN_TIMEOUT,
        }
    }
}

#[derive(Debug, Default)]
struct State {
    brokers: BTreeMap<BrokerId, BrokerInfo>,
    topics: BTreeMap<String, TopicMetadata>,
}

#[derive(Serialize)]
struct Snapshot<'a> {
    brokers: Vec<&'a BrokerInfo>,
    topics: Vec<&'a TopicMetadata>,
}

/// Coordination service running inside the test process.
pub struct EmbeddedCoordinator {
    config: EmbeddedCoordinatorConfig,
    local_addr: SocketAddr,
    state: Arc<RwLock<State>>,
    running: AtomicBool,
    tasks: TaskRegistry,
}

impl EmbeddedCoordinator {
    /// Bind the admin port and start serving.
    ///
    /// Returns once the listener is bound, so the connect string is usable
    /// immediately.
    pub async fn start(config: EmbeddedCoordinatorConfig) -> Result<Self> {
        if !config.data_dir.is_dir() {
            return Err(Error::setup(
                SERVICE,
                format!("data dir {} does not exist", config.data_dir.display()),
            ));
        }

        let listener = TcpListener::bind((config.host.as_str(), config.port))
            .await
            .map_err(|e| {
                Error::setup(
                    SERVICE,
                    format!("cannot bind {}:{}: {}", config.host, config.port, e),
                )
            })?;
        let local_addr = listener.local_addr()?;

        let state = Arc::new(RwLock::new(State::default()));
        let tasks = TaskRegistry::new(SERVICE);
        tasks.spawn(
            "admin-listener",
            serve_admin(listener, state.clone(), tasks.subscribe()),
        );

        info!(
            addr = %local_addr,
            data_dir = %config.data_dir.display(),
            "Coordinator listening"
        );

        let coordinator = Self {
            config,
            local_addr,
            state,
            running: AtomicBool::new(true),
            tasks,
        };
        coordinator.persist().await?;
        Ok(coordinator)
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn data_dir(&self) -> &Path {
        &self.config.data_dir
    }

    pub fn snapshot_path(&self) -> PathBuf {
        self.config.data_dir.join(COORDINATOR_SNAPSHOT_FILE)
    }

    fn ensure_running(&self) -> Result<()> {
        if self.running.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(Error::ServiceStopped { service: SERVICE })
        }
    }

    async fn persist(&self) -> Result<()> {
        let body = {
            let state = self.state.read().await;
            serde_json::to_vec_pretty(&Snapshot {
                brokers: state.brokers.values().collect(),
                topics: state.topics.values().collect(),
            })?
        };
        tokio::fs::write(self.snapshot_path(), body).await?;
        Ok(())
    }
}

#[async_trait]
impl Coordinator for EmbeddedCoordinator {
    fn connect_string(&self) -> String {
        self.local_addr.to_string()
    }

    fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    fn signal_shutdown(&self) {
        self.running.store(false, Ordering::SeqCst);
        self.tasks.signal_shutdown();
    }

    async fn shutdown(&self) -> Result<()> {
        if !self.running.swap(false, Ordering::SeqCst) {
            return Ok(());
        }

        if let Err(e) = self.persist().await {
            warn!(error = %e, "Failed to write final coordinator snapshot");
        }

        if !self.tasks.join_all(self.config.shutdown_timeout).await {
            warn!("Coordinator tasks did not stop cleanly");
        }

        info!(addr = %self.local_addr, "Coordinator stopped");
        Ok(())
    }

    async fn register_broker(&self, broker: BrokerInfo) -> Result<()> {
        self.ensure_running()?;
        info!(broker_id = broker.broker_id, host = %broker.host, port = broker.port, "Broker registered");
        self.state
            .write()
            .await
            .brokers
            .insert(broker.broker_id, broker);
        Ok(())
    }

    async fn unregister_broker(&self, broker_id: BrokerId) -> Result<()> {
        self.ensure_running()?;
        let dropped = {
            let mut state = self.state.write().await;
            state.brokers.remove(&broker_id);

            let mut dropped = 0usize;
            for partition in state
                .topics
                .values_mut()
                .flat_map(|t| t.partitions.iter_mut())
            {
                if partition.leader == Some(broker_id) {
                    partition.leader = None;
                    dropped += 1;
                }
            }
            dropped
        };

        info!(broker_id, dropped_leaderships = dropped, "Broker unregistered");
        if dropped > 0 {
            self.persist().await?;
        }
        Ok(())
    }

    async fn live_brokers(&self) -> Result<Vec<BrokerInfo>> {
        self.ensure_running()?;
        Ok(self.state.read().await.brokers.values().cloned().collect())
    }

    async fn create_topic(
        &self,
        topic: &str,
        partitions: u32,
        replication_factor: u16,
    ) -> Result<()> {
        self.ensure_running()?;
        validate_topic_name(topic)?;
        if partitions == 0 {
            return Err(Error::InvalidTopic(format!(
                "topic '{}' needs at least one partition",
                topic
            )));
        }

        {
            let mut state = self.state.write().await;
            if state.topics.contains_key(topic) {
                return Err(Error::TopicExists(topic.to_string()));
            }

            let live: Vec<BrokerId> = state.brokers.keys().copied().collect();
            if replication_factor == 0 || usize::from(replication_factor) > live.len() {
                return Err(Error::InvalidReplicationFactor {
                    requested: replication_factor,
                    available: live.len(),
                });
            }

            let partitions = (0..partitions)
                .map(|partition| PartitionMetadata {
                    partition,
                    leader: None,
                    replicas: (0..usize::from(replication_factor))
                        .map(|r| live[(partition as usize + r) % live.len()])
                        .collect(),
                })
                .collect();

            state.topics.insert(
                topic.to_string(),
                TopicMetadata {
                    name: topic.to_string(),
                    replication_factor,
                    partitions,
                },
            );
        }

        info!(topic, partitions, replication_factor, "Topic created");
        self.persist().await
    }

    async fn delete_topic(&self, topic: &str) -> Result<bool> {
        self.ensure_running()?;
        let removed = self.state.write().await.topics.remove(topic).is_some();
        if removed {
            info!(topic, "Topic deleted");
            self.persist().await?;
        }
        Ok(removed)
    }

    async fn topics(&self) -> Result<Vec<String>> {
        self.ensure_running()?;
        Ok(self.state.read().await.topics.keys().cloned().collect())
    }

    async fn topic_metadata(&self, topic: &str) -> Result<Option<TopicMetadata>> {
        self.ensure_running()?;
        Ok(self.state.read().await.topics.get(topic).cloned())
    }

    async fn leaderless_partitions(&self) -> Result<Vec<(String, u32)>> {
        self.ensure_running()?;
        let state = self.state.read().await;
        Ok(state
            .topics
            .values()
            .flat_map(|t| {
                t.leaderless_partitions()
                    .into_iter()
                    .map(|p| (t.name.clone(), p))
            })
            .collect())
    }

    async fn elect_leader(&self, topic: &str, partition: u32, leader: BrokerId) -> Result<bool> {
        self.ensure_running()?;
        let elected = {
            let mut state = self.state.write().await;
            if !state.brokers.contains_key(&leader) {
                false
            } else {
                match state
                    .topics
                    .get_mut(topic)
                    .and_then(|t| t.partitions.get_mut(partition as usize))
                {
                    Some(p) if p.leader.is_none() => {
                        p.leader = Some(leader);
                        true
                    }
                    _ => false,
                }
            }
        };

        if elected {
            debug!(topic, partition, leader, "Partition leader elected");
            self.persist().await?;
        }
        Ok(elected)
    }
}

impl Drop for EmbeddedCoordinator {
    fn drop(&mut self) {
        self.signal_shutdown();
    }
}

async fn serve_admin(
    listener: TcpListener,
    state: Arc<RwLock<State>>,
    shutdown: broadcast::Receiver<()>,
) {
    loop {
        let (stream, addr) = net::accept(&listener, SERVICE).await;
        debug!(client_addr = %addr, "Coordinator admin connection");
        net::spawn_connection(
            SERVICE,
            addr,
            shutdown.resubscribe(),
            handle_admin(stream, state.clone()),
        );
    }
}

async fn handle_admin(mut stream: TcpStream, state: Arc<RwLock<State>>) {
    let mut buf = [0u8; 64];
    let n = match tokio::time::timeout(CONNECTION_READ_TIMEOUT, stream.read(&mut buf)).await {
        Ok(Ok(n)) => n,
        Ok(Err(e)) => {
            debug!(error = ?e, "Failed to read admin command");
            return;
        }
        Err(_) => {
            debug!("Admin connection idle, closing");
            return;
        }
    };

    let command = String::from_utf8_lossy(&buf[..n]);
    let response = match command.trim() {
        "ruok" => "imok".to_string(),
        "stat" | "srvr" => {
            let state = state.read().await;
            format!(
                "brokers: {}\ntopics: {}\n",
                state.brokers.len(),
                state.topics.len()
            )
        }
        other => {
            debug!(command = other, "Unknown admin command");
            return;
        }
    };

    if let Err(e) = stream.write_all(response.as_bytes()).await {
        debug!(error = ?e, "Failed to write admin response");
    }
}
