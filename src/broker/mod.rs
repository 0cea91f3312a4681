//! Embedded single-node broker.
//!
//! The broker is a black box to the harness: it binds a port, registers with
//! its coordinator and exposes a health indicator. It does not store or
//! serve records; the harness only needs its lifecycle and the metadata it
//! drives through the coordinator.
//!
//! # Startup
//!
//! 1. Ping the coordinator's connect string (`ruok` / `imok`)
//! 2. Bind the requested port, falling back to an OS-chosen one if taken
//! 3. Write `meta.properties` into the log directory
//! 4. Spawn the acceptor, the controller and the registration task
//!
//! [`EmbeddedBroker::start`] returns after step 4. Registration happens
//! `registration_delay` later; only then is the health indicator set and
//! `__consumer_offsets` created. Callers that need a serving broker poll
//! [`EmbeddedBroker::is_healthy`]; a failed registration is reported by
//! [`EmbeddedBroker::registration_error`] instead.
//!
//! # Shutdown
//!
//! [`EmbeddedBroker::shutdown`] clears the health indicator, unregisters
//! from the coordinator (dropping the broker's partition leaderships) and
//! signals every task. [`EmbeddedBroker::await_shutdown`] joins them.

mod controller;
mod handle;

pub use controller::Controller;
pub use handle::BrokerHandle;

use std::io;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use serde::Serialize;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{broadcast, watch};
use tracing::{debug, info, warn};

use crate::constants::{
    BROKER_META_FILE, COORDINATOR_CONNECT_TIMEOUT, DEFAULT_BROKER_ID, DEFAULT_ELECTION_INTERVAL,
    DEFAULT_OFFSETS_TOPIC_PARTITIONS, DEFAULT_REGISTRATION_DELAY, DEFAULT_SHUTDOWN_TIMEOUT,
    OFFSETS_TOPIC,
};
use crate::coordinator::{BrokerInfo, Coordinator};
use crate::error::{Error, Result};
use crate::net;
use crate::tasks::TaskRegistry;
use crate::types::{BrokerId, ServiceEndpoint};

const SERVICE: &str = "broker";

/// Settings of an [`EmbeddedBroker`].
#[derive(Debug, Clone)]
pub struct BrokerConfig {
    pub broker_id: BrokerId,
    pub host: String,
    /// Requested port. `0` lets the OS choose.
    pub port: u16,
    pub log_dir: PathBuf,
    /// `host:port` of the coordinator the broker registers with.
    pub coordinator_connect: String,
    /// Replication factor of internal bookkeeping topics.
    pub offsets_topic_replication_factor: u16,
    pub offsets_topic_partitions: u32,
    pub registration_delay: Duration,
    pub election_interval: Duration,
    pub shutdown_timeout: Duration,
}

impl BrokerConfig {
    /// Single-node identity with replication factor 1 for internal topics.
    pub fn single_node(
        host: impl Into<String>,
        port: u16,
        log_dir: impl Into<PathBuf>,
        coordinator_connect: impl Into<String>,
    ) -> Self {
        Self {
            broker_id: DEFAULT_BROKER_ID,
            host: host.into(),
            port,
            log_dir: log_dir.into(),
            coordinator_connect: coordinator_connect.into(),
            offsets_topic_replication_factor: 1,
            offsets_topic_partitions: DEFAULT_OFFSETS_TOPIC_PARTITIONS,
            registration_delay: DEFAULT_REGISTRATION_DELAY,
            election_interval: DEFAULT_ELECTION_INTERVAL,
            shutdown_timeout: DEFAULT_SHUTDOWN_TIMEOUT,
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.broker_id < 0 {
            return Err(Error::Config(format!(
                "broker id must be non-negative, got {}",
                self.broker_id
            )));
        }
        if self.offsets_topic_replication_factor != 1 {
            return Err(Error::Config(format!(
                "offsets topic replication factor must be 1 on a single node, got {}",
                self.offsets_topic_replication_factor
            )));
        }
        if self.offsets_topic_partitions == 0 {
            return Err(Error::Config(
                "offsets topic needs at least one partition".to_string(),
            ));
        }
        if self.election_interval.is_zero() {
            return Err(Error::Config(
                "election interval must be greater than zero".to_string(),
            ));
        }
        if self.coordinator_connect.trim().is_empty() {
            return Err(Error::Config(
                "coordinator connect string cannot be empty".to_string(),
            ));
        }
        Ok(())
    }

    /// `meta.properties` contents for the bound endpoint.
    fn meta_properties(&self, endpoint: &ServiceEndpoint) -> String {
        format!(
            "version=0\nbroker.id={}\nlisteners=PLAINTEXT://{}\nlog.dirs={}\ncoordinator.connect={}\noffsets.topic.replication.factor={}\noffsets.topic.num.partitions={}\n",
            self.broker_id,
            endpoint,
            self.log_dir.display(),
            self.coordinator_connect,
            self.offsets_topic_replication_factor,
            self.offsets_topic_partitions,
        )
    }
}

/// The broker's health indicator. Present exactly while it serves requests.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BrokerHealthcheck {
    pub broker_id: BrokerId,
    pub endpoint: ServiceEndpoint,
    pub registered_at_ms: u64,
}

/// Broker running inside the test process.
pub struct EmbeddedBroker {
    config: BrokerConfig,
    endpoint: ServiceEndpoint,
    coordinator: Arc<dyn Coordinator>,
    health: watch::Sender<Option<BrokerHealthcheck>>,
    /// Why registration failed, if it did. The health indicator then never
    /// gets set.
    registration_error: watch::Sender<Option<String>>,
    running: AtomicBool,
    active_connections: Arc<AtomicUsize>,
    tasks: TaskRegistry,
}

impl EmbeddedBroker {
    /// Start the broker against `coordinator`.
    ///
    /// Returns once the port is bound and the background tasks are spawned.
    /// The health indicator is still empty at that point.
    pub async fn start(config: BrokerConfig, coordinator: Arc<dyn Coordinator>) -> Result<Self> {
        config.validate()?;
        ping_coordinator(&config.coordinator_connect).await?;

        let listener = bind(&config.host, config.port).await?;
        let local_addr = listener.local_addr()?;
        let endpoint = ServiceEndpoint::new(config.host.clone(), local_addr.port())?;

        tokio::fs::create_dir_all(&config.log_dir).await?;
        tokio::fs::write(
            config.log_dir.join(BROKER_META_FILE),
            config.meta_properties(&endpoint),
        )
        .await?;

        let (health, _) = watch::channel(None);
        let (registration_error, _) = watch::channel(None);
        let broker = Self {
            config,
            endpoint,
            coordinator,
            health,
            registration_error,
            running: AtomicBool::new(true),
            active_connections: Arc::new(AtomicUsize::new(0)),
            tasks: TaskRegistry::new(SERVICE),
        };

        broker.tasks.spawn(
            "acceptor",
            accept_loop(
                listener,
                broker.active_connections.clone(),
                broker.tasks.subscribe(),
            ),
        );

        let controller = Arc::new(Controller::new(
            broker.config.broker_id,
            broker.coordinator.clone(),
        ));
        broker
            .tasks
            .spawn_periodic("controller", broker.config.election_interval, move |_| {
                let controller = controller.clone();
                async move {
                    controller.tick().await;
                }
            });

        broker.tasks.spawn(
            "registration",
            register(
                broker.config.clone(),
                broker.endpoint.clone(),
                broker.coordinator.clone(),
                broker.health.clone(),
                broker.registration_error.clone(),
            ),
        );

        info!(
            broker_id = broker.config.broker_id,
            addr = %broker.endpoint,
            log_dir = %broker.config.log_dir.display(),
            "Broker started"
        );
        Ok(broker)
    }

    pub fn config(&self) -> &BrokerConfig {
        &self.config
    }

    pub fn broker_id(&self) -> BrokerId {
        self.config.broker_id
    }

    pub fn endpoint(&self) -> &ServiceEndpoint {
        &self.endpoint
    }

    /// Port actually bound; differs from the requested one after a conflict.
    pub fn local_port(&self) -> u16 {
        self.endpoint.port()
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Current health indicator.
    pub fn healthcheck(&self) -> Option<BrokerHealthcheck> {
        self.health.borrow().clone()
    }

    pub fn is_healthy(&self) -> bool {
        self.health.borrow().is_some()
    }

    /// The error that stopped the broker from registering, if any.
    pub fn registration_error(&self) -> Option<String> {
        self.registration_error.borrow().clone()
    }

    /// Receiver notified on every health indicator change.
    pub fn subscribe_health(&self) -> watch::Receiver<Option<BrokerHealthcheck>> {
        self.health.subscribe()
    }

    pub fn active_connections(&self) -> usize {
        self.active_connections.load(Ordering::SeqCst)
    }

    /// Leave the cluster and signal every task. Idempotent.
    pub async fn shutdown(&self) -> Result<()> {
        if !self.running.swap(false, Ordering::SeqCst) {
            return Ok(());
        }

        self.health.send_replace(None);
        self.tasks.signal_shutdown();

        match self
            .coordinator
            .unregister_broker(self.config.broker_id)
            .await
        {
            Ok(()) => {}
            Err(Error::ServiceStopped { .. }) => {
                debug!("Coordinator already stopped, skipping unregistration");
            }
            Err(e) => return Err(e),
        }

        info!(broker_id = self.config.broker_id, "Broker shutdown signalled");
        Ok(())
    }

    /// Non-blocking variant of [`shutdown`](Self::shutdown) for `Drop` paths.
    /// The broker stays registered.
    pub fn signal_shutdown(&self) {
        self.running.store(false, Ordering::SeqCst);
        self.health.send_replace(None);
        self.tasks.signal_shutdown();
    }

    /// Wait for every task to stop, bounded by the configured timeout.
    pub async fn await_shutdown(&self) -> Result<()> {
        let timeout = self.config.shutdown_timeout;
        if self.tasks.join_all(timeout).await {
            info!(broker_id = self.config.broker_id, "Broker shutdown complete");
            Ok(())
        } else {
            Err(Error::Timeout {
                operation: "broker shutdown",
                timeout,
            })
        }
    }
}

impl Drop for EmbeddedBroker {
    fn drop(&mut self) {
        self.signal_shutdown();
    }
}

async fn ping_coordinator(connect: &str) -> Result<()> {
    let ping = async {
        let mut stream = TcpStream::connect(connect).await?;
        stream.write_all(b"ruok").await?;
        let mut reply = String::new();
        stream.read_to_string(&mut reply).await?;
        Ok::<_, io::Error>(reply)
    };

    match tokio::time::timeout(COORDINATOR_CONNECT_TIMEOUT, ping).await {
        Ok(Ok(reply)) if reply.trim() == "imok" => Ok(()),
        Ok(Ok(reply)) => Err(Error::setup(
            SERVICE,
            format!("coordinator at {} answered {:?}", connect, reply),
        )),
        Ok(Err(e)) => Err(Error::setup(
            SERVICE,
            format!("coordinator at {} unreachable: {}", connect, e),
        )),
        Err(_) => Err(Error::setup(
            SERVICE,
            format!("coordinator at {} did not answer", connect),
        )),
    }
}

async fn bind(host: &str, port: u16) -> Result<TcpListener> {
    match TcpListener::bind((host, port)).await {
        Ok(listener) => Ok(listener),
        Err(e) if e.kind() == io::ErrorKind::AddrInUse && port != 0 => {
            warn!(port, "Requested broker port in use, binding an OS-chosen port");
            TcpListener::bind((host, 0))
                .await
                .map_err(|e| Error::setup(SERVICE, format!("cannot bind {}: {}", host, e)))
        }
        Err(e) => Err(Error::setup(
            SERVICE,
            format!("cannot bind {}:{}: {}", host, port, e),
        )),
    }
}

async fn accept_loop(
    listener: TcpListener,
    active_connections: Arc<AtomicUsize>,
    shutdown: broadcast::Receiver<()>,
) {
    loop {
        let (stream, addr) = net::accept(&listener, SERVICE).await;
        debug!(client_addr = %addr, "Accepted connection");

        active_connections.fetch_add(1, Ordering::SeqCst);
        let guard = ConnectionGuard(active_connections.clone());
        net::spawn_connection(SERVICE, addr, shutdown.resubscribe(), async move {
            let _guard = guard;
            drain(stream, addr).await;
        });
    }
}

/// Decrements the connection count however the connection task ends.
struct ConnectionGuard(Arc<AtomicUsize>);

impl Drop for ConnectionGuard {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Hold the connection open until the client closes it.
async fn drain(mut stream: TcpStream, addr: SocketAddr) {
    let mut buf = [0u8; 1024];
    loop {
        match stream.read(&mut buf).await {
            Ok(0) => return,
            Ok(_) => {}
            Err(e) => {
                debug!(client_addr = %addr, error = ?e, "Connection error");
                return;
            }
        }
    }
}

async fn register(
    config: BrokerConfig,
    endpoint: ServiceEndpoint,
    coordinator: Arc<dyn Coordinator>,
    health: watch::Sender<Option<BrokerHealthcheck>>,
    failure: watch::Sender<Option<String>>,
) {
    tokio::time::sleep(config.registration_delay).await;

    let registered_at_ms = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0);

    let info = BrokerInfo {
        broker_id: config.broker_id,
        host: endpoint.host().to_string(),
        port: endpoint.port(),
        registered_at_ms,
    };
    if let Err(e) = coordinator.register_broker(info).await {
        warn!(broker_id = config.broker_id, error = %e, "Broker registration failed");
        failure.send_replace(Some(format!(
            "broker {} could not register with the coordinator: {}",
            config.broker_id, e
        )));
        return;
    }

    match coordinator
        .create_topic(
            OFFSETS_TOPIC,
            config.offsets_topic_partitions,
            config.offsets_topic_replication_factor,
        )
        .await
    {
        Ok(()) | Err(Error::TopicExists(_)) => {}
        Err(e) => {
            warn!(error = %e, "Failed to create offsets topic");
            failure.send_replace(Some(format!(
                "broker {} could not create {}: {}",
                config.broker_id, OFFSETS_TOPIC, e
            )));
            return;
        }
    }

    health.send_replace(Some(BrokerHealthcheck {
        broker_id: config.broker_id,
        endpoint,
        registered_at_ms,
    }));
    info!(broker_id = config.broker_id, "Broker registered and serving");
}
