//! Standalone connect runtime: herder, REST listener and background loops.
//!
//! [`Connect::start`] performs the whole bootstrap before returning:
//!
//! 1. Connect to every bootstrap server (bounded retries)
//! 2. Load the offset file through the internal converters
//! 3. Start the herder and bind the REST port
//! 4. Spawn the offset flusher and the metadata refresher
//!
//! A failure in any step is a setup error and nothing is left running.
//! Stopping is split into [`Connect::stop`] and [`Connect::await_stop`].

use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use backon::Retryable;
use tokio::net::TcpStream;
use tracing::{debug, info, warn};

use super::config::WorkerConfig;
use super::herder::StandaloneHerder;
use super::offsets::FileOffsetStore;
use super::rest::RestServer;
use crate::constants::{BOOTSTRAP_CONNECT_TIMEOUT, DEFAULT_SHUTDOWN_TIMEOUT, STANDALONE_WORKER_ID};
use crate::error::{Error, Result};
use crate::retry::bootstrap_policy;
use crate::tasks::TaskRegistry;
use crate::types::ServiceEndpoint;

const SERVICE: &str = "worker";

/// A running standalone worker.
pub struct Connect {
    config: WorkerConfig,
    herder: Arc<StandaloneHerder>,
    rest_addr: SocketAddr,
    bootstrap_reachable: Arc<AtomicBool>,
    running: AtomicBool,
    shutdown_timeout: Duration,
    tasks: TaskRegistry,
}

impl Connect {
    /// Start with the default shutdown timeout.
    pub async fn start(config: WorkerConfig) -> Result<Self> {
        Self::start_with_timeout(config, DEFAULT_SHUTDOWN_TIMEOUT).await
    }

    /// Start and return once fully started.
    pub async fn start_with_timeout(config: WorkerConfig, shutdown_timeout: Duration) -> Result<Self> {
        config.validate()?;

        for server in &config.bootstrap_servers {
            connect_bootstrap(server).await?;
        }

        let offsets = FileOffsetStore::open(
            &config.offset_storage_file,
            config
                .internal_key_converter
                .build(config.internal_key_schemas_enable),
            config
                .internal_value_converter
                .build(config.internal_value_schemas_enable),
        )
        .map_err(|e| Error::setup(SERVICE, format!("cannot load offsets: {}", e)))?;
        let offsets = Arc::new(offsets);

        let herder = Arc::new(StandaloneHerder::new(STANDALONE_WORKER_ID, offsets.clone()));
        herder.start();

        let rest = match RestServer::bind(&config.rest_host, config.rest_port, herder.clone()).await {
            Ok(rest) => rest,
            Err(e) => {
                herder.stop();
                return Err(e);
            }
        };
        let rest_addr = rest.local_addr()?;

        let tasks = TaskRegistry::new(SERVICE);
        tasks.spawn("rest", rest.run(tasks.subscribe()));

        let flush_offsets = offsets.clone();
        tasks.spawn_periodic("offset-flush", config.offset_flush_interval, move |_| {
            let offsets = flush_offsets.clone();
            async move {
                if let Err(e) = offsets.flush().await {
                    warn!(error = %e, "Offset flush failed");
                }
            }
        });

        let bootstrap_reachable = Arc::new(AtomicBool::new(true));
        let servers = config.bootstrap_servers.clone();
        let reachable = bootstrap_reachable.clone();
        tasks.spawn_periodic("metadata-refresh", config.metadata_max_age, move |_| {
            let servers = servers.clone();
            let reachable = reachable.clone();
            async move {
                refresh_metadata(&servers, &reachable).await;
            }
        });

        let bootstrap: Vec<String> = config
            .bootstrap_servers
            .iter()
            .map(ServiceEndpoint::address)
            .collect();
        info!(
            worker_id = STANDALONE_WORKER_ID,
            rest_addr = %rest_addr,
            bootstrap = %bootstrap.join(","),
            "Kafka Connect started"
        );

        Ok(Self {
            config,
            herder,
            rest_addr,
            bootstrap_reachable,
            running: AtomicBool::new(true),
            shutdown_timeout,
            tasks,
        })
    }

    pub fn config(&self) -> &WorkerConfig {
        &self.config
    }

    pub fn herder(&self) -> Arc<StandaloneHerder> {
        self.herder.clone()
    }

    pub fn rest_addr(&self) -> SocketAddr {
        self.rest_addr
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Whether the last metadata refresh reached every bootstrap server.
    pub fn is_bootstrap_reachable(&self) -> bool {
        self.bootstrap_reachable.load(Ordering::SeqCst)
    }

    /// Stop the herder, signal the background tasks and flush offsets once
    /// more. Idempotent.
    pub async fn stop(&self) -> Result<()> {
        if !self.running.swap(false, Ordering::SeqCst) {
            return Ok(());
        }

        info!("Kafka Connect stopping");
        self.herder.stop();
        self.tasks.signal_shutdown();
        self.herder.offset_store().flush().await?;
        Ok(())
    }

    /// Non-blocking stop for `Drop` paths. Offsets are not flushed.
    pub fn signal_stop(&self) {
        self.running.store(false, Ordering::SeqCst);
        self.herder.stop();
        self.tasks.signal_shutdown();
    }

    /// Wait for the background tasks, bounded by the shutdown timeout.
    pub async fn await_stop(&self) -> Result<()> {
        if self.tasks.join_all(self.shutdown_timeout).await {
            info!("Kafka Connect stopped");
            Ok(())
        } else {
            Err(Error::Timeout {
                operation: "worker stop",
                timeout: self.shutdown_timeout,
            })
        }
    }
}

impl Drop for Connect {
    fn drop(&mut self) {
        self.signal_stop();
    }
}

async fn ping(server: &ServiceEndpoint) -> Result<()> {
    match tokio::time::timeout(BOOTSTRAP_CONNECT_TIMEOUT, TcpStream::connect(server.address())).await {
        Ok(Ok(_)) => Ok(()),
        Ok(Err(e)) => Err(Error::Io(e)),
        Err(_) => Err(Error::Timeout {
            operation: "bootstrap connect",
            timeout: BOOTSTRAP_CONNECT_TIMEOUT,
        }),
    }
}

async fn connect_bootstrap(server: &ServiceEndpoint) -> Result<()> {
    (|| ping(server))
        .retry(bootstrap_policy())
        .when(Error::is_retriable)
        .notify(|err: &Error, delay: Duration| {
            debug!(server = %server, error = %err, retry_in = ?delay, "Bootstrap server not reachable yet");
        })
        .await
        .map_err(|e| Error::setup(SERVICE, format!("bootstrap server {} unreachable: {}", server, e)))?;

    debug!(server = %server, "Connected to bootstrap server");
    Ok(())
}

async fn refresh_metadata(servers: &[ServiceEndpoint], reachable: &AtomicBool) {
    let mut all_reachable = true;
    for server in servers {
        if let Err(e) = ping(server).await {
            debug!(server = %server, error = %e, "Metadata refresh failed");
            all_reachable = false;
        }
    }

    let was_reachable = reachable.swap(all_reachable, Ordering::SeqCst);
    if was_reachable && !all_reachable {
        warn!("Bootstrap servers became unreachable");
    } else if !was_reachable && all_reachable {
        info!("Bootstrap servers reachable again");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connect::herder::Herder;
    use crate::constants::CONNECTOR_CLASS;
    use tokio::net::TcpListener;

    async fn fake_broker() -> (TcpListener, ServiceEndpoint) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let endpoint = ServiceEndpoint::from_socket_addr(listener.local_addr().unwrap()).unwrap();
        (listener, endpoint)
    }

    fn config(broker: &ServiceEndpoint, file: &tempfile::NamedTempFile) -> WorkerConfig {
        let mut config = WorkerConfig::standalone(broker, file.path(), 0);
        config.offset_flush_interval = Duration::from_millis(50);
        config
    }

    #[tokio::test]
    async fn test_start_and_stop() {
        let (_listener, broker) = fake_broker().await;
        let file = tempfile::NamedTempFile::new().unwrap();

        let connect = Connect::start(config(&broker, &file)).await.unwrap();
        assert!(connect.is_running());
        assert!(connect.rest_addr().port() > 0);
        assert_eq!(connect.herder().worker_id(), STANDALONE_WORKER_ID);

        connect.stop().await.unwrap();
        connect.await_stop().await.unwrap();
        assert!(!connect.is_running());
        assert!(!connect.herder().is_running());
    }

    #[tokio::test]
    async fn test_offsets_flushed_at_stop() {
        let (_listener, broker) = fake_broker().await;
        let file = tempfile::NamedTempFile::new().unwrap();

        let connect = Connect::start(config(&broker, &file)).await.unwrap();
        let herder = connect.herder();
        herder
            .put_connector_config(
                "source",
                [(CONNECTOR_CLASS.to_string(), "FileSource".to_string())].into(),
                false,
            )
            .await
            .unwrap();
        herder
            .offset_store()
            .put("source", &serde_json::json!({"file": "a"}), serde_json::json!(7));

        connect.stop().await.unwrap();
        connect.await_stop().await.unwrap();

        let contents = std::fs::read_to_string(file.path()).unwrap();
        assert!(contents.contains("source"));
    }

    #[tokio::test]
    async fn test_unreachable_bootstrap_fails_setup() {
        let port = crate::ports::allocate().unwrap();
        let broker = ServiceEndpoint::new("127.0.0.1", port).unwrap();
        let file = tempfile::NamedTempFile::new().unwrap();

        let result = Connect::start(config(&broker, &file)).await;
        assert!(matches!(result, Err(Error::Setup { service: "worker", .. })));
    }

    #[tokio::test]
    async fn test_rest_port_conflict_fails_setup() {
        let (_listener, broker) = fake_broker().await;
        let taken = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let file = tempfile::NamedTempFile::new().unwrap();

        let mut config = config(&broker, &file);
        config.rest_port = taken.local_addr().unwrap().port();
        assert!(matches!(
            Connect::start(config).await,
            Err(Error::Setup { .. })
        ));
    }
}
