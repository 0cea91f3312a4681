//! Control plane of the worker.
//!
//! Test code registers and inspects connectors through the [`Herder`] trait.
//! [`StandaloneHerder`] keeps connector configs in memory and runs
//! everything on the single standalone worker; it does not schedule
//! connector tasks, it only tracks their declared layout and state.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use serde::Serialize;
use tokio::sync::RwLock;
use tracing::info;

use super::offsets::FileOffsetStore;
use crate::constants::{CONNECTOR_CLASS, TASKS_MAX};
use crate::error::{Error, Result};

const SERVICE: &str = "herder";

pub type ConnectorConfig = BTreeMap<String, String>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ConnectorState {
    Running,
    Paused,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TaskId {
    pub connector: String,
    pub task: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConnectorInfo {
    pub name: String,
    pub config: ConnectorConfig,
    pub tasks: Vec<TaskId>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StateInfo {
    pub state: ConnectorState,
    pub worker_id: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TaskState {
    pub id: u32,
    pub state: ConnectorState,
    pub worker_id: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConnectorStatus {
    pub name: String,
    pub connector: StateInfo,
    pub tasks: Vec<TaskState>,
}

/// Result of [`Herder::put_connector_config`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Created<T> {
    pub created: bool,
    pub result: T,
}

/// Operations test code performs against a worker's control plane.
#[async_trait]
pub trait Herder: Send + Sync {
    fn worker_id(&self) -> &str;

    /// Create a connector, or replace its config when `allow_replace` is set.
    async fn put_connector_config(
        &self,
        name: &str,
        config: ConnectorConfig,
        allow_replace: bool,
    ) -> Result<Created<ConnectorInfo>>;

    async fn delete_connector(&self, name: &str) -> Result<ConnectorInfo>;

    /// Connector names, sorted.
    async fn connectors(&self) -> Result<Vec<String>>;

    async fn connector_info(&self, name: &str) -> Result<ConnectorInfo>;

    async fn connector_status(&self, name: &str) -> Result<ConnectorStatus>;

    async fn pause_connector(&self, name: &str) -> Result<()>;

    async fn resume_connector(&self, name: &str) -> Result<()>;
}

#[derive(Debug, Clone)]
struct ConnectorEntry {
    config: ConnectorConfig,
    tasks_max: u32,
    state: ConnectorState,
}

impl ConnectorEntry {
    fn info(&self, name: &str) -> ConnectorInfo {
        ConnectorInfo {
            name: name.to_string(),
            config: self.config.clone(),
            tasks: (0..self.tasks_max)
                .map(|task| TaskId {
                    connector: name.to_string(),
                    task,
                })
                .collect(),
        }
    }
}

/// Herder of a single standalone worker.
pub struct StandaloneHerder {
    worker_id: String,
    connectors: RwLock<BTreeMap<String, ConnectorEntry>>,
    offsets: Arc<FileOffsetStore>,
    running: AtomicBool,
}

impl StandaloneHerder {
    pub fn new(worker_id: impl Into<String>, offsets: Arc<FileOffsetStore>) -> Self {
        Self {
            worker_id: worker_id.into(),
            connectors: RwLock::new(BTreeMap::new()),
            offsets,
            running: AtomicBool::new(false),
        }
    }

    pub fn start(&self) {
        self.running.store(true, Ordering::SeqCst);
        info!(worker_id = %self.worker_id, "Herder started");
    }

    pub fn stop(&self) {
        if self.running.swap(false, Ordering::SeqCst) {
            info!(worker_id = %self.worker_id, "Herder stopped");
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Source offsets committed by this worker's connectors.
    pub fn offset_store(&self) -> &Arc<FileOffsetStore> {
        &self.offsets
    }

    fn ensure_running(&self) -> Result<()> {
        if self.is_running() {
            Ok(())
        } else {
            Err(Error::ServiceStopped { service: SERVICE })
        }
    }

    async fn set_state(&self, name: &str, state: ConnectorState) -> Result<()> {
        self.ensure_running()?;
        let mut connectors = self.connectors.write().await;
        let entry = connectors
            .get_mut(name)
            .ok_or_else(|| Error::UnknownConnector(name.to_string()))?;
        if entry.state != state {
            entry.state = state;
            info!(connector = name, state = ?state, "Connector state changed");
        }
        Ok(())
    }
}

fn validate_connector_config(name: &str, config: &ConnectorConfig) -> Result<u32> {
    if name.trim().is_empty() {
        return Err(Error::InvalidConnectorConfig(
            "connector name cannot be empty".to_string(),
        ));
    }
    if name.contains('/') {
        return Err(Error::InvalidConnectorConfig(format!(
            "connector name '{}' cannot contain '/'",
            name
        )));
    }
    if config
        .get(CONNECTOR_CLASS)
        .is_none_or(|class| class.trim().is_empty())
    {
        return Err(Error::InvalidConnectorConfig(format!(
            "connector '{}' is missing {}",
            name, CONNECTOR_CLASS
        )));
    }

    match config.get(TASKS_MAX) {
        None => Ok(1),
        Some(raw) => match raw.trim().parse::<u32>() {
            Ok(tasks) if tasks > 0 => Ok(tasks),
            _ => Err(Error::InvalidConnectorConfig(format!(
                "connector '{}' has invalid {} '{}'",
                name, TASKS_MAX, raw
            ))),
        },
    }
}

#[async_trait]
impl Herder for StandaloneHerder {
    fn worker_id(&self) -> &str {
        &self.worker_id
    }

    async fn put_connector_config(
        &self,
        name: &str,
        config: ConnectorConfig,
        allow_replace: bool,
    ) -> Result<Created<ConnectorInfo>> {
        self.ensure_running()?;
        let tasks_max = validate_connector_config(name, &config)?;

        let mut connectors = self.connectors.write().await;
        let created = !connectors.contains_key(name);
        if !created && !allow_replace {
            return Err(Error::ConnectorExists(name.to_string()));
        }

        let state = connectors
            .get(name)
            .map(|existing| existing.state)
            .unwrap_or(ConnectorState::Running);
        let entry = ConnectorEntry {
            config,
            tasks_max,
            state,
        };
        let info = entry.info(name);
        connectors.insert(name.to_string(), entry);

        info!(connector = name, created, tasks_max, "Connector config stored");
        Ok(Created {
            created,
            result: info,
        })
    }

    async fn delete_connector(&self, name: &str) -> Result<ConnectorInfo> {
        self.ensure_running()?;
        let entry = self
            .connectors
            .write()
            .await
            .remove(name)
            .ok_or_else(|| Error::UnknownConnector(name.to_string()))?;
        info!(connector = name, "Connector deleted");
        Ok(entry.info(name))
    }

    async fn connectors(&self) -> Result<Vec<String>> {
        self.ensure_running()?;
        Ok(self.connectors.read().await.keys().cloned().collect())
    }

    async fn connector_info(&self, name: &str) -> Result<ConnectorInfo> {
        self.ensure_running()?;
        self.connectors
            .read()
            .await
            .get(name)
            .map(|entry| entry.info(name))
            .ok_or_else(|| Error::UnknownConnector(name.to_string()))
    }

    async fn connector_status(&self, name: &str) -> Result<ConnectorStatus> {
        self.ensure_running()?;
        let connectors = self.connectors.read().await;
        let entry = connectors
            .get(name)
            .ok_or_else(|| Error::UnknownConnector(name.to_string()))?;

        Ok(ConnectorStatus {
            name: name.to_string(),
            connector: StateInfo {
                state: entry.state,
                worker_id: self.worker_id.clone(),
            },
            tasks: (0..entry.tasks_max)
                .map(|id| TaskState {
                    id,
                    state: entry.state,
                    worker_id: self.worker_id.clone(),
                })
                .collect(),
        })
    }

    async fn pause_connector(&self, name: &str) -> Result<()> {
        self.set_state(name, ConnectorState::Paused).await
    }

    async fn resume_connector(&self, name: &str) -> Result<()> {
        self.set_state(name, ConnectorState::Running).await
    }
}
