//! Scoped ownership of one standalone worker.

use std::path::Path;
use std::sync::Arc;

use tempfile::NamedTempFile;
use tracing::{info, warn};

use super::config::WorkerConfig;
use super::herder::StandaloneHerder;
use super::worker::Connect;
use crate::config::HarnessConfig;
use crate::error::{Error, Result};
use crate::ports;
use crate::types::{Lifecycle, ServiceEndpoint};

const HANDLE: &str = "worker";

/// Owns a worker and its temporary offset file.
///
/// The broker it points at is only referenced through its endpoint and is
/// never stopped by this handle.
pub struct WorkerHandle {
    connect: Connect,
    offset_file: Option<NamedTempFile>,
    lifecycle: Lifecycle,
}

impl WorkerHandle {
    /// Start a worker against `broker` and return once it is fully started.
    ///
    /// An unreachable broker fails here with a setup error.
    pub async fn start(config: &HarnessConfig, broker: &ServiceEndpoint) -> Result<Self> {
        let offset_file = tempfile::Builder::new()
            .prefix("connect")
            .suffix("offsets")
            .tempfile()
            .map_err(|e| Error::setup(HANDLE, format!("cannot create offset file: {}", e)))?;
        let rest_port = ports::allocate()?;

        let worker_config = WorkerConfig {
            rest_host: config.host.clone(),
            ..WorkerConfig::standalone(broker, offset_file.path(), rest_port)
        };
        let connect = Connect::start_with_timeout(worker_config, config.shutdown_timeout).await?;

        Ok(Self {
            connect,
            offset_file: Some(offset_file),
            lifecycle: Lifecycle::Ready,
        })
    }

    pub fn lifecycle(&self) -> Lifecycle {
        self.lifecycle
    }

    /// Control plane for registering and inspecting connectors.
    pub fn herder(&self) -> Result<Arc<StandaloneHerder>> {
        self.lifecycle.ensure_live(HANDLE)?;
        Ok(self.connect.herder())
    }

    pub fn connect(&self) -> Result<&Connect> {
        self.lifecycle.ensure_live(HANDLE)?;
        Ok(&self.connect)
    }

    pub fn rest_endpoint(&self) -> Result<ServiceEndpoint> {
        self.lifecycle.ensure_live(HANDLE)?;
        ServiceEndpoint::from_socket_addr(self.connect.rest_addr())
    }

    pub fn config(&self) -> Result<&WorkerConfig> {
        self.lifecycle.ensure_live(HANDLE)?;
        Ok(self.connect.config())
    }

    /// Offset file, `None` once released.
    pub fn offset_file(&self) -> Option<&Path> {
        self.offset_file.as_ref().map(NamedTempFile::path)
    }

    /// Stop the worker, wait for it and delete the offset file.
    pub async fn release(&mut self) -> Result<()> {
        self.lifecycle.ensure_live(HANDLE)?;
        self.lifecycle = Lifecycle::Released;

        if let Err(e) = self.connect.stop().await {
            warn!(error = %e, "Worker stop failed, continuing release");
        }
        if let Err(e) = self.connect.await_stop().await {
            warn!(error = %e, "Worker did not stop cleanly");
        }

        if let Some(file) = self.offset_file.take() {
            let path = file.path().to_path_buf();
            if let Err(e) = file.close() {
                warn!(path = %path.display(), error = %e, "Failed to remove offset file");
            }
        }

        info!("Worker released");
        Ok(())
    }
}

impl Drop for WorkerHandle {
    fn drop(&mut self) {
        if !self.lifecycle.is_released() {
            self.connect.signal_stop();
        }
    }
}
