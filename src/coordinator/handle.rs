//! Scoped ownership of one coordination service.

use std::path::Path;
use std::sync::Arc;

use tempfile::TempDir;
use tracing::{info, warn};

use super::{Coordinator, EmbeddedCoordinator, EmbeddedCoordinatorConfig};
use crate::config::HarnessConfig;
use crate::error::{Error, Result};
use crate::ports;
use crate::types::Lifecycle;

const HANDLE: &str = "coordinator";

/// Owns a coordination service and its temporary data directory.
///
/// Construction starts the service and returns once it is bound, so the
/// handle is `Ready` right away. [`release`](Self::release) stops the service
/// and deletes the directory; both steps are best-effort.
pub struct CoordinatorHandle {
    service: Arc<dyn Coordinator>,
    data_dir: Option<TempDir>,
    lifecycle: Lifecycle,
}

impl CoordinatorHandle {
    /// Start an [`EmbeddedCoordinator`] on a freshly allocated port.
    pub async fn start(config: &HarnessConfig) -> Result<Self> {
        let data_dir = tempfile::Builder::new()
            .prefix("coordinator")
            .tempdir()
            .map_err(|e| Error::setup(HANDLE, format!("cannot create data dir: {}", e)))?;
        let port = ports::allocate()?;

        let service = EmbeddedCoordinator::start(EmbeddedCoordinatorConfig {
            host: config.host.clone(),
            port,
            data_dir: data_dir.path().to_path_buf(),
            shutdown_timeout: config.shutdown_timeout,
        })
        .await?;

        Ok(Self::wrap(Arc::new(service), data_dir))
    }

    /// Take ownership of an already started service and its directory.
    pub fn wrap(service: Arc<dyn Coordinator>, data_dir: TempDir) -> Self {
        info!(
            connect_string = %service.connect_string(),
            data_dir = %data_dir.path().display(),
            "Coordinator handle ready"
        );
        Self {
            service,
            data_dir: Some(data_dir),
            lifecycle: Lifecycle::Ready,
        }
    }

    pub fn lifecycle(&self) -> Lifecycle {
        self.lifecycle
    }

    pub fn connect_string(&self) -> Result<String> {
        self.lifecycle.ensure_live(HANDLE)?;
        Ok(self.service.connect_string())
    }

    /// The service, for dependents that talk to it directly.
    pub fn coordinator(&self) -> Result<Arc<dyn Coordinator>> {
        self.lifecycle.ensure_live(HANDLE)?;
        Ok(self.service.clone())
    }

    /// Data directory, `None` once released.
    pub fn data_dir(&self) -> Option<&Path> {
        self.data_dir.as_ref().map(TempDir::path)
    }

    /// Stop the service and delete the data directory.
    ///
    /// A failing stop does not prevent the directory from being removed.
    pub async fn release(&mut self) -> Result<()> {
        self.lifecycle.ensure_live(HANDLE)?;
        self.lifecycle = Lifecycle::Released;

        if let Err(e) = self.service.shutdown().await {
            warn!(error = %e, "Coordinator shutdown failed, continuing release");
        }

        if let Some(dir) = self.data_dir.take() {
            let path = dir.path().to_path_buf();
            if let Err(e) = dir.close() {
                warn!(path = %path.display(), error = %e, "Failed to remove coordinator data dir");
                if let Err(e) = std::fs::remove_dir_all(&path) {
                    if e.kind() != std::io::ErrorKind::NotFound {
                        warn!(path = %path.display(), error = %e, "Retry of data dir removal failed");
                    }
                }
            }
        }

        info!("Coordinator released");
        Ok(())
    }
}

impl Drop for CoordinatorHandle {
    fn drop(&mut self) {
        if !self.lifecycle.is_released() {
            self.service.signal_shutdown();
        }
    }
}
