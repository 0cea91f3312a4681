//! Listener plumbing shared by the embedded services.
//!
//! Every service accepts with [`accept`], which backs off after a failed
//! `accept` instead of spinning, and hands each connection to
//! [`spawn_connection`], which drops the connection as soon as the owning
//! service signals shutdown.

use std::future::Future;
use std::net::SocketAddr;

use tokio::net::{TcpListener, TcpStream};
use tokio::sync::broadcast;
use tracing::{debug, warn};

use crate::constants::ACCEPT_ERROR_BACKOFF;

/// Accept the next connection, retrying failed accepts after a short pause.
pub(crate) async fn accept(
    listener: &TcpListener,
    service: &'static str,
) -> (TcpStream, SocketAddr) {
    loop {
        match listener.accept().await {
            Ok(conn) => return conn,
            Err(e) => {
                warn!(
                    service,
                    error = ?e,
                    retry_in = ?ACCEPT_ERROR_BACKOFF,
                    "Failed to accept connection"
                );
                tokio::time::sleep(ACCEPT_ERROR_BACKOFF).await;
            }
        }
    }
}

/// Run `handler` for one connection until it returns or shutdown is signalled.
///
/// `shutdown` must be subscribed before the connection was accepted so a
/// signal sent in between is not missed.
pub(crate) fn spawn_connection<F>(
    service: &'static str,
    addr: SocketAddr,
    mut shutdown: broadcast::Receiver<()>,
    handler: F,
) where
    F: Future<Output = ()> + Send + 'static,
{
    tokio::spawn(async move {
        tokio::select! {
            _ = handler => {}
            _ = shutdown.recv() => {
                debug!(service, client_addr = %addr, "Closing connection on shutdown");
            }
        }
    });
}
