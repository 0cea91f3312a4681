//! Read-only REST listener over the herder.
//!
//! # Endpoints
//!
//! - `GET /` - worker version and id
//! - `GET /connectors` - connector names
//! - `GET /connectors/{name}` - connector config and tasks
//! - `GET /connectors/{name}/status` - connector and task states
//!
//! Unknown paths answer 404, other methods 405. Bodies are JSON and every
//! connection is closed after one response.

use std::net::SocketAddr;
use std::sync::Arc;

use serde::Serialize;
use serde_json::json;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::broadcast;
use tracing::{debug, info};

use super::herder::Herder;
use crate::constants::CONNECTION_READ_TIMEOUT;
use crate::error::{Error, Result};
use crate::net;

const SERVICE: &str = "rest server";

pub struct RestServer {
    listener: TcpListener,
    herder: Arc<dyn Herder>,
}

impl RestServer {
    pub async fn bind(host: &str, port: u16, herder: Arc<dyn Herder>) -> Result<Self> {
        let listener = TcpListener::bind((host, port))
            .await
            .map_err(|e| Error::setup(SERVICE, format!("cannot bind {}:{}: {}", host, port, e)))?;

        info!(addr = %listener.local_addr()?, "REST server listening");
        Ok(Self { listener, herder })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// Serve until the future is dropped. Open connections are closed when
    /// `shutdown` fires.
    pub async fn run(self, shutdown: broadcast::Receiver<()>) {
        loop {
            let (stream, addr) = net::accept(&self.listener, SERVICE).await;
            debug!(client_addr = %addr, "REST connection");
            net::spawn_connection(
                SERVICE,
                addr,
                shutdown.resubscribe(),
                serve(stream, self.herder.clone()),
            );
        }
    }
}

async fn serve(mut stream: TcpStream, herder: Arc<dyn Herder>) {
    let mut buf = [0u8; 4096];
    let n = match tokio::time::timeout(CONNECTION_READ_TIMEOUT, stream.read(&mut buf)).await {
        Ok(Ok(0)) => {
            debug!("Empty request received");
            return;
        }
        Ok(Ok(n)) => n,
        Ok(Err(e)) => {
            debug!(error = ?e, "Failed to read REST request");
            return;
        }
        Err(_) => {
            debug!("REST connection idle, closing");
            return;
        }
    };

    let request = String::from_utf8_lossy(&buf[..n]);
    let response = handle_request(&request, herder.as_ref()).await;
    if let Err(e) = stream.write_all(response.as_bytes()).await {
        debug!(error = ?e, "Failed to write REST response");
    }
}

/// Route one HTTP request and render the full response.
pub(crate) async fn handle_request(request: &str, herder: &dyn Herder) -> String {
    let first_line = request.lines().next().unwrap_or("");
    let mut parts = first_line.split_whitespace();
    let method = parts.next().unwrap_or("");
    let path = parts.next().unwrap_or("/");
    let path = path.split('?').next().unwrap_or(path).trim_end_matches('/');

    if method != "GET" {
        return error_response(405, &format!("method {} not allowed", method));
    }

    let segments: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();
    match segments.as_slice() {
        [] => ok(&json!({
            "version": env!("CARGO_PKG_VERSION"),
            "worker_id": herder.worker_id(),
        })),
        ["connectors"] => respond(herder.connectors().await),
        ["connectors", name] => respond(herder.connector_info(name).await),
        ["connectors", name, "status"] => respond(herder.connector_status(name).await),
        _ => error_response(404, &format!("no resource at {}", path)),
    }
}

fn respond<T: Serialize>(result: Result<T>) -> String {
    match result {
        Ok(body) => ok(&body),
        Err(e @ Error::UnknownConnector(_)) => error_response(404, &e.to_string()),
        Err(e @ Error::ServiceStopped { .. }) => error_response(503, &e.to_string()),
        Err(e) => error_response(500, &e.to_string()),
    }
}

fn ok<T: Serialize>(body: &T) -> String {
    match serde_json::to_string(body) {
        Ok(body) => json_response(200, &body),
        Err(e) => error_response(500, &e.to_string()),
    }
}

fn error_response(status: u16, message: &str) -> String {
    let body = json!({ "error_code": status, "message": message }).to_string();
    json_response(status, &body)
}

fn json_response(status: u16, body: &str) -> String {
    format!(
        "HTTP/1.1 {} {}\r\n\
         Content-Type: application/json\r\n\
         Content-Length: {}\r\n\
         Connection: close\r\n\
         \r\n\
         {}",
        status,
        status_text(status),
        body.len(),
        body
    )
}

fn status_text(status: u16) -> &'static str {
    match status {
        200 => "OK",
        404 => "Not Found",
        405 => "Method Not Allowed",
        503 => "Service Unavailable",
        _ => "Internal Server Error",
    }
}
