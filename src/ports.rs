//! Ephemeral port allocation.
//!
//! Services that must advertise their listening address up front (the REST
//! listener of a worker, a broker's requested port) get one from
//! [`allocate`]. The port is free at the moment it is returned; nothing stops
//! another process from taking it before the service binds, so services that
//! bind it fall back to an OS-chosen port on conflict where they can.

use crate::error::{Error, Result};

/// Return a port that is currently unbound on this host.
pub fn allocate() -> Result<u16> {
    match portpicker::pick_unused_port() {
        Some(port) => {
            tracing::trace!(port, "Allocated ephemeral port");
            Ok(port)
        }
        None => Err(Error::setup("port allocator", "no unused port available")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_allocate_returns_bindable_port() {
        let port = allocate().unwrap();
        assert!(port > 0);

        let listener = std::net::TcpListener::bind(("127.0.0.1", port));
        assert!(listener.is_ok(), "allocated port {} should be bindable", port);
    }

    #[test]
    fn test_allocate_many() {
        for _ in 0..10 {
            assert!(allocate().unwrap() > 0);
        }
    }
}
