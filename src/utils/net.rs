//! Utility functions related to networking.

use std::net::{SocketAddr, TcpListener as StdListener};
use log::error;
use tokio::net::lookup_host;
use crate::error::Failed;


/// Binds a listening socket to the given address.
///
/// The returned listener is in non-blocking mode and ready to be handed to
/// Tokio.
pub fn bind(addr: &SocketAddr) -> Result<StdListener, Failed> {
    let listener = match StdListener::bind(addr) {
        Ok(listener) => listener,
        Err(err) => {
            error!("Fatal error listening on {}: {}", addr, err);
            return Err(Failed);
        }
    };
    if let Err(err) = listener.set_nonblocking(true) {
        error!("Fatal: error switching {} to nonblocking: {}", addr, err);
        return Err(Failed);
    }
    Ok(listener)
}

/// Resolves a host name and port into the first socket address.
pub async fn resolve_addr(host: &str, port: u16) -> Result<SocketAddr, Failed> {
    let mut addrs = match lookup_host((host, port)).await {
        Ok(addrs) => addrs,
        Err(err) => {
            error!("Failed to resolve host '{}': {}", host, err);
            return Err(Failed)
        }
    };
    match addrs.next() {
        Some(addr) => Ok(addr),
        None => {
            error!("Host '{}' does not resolve to any address.", host);
            Err(Failed)
        }
    }
}
