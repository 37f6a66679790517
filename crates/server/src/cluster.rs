//! Static cluster membership.
//!
//! Peers are a fixed list of `host:port` specs supplied at startup, resolved
//! to socket addresses exactly once. Dynamic membership protocols are out of
//! scope; redeploy to change the peer set.

use std::io;
use std::net::{SocketAddr, ToSocketAddrs};

/// Resolves peer specs to UDP addresses, dropping duplicates and any address
/// that would make this node replicate to itself.
pub fn resolve_peers(specs: &[String], local: SocketAddr) -> io::Result<Vec<SocketAddr>> {
    let mut peers = Vec::with_capacity(specs.len());
    for spec in specs {
        let addr = spec.to_socket_addrs()?.next().ok_or_else(|| {
            io::Error::new(
                io::ErrorKind::AddrNotAvailable,
                format!("peer {spec:?} resolved to no addresses"),
            )
        })?;
        if is_self(addr, local) || peers.contains(&addr) {
            tracing::debug!(peer = %addr, "skipping peer");
            continue;
        }
        peers.push(addr);
    }
    Ok(peers)
}

fn is_self(addr: SocketAddr, local: SocketAddr) -> bool {
    if addr == local {
        return true;
    }
    // Bound to the wildcard address: loopback on our own port is still us.
    addr.port() == local.port() && local.ip().is_unspecified() && addr.ip().is_loopback()
}
