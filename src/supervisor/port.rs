//! Free port lookup for the daemon's RPC listener.

use std::io;
use std::net::{Ipv4Addr, TcpListener};

/// Picks the port the daemon is told to listen on.
pub type PortAllocator = fn() -> io::Result<u16>;

/// Find an available loopback TCP port.
///
/// The bound listener is dropped before returning, so another process may
/// grab the port before the daemon binds it. Callers treat a bind failure in
/// the daemon like any other startup failure.
pub fn allocate_port() -> io::Result<u16> {
    let listener = TcpListener::bind((Ipv4Addr::LOCALHOST, 0))?;
    Ok(listener.local_addr()?.port())
}
