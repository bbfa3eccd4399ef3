//! Network subsystem for the TCP relay

pub mod client;
pub mod server;
pub mod wire;

pub use client::{ClientStats, ConnectionState, RelayClient, RelayHandler};
pub use server::RelayServer;
pub use wire::{decode_event, FrameCodec};

use socket2::{SockRef, TcpKeepalive};
use std::time::Duration;
use tokio::net::TcpStream;

/// Idle time before the first keepalive probe
const KEEPALIVE_TIME: Duration = Duration::from_secs(10);

/// Disable Nagle and enable TCP keepalive on a relay connection.
///
/// Failures only cost latency or dead-peer detection, so they are logged.
pub fn tune_stream(stream: &TcpStream) {
    if let Err(e) = stream.set_nodelay(true) {
        tracing::warn!(error = %e, "Failed to set TCP_NODELAY");
    }
    let keepalive = TcpKeepalive::new().with_time(KEEPALIVE_TIME);
    if let Err(e) = SockRef::from(stream).set_tcp_keepalive(&keepalive) {
        tracing::warn!(error = %e, "Failed to enable TCP keepalive");
    }
}
