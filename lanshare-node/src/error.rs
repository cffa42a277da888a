//! Errors returned directly by node operations. Everything that happens after a
//! transfer starts is reported through events instead.

use std::net::SocketAddr;

#[derive(Debug, thiserror::Error)]
pub enum NodeError {
    #[error("cannot bind {what} socket on {addr}: {source}")]
    Bind {
        what: &'static str,
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },
    #[error("an outbound transfer is already running")]
    Busy,
}
