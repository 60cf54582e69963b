//! Error types for the proxy.

use std::io;
use std::net::SocketAddr;

use thiserror::Error;

/// Proxy errors, split by blast radius: `Bind` and `Accept` take the whole
/// proxy down, the rest abort a single connection.
#[derive(Debug, Error)]
pub enum ProxyError {
    /// Could not bind the listening socket.
    #[error("failed to bind listener: {0}")]
    Bind(#[source] io::Error),

    /// accept() failed with an errno that indicates a broken listener
    /// socket rather than a transient condition.
    #[error("accept failed: {0}")]
    Accept(#[source] io::Error),

    /// Could not open the outbound connection for one client.
    #[error("failed to connect to remote {addr}: {source}")]
    Connect {
        addr: SocketAddr,
        #[source]
        source: io::Error,
    },

    /// Could not start a filter subprocess.
    #[error("failed to spawn filter `{cmd}`: {source}")]
    FilterSpawn {
        cmd: String,
        #[source]
        source: io::Error,
    },
}
