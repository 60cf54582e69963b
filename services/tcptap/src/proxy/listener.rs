//! TCP listener, connection dispatch, and the per-connection handler.
//!
//! The listener accepts connections and spawns one task per connection;
//! each task connects to the fixed remote endpoint, launches the two
//! filter subprocesses, wires the four pipes, and runs the multiplexer to
//! completion. Finished connection tasks are reaped from the same loop so
//! none is left behind; each filter child gets its own detached reaper.

use std::io;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::net::{TcpListener, TcpStream};
use tokio::process::Child;
use tokio::task::JoinSet;
use tracing::{debug, info, info_span, warn, Instrument};

use super::filter;
use super::logger::{Hop, TrafficLog};
use super::pipeline::{splice, Pipe};
use crate::config::Config;
use crate::error::ProxyError;

/// Statistics for the listener.
#[derive(Debug, Default)]
pub struct ListenerStats {
    /// Total connections accepted.
    pub connections_accepted: AtomicU64,
    /// Connections currently being proxied.
    pub connections_active: AtomicU64,
    /// Total connections closed.
    pub connections_closed: AtomicU64,
}

/// The proxy's accepting socket plus shared configuration.
pub struct Listener {
    config: Arc<Config>,
    listener: TcpListener,
    stats: Arc<ListenerStats>,
}

impl Listener {
    /// Bind the configured listen address. Failure here is fatal for the
    /// whole proxy.
    pub async fn bind(config: Config) -> Result<Self, ProxyError> {
        let listener = TcpListener::bind(config.listen_addr())
            .await
            .map_err(ProxyError::Bind)?;
        let local_addr = listener.local_addr().map_err(ProxyError::Bind)?;

        info!(
            bind_addr = %local_addr,
            remote = %config.remote(),
            "listener bound"
        );

        Ok(Self {
            config: Arc::new(config),
            listener,
            stats: Arc::new(ListenerStats::default()),
        })
    }

    /// Get the local address this listener is bound to.
    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    pub fn stats(&self) -> Arc<ListenerStats> {
        Arc::clone(&self.stats)
    }

    /// Accept connections forever, dispatching one task per connection and
    /// reaping finished ones. Returns only on a fatal listener error.
    pub async fn run(self) -> Result<(), ProxyError> {
        let mut connections = JoinSet::new();

        loop {
            tokio::select! {
                accepted = self.listener.accept() => match accepted {
                    Ok((client, peer_addr)) => {
                        self.stats.connections_accepted.fetch_add(1, Ordering::Relaxed);
                        self.stats.connections_active.fetch_add(1, Ordering::Relaxed);

                        let config = Arc::clone(&self.config);
                        let stats = Arc::clone(&self.stats);
                        connections.spawn(
                            async move {
                                if let Err(e) = handle_connection(config, client, peer_addr).await {
                                    warn!(peer_addr = %peer_addr, error = %e, "connection aborted");
                                }
                                stats.connections_active.fetch_sub(1, Ordering::Relaxed);
                                stats.connections_closed.fetch_add(1, Ordering::Relaxed);
                            }
                            .instrument(info_span!("connection", peer = %peer_addr)),
                        );
                    }
                    Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
                    Err(e) if is_fatal_accept(&e) => return Err(ProxyError::Accept(e)),
                    Err(e) => warn!(error = %e, "accept error"),
                },
                // Reap finished connection tasks without blocking the
                // accept loop; disabled while the set is empty.
                Some(finished) = connections.join_next() => {
                    if let Err(e) = finished {
                        debug!(error = %e, "connection task join failed");
                    }
                }
            }
        }
    }
}

/// accept() errnos that mean the listening socket itself is broken.
fn is_fatal_accept(e: &io::Error) -> bool {
    matches!(
        e.raw_os_error(),
        Some(libc::EBADF | libc::EINVAL | libc::ENOTSOCK | libc::EOPNOTSUPP | libc::EFAULT)
    )
}

/// Proxy one accepted connection to completion.
///
/// Wiring, with the two sockets each serving two pipes through their
/// split halves:
///
/// ```text
/// 0: client read half      -> in-filter stdin
/// 1: in-filter stdout      -> server write half
/// 2: server read half      -> out-filter stdin
/// 3: out-filter stdout     -> client write half
/// ```
async fn handle_connection(
    config: Arc<Config>,
    client: TcpStream,
    peer_addr: SocketAddr,
) -> Result<(), ProxyError> {
    let mut transcript = TrafficLog::stdout(peer_addr);
    transcript.connection_start();

    let server = TcpStream::connect(config.remote())
        .await
        .map_err(|e| ProxyError::Connect {
            addr: config.remote(),
            source: e,
        })?;

    let filter_in = filter::spawn(&config.filter_in)?;
    let filter_out = filter::spawn(&config.filter_out)?;

    let (client_rd, client_wr) = client.into_split();
    let (server_rd, server_wr) = server.into_split();

    let mut pipes = [
        Pipe::new(
            Hop::ClientToFilter,
            Box::new(client_rd),
            Box::new(filter_in.stdin),
        ),
        Pipe::new(
            Hop::FilterToServer,
            Box::new(filter_in.stdout),
            Box::new(server_wr),
        ),
        Pipe::new(
            Hop::ServerToFilter,
            Box::new(server_rd),
            Box::new(filter_out.stdin),
        ),
        Pipe::new(
            Hop::FilterToClient,
            Box::new(filter_out.stdout),
            Box::new(client_wr),
        ),
    ];

    // Each filter's exit status is collected by its own reaper so teardown
    // never blocks on a lingering child.
    reap_filter(filter_in.child);
    reap_filter(filter_out.child);

    splice(&mut pipes, &mut transcript).await;

    // Every endpoint still open is closed here, exactly once.
    drop(pipes);
    transcript.connection_end();
    Ok(())
}

fn reap_filter(mut child: Child) {
    tokio::spawn(async move {
        match child.wait().await {
            Ok(status) => debug!(%status, "filter exited"),
            Err(e) => debug!(error = %e, "filter reap failed"),
        }
    });
}
