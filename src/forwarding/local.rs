//! Local Port Forwarding
//!
//! Forwards connections from a loopback port to the tunnel target through the
//! last hop of the chain.
//! Example: 127.0.0.1:15432 -> (jump1 -> jump2) -> db.internal:5432

use std::net::SocketAddr;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::ForwardTarget;
use crate::ssh::HopTransport;
use crate::tunnel::TunnelError;

const LOOPBACK: &str = "127.0.0.1";
const COPY_BUFFER_SIZE: usize = 32 * 1024;

type SharedStats = Arc<parking_lot::RwLock<ForwardStats>>;

#[derive(Clone, Copy)]
enum Direction {
    Sent,
    Received,
}

/// Statistics for the forwarding listener
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ForwardStats {
    /// Total connections accepted
    pub connection_count: u64,
    /// Connections being spliced right now
    pub active_connections: u64,
    /// Connections dropped because the target channel could not be opened
    pub failed_connections: u64,
    /// Bytes sent (local -> target)
    pub bytes_sent: u64,
    /// Bytes received (target -> local)
    pub bytes_received: u64,
}

/// Handle to the running forwarding listener
pub struct LocalForwardHandle {
    bound_addr: SocketAddr,
    target: String,
    cancel: CancellationToken,
    task: Option<JoinHandle<()>>,
    stats: SharedStats,
}

impl LocalForwardHandle {
    pub fn bound_addr(&self) -> SocketAddr {
        self.bound_addr
    }

    /// `targetHost:targetPort`
    pub fn target(&self) -> &str {
        &self.target
    }

    pub fn stats(&self) -> ForwardStats {
        self.stats.read().clone()
    }

    /// Stop accepting, close the listener and every spliced connection.
    /// The listener socket is released when this returns.
    pub async fn stop(mut self) {
        info!("Stopping local port forward on {}", self.bound_addr);
        self.cancel.cancel();
        if let Some(task) = self.task.take() {
            if let Err(e) = task.await {
                warn!("Forward task for {} ended abnormally: {}", self.bound_addr, e);
            }
        }
    }
}

impl Drop for LocalForwardHandle {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

/// Check that `port` can be bound on loopback (bind, then release).
/// Port 0 always passes.
pub async fn probe_local_port(port: u16) -> Result<(), TunnelError> {
    if port == 0 {
        return Ok(());
    }
    let probe = TcpListener::bind((LOOPBACK, port))
        .await
        .map_err(|e| bind_error(port, e))?;
    drop(probe);
    debug!("Local port {} is free", port);
    Ok(())
}

fn bind_error(port: u16, e: std::io::Error) -> TunnelError {
    match e.kind() {
        std::io::ErrorKind::AddrInUse => TunnelError::PortInUse { port },
        std::io::ErrorKind::PermissionDenied => TunnelError::Listener {
            port,
            reason: "permission denied (ports below 1024 require elevated privileges)".into(),
        },
        _ => TunnelError::Listener {
            port,
            reason: e.to_string(),
        },
    }
}

/// Start local port forwarding
///
/// Spawns a task that:
/// 1. Listens on `127.0.0.1:localPort`
/// 2. For each incoming connection, opens a direct-tcpip channel through `transport`
/// 3. Splices the socket and the channel until either side closes
pub async fn start_local_forward(
    transport: Arc<dyn HopTransport>,
    target: &ForwardTarget,
) -> Result<LocalForwardHandle, TunnelError> {
    let listener = TcpListener::bind((LOOPBACK, target.local_port))
        .await
        .map_err(|e| bind_error(target.local_port, e))?;

    let bound_addr = listener.local_addr().map_err(|e| TunnelError::Listener {
        port: target.local_port,
        reason: format!("failed to read bound address: {}", e),
    })?;

    info!(
        "Started local port forward: {} -> {} via {}",
        bound_addr,
        target.remote_address(),
        transport.hostname()
    );

    let cancel = CancellationToken::new();
    let stats = Arc::new(parking_lot::RwLock::new(ForwardStats::default()));

    let task = tokio::spawn(accept_loop(
        listener,
        transport,
        target.target_host.clone(),
        target.target_port,
        cancel.clone(),
        stats.clone(),
    ));

    Ok(LocalForwardHandle {
        bound_addr,
        target: target.remote_address(),
        cancel,
        task: Some(task),
        stats,
    })
}

async fn accept_loop(
    listener: TcpListener,
    transport: Arc<dyn HopTransport>,
    target_host: String,
    target_port: u16,
    cancel: CancellationToken,
    stats: SharedStats,
) {
    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                debug!("Local port forward stopped by request");
                break;
            }

            accept_result = listener.accept() => {
                match accept_result {
                    Ok((stream, peer_addr)) => {
                        if let Err(e) = stream.set_nodelay(true) {
                            warn!("Failed to set TCP_NODELAY: {}", e);
                        }

                        debug!("Accepted connection from {} for forward", peer_addr);
                        stats.write().connection_count += 1;

                        tokio::spawn(handle_forward_connection(
                            transport.clone(),
                            stream,
                            target_host.clone(),
                            target_port,
                            stats.clone(),
                            cancel.child_token(),
                        ));
                    }
                    Err(e) => {
                        error!("Accept error: {}", e);
                        tokio::time::sleep(std::time::Duration::from_millis(100)).await;
                    }
                }
            }
        }
    }
    // listener dropped here: the port is released
}

/// Splice one accepted socket with a fresh channel to the target
async fn handle_forward_connection(
    transport: Arc<dyn HopTransport>,
    mut local_stream: TcpStream,
    target_host: String,
    target_port: u16,
    stats: SharedStats,
    cancel: CancellationToken,
) {
    let mut remote_stream = match transport.open_direct(&target_host, target_port).await {
        Ok(stream) => stream,
        Err(e) => {
            // Contained to this connection; the chain keeps serving
            warn!(
                "Failed to open channel to {}:{}: {}",
                target_host, target_port, e
            );
            stats.write().failed_connections += 1;
            let _ = local_stream.shutdown().await;
            return;
        }
    };

    stats.write().active_connections += 1;

    {
        let (mut local_read, mut local_write) = local_stream.split();
        let (mut remote_read, mut remote_write) = tokio::io::split(&mut remote_stream);

        let local_to_remote = pump(&mut local_read, &mut remote_write, &stats, Direction::Sent);
        let remote_to_local =
            pump(&mut remote_read, &mut local_write, &stats, Direction::Received);

        tokio::select! {
            _ = cancel.cancelled() => {
                debug!("Forward connection closed by tunnel shutdown");
            }
            result = async { tokio::try_join!(local_to_remote, remote_to_local) } => {
                match result {
                    Ok((sent, received)) => debug!(
                        "Forward connection closed: {} bytes sent, {} bytes received",
                        sent, received
                    ),
                    Err(e) => debug!("Forward connection ended: {}", e),
                }
            }
        }
    }

    let _ = local_stream.shutdown().await;
    let _ = remote_stream.shutdown().await;

    let mut s = stats.write();
    s.active_connections = s.active_connections.saturating_sub(1);
}

/// Copy `reader` into `writer` until EOF, counting each chunk into `stats`
/// as it is written. Half-closes `writer` on EOF.
async fn pump<R, W>(
    reader: &mut R,
    writer: &mut W,
    stats: &SharedStats,
    direction: Direction,
) -> std::io::Result<u64>
where
    R: AsyncRead + Unpin + ?Sized,
    W: AsyncWrite + Unpin + ?Sized,
{
    let mut buf = vec![0u8; COPY_BUFFER_SIZE];
    let mut total = 0u64;
    loop {
        let n = reader.read(&mut buf).await?;
        if n == 0 {
            writer.shutdown().await?;
            return Ok(total);
        }
        writer.write_all(&buf[..n]).await?;
        total += n as u64;

        let mut s = stats.write();
        match direction {
            Direction::Sent => s.bytes_sent += n as u64,
            Direction::Received => s.bytes_received += n as u64,
        }
    }
}
