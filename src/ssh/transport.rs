//! Hop transport abstraction
//!
//! The tunnel manager only needs three things from a hop: connect to it
//! (directly or over a stream), open a `direct-tcpip` channel through it, and
//! close it. Keeping that behind traits lets the chain logic run against the
//! russh implementation in production and a scripted connector in tests.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncWrite};

use super::config::HostCredential;
use super::error::SshError;

/// Byte stream carried by a hop (a TCP socket or an SSH channel)
pub trait TunnelStream: AsyncRead + AsyncWrite + Unpin + Send {}

impl<T> TunnelStream for T where T: AsyncRead + AsyncWrite + Unpin + Send {}

pub type BoxedStream = Box<dyn TunnelStream>;

/// An authenticated SSH transport to one hop
#[async_trait]
pub trait HopTransport: Send + Sync {
    /// Hostname this transport is connected to
    fn hostname(&self) -> &str;

    /// Open a direct channel through this hop to `host:port`
    async fn open_direct(&self, host: &str, port: u16) -> Result<BoxedStream, SshError>;

    /// Disconnect. Must be safe to call more than once.
    async fn close(&self);

    fn is_closed(&self) -> bool;
}

/// Opens authenticated hop transports
#[async_trait]
pub trait HopConnector: Send + Sync {
    /// Dial the hop over TCP from the local machine and authenticate
    async fn connect(&self, hop: &HostCredential) -> Result<Arc<dyn HopTransport>, SshError>;

    /// Run the SSH handshake and authentication over an existing stream
    /// (a channel opened through the previous hop)
    async fn connect_over(
        &self,
        hop: &HostCredential,
        stream: BoxedStream,
    ) -> Result<Arc<dyn HopTransport>, SshError>;
}
