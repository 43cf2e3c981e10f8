//! SSH module - hop transports for the tunnel chain
//!
//! # Features
//! - Direct SSH connection to the first hop
//! - SSH-over-SSH to every further hop through `direct-tcpip` channels
//! - Password and private key authentication
//! - Trust-on-first-use host key verification
//! - Keepalive on every hop

mod client;
mod config;
mod error;
pub mod known_hosts;
mod transport;

pub use client::{ClientHandler, SshConnector, SshTransport};
pub use config::{AuthMethod, HopSummary, HostCredential};
pub use error::SshError;
pub use known_hosts::{HostKeyVerification, KnownHostsStore};
pub use transport::{BoxedStream, HopConnector, HopTransport, TunnelStream};
