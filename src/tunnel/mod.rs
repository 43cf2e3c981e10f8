//! Tunnel Module
//!
//! Multi-hop chain lifecycle: establish, status, events and teardown.

mod chain;
mod error;
mod manager;
mod status;

#[cfg(test)]
pub(crate) mod testing;

pub use error::TunnelError;
pub use manager::TunnelManager;
pub use status::{ActivePort, ConnectionStatus, EstablishedTunnel, TunnelEvent, TunnelState};
