//! The active hop chain and the establishment-time release guard

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{debug, warn};

use super::status::{ActivePort, ConnectionStatus, TunnelState};
use crate::config::ForwardTarget;
use crate::forwarding::LocalForwardHandle;
use crate::ssh::{HopSummary, HopTransport};

/// Transports opened so far during establishment, in hop order.
///
/// Released innermost-first. If dropped without `release`/`into_transports`
/// (an establish future cancelled mid-flight) the closes are spawned.
pub(crate) struct OpenedHops {
    transports: Vec<Arc<dyn HopTransport>>,
}

impl OpenedHops {
    pub fn new() -> Self {
        Self {
            transports: Vec::new(),
        }
    }

    pub fn push(&mut self, transport: Arc<dyn HopTransport>) {
        self.transports.push(transport);
    }

    pub fn last(&self) -> Option<&Arc<dyn HopTransport>> {
        self.transports.last()
    }

    /// Close everything opened so far, last hop first
    pub async fn release(mut self) {
        let transports = std::mem::take(&mut self.transports);
        close_reverse(transports).await;
    }

    /// Hand the transports over to a committed chain
    pub fn into_transports(mut self) -> Vec<Arc<dyn HopTransport>> {
        std::mem::take(&mut self.transports)
    }
}

impl Drop for OpenedHops {
    fn drop(&mut self) {
        if self.transports.is_empty() {
            return;
        }
        let transports = std::mem::take(&mut self.transports);
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(close_reverse(transports));
            }
            Err(_) => warn!(
                "Dropping {} hop transport(s) outside a runtime without closing them",
                transports.len()
            ),
        }
    }
}

async fn close_reverse(transports: Vec<Arc<dyn HopTransport>>) {
    for transport in transports.into_iter().rev() {
        debug!("Closing hop transport to {}", transport.hostname());
        transport.close().await;
    }
}

/// The single active tunnel: hop transports plus the forwarding listener
pub(crate) struct TunnelChain {
    hops: Vec<HopSummary>,
    transports: Vec<Arc<dyn HopTransport>>,
    target: ForwardTarget,
    started_at: DateTime<Utc>,
    forward: LocalForwardHandle,
}

impl TunnelChain {
    pub fn new(
        hops: Vec<HopSummary>,
        transports: Vec<Arc<dyn HopTransport>>,
        target: ForwardTarget,
        forward: LocalForwardHandle,
    ) -> Self {
        Self {
            hops,
            transports,
            target,
            started_at: Utc::now(),
            forward,
        }
    }

    /// Port the listener actually bound
    pub fn local_port(&self) -> u16 {
        self.forward.bound_addr().port()
    }

    pub fn status(&self) -> ConnectionStatus {
        ConnectionStatus {
            state: TunnelState::Connected,
            is_connected: true,
            active_connections: self.transports.iter().filter(|t| !t.is_closed()).count(),
            local_port: Some(self.local_port()),
            target: Some(self.target.remote_address()),
            connection_time: Some(self.started_at.to_rfc3339()),
            jump_hosts: Some(self.hops.clone()),
            forward_stats: Some(self.forward.stats()),
        }
    }

    pub fn active_port(&self) -> ActivePort {
        ActivePort {
            port: self.local_port(),
            target: self.forward.target().to_string(),
        }
    }

    /// Stop the listener first, then close the hops
    pub async fn shutdown(self) {
        self.forward.stop().await;
        close_reverse(self.transports).await;
    }
}
