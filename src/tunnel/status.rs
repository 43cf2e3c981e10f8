//! Tunnel status snapshots and lifecycle events

use serde::{Deserialize, Serialize};

use crate::forwarding::ForwardStats;
use crate::ssh::HopSummary;

/// Chain lifecycle state
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum TunnelState {
    #[default]
    Idle,
    Connecting,
    Connected,
}

/// Read-only view of the tunnel, recomputed from the active chain
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionStatus {
    pub state: TunnelState,
    pub is_connected: bool,
    /// Live hop transports in the chain
    pub active_connections: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub local_port: Option<u16>,
    /// `targetHost:targetPort`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub target: Option<String>,
    /// RFC 3339
    #[serde(skip_serializing_if = "Option::is_none")]
    pub connection_time: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub jump_hosts: Option<Vec<HopSummary>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub forward_stats: Option<ForwardStats>,
}

impl ConnectionStatus {
    pub fn idle() -> Self {
        Self::default()
    }

    pub fn connecting() -> Self {
        Self {
            state: TunnelState::Connecting,
            ..Self::default()
        }
    }
}

/// An active forwarding listener
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActivePort {
    pub port: u16,
    pub target: String,
}

/// Result of a successful establishment
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EstablishedTunnel {
    pub local_port: u16,
}

/// Lifecycle notifications broadcast to subscribers
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum TunnelEvent {
    StateChanged { state: TunnelState },
    HopConnected { index: usize, hostname: String },
    Disconnected { reason: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_idle_status_omits_chain_fields() {
        let json = serde_json::to_value(ConnectionStatus::idle()).unwrap();
        assert_eq!(json["state"], "idle");
        assert_eq!(json["isConnected"], false);
        assert_eq!(json["activeConnections"], 0);
        assert!(json.get("localPort").is_none());
        assert!(json.get("jumpHosts").is_none());
    }

    #[test]
    fn test_event_wire_format() {
        let event = TunnelEvent::HopConnected {
            index: 1,
            hostname: "jump2".into(),
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "hopConnected");
        assert_eq!(json["hostname"], "jump2");

        let event = TunnelEvent::StateChanged {
            state: TunnelState::Connected,
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "stateChanged");
        assert_eq!(json["state"], "connected");
    }
}
