//! Configuration data types

use serde::{Deserialize, Serialize};

use crate::ssh::HostCredential;

/// Current persisted config format version
pub const CONFIG_VERSION: &str = "1.0";

/// Where the tunnel ends: `targetHost:targetPort` as seen from the last hop,
/// exposed on `127.0.0.1:localPort`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ForwardTarget {
    pub target_host: String,
    pub target_port: u16,
    /// 0 binds an ephemeral port
    pub local_port: u16,
}

impl ForwardTarget {
    pub fn new(target_host: impl Into<String>, target_port: u16, local_port: u16) -> Self {
        Self {
            target_host: target_host.into(),
            target_port,
            local_port,
        }
    }

    /// `targetHost:targetPort`
    pub fn remote_address(&self) -> String {
        format!("{}:{}", self.target_host, self.target_port)
    }
}

/// Application configuration, the plaintext inside `config.encrypted`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PersistedAppConfig {
    pub jump_hosts: Vec<HostCredential>,
    pub target_config: ForwardTarget,
    /// Milliseconds since the Unix epoch, stamped on save
    #[serde(default)]
    pub last_used: i64,
    #[serde(default = "default_version")]
    pub version: String,
}

impl PersistedAppConfig {
    pub fn new(jump_hosts: Vec<HostCredential>, target_config: ForwardTarget) -> Self {
        Self {
            jump_hosts,
            target_config,
            last_used: 0,
            version: default_version(),
        }
    }
}

fn default_version() -> String {
    CONFIG_VERSION.to_string()
}

/// Tunnel timing knobs
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TunnelOptions {
    /// Dial + handshake + auth window for the first hop
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,

    /// Channel + handshake + auth window for hops reached through another hop
    #[serde(default = "default_hop_timeout")]
    pub hop_timeout_secs: u64,

    #[serde(default = "default_keepalive_interval")]
    pub keepalive_interval_secs: u64,

    /// Missed keepalives before a hop is considered dead
    #[serde(default = "default_keepalive_max")]
    pub keepalive_max: usize,
}

fn default_connect_timeout() -> u64 {
    30
}

fn default_hop_timeout() -> u64 {
    20
}

fn default_keepalive_interval() -> u64 {
    30
}

fn default_keepalive_max() -> usize {
    3
}

impl Default for TunnelOptions {
    fn default() -> Self {
        Self {
            connect_timeout_secs: default_connect_timeout(),
            hop_timeout_secs: default_hop_timeout(),
            keepalive_interval_secs: default_keepalive_interval(),
            keepalive_max: default_keepalive_max(),
        }
    }
}
