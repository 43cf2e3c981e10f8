//! Tunnel lifecycle errors

use thiserror::Error;

use crate::ssh::SshError;

/// Errors surfaced by tunnel establishment
///
/// Hop indices are zero-based; messages show them one-based.
#[derive(Error, Debug)]
pub enum TunnelError {
    #[error("Invalid tunnel request: {0}")]
    InvalidRequest(String),

    #[error("A tunnel is already active; disconnect it first")]
    AlreadyConnected,

    #[error("Connection to hop {} ({}) timed out after {}s", .index + 1, .host, .secs)]
    ConnectTimeout {
        index: usize,
        host: String,
        secs: u64,
    },

    #[error("Authentication to hop {} ({}) failed: {}", .index + 1, .host, .reason)]
    Authentication {
        index: usize,
        host: String,
        reason: String,
    },

    #[error("Could not open a channel to hop {} ({}): {}", .index + 1, .host, .reason)]
    ChannelOpen {
        index: usize,
        host: String,
        reason: String,
    },

    #[error("Connection to hop {} ({}) failed: {}", .index + 1, .host, .reason)]
    Connection {
        index: usize,
        host: String,
        reason: String,
    },

    #[error("Local port {port} is already in use")]
    PortInUse { port: u16 },

    #[error("Failed to start local listener on port {port}: {reason}")]
    Listener { port: u16, reason: String },

    #[error("Tunnel establishment was cancelled")]
    Cancelled,
}

impl TunnelError {
    /// Attribute a transport-layer error to the hop it happened on
    pub fn from_hop(index: usize, host: &str, err: SshError) -> Self {
        let host = host.to_string();
        match err {
            SshError::AuthenticationFailed(reason) | SshError::KeyError(reason) => {
                TunnelError::Authentication {
                    index,
                    host,
                    reason,
                }
            }
            SshError::ChannelError(reason) => TunnelError::ChannelOpen {
                index,
                host,
                reason,
            },
            other => TunnelError::Connection {
                index,
                host,
                reason: other.to_string(),
            },
        }
    }

    /// Stable error code for the command envelope
    pub fn code(&self) -> &'static str {
        match self {
            TunnelError::InvalidRequest(_) => "InvalidRequest",
            TunnelError::AlreadyConnected => "AlreadyConnected",
            TunnelError::ConnectTimeout { .. } => "ConnectTimeout",
            TunnelError::Authentication { .. } => "AuthenticationError",
            TunnelError::ChannelOpen { .. } => "ChannelOpenError",
            TunnelError::Connection { .. } => "ConnectionError",
            TunnelError::PortInUse { .. } => "PortInUse",
            TunnelError::Listener { .. } => "ListenerError",
            TunnelError::Cancelled => "Cancelled",
        }
    }

    /// Hop the error is attributed to, if any
    pub fn hop(&self) -> Option<(usize, &str)> {
        match self {
            TunnelError::ConnectTimeout { index, host, .. }
            | TunnelError::Authentication { index, host, .. }
            | TunnelError::ChannelOpen { index, host, .. }
            | TunnelError::Connection { index, host, .. } => Some((*index, host.as_str())),
            _ => None,
        }
    }
}

impl serde::Serialize for TunnelError {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ssh_errors_are_attributed_to_hop() {
        let err = TunnelError::from_hop(1, "h2", SshError::AuthenticationFailed("denied".into()));
        assert_eq!(err.code(), "AuthenticationError");
        assert_eq!(err.hop(), Some((1, "h2")));
        assert_eq!(err.to_string(), "Authentication to hop 2 (h2) failed: denied");

        let err = TunnelError::from_hop(0, "h1", SshError::KeyError("bad key".into()));
        assert_eq!(err.code(), "AuthenticationError");

        let err = TunnelError::from_hop(2, "h3", SshError::ChannelError("refused".into()));
        assert_eq!(err.code(), "ChannelOpenError");

        let err = TunnelError::from_hop(0, "h1", SshError::HostKeyRejected("changed".into()));
        assert_eq!(err.code(), "ConnectionError");
    }

    #[test]
    fn test_port_in_use_message() {
        let err = TunnelError::PortInUse { port: 15432 };
        assert_eq!(err.code(), "PortInUse");
        assert_eq!(err.to_string(), "Local port 15432 is already in use");
        assert_eq!(err.hop(), None);
    }
}
