//! Hop transport errors

use thiserror::Error;

#[derive(Error, Debug)]
pub enum SshError {
    #[error("Could not reach hop: {0}")]
    ConnectionFailed(String),

    #[error("Hop rejected credentials: {0}")]
    AuthenticationFailed(String),

    #[error("Direct channel refused: {0}")]
    ChannelError(String),

    #[error("I/O error on hop transport: {0}")]
    Io(#[from] std::io::Error),

    #[error("SSH protocol error: {0}")]
    ProtocolError(String),

    #[error("Private key unusable: {0}")]
    KeyError(String),

    #[error("Host key rejected: {0}")]
    HostKeyRejected(String),

    #[error("Hop transport is closed")]
    Disconnected,
}

impl From<russh::Error> for SshError {
    fn from(err: russh::Error) -> Self {
        SshError::ProtocolError(err.to_string())
    }
}

impl From<russh::keys::Error> for SshError {
    fn from(err: russh::keys::Error) -> Self {
        SshError::KeyError(err.to_string())
    }
}
