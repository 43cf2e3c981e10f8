//! SSH client implementation using russh
//!
//! `SshConnector` opens hop transports either by dialing TCP (first hop) or
//! by running SSH over a `direct-tcpip` channel of the previous hop
//! (SSH-over-SSH, via `russh::client::connect_stream`).

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use russh::client::{self, Handle};
use russh::keys::key::PrivateKeyWithHashAlg;
use russh::keys::PublicKey;
use russh::Disconnect;
use tracing::{debug, info, warn};

use super::config::{AuthMethod, HostCredential};
use super::error::SshError;
use super::known_hosts::{HostKeyVerification, KnownHostsStore};
use super::transport::{BoxedStream, HopConnector, HopTransport};
use crate::config::TunnelOptions;

/// Expand ~ to home directory (russh::keys doesn't handle tilde)
fn expand_tilde(path: &str) -> String {
    if let Some(stripped) = path.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(stripped).to_string_lossy().into_owned();
        }
    } else if path == "~" {
        if let Some(home) = dirs::home_dir() {
            return home.to_string_lossy().into_owned();
        }
    }
    path.to_string()
}

/// Client handler for russh callbacks
///
/// Verifies hop host keys against the application's known hosts store.
pub struct ClientHandler {
    host: String,
    port: u16,
    known_hosts: Arc<KnownHostsStore>,
}

impl ClientHandler {
    pub fn new(host: String, port: u16, known_hosts: Arc<KnownHostsStore>) -> Self {
        Self {
            host,
            port,
            known_hosts,
        }
    }
}

impl client::Handler for ClientHandler {
    type Error = SshError;

    async fn check_server_key(
        &mut self,
        server_public_key: &PublicKey,
    ) -> Result<bool, Self::Error> {
        match self
            .known_hosts
            .verify(&self.host, self.port, server_public_key)
        {
            HostKeyVerification::Verified => {
                debug!("Host key verified for {}:{}", self.host, self.port);
                Ok(true)
            }
            HostKeyVerification::Unknown { fingerprint } => {
                info!(
                    "New host {}:{}, recording host key (fingerprint: {})",
                    self.host, self.port, fingerprint
                );
                if let Err(e) = self
                    .known_hosts
                    .add_host(&self.host, self.port, server_public_key)
                {
                    warn!("Failed to save host key: {}", e);
                }
                Ok(true)
            }
            HostKeyVerification::Changed {
                expected_fingerprint,
                actual_fingerprint,
            } => {
                warn!(
                    "HOST KEY CHANGED for {}:{}! Expected {}, got {}",
                    self.host, self.port, expected_fingerprint, actual_fingerprint
                );
                let hint = match self.known_hosts.path() {
                    Some(path) => format!(
                        ". Remove the stale entry from {:?} if the change is legitimate",
                        path
                    ),
                    None => String::new(),
                };
                Err(SshError::HostKeyRejected(format!(
                    "key for {}:{} has changed (expected {}, got {}){}",
                    self.host, self.port, expected_fingerprint, actual_fingerprint, hint
                )))
            }
        }
    }
}

/// An authenticated russh session to one hop
pub struct SshTransport {
    hostname: String,
    handle: Handle<ClientHandler>,
    closed: AtomicBool,
}

#[async_trait]
impl HopTransport for SshTransport {
    fn hostname(&self) -> &str {
        &self.hostname
    }

    async fn open_direct(&self, host: &str, port: u16) -> Result<BoxedStream, SshError> {
        if self.is_closed() {
            return Err(SshError::Disconnected);
        }
        let channel = self
            .handle
            .channel_open_direct_tcpip(host, port as u32, "127.0.0.1", 0)
            .await
            .map_err(|e| {
                SshError::ChannelError(format!(
                    "{} could not open channel to {}:{}: {}",
                    self.hostname, host, port, e
                ))
            })?;

        debug!("Opened direct-tcpip {} -> {}:{}", self.hostname, host, port);
        Ok(Box::new(channel.into_stream()))
    }

    async fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        if let Err(e) = self
            .handle
            .disconnect(Disconnect::ByApplication, "tunnel closed", "en")
            .await
        {
            debug!("Disconnect from {} failed: {}", self.hostname, e);
        }
        info!("Closed SSH connection to {}", self.hostname);
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst) || self.handle.is_closed()
    }
}

/// Production hop connector
pub struct SshConnector {
    options: TunnelOptions,
    known_hosts: Arc<KnownHostsStore>,
}

impl SshConnector {
    pub fn new(options: TunnelOptions, known_hosts: Arc<KnownHostsStore>) -> Self {
        Self {
            options,
            known_hosts,
        }
    }

    fn client_config(&self) -> Arc<client::Config> {
        Arc::new(client::Config {
            inactivity_timeout: None,
            keepalive_interval: Some(Duration::from_secs(self.options.keepalive_interval_secs)),
            keepalive_max: self.options.keepalive_max,
            ..Default::default()
        })
    }

    fn handler_for(&self, hop: &HostCredential) -> ClientHandler {
        ClientHandler::new(hop.hostname.clone(), hop.port, self.known_hosts.clone())
    }

    async fn finish(
        &self,
        hop: &HostCredential,
        mut handle: Handle<ClientHandler>,
    ) -> Result<Arc<dyn HopTransport>, SshError> {
        authenticate(&mut handle, hop).await?;
        Ok(Arc::new(SshTransport {
            hostname: hop.hostname.clone(),
            handle,
            closed: AtomicBool::new(false),
        }))
    }
}

#[async_trait]
impl HopConnector for SshConnector {
    async fn connect(&self, hop: &HostCredential) -> Result<Arc<dyn HopTransport>, SshError> {
        let addr = hop.address();
        let socket_addr = tokio::net::lookup_host((hop.hostname.as_str(), hop.port))
            .await
            .map_err(|e| SshError::ConnectionFailed(format!("Failed to resolve {}: {}", addr, e)))?
            .next()
            .ok_or_else(|| SshError::ConnectionFailed(format!("No address found for {}", addr)))?;

        info!("Connecting to jump host at {}", addr);

        let handle = client::connect(self.client_config(), socket_addr, self.handler_for(hop))
            .await
            .map_err(|e| match e {
                SshError::HostKeyRejected(_) => e,
                other => SshError::ConnectionFailed(format!("{}: {}", addr, other)),
            })?;

        debug!("SSH handshake with {} completed", addr);
        self.finish(hop, handle).await
    }

    async fn connect_over(
        &self,
        hop: &HostCredential,
        stream: BoxedStream,
    ) -> Result<Arc<dyn HopTransport>, SshError> {
        info!("Connecting via stream to {} (SSH-over-SSH)", hop.address());

        let handle = client::connect_stream(self.client_config(), stream, self.handler_for(hop))
            .await
            .map_err(|e| match e {
                SshError::HostKeyRejected(_) => e,
                other => SshError::ConnectionFailed(format!(
                    "Failed to connect via stream to {}: {}",
                    hop.address(),
                    other
                )),
            })?;

        debug!("SSH handshake via stream with {} completed", hop.address());
        self.finish(hop, handle).await
    }
}

/// Authenticate a freshly handshaken session with the hop's credential
async fn authenticate(
    handle: &mut Handle<ClientHandler>,
    hop: &HostCredential,
) -> Result<(), SshError> {
    let result = match &hop.auth {
        AuthMethod::Password { password } => {
            debug!("Authenticating to {} with password", hop.hostname);
            handle
                .authenticate_password(&hop.username, password)
                .await
                .map_err(|e| SshError::AuthenticationFailed(e.to_string()))?
        }
        AuthMethod::PrivateKey {
            private_key_path,
            passphrase,
        } => {
            let key_path = expand_tilde(private_key_path);
            debug!("Authenticating to {} with key: {}", hop.hostname, key_path);
            let key = russh::keys::load_secret_key(&key_path, passphrase.as_deref()).map_err(
                |e| SshError::KeyError(format!("Failed to load private key {}: {}", key_path, e)),
            )?;

            let key_with_hash = PrivateKeyWithHashAlg::new(Arc::new(key), None);

            handle
                .authenticate_publickey(&hop.username, key_with_hash)
                .await
                .map_err(|e| SshError::AuthenticationFailed(e.to_string()))?
        }
    };

    if !result.success() {
        return Err(SshError::AuthenticationFailed(format!(
            "{}@{} rejected {} authentication",
            hop.username,
            hop.hostname,
            hop.auth.kind()
        )));
    }

    info!("Authenticated to {} as {}", hop.hostname, hop.username);
    Ok(())
}
