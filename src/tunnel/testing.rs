//! Scripted hop connector for tests
//!
//! Records every connect/open/close as a log line and serves echo streams
//! for direct channels, so chain behavior can be checked without SSH servers.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::ssh::{BoxedStream, HopConnector, HopTransport, HostCredential, SshError};

#[derive(Default)]
struct Script {
    log: Vec<String>,
    auth_failures: HashSet<String>,
    stalled: HashSet<String>,
    refused_channels: HashSet<String>,
}

type Shared = Arc<Mutex<Script>>;

#[derive(Default)]
pub(crate) struct ScriptedConnector {
    script: Shared,
}

impl ScriptedConnector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn log(&self) -> Vec<String> {
        self.script.lock().log.clone()
    }

    /// Authentication to `host` is rejected
    pub fn fail_auth(&self, host: &str) {
        self.script.lock().auth_failures.insert(host.to_string());
    }

    /// Connecting to `host` never completes
    pub fn stall(&self, host: &str) {
        self.script.lock().stalled.insert(host.to_string());
    }

    pub fn unstall(&self, host: &str) {
        self.script.lock().stalled.remove(host);
    }

    /// Direct channels to `host` are refused by every hop
    pub fn refuse_channels_to(&self, host: &str) {
        self.script.lock().refused_channels.insert(host.to_string());
    }

    pub fn allow_channels_to(&self, host: &str) {
        self.script.lock().refused_channels.remove(host);
    }

    async fn open(&self, hop: &HostCredential) -> Result<Arc<dyn HopTransport>, SshError> {
        let (stalled, rejected) = {
            let script = self.script.lock();
            (
                script.stalled.contains(&hop.hostname),
                script.auth_failures.contains(&hop.hostname),
            )
        };
        if stalled {
            std::future::pending::<()>().await;
        }
        if rejected {
            return Err(SshError::AuthenticationFailed(format!(
                "{}@{} rejected password authentication",
                hop.username, hop.hostname
            )));
        }
        Ok(Arc::new(ScriptedTransport {
            hostname: hop.hostname.clone(),
            script: self.script.clone(),
            closed: AtomicBool::new(false),
        }))
    }
}

#[async_trait]
impl HopConnector for ScriptedConnector {
    async fn connect(&self, hop: &HostCredential) -> Result<Arc<dyn HopTransport>, SshError> {
        self.script.lock().log.push(format!("connect {}", hop.hostname));
        self.open(hop).await
    }

    async fn connect_over(
        &self,
        hop: &HostCredential,
        _stream: BoxedStream,
    ) -> Result<Arc<dyn HopTransport>, SshError> {
        self.script
            .lock()
            .log
            .push(format!("connect_over {}", hop.hostname));
        self.open(hop).await
    }
}

struct ScriptedTransport {
    hostname: String,
    script: Shared,
    closed: AtomicBool,
}

#[async_trait]
impl HopTransport for ScriptedTransport {
    fn hostname(&self) -> &str {
        &self.hostname
    }

    async fn open_direct(&self, host: &str, port: u16) -> Result<BoxedStream, SshError> {
        if self.is_closed() {
            return Err(SshError::Disconnected);
        }
        {
            let mut script = self.script.lock();
            if script.refused_channels.contains(host) {
                return Err(SshError::ChannelError(format!(
                    "{} refused channel to {}:{}",
                    self.hostname, host, port
                )));
            }
            script
                .log
                .push(format!("open {} -> {}:{}", self.hostname, host, port));
        }

        let (client, server) = tokio::io::duplex(64 * 1024);
        tokio::spawn(async move {
            let (mut reader, mut writer) = tokio::io::split(server);
            let _ = tokio::io::copy(&mut reader, &mut writer).await;
        });
        Ok(Box::new(client))
    }

    async fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        self.script.lock().log.push(format!("close {}", self.hostname));
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}
