//! Tunnel Manager
//!
//! Owns the single hop chain: establishes it hop by hop, publishes lifecycle
//! events, answers status queries and tears it down.
//!
//! State lives in one slot: `Idle`, `Connecting` (with the attempt's
//! cancellation token) or `Connected` (the chain). The lock is never held
//! across an `.await`.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::chain::{OpenedHops, TunnelChain};
use super::error::TunnelError;
use super::status::{ActivePort, ConnectionStatus, EstablishedTunnel, TunnelEvent, TunnelState};
use crate::config::{ForwardTarget, TunnelOptions};
use crate::forwarding::{probe_local_port, start_local_forward, LocalForwardHandle};
use crate::ssh::{HopConnector, HopTransport, HostCredential, KnownHostsStore, SshConnector};

const EVENT_CAPACITY: usize = 64;

enum ChainSlot {
    Idle,
    Connecting {
        attempt: u64,
        cancel: CancellationToken,
    },
    Connected(TunnelChain),
}

impl ChainSlot {
    fn is_attempt(&self, id: u64) -> bool {
        matches!(self, ChainSlot::Connecting { attempt, .. } if *attempt == id)
    }
}

struct Inner {
    connector: Arc<dyn HopConnector>,
    options: TunnelOptions,
    slot: Mutex<ChainSlot>,
    next_attempt: AtomicU64,
    events: broadcast::Sender<TunnelEvent>,
}

impl Inner {
    fn emit(&self, event: TunnelEvent) {
        // No subscribers is fine
        let _ = self.events.send(event);
    }

    fn emit_state(&self, state: TunnelState) {
        self.emit(TunnelEvent::StateChanged { state });
    }
}

/// Resets the slot to `Idle` if the attempt it guards never committed
struct AttemptGuard<'a> {
    inner: &'a Inner,
    attempt: u64,
}

impl Drop for AttemptGuard<'_> {
    fn drop(&mut self) {
        let reset = {
            let mut slot = self.inner.slot.lock();
            if slot.is_attempt(self.attempt) {
                *slot = ChainSlot::Idle;
                true
            } else {
                false
            }
        };
        if reset {
            self.inner.emit_state(TunnelState::Idle);
        }
    }
}

/// Multi-hop tunnel manager
#[derive(Clone)]
pub struct TunnelManager {
    inner: Arc<Inner>,
}

impl TunnelManager {
    pub fn new(connector: Arc<dyn HopConnector>, options: TunnelOptions) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            inner: Arc::new(Inner {
                connector,
                options,
                slot: Mutex::new(ChainSlot::Idle),
                next_attempt: AtomicU64::new(1),
                events,
            }),
        }
    }

    /// Manager backed by real SSH connections
    pub fn with_ssh(options: TunnelOptions, known_hosts: Arc<KnownHostsStore>) -> Self {
        let connector = Arc::new(SshConnector::new(options.clone(), known_hosts));
        Self::new(connector, options)
    }

    /// Subscribe to lifecycle events
    pub fn subscribe(&self) -> broadcast::Receiver<TunnelEvent> {
        self.inner.events.subscribe()
    }

    /// Establish the chain `hops[0] -> ... -> hops[n-1]` and forward
    /// `127.0.0.1:localPort` to `targetHost:targetPort` through the last hop.
    ///
    /// On any failure every transport opened so far is closed (last hop
    /// first) and the manager is back to `Idle` before this returns.
    pub async fn establish(
        &self,
        hops: Vec<HostCredential>,
        target: ForwardTarget,
    ) -> Result<EstablishedTunnel, TunnelError> {
        validate_request(&hops, &target)?;

        let (attempt, cancel) = self.begin_attempt()?;
        let _guard = AttemptGuard {
            inner: &self.inner,
            attempt,
        };

        info!(
            "Establishing tunnel through {} hop(s) to {}",
            hops.len(),
            target.remote_address()
        );

        let mut opened = OpenedHops::new();
        let built = tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(TunnelError::Cancelled),
            result = self.build_chain(&hops, &target, &mut opened) => result,
        };

        let forward = match built {
            Ok(forward) => forward,
            Err(e) => {
                error!("Tunnel establishment failed: {}", e);
                opened.release().await;
                return Err(e);
            }
        };

        let chain = TunnelChain::new(
            hops.iter().map(HostCredential::summary).collect(),
            opened.into_transports(),
            target,
            forward,
        );
        let local_port = chain.local_port();

        let rejected = {
            let mut slot = self.inner.slot.lock();
            if slot.is_attempt(attempt) && !cancel.is_cancelled() {
                *slot = ChainSlot::Connected(chain);
                None
            } else {
                Some(chain)
            }
        };

        if let Some(chain) = rejected {
            warn!("Tunnel was cancelled while committing; tearing it down");
            chain.shutdown().await;
            return Err(TunnelError::Cancelled);
        }

        info!("Tunnel established on 127.0.0.1:{}", local_port);
        self.inner.emit_state(TunnelState::Connected);
        Ok(EstablishedTunnel { local_port })
    }

    fn begin_attempt(&self) -> Result<(u64, CancellationToken), TunnelError> {
        let attempt = self.inner.next_attempt.fetch_add(1, Ordering::Relaxed);
        let cancel = CancellationToken::new();
        {
            let mut slot = self.inner.slot.lock();
            if !matches!(*slot, ChainSlot::Idle) {
                return Err(TunnelError::AlreadyConnected);
            }
            *slot = ChainSlot::Connecting {
                attempt,
                cancel: cancel.clone(),
            };
        }
        self.inner.emit_state(TunnelState::Connecting);
        Ok((attempt, cancel))
    }

    async fn build_chain(
        &self,
        hops: &[HostCredential],
        target: &ForwardTarget,
        opened: &mut OpenedHops,
    ) -> Result<LocalForwardHandle, TunnelError> {
        for (index, hop) in hops.iter().enumerate() {
            let transport = match opened.last() {
                None => self.connect_first(hop).await?,
                Some(previous) => self.connect_through(previous.clone(), index, hop).await?,
            };
            opened.push(transport);

            info!("Hop {} ready: {}", index + 1, hop.address());
            self.inner.emit(TunnelEvent::HopConnected {
                index,
                hostname: hop.hostname.clone(),
            });
        }

        let last = opened
            .last()
            .cloned()
            .ok_or_else(|| TunnelError::InvalidRequest("at least one hop is required".into()))?;

        probe_local_port(target.local_port).await?;
        start_local_forward(last, target).await
    }

    /// Dial, handshake and authenticate the first hop
    async fn connect_first(
        &self,
        hop: &HostCredential,
    ) -> Result<Arc<dyn HopTransport>, TunnelError> {
        let secs = self.inner.options.connect_timeout_secs;
        match tokio::time::timeout(
            Duration::from_secs(secs),
            self.inner.connector.connect(hop),
        )
        .await
        {
            Ok(result) => result.map_err(|e| TunnelError::from_hop(0, &hop.hostname, e)),
            Err(_) => Err(TunnelError::ConnectTimeout {
                index: 0,
                host: hop.hostname.clone(),
                secs,
            }),
        }
    }

    /// Reach `hop` through a direct channel of the previous hop
    async fn connect_through(
        &self,
        previous: Arc<dyn HopTransport>,
        index: usize,
        hop: &HostCredential,
    ) -> Result<Arc<dyn HopTransport>, TunnelError> {
        let secs = self.inner.options.hop_timeout_secs;
        let attempt = async {
            debug!(
                "Opening channel {} -> {} for hop {}",
                previous.hostname(),
                hop.address(),
                index + 1
            );
            let stream = previous
                .open_direct(&hop.hostname, hop.port)
                .await
                .map_err(|e| TunnelError::ChannelOpen {
                    index,
                    host: hop.hostname.clone(),
                    reason: e.to_string(),
                })?;

            self.inner
                .connector
                .connect_over(hop, stream)
                .await
                .map_err(|e| TunnelError::from_hop(index, &hop.hostname, e))
        };

        match tokio::time::timeout(Duration::from_secs(secs), attempt).await {
            Ok(result) => result,
            Err(_) => Err(TunnelError::ConnectTimeout {
                index,
                host: hop.hostname.clone(),
                secs,
            }),
        }
    }

    /// Tear down the tunnel. Never fails; a no-op when idle. During
    /// establishment it cancels the attempt, which rolls itself back.
    pub async fn cleanup_connections(&self) {
        let previous = {
            let mut slot = self.inner.slot.lock();
            std::mem::replace(&mut *slot, ChainSlot::Idle)
        };

        match previous {
            ChainSlot::Idle => debug!("Cleanup requested with no active tunnel"),
            ChainSlot::Connecting { cancel, .. } => {
                info!("Cancelling tunnel establishment");
                cancel.cancel();
                self.inner.emit_state(TunnelState::Idle);
            }
            ChainSlot::Connected(chain) => {
                info!("Closing tunnel on 127.0.0.1:{}", chain.local_port());
                chain.shutdown().await;
                self.inner.emit(TunnelEvent::Disconnected {
                    reason: "cleanup requested".into(),
                });
                self.inner.emit_state(TunnelState::Idle);
            }
        }
    }

    /// Snapshot of the current state
    pub fn connection_status(&self) -> ConnectionStatus {
        match &*self.inner.slot.lock() {
            ChainSlot::Idle => ConnectionStatus::idle(),
            ChainSlot::Connecting { .. } => ConnectionStatus::connecting(),
            ChainSlot::Connected(chain) => chain.status(),
        }
    }

    /// Forwarding listeners currently open
    pub fn active_ports(&self) -> Vec<ActivePort> {
        match &*self.inner.slot.lock() {
            ChainSlot::Connected(chain) => vec![chain.active_port()],
            _ => Vec::new(),
        }
    }
}

/// Reject requests that cannot possibly succeed before touching the network
fn validate_request(hops: &[HostCredential], target: &ForwardTarget) -> Result<(), TunnelError> {
    if hops.is_empty() {
        return Err(TunnelError::InvalidRequest(
            "at least one hop is required".into(),
        ));
    }
    for (index, hop) in hops.iter().enumerate() {
        if hop.hostname.trim().is_empty() {
            return Err(TunnelError::InvalidRequest(format!(
                "hop {} has an empty hostname",
                index + 1
            )));
        }
        if hop.username.trim().is_empty() {
            return Err(TunnelError::InvalidRequest(format!(
                "hop {} ({}) has an empty username",
                index + 1,
                hop.hostname
            )));
        }
        if hop.port == 0 {
            return Err(TunnelError::InvalidRequest(format!(
                "hop {} ({}) has port 0",
                index + 1,
                hop.hostname
            )));
        }
    }
    if target.target_host.trim().is_empty() {
        return Err(TunnelError::InvalidRequest("target host is empty".into()));
    }
    if target.target_port == 0 {
        return Err(TunnelError::InvalidRequest("target port is 0".into()));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tunnel::testing::ScriptedConnector;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpStream;

    fn hop(name: &str) -> HostCredential {
        HostCredential::with_password(name, "ops", "secret")
    }

    fn target(local_port: u16) -> ForwardTarget {
        ForwardTarget::new("db.internal", 5432, local_port)
    }

    fn manager(connector: &Arc<ScriptedConnector>) -> TunnelManager {
        TunnelManager::new(connector.clone(), TunnelOptions::default())
    }

    async fn echo_roundtrip(port: u16, payload: &[u8]) -> Vec<u8> {
        let mut stream = TcpStream::connect(("127.0.0.1", port)).await.unwrap();
        stream.write_all(payload).await.unwrap();
        let mut buf = vec![0u8; payload.len()];
        stream.read_exact(&mut buf).await.unwrap();
        buf
    }

    #[tokio::test]
    async fn test_establish_forwards_through_chain() {
        let connector = Arc::new(ScriptedConnector::new());
        let manager = manager(&connector);

        let established = manager
            .establish(vec![hop("h1"), hop("h2")], target(0))
            .await
            .unwrap();
        assert_ne!(established.local_port, 0);

        assert_eq!(
            connector.log(),
            vec![
                "connect h1",
                "open h1 -> h2:22",
                "connect_over h2",
            ]
        );

        let echoed = echo_roundtrip(established.local_port, b"ping").await;
        assert_eq!(echoed, b"ping");
        assert!(connector
            .log()
            .contains(&"open h2 -> db.internal:5432".to_string()));

        let status = manager.connection_status();
        assert!(status.is_connected);
        assert_eq!(status.state, TunnelState::Connected);
        assert_eq!(status.active_connections, 2);
        assert_eq!(status.local_port, Some(established.local_port));
        assert_eq!(status.target.as_deref(), Some("db.internal:5432"));
        let jump_hosts = status.jump_hosts.unwrap();
        assert_eq!(jump_hosts[1].hostname, "h2");
        assert_eq!(jump_hosts[1].auth_method, "password");
        assert!(status.connection_time.is_some());

        assert_eq!(
            manager.active_ports(),
            vec![ActivePort {
                port: established.local_port,
                target: "db.internal:5432".into(),
            }]
        );

        manager.cleanup_connections().await;
    }

    #[tokio::test]
    async fn test_second_establish_is_rejected() {
        let connector = Arc::new(ScriptedConnector::new());
        let manager = manager(&connector);

        manager.establish(vec![hop("h1")], target(0)).await.unwrap();

        let err = manager
            .establish(vec![hop("other")], ForwardTarget::new("elsewhere", 80, 0))
            .await
            .unwrap_err();
        assert!(matches!(err, TunnelError::AlreadyConnected));

        let status = manager.connection_status();
        assert!(status.is_connected);
        assert_eq!(status.target.as_deref(), Some("db.internal:5432"));
        assert!(!connector.log().contains(&"connect other".to_string()));

        manager.cleanup_connections().await;
    }

    #[tokio::test]
    async fn test_cleanup_is_idempotent() {
        let connector = Arc::new(ScriptedConnector::new());
        let manager = manager(&connector);

        let established = manager
            .establish(vec![hop("h1"), hop("h2")], target(0))
            .await
            .unwrap();

        manager.cleanup_connections().await;
        assert!(!manager.connection_status().is_connected);
        manager.cleanup_connections().await;
        assert!(!manager.connection_status().is_connected);
        assert_eq!(manager.connection_status(), ConnectionStatus::idle());
        assert!(manager.active_ports().is_empty());

        let log = connector.log();
        assert_eq!(log.iter().filter(|e| *e == "close h1").count(), 1);
        assert_eq!(log.iter().filter(|e| *e == "close h2").count(), 1);

        // Listener is gone
        assert!(TcpStream::connect(("127.0.0.1", established.local_port))
            .await
            .is_err());
    }

    #[tokio::test]
    async fn test_auth_failure_rolls_back_chain() {
        let connector = Arc::new(ScriptedConnector::new());
        connector.fail_auth("h2");
        let manager = manager(&connector);

        let err = manager
            .establish(vec![hop("h1"), hop("h2"), hop("h3")], target(0))
            .await
            .unwrap_err();

        assert!(matches!(err, TunnelError::Authentication { .. }));
        assert_eq!(err.hop(), Some((1, "h2")));

        let log = connector.log();
        assert!(log.contains(&"close h1".to_string()));
        assert!(!log.iter().any(|e| e.contains("h3")));
        assert_eq!(manager.connection_status(), ConnectionStatus::idle());
    }

    #[tokio::test]
    async fn test_port_in_use_rolls_back_chain() {
        let holder = std::net::TcpListener::bind(("127.0.0.1", 0)).unwrap();
        let port = holder.local_addr().unwrap().port();

        let connector = Arc::new(ScriptedConnector::new());
        let manager = manager(&connector);

        let err = manager
            .establish(vec![hop("h1")], target(port))
            .await
            .unwrap_err();

        assert!(matches!(err, TunnelError::PortInUse { port: p } if p == port));
        assert_eq!(connector.log(), vec!["connect h1", "close h1"]);
        assert_eq!(manager.connection_status(), ConnectionStatus::idle());
    }

    #[tokio::test]
    async fn test_channel_failure_to_next_hop_names_that_hop() {
        let connector = Arc::new(ScriptedConnector::new());
        connector.refuse_channels_to("h2");
        let manager = manager(&connector);

        let err = manager
            .establish(vec![hop("h1"), hop("h2")], target(0))
            .await
            .unwrap_err();

        assert!(matches!(err, TunnelError::ChannelOpen { .. }));
        assert_eq!(err.hop(), Some((1, "h2")));
        assert!(connector.log().contains(&"close h1".to_string()));
        assert!(!manager.connection_status().is_connected);
    }

    #[tokio::test]
    async fn test_target_channel_failure_is_contained() {
        let connector = Arc::new(ScriptedConnector::new());
        connector.refuse_channels_to("db.internal");
        let manager = manager(&connector);

        let established = manager
            .establish(vec![hop("h1")], target(0))
            .await
            .unwrap();

        let mut stream = TcpStream::connect(("127.0.0.1", established.local_port))
            .await
            .unwrap();
        let mut buf = [0u8; 8];
        // Local socket is closed without data
        let read = stream.read(&mut buf).await.unwrap_or(0);
        assert_eq!(read, 0);

        assert!(manager.connection_status().is_connected);
        connector.allow_channels_to("db.internal");
        let echoed = echo_roundtrip(established.local_port, b"again").await;
        assert_eq!(echoed, b"again");

        let stats = manager.connection_status().forward_stats.unwrap();
        assert_eq!(stats.failed_connections, 1);
        assert_eq!(stats.connection_count, 2);

        manager.cleanup_connections().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_first_hop_timeout() {
        let connector = Arc::new(ScriptedConnector::new());
        connector.stall("h1");
        let manager = manager(&connector);

        let err = manager
            .establish(vec![hop("h1"), hop("h2")], target(0))
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            TunnelError::ConnectTimeout { index: 0, secs: 30, .. }
        ));
        assert!(!connector.log().iter().any(|e| e.contains("h2")));
        assert_eq!(manager.connection_status(), ConnectionStatus::idle());
    }

    #[tokio::test(start_paused = true)]
    async fn test_inner_hop_timeout_closes_outer() {
        let connector = Arc::new(ScriptedConnector::new());
        connector.stall("h2");
        let manager = manager(&connector);

        let err = manager
            .establish(vec![hop("h1"), hop("h2")], target(0))
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            TunnelError::ConnectTimeout { index: 1, secs: 20, .. }
        ));
        assert!(connector.log().contains(&"close h1".to_string()));
    }

    #[tokio::test]
    async fn test_cleanup_cancels_establishment() {
        let connector = Arc::new(ScriptedConnector::new());
        connector.stall("h2");
        let manager = manager(&connector);
        let mut events = manager.subscribe();

        let establishing = {
            let manager = manager.clone();
            tokio::spawn(async move {
                manager
                    .establish(vec![hop("h1"), hop("h2")], target(0))
                    .await
            })
        };

        loop {
            match events.recv().await.unwrap() {
                TunnelEvent::HopConnected { index: 0, .. } => break,
                _ => continue,
            }
        }
        assert_eq!(manager.connection_status().state, TunnelState::Connecting);

        manager.cleanup_connections().await;
        assert_eq!(manager.connection_status(), ConnectionStatus::idle());

        let err = establishing.await.unwrap().unwrap_err();
        assert!(matches!(err, TunnelError::Cancelled));
        assert!(connector.log().contains(&"close h1".to_string()));

        // Usable again afterwards
        connector.unstall("h2");
        manager
            .establish(vec![hop("h1"), hop("h2")], target(0))
            .await
            .unwrap();
        manager.cleanup_connections().await;
    }

    #[tokio::test]
    async fn test_lifecycle_events() {
        let connector = Arc::new(ScriptedConnector::new());
        let manager = manager(&connector);
        let mut events = manager.subscribe();

        manager
            .establish(vec![hop("h1"), hop("h2")], target(0))
            .await
            .unwrap();
        manager.cleanup_connections().await;

        let mut seen = Vec::new();
        while let Ok(event) = events.try_recv() {
            seen.push(event);
        }
        assert_eq!(
            seen,
            vec![
                TunnelEvent::StateChanged {
                    state: TunnelState::Connecting
                },
                TunnelEvent::HopConnected {
                    index: 0,
                    hostname: "h1".into()
                },
                TunnelEvent::HopConnected {
                    index: 1,
                    hostname: "h2".into()
                },
                TunnelEvent::StateChanged {
                    state: TunnelState::Connected
                },
                TunnelEvent::Disconnected {
                    reason: "cleanup requested".into()
                },
                TunnelEvent::StateChanged {
                    state: TunnelState::Idle
                },
            ]
        );
    }

    #[tokio::test]
    async fn test_invalid_requests_do_no_network_work() {
        let connector = Arc::new(ScriptedConnector::new());
        let manager = manager(&connector);

        let err = manager.establish(vec![], target(0)).await.unwrap_err();
        assert_eq!(err.code(), "InvalidRequest");

        let err = manager
            .establish(vec![hop("")], target(0))
            .await
            .unwrap_err();
        assert_eq!(err.code(), "InvalidRequest");

        let err = manager
            .establish(vec![hop("h1")], ForwardTarget::new("db", 0, 0))
            .await
            .unwrap_err();
        assert_eq!(err.code(), "InvalidRequest");

        assert!(connector.log().is_empty());
        assert_eq!(manager.connection_status(), ConnectionStatus::idle());
    }
}
