//! SSH Tunnel Manager host process
//!
//! Line-delimited JSON over stdin/stdout:
//! - Requests: `{"id": 1, "method": "establishTunnel", "params": {...}}`
//! - Responses: `{"id": 1, "success": true, "data": {...}}`
//! - Notifications: `{"method": "tunnel/event", "params": {...}}`
//!
//! Logs go to stderr. Exits (after tearing the tunnel down) on stdin EOF
//! or Ctrl-C.

use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use mimalloc::MiMalloc;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, error, info, warn};

use ssh_tunnel_manager::commands::{self, AppContext, Notification, Request, TUNNEL_EVENT_METHOD};
use ssh_tunnel_manager::config::TunnelOptions;

#[global_allocator]
static GLOBAL: MiMalloc = MiMalloc;

const VERSION: &str = env!("CARGO_PKG_VERSION");
const WRITER_DRAIN_TIMEOUT: Duration = Duration::from_secs(2);

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    let args: Vec<String> = std::env::args().collect();
    if args.len() > 1 && (args[1] == "--version" || args[1] == "-V") {
        println!("ssh-tunnel-manager {}", VERSION);
        return ExitCode::SUCCESS;
    }

    ssh_tunnel_manager::init_logging();
    info!(
        "ssh-tunnel-manager v{} starting (pid: {})",
        VERSION,
        std::process::id()
    );

    let ctx = Arc::new(AppContext::from_app_data_dir(TunnelOptions::default()));

    // Serialized responses/notifications -> stdout writer task
    let (out_tx, mut out_rx) = mpsc::unbounded_channel::<String>();

    let writer = tokio::spawn(async move {
        let mut stdout = tokio::io::stdout();
        while let Some(line) = out_rx.recv().await {
            let written = async {
                stdout.write_all(line.as_bytes()).await?;
                stdout.write_all(b"\n").await?;
                stdout.flush().await
            }
            .await;
            if written.is_err() {
                break;
            }
        }
    });

    let relay = tokio::spawn(relay_events(ctx.tunnel.subscribe(), out_tx.clone()));

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("Interrupted, shutting down");
                break;
            }

            line = lines.next_line() => match line {
                Ok(Some(line)) => {
                    if line.trim().is_empty() {
                        continue;
                    }
                    match serde_json::from_str::<Request>(&line) {
                        Ok(request) => {
                            let ctx = ctx.clone();
                            let out_tx = out_tx.clone();
                            // Own task: status queries are answered while a tunnel is being built
                            tokio::spawn(async move {
                                let response = commands::dispatch(&ctx, request).await;
                                match serde_json::to_string(&response) {
                                    Ok(json) => {
                                        let _ = out_tx.send(json);
                                    }
                                    Err(e) => error!("Failed to serialize response: {}", e),
                                }
                            });
                        }
                        // Never echo the line: requests carry credentials
                        Err(e) => warn!("Invalid request: {}", e),
                    }
                }
                Ok(None) => {
                    info!("stdin closed, shutting down");
                    break;
                }
                Err(e) => {
                    error!("Failed to read stdin: {}", e);
                    break;
                }
            }
        }
    }

    ctx.tunnel.cleanup_connections().await;
    relay.abort();
    drop(out_tx);
    if tokio::time::timeout(WRITER_DRAIN_TIMEOUT, writer).await.is_err() {
        debug!("Output writer did not drain in time");
    }
    info!("Shutdown complete");
    ExitCode::SUCCESS
}

async fn relay_events(
    mut events: broadcast::Receiver<ssh_tunnel_manager::tunnel::TunnelEvent>,
    out_tx: mpsc::UnboundedSender<String>,
) {
    loop {
        match events.recv().await {
            Ok(event) => {
                let notification = Notification {
                    method: TUNNEL_EVENT_METHOD.to_string(),
                    params: serde_json::to_value(&event).unwrap_or_default(),
                };
                if let Ok(json) = serde_json::to_string(&notification) {
                    if out_tx.send(json).is_err() {
                        break;
                    }
                }
            }
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                warn!("Dropped {} tunnel events", skipped);
            }
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
}
