//! Command façade
//!
//! Routes protocol requests to the tunnel and security managers and wraps
//! their results in the response envelope.

mod protocol;
mod security;
mod tunnel;

use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, warn};

pub use protocol::{CommandError, Notification, Request, Response};

use crate::config::TunnelOptions;
use crate::security::SecurityManager;
use crate::ssh::KnownHostsStore;
use crate::tunnel::TunnelManager;

const KNOWN_HOSTS_FILE: &str = "known_hosts";

/// Method name for relayed tunnel events
pub const TUNNEL_EVENT_METHOD: &str = "tunnel/event";

/// Everything the commands operate on, built once at startup
pub struct AppContext {
    pub tunnel: TunnelManager,
    pub security: SecurityManager,
}

impl AppContext {
    pub fn new(tunnel: TunnelManager, security: SecurityManager) -> Self {
        Self { tunnel, security }
    }

    /// Production context rooted at the OS application data directory
    pub fn from_app_data_dir(options: TunnelOptions) -> Self {
        let security = SecurityManager::new();
        let known_hosts = match security.data_dir() {
            Some(dir) => KnownHostsStore::open(dir.join(KNOWN_HOSTS_FILE)),
            None => KnownHostsStore::in_memory(),
        };
        let tunnel = TunnelManager::with_ssh(options, Arc::new(known_hosts));
        Self::new(tunnel, security)
    }
}

/// Handle one request
pub async fn dispatch(ctx: &AppContext, request: Request) -> Response {
    let Request { id, method, params } = request;
    debug!("Dispatching {} (id {})", method, id);

    match route(ctx, &method, params).await {
        Ok(data) => Response::ok(id, data),
        Err(error) => {
            warn!("{} failed: [{}] {}", method, error.code, error.message);
            Response::err(id, error)
        }
    }
}

async fn route(ctx: &AppContext, method: &str, params: Value) -> Result<Value, CommandError> {
    match method {
        "establishTunnel" => tunnel::establish_tunnel(ctx, params).await,
        "cleanupConnections" => tunnel::cleanup_connections(ctx).await,
        "getConnectionStatus" => tunnel::connection_status(ctx),
        "getActivePorts" => tunnel::active_ports(ctx),
        "encryptData" => security::encrypt_data(ctx, params),
        "decryptData" => security::decrypt_data(ctx, params),
        "saveConfig" => security::save_config(ctx, params),
        "loadConfig" => security::load_config(ctx),
        "clearAllData" => security::clear_all_data(ctx),
        "getSecurityInfo" => security::security_info(ctx),
        "hashPassword" => security::hash_password(params),
        "verifyPassword" => security::verify_password(params),
        "computeHash" => security::compute_hash(params),
        "generateRandomString" => security::generate_random_string(params),
        _ => Err(CommandError::method_not_found(method)),
    }
}

fn parse_params<T: DeserializeOwned>(params: Value) -> Result<T, CommandError> {
    serde_json::from_value(params).map_err(CommandError::invalid_params)
}

fn to_data<T: Serialize>(value: &T) -> Result<Value, CommandError> {
    serde_json::to_value(value).map_err(CommandError::internal)
}
