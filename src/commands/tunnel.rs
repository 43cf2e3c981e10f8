//! Tunnel commands

use serde::Deserialize;
use serde_json::Value;
use tracing::info;

use super::protocol::CommandError;
use super::{parse_params, to_data, AppContext};
use crate::config::ForwardTarget;
use crate::ssh::HostCredential;

#[derive(Debug, Deserialize)]
struct EstablishParams {
    #[serde(alias = "jumpHosts")]
    hops: Vec<HostCredential>,
    #[serde(alias = "targetConfig")]
    target: ForwardTarget,
}

pub(super) async fn establish_tunnel(ctx: &AppContext, params: Value) -> Result<Value, CommandError> {
    let params: EstablishParams = parse_params(params)?;
    info!(
        "establishTunnel: {} hop(s) -> {}",
        params.hops.len(),
        params.target.remote_address()
    );
    let established = ctx.tunnel.establish(params.hops, params.target).await?;
    to_data(&established)
}

pub(super) async fn cleanup_connections(ctx: &AppContext) -> Result<Value, CommandError> {
    ctx.tunnel.cleanup_connections().await;
    Ok(Value::Null)
}

pub(super) fn connection_status(ctx: &AppContext) -> Result<Value, CommandError> {
    to_data(&ctx.tunnel.connection_status())
}

pub(super) fn active_ports(ctx: &AppContext) -> Result<Value, CommandError> {
    to_data(&ctx.tunnel.active_ports())
}
