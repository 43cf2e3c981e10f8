//! SSH Tunnel Manager - chained SSH jump hosts with encrypted settings
//!
//! Reaches a target service through any number of SSH jump hosts and exposes
//! it on a local loopback port. Jump-host credentials and target settings are
//! persisted encrypted at rest.

pub mod commands;
pub mod config;
pub mod forwarding;
pub mod security;
pub mod ssh;
pub mod tunnel;

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Initialize logging
///
/// Logs go to stderr; stdout carries the command protocol.
pub fn init_logging() {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}
