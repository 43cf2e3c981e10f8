//! Configuration Management Module
//!
//! Persisted application config types, tunnel options, and the on-disk
//! location/permission primitives used by the security manager.

pub mod storage;
pub mod types;

pub use storage::{app_data_dir, StorageError};
pub use types::{ForwardTarget, PersistedAppConfig, TunnelOptions, CONFIG_VERSION};
