//! Port Forwarding Module
//!
//! Local port forwarding from a loopback listener to the tunnel target.

mod local;

pub use local::{probe_local_port, start_local_forward, ForwardStats, LocalForwardHandle};
