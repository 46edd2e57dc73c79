// src/core/state/mod.rs

//! Listener-wide state shared by all client connections.

mod listener;

pub use listener::{
    AuthListener, ConnectionSettings, MasterPeers, OUTBUF_THROTTLE_SIZE, REQUEST_SWEEP_INTERVAL,
};
