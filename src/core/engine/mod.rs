// src/core/engine/mod.rs

//! The boundary between a client connection and the request engine that
//! evaluates its `AUTH`/`CONT` commands.
//!
//! A connection creates one engine when its handshake completes. The engine
//! talks back exclusively through the reply callback handed to it at
//! creation, on whatever schedule it likes: synchronously from inside
//! `auth_begin`, later from a timer, or during `release`.

pub mod tracker;

use std::rc::Rc;

pub use tracker::{RequestTracker, TrackerFactory};

/// What an engine hands to its connection's reply callback.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineReply {
    /// One protocol line to send to the client, without the trailing newline.
    Reply(String),
    /// The engine has been torn down. The connection drops the reference it
    /// took when binding the engine; nothing is written.
    EngineClosed,
}

/// Delivers engine output to the owning connection.
pub type ReplyCallback = Box<dyn FnMut(EngineReply)>;

/// Forwards a finished request to the master peers: `(connect_uid, line)`.
pub type MasterRelay = Rc<dyn Fn(u32, &str)>;

/// One connection's view of the request engine.
pub trait RequestEngine {
    /// Associates the engine with the connection's identifiers.
    fn bind(&mut self, connect_uid: u32, client_pid: u32);

    /// Handles the arguments of an `AUTH` line. `false` means the connection
    /// is beyond recovery and must be destroyed.
    fn auth_begin(&mut self, args: &str) -> bool;

    /// Handles the arguments of a `CONT` line, with the same contract as
    /// `auth_begin`.
    fn auth_continue(&mut self, args: &str) -> bool;

    /// Expires requests that have been pending for too long.
    fn check_timeouts(&mut self);

    /// Tears the engine down. Implementations must eventually invoke the
    /// reply callback with `EngineReply::EngineClosed` exactly once.
    fn release(self: Box<Self>);
}

/// Creates engines for newly handshaken connections.
pub trait EngineFactory {
    fn create(
        &self,
        reply: ReplyCallback,
        master_relay: Option<MasterRelay>,
    ) -> Box<dyn RequestEngine>;
}
