// src/connection/mod.rs

//! Manages the lifecycle of a single auth client connection: the handshake,
//! command dispatch, reply backpressure and reference-counted teardown.

mod driver;
mod guard;
mod handler;
mod stream;

pub use driver::drive;
pub use guard::ConnectionGuard;
pub use handler::{ClientConnection, ConnectionState};
pub use stream::{LineInput, LineOutput, ReadStatus, Transport};
