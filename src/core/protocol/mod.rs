// src/core/protocol/mod.rs

//! Wire format of the auth-client protocol: line framing, the handshake and
//! post-handshake commands.

pub mod command;
pub mod handshake;
pub mod line_codec;

pub use command::Command;
pub use line_codec::{AuthLineCodec, SecretLine};
