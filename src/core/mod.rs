// src/core/mod.rs

//! The central module containing the protocol, request engine and listener
//! state of the auth client service.

pub mod engine;
pub mod errors;
pub mod mech;
pub mod metrics;
pub mod protocol;
pub mod refcount;
pub mod state;
pub mod tasks;

pub use errors::AuthError;
