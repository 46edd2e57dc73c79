// src/core/tasks/mod.rs

//! Long-running background tasks that support the listener.

pub mod request_sweep;
