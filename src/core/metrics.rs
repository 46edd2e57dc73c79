// src/core/metrics.rs

//! Defines and registers Prometheus metrics for server monitoring.
//!
//! This module uses `lazy_static` to ensure that metrics are registered only once
//! globally for the entire application lifecycle.

use lazy_static::lazy_static;
use prometheus::{
    Counter, CounterVec, Gauge, TextEncoder, register_counter, register_counter_vec,
    register_gauge,
};

lazy_static! {
    /// The number of client connections currently registered with the listener.
    pub static ref CONNECTED_CLIENTS: Gauge =
        register_gauge!("authgate_connected_clients", "Number of currently registered client connections.").unwrap();

    /// The total number of connections accepted since startup.
    pub static ref CONNECTIONS_ACCEPTED_TOTAL: Counter =
        register_counter!("authgate_connections_accepted_total", "Total number of client connections accepted.").unwrap();
    /// Connections dropped for breaking the protocol, labeled by error kind.
    pub static ref PROTOCOL_ERRORS_TOTAL: CounterVec =
        register_counter_vec!("authgate_protocol_errors_total", "Total number of connections destroyed for protocol violations.", &["kind"]).unwrap();
    /// Post-handshake lines seen, labeled by command.
    pub static ref COMMANDS_TOTAL: CounterVec =
        register_counter_vec!("authgate_commands_total", "Total number of post-handshake command lines processed.", &["command"]).unwrap();
    /// How often a connection stopped reading because its output backlog was too large.
    pub static ref OUTPUT_THROTTLED_TOTAL: Counter =
        register_counter!("authgate_output_throttled_total", "Total number of times input was paused due to output backlog.").unwrap();
    /// Completed runs of the request timeout sweep.
    pub static ref REQUEST_SWEEPS_TOTAL: Counter =
        register_counter!("authgate_request_sweeps_total", "Total number of request timeout sweeps.").unwrap();
}

/// Gathers all registered metrics and encodes them in the Prometheus text format.
pub fn gather_metrics() -> String {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    encoder
        .encode_to_string(&metric_families)
        .unwrap_or_else(|e| format!("# failed to encode metrics: {e}\n"))
}
