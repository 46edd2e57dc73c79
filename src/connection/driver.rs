// src/connection/driver.rs

//! The async task that connects a `ClientConnection` to socket readiness.

use super::handler::ClientConnection;
use std::rc::Rc;
use tokio::net::UnixStream;
use tracing::debug;

/// Runs until the connection is destroyed, turning socket readiness into
/// `on_readable`/`on_writable` callbacks.
///
/// Reads are only polled while the connection wants input, writes only while
/// it has output pending. Any state change made outside this task (a reply
/// from a timer, a throttle being lifted, a destroy) arrives through the
/// connection's wakeup.
pub async fn drive(conn: ClientConnection, socket: Rc<UnixStream>) {
    while !conn.is_closed() {
        let want_read = conn.wants_input();
        let want_write = conn.output_pending();

        tokio::select! {
            biased;
            _ = conn.wakeup().notified() => conn.process_input(),
            ready = socket.writable(), if want_write => match ready {
                Ok(()) => conn.on_writable(),
                Err(e) => {
                    debug!("Client connection {} socket error: {}", conn.connect_uid(), e);
                    conn.destroy();
                }
            },
            ready = socket.readable(), if want_read => match ready {
                Ok(()) => conn.on_readable(),
                Err(e) => {
                    debug!("Client connection {} socket error: {}", conn.connect_uid(), e);
                    conn.destroy();
                }
            },
        }
    }
    debug!("Driver for client connection {} finished.", conn.connect_uid());
}
