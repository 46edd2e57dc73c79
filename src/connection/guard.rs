// src/connection/guard.rs

//! Defines `ConnectionGuard`, an RAII hold on a client connection's
//! reference count.

use super::handler::ClientConnection;

/// Holds one logical reference on a `ClientConnection` and releases it when
/// dropped, so a connection destroyed while the guard lives is only freed
/// once the guard's scope is exited.
pub struct ConnectionGuard {
    conn: ClientConnection,
}

impl ConnectionGuard {
    pub(crate) fn new(conn: &ClientConnection) -> Self {
        conn.acquire();
        Self { conn: conn.clone() }
    }

    pub fn connection(&self) -> &ClientConnection {
        &self.conn
    }
}

impl Drop for ConnectionGuard {
    fn drop(&mut self) {
        self.conn.unref();
    }
}
