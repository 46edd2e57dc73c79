// src/core/state/listener.rs

//! Defines `AuthListener`, the registry that owns every live client
//! connection accepted on one socket.

use crate::connection::ClientConnection;
use crate::core::engine::{EngineFactory, MasterRelay};
use crate::core::metrics;
use crate::core::protocol::handshake::DEFAULT_MAX_LINE_LENGTH;
use crate::core::tasks::request_sweep::RequestSweepTask;
use bytes::Bytes;
use indexmap::IndexMap;
use std::cell::{Cell, RefCell};
use std::rc::Rc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Output backlog at which a connection stops reading new commands.
pub const OUTBUF_THROTTLE_SIZE: usize = 1024 * 50;

/// Period of the request timeout sweep.
pub const REQUEST_SWEEP_INTERVAL: Duration = Duration::from_millis(5000);

/// Per-connection limits shared by every connection of a listener.
#[derive(Debug, Clone)]
pub struct ConnectionSettings {
    /// Longest input line a client may send, terminator included.
    pub max_line_length: usize,
    /// High-water mark for the output backlog, in bytes.
    pub output_throttle: usize,
    /// Log every protocol line in both directions.
    pub verbose_debug: bool,
}

impl ConnectionSettings {
    /// Backlog at or below which a throttled connection resumes reading.
    pub fn resume_threshold(&self) -> usize {
        self.output_throttle / 3
    }
}

impl Default for ConnectionSettings {
    fn default() -> Self {
        Self {
            max_line_length: DEFAULT_MAX_LINE_LENGTH,
            output_throttle: OUTBUF_THROTTLE_SIZE,
            verbose_debug: false,
        }
    }
}

/// The set of master processes this service is connected to. Only its size
/// and a relay entry point matter to client connections.
pub trait MasterPeers {
    fn peer_count(&self) -> usize;
    fn relay(&self, connect_uid: u32, reply: &str);
}

/// Owns the client connections of one listening socket.
///
/// Connections are kept in insertion order, keyed by their `connect_uid`.
/// Everything here runs on a single thread; scans that may end up destroying
/// connections always work on a snapshot of the set.
pub struct AuthListener {
    pid: u32,
    settings: ConnectionSettings,
    mech_handshake: Bytes,
    engines: Box<dyn EngineFactory>,
    masters: Option<Rc<dyn MasterPeers>>,
    clients: RefCell<IndexMap<u32, ClientConnection>>,
    next_connect_uid: Cell<u32>,
    sweep_interval: Duration,
    sweep: RefCell<Option<JoinHandle<()>>>,
}

impl AuthListener {
    /// Creates a listener. `pid` is announced to clients as `SPID`, and
    /// `mech_handshake` is sent verbatim at the start of every connection.
    pub fn new(
        pid: u32,
        settings: ConnectionSettings,
        mech_handshake: Bytes,
        engines: Box<dyn EngineFactory>,
    ) -> Self {
        Self {
            pid,
            settings,
            mech_handshake,
            engines,
            masters: None,
            clients: RefCell::new(IndexMap::new()),
            next_connect_uid: Cell::new(1),
            sweep_interval: REQUEST_SWEEP_INTERVAL,
            sweep: RefCell::new(None),
        }
    }

    pub fn with_master_peers(mut self, masters: Rc<dyn MasterPeers>) -> Self {
        self.masters = Some(masters);
        self
    }

    pub fn with_sweep_interval(mut self, interval: Duration) -> Self {
        self.sweep_interval = interval;
        self
    }

    pub fn pid(&self) -> u32 {
        self.pid
    }

    pub fn settings(&self) -> &ConnectionSettings {
        &self.settings
    }

    pub fn mech_handshake(&self) -> &[u8] {
        &self.mech_handshake
    }

    pub(crate) fn engines(&self) -> &dyn EngineFactory {
        self.engines.as_ref()
    }

    /// Hands out connection ids. Zero is never used.
    pub(crate) fn next_connect_uid(&self) -> u32 {
        let uid = self.next_connect_uid.get();
        self.next_connect_uid.set(uid.checked_add(1).unwrap_or(1));
        uid
    }

    pub(crate) fn add(&self, conn: ClientConnection) {
        self.clients.borrow_mut().insert(conn.connect_uid(), conn);
        metrics::CONNECTED_CLIENTS.inc();
    }

    /// Removes `conn` by identity. Returns `false` if it was not registered.
    pub(crate) fn remove(&self, conn: &ClientConnection) -> bool {
        let mut clients = self.clients.borrow_mut();
        let registered = clients
            .get(&conn.connect_uid())
            .is_some_and(|existing| existing.ptr_eq(conn));
        if registered {
            clients.shift_remove(&conn.connect_uid());
            metrics::CONNECTED_CLIENTS.dec();
        }
        registered
    }

    /// Finds the live connection that claimed `pid` during its handshake.
    pub fn lookup(&self, pid: u32) -> Option<ClientConnection> {
        self.clients
            .borrow()
            .values()
            .find(|conn| conn.client_pid() == pid)
            .cloned()
    }

    pub fn contains(&self, conn: &ClientConnection) -> bool {
        self.clients
            .borrow()
            .get(&conn.connect_uid())
            .is_some_and(|existing| existing.ptr_eq(conn))
    }

    pub fn len(&self) -> usize {
        self.clients.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.clients.borrow().is_empty()
    }

    /// A snapshot of the registered connections, in insertion order.
    pub fn clients(&self) -> Vec<ClientConnection> {
        self.clients.borrow().values().cloned().collect()
    }

    pub fn has_master_peers(&self) -> bool {
        self.masters
            .as_ref()
            .is_some_and(|masters| masters.peer_count() != 0)
    }

    /// The relay callback for a newly bound engine, present only while at
    /// least one master peer exists.
    pub(crate) fn master_relay(&self) -> Option<MasterRelay> {
        if !self.has_master_peers() {
            return None;
        }
        let masters = self.masters.clone()?;
        Some(Rc::new(move |connect_uid: u32, reply: &str| {
            masters.relay(connect_uid, reply)
        }))
    }

    /// Runs one timeout check on every connection that has a bound engine.
    /// Returns how many engines were checked.
    pub fn check_timeouts(&self) -> usize {
        let checked = self
            .clients()
            .iter()
            .filter(|conn| conn.check_timeouts())
            .count();
        metrics::REQUEST_SWEEPS_TOTAL.inc();
        checked
    }

    /// Starts the periodic request timeout sweep on the current `LocalSet`.
    /// Calling it again while the sweep runs has no effect.
    pub fn start_sweep(self: &Rc<Self>) {
        let mut sweep = self.sweep.borrow_mut();
        if sweep.is_some() {
            warn!("Request timeout sweep is already running.");
            return;
        }
        let task = RequestSweepTask::new(Rc::downgrade(self), self.sweep_interval);
        *sweep = Some(tokio::task::spawn_local(task.run()));
        info!(
            "Request timeout sweep started (every {:?}).",
            self.sweep_interval
        );
    }

    /// Cancels the sweep. Safe to call when it was never started; returns
    /// whether a running sweep was stopped.
    pub fn stop_sweep(&self) -> bool {
        match self.sweep.borrow_mut().take() {
            Some(handle) => {
                handle.abort();
                debug!("Request timeout sweep stopped.");
                true
            }
            None => false,
        }
    }

    pub fn is_sweeping(&self) -> bool {
        self.sweep.borrow().is_some()
    }

    /// Stops the sweep and destroys every registered connection.
    pub fn shutdown(&self) {
        self.stop_sweep();
        let clients = self.clients();
        if !clients.is_empty() {
            info!("Closing {} client connections.", clients.len());
        }
        for conn in clients {
            conn.destroy();
        }
    }
}

impl Drop for AuthListener {
    fn drop(&mut self) {
        if let Some(handle) = self.sweep.get_mut().take() {
            handle.abort();
        }
    }
}
