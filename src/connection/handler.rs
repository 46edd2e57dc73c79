// src/connection/handler.rs

//! Defines `ClientConnection`, the per-client state machine of the auth
//! socket: handshake, command dispatch to the request engine, reply
//! backpressure and the reference-counted teardown.

use super::guard::ConnectionGuard;
use super::stream::{LineInput, LineOutput, ReadStatus, Transport};
use crate::core::AuthError;
use crate::core::engine::{EngineReply, ReplyCallback, RequestEngine};
use crate::core::metrics;
use crate::core::protocol::{Command, SecretLine, handshake};
use crate::core::refcount::RefCount;
use crate::core::state::AuthListener;
use std::cell::{Cell, RefCell};
use std::fmt;
use std::rc::Rc;
use tokio::sync::Notify;
use tracing::{debug, error};
use zeroize::Zeroize;

/// Where a connection stands in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Waiting for the client's `VERSION` line.
    AwaitingVersion,
    /// Version accepted, waiting for `CPID`.
    AwaitingClientPid,
    /// Handshake complete, commands go to the request engine.
    Active,
    /// Destroyed. The storage may still be held by outstanding references.
    Closed,
}

struct ConnectionInner {
    listener: Rc<AuthListener>,
    connect_uid: u32,
    refcount: RefCount,
    /// `None` once the connection has been destroyed.
    socket: RefCell<Option<Rc<dyn Transport>>>,
    /// Both halves are dropped when the last reference goes away.
    input: RefCell<Option<LineInput>>,
    output: RefCell<Option<LineOutput>>,
    read_subscription: Cell<bool>,
    client_pid: Cell<u32>,
    version_received: Cell<bool>,
    request_handler: RefCell<Option<Box<dyn RequestEngine>>>,
    freed: Cell<bool>,
    wakeup: Notify,
}

/// A shared handle to one client connection.
///
/// Cloning the handle does not take a logical reference. The registry, the
/// bound request engine and any in-progress line batch each hold one on the
/// connection's `RefCount`; storage is released when the last of them lets
/// go, which may be well after `destroy`.
#[derive(Clone)]
pub struct ClientConnection {
    inner: Rc<ConnectionInner>,
}

impl ClientConnection {
    /// Wraps a freshly accepted socket, registers it with `listener` and
    /// sends the server handshake (the mechanism list followed by the
    /// `VERSION`/`SPID`/`CUID`/`DONE` block).
    ///
    /// If the handshake cannot be written the connection is destroyed
    /// again before this returns.
    pub fn create(
        listener: &Rc<AuthListener>,
        transport: Rc<dyn Transport>,
    ) -> Result<Self, AuthError> {
        let connect_uid = listener.next_connect_uid();
        let settings = listener.settings();
        let conn = Self {
            inner: Rc::new(ConnectionInner {
                listener: listener.clone(),
                connect_uid,
                refcount: RefCount::new(),
                input: RefCell::new(Some(LineInput::new(
                    transport.clone(),
                    settings.max_line_length,
                ))),
                output: RefCell::new(Some(LineOutput::new(transport.clone()))),
                socket: RefCell::new(Some(transport)),
                read_subscription: Cell::new(true),
                client_pid: Cell::new(0),
                version_received: Cell::new(false),
                request_handler: RefCell::new(None),
                freed: Cell::new(false),
                wakeup: Notify::new(),
            }),
        };
        listener.add(conn.clone());
        metrics::CONNECTIONS_ACCEPTED_TOTAL.inc();

        let greeting = handshake::server_greeting(listener.pid(), connect_uid);
        let sent = conn.with_output(|output| {
            output.send_vectored(&[listener.mech_handshake(), greeting.as_bytes()])
        });
        if let Err(e) = sent {
            debug!(
                "Failed to send handshake to client connection {}: {}",
                connect_uid, e
            );
            conn.destroy();
            return Err(e);
        }
        debug!("Client connection {} created.", connect_uid);
        Ok(conn)
    }

    pub fn connect_uid(&self) -> u32 {
        self.inner.connect_uid
    }

    /// The pid announced in `CPID`, or 0 before the handshake completes.
    pub fn client_pid(&self) -> u32 {
        self.inner.client_pid.get()
    }

    pub fn state(&self) -> ConnectionState {
        if self.is_closed() {
            ConnectionState::Closed
        } else if self.is_handshake_complete() {
            ConnectionState::Active
        } else if self.inner.version_received.get() {
            ConnectionState::AwaitingClientPid
        } else {
            ConnectionState::AwaitingVersion
        }
    }

    pub fn ref_count(&self) -> u32 {
        self.inner.refcount.get()
    }

    pub fn is_closed(&self) -> bool {
        self.inner.socket.borrow().is_none()
    }

    /// True once the last reference has been released.
    pub fn is_freed(&self) -> bool {
        self.inner.freed.get()
    }

    pub fn ptr_eq(&self, other: &ClientConnection) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }

    /// Whether the connection currently accepts input. Cleared while the
    /// output backlog is throttled and after `destroy`.
    pub fn wants_input(&self) -> bool {
        self.inner.read_subscription.get() && !self.is_closed()
    }

    /// Whether the output side has something for a writability callback to
    /// do: queued bytes, or a write error that has not been acted on yet.
    pub fn output_pending(&self) -> bool {
        self.inner
            .output
            .borrow()
            .as_ref()
            .is_some_and(|output| output.buffer_used() > 0 || output.has_failed())
    }

    /// Bytes of output waiting for the client to read them.
    pub fn output_backlog(&self) -> usize {
        self.inner
            .output
            .borrow()
            .as_ref()
            .map_or(0, LineOutput::buffer_used)
    }

    /// Signalled whenever the driver should re-evaluate the connection.
    pub fn wakeup(&self) -> &Notify {
        &self.inner.wakeup
    }

    /// Takes a logical reference for as long as the returned guard lives.
    pub fn hold(&self) -> ConnectionGuard {
        ConnectionGuard::new(self)
    }

    pub(crate) fn acquire(&self) {
        self.inner.refcount.acquire();
    }

    /// Readability callback: reads once and processes every complete line.
    pub fn on_readable(&self) {
        if !self.wants_input() {
            return;
        }
        let status = match self.inner.input.borrow_mut().as_mut() {
            Some(input) => input.read(),
            None => return,
        };
        match status {
            ReadStatus::Pending => {}
            ReadStatus::Eof => self.fail(AuthError::Disconnected),
            ReadStatus::BufferFull => self.fail(AuthError::LineTooLong {
                limit: self.inner.listener.settings().max_line_length,
            }),
            ReadStatus::Data(_) => self.process_input(),
        }
    }

    /// Processes every complete line already buffered, without reading.
    pub fn process_input(&self) {
        if self.is_closed() {
            return;
        }

        while !self.is_handshake_complete() {
            let Some(line) = self.next_line() else {
                return;
            };
            if self.inner.listener.settings().verbose_debug {
                debug!("client in: {}", line.as_str());
            }
            if let Err(e) = self.handle_handshake_line(&line) {
                self.fail(e);
                return;
            }
        }

        // Keeps the storage alive even if a command destroys the connection
        // halfway through the batch.
        let _batch = self.hold();
        while let Some(mut line) = self.next_line() {
            let keep_going = self.handle_line(&line);
            line.zeroize();
            if !keep_going {
                self.destroy();
                break;
            }
        }
    }

    /// Writability callback: flushes the backlog and lifts the read throttle
    /// once at most a third of the high-water mark is left.
    pub fn on_writable(&self) {
        let flushed = match self.inner.output.borrow_mut().as_mut() {
            Some(output) => output.flush().map(|()| output.buffer_used()),
            None => return,
        };
        match flushed {
            Err(e) => {
                debug!(
                    "Client connection {} output failed: {}",
                    self.inner.connect_uid, e
                );
                self.destroy();
            }
            Ok(backlog) => self.update_read_subscription(backlog),
        }
    }

    /// Tears the connection down. Idempotent.
    ///
    /// Unregisters, closes both streams, stops input and releases the bound
    /// engine, then drops the registry's reference. The storage survives
    /// until every other holder has released theirs.
    pub fn destroy(&self) {
        let Some(socket) = self.inner.socket.borrow_mut().take() else {
            return;
        };
        self.inner.listener.remove(self);

        if let Some(input) = self.inner.input.borrow_mut().as_mut() {
            input.close();
        }
        if let Some(output) = self.inner.output.borrow_mut().as_mut() {
            output.close();
        }
        self.inner.read_subscription.set(false);
        drop(socket);
        self.inner.wakeup.notify_one();
        debug!(
            "Client connection {} (pid {}) destroyed.",
            self.inner.connect_uid,
            self.client_pid()
        );

        let engine = self.inner.request_handler.borrow_mut().take();
        if let Some(engine) = engine {
            engine.release();
        }
        self.unref();
    }

    /// Drops one logical reference, freeing the streams on the last one.
    pub(crate) fn unref(&self) {
        if !self.inner.refcount.release() {
            return;
        }
        if !self.is_closed() {
            error!(
                "BUG: client connection {} lost its last reference while still open",
                self.inner.connect_uid
            );
        }
        let input = self.inner.input.borrow_mut().take();
        let output = self.inner.output.borrow_mut().take();
        drop(input);
        drop(output);
        self.inner.freed.set(true);
        debug!("Client connection {} freed.", self.inner.connect_uid);
    }

    /// Runs one timeout check on the bound engine. Returns `false` when no
    /// engine is bound.
    pub(crate) fn check_timeouts(&self) -> bool {
        let Ok(mut handler) = self.inner.request_handler.try_borrow_mut() else {
            return false;
        };
        match handler.as_mut() {
            Some(engine) => {
                engine.check_timeouts();
                true
            }
            None => false,
        }
    }

    fn is_handshake_complete(&self) -> bool {
        self.inner.client_pid.get() != 0
    }

    fn next_line(&self) -> Option<SecretLine> {
        self.inner
            .input
            .borrow_mut()
            .as_mut()
            .and_then(LineInput::next_line)
    }

    fn with_output<R>(
        &self,
        f: impl FnOnce(&mut LineOutput) -> Result<R, AuthError>,
    ) -> Result<R, AuthError> {
        match self.inner.output.borrow_mut().as_mut() {
            Some(output) => f(output),
            None => Err(AuthError::StreamClosed),
        }
    }

    fn handle_handshake_line(&self, line: &str) -> Result<(), AuthError> {
        if !self.inner.version_received.get() {
            handshake::check_version(line)?;
            self.inner.version_received.set(true);
            return Ok(());
        }
        // Anything other than CPID is ignored until the handshake is done.
        if let Some(args) = handshake::cpid_args(line) {
            self.handle_cpid(args)?;
        }
        Ok(())
    }

    fn handle_cpid(&self, args: &str) -> Result<(), AuthError> {
        let pid = handshake::parse_client_pid(args)?;

        if let Some(old) = self.inner.listener.lookup(pid) {
            // The previous holder of this pid may have died without us
            // noticing yet.
            if !old.reclaim_if_disconnected() {
                return Err(AuthError::DuplicatePid(pid));
            }
        }

        self.bind_engine(pid);
        Ok(())
    }

    fn bind_engine(&self, pid: u32) {
        // Held by the engine until it reports `EngineClosed`.
        self.acquire();
        let conn = self.clone();
        let reply: ReplyCallback = Box::new(move |reply| conn.on_engine_reply(reply));

        let listener = &self.inner.listener;
        let mut engine = listener.engines().create(reply, listener.master_relay());
        engine.bind(self.inner.connect_uid, pid);
        *self.inner.request_handler.borrow_mut() = Some(engine);
        self.inner.client_pid.set(pid);
        debug!(
            "Client connection {} completed handshake as pid {}.",
            self.inner.connect_uid, pid
        );
    }

    /// Checks whether a connection claiming a pid is actually dead, with one
    /// non-blocking read. A read that hits end of stream destroys the old
    /// connection and frees the pid; data that arrives is kept buffered for
    /// that connection's next callback.
    ///
    /// This only sees a hang-up the socket has already reported. A peer that
    /// disconnected a moment ago can still look alive here.
    fn reclaim_if_disconnected(&self) -> bool {
        let status = self
            .inner
            .input
            .borrow_mut()
            .as_mut()
            .map(LineInput::read);
        match status {
            Some(ReadStatus::Eof) => {
                debug!(
                    "Client connection {} (pid {}) is gone, reclaiming its pid.",
                    self.inner.connect_uid,
                    self.client_pid()
                );
                self.destroy();
                true
            }
            Some(ReadStatus::Data(_)) => {
                self.inner.wakeup.notify_one();
                false
            }
            _ => false,
        }
    }

    fn handle_line(&self, line: &str) -> bool {
        if self.inner.listener.settings().verbose_debug {
            debug!("client in: {}", line);
        }
        let command = Command::parse(line);
        metrics::COMMANDS_TOTAL
            .with_label_values(&[command.name()])
            .inc();

        let mut handler = self.inner.request_handler.borrow_mut();
        let Some(engine) = handler.as_mut() else {
            return true;
        };
        match command {
            Command::Auth(args) => engine.auth_begin(args),
            Command::Cont(args) => engine.auth_continue(args),
            Command::Unknown => true,
        }
    }

    fn on_engine_reply(&self, reply: EngineReply) {
        match reply {
            EngineReply::EngineClosed => self.unref(),
            EngineReply::Reply(text) => self.send_reply(&text),
        }
    }

    /// Queues one reply line. Write failures are left for the next
    /// writability callback to act on, since this may run from inside the
    /// engine.
    fn send_reply(&self, text: &str) {
        if self.inner.listener.settings().verbose_debug {
            debug!("client out: {}", text);
        }
        let backlog = {
            let mut slot = self.inner.output.borrow_mut();
            let Some(output) = slot.as_mut() else {
                return;
            };
            if let Err(e) = output.send_line(text) {
                debug!(
                    "Client connection {} reply not written: {}",
                    self.inner.connect_uid, e
                );
            }
            output.buffer_used()
        };

        // Sending flushes too, so the backlog may have shrunk as well as grown.
        self.update_read_subscription(backlog);
        self.inner.wakeup.notify_one();
    }

    /// Pauses input at the high-water mark and resumes it once the backlog
    /// is down to a third of that.
    fn update_read_subscription(&self, backlog: usize) {
        if self.is_closed() {
            return;
        }
        let settings = self.inner.listener.settings();
        let subscribed = self.inner.read_subscription.get();
        if subscribed && backlog >= settings.output_throttle {
            self.inner.read_subscription.set(false);
            metrics::OUTPUT_THROTTLED_TOTAL.inc();
            debug!(
                "Client connection {} has {} bytes of unread replies, pausing input.",
                self.inner.connect_uid, backlog
            );
        } else if !subscribed && backlog <= settings.resume_threshold() {
            self.inner.read_subscription.set(true);
            debug!(
                "Client connection {} drained to {} bytes, resuming input.",
                self.inner.connect_uid, backlog
            );
            self.inner.wakeup.notify_one();
        }
    }

    fn fail(&self, err: AuthError) {
        match &err {
            AuthError::Disconnected => {}
            AuthError::LineTooLong { limit } => error!(
                "BUG: Auth client {} sent us more than {} bytes",
                self.client_pid(),
                limit
            ),
            AuthError::ZeroPid | AuthError::DuplicatePid(_) => error!("BUG: {}", err),
            e if e.is_protocol_violation() => error!("{}", e),
            e => debug!(
                "Client connection {} failed: {}",
                self.inner.connect_uid, e
            ),
        }
        if err.is_protocol_violation() {
            metrics::PROTOCOL_ERRORS_TOTAL
                .with_label_values(&[err.kind()])
                .inc();
        }
        self.destroy();
    }
}

impl fmt::Debug for ClientConnection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientConnection")
            .field("connect_uid", &self.inner.connect_uid)
            .field("client_pid", &self.client_pid())
            .field("state", &self.state())
            .field("refcount", &self.inner.refcount.get())
            .finish()
    }
}
