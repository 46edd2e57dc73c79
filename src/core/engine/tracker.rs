// src/core/engine/tracker.rs

//! A request engine that keeps per-connection request bookkeeping and
//! delegates the actual exchange to the selected mechanism's authenticator.

use super::{EngineFactory, EngineReply, MasterRelay, ReplyCallback, RequestEngine};
use crate::core::mech::{AuthStep, Authenticator, MechanismSet};
use indexmap::IndexMap;
use std::rc::Rc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, error};

const REASON_UNSUPPORTED: &str = "Unsupported authentication mechanism";
const REASON_TIMEOUT: &str = "Authentication request timed out";

struct PendingRequest {
    mechanism: String,
    started: Instant,
    session: Box<dyn Authenticator>,
}

/// Tracks the outstanding `AUTH` requests of one client connection.
pub struct RequestTracker {
    reply: ReplyCallback,
    master_relay: Option<MasterRelay>,
    mechanisms: Rc<MechanismSet>,
    request_timeout: Duration,
    connect_uid: u32,
    client_pid: u32,
    requests: IndexMap<u32, PendingRequest>,
}

impl RequestTracker {
    pub fn new(
        reply: ReplyCallback,
        master_relay: Option<MasterRelay>,
        mechanisms: Rc<MechanismSet>,
        request_timeout: Duration,
    ) -> Self {
        Self {
            reply,
            master_relay,
            mechanisms,
            request_timeout,
            connect_uid: 0,
            client_pid: 0,
            requests: IndexMap::new(),
        }
    }

    /// Number of requests still waiting for a final `OK`/`FAIL`.
    pub fn pending_requests(&self) -> usize {
        self.requests.len()
    }

    /// Fails every request that started at least `request_timeout` before
    /// `now`, in the order the requests were made.
    pub fn check_timeouts_at(&mut self, now: Instant) {
        let expired: Vec<u32> = self
            .requests
            .iter()
            .filter(|(_, request)| {
                now.saturating_duration_since(request.started) >= self.request_timeout
            })
            .map(|(id, _)| *id)
            .collect();

        for id in expired {
            if let Some(request) = self.requests.shift_remove(&id) {
                debug!(
                    "Client {} request {} ({}) timed out.",
                    self.client_pid, id, request.mechanism
                );
            }
            self.send(format!("FAIL\t{id}\treason={REASON_TIMEOUT}"));
        }
    }

    fn send(&mut self, line: String) {
        (self.reply)(EngineReply::Reply(line));
    }

    fn apply_step(&mut self, id: u32, step: AuthStep) {
        match step {
            AuthStep::Continue(challenge) => {
                self.send(format!("CONT\t{id}\t{challenge}"));
            }
            AuthStep::Success(user) => {
                self.requests.shift_remove(&id);
                let line = format!("OK\t{id}\tuser={user}");
                if let Some(relay) = &self.master_relay {
                    relay(self.connect_uid, &line);
                }
                self.send(line);
            }
            AuthStep::Failure(reason) => {
                self.requests.shift_remove(&id);
                self.send(format!("FAIL\t{id}\treason={reason}"));
            }
        }
    }
}

impl RequestEngine for RequestTracker {
    fn bind(&mut self, connect_uid: u32, client_pid: u32) {
        self.connect_uid = connect_uid;
        self.client_pid = client_pid;
    }

    fn auth_begin(&mut self, args: &str) -> bool {
        let mut fields = args.split('\t');
        let id = fields.next().and_then(|f| f.parse::<u32>().ok());
        let mech_name = fields.next().filter(|m| !m.is_empty());
        let (Some(id), Some(mech_name)) = (id, mech_name) else {
            error!(
                "BUG: Authentication client {} sent broken AUTH request",
                self.client_pid
            );
            return false;
        };

        if self.requests.contains_key(&id) {
            error!(
                "BUG: Authentication client {} sent a duplicate ID {}",
                self.client_pid, id
            );
            return false;
        }

        let Some(mechanism) = self.mechanisms.get(mech_name) else {
            self.send(format!("FAIL\t{id}\treason={REASON_UNSUPPORTED}"));
            return true;
        };

        let initial_response = fields.find_map(|f| f.strip_prefix("resp="));
        let mut session = (mechanism.factory)();
        let step = session.start(initial_response);
        self.requests.insert(
            id,
            PendingRequest {
                mechanism: mechanism.name.clone(),
                started: Instant::now(),
                session,
            },
        );
        self.apply_step(id, step);
        true
    }

    fn auth_continue(&mut self, args: &str) -> bool {
        let parsed = args
            .split_once('\t')
            .and_then(|(id, data)| id.parse::<u32>().ok().map(|id| (id, data)));
        let Some((id, data)) = parsed else {
            error!(
                "BUG: Authentication client {} sent broken CONT request",
                self.client_pid
            );
            return false;
        };

        let Some(request) = self.requests.get_mut(&id) else {
            self.send(format!("FAIL\t{id}\treason={REASON_TIMEOUT}"));
            return true;
        };

        let step = request.session.step(data);
        self.apply_step(id, step);
        true
    }

    fn check_timeouts(&mut self) {
        self.check_timeouts_at(Instant::now());
    }

    fn release(self: Box<Self>) {
        let mut this = *self;
        if !this.requests.is_empty() {
            debug!(
                "Dropping {} pending requests of client {}.",
                this.requests.len(),
                this.client_pid
            );
        }
        this.requests.clear();
        (this.reply)(EngineReply::EngineClosed);
    }
}

/// Builds a `RequestTracker` for every connection that completes its
/// handshake.
pub struct TrackerFactory {
    mechanisms: Rc<MechanismSet>,
    request_timeout: Duration,
}

impl TrackerFactory {
    pub fn new(mechanisms: Rc<MechanismSet>, request_timeout: Duration) -> Self {
        Self {
            mechanisms,
            request_timeout,
        }
    }
}

impl EngineFactory for TrackerFactory {
    fn create(
        &self,
        reply: ReplyCallback,
        master_relay: Option<MasterRelay>,
    ) -> Box<dyn RequestEngine> {
        Box::new(RequestTracker::new(
            reply,
            master_relay,
            self.mechanisms.clone(),
            self.request_timeout,
        ))
    }
}
