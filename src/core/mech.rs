// src/core/mech.rs

//! The catalogue of authentication mechanisms advertised to clients.
//!
//! A mechanism is a name, a set of security flags for the handshake blob
//! and a constructor for a per-request `Authenticator`. The only built-in mechanism is `ANONYMOUS`; anything that
//! verifies credentials is expected to be registered by the embedding service.

use crate::core::AuthError;
use bitflags::bitflags;
use bytes::Bytes;
use indexmap::IndexMap;
use std::fmt::Write;

bitflags! {
    /// Security properties of a mechanism, as advertised in `MECH` lines.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct MechSecurity: u32 {
        const PRIVATE = 1 << 0;
        const ANONYMOUS = 1 << 1;
        const PLAINTEXT = 1 << 2;
        const DICTIONARY = 1 << 3;
        const ACTIVE = 1 << 4;
        const FORWARD_SECRECY = 1 << 5;
        const MUTUAL_AUTH = 1 << 6;
    }
}

impl MechSecurity {
    /// Wire names in the order they appear on a `MECH` line.
    const WIRE_NAMES: [(MechSecurity, &'static str); 7] = [
        (MechSecurity::PRIVATE, "private"),
        (MechSecurity::ANONYMOUS, "anonymous"),
        (MechSecurity::PLAINTEXT, "plaintext"),
        (MechSecurity::DICTIONARY, "dictionary"),
        (MechSecurity::ACTIVE, "active"),
        (MechSecurity::FORWARD_SECRECY, "forward-secrecy"),
        (MechSecurity::MUTUAL_AUTH, "mutual-auth"),
    ];
}

/// The outcome of one authenticator step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthStep {
    /// Send a challenge to the client and wait for a `CONT`.
    Continue(String),
    /// Authentication succeeded for the given user.
    Success(String),
    /// Authentication failed; the string becomes the `reason=` field.
    Failure(String),
}

/// Per-request mechanism state.
pub trait Authenticator {
    /// Starts the exchange, optionally with the client's initial response.
    fn start(&mut self, initial_response: Option<&str>) -> AuthStep;
    /// Feeds one continuation from the client.
    fn step(&mut self, data: &str) -> AuthStep;
}

pub type AuthenticatorFactory = fn() -> Box<dyn Authenticator>;

#[derive(Clone)]
pub struct Mechanism {
    pub name: String,
    pub security: MechSecurity,
    pub factory: AuthenticatorFactory,
}

impl std::fmt::Debug for Mechanism {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Mechanism")
            .field("name", &self.name)
            .field("security", &self.security)
            .finish()
    }
}

/// `ANONYMOUS` (RFC 4505). The trace token is opaque and not inspected.
struct Anonymous;

impl Authenticator for Anonymous {
    fn start(&mut self, initial_response: Option<&str>) -> AuthStep {
        match initial_response {
            Some(_) => AuthStep::Success("anonymous".to_string()),
            None => AuthStep::Continue(String::new()),
        }
    }

    fn step(&mut self, _data: &str) -> AuthStep {
        AuthStep::Success("anonymous".to_string())
    }
}

fn anonymous() -> Box<dyn Authenticator> {
    Box::new(Anonymous)
}

/// An ordered set of enabled mechanisms, keyed by upper-case name.
#[derive(Debug, Clone, Default)]
pub struct MechanismSet {
    mechanisms: IndexMap<String, Mechanism>,
}

impl MechanismSet {
    /// Every mechanism this crate knows how to run.
    pub fn builtin() -> Self {
        let mut set = Self::default();
        set.register(Mechanism {
            name: "ANONYMOUS".to_string(),
            security: MechSecurity::ANONYMOUS,
            factory: anonymous,
        });
        set
    }

    /// Adds or replaces a mechanism.
    pub fn register(&mut self, mechanism: Mechanism) {
        self.mechanisms
            .insert(mechanism.name.to_ascii_uppercase(), mechanism);
    }

    /// Narrows this catalogue down to the named mechanisms, in the given
    /// order. Unknown names are an error.
    pub fn select<S: AsRef<str>>(&self, names: &[S]) -> Result<Self, AuthError> {
        let mut selected = Self::default();
        for name in names {
            let key = name.as_ref().to_ascii_uppercase();
            let mechanism = self
                .mechanisms
                .get(&key)
                .ok_or_else(|| AuthError::UnknownMechanism(name.as_ref().to_string()))?;
            selected.register(mechanism.clone());
        }
        Ok(selected)
    }

    pub fn get(&self, name: &str) -> Option<&Mechanism> {
        self.mechanisms.get(&name.to_ascii_uppercase())
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.mechanisms.values().map(|m| m.name.as_str())
    }

    pub fn len(&self) -> usize {
        self.mechanisms.len()
    }

    pub fn is_empty(&self) -> bool {
        self.mechanisms.is_empty()
    }

    /// Renders the capability blob sent at the start of every connection:
    /// one `MECH\t<name>[\t<flag>...]` line per mechanism.
    pub fn handshake(&self) -> Bytes {
        let mut blob = String::new();
        for mechanism in self.mechanisms.values() {
            blob.push_str("MECH\t");
            blob.push_str(&mechanism.name);
            for (flag, wire_name) in MechSecurity::WIRE_NAMES {
                if mechanism.security.contains(flag) {
                    let _ = write!(blob, "\t{wire_name}");
                }
            }
            blob.push('\n');
        }
        Bytes::from(blob)
    }
}
