// src/core/protocol/command.rs

//! Post-handshake command selection.

/// A client command, borrowed from the line it was parsed from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command<'a> {
    /// `AUTH\t<args>`: start a new authentication request.
    Auth(&'a str),
    /// `CONT\t<args>`: continue an outstanding request.
    Cont(&'a str),
    /// Anything else. Ignored so newer clients can talk to older servers.
    Unknown,
}

impl<'a> Command<'a> {
    pub fn parse(line: &'a str) -> Self {
        if let Some(args) = line.strip_prefix("AUTH\t") {
            Command::Auth(args)
        } else if let Some(args) = line.strip_prefix("CONT\t") {
            Command::Cont(args)
        } else {
            Command::Unknown
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Command::Auth(_) => "auth",
            Command::Cont(_) => "cont",
            Command::Unknown => "unknown",
        }
    }
}
