// src/core/protocol/handshake.rs

//! Constants and line parsers for the connection handshake.

use crate::core::AuthError;

/// Clients must speak exactly this major version.
pub const PROTOCOL_MAJOR_VERSION: u32 = 1;
/// Advertised minor version; never enforced on the client's side.
pub const PROTOCOL_MINOR_VERSION: u32 = 0;

/// Default limit for one buffered input line.
pub const DEFAULT_MAX_LINE_LENGTH: usize = 8192;

const VERSION_PREFIX: &str = "VERSION\t";
const CPID_PREFIX: &str = "CPID\t";

/// Renders the fixed part of the server's greeting. The mechanism blob is
/// sent in front of this in the same scatter-write.
pub fn server_greeting(listener_pid: u32, connect_uid: u32) -> String {
    format!(
        "VERSION\t{PROTOCOL_MAJOR_VERSION}\t{PROTOCOL_MINOR_VERSION}\n\
         SPID\t{listener_pid}\n\
         CUID\t{connect_uid}\n\
         DONE\n"
    )
}

/// Checks the client's first line: `VERSION\t<major>[\t<minor>...]`.
pub fn check_version(line: &str) -> Result<(), AuthError> {
    let major = line
        .strip_prefix(VERSION_PREFIX)
        .and_then(|rest| rest.split('\t').next())
        .and_then(leading_number);

    match major {
        Some(PROTOCOL_MAJOR_VERSION) => Ok(()),
        _ => Err(AuthError::IncompatibleVersion),
    }
}

/// Returns the argument part of a `CPID` line, or `None` for any other
/// handshake line (those are ignored for forward compatibility).
pub fn cpid_args(line: &str) -> Option<&str> {
    line.strip_prefix(CPID_PREFIX)
}

/// Parses the pid the way `strtoul` would: leading whitespace and a `+`
/// sign are skipped, then leading decimal digits are read and anything after
/// them ignored. An empty, non-numeric, negative or overflowing value yields
/// an error, as does an explicit zero.
pub fn parse_client_pid(args: &str) -> Result<u32, AuthError> {
    match leading_number(args) {
        Some(0) | None => Err(AuthError::ZeroPid),
        Some(pid) => Ok(pid),
    }
}

/// Reads the decimal number at the start of `field`, C style.
fn leading_number(field: &str) -> Option<u32> {
    let trimmed = field.trim_start_matches(|c: char| c.is_ascii_whitespace());
    let unsigned = trimmed.strip_prefix('+').unwrap_or(trimmed);
    let digits_end = unsigned
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(unsigned.len());
    unsigned[..digits_end].parse().ok()
}
