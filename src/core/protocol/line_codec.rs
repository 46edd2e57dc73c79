// src/core/protocol/line_codec.rs

//! Implements the newline-delimited line framing of the auth-client protocol
//! as a `tokio_util::codec` `Encoder`/`Decoder` pair.
//!
//! Decoded lines may carry credentials (initial responses, continuation
//! data), so they are handed out as `SecretLine`s and the raw bytes they were
//! cut from are zeroed before the buffer space is reused.

use crate::core::AuthError;
use bytes::{BufMut, BytesMut};
use tokio_util::codec::{Decoder, Encoder};
use zeroize::{Zeroize, Zeroizing};

/// The line terminator used in both directions.
pub const LF: u8 = b'\n';
const CR: u8 = b'\r';

/// One decoded input line, without its terminator. The contents are wiped
/// when the value is dropped.
pub type SecretLine = Zeroizing<String>;

/// Stateless codec for tab-separated, `\n`-terminated protocol lines.
#[derive(Debug, Default, Clone, Copy)]
pub struct AuthLineCodec;

impl Decoder for AuthLineCodec {
    type Item = SecretLine;
    type Error = AuthError;

    /// Cuts the next complete line off the front of `src`. A trailing `\r`
    /// is tolerated and stripped. Returns `Ok(None)` when no full line is
    /// buffered yet, leaving the partial line in place for the next read.
    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        let Some(pos) = src.iter().position(|b| *b == LF) else {
            return Ok(None);
        };

        let mut raw = src.split_to(pos + 1);
        let mut end = pos;
        if end > 0 && raw[end - 1] == CR {
            end -= 1;
        }

        let line = String::from_utf8_lossy(&raw[..end]).into_owned();
        raw[..].zeroize();
        Ok(Some(Zeroizing::new(line)))
    }
}

impl Encoder<&str> for AuthLineCodec {
    type Error = AuthError;

    /// Appends `item` verbatim followed by a single `\n`.
    fn encode(&mut self, item: &str, dst: &mut BytesMut) -> Result<(), Self::Error> {
        dst.reserve(item.len() + 1);
        dst.put_slice(item.as_bytes());
        dst.put_u8(LF);
        Ok(())
    }
}
