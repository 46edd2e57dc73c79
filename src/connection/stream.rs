// src/connection/stream.rs

//! The line stream pair a client connection reads from and writes to.
//!
//! Both halves sit on top of a non-blocking `Transport`. Neither half ever
//! waits: reads and writes move whatever the socket will take right now and
//! report the rest, and the connection driver decides when to try again.

use crate::core::AuthError;
use crate::core::protocol::{AuthLineCodec, SecretLine};
use bytes::{Buf, BytesMut};
use std::io::{self, ErrorKind};
use std::rc::Rc;
use tokio_util::codec::{Decoder, Encoder};
use zeroize::{Zeroize, Zeroizing};

const READ_CHUNK: usize = 4096;

/// A non-blocking byte socket.
///
/// `try_read` returning `Ok(0)` means end of stream; `WouldBlock` means no
/// data is available yet. Dropping the last handle closes the socket.
pub trait Transport {
    fn try_read(&self, buf: &mut [u8]) -> io::Result<usize>;
    fn try_write(&self, buf: &[u8]) -> io::Result<usize>;
}

impl Transport for tokio::net::UnixStream {
    fn try_read(&self, buf: &mut [u8]) -> io::Result<usize> {
        tokio::net::UnixStream::try_read(self, buf)
    }

    fn try_write(&self, buf: &[u8]) -> io::Result<usize> {
        tokio::net::UnixStream::try_write(self, buf)
    }
}

/// Result of a single read attempt on a `LineInput`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadStatus {
    /// This many new bytes were buffered.
    Data(usize),
    /// Nothing available right now.
    Pending,
    /// The peer is gone (or the stream was closed locally).
    Eof,
    /// The buffer holds `max_line_length` bytes without a line terminator.
    BufferFull,
}

/// The readable half: buffers raw input and cuts it into lines.
pub struct LineInput {
    transport: Option<Rc<dyn Transport>>,
    buffer: BytesMut,
    codec: AuthLineCodec,
    max_line_length: usize,
}

impl LineInput {
    pub fn new(transport: Rc<dyn Transport>, max_line_length: usize) -> Self {
        Self {
            transport: Some(transport),
            buffer: BytesMut::with_capacity(READ_CHUNK.min(max_line_length)),
            codec: AuthLineCodec,
            max_line_length,
        }
    }

    /// Performs one read from the transport into the line buffer.
    pub fn read(&mut self) -> ReadStatus {
        let Some(transport) = self.transport.as_ref() else {
            return ReadStatus::Eof;
        };
        let room = self.max_line_length.saturating_sub(self.buffer.len());
        if room == 0 {
            return ReadStatus::BufferFull;
        }

        let mut chunk = Zeroizing::new(vec![0u8; room.min(READ_CHUNK)]);
        match transport.try_read(&mut chunk) {
            Ok(0) => ReadStatus::Eof,
            Ok(n) => {
                self.buffer.extend_from_slice(&chunk[..n]);
                ReadStatus::Data(n)
            }
            Err(e) if matches!(e.kind(), ErrorKind::WouldBlock | ErrorKind::Interrupted) => {
                ReadStatus::Pending
            }
            Err(e) => {
                tracing::debug!("Read error on client socket: {}", e);
                ReadStatus::Eof
            }
        }
    }

    /// Returns the next complete buffered line, if any.
    pub fn next_line(&mut self) -> Option<SecretLine> {
        // The codec is infallible for decoding; a missing line is `Ok(None)`.
        self.codec.decode(&mut self.buffer).ok().flatten()
    }

    /// Bytes buffered but not yet returned as lines.
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    /// Detaches from the transport and wipes any partial input.
    pub fn close(&mut self) {
        self.transport = None;
        self.buffer[..].zeroize();
        self.buffer.clear();
    }

    pub fn is_closed(&self) -> bool {
        self.transport.is_none()
    }
}

impl Drop for LineInput {
    fn drop(&mut self) {
        self.buffer[..].zeroize();
    }
}

/// The writable half: queues outgoing bytes and pushes them to the
/// transport as far as it will accept them.
pub struct LineOutput {
    transport: Option<Rc<dyn Transport>>,
    pending: BytesMut,
    codec: AuthLineCodec,
    error: Option<AuthError>,
}

impl LineOutput {
    pub fn new(transport: Rc<dyn Transport>) -> Self {
        Self {
            transport: Some(transport),
            pending: BytesMut::new(),
            codec: AuthLineCodec,
            error: None,
        }
    }

    /// Queues all parts back to back as one write, then tries to send them.
    pub fn send_vectored(&mut self, parts: &[&[u8]]) -> Result<(), AuthError> {
        self.ensure_writable()?;
        for part in parts {
            self.pending.extend_from_slice(part);
        }
        self.flush()
    }

    /// Queues `text` plus a newline, then tries to send it.
    pub fn send_line(&mut self, text: &str) -> Result<(), AuthError> {
        self.ensure_writable()?;
        self.codec.encode(text, &mut self.pending)?;
        self.flush()
    }

    /// Writes as much of the backlog as the transport accepts without
    /// blocking. A write error is sticky: every later flush reports it too.
    pub fn flush(&mut self) -> Result<(), AuthError> {
        if let Some(err) = &self.error {
            return Err(err.clone());
        }
        let Some(transport) = self.transport.as_ref() else {
            return Err(AuthError::StreamClosed);
        };

        while !self.pending.is_empty() {
            match transport.try_write(&self.pending) {
                Ok(0) => {
                    let err = AuthError::Disconnected;
                    self.error = Some(err.clone());
                    return Err(err);
                }
                Ok(n) => self.pending.advance(n),
                Err(e) if e.kind() == ErrorKind::WouldBlock => break,
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => {
                    let err = AuthError::from(e);
                    self.error = Some(err.clone());
                    return Err(err);
                }
            }
        }
        Ok(())
    }

    /// Bytes queued but not yet accepted by the transport.
    pub fn buffer_used(&self) -> usize {
        self.pending.len()
    }

    /// Detaches from the transport and discards the backlog.
    pub fn close(&mut self) {
        self.transport = None;
        self.pending.clear();
    }

    pub fn is_closed(&self) -> bool {
        self.transport.is_none()
    }

    /// True once a write has failed; the next flush will report it.
    pub fn has_failed(&self) -> bool {
        self.error.is_some()
    }

    fn ensure_writable(&self) -> Result<(), AuthError> {
        if let Some(err) = &self.error {
            return Err(err.clone());
        }
        if self.transport.is_none() {
            return Err(AuthError::StreamClosed);
        }
        Ok(())
    }
}
