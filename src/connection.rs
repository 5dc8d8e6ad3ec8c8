//! Per-connection transport state
//!
//! Owns the non-blocking socket, the inbound byte accumulator that frames
//! are reassembled from, and the queue of encoded bytes waiting to be
//! written.

use std::io::{self, Read, Write};
use std::net::{Shutdown, SocketAddr};

use bytes::{Buf, BytesMut};
use mio::net::TcpStream;
use tracing::debug;

use crate::codec::{decode_bounded, Decoded, Frame};
use crate::error::ProtocolError;
use crate::types::ConnectionId;

/// Largest single read from a socket
pub const READ_CHUNK: usize = 4096;

/// Connection lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Accepted, no successful connect-request yet
    Established,
    /// Holds a nickname in the client registry
    Authenticated,
    /// Closed; no further I/O
    Closed,
}

/// What a single read observed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadStatus {
    /// Bytes were appended; the socket may hold more
    Read(usize),
    /// Socket drained, peer still connected
    Drained,
    /// Peer closed its side
    Eof,
}

/// A live transport connection
#[derive(Debug)]
pub struct Connection {
    pub id: ConnectionId,
    pub peer: SocketAddr,
    pub state: ConnectionState,
    stream: TcpStream,
    inbound: BytesMut,
    outbound: BytesMut,
}

impl Connection {
    pub fn new(id: ConnectionId, stream: TcpStream, peer: SocketAddr) -> Self {
        Self {
            id,
            peer,
            state: ConnectionState::Established,
            stream,
            inbound: BytesMut::with_capacity(READ_CHUNK),
            outbound: BytesMut::new(),
        }
    }

    pub fn stream_mut(&mut self) -> &mut TcpStream {
        &mut self.stream
    }

    /// Read at most one chunk into the accumulator
    ///
    /// Readiness is edge-triggered: the caller keeps reading until
    /// `Drained` or `Eof`, or remembers the connection for a later pass.
    pub fn read_chunk(&mut self) -> io::Result<ReadStatus> {
        let mut chunk = [0u8; READ_CHUNK];
        loop {
            match self.stream.read(&mut chunk) {
                Ok(0) => return Ok(ReadStatus::Eof),
                Ok(n) => {
                    self.inbound.extend_from_slice(&chunk[..n]);
                    return Ok(ReadStatus::Read(n));
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => return Ok(ReadStatus::Drained),
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            }
        }
    }

    /// Bytes received but not yet decoded
    pub fn buffered(&self) -> usize {
        self.inbound.len()
    }

    /// Next complete frame from the accumulator, if one has arrived
    pub fn next_frame(&mut self, max_payload: usize) -> Result<Option<Frame>, ProtocolError> {
        match decode_bounded(&self.inbound, max_payload)? {
            Decoded::Frame { frame, consumed } => {
                self.inbound.advance(consumed);
                Ok(Some(frame))
            }
            Decoded::NeedMoreData => Ok(None),
        }
    }

    /// Append an encoded frame to the outbound queue
    pub fn queue(&mut self, bytes: &[u8]) {
        self.outbound.extend_from_slice(bytes);
    }

    /// Bytes queued but not yet written
    pub fn pending(&self) -> usize {
        self.outbound.len()
    }

    /// Write as much of the outbound queue as the socket accepts
    ///
    /// Whatever is left stays queued for the next writable event.
    pub fn flush(&mut self) -> io::Result<()> {
        while !self.outbound.is_empty() {
            match self.stream.write(&self.outbound) {
                Ok(0) => return Err(io::ErrorKind::WriteZero.into()),
                Ok(n) => self.outbound.advance(n),
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => break,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            }
        }
        Ok(())
    }

    /// Best-effort final flush, then shut the socket down
    pub fn close(&mut self) {
        if self.state == ConnectionState::Closed {
            return;
        }
        if let Err(e) = self.flush() {
            debug!("Final flush for {} failed: {}", self.id, e);
        }
        if self.pending() > 0 {
            debug!("{} closed with {} bytes unsent", self.id, self.pending());
        }
        if let Err(e) = self.stream.shutdown(Shutdown::Write) {
            debug!("Shutdown of {} failed: {}", self.id, e);
        }
        self.state = ConnectionState::Closed;
    }
}
