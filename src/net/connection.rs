// SPDX-FileCopyrightText: 2026 PANGOLIN Project Team
// SPDX-License-Identifier: PMPL-1.0-or-later

//! Framed, non-blocking, buffered duplex connections
//!
//! A [`Connection`] owns one TCP stream for its whole lifetime. Reads are
//! drained non-blockingly into a [`RecordFramer`]; writes go through an
//! output buffer that is flushed opportunistically, so a slow peer never
//! blocks the owning event loop.

use std::io::ErrorKind;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};

use tokio::net::{TcpListener, TcpStream};
use tracing::{debug, warn};

use super::{frame_record, RecordFramer, Terminator};

/// Outcome of one [`Connection::recv`] call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Received {
    /// One or more complete records, in receipt order.
    Records(Vec<String>),
    /// The peer closed the stream in an orderly fashion (or errored).
    Closed,
}

/// A framed duplex byte stream over one TCP socket.
pub struct Connection {
    stream: TcpStream,
    peer: SocketAddr,
    framer: RecordFramer,
    terminator: Terminator,
    outbuf: Vec<u8>,
    closed: bool,
}

impl Connection {
    pub fn new(stream: TcpStream, terminator: Terminator) -> Self {
        let peer = stream.peer_addr().unwrap_or_else(|_| {
            SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), 0)
        });
        Connection {
            stream,
            peer,
            framer: RecordFramer::new(terminator),
            terminator,
            outbuf: Vec::new(),
            closed: false,
        }
    }

    /// Open an outbound connection.
    pub async fn connect(addr: SocketAddr, terminator: Terminator) -> std::io::Result<Self> {
        let stream = TcpStream::connect(addr).await?;
        Ok(Connection::new(stream, terminator))
    }

    pub fn peer(&self) -> SocketAddr {
        self.peer
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// Wait for and return the next batch of complete records.
    ///
    /// Returns [`Received::Closed`] exactly once the peer has shut down;
    /// every later call returns `Closed` immediately. Cancel-safe: bytes
    /// read before cancellation stay buffered in the framer.
    pub async fn recv(&mut self) -> Received {
        loop {
            let ready = self.framer.drain_records();
            if !ready.is_empty() {
                return Received::Records(ready);
            }
            if self.closed {
                return Received::Closed;
            }
            if let Err(e) = self.stream.readable().await {
                debug!("connection to {} lost: {}", self.peer, e);
                self.closed = true;
                return Received::Closed;
            }
            let mut chunk = [0u8; 4096];
            match self.stream.try_read(&mut chunk) {
                Ok(0) => {
                    self.closed = true;
                    return Received::Closed;
                }
                Ok(n) => self.framer.push(&chunk[..n]),
                Err(ref e) if e.kind() == ErrorKind::WouldBlock => continue,
                Err(e) => {
                    debug!("read error from {}: {}", self.peer, e);
                    self.closed = true;
                    return Received::Closed;
                }
            }
        }
    }

    /// Queue a record for sending and flush as much as the socket accepts.
    ///
    /// Writing to a closed connection is a no-op.
    pub fn send(&mut self, record: &str) {
        if self.closed {
            return;
        }
        frame_record(&mut self.outbuf, record, self.terminator);
        self.try_flush();
    }

    /// Queue raw bytes without a terminator (used for the control prompt).
    pub fn send_raw(&mut self, bytes: &[u8]) {
        if self.closed {
            return;
        }
        self.outbuf.extend_from_slice(bytes);
        self.try_flush();
    }

    /// Push buffered output to the socket without blocking.
    pub fn try_flush(&mut self) {
        while !self.outbuf.is_empty() {
            match self.stream.try_write(&self.outbuf) {
                Ok(0) => break,
                Ok(n) => {
                    self.outbuf.drain(..n);
                }
                Err(ref e) if e.kind() == ErrorKind::WouldBlock => break,
                Err(e) => {
                    debug!("write error to {}: {}", self.peer, e);
                    self.closed = true;
                    self.outbuf.clear();
                    break;
                }
            }
        }
    }

    pub fn has_pending_output(&self) -> bool {
        !self.outbuf.is_empty()
    }
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("peer", &self.peer)
            .field("closed", &self.closed)
            .field("pending_out", &self.outbuf.len())
            .finish()
    }
}

/// Accept one pending connection, logging failures instead of propagating
/// them: a bad accept never takes the daemon down.
pub async fn accept(listener: &TcpListener, terminator: Terminator) -> Option<Connection> {
    match listener.accept().await {
        Ok((stream, _)) => Some(Connection::new(stream, terminator)),
        Err(e) => {
            warn!("accept failed: {}", e);
            None
        }
    }
}
