//! Connection Handler
//!
//! Manages one non-blocking TCP stream on a worker's event loop.
//!
//! ## Shutdown
//! ```text
//!            shutdown()                 queue empty              EOF / error
//! Active ───────────────▶ Flushing ─────────────────▶ Draining ─────────────▶ Closed
//!    │                    (sends       shutdown(Write)  (inbound discarded)      ▲
//!    │                     complete)                                              │
//!    └────────────────────────── read/write fault (breakup) ─────────────────────┘
//! ```
//!
//! A manual shutdown never drops a frame that was queued before it. The half
//! close followed by the drain keeps the kernel from answering unread inbound
//! bytes with a reset that would discard our unacknowledged outbound bytes.

use std::collections::VecDeque;
use std::io::{self, Read, Write};
use std::net::{Shutdown, SocketAddr};
use std::time::{Duration, Instant};

use bytes::{Buf, Bytes, BytesMut};
use mio::net::TcpStream;
use mio::{Interest, Registry, Token};

use crate::protocol::{try_decode, Message};

/// Identifies a connection within one worker
pub type ConnectionId = usize;

/// Size of a single socket read
const READ_CHUNK_SIZE: usize = 64 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Active,
    Flushing,
    Draining,
    Closed,
}

/// Outcome of asking a connection for its next frame
#[derive(Debug)]
pub(crate) enum Recv {
    /// A complete frame
    Message(Message),
    /// No complete frame yet, or the connection is no longer receiving
    Pending,
    /// The peer or the network broke the connection
    Broken,
}

/// A framed TCP connection owned by a single worker
pub struct Connection {
    id: ConnectionId,
    stream: TcpStream,
    peer_addr: SocketAddr,
    state: State,
    /// Closed by a fault while still active
    broken: bool,
    /// Peer's EOF has been read
    eof: bool,
    read_buf: BytesMut,
    /// Reused for every socket read
    scratch: Box<[u8]>,
    outbound: VecDeque<Bytes>,
    /// Set once the write half is closed and the drain begins
    drain_started: Option<Instant>,
}

impl Connection {
    /// Wrap a non-blocking stream
    pub(crate) fn new(id: ConnectionId, stream: TcpStream, peer_addr: SocketAddr) -> Self {
        // Disable Nagle's algorithm, frames are usually small
        if let Err(e) = stream.set_nodelay(true) {
            tracing::debug!("Failed to set TCP_NODELAY on {}: {}", peer_addr, e);
        }

        Self {
            id,
            stream,
            peer_addr,
            state: State::Active,
            broken: false,
            eof: false,
            read_buf: BytesMut::with_capacity(READ_CHUNK_SIZE),
            scratch: vec![0u8; READ_CHUNK_SIZE].into_boxed_slice(),
            outbound: VecDeque::new(),
            drain_started: None,
        }
    }

    /// Register for read and write readiness under the connection's id
    pub(crate) fn register(&mut self, registry: &Registry) -> io::Result<()> {
        registry.register(
            &mut self.stream,
            Token(self.id),
            Interest::READABLE | Interest::WRITABLE,
        )
    }

    pub(crate) fn deregister(&mut self, registry: &Registry) {
        if let Err(e) = registry.deregister(&mut self.stream) {
            tracing::trace!("Deregister of connection {} failed: {}", self.id, e);
        }
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    /// Address of the remote peer
    pub fn addr(&self) -> SocketAddr {
        self.peer_addr
    }

    /// False once either shutdown path has started
    pub fn is_active(&self) -> bool {
        self.state == State::Active
    }

    /// Frames queued but not yet fully written
    pub fn pending_sends(&self) -> usize {
        self.outbound.len()
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.state == State::Closed
    }

    pub(crate) fn is_broken(&self) -> bool {
        self.broken
    }

    /// Time spent waiting for the peer's EOF after the half-close
    ///
    /// `None` while queued sends are still being flushed.
    pub(crate) fn drain_elapsed(&self) -> Option<Duration> {
        self.drain_started.map(|started| started.elapsed())
    }

    /// Queue a message; written in call order by `flush`
    ///
    /// Ignored once the connection is shutting down.
    pub fn send(&mut self, message: &Message) {
        if !self.is_active() {
            tracing::trace!("Dropping send on inactive connection {}", self.id);
            return;
        }
        self.outbound.push_back(message.pack());
    }

    /// Start a manual shutdown
    ///
    /// Stops receiving immediately. Frames already queued are still written,
    /// then the write half is closed and inbound data is drained to EOF.
    pub fn shutdown(&mut self) {
        if !self.is_active() {
            return;
        }

        tracing::debug!(
            "Shutting down connection {} ({}) with {} pending sends",
            self.id,
            self.peer_addr,
            self.outbound.len()
        );
        self.state = State::Flushing;
        self.read_buf.clear();
    }

    /// Close immediately without the half-close handshake
    pub(crate) fn force_close(&mut self) {
        if self.state != State::Closed {
            tracing::debug!("Force closing connection {} ({})", self.id, self.peer_addr);
            self.outbound.clear();
            self.read_buf.clear();
            self.state = State::Closed;
        }
    }

    /// Breakup: drop everything pending and close
    fn fail(&mut self) {
        if self.state == State::Active {
            self.broken = true;
        }
        self.outbound.clear();
        self.read_buf.clear();
        self.state = State::Closed;
    }

    /// Next complete inbound frame
    pub(crate) fn recv(&mut self) -> Recv {
        if !self.is_active() {
            return Recv::Pending;
        }

        loop {
            if let Some(message) = try_decode(&mut self.read_buf) {
                return Recv::Message(message);
            }

            if self.eof {
                tracing::debug!(
                    "Connection {} ({}) closed by peer with {} unread bytes",
                    self.id,
                    self.peer_addr,
                    self.read_buf.len()
                );
                self.fail();
                return Recv::Broken;
            }

            match self.fill_read_buffer() {
                Ok(true) => continue,
                Ok(false) => return Recv::Pending,
                Err(e) => {
                    tracing::debug!("Read from {} failed: {}", self.peer_addr, e);
                    self.fail();
                    return Recv::Broken;
                }
            }
        }
    }

    /// Read one chunk into the buffer; false when the socket has nothing more
    fn fill_read_buffer(&mut self) -> io::Result<bool> {
        loop {
            match self.stream.read(&mut self.scratch) {
                Ok(0) => {
                    self.eof = true;
                    return Ok(true);
                }
                Ok(n) => {
                    self.read_buf.extend_from_slice(&self.scratch[..n]);
                    return Ok(true);
                }
                Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => return Ok(false),
                Err(ref e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            }
        }
    }

    /// Make write-side progress and advance the shutdown sequence
    pub(crate) fn flush(&mut self) {
        loop {
            match self.state {
                State::Active | State::Flushing => {
                    match self.write_pending() {
                        Ok(()) => {}
                        Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => return,
                        Err(e) => {
                            tracing::debug!("Write to {} failed: {}", self.peer_addr, e);
                            self.fail();
                            return;
                        }
                    }

                    if self.state == State::Active {
                        return;
                    }

                    if let Err(e) = self.stream.shutdown(Shutdown::Write) {
                        tracing::debug!("Half-close of {} failed: {}", self.peer_addr, e);
                        self.state = State::Closed;
                        return;
                    }
                    self.state = State::Draining;
                    self.drain_started = Some(Instant::now());
                }
                State::Draining => {
                    self.drain();
                    return;
                }
                State::Closed => return,
            }
        }
    }

    fn write_pending(&mut self) -> io::Result<()> {
        while let Some(front) = self.outbound.front_mut() {
            match self.stream.write(front) {
                Ok(0) => return Err(io::ErrorKind::WriteZero.into()),
                Ok(n) => {
                    front.advance(n);
                    if front.is_empty() {
                        self.outbound.pop_front();
                    }
                }
                Err(ref e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            }
        }
        Ok(())
    }

    /// Discard inbound bytes until EOF or error, then mark closed
    fn drain(&mut self) {
        loop {
            match self.stream.read(&mut self.scratch) {
                Ok(0) => break,
                Ok(_) => continue,
                Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => return,
                Err(ref e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    tracing::trace!("Drain of {} ended with: {}", self.peer_addr, e);
                    break;
                }
            }
        }
        tracing::debug!("Connection {} ({}) closed", self.id, self.peer_addr);
        self.state = State::Closed;
    }
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.id)
            .field("peer_addr", &self.peer_addr)
            .field("state", &self.state)
            .field("pending_sends", &self.outbound.len())
            .finish()
    }
}
