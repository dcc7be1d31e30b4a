//! TCP Client
//!
//! Blocking `send`/`recv` in the caller's process while the socket is driven
//! by a forked [`ClientWorker`]. The two processes talk over a pair of Unix
//! socket channels using the regular frame format.

use std::io::{self, Read};
use std::net::{SocketAddr, TcpStream};
use std::os::unix::io::AsRawFd;
use std::os::unix::net::UnixStream;
use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::BytesMut;

use crate::config::ClientConfig;
use crate::error::{NetframeError, Result};
use crate::network::ClientWorker;
use crate::process::{SharedFlag, WorkerProcess};
use crate::protocol::{try_decode, write_message, Message};

const READ_CHUNK_SIZE: usize = 64 * 1024;

enum State {
    Idle,
    Connected(Box<Link>),
    ShutDown,
}

/// Caller-side ends of a live worker
struct Link {
    worker: WorkerProcess,
    peer_addr: SocketAddr,
    /// Caller → worker; `None` once closed
    outbound: Option<UnixStream>,
    /// Worker → caller
    inbound: UnixStream,
    read_buf: BytesMut,
    /// Reused for every channel read
    scratch: Box<[u8]>,
    read_closed: bool,
    stop: Arc<SharedFlag>,
    lost: Arc<SharedFlag>,
}

/// Client with a background I/O process
pub struct Client {
    config: ClientConfig,
    state: State,
}

impl Client {
    pub fn new() -> Self {
        Self::with_config(ClientConfig::default())
    }

    pub fn with_config(config: ClientConfig) -> Self {
        Self {
            config,
            state: State::Idle,
        }
    }

    /// Connect, then hand the socket to a freshly forked worker
    ///
    /// Connection failures are returned here, before any worker exists.
    /// A client that was shut down may connect again.
    pub fn connect(&mut self, addr: &str, port: u16) -> Result<()> {
        if matches!(self.state, State::Connected(_)) {
            return Err(NetframeError::AlreadyConnected);
        }

        let stream = TcpStream::connect((addr, port)).map_err(|e| {
            tracing::error!("Failed to connect to {}:{}: {}", addr, port, e);
            e
        })?;
        let peer_addr = stream.peer_addr()?;

        let (inbound, inbound_worker) = UnixStream::pair()?;
        let (outbound, outbound_worker) = UnixStream::pair()?;
        let stop = Arc::new(SharedFlag::new()?);
        let lost = Arc::new(SharedFlag::new()?);

        let caller_fds = [inbound.as_raw_fd(), outbound.as_raw_fd()];
        let worker = {
            let stop = Arc::clone(&stop);
            let lost = Arc::clone(&lost);
            let config = self.config.clone();
            WorkerProcess::spawn(move || {
                // The caller's ends must not stay open in the worker, or
                // neither side would ever see the other close.
                for fd in caller_fds {
                    // SAFETY: these descriptors are owned by objects the
                    // child never uses or drops.
                    unsafe {
                        libc::close(fd);
                    }
                }
                ClientWorker::new(stream, inbound_worker, outbound_worker, stop, lost, config)?
                    .run()
            })?
        };
        // The socket and the worker's channel ends were moved into the
        // closure and are closed in this process by now.

        tracing::debug!("Connected to {} (worker {})", peer_addr, worker.pid());
        self.state = State::Connected(Box::new(Link {
            worker,
            peer_addr,
            outbound: Some(outbound),
            inbound,
            read_buf: BytesMut::with_capacity(READ_CHUNK_SIZE),
            scratch: vec![0u8; READ_CHUNK_SIZE].into_boxed_slice(),
            read_closed: false,
            stop,
            lost,
        }));
        Ok(())
    }

    /// Queue a message for sending
    ///
    /// Fails with `ConnectionLost` once the connection broke.
    pub fn send(&mut self, msg: &Message) -> Result<()> {
        self.link_mut()?.send(msg)
    }

    /// Wait for the next message
    ///
    /// `None` blocks indefinitely and a zero timeout only looks at what has
    /// already arrived. Returns `Timeout` if nothing arrived in time, and `ConnectionLost` (now and on every later call) once the
    /// worker signalled that no more messages will arrive.
    pub fn recv(&mut self, timeout: Option<Duration>) -> Result<Message> {
        self.link_mut()?.recv(timeout)
    }

    /// Close the channels, stop the worker and wait for it
    ///
    /// The worker is killed if it is still alive after `timeout`.
    pub fn shutdown(&mut self, timeout: Option<Duration>) -> Result<()> {
        match std::mem::replace(&mut self.state, State::ShutDown) {
            State::Connected(link) => (*link).close(timeout),
            State::Idle => {
                self.state = State::Idle;
                Err(NetframeError::NotConnected)
            }
            State::ShutDown => Err(NetframeError::AlreadyShutDown),
        }
    }

    pub fn is_connected(&self) -> bool {
        matches!(self.state, State::Connected(_))
    }

    pub fn peer_addr(&self) -> Option<SocketAddr> {
        match &self.state {
            State::Connected(link) => Some(link.peer_addr),
            _ => None,
        }
    }

    fn link_mut(&mut self) -> Result<&mut Link> {
        match &mut self.state {
            State::Connected(link) => Ok(&mut **link),
            State::Idle => Err(NetframeError::NotConnected),
            State::ShutDown => Err(NetframeError::AlreadyShutDown),
        }
    }
}

impl Default for Client {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for Client {
    fn drop(&mut self) {
        if self.is_connected() {
            let budget = self.config.graceful_shutdown_timeout + self.config.stop_poll_interval;
            if let Err(e) = self.shutdown(Some(budget)) {
                tracing::warn!("Failed to shut down client on drop: {}", e);
            }
        }
    }
}

impl Link {
    fn send(&mut self, msg: &Message) -> Result<()> {
        if self.lost.is_set() {
            self.outbound = None;
        }
        let outbound = self.outbound.as_mut().ok_or(NetframeError::ConnectionLost)?;

        if let Err(e) = write_message(outbound, msg) {
            tracing::debug!("Outbound channel closed: {}", e);
            self.outbound = None;
            return Err(NetframeError::ConnectionLost);
        }
        Ok(())
    }

    fn recv(&mut self, timeout: Option<Duration>) -> Result<Message> {
        let deadline = timeout.map(|t| Instant::now() + t);

        loop {
            // Frames that arrived before the sentinel are still delivered
            if let Some(msg) = try_decode(&mut self.read_buf) {
                return Ok(msg);
            }
            if self.read_closed {
                return Err(NetframeError::ConnectionLost);
            }

            // A spent deadline still reads whatever is already queued
            match deadline.map(|d| d.saturating_duration_since(Instant::now())) {
                Some(wait) if wait.is_zero() => self.inbound.set_nonblocking(true)?,
                wait => {
                    self.inbound.set_nonblocking(false)?;
                    self.inbound.set_read_timeout(wait)?;
                }
            }

            match self.inbound.read(&mut self.scratch) {
                Ok(0) => self.read_closed = true,
                Ok(n) => self.read_buf.extend_from_slice(&self.scratch[..n]),
                Err(ref e)
                    if e.kind() == io::ErrorKind::WouldBlock
                        || e.kind() == io::ErrorKind::TimedOut =>
                {
                    return Err(NetframeError::Timeout);
                }
                Err(ref e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    tracing::debug!("Inbound channel failed: {}", e);
                    self.read_closed = true;
                }
            }
        }
    }

    fn close(self, timeout: Option<Duration>) -> Result<()> {
        let Link {
            mut worker,
            outbound,
            inbound,
            stop,
            ..
        } = self;

        drop(outbound);
        drop(inbound);
        stop.set();

        if !worker.join(timeout)? {
            tracing::warn!("Client worker {} did not exit in time", worker.pid());
            worker.kill()?;
        }
        tracing::debug!("Client shut down");
        Ok(())
    }
}
