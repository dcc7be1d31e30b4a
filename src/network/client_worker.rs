//! Client Worker
//!
//! Runs inside the client's background process and bridges one connection
//! to the caller's two channels:
//!
//! ```text
//!  caller ──outbound──▶ forwarding thread ──crossbeam + Waker──▶ event loop ──▶ socket
//!  caller ◀──inbound─── inbound pump ◀──────crossbeam────────── event loop ◀── socket
//! ```
//!
//! The forwarding thread blocks on the outbound channel outside the event
//! loop, so it hands messages over through a channel and wakes the loop.
//! End of the inbound channel is the sentinel telling the caller that no
//! further messages will arrive.

use std::io::{self, BufReader};
use std::net::Shutdown;
use std::os::unix::net::UnixStream;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Instant;

use crossbeam::channel::{self, Receiver, Sender, TryRecvError};
use mio::net::TcpStream;
use mio::{Events, Poll, Token, Waker};

use super::connection::{Connection, Recv};
use crate::config::ClientConfig;
use crate::error::Result;
use crate::process::SharedFlag;
use crate::protocol::{read_message, write_message, Message};

const CONNECTION: Token = Token(0);
const WAKER: Token = Token(1);
const EVENTS_CAPACITY: usize = 64;

/// Why the event loop ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Exit {
    /// Stop flag set, or the caller closed its outbound end
    Stop,
    /// Breakup detected on the connection
    Lost,
}

/// Bridge between one TCP connection and the caller's channels
pub struct ClientWorker {
    poll: Poll,
    waker: Arc<Waker>,
    conn: Connection,
    inbound: UnixStream,
    outbound: UnixStream,
    stop: Arc<SharedFlag>,
    lost: Arc<SharedFlag>,
    config: ClientConfig,
}

impl ClientWorker {
    /// Wrap an inherited, connected socket
    ///
    /// `inbound` is the worker's write end of the worker → caller channel,
    /// `outbound` its read end of the caller → worker channel. `lost` is set
    /// when the connection breaks so the caller can fail sends right away.
    pub fn new(
        stream: std::net::TcpStream,
        inbound: UnixStream,
        outbound: UnixStream,
        stop: Arc<SharedFlag>,
        lost: Arc<SharedFlag>,
        config: ClientConfig,
    ) -> Result<Self> {
        let peer_addr = stream.peer_addr()?;
        stream.set_nonblocking(true)?;

        let poll = Poll::new()?;
        let mut conn = Connection::new(CONNECTION.0, TcpStream::from_std(stream), peer_addr);
        conn.register(poll.registry())?;
        let waker = Arc::new(Waker::new(poll.registry(), WAKER)?);

        Ok(Self {
            poll,
            waker,
            conn,
            inbound,
            outbound,
            stop,
            lost,
            config,
        })
    }

    /// Bridge until the connection breaks or the stop flag is set
    pub fn run(mut self) -> Result<()> {
        let (out_tx, out_rx) = match self.config.outbound_capacity {
            Some(capacity) => channel::bounded(capacity),
            None => channel::unbounded(),
        };
        let (in_tx, in_rx) = channel::unbounded();

        spawn_forwarder(self.outbound.try_clone()?, out_tx, Arc::clone(&self.waker))?;
        let pump = spawn_pump(self.inbound.try_clone()?, in_rx)?;

        tracing::debug!("Client worker bridging {}", self.conn.addr());

        match self.serve(&out_rx, &in_tx)? {
            Exit::Lost => {
                tracing::info!("Connection to {} lost", self.conn.addr());
                self.lost.set();
                // Closing the inbound channel is the sentinel
                drop(in_tx);
                if pump.join().is_err() {
                    tracing::warn!("Inbound pump panicked");
                }
            }
            Exit::Stop => {
                drop(out_rx);
                drop(in_tx);
                self.close_gracefully()?;
            }
        }

        Ok(())
    }

    fn serve(&mut self, out_rx: &Receiver<Message>, in_tx: &Sender<Message>) -> Result<Exit> {
        let mut events = Events::with_capacity(EVENTS_CAPACITY);

        loop {
            if self.stop.is_set() {
                return Ok(Exit::Stop);
            }

            if let Err(e) = self
                .poll
                .poll(&mut events, Some(self.config.stop_poll_interval))
            {
                if e.kind() == io::ErrorKind::Interrupted {
                    continue;
                }
                return Err(e.into());
            }

            let mut caller_gone = false;
            for event in events.iter() {
                match event.token() {
                    WAKER => caller_gone |= !self.forward_outbound(out_rx),
                    _ => self.deliver_inbound(in_tx),
                }
            }

            self.conn.flush();
            if !self.conn.is_active() {
                return Ok(Exit::Lost);
            }
            if caller_gone {
                tracing::debug!("Outbound channel closed by caller");
                return Ok(Exit::Stop);
            }
        }
    }

    /// Move queued caller messages onto the connection; false once the
    /// caller side has closed and everything it sent was forwarded
    fn forward_outbound(&mut self, out_rx: &Receiver<Message>) -> bool {
        loop {
            match out_rx.try_recv() {
                Ok(msg) => self.conn.send(&msg),
                Err(TryRecvError::Empty) => return true,
                Err(TryRecvError::Disconnected) => return false,
            }
        }
    }

    fn deliver_inbound(&mut self, in_tx: &Sender<Message>) {
        while let Recv::Message(msg) = self.conn.recv() {
            if in_tx.send(msg).is_err() {
                tracing::trace!("Inbound pump gone, dropping message");
            }
        }
    }

    /// Manual shutdown; messages still queued by the caller are discarded
    fn close_gracefully(&mut self) -> Result<()> {
        self.conn.shutdown();
        self.conn.flush();

        let mut events = Events::with_capacity(EVENTS_CAPACITY);
        let deadline = Instant::now() + self.config.graceful_shutdown_timeout;
        while !self.conn.is_closed() {
            let now = Instant::now();
            if now >= deadline {
                tracing::warn!("Connection to {} did not close in time", self.conn.addr());
                self.conn.force_close();
                break;
            }

            let timeout = (deadline - now).min(self.config.stop_poll_interval);
            if let Err(e) = self.poll.poll(&mut events, Some(timeout)) {
                if e.kind() == io::ErrorKind::Interrupted {
                    continue;
                }
                return Err(e.into());
            }
            self.conn.flush();
        }

        self.conn.deregister(self.poll.registry());
        tracing::debug!("Client worker stopped");
        Ok(())
    }
}

/// Blocking reads from the caller, handed to the event loop
fn spawn_forwarder(
    outbound: UnixStream,
    out_tx: Sender<Message>,
    waker: Arc<Waker>,
) -> io::Result<JoinHandle<()>> {
    thread::Builder::new()
        .name("netframe-outbound".to_string())
        .spawn(move || {
            let mut reader = BufReader::new(outbound);
            loop {
                let msg = match read_message(&mut reader) {
                    Ok(msg) => msg,
                    Err(e) => {
                        tracing::trace!("Outbound channel ended: {}", e);
                        break;
                    }
                };
                if out_tx.send(msg).is_err() {
                    return;
                }
                if let Err(e) = waker.wake() {
                    tracing::warn!("Failed to wake event loop: {}", e);
                }
            }

            drop(out_tx);
            let _ = waker.wake();
        })
}

/// Writes received messages to the caller; half-closes when the sender drops
fn spawn_pump(mut inbound: UnixStream, in_rx: Receiver<Message>) -> io::Result<JoinHandle<()>> {
    thread::Builder::new()
        .name("netframe-inbound".to_string())
        .spawn(move || {
            for msg in in_rx.iter() {
                if let Err(e) = write_message(&mut inbound, &msg) {
                    tracing::debug!("Inbound channel closed by caller: {}", e);
                    return;
                }
            }
            let _ = inbound.shutdown(Shutdown::Write);
        })
}
