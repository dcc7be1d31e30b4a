//! Server Worker
//!
//! One worker process: a single-threaded mio event loop accepting from the
//! listen socket it inherited and driving every connection it accepted.
//! Sibling workers accept from the same socket; the kernel decides which
//! one receives each new connection.
//!
//! The registry is a plain map. Only this loop touches it, so it needs no lock.

use std::collections::HashMap;
use std::io;
use std::net::SocketAddr;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::time::Instant;

use mio::net::{TcpListener, TcpStream};
use mio::{Events, Interest, Poll, Token};

use super::connection::{Connection, ConnectionId, Recv};
use crate::app::{CallbackResult, OwnedMessage, ServerApp};
use crate::config::Config;
use crate::error::Result;
use crate::process::SharedFlag;

const LISTENER: Token = Token(usize::MAX);
const EVENTS_CAPACITY: usize = 1024;

/// Accept loop and connection owner for one worker process
pub struct ServerWorker<A: ServerApp> {
    poll: Poll,
    listener: Option<TcpListener>,
    /// Accepted connections, each notified exactly once on disconnect
    connections: HashMap<Token, Connection>,
    /// Rejected or shut down connections finishing their close sequence
    closing: HashMap<Token, Connection>,
    next_id: ConnectionId,
    app: A,
    config: Config,
    stop: Arc<SharedFlag>,
}

impl<A: ServerApp> ServerWorker<A> {
    /// Set up the event loop around an inherited listen socket
    pub fn new(
        listener: std::net::TcpListener,
        app: A,
        config: Config,
        stop: Arc<SharedFlag>,
    ) -> Result<Self> {
        listener.set_nonblocking(true)?;
        let mut listener = TcpListener::from_std(listener);

        let poll = Poll::new()?;
        poll.registry()
            .register(&mut listener, LISTENER, Interest::READABLE)?;

        Ok(Self {
            poll,
            listener: Some(listener),
            connections: HashMap::new(),
            closing: HashMap::new(),
            next_id: 0,
            app,
            config,
            stop,
        })
    }

    /// Number of accepted, still registered connections
    pub fn connection_count(&self) -> usize {
        self.connections.len()
    }

    /// Serve until the stop flag is set, then shut down gracefully
    pub fn run(mut self) -> Result<()> {
        let mut events = Events::with_capacity(EVENTS_CAPACITY);

        if let Some(listener) = &self.listener {
            tracing::info!("Worker accepting on {}", listener.local_addr()?);
        }

        // The poll timeout is the stop flag check interval
        while !self.stop.is_set() {
            if let Err(e) = self
                .poll
                .poll(&mut events, Some(self.config.stop_poll_interval))
            {
                if e.kind() == io::ErrorKind::Interrupted {
                    continue;
                }
                return Err(e.into());
            }

            for event in events.iter() {
                match event.token() {
                    LISTENER => self.accept_connections(),
                    token => self.drive(token),
                }
            }

            self.expire_drains();
        }

        self.shutdown(&mut events)
    }

    // =========================================================================
    // Accepting
    // =========================================================================

    fn accept_connections(&mut self) {
        loop {
            let Some(listener) = &self.listener else {
                return;
            };

            match listener.accept() {
                Ok((stream, addr)) => self.process_new_connection(stream, addr),
                Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => return,
                Err(ref e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    tracing::warn!("Accept failed: {}", e);
                    return;
                }
            }
        }
    }

    fn process_new_connection(&mut self, stream: TcpStream, addr: SocketAddr) {
        let id = self.next_id;
        self.next_id += 1;
        let token = Token(id);

        let mut conn = Connection::new(id, stream, addr);

        // Registered before the app sees it, so every connect the app accepts
        // is paired with a disconnect
        if let Err(e) = conn.register(self.poll.registry()) {
            tracing::warn!("Failed to register connection from {}: {}", addr, e);
            return;
        }
        tracing::debug!("Connection {} established from {}", id, addr);

        let app = &mut self.app;
        let ctx = &self.config.context;
        let accepted = invoke("on_client_connect", || app.on_client_connect(&mut conn, ctx))
            .unwrap_or(false);

        if accepted {
            self.connections.insert(token, conn);
            self.drive(token);
        } else {
            tracing::debug!("Connection {} from {} rejected", id, addr);
            conn.shutdown();
            self.closing.insert(token, conn);
            self.drive_closing(token);
        }
    }

    // =========================================================================
    // Connection events
    // =========================================================================

    fn drive(&mut self, token: Token) {
        if self.closing.contains_key(&token) {
            self.drive_closing(token);
            return;
        }

        let Some(conn) = self.connections.get_mut(&token) else {
            return;
        };

        let app = &mut self.app;
        let ctx = &self.config.context;
        while conn.is_active() {
            match conn.recv() {
                Recv::Message(msg) => {
                    let owned = OwnedMessage {
                        owner: &mut *conn,
                        msg,
                    };
                    invoke("on_message", || app.on_message(owned, ctx));
                }
                Recv::Pending | Recv::Broken => break,
            }
        }

        conn.flush();
        if !conn.is_active() {
            self.process_disconnect(token);
        }
    }

    /// Unregister a connection that stopped being active and notify the app
    fn process_disconnect(&mut self, token: Token) {
        let Some(mut conn) = self.connections.remove(&token) else {
            return;
        };

        tracing::debug!(
            "Connection {} ({}) disconnected{}",
            conn.id(),
            conn.addr(),
            if conn.is_broken() { " by peer" } else { "" }
        );

        let app = &mut self.app;
        let ctx = &self.config.context;
        invoke("on_client_disconnect", || app.on_client_disconnect(&conn, ctx));

        if conn.is_closed() {
            conn.deregister(self.poll.registry());
        } else {
            self.closing.insert(token, conn);
        }
    }

    fn drive_closing(&mut self, token: Token) {
        let closed = match self.closing.get_mut(&token) {
            Some(conn) => {
                conn.flush();
                conn.is_closed()
            }
            None => return,
        };

        if closed {
            if let Some(mut conn) = self.closing.remove(&token) {
                conn.deregister(self.poll.registry());
            }
        }
    }

    /// Force close connections whose peer never answered the half-close
    ///
    /// Only the drain is timed. A connection still flushing queued sends to
    /// a slow reader is left alone until the stop grace period runs out.
    fn expire_drains(&mut self) {
        let drain_timeout = self.config.drain_timeout;
        let expired: Vec<Token> = self
            .closing
            .iter()
            .filter(|(_, conn)| conn.drain_elapsed().map_or(false, |e| e >= drain_timeout))
            .map(|(token, _)| *token)
            .collect();

        for token in expired {
            if let Some(mut conn) = self.closing.remove(&token) {
                conn.force_close();
                conn.deregister(self.poll.registry());
            }
        }
    }

    // =========================================================================
    // Stop protocol
    // =========================================================================

    fn shutdown(mut self, events: &mut Events) -> Result<()> {
        tracing::info!(
            "Stop requested, shutting down {} connections",
            self.connections.len()
        );

        if let Some(mut listener) = self.listener.take() {
            if let Err(e) = self.poll.registry().deregister(&mut listener) {
                tracing::trace!("Deregister of listener failed: {}", e);
            }
        }

        let tokens: Vec<Token> = self.connections.keys().copied().collect();
        for token in tokens {
            if let Some(conn) = self.connections.get_mut(&token) {
                conn.shutdown();
                conn.flush();
            }
            self.process_disconnect(token);
        }

        let deadline = Instant::now() + self.config.graceful_shutdown_timeout;
        while !self.closing.is_empty() {
            let now = Instant::now();
            if now >= deadline {
                tracing::warn!(
                    "{} connections still closing after the grace period",
                    self.closing.len()
                );
                break;
            }

            let timeout = (deadline - now).min(self.config.stop_poll_interval);
            if let Err(e) = self.poll.poll(events, Some(timeout)) {
                if e.kind() == io::ErrorKind::Interrupted {
                    continue;
                }
                return Err(e.into());
            }

            for event in events.iter() {
                self.drive_closing(event.token());
            }
            self.expire_drains();
        }

        for conn in self.closing.values_mut() {
            conn.force_close();
        }

        tracing::info!("Worker stopped");
        Ok(())
    }
}

/// Run a user callback, logging errors and panics instead of propagating them
fn invoke<T>(name: &str, callback: impl FnOnce() -> CallbackResult<T>) -> Option<T> {
    match panic::catch_unwind(AssertUnwindSafe(callback)) {
        Ok(Ok(value)) => Some(value),
        Ok(Err(e)) => {
            tracing::error!("{} failed: {}", name, e);
            None
        }
        Err(_) => {
            tracing::error!("{} panicked", name);
            None
        }
    }
}
