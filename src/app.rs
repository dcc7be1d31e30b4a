//! Application callbacks
//!
//! A server application implements [`ServerApp`]. Every worker process owns
//! its own instance and calls it from the worker's event loop thread, so a
//! slow callback stalls every connection of that worker.

use crate::config::Context;
use crate::error::BoxError;
use crate::network::Connection;
use crate::protocol::Message;

/// Result returned by application callbacks
pub type CallbackResult<T> = std::result::Result<T, BoxError>;

/// A received message together with the connection it arrived on
#[derive(Debug)]
pub struct OwnedMessage<'a> {
    /// Connection the message was read from; replies go through it
    pub owner: &'a mut Connection,

    pub msg: Message,
}

/// Connection lifecycle callbacks
///
/// Errors and panics raised by a callback are logged by the worker and never
/// tear down the worker or, except for `on_client_connect`, the connection.
pub trait ServerApp {
    /// A client connected. Return `Ok(false)` to reject it.
    ///
    /// Sends queued on a rejected connection are still delivered before it
    /// closes. A rejected connection never reaches `on_message` or
    /// `on_client_disconnect`. An error counts as a rejection.
    fn on_client_connect(&mut self, _conn: &mut Connection, _ctx: &Context) -> CallbackResult<bool> {
        Ok(true)
    }

    /// An accepted client went away, or was shut down by this side.
    ///
    /// Called exactly once per accepted connection.
    fn on_client_disconnect(&mut self, _conn: &Connection, _ctx: &Context) -> CallbackResult<()> {
        Ok(())
    }

    /// A complete message arrived.
    fn on_message(&mut self, _msg: OwnedMessage<'_>, _ctx: &Context) -> CallbackResult<()> {
        Ok(())
    }
}

impl<T: ServerApp + ?Sized> ServerApp for Box<T> {
    fn on_client_connect(&mut self, conn: &mut Connection, ctx: &Context) -> CallbackResult<bool> {
        (**self).on_client_connect(conn, ctx)
    }

    fn on_client_disconnect(&mut self, conn: &Connection, ctx: &Context) -> CallbackResult<()> {
        (**self).on_client_disconnect(conn, ctx)
    }

    fn on_message(&mut self, msg: OwnedMessage<'_>, ctx: &Context) -> CallbackResult<()> {
        (**self).on_message(msg, ctx)
    }
}
