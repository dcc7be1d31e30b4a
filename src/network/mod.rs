//! Network Module
//!
//! Connections and the two kinds of worker event loops.
//!
//! ## Architecture
//! - One mio event loop per worker process, single-threaded
//! - `ServerWorker` accepts from a shared listen socket and owns many connections
//! - `ClientWorker` owns one connection and bridges it to the caller's channels
//! - Frames are decoded by `protocol` and handed to the owner one at a time

mod client_worker;
mod connection;
mod server_worker;

pub use client_worker::ClientWorker;
pub use connection::{Connection, ConnectionId};
pub use server_worker::ServerWorker;
