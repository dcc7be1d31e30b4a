//! # netframe
//!
//! A process-pooled TCP server/client framework with:
//! - Automatic binary message framing over raw sockets
//! - Worker processes sharing one listen socket
//! - A single-threaded event loop per worker driving many connections
//! - Graceful shutdown that never drops already queued sends
//! - A client whose socket lives in a background process behind blocking `send`/`recv`
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                 Server (parent process)                      │
//! │          bind + listen, WorkerPool, stop flag                │
//! └─────────────────────┬───────────────────────────────────────┘
//!                       │ fork (listen socket inherited)
//!          ┌────────────┴────────────┐
//!          ▼                         ▼
//!   ┌─────────────┐          ┌─────────────┐
//!   │ServerWorker │   ...    │ServerWorker │   one mio loop each
//!   └──────┬──────┘          └──────┬──────┘
//!          │                        │
//!          ▼                        ▼
//!   ┌─────────────┐          ┌─────────────┐
//!   │ Connections │          │ Connections │ ──▶ ServerApp callbacks
//!   └─────────────┘          └─────────────┘
//!
//! Client (caller) ══ Unix socket channels ══ ClientWorker ── Connection ──▶ server
//! ```
//!
//! ## Wire Format
//! ```text
//! [id: u16 LE][size: u32 LE][payload: size bytes]
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod error;
pub mod config;

pub mod protocol;
pub mod network;
pub mod process;
pub mod app;
pub mod server;
pub mod client;

// =============================================================================
// Public API Re-exports
// =============================================================================

pub use app::{CallbackResult, OwnedMessage, ServerApp};
pub use client::Client;
pub use config::{ClientConfig, Config, Context};
pub use error::{BoxError, NetframeError, Result};
pub use network::{Connection, ConnectionId};
pub use protocol::Message;
pub use server::Server;

// =============================================================================
// Version Info
// =============================================================================

/// Current version of netframe
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
