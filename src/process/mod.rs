//! Process Module
//!
//! Worker process lifecycle and the state shared across a fork.
//!
//! ## Architecture
//! - `WorkerPool` forks N identical workers and stops them within one timeout budget
//! - `SharedFlag` is a write-once boolean visible to parent and children
//! - Sockets reach workers by descriptor inheritance at fork time

mod pool;
mod shared;

pub use pool::{WorkerPool, WorkerProcess, EXIT_ERROR, EXIT_PANIC};
pub use shared::SharedFlag;
