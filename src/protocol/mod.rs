//! Protocol Module
//!
//! Defines the wire protocol shared by servers, clients and the
//! cross-process channels of the client bridge.
//!
//! ## Frame Format
//! ```text
//! ┌──────────┬──────────┬─────────────────────────────┐
//! │ Id (2)   │ Size (4) │         Payload             │
//! └──────────┴──────────┴─────────────────────────────┘
//! ```
//!
//! The id is application defined; the framework never interprets it.

mod codec;
mod message;

pub use codec::{read_message, try_decode, write_message};
pub use message::{Message, HEADER_LEN, ID_FIELD_LEN, MAX_PAYLOAD_LEN, SIZE_FIELD_LEN};
