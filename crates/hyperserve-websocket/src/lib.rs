//! # HyperServe WebSocket
//!
//! RFC 6455 implementation used by the HyperServe server for upgraded
//! connections:
//!
//! - [`handshake`] - upgrade validation, accept-key computation, origin
//!   policy, subprotocol negotiation
//! - [`frame`] - the frame codec: opcodes, masking, length encodings,
//!   close payloads
//! - [`session`] - the [`WebSocket`](session::WebSocket) connection object:
//!   message assembly, inline control-frame handling, close semantics
//!
//! The crate is transport-agnostic: a session wraps any
//! `AsyncRead + AsyncWrite` stream, which in the server is the byte stream
//! hijacked from hyper after a `101 Switching Protocols` response.

#![deny(missing_docs)]
#![warn(missing_debug_implementations)]
#![warn(clippy::all)]

pub mod error;
pub mod frame;
pub mod handshake;
pub mod session;

pub use error::{WsError, WsResult};
pub use frame::{CloseCode, Frame, Opcode};
pub use handshake::{accept_key, negotiate_subprotocol, validate_upgrade, OriginPolicy};
pub use session::{Message, Role, WebSocket};

/// Default maximum assembled message size: 1 MiB.
pub const DEFAULT_MAX_MESSAGE_SIZE: usize = 1024 * 1024;
