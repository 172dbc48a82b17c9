//! # tubes-protocol
//!
//! Wire protocol definitions for the tubes channel router.
//!
//! A client and the server exchange JSON envelopes:
//!
//! ```text
//! {"type": "subscribe" | "unsubscribe" | "message", "channel": "<path>", "payload": <any-or-null>}
//! ```
//!
//! Errors reach clients as ordinary `message` envelopes whose payload is an
//! [`ErrorPayload`].
//!
//! ## Example
//!
//! ```rust
//! use tubes_protocol::{codec, Envelope, MessageType};
//!
//! let envelope = Envelope::message("chat/lobby", br#"{"text":"hello"}"#).unwrap();
//!
//! let encoded = codec::encode(&envelope).unwrap();
//! let decoded = codec::decode(&encoded).unwrap();
//! assert_eq!(decoded.kind, MessageType::Message);
//! ```

pub mod codec;
pub mod envelope;

pub use codec::{decode, encode, ProtocolError};
pub use envelope::{Envelope, ErrorPayload, MessageType};

/// Separator between segments of a channel path.
pub const PATH_SEPARATOR: char = '/';

/// Marker prefix of a named parameter segment in a channel pattern.
pub const PARAM_PREFIX: char = ':';

/// A pattern segment matching exactly one arbitrary path segment.
pub const WILDCARD: &str = "*";
