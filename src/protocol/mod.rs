//! Bridge protocol message types and wire codecs.
//!
//! This module defines the envelope format exchanged between the client
//! (this crate) and the native UI host.
//!
//! # Protocol Overview
//!
//! | Envelope | Direction | Purpose |
//! |----------|-----------|---------|
//! | [`Message`] | Client → Host | Command with correlation ID |
//! | [`Response`] | Host → Client | Reply to exactly one message |
//! | [`Event`] | Host → Client | Unsolicited notification |
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | `codec` | JSON and CBOR encodings |
//! | `message` | Envelope types and startup handshake |
//! | `value` | Payload value model |

// ============================================================================
// Submodules
// ============================================================================

/// Wire codecs.
pub mod codec;

/// Envelope types.
pub mod message;

/// Payload values.
pub mod value;

// ============================================================================
// Re-exports
// ============================================================================

pub use codec::Encoding;
pub use message::{
    BRIDGE_VERSION, Envelope, Event, Handshake, Message, PROTOCOL_VERSION, Response,
};
pub use value::{Payload, Value};
