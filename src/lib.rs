//! UI bridge - process bridge between a scripting client and a native UI host.
//!
//! This library moves commands and events between a client process and the
//! process that owns the native UI, over one of three interchangeable
//! transports.
//!
//! # Architecture
//!
//! The bridge follows a client-host model:
//!
//! - **Client (Rust)**: Sends messages, receives responses and events
//! - **Host (UI process)**: Runs the widgets, answers messages, emits events
//!
//! Key design principles:
//!
//! - Each [`BridgeConnection`] owns: host process + transport + read loop
//! - Every message gets a fresh ID; its response is matched by that ID
//! - Responses may arrive in any order; events arrive in wire order
//! - Teardown rejects every pending call exactly once
//!
//! # Quick Start
//!
//! ```no_run
//! use ui_bridge::{BridgeConnection, Result, TransportKind, payload};
//!
//! #[tokio::main]
//! async fn main() -> Result<()> {
//!     let bridge = BridgeConnection::builder()
//!         .host("/usr/local/bin/ui-bridge-host")
//!         .transport(TransportKind::BinaryRpc)
//!         .headless()
//!         .start()?;
//!
//!     bridge.wait_until_ready().await?;
//!
//!     let _clicks = bridge.on_event("click", |event| {
//!         println!("clicked {}", event.source_id);
//!     });
//!
//!     let result = bridge.send("echo", payload! { "text" => "hello" }).await?;
//!     println!("{result:?}");
//!
//!     bridge.quit().await;
//!     Ok(())
//! }
//! ```
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | [`bridge`] | [`BridgeConnection`], dispatcher, event broadcaster |
//! | [`error`] | Error types and [`Result`] alias |
//! | [`host`] | Host-side serving loops and [`host::HostServer`] |
//! | [`identifiers`] | Type-safe ID wrappers |
//! | [`protocol`] | Envelopes, values, and wire encodings |
//! | [`transport`] | Framing, host process, stdio/rpc/socket transports |
//!
//! # Transports
//!
//! | Transport | Channel | Framing | Encoding |
//! |-----------|---------|---------|----------|
//! | `stdio` | host stdin/stdout | lines or checksummed | JSON |
//! | `binary-rpc` | loopback TCP, token | length-prefixed | CBOR |
//! | `local-socket` | Unix socket | length-prefixed | CBOR |

// ============================================================================
// Modules
// ============================================================================

/// Client side: connection façade, correlation, events.
///
/// Use [`BridgeConnection::builder()`] to create a connection.
pub mod bridge;

/// Error types and result aliases.
///
/// All fallible operations return [`Result<T>`] which uses [`Error`].
pub mod error;

/// Host side: handlers and serving loops.
pub mod host;

/// Type-safe identifiers.
///
/// Newtype wrappers prevent mixing incompatible IDs at compile time.
pub mod identifiers;

/// Envelope types and wire encodings.
pub mod protocol;

/// Framing and transports.
pub mod transport;

// ============================================================================
// Re-exports
// ============================================================================

// Bridge types
pub use bridge::{
    BridgeBuilder, BridgeConfig, BridgeConnection, DispatcherStats, State, Subscription,
};

// Error types
pub use error::{Error, Result};

// Identifier types
pub use identifiers::{ConnectionId, MessageId, SubscriptionId};

// Protocol types
pub use protocol::{Encoding, Envelope, Event, Handshake, Message, Payload, Response, Value};

// Transport types
pub use transport::{Frame, Framing, Transport, TransportKind};
