//! Transport layer.
//!
//! This module moves frames between the client (Rust) and the native UI
//! host process over one of three interchangeable transports.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────┐                           ┌──────────────────┐
//! │ BridgeConnection │   stdio: stdin/stdout     │   UI host        │
//! │                  │◄─────────────────────────►│                  │
//! │  writer task ────┼──► binary-rpc: TCP+token  │  ready handshake │
//! │  read loop   ◄───┼─── local-socket: UDS      │  or init line    │
//! └──────────────────┘                           └──────────────────┘
//!                          stderr ──► tracing (ui_bridge::host)
//! ```
//!
//! # Connection Lifecycle
//!
//! 1. `Transport::open` - Spawn the host, connect to its endpoint
//! 2. `Transport::read_loop` - Deliver frames to a [`FrameHandler`]
//! 3. `Transport::write` - Queue frames for the writer task
//! 4. `Transport::close` - Flush and close the outgoing stream
//! 5. `HostProcess::terminate` - Ask the host to exit, kill after a grace period
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | `connection` | Transport handle, writer task, read loop |
//! | `framing` | Frame codecs |
//! | `process` | Host process guard and init line |
//! | `rpc` | Binary RPC transport |
//! | `socket` | Local-socket transport |
//! | `stdio` | Standard-stream transport |

// ============================================================================
// Submodules
// ============================================================================

/// Transport handle and its tasks.
pub mod connection;

/// Byte streams to frames.
pub mod framing;

/// Host process management.
pub mod process;

/// Binary RPC transport.
pub mod rpc;

/// Local-socket transport.
pub mod socket;

/// Standard-stream transport.
pub mod stdio;

// ============================================================================
// Re-exports
// ============================================================================

pub use connection::{FrameHandler, FrameWriter, ReadLoop, Transport, TransportKind};
pub use framing::{
    ChecksummedCodec, DEFAULT_MAX_FRAME_SIZE, Frame, FrameSink, FrameStream, Framing,
    LengthPrefixedCodec, LineCodec, framed,
};
pub use process::{HOST_LOG_TARGET, HostProcess, InitLine, SHUTDOWN_COMMAND};
pub use socket::socket_path;
