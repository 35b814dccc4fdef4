//! Error types for the UI bridge.
//!
//! This module defines all error types used throughout the crate.
//!
//! # Usage
//!
//! All fallible operations return [`Result<T>`] which uses [`Error`]:
//!
//! ```ignore
//! use ui_bridge::{BridgeConnection, Payload, Result};
//!
//! async fn example(bridge: &BridgeConnection) -> Result<()> {
//!     let result = bridge.send("ping", Payload::new()).await?;
//!     assert!(result.contains_key("pong"));
//!     Ok(())
//! }
//! ```
//!
//! # Error Categories
//!
//! | Category | Variants | Fatal to the connection |
//! |----------|----------|-------------------------|
//! | Configuration | [`Error::Config`], [`Error::HostNotFound`] | n/a |
//! | Lifecycle | [`Error::ProcessLaunchFailed`], [`Error::Startup`] | yes |
//! | Transport | [`Error::Connection`], [`Error::HostTerminated`], [`Error::FrameTooLarge`], [`Error::Io`] | yes |
//! | Connection | [`Error::ConnectionClosed`], [`Error::ConnectionTimeout`] | yes |
//! | Codec | [`Error::Codec`], [`Error::Json`] | no, frame is dropped |
//! | Protocol | [`Error::Protocol`] | no, frame is dropped |
//! | Remote | [`Error::Remote`] | no, surfaced to one caller |
//! | Execution | [`Error::RequestTimeout`] | no |

// ============================================================================
// Imports
// ============================================================================

use std::io::Error as IoError;
use std::path::PathBuf;
use std::result::Result as StdResult;

use thiserror::Error;
use tokio::sync::oneshot::error::RecvError;

use crate::identifiers::MessageId;

// ============================================================================
// Constants
// ============================================================================

/// Maximum number of raw bytes kept in a codec error preview.
const RAW_PREVIEW_LIMIT: usize = 64;

// ============================================================================
// Result Alias
// ============================================================================

/// Result type alias using crate [`enum@Error`].
///
/// All fallible operations in this crate return this type.
pub type Result<T> = StdResult<T, Error>;

// ============================================================================
// Error Enum
// ============================================================================

/// Main error type for the crate.
///
/// Each variant includes relevant context for debugging.
#[derive(Error, Debug)]
pub enum Error {
    // ========================================================================
    // Configuration Errors
    // ========================================================================
    /// Configuration error.
    ///
    /// Returned when bridge configuration is invalid.
    #[error("Configuration error: {message}")]
    Config {
        /// Description of the configuration error.
        message: String,
    },

    /// Host binary not found at path.
    #[error("Host binary not found at: {path}")]
    HostNotFound {
        /// Path where the host binary was expected.
        path: PathBuf,
    },

    // ========================================================================
    // Lifecycle Errors
    // ========================================================================
    /// Failed to launch the host process.
    #[error("Failed to launch host: {message}")]
    ProcessLaunchFailed {
        /// Description of the launch failure.
        message: String,
    },

    /// Startup handshake failed.
    ///
    /// Returned by `wait_until_ready` and by sends queued during startup.
    #[error("Startup failed: {message}")]
    Startup {
        /// Description of the startup failure.
        message: String,
    },

    // ========================================================================
    // Transport Errors
    // ========================================================================
    /// Transport-level failure (broken pipe, reset socket, refused connect).
    #[error("Connection failed: {message}")]
    Connection {
        /// Description of the connection error.
        message: String,
    },

    /// The host process exited while the connection was open.
    #[error("Host terminated")]
    HostTerminated,

    /// A frame declared a size above the configured cap.
    #[error("Frame of {size} bytes exceeds limit of {max} bytes")]
    FrameTooLarge {
        /// Declared frame size.
        size: usize,
        /// Configured maximum.
        max: usize,
    },

    // ========================================================================
    // Connection Errors
    // ========================================================================
    /// Timeout waiting for the host to become ready.
    #[error("Connection timeout after {timeout_ms}ms")]
    ConnectionTimeout {
        /// Milliseconds waited before timeout.
        timeout_ms: u64,
    },

    /// Connection closed while the operation was pending.
    #[error("Connection closed")]
    ConnectionClosed,

    // ========================================================================
    // Codec / Protocol Errors
    // ========================================================================
    /// Malformed bytes on the wire.
    ///
    /// `raw` holds a hex preview of the offending bytes.
    #[error("Codec error: {message} (raw: {raw})")]
    Codec {
        /// Description of the decoding failure.
        message: String,
        /// Hex preview of the raw bytes, truncated.
        raw: String,
    },

    /// Protocol violation: unknown envelope shape or missing fields.
    #[error("Protocol error: {message}")]
    Protocol {
        /// Description of the protocol violation.
        message: String,
    },

    /// The host reported `success: false`.
    #[error("Remote error: {message}")]
    Remote {
        /// Error string reported by the host.
        message: String,
    },

    // ========================================================================
    // Execution Errors
    // ========================================================================
    /// Request deadline expired before a response arrived.
    #[error("Request {message_id} timed out after {timeout_ms}ms")]
    RequestTimeout {
        /// The message ID that timed out.
        message_id: MessageId,
        /// Milliseconds waited before timeout.
        timeout_ms: u64,
    },

    // ========================================================================
    // External Errors
    // ========================================================================
    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] IoError),

    /// JSON serialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Channel receive error.
    #[error("Channel closed")]
    ChannelClosed(#[from] RecvError),
}

// ============================================================================
// Error Constructors
// ============================================================================

impl Error {
    /// Creates a configuration error.
    #[inline]
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// Creates a host not found error.
    #[inline]
    pub fn host_not_found(path: impl Into<PathBuf>) -> Self {
        Self::HostNotFound { path: path.into() }
    }

    /// Creates a process launch failed error.
    #[inline]
    pub fn process_launch_failed(err: IoError) -> Self {
        Self::ProcessLaunchFailed {
            message: err.to_string(),
        }
    }

    /// Creates a startup error.
    #[inline]
    pub fn startup(message: impl Into<String>) -> Self {
        Self::Startup {
            message: message.into(),
        }
    }

    /// Creates a connection error.
    #[inline]
    pub fn connection(message: impl Into<String>) -> Self {
        Self::Connection {
            message: message.into(),
        }
    }

    /// Creates a connection timeout error.
    #[inline]
    pub fn connection_timeout(timeout_ms: u64) -> Self {
        Self::ConnectionTimeout { timeout_ms }
    }

    /// Creates a frame too large error.
    #[inline]
    pub fn frame_too_large(size: usize, max: usize) -> Self {
        Self::FrameTooLarge { size, max }
    }

    /// Creates a codec error with a truncated hex preview of `raw`.
    pub fn codec(message: impl Into<String>, raw: &[u8]) -> Self {
        let shown = raw.len().min(RAW_PREVIEW_LIMIT);
        let mut preview = hex::encode(&raw[..shown]);
        if raw.len() > shown {
            preview.push_str(&format!("..(+{} bytes)", raw.len() - shown));
        }
        Self::Codec {
            message: message.into(),
            raw: preview,
        }
    }

    /// Creates a protocol error.
    #[inline]
    pub fn protocol(message: impl Into<String>) -> Self {
        Self::Protocol {
            message: message.into(),
        }
    }

    /// Creates a remote error.
    #[inline]
    pub fn remote(message: impl Into<String>) -> Self {
        Self::Remote {
            message: message.into(),
        }
    }

    /// Creates a request timeout error.
    #[inline]
    pub fn request_timeout(message_id: MessageId, timeout_ms: u64) -> Self {
        Self::RequestTimeout {
            message_id,
            timeout_ms,
        }
    }
}

// ============================================================================
// Error Replication
// ============================================================================

impl Error {
    /// Produces an equivalent error for another recipient.
    ///
    /// Used when one failure must reach many callers. External errors that
    /// cannot be cloned keep their kind and message.
    #[must_use]
    pub fn replicate(&self) -> Self {
        match self {
            Self::Config { message } => Self::config(message.clone()),
            Self::HostNotFound { path } => Self::host_not_found(path.clone()),
            Self::ProcessLaunchFailed { message } => Self::ProcessLaunchFailed {
                message: message.clone(),
            },
            Self::Startup { message } => Self::startup(message.clone()),
            Self::Connection { message } => Self::connection(message.clone()),
            Self::HostTerminated => Self::HostTerminated,
            Self::FrameTooLarge { size, max } => Self::frame_too_large(*size, *max),
            Self::ConnectionTimeout { timeout_ms } => Self::connection_timeout(*timeout_ms),
            Self::ConnectionClosed | Self::ChannelClosed(_) => Self::ConnectionClosed,
            Self::Codec { message, raw } => Self::Codec {
                message: message.clone(),
                raw: raw.clone(),
            },
            Self::Protocol { message } => Self::protocol(message.clone()),
            Self::Remote { message } => Self::remote(message.clone()),
            Self::RequestTimeout {
                message_id,
                timeout_ms,
            } => Self::request_timeout(message_id.clone(), *timeout_ms),
            Self::Io(e) => Self::Io(IoError::new(e.kind(), e.to_string())),
            Self::Json(e) => Self::protocol(e.to_string()),
        }
    }
}

// ============================================================================
// Error Predicates
// ============================================================================

impl Error {
    /// Returns `true` if this is a timeout error.
    #[inline]
    #[must_use]
    pub fn is_timeout(&self) -> bool {
        matches!(
            self,
            Self::ConnectionTimeout { .. } | Self::RequestTimeout { .. }
        )
    }

    /// Returns `true` if this is a connection-level error.
    ///
    /// Every caller whose request was cut off by teardown sees one of these.
    #[inline]
    #[must_use]
    pub fn is_connection_error(&self) -> bool {
        matches!(
            self,
            Self::Connection { .. }
                | Self::ConnectionTimeout { .. }
                | Self::ConnectionClosed
                | Self::HostTerminated
                | Self::ChannelClosed(_)
        )
    }

    /// Returns `true` if the error ends the transport it occurred on.
    #[inline]
    #[must_use]
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::Connection { .. }
                | Self::HostTerminated
                | Self::FrameTooLarge { .. }
                | Self::Io(_)
                | Self::ProcessLaunchFailed { .. }
                | Self::Startup { .. }
        )
    }

    /// Returns `true` if this error only affects a single frame or call.
    ///
    /// Recoverable errors leave the connection usable.
    #[inline]
    #[must_use]
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Self::Codec { .. }
                | Self::Json(_)
                | Self::Protocol { .. }
                | Self::Remote { .. }
                | Self::RequestTimeout { .. }
        )
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use std::io::ErrorKind;

    #[test]
    fn test_error_display() {
        let err = Error::connection("broken pipe");
        assert_eq!(err.to_string(), "Connection failed: broken pipe");
    }

    #[test]
    fn test_remote_error_display() {
        let err = Error::remote("Unknown message type: fly");
        assert_eq!(err.to_string(), "Remote error: Unknown message type: fly");
    }

    #[test]
    fn test_codec_preview_is_truncated() {
        let raw = vec![0xab; 100];
        let Error::Codec { raw, .. } = Error::codec("bad", &raw) else {
            panic!("expected codec error");
        };
        assert!(raw.starts_with("abab"));
        assert!(raw.ends_with("..(+36 bytes)"));
    }

    #[test]
    fn test_codec_preview_short_input() {
        let Error::Codec { raw, .. } = Error::codec("bad", b"\x01\x02") else {
            panic!("expected codec error");
        };
        assert_eq!(raw, "0102");
    }

    #[test]
    fn test_is_timeout() {
        let timeout_err = Error::request_timeout(MessageId::from("7"), 5000);
        let other_err = Error::connection("test");

        assert!(timeout_err.is_timeout());
        assert!(!other_err.is_timeout());
    }

    #[test]
    fn test_is_connection_error() {
        assert!(Error::ConnectionClosed.is_connection_error());
        assert!(Error::HostTerminated.is_connection_error());
        assert!(Error::connection_timeout(10).is_connection_error());
        assert!(!Error::remote("nope").is_connection_error());
    }

    #[test]
    fn test_fatal_and_recoverable_are_disjoint() {
        let errors = [
            Error::codec("x", b""),
            Error::protocol("x"),
            Error::remote("x"),
            Error::connection("x"),
            Error::frame_too_large(10, 5),
            Error::HostTerminated,
        ];
        for err in &errors {
            assert!(!(err.is_fatal() && err.is_recoverable()), "{err}");
        }
        assert!(Error::frame_too_large(10, 5).is_fatal());
        assert!(Error::codec("x", b"").is_recoverable());
    }

    #[test]
    fn test_from_io_error() {
        let io_err = IoError::new(ErrorKind::BrokenPipe, "pipe closed");
        let err: Error = io_err.into();
        assert!(matches!(err, Error::Io(_)));
        assert!(err.is_fatal());
    }

    #[test]
    fn test_replicate_keeps_kind() {
        let io = Error::from(IoError::new(ErrorKind::BrokenPipe, "gone"));
        let Error::Io(copy) = io.replicate() else {
            panic!("expected io error");
        };
        assert_eq!(copy.kind(), ErrorKind::BrokenPipe);

        assert!(matches!(Error::HostTerminated.replicate(), Error::HostTerminated));
        assert_eq!(
            Error::startup("bad handshake").replicate().to_string(),
            "Startup failed: bad handshake"
        );
    }

    #[test]
    fn test_from_json_error() {
        let json_err = serde_json::from_str::<String>("invalid").unwrap_err();
        let err: Error = json_err.into();
        assert!(matches!(err, Error::Json(_)));
    }
}
