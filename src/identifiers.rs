//! Type-safe identifiers for bridge entities.
//!
//! Newtype wrappers prevent mixing incompatible IDs at compile time.
//!
//! | Type | Scope | Wire form |
//! |------|-------|-----------|
//! | [`MessageId`] | one connection | string |
//! | [`ConnectionId`] | one host server | not sent |
//! | [`SubscriptionId`] | one broadcaster | not sent |

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};

// ============================================================================
// MessageId
// ============================================================================

/// Correlation ID of a message and its response.
///
/// Generated by the dispatcher, unique for the lifetime of one connection.
/// Hosts echo it back verbatim, so any string is accepted on decode.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MessageId(String);

impl MessageId {
    /// ID reserved for the stdio host's startup handshake.
    pub const READY: &'static str = "ready";

    /// Creates the ID carried by the READY handshake response.
    #[inline]
    #[must_use]
    pub fn ready() -> Self {
        Self(Self::READY.to_string())
    }

    /// Creates a message ID from a sequence number.
    #[inline]
    #[must_use]
    pub fn from_sequence(seq: u64) -> Self {
        Self(seq.to_string())
    }

    /// Returns `true` if this is the READY handshake ID.
    #[inline]
    #[must_use]
    pub fn is_ready(&self) -> bool {
        self.0 == Self::READY
    }

    /// Returns the ID as a string slice.
    #[inline]
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for MessageId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<String> for MessageId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

// ============================================================================
// ConnectionId
// ============================================================================

/// Global counter for connection IDs.
static CONNECTION_COUNTER: AtomicU64 = AtomicU64::new(1);

/// Identifies one client connection accepted by a host server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(u64);

impl ConnectionId {
    /// Allocates the next connection ID.
    #[inline]
    #[must_use]
    pub fn next() -> Self {
        Self(CONNECTION_COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    /// Returns the raw value.
    #[inline]
    #[must_use]
    pub const fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

// ============================================================================
// SubscriptionId
// ============================================================================

/// Identifies one event subscription within a broadcaster.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriptionId(u64);

impl SubscriptionId {
    /// Creates a subscription ID from a raw value.
    #[inline]
    #[must_use]
    pub const fn new(id: u64) -> Self {
        Self(id)
    }

    /// Returns the raw value.
    #[inline]
    #[must_use]
    pub const fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "sub-{}", self.0)
    }
}

// ============================================================================
// Tests
// ============================================================================
