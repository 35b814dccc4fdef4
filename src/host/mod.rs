//! Host side of the bridge.
//!
//! The native UI host answers [`Message`]s with [`Response`]s and pushes
//! [`Event`]s. This module provides the serving loops; what a message means
//! is up to the [`Handler`].
//!
//! | Entry point | Transport | Peers |
//! |-------------|-----------|-------|
//! | [`serve_stdio`] / [`serve_io`] | stdio or any stream pair | one |
//! | [`HostServer::bind_rpc`] | token-authenticated loopback TCP | many |
//! | [`HostServer::bind_local`] | Unix socket (loopback TCP elsewhere) | many |
//!
//! Each message is handled on its own task, so responses may leave in a
//! different order than their messages arrived.

// ============================================================================
// Imports
// ============================================================================

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::identifiers::ConnectionId;
use crate::protocol::{Envelope, Event, Message, Response};

// ============================================================================
// Submodules
// ============================================================================

/// Diagnostic handler.
pub mod echo;

/// Multi-client socket server.
pub mod server;

/// Single-peer serving loop.
pub mod session;

// ============================================================================
// Re-exports
// ============================================================================

pub use echo::EchoHandler;
pub use server::{Endpoint, HostServer};
pub use session::{serve_io, serve_stdio};

// ============================================================================
// Handler
// ============================================================================

/// Handles one message on the host.
#[async_trait]
pub trait Handler: Send + Sync + 'static {
    /// Produces the response for `message`.
    ///
    /// The response must carry `message.id`.
    async fn handle(&self, message: Message, ctx: HostContext) -> Response;
}

// ============================================================================
// HostContext
// ============================================================================

/// Where emitted events go.
#[derive(Clone)]
enum EventSink {
    /// The single peer of a serving loop.
    Peer(mpsc::UnboundedSender<Envelope>),
    /// Every client of a server.
    Clients(Arc<server::ClientRegistry>),
}

/// Per-message context passed to a [`Handler`].
#[derive(Clone)]
pub struct HostContext {
    connection_id: ConnectionId,
    events: EventSink,
}

impl std::fmt::Debug for HostContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HostContext")
            .field("connection_id", &self.connection_id)
            .finish_non_exhaustive()
    }
}

impl HostContext {
    pub(crate) fn peer(connection_id: ConnectionId, tx: mpsc::UnboundedSender<Envelope>) -> Self {
        Self {
            connection_id,
            events: EventSink::Peer(tx),
        }
    }

    pub(crate) fn clients(connection_id: ConnectionId, registry: Arc<server::ClientRegistry>) -> Self {
        Self {
            connection_id,
            events: EventSink::Clients(registry),
        }
    }

    /// Connection the current message arrived on.
    #[inline]
    #[must_use]
    pub fn connection_id(&self) -> ConnectionId {
        self.connection_id
    }

    /// Emits an event to every connected client.
    ///
    /// Returns the number of clients it was queued for.
    pub fn emit(&self, event: Event) -> usize {
        match &self.events {
            EventSink::Peer(tx) => usize::from(tx.send(Envelope::Event(event)).is_ok()),
            EventSink::Clients(registry) => registry.broadcast(&event),
        }
    }
}
