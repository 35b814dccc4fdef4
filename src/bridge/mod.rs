//! Client side of the bridge.
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | `builder` | Fluent [`BridgeBuilder`] |
//! | `config` | [`BridgeConfig`] and environment overlay |
//! | `connection` | [`BridgeConnection`] façade and state machine |
//! | `dispatcher` | Correlation IDs and pending calls |
//! | `events` | Event subscriptions |

// ============================================================================
// Submodules
// ============================================================================

/// Connection builder.
pub mod builder;

/// Connection configuration.
pub mod config;

/// Connection façade.
pub mod connection;

/// Request/response correlation.
pub mod dispatcher;

/// Event fan-out.
pub mod events;

// ============================================================================
// Re-exports
// ============================================================================

pub use builder::BridgeBuilder;
pub use config::BridgeConfig;
pub use connection::{BridgeConnection, State};
pub use dispatcher::{Dispatcher, DispatcherStats, PendingReceiver};
pub use events::{EventBroadcaster, EventCallback, Subscription, WILDCARD};
