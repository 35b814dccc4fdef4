//! Request/response correlation.
//!
//! The [`Dispatcher`] assigns message IDs, keeps one pending call per
//! in-flight message, and completes each call exactly once: by a matching
//! [`Response`], a local deadline ([`Dispatcher::forget`]), or bulk
//! rejection on teardown ([`Dispatcher::reject_all`]).
//!
//! Responses whose ID matches no pending call are orphans. They are logged,
//! counted, and dropped.

// ============================================================================
// Imports
// ============================================================================

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use tokio::sync::oneshot;
use tracing::{debug, trace, warn};

use crate::error::{Error, Result};
use crate::identifiers::MessageId;
use crate::protocol::{Message, Payload, Response};

// ============================================================================
// Types
// ============================================================================

/// Receiving half of a pending call.
pub type PendingReceiver = oneshot::Receiver<Result<Payload>>;

/// One registered, not yet completed call.
struct PendingCall {
    /// Registration time.
    created_at: Instant,
    /// Completion channel.
    tx: oneshot::Sender<Result<Payload>>,
}

/// Map of message IDs to pending calls.
type PendingTable = FxHashMap<MessageId, PendingCall>;

// ============================================================================
// DispatcherStats
// ============================================================================

/// Counters exposed for diagnostics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatcherStats {
    /// Calls currently waiting for a response.
    pub pending: usize,
    /// Calls completed by a response.
    pub resolved: u64,
    /// Responses that matched no pending call.
    pub orphans: u64,
}

// ============================================================================
// Dispatcher
// ============================================================================

/// Per-connection pending call table.
pub struct Dispatcher {
    /// Pending calls by message ID.
    pending: Mutex<PendingTable>,
    /// Last assigned sequence number.
    sequence: AtomicU64,
    /// Maximum number of pending calls.
    max_pending: usize,
    /// Responses that completed a call.
    resolved: AtomicU64,
    /// Responses that matched nothing.
    orphans: AtomicU64,
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatcher")
            .field("stats", &self.stats())
            .field("max_pending", &self.max_pending)
            .finish()
    }
}

impl Dispatcher {
    /// Creates an empty dispatcher.
    #[must_use]
    pub fn new(max_pending: usize) -> Self {
        Self {
            pending: Mutex::new(PendingTable::default()),
            sequence: AtomicU64::new(0),
            max_pending,
            resolved: AtomicU64::new(0),
            orphans: AtomicU64::new(0),
        }
    }

    /// Assigns an ID to a new message and registers its pending call.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Protocol`] if `max_pending` calls are already waiting.
    pub fn register(
        &self,
        message_type: impl Into<String>,
        payload: Payload,
    ) -> Result<(Message, PendingReceiver)> {
        let (tx, rx) = oneshot::channel();

        let id = {
            let mut pending = self.pending.lock();
            if pending.len() >= self.max_pending {
                warn!(
                    pending = pending.len(),
                    max = self.max_pending,
                    "Too many pending requests"
                );
                return Err(Error::protocol(format!(
                    "Too many pending requests: {}/{}",
                    pending.len(),
                    self.max_pending
                )));
            }
            let seq = self.sequence.fetch_add(1, Ordering::Relaxed) + 1;
            let id = MessageId::from_sequence(seq);
            pending.insert(
                id.clone(),
                PendingCall {
                    created_at: Instant::now(),
                    tx,
                },
            );
            id
        };

        trace!(%id, "Pending call registered");
        Ok((Message::new(id, message_type, payload), rx))
    }

    /// Registers the pending call for the host's `ready` handshake.
    pub fn register_ready(&self) -> PendingReceiver {
        let (tx, rx) = oneshot::channel();
        self.pending.lock().insert(
            MessageId::ready(),
            PendingCall {
                created_at: Instant::now(),
                tx,
            },
        );
        rx
    }

    /// Completes the pending call matching `response.id`.
    ///
    /// Returns `false` for orphans.
    pub fn resolve(&self, response: Response) -> bool {
        let call = self.pending.lock().remove(&response.id);

        let Some(call) = call else {
            let orphans = self.orphans.fetch_add(1, Ordering::Relaxed) + 1;
            warn!(id = %response.id, orphans, "Response for unknown request");
            return false;
        };

        self.resolved.fetch_add(1, Ordering::Relaxed);
        trace!(
            id = %response.id,
            elapsed_ms = call.created_at.elapsed().as_millis() as u64,
            success = response.success,
            "Response matched"
        );
        let _ = call.tx.send(response.into_result());
        true
    }

    /// Removes a pending call without completing it.
    ///
    /// A response arriving later is treated as an orphan.
    pub fn forget(&self, id: &MessageId) -> bool {
        let removed = self.pending.lock().remove(id).is_some();
        if removed {
            debug!(%id, "Removed timed-out correlation");
        }
        removed
    }

    /// Fails every pending call with an error produced by `make_error`.
    ///
    /// Returns the number of calls rejected.
    pub fn reject_all(&self, make_error: impl Fn() -> Error) -> usize {
        let pending: Vec<_> = self.pending.lock().drain().collect();
        let count = pending.len();

        for (_, call) in pending {
            let _ = call.tx.send(Err(make_error()));
        }

        if count > 0 {
            debug!(count, "Failed pending requests on shutdown");
        }
        count
    }

    /// Returns the number of pending calls.
    #[inline]
    #[must_use]
    pub fn pending_count(&self) -> usize {
        self.pending.lock().len()
    }

    /// Age of the oldest pending call.
    #[must_use]
    pub fn oldest_pending(&self) -> Option<Duration> {
        self.pending
            .lock()
            .values()
            .map(|call| call.created_at.elapsed())
            .max()
    }

    /// Returns a snapshot of the counters.
    #[must_use]
    pub fn stats(&self) -> DispatcherStats {
        DispatcherStats {
            pending: self.pending_count(),
            resolved: self.resolved.load(Ordering::Relaxed),
            orphans: self.orphans.load(Ordering::Relaxed),
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use std::collections::HashSet;
    use std::sync::Arc;

    use crate::payload;

    #[test]
    fn test_ids_are_sequential() {
        let dispatcher = Dispatcher::new(16);
        let (first, _rx1) = dispatcher.register("ping", Payload::new()).expect("register");
        let (second, _rx2) = dispatcher.register("ping", Payload::new()).expect("register");
        assert_eq!(first.id.as_str(), "1");
        assert_eq!(second.id.as_str(), "2");
        assert_eq!(dispatcher.pending_count(), 2);
    }

    #[test]
    fn test_resolve_exactly_once() {
        let dispatcher = Dispatcher::new(16);
        let (message, mut rx) = dispatcher.register("echo", payload! { "x" => 1 }).expect("register");

        let response = Response::ok(message.id.clone(), payload! { "x" => 1 });
        assert!(dispatcher.resolve(response.clone()));
        assert!(!dispatcher.resolve(response));

        let result = rx.try_recv().expect("completed").expect("ok");
        assert_eq!(result.get("x").and_then(|v| v.as_i64()), Some(1));
        assert_eq!(
            dispatcher.stats(),
            DispatcherStats {
                pending: 0,
                resolved: 1,
                orphans: 1
            }
        );
    }

    #[test]
    fn test_remote_failure() {
        let dispatcher = Dispatcher::new(16);
        let (message, mut rx) = dispatcher.register("fly", Payload::new()).expect("register");
        dispatcher.resolve(Response::err(message.id, "Unknown message type: fly"));

        let err = rx.try_recv().expect("completed").unwrap_err();
        assert!(matches!(err, Error::Remote { message } if message == "Unknown message type: fly"));
    }

    #[test]
    fn test_forget_turns_late_response_into_orphan() {
        let dispatcher = Dispatcher::new(16);
        let (message, _rx) = dispatcher.register("sleep", Payload::new()).expect("register");

        assert!(dispatcher.forget(&message.id));
        assert!(!dispatcher.forget(&message.id));
        assert!(!dispatcher.resolve(Response::ok(message.id, Payload::new())));
        assert_eq!(dispatcher.stats().orphans, 1);
    }

    #[test]
    fn test_reject_all() {
        let dispatcher = Dispatcher::new(16);
        let mut receivers: Vec<_> = (0..5)
            .map(|_| dispatcher.register("x", Payload::new()).expect("register").1)
            .collect();

        assert_eq!(dispatcher.reject_all(|| Error::HostTerminated), 5);
        assert_eq!(dispatcher.pending_count(), 0);
        for rx in &mut receivers {
            assert!(matches!(rx.try_recv().expect("completed"), Err(Error::HostTerminated)));
        }
    }

    #[test]
    fn test_max_pending() {
        let dispatcher = Dispatcher::new(2);
        let _a = dispatcher.register("x", Payload::new()).expect("register");
        let _b = dispatcher.register("x", Payload::new()).expect("register");
        let err = dispatcher.register("x", Payload::new()).unwrap_err();
        assert!(matches!(err, Error::Protocol { .. }));
    }

    #[test]
    fn test_ready_handshake_slot() {
        let dispatcher = Dispatcher::new(16);
        let mut rx = dispatcher.register_ready();
        assert!(dispatcher.resolve(Response::ok(MessageId::ready(), payload! { "status" => "ready" })));
        assert!(rx.try_recv().expect("completed").is_ok());
    }

    #[test]
    fn test_concurrent_registration_ids_unique() {
        let dispatcher = Arc::new(Dispatcher::new(10_000));
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let dispatcher = Arc::clone(&dispatcher);
                std::thread::spawn(move || {
                    (0..500)
                        .map(|_| dispatcher.register("x", Payload::new()).expect("register").0.id)
                        .collect::<Vec<_>>()
                })
            })
            .collect();

        let mut seen = HashSet::new();
        for handle in handles {
            for id in handle.join().expect("thread") {
                assert!(seen.insert(id), "duplicate id");
            }
        }
        assert_eq!(seen.len(), 4000);
        assert_eq!(dispatcher.pending_count(), 4000);
    }
}
