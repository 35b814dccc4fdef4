//! Diagnostic handler used by the bundled host and the tests.
//!
//! | Type | Payload | Result |
//! |------|---------|--------|
//! | `ping` | - | `{pong: true}` |
//! | `echo` | anything | the payload |
//! | `emit` | `{type, sourceId, data?}` | `{}`, after emitting the event |
//! | `sleep` | `{ms}` | `{sleptMs}` |
//! | `fail` | `{message?}` | error |

// ============================================================================
// Imports
// ============================================================================

use std::time::Duration;

use async_trait::async_trait;
use tracing::debug;

use crate::payload;
use crate::protocol::{Event, Message, Payload, Response, Value};

use super::{Handler, HostContext};

// ============================================================================
// Constants
// ============================================================================

/// Upper bound for `sleep`.
const MAX_SLEEP: Duration = Duration::from_secs(60);

// ============================================================================
// EchoHandler
// ============================================================================

/// Answers `ping`, `echo`, `emit`, `sleep`, and `fail`.
#[derive(Debug, Clone, Copy, Default)]
pub struct EchoHandler;

impl EchoHandler {
    /// Creates the handler.
    #[inline]
    #[must_use]
    pub const fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Handler for EchoHandler {
    async fn handle(&self, message: Message, ctx: HostContext) -> Response {
        let Message {
            id,
            message_type,
            payload,
        } = message;

        match message_type.as_str() {
            "ping" => Response::ok(id, payload! { "pong" => true }),

            "echo" => Response::ok(id, payload),

            "emit" => {
                let Some(event_type) = payload.get("type").and_then(Value::as_str) else {
                    return Response::err(id, "emit requires a 'type' string");
                };
                let source_id = payload
                    .get("sourceId")
                    .and_then(Value::as_str)
                    .unwrap_or_default();
                let data = payload.get("data").and_then(Value::as_map).cloned();
                let reached = ctx.emit(Event::new(event_type, source_id, data));
                debug!(%event_type, reached, "Event emitted");
                Response::ok(id, Payload::new())
            }

            "sleep" => {
                let ms = payload.get("ms").and_then(Value::as_u64).unwrap_or(0);
                let duration = Duration::from_millis(ms).min(MAX_SLEEP);
                tokio::time::sleep(duration).await;
                Response::ok(id, payload! { "sleptMs" => duration.as_millis() as u64 })
            }

            "fail" => {
                let reason = payload
                    .get("message")
                    .and_then(Value::as_str)
                    .unwrap_or("requested failure");
                Response::err(id, reason)
            }

            other => Response::err(id, format!("Unknown message type: {other}")),
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use tokio::sync::mpsc;

    use crate::identifiers::{ConnectionId, MessageId};
    use crate::protocol::Envelope;

    fn ctx() -> (HostContext, mpsc::UnboundedReceiver<Envelope>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (HostContext::peer(ConnectionId::next(), tx), rx)
    }

    fn message(message_type: &str, payload: Payload) -> Message {
        Message::new(MessageId::from("7"), message_type, payload)
    }

    #[tokio::test]
    async fn test_ping_and_echo() {
        let (ctx, _rx) = ctx();
        let response = EchoHandler.handle(message("ping", Payload::new()), ctx.clone()).await;
        assert!(response.success);
        assert_eq!(response.id.as_str(), "7");
        assert_eq!(
            response.result.as_ref().and_then(|r| r.get("pong")).and_then(Value::as_bool),
            Some(true)
        );

        let response = EchoHandler
            .handle(message("echo", payload! { "text" => "héllo" }), ctx)
            .await;
        assert_eq!(
            response.result.as_ref().and_then(|r| r.get("text")).and_then(Value::as_str),
            Some("héllo")
        );
    }

    #[tokio::test]
    async fn test_emit_queues_event() {
        let (ctx, mut rx) = ctx();
        let response = EchoHandler
            .handle(
                message("emit", payload! { "type" => "click", "sourceId" => "btn1" }),
                ctx,
            )
            .await;
        assert!(response.success);

        let Some(Envelope::Event(event)) = rx.recv().await else {
            panic!("expected event");
        };
        assert_eq!(event.event_type, "click");
        assert_eq!(event.source_id, "btn1");
    }

    #[tokio::test]
    async fn test_unknown_type() {
        let (ctx, _rx) = ctx();
        let response = EchoHandler.handle(message("fly", Payload::new()), ctx).await;
        assert!(!response.success);
        assert_eq!(response.error.as_deref(), Some("Unknown message type: fly"));
    }
}
