//! Message, Response and Event envelopes.
//!
//! # Format
//!
//! Message (client to host):
//! ```json
//! { "id": "1", "type": "createWidget", "payload": { ... } }
//! ```
//!
//! Response (host to client):
//! ```json
//! { "id": "1", "success": true, "result": { ... } }
//! { "id": "1", "success": false, "error": "Unknown message type: x" }
//! ```
//!
//! Event (host to client, unsolicited):
//! ```json
//! { "type": "click", "sourceId": "btn-1", "data": { ... } }
//! ```

// ============================================================================
// Imports
// ============================================================================

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::identifiers::MessageId;

use super::value::{Payload, Value};

// ============================================================================
// Constants
// ============================================================================

/// Version of the envelope protocol; bumped on breaking wire changes.
pub const PROTOCOL_VERSION: u32 = 1;

/// Version string reported by hosts built from this crate.
pub const BRIDGE_VERSION: &str = env!("CARGO_PKG_VERSION");

// ============================================================================
// Message
// ============================================================================

/// A command from client to host.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Message {
    /// Correlation ID, unique per connection.
    pub id: MessageId,

    /// Operation name, e.g. `createWidget`.
    #[serde(rename = "type")]
    pub message_type: String,

    /// Operation-specific arguments.
    pub payload: Payload,
}

impl Message {
    /// Creates a new message.
    #[inline]
    #[must_use]
    pub fn new(id: MessageId, message_type: impl Into<String>, payload: Payload) -> Self {
        Self {
            id,
            message_type: message_type.into(),
            payload,
        }
    }
}

// ============================================================================
// Response
// ============================================================================

/// A reply from host to client for exactly one [`Message`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Response {
    /// Matches the message `id`.
    pub id: MessageId,

    /// Whether the host executed the command.
    pub success: bool,

    /// Result data (if success).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Payload>,

    /// Error description (if failure).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl Response {
    /// Creates a success response.
    #[inline]
    #[must_use]
    pub fn ok(id: MessageId, result: Payload) -> Self {
        Self {
            id,
            success: true,
            result: Some(result),
            error: None,
        }
    }

    /// Creates a failure response.
    #[inline]
    #[must_use]
    pub fn err(id: MessageId, error: impl Into<String>) -> Self {
        Self {
            id,
            success: false,
            result: None,
            error: Some(error.into()),
        }
    }

    /// Extracts the result map, returning error if the host reported failure.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Remote`] carrying the host's error string.
    pub fn into_result(self) -> Result<Payload> {
        if self.success {
            Ok(self.result.unwrap_or_default())
        } else {
            Err(Error::remote(
                self.error.unwrap_or_else(|| "unknown error".to_string()),
            ))
        }
    }
}

// ============================================================================
// Event
// ============================================================================

/// An unsolicited notification from host to client.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Event {
    /// Event type, e.g. `click`.
    #[serde(rename = "type")]
    pub event_type: String,

    /// Widget or object that emitted the event.
    #[serde(rename = "sourceId")]
    pub source_id: String,

    /// Event-specific data.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Payload>,
}

impl Event {
    /// Creates a new event.
    #[inline]
    #[must_use]
    pub fn new(
        event_type: impl Into<String>,
        source_id: impl Into<String>,
        data: Option<Payload>,
    ) -> Self {
        Self {
            event_type: event_type.into(),
            source_id: source_id.into(),
            data,
        }
    }

    /// Looks up a key in the event data.
    #[inline]
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.data.as_ref().and_then(|d| d.get(key))
    }
}

// ============================================================================
// Envelope
// ============================================================================

/// Any frame payload exchanged on the bridge.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Envelope {
    /// Client command.
    Message(Message),
    /// Host reply.
    Response(Response),
    /// Host notification.
    Event(Event),
}

impl Envelope {
    /// Short name of the envelope kind, for logs.
    #[inline]
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Message(_) => "message",
            Self::Response(_) => "response",
            Self::Event(_) => "event",
        }
    }
}

impl From<Message> for Envelope {
    fn from(value: Message) -> Self {
        Self::Message(value)
    }
}

impl From<Response> for Envelope {
    fn from(value: Response) -> Self {
        Self::Response(value)
    }
}

impl From<Event> for Envelope {
    fn from(value: Event) -> Self {
        Self::Event(value)
    }
}

// ============================================================================
// RawEnvelope
// ============================================================================

/// Union of every envelope field, used to classify decoded frames.
///
/// Decoding into this permissive shape first lets missing fields surface
/// as [`Error::Protocol`] instead of an opaque codec failure.
#[derive(Debug, Default, Deserialize)]
pub(crate) struct RawEnvelope {
    #[serde(default)]
    pub id: Option<MessageId>,
    #[serde(default, rename = "type")]
    pub kind: Option<String>,
    #[serde(default)]
    pub payload: Option<Payload>,
    #[serde(default)]
    pub success: Option<bool>,
    #[serde(default)]
    pub result: Option<Payload>,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default, rename = "sourceId", alias = "widgetId")]
    pub source_id: Option<String>,
    #[serde(default)]
    pub data: Option<Payload>,
}

impl RawEnvelope {
    /// Classifies the raw fields into a typed envelope.
    ///
    /// `success` marks a response, `sourceId` an event, and `id` + `type`
    /// a message.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Protocol`] if required fields are missing.
    pub(crate) fn classify(self) -> Result<Envelope> {
        if let Some(success) = self.success {
            let id = self
                .id
                .ok_or_else(|| Error::protocol("response missing required field `id`"))?;
            return Ok(Envelope::Response(Response {
                id,
                success,
                result: self.result,
                error: self.error,
            }));
        }

        if let Some(source_id) = self.source_id {
            let event_type = self
                .kind
                .ok_or_else(|| Error::protocol("event missing required field `type`"))?;
            return Ok(Envelope::Event(Event {
                event_type,
                source_id,
                data: self.data,
            }));
        }

        match (self.id, self.kind) {
            (Some(id), Some(message_type)) => Ok(Envelope::Message(Message {
                id,
                message_type,
                payload: self.payload.unwrap_or_default(),
            })),
            (Some(_), None) => Err(Error::protocol("message missing required field `type`")),
            _ => Err(Error::protocol("frame matches no envelope shape")),
        }
    }
}

// ============================================================================
// Handshake
// ============================================================================

/// Startup handshake reported by a host.
///
/// Stdio hosts send it as the result of the `ready` response; socket hosts
/// print it on stdout before accepting connections.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Handshake {
    /// Protocol version spoken by the host.
    pub protocol: u32,
    /// Host build version.
    pub bridge_version: String,
    /// Whether the host accepts this client.
    pub compatible: bool,
    /// Reason for incompatibility.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl Handshake {
    /// Handshake describing this build.
    #[must_use]
    pub fn current() -> Self {
        Self {
            protocol: PROTOCOL_VERSION,
            bridge_version: BRIDGE_VERSION.to_string(),
            compatible: true,
            reason: None,
        }
    }

    /// Builds the `ready` response a stdio host sends first.
    #[must_use]
    pub fn to_ready_response(&self) -> Response {
        let mut result = Payload::new();
        result.insert("status".into(), Value::from("ready"));
        result.insert("protocol".into(), Value::from(self.protocol));
        result.insert(
            "bridgeVersion".into(),
            Value::from(self.bridge_version.as_str()),
        );
        result.insert("compatible".into(), Value::from(self.compatible));
        if let Some(reason) = &self.reason {
            result.insert("reason".into(), Value::from(reason.as_str()));
        }
        Response::ok(MessageId::ready(), result)
    }

    /// Parses the result of a `ready` response.
    ///
    /// Missing fields default to the current protocol, so older hosts that
    /// only send `status` are accepted.
    #[must_use]
    pub fn from_ready_result(result: &Payload) -> Self {
        let protocol = result
            .get("protocol")
            .and_then(Value::as_u64)
            .and_then(|v| u32::try_from(v).ok())
            .unwrap_or(PROTOCOL_VERSION);
        Self {
            protocol,
            bridge_version: result
                .get("bridgeVersion")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string(),
            compatible: result
                .get("compatible")
                .and_then(Value::as_bool)
                .unwrap_or(true),
            reason: result
                .get("reason")
                .and_then(Value::as_str)
                .map(str::to_string),
        }
    }

    /// Checks that the host speaks this client's protocol.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Startup`] on mismatch or explicit incompatibility.
    pub fn ensure_compatible(&self) -> Result<()> {
        if !self.compatible {
            return Err(Error::startup(format!(
                "host reported incompatible protocol: {}",
                self.reason.as_deref().unwrap_or("no reason given")
            )));
        }
        if self.protocol != PROTOCOL_VERSION {
            return Err(Error::startup(format!(
                "protocol mismatch: host speaks {}, client speaks {}",
                self.protocol, PROTOCOL_VERSION
            )));
        }
        Ok(())
    }
}

// ============================================================================
// Tests
// ============================================================================
