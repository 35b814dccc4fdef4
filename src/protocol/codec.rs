//! Wire codecs: [`Envelope`] to [`Frame`] and back.
//!
//! | Encoding | Used by | Binary values |
//! |----------|---------|---------------|
//! | [`Encoding::Json`] | stdio | moved to the frame attachment |
//! | [`Encoding::Cbor`] | binary-rpc, local-socket | native byte strings |
//!
//! # JSON attachments
//!
//! Compact JSON cannot carry raw bytes, and line framing cannot carry raw
//! newlines. Every [`Value::Bytes`] is therefore appended to the frame's
//! attachment and replaced in the JSON body by a placeholder:
//!
//! ```json
//! {"id":"4","type":"setImage","payload":{"pixels":{"$blob":[0,1024]}}}
//! ```
//!
//! A map whose only key is `$blob` is reserved and cannot be sent.

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::str::FromStr;

use bytes::{Bytes, BytesMut};
use tracing::trace;

use crate::error::{Error, Result};
use crate::transport::Frame;

use super::message::{Envelope, Event, Message, RawEnvelope, Response};
use super::value::{Payload, Value};

// ============================================================================
// Constants
// ============================================================================

/// Placeholder key for attachment references in JSON bodies.
const BLOB_KEY: &str = "$blob";

// ============================================================================
// Encoding
// ============================================================================

/// Serialization format of frame bodies.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum Encoding {
    /// Compact JSON text, binary values in the attachment.
    #[default]
    Json,
    /// CBOR, binary values inline.
    Cbor,
}

impl Encoding {
    /// Returns the encoding name.
    #[inline]
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Json => "json",
            Self::Cbor => "cbor",
        }
    }

    /// Encodes an envelope into a frame.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Codec`] if the envelope cannot be represented.
    pub fn encode(self, envelope: &Envelope) -> Result<Frame> {
        let frame = match self {
            Self::Json => encode_json(envelope)?,
            Self::Cbor => encode_cbor(envelope)?,
        };
        trace!(
            encoding = self.as_str(),
            kind = envelope.kind(),
            len = frame.len(),
            "Encoded envelope"
        );
        Ok(frame)
    }

    /// Decodes a frame into an envelope.
    ///
    /// # Errors
    ///
    /// - [`Error::Codec`] if the bytes are malformed
    /// - [`Error::Protocol`] if required envelope fields are missing
    pub fn decode(self, frame: Frame) -> Result<Envelope> {
        match self {
            Self::Json => decode_json(frame),
            Self::Cbor => decode_cbor(frame),
        }
    }
}

impl fmt::Display for Encoding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Encoding {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "json" => Ok(Self::Json),
            "cbor" => Ok(Self::Cbor),
            other => Err(Error::config(format!("unknown encoding: {other}"))),
        }
    }
}

// ============================================================================
// JSON
// ============================================================================

fn encode_json(envelope: &Envelope) -> Result<Frame> {
    let mut blobs = Blobs::default();
    let stripped = match envelope {
        Envelope::Message(m) => Envelope::Message(Message {
            id: m.id.clone(),
            message_type: m.message_type.clone(),
            payload: blobs.strip_payload(&m.payload)?,
        }),
        Envelope::Response(r) => Envelope::Response(Response {
            id: r.id.clone(),
            success: r.success,
            result: r.result.as_ref().map(|p| blobs.strip_payload(p)).transpose()?,
            error: r.error.clone(),
        }),
        Envelope::Event(e) => Envelope::Event(Event {
            event_type: e.event_type.clone(),
            source_id: e.source_id.clone(),
            data: e.data.as_ref().map(|p| blobs.strip_payload(p)).transpose()?,
        }),
    };

    let body = serde_json::to_vec(&stripped)
        .map_err(|e| Error::codec(format!("JSON encode failed: {e}"), &[]))?;
    if body.contains(&b'\n') {
        return Err(Error::codec("record separator in JSON body", &body));
    }

    Ok(Frame {
        body: Bytes::from(body),
        attachment: blobs.finish(),
    })
}

fn decode_json(frame: Frame) -> Result<Envelope> {
    let raw: RawEnvelope = serde_json::from_slice(&frame.body)
        .map_err(|e| Error::codec(format!("JSON decode failed: {e}"), &frame.body))?;
    let mut envelope = raw.classify()?;

    let attachment = frame.attachment.unwrap_or_default();
    match &mut envelope {
        Envelope::Message(m) => restore_payload(&mut m.payload, &attachment)?,
        Envelope::Response(r) => {
            if let Some(result) = r.result.as_mut() {
                restore_payload(result, &attachment)?;
            }
        }
        Envelope::Event(e) => {
            if let Some(data) = e.data.as_mut() {
                restore_payload(data, &attachment)?;
            }
        }
    }
    Ok(envelope)
}

/// Collects binary values while stripping them from a JSON body.
#[derive(Default)]
struct Blobs {
    buf: BytesMut,
    used: bool,
}

impl Blobs {
    fn strip_payload(&mut self, payload: &Payload) -> Result<Payload> {
        if is_reserved(payload) {
            return Err(Error::codec(
                format!("map with sole key `{BLOB_KEY}` is reserved"),
                &[],
            ));
        }
        payload
            .iter()
            .map(|(k, v)| Ok((k.clone(), self.strip_value(v)?)))
            .collect()
    }

    fn strip_value(&mut self, value: &Value) -> Result<Value> {
        match value {
            Value::Bytes(bytes) => {
                let offset = self.buf.len();
                self.buf.extend_from_slice(bytes);
                self.used = true;
                let mut placeholder = Payload::new();
                placeholder.insert(
                    BLOB_KEY.to_string(),
                    Value::Array(vec![Value::from(offset as u64), Value::from(bytes.len() as u64)]),
                );
                Ok(Value::Map(placeholder))
            }
            Value::Array(items) => items
                .iter()
                .map(|item| self.strip_value(item))
                .collect::<Result<Vec<_>>>()
                .map(Value::Array),
            Value::Map(map) => self.strip_payload(map).map(Value::Map),
            other => Ok(other.clone()),
        }
    }

    fn finish(self) -> Option<Bytes> {
        self.used.then(|| self.buf.freeze())
    }
}

fn is_reserved(map: &Payload) -> bool {
    map.len() == 1 && map.contains_key(BLOB_KEY)
}

/// Returns the `(offset, len)` of a placeholder map.
fn placeholder_range(map: &Payload) -> Option<(usize, usize)> {
    if !is_reserved(map) {
        return None;
    }
    let range = map.get(BLOB_KEY)?.as_array()?;
    match range {
        [offset, len] => Some((
            usize::try_from(offset.as_u64()?).ok()?,
            usize::try_from(len.as_u64()?).ok()?,
        )),
        _ => None,
    }
}

fn restore_payload(payload: &mut Payload, attachment: &Bytes) -> Result<()> {
    for value in payload.values_mut() {
        restore_value(value, attachment)?;
    }
    Ok(())
}

fn restore_value(value: &mut Value, attachment: &Bytes) -> Result<()> {
    match value {
        Value::Map(map) => {
            if is_reserved(map) {
                let (offset, len) = placeholder_range(map)
                    .ok_or_else(|| Error::codec("malformed attachment reference", &[]))?;
                let end = offset
                    .checked_add(len)
                    .filter(|end| *end <= attachment.len())
                    .ok_or_else(|| {
                        Error::codec(
                            format!(
                                "attachment reference {offset}+{len} outside {} bytes",
                                attachment.len()
                            ),
                            &[],
                        )
                    })?;
                *value = Value::Bytes(attachment[offset..end].to_vec());
                Ok(())
            } else {
                restore_payload(map, attachment)
            }
        }
        Value::Array(items) => {
            for item in items {
                restore_value(item, attachment)?;
            }
            Ok(())
        }
        _ => Ok(()),
    }
}

// ============================================================================
// CBOR
// ============================================================================

fn encode_cbor(envelope: &Envelope) -> Result<Frame> {
    let mut body = Vec::with_capacity(128);
    ciborium::ser::into_writer(envelope, &mut body)
        .map_err(|e| Error::codec(format!("CBOR encode failed: {e}"), &[]))?;
    Ok(Frame::new(Bytes::from(body)))
}

fn decode_cbor(frame: Frame) -> Result<Envelope> {
    if frame.attachment.is_some() {
        return Err(Error::codec(
            "CBOR frames carry no attachment",
            &frame.body,
        ));
    }
    let raw: RawEnvelope = ciborium::de::from_reader(&frame.body[..])
        .map_err(|e| Error::codec(format!("CBOR decode failed: {e}"), &frame.body))?;
    raw.classify()
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identifiers::MessageId;
    use crate::payload;

    use proptest::prelude::*;

    fn roundtrip(encoding: Encoding, envelope: &Envelope) -> Envelope {
        let frame = encoding.encode(envelope).expect("encode");
        encoding.decode(frame).expect("decode")
    }

    fn sample_message() -> Envelope {
        Envelope::Message(Message::new(
            MessageId::from("12"),
            "createLabel",
            payload! {
                "text" => "héllo\nwörld\t\u{1F600}",
                "empty" => "",
                "nested" => payload! { "list" => vec![Value::from(1), Value::Null, Value::from(false)] },
            },
        ))
    }

    #[test]
    fn test_json_body_has_no_newline() {
        let frame = Encoding::Json.encode(&sample_message()).expect("encode");
        assert!(!frame.body.contains(&b'\n'));
        assert!(frame.attachment.is_none());
    }

    #[test]
    fn test_roundtrip_both_encodings() {
        let envelopes = [
            sample_message(),
            Envelope::Response(Response::ok(MessageId::from("1"), payload! { "pong" => true })),
            Envelope::Response(Response::err(MessageId::from("2"), "Unknown message type: x")),
            Envelope::Event(Event::new("click", "btn-1", None)),
            Envelope::Event(Event::new("change", "entry-3", Some(payload! { "text" => "" }))),
        ];
        for encoding in [Encoding::Json, Encoding::Cbor] {
            for envelope in &envelopes {
                assert_eq!(&roundtrip(encoding, envelope), envelope, "{encoding}");
            }
        }
    }

    #[test]
    fn test_json_moves_bytes_to_attachment() {
        let envelope = Envelope::Message(Message::new(
            MessageId::from("5"),
            "setPixels",
            payload! {
                "a" => vec![1u8, 2, 3],
                "frames" => vec![Value::Bytes(vec![9; 4]), Value::Bytes(Vec::new())],
            },
        ));
        let frame = Encoding::Json.encode(&envelope).expect("encode");
        let attachment = frame.attachment.clone().expect("attachment");
        assert_eq!(attachment.len(), 7);
        let body = std::str::from_utf8(&frame.body).expect("utf8");
        assert!(body.contains("$blob"));
        assert_eq!(Encoding::Json.decode(frame).expect("decode"), envelope);
    }

    #[test]
    fn test_json_rejects_reserved_map() {
        let envelope = Envelope::Message(Message::new(
            MessageId::from("1"),
            "x",
            payload! { "v" => payload! { "$blob" => 1 } },
        ));
        assert!(matches!(
            Encoding::Json.encode(&envelope),
            Err(Error::Codec { .. })
        ));
    }

    #[test]
    fn test_json_rejects_dangling_blob_reference() {
        let frame = Frame::new(Bytes::from_static(
            br#"{"id":"1","type":"x","payload":{"p":{"$blob":[0,10]}}}"#,
        ));
        assert!(matches!(
            Encoding::Json.decode(frame),
            Err(Error::Codec { .. })
        ));
    }

    #[test]
    fn test_malformed_json_is_codec_error() {
        let frame = Frame::new(Bytes::from_static(b"{not json"));
        let err = Encoding::Json.decode(frame).unwrap_err();
        let Error::Codec { raw, .. } = err else {
            panic!("expected codec error, got {err}");
        };
        assert_eq!(raw, hex::encode(b"{not json"));
    }

    #[test]
    fn test_malformed_cbor_is_codec_error() {
        let frame = Frame::new(Bytes::from_static(&[0xff, 0x00, 0x13]));
        assert!(Encoding::Cbor.decode(frame).unwrap_err().is_recoverable());
    }

    #[test]
    fn test_empty_frame_is_codec_error() {
        for encoding in [Encoding::Json, Encoding::Cbor] {
            let err = encoding.decode(Frame::default()).unwrap_err();
            assert!(matches!(err, Error::Codec { .. }), "{encoding}: {err}");
        }
    }

    #[test]
    fn test_encoding_from_str() {
        assert_eq!("CBOR".parse::<Encoding>().expect("parse"), Encoding::Cbor);
        assert!("xml".parse::<Encoding>().is_err());
    }

    fn arb_value() -> impl Strategy<Value = Value> {
        let leaf = prop_oneof![
            Just(Value::Null),
            any::<bool>().prop_map(Value::Bool),
            any::<i64>().prop_map(Value::Int),
            (i64::MAX as u64 + 1..=u64::MAX).prop_map(Value::UInt),
            // Dyadic fractions print and parse back exactly.
            (-1_000_000i32..1_000_000).prop_map(|v| Value::Float(f64::from(v) / 8.0)),
            ".*".prop_map(Value::String),
            prop::collection::vec(any::<u8>(), 0..32).prop_map(Value::Bytes),
        ];
        leaf.prop_recursive(3, 32, 6, |inner| {
            prop_oneof![
                prop::collection::vec(inner.clone(), 0..6).prop_map(Value::Array),
                prop::collection::btree_map("[a-z]{1,6}", inner, 0..6).prop_map(Value::Map),
            ]
        })
    }

    fn arb_payload() -> impl Strategy<Value = Payload> {
        prop::collection::btree_map("[a-zA-Z]{1,8}", arb_value(), 0..6)
    }

    proptest! {
        #[test]
        fn prop_message_roundtrip(id in "[0-9]{1,6}", kind in "[a-zA-Z]{1,12}", payload in arb_payload()) {
            let envelope = Envelope::Message(Message::new(MessageId::from(id), kind, payload));
            for encoding in [Encoding::Json, Encoding::Cbor] {
                prop_assert_eq!(&roundtrip(encoding, &envelope), &envelope);
            }
        }

        #[test]
        fn prop_event_roundtrip(source in ".*", data in proptest::option::of(arb_payload())) {
            let envelope = Envelope::Event(Event::new("tick", source, data));
            for encoding in [Encoding::Json, Encoding::Cbor] {
                prop_assert_eq!(&roundtrip(encoding, &envelope), &envelope);
            }
        }
    }
}
