//! Framing: byte streams to complete frames.
//!
//! Three disciplines, each a [`tokio_util::codec`] `Decoder` + `Encoder`:
//!
//! | Codec | Wire layout | Used by |
//! |-------|-------------|---------|
//! | [`LineCodec`] | `body\n` or `body\t<n>\n<n bytes>` | stdio (default) |
//! | [`ChecksummedCodec`] | `[u32 len][u32 crc32][u32 body len][body][attachment]` | stdio (checked) |
//! | [`LengthPrefixedCodec`] | `[u32 len][body]` | binary-rpc, local-socket |
//!
//! All lengths are big-endian. A decoder never yields a partial frame; bytes
//! left over at end of stream surface as an error.

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::io::{Error as IoError, ErrorKind};
use std::pin::Pin;
use std::str::FromStr;

use bytes::{Buf, BufMut, Bytes, BytesMut};
use futures_util::{Sink, Stream};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_util::codec::{Decoder, Encoder, FramedRead, FramedWrite};
use tracing::warn;

use crate::error::{Error, Result};

// ============================================================================
// Constants
// ============================================================================

/// Default cap on a single frame (100 MiB).
pub const DEFAULT_MAX_FRAME_SIZE: usize = 100 * 1024 * 1024;

/// Size of the length prefix.
const LEN_PREFIX: usize = 4;

/// Size of the length + checksum header.
const CHECKED_HEADER: usize = 8;

/// Size of the body length inside a checksummed record.
const BODY_LEN: usize = 4;

// ============================================================================
// Frame
// ============================================================================

/// One complete unit read from or written to a transport.
///
/// `attachment` is the binary segment that follows a text record. Line and
/// checksummed framing carry it; length-prefixed framing does not.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Frame {
    /// Encoded envelope.
    pub body: Bytes,
    /// Binary segment announced by the record, if any.
    pub attachment: Option<Bytes>,
}

impl Frame {
    /// Creates a frame without attachment.
    #[inline]
    #[must_use]
    pub fn new(body: Bytes) -> Self {
        Self {
            body,
            attachment: None,
        }
    }

    /// Creates a frame with a binary attachment.
    #[inline]
    #[must_use]
    pub fn with_attachment(body: Bytes, attachment: Bytes) -> Self {
        Self {
            body,
            attachment: Some(attachment),
        }
    }

    /// Total payload size in bytes.
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.body.len() + self.attachment.as_ref().map_or(0, Bytes::len)
    }

    /// Returns `true` if the frame carries no bytes at all.
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

// ============================================================================
// Framing
// ============================================================================

/// Selects a framing discipline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Framing {
    /// Newline-delimited records with optional attachments.
    Lines,
    /// Length + CRC32 prefixed records.
    Checksummed,
    /// Length prefixed records.
    LengthPrefixed,
}

impl Framing {
    /// Returns the framing name.
    #[inline]
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Lines => "lines",
            Self::Checksummed => "checksummed",
            Self::LengthPrefixed => "length-prefixed",
        }
    }
}

impl fmt::Display for Framing {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Framing {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "lines" => Ok(Self::Lines),
            "checksummed" => Ok(Self::Checksummed),
            "length-prefixed" => Ok(Self::LengthPrefixed),
            other => Err(Error::config(format!("unknown framing: {other}"))),
        }
    }
}

/// Stream of decoded frames. An `Err` item is fatal and ends the stream.
pub type FrameStream = Pin<Box<dyn Stream<Item = Result<Frame>> + Send>>;

/// Sink accepting frames to encode.
pub type FrameSink = Pin<Box<dyn Sink<Frame, Error = Error> + Send>>;

/// Wraps an IO pair in the chosen framing.
pub fn framed<R, W>(reader: R, writer: W, framing: Framing, max_frame: usize) -> (FrameStream, FrameSink)
where
    R: AsyncRead + Send + 'static,
    W: AsyncWrite + Send + 'static,
{
    match framing {
        Framing::Lines => (
            Box::pin(FramedRead::new(reader, LineCodec::new(max_frame))),
            Box::pin(FramedWrite::new(writer, LineCodec::new(max_frame))),
        ),
        Framing::Checksummed => (
            Box::pin(FramedRead::new(reader, ChecksummedCodec::new(max_frame))),
            Box::pin(FramedWrite::new(writer, ChecksummedCodec::new(max_frame))),
        ),
        Framing::LengthPrefixed => (
            Box::pin(FramedRead::new(reader, LengthPrefixedCodec::new(max_frame))),
            Box::pin(FramedWrite::new(writer, LengthPrefixedCodec::new(max_frame))),
        ),
    }
}

// ============================================================================
// LineCodec
// ============================================================================

/// Read state of a [`LineCodec`].
#[derive(Debug)]
enum LineState {
    /// Scanning for the end of a record; `scanned` bytes contain no newline.
    Record { scanned: usize },
    /// Record read, waiting for `len` attachment bytes.
    Attachment { body: Bytes, len: usize },
}

/// Newline-delimited records with optional binary attachments.
///
/// A record ending in `\t<decimal>` announces an attachment of that many
/// raw bytes following the newline. Record bodies must not contain `\n`.
#[derive(Debug)]
pub struct LineCodec {
    max_frame: usize,
    state: LineState,
}

impl LineCodec {
    /// Creates a line codec with the given size cap for records and attachments.
    #[must_use]
    pub fn new(max_frame: usize) -> Self {
        Self {
            max_frame,
            state: LineState::Record { scanned: 0 },
        }
    }

    /// Splits `body\t<n>` into the body and the announced attachment length.
    fn split_announcement(&self, mut line: Bytes) -> Result<(Bytes, Option<usize>)> {
        let Some(tab) = line.iter().rposition(|b| *b == b'\t') else {
            return Ok((line, None));
        };
        let digits = line.split_off(tab + 1);
        line.truncate(tab);
        let len = std::str::from_utf8(&digits)
            .ok()
            .and_then(|s| s.parse::<usize>().ok())
            .ok_or_else(|| {
                Error::protocol(format!(
                    "unparsable attachment length: {}",
                    String::from_utf8_lossy(&digits)
                ))
            })?;
        if len > self.max_frame {
            return Err(Error::frame_too_large(len, self.max_frame));
        }
        Ok((line, Some(len)))
    }
}

impl Decoder for LineCodec {
    type Item = Frame;
    type Error = Error;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Frame>> {
        loop {
            match &mut self.state {
                LineState::Record { scanned } => {
                    let Some(pos) = src[*scanned..].iter().position(|b| *b == b'\n') else {
                        if src.len() > self.max_frame {
                            return Err(Error::frame_too_large(src.len(), self.max_frame));
                        }
                        *scanned = src.len();
                        return Ok(None);
                    };
                    let end = *scanned + pos;
                    if end > self.max_frame {
                        return Err(Error::frame_too_large(end, self.max_frame));
                    }
                    let mut line = src.split_to(end + 1).freeze();
                    line.truncate(end);
                    if line.last() == Some(&b'\r') {
                        line.truncate(end - 1);
                    }
                    self.state = LineState::Record { scanned: 0 };

                    if line.is_empty() {
                        continue;
                    }

                    match self.split_announcement(line)? {
                        (body, None) => return Ok(Some(Frame::new(body))),
                        (body, Some(len)) => {
                            self.state = LineState::Attachment { body, len };
                        }
                    }
                }
                LineState::Attachment { body, len } => {
                    if src.len() < *len {
                        src.reserve(*len - src.len());
                        return Ok(None);
                    }
                    let attachment = src.split_to(*len).freeze();
                    let body = std::mem::take(body);
                    self.state = LineState::Record { scanned: 0 };
                    return Ok(Some(Frame::with_attachment(body, attachment)));
                }
            }
        }
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<Frame>> {
        if let Some(frame) = self.decode(src)? {
            return Ok(Some(frame));
        }
        match &self.state {
            LineState::Attachment { len, .. } => Err(Error::Io(IoError::new(
                ErrorKind::UnexpectedEof,
                format!("stream ended {} bytes into a {len}-byte attachment", src.len()),
            ))),
            LineState::Record { .. } if !src.is_empty() => Err(Error::Io(IoError::new(
                ErrorKind::UnexpectedEof,
                format!("stream ended inside a {}-byte record", src.len()),
            ))),
            LineState::Record { .. } => Ok(None),
        }
    }
}

impl Encoder<Frame> for LineCodec {
    type Error = Error;

    fn encode(&mut self, frame: Frame, dst: &mut BytesMut) -> Result<()> {
        if frame.body.contains(&b'\n') {
            return Err(Error::codec("record separator inside record body", &frame.body));
        }
        if frame.body.len() > self.max_frame {
            return Err(Error::frame_too_large(frame.body.len(), self.max_frame));
        }

        match frame.attachment {
            None => {
                dst.reserve(frame.body.len() + 1);
                dst.put_slice(&frame.body);
                dst.put_u8(b'\n');
            }
            Some(attachment) => {
                if attachment.len() > self.max_frame {
                    return Err(Error::frame_too_large(attachment.len(), self.max_frame));
                }
                let header = format!("\t{}\n", attachment.len());
                dst.reserve(frame.body.len() + header.len() + attachment.len());
                dst.put_slice(&frame.body);
                dst.put_slice(header.as_bytes());
                dst.put_slice(&attachment);
            }
        }
        Ok(())
    }
}

// ============================================================================
// LengthPrefixedCodec
// ============================================================================

/// `[u32 big-endian length][payload]` framing.
#[derive(Debug, Clone, Copy)]
pub struct LengthPrefixedCodec {
    max_frame: usize,
}

impl LengthPrefixedCodec {
    /// Creates a codec rejecting frames above `max_frame` bytes.
    #[inline]
    #[must_use]
    pub const fn new(max_frame: usize) -> Self {
        Self { max_frame }
    }
}

impl Decoder for LengthPrefixedCodec {
    type Item = Frame;
    type Error = Error;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Frame>> {
        if src.len() < LEN_PREFIX {
            return Ok(None);
        }

        let len = u32::from_be_bytes([src[0], src[1], src[2], src[3]]) as usize;
        if len > self.max_frame {
            return Err(Error::frame_too_large(len, self.max_frame));
        }

        if src.len() < LEN_PREFIX + len {
            src.reserve(LEN_PREFIX + len - src.len());
            return Ok(None);
        }

        src.advance(LEN_PREFIX);
        Ok(Some(Frame::new(src.split_to(len).freeze())))
    }
}

impl Encoder<Frame> for LengthPrefixedCodec {
    type Error = Error;

    fn encode(&mut self, frame: Frame, dst: &mut BytesMut) -> Result<()> {
        if frame.attachment.is_some() {
            return Err(Error::codec(
                "length-prefixed frames carry no attachment",
                &frame.body,
            ));
        }
        let len = frame.body.len();
        if len > self.max_frame {
            return Err(Error::frame_too_large(len, self.max_frame));
        }
        dst.reserve(LEN_PREFIX + len);
        dst.put_u32(len as u32);
        dst.put_slice(&frame.body);
        Ok(())
    }
}

// ============================================================================
// ChecksummedCodec
// ============================================================================

/// `[u32 length][u32 crc32][u32 body length][body][attachment]` framing.
///
/// `length` counts everything after the checksum, and the checksum covers
/// the same bytes. An empty attachment decodes as none. A frame whose
/// checksum does not match is dropped with a warning and decoding resumes
/// at the next frame boundary.
#[derive(Debug, Clone, Copy)]
pub struct ChecksummedCodec {
    max_frame: usize,
}

impl ChecksummedCodec {
    /// Creates a codec rejecting frames above `max_frame` bytes.
    #[inline]
    #[must_use]
    pub const fn new(max_frame: usize) -> Self {
        Self { max_frame }
    }
}

impl Decoder for ChecksummedCodec {
    type Item = Frame;
    type Error = Error;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Frame>> {
        loop {
            if src.len() < CHECKED_HEADER {
                return Ok(None);
            }

            let len = u32::from_be_bytes([src[0], src[1], src[2], src[3]]) as usize;
            if len > self.max_frame {
                return Err(Error::frame_too_large(len, self.max_frame));
            }
            let expected = u32::from_be_bytes([src[4], src[5], src[6], src[7]]);

            if src.len() < CHECKED_HEADER + len {
                src.reserve(CHECKED_HEADER + len - src.len());
                return Ok(None);
            }

            src.advance(CHECKED_HEADER);
            let mut record = src.split_to(len).freeze();
            let actual = crc32fast::hash(&record);
            if actual != expected {
                warn!(expected, actual, len, "Checksum mismatch, dropping frame");
                continue;
            }
            if record.len() < BODY_LEN {
                warn!(len, "Checked record too short for a body length, dropping frame");
                continue;
            }

            let body_len = record.get_u32() as usize;
            if body_len > record.len() {
                warn!(body_len, len, "Body length exceeds record, dropping frame");
                continue;
            }
            let body = record.split_to(body_len);
            return Ok(Some(if record.is_empty() {
                Frame::new(body)
            } else {
                Frame::with_attachment(body, record)
            }));
        }
    }
}

impl Encoder<Frame> for ChecksummedCodec {
    type Error = Error;

    fn encode(&mut self, frame: Frame, dst: &mut BytesMut) -> Result<()> {
        let attachment = frame.attachment.unwrap_or_default();
        let len = BODY_LEN + frame.body.len() + attachment.len();
        if len > self.max_frame {
            return Err(Error::frame_too_large(len, self.max_frame));
        }

        dst.reserve(CHECKED_HEADER + len);
        let start = dst.len();
        dst.put_u32(len as u32);
        dst.put_u32(0);
        dst.put_u32(frame.body.len() as u32);
        dst.put_slice(&frame.body);
        dst.put_slice(&attachment);

        let crc = crc32fast::hash(&dst[start + CHECKED_HEADER..]);
        dst[start + LEN_PREFIX..start + CHECKED_HEADER].copy_from_slice(&crc.to_be_bytes());
        Ok(())
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use futures_util::{SinkExt, StreamExt};
    use tokio::io::AsyncWriteExt;

    fn encode<C: Encoder<Frame, Error = Error>>(codec: &mut C, frame: Frame) -> BytesMut {
        let mut buf = BytesMut::new();
        codec.encode(frame, &mut buf).expect("encode");
        buf
    }

    #[test]
    fn test_length_prefixed_zero_length() {
        let mut codec = LengthPrefixedCodec::new(16);
        let mut buf = BytesMut::from(&[0u8, 0, 0, 0][..]);
        let frame = codec.decode(&mut buf).expect("decode").expect("frame");
        assert!(frame.is_empty());
        assert!(buf.is_empty());
    }

    #[test]
    fn test_length_prefixed_rejects_oversized_without_buffering() {
        let mut codec = LengthPrefixedCodec::new(1024);
        let mut buf = BytesMut::from(&[0xffu8, 0xff, 0xff, 0xff][..]);
        let err = codec.decode(&mut buf).unwrap_err();
        assert!(matches!(err, Error::FrameTooLarge { size, max: 1024 } if size == u32::MAX as usize));
        assert!(buf.capacity() < 1024 * 1024);
    }

    #[test]
    fn test_length_prefixed_partial_reads() {
        let mut codec = LengthPrefixedCodec::new(1024);
        let wire = encode(&mut codec, Frame::new(Bytes::from_static(b"hello")));

        let mut buf = BytesMut::new();
        for (i, byte) in wire.iter().enumerate() {
            buf.put_u8(*byte);
            let out = codec.decode(&mut buf).expect("decode");
            if i + 1 < wire.len() {
                assert!(out.is_none(), "yielded early at byte {i}");
            } else {
                assert_eq!(out.expect("frame").body, Bytes::from_static(b"hello"));
            }
        }
    }

    #[test]
    fn test_length_prefixed_back_to_back() {
        let mut codec = LengthPrefixedCodec::new(1024);
        let mut buf = encode(&mut codec, Frame::new(Bytes::from_static(b"a")));
        buf.extend_from_slice(&encode(&mut codec, Frame::new(Bytes::from_static(b"bc"))));

        assert_eq!(codec.decode(&mut buf).expect("decode").expect("frame").body, "a");
        assert_eq!(codec.decode(&mut buf).expect("decode").expect("frame").body, "bc");
        assert!(codec.decode(&mut buf).expect("decode").is_none());
    }

    #[test]
    fn test_line_codec_plain_records() {
        let mut codec = LineCodec::new(1024);
        let mut buf = BytesMut::from(&b"{\"a\":1}\r\n\n{\"b\":2}\n{\"c\""[..]);

        assert_eq!(codec.decode(&mut buf).expect("decode").expect("frame").body, "{\"a\":1}");
        assert_eq!(codec.decode(&mut buf).expect("decode").expect("frame").body, "{\"b\":2}");
        assert!(codec.decode(&mut buf).expect("decode").is_none());

        buf.extend_from_slice(b":3}\n");
        assert_eq!(codec.decode(&mut buf).expect("decode").expect("frame").body, "{\"c\":3}");
    }

    #[test]
    fn test_line_codec_two_phase_attachment() {
        let mut codec = LineCodec::new(1024);
        let frame = Frame::with_attachment(Bytes::from_static(b"{}"), Bytes::from_static(b"\n\x00\n"));
        let wire = encode(&mut codec, frame.clone());
        assert_eq!(&wire[..], b"{}\t3\n\n\x00\n");

        let mut buf = BytesMut::from(&wire[..wire.len() - 1]);
        assert!(codec.decode(&mut buf).expect("decode").is_none());
        buf.put_u8(b'\n');
        assert_eq!(codec.decode(&mut buf).expect("decode"), Some(frame));
    }

    #[test]
    fn test_line_codec_bad_announcement_is_fatal() {
        let mut codec = LineCodec::new(1024);
        let mut buf = BytesMut::from(&b"{}\tabc\n"[..]);
        assert!(matches!(codec.decode(&mut buf), Err(Error::Protocol { .. })));

        let mut codec = LineCodec::new(8);
        let mut buf = BytesMut::from(&b"{}\t9\n"[..]);
        assert!(matches!(codec.decode(&mut buf), Err(Error::FrameTooLarge { .. })));
    }

    #[test]
    fn test_line_codec_oversized_record() {
        let mut codec = LineCodec::new(4);
        let mut buf = BytesMut::from(&b"0123456789"[..]);
        assert!(matches!(codec.decode(&mut buf), Err(Error::FrameTooLarge { .. })));
    }

    #[test]
    fn test_line_codec_oversized_record_in_one_chunk() {
        let mut codec = LineCodec::new(4);
        let mut buf = BytesMut::from(&b"0123456789\n"[..]);
        assert!(matches!(
            codec.decode(&mut buf),
            Err(Error::FrameTooLarge { size: 10, max: 4 })
        ));

        let mut codec = LineCodec::new(4);
        let mut buf = BytesMut::from(&b"0123\n"[..]);
        assert_eq!(codec.decode(&mut buf).expect("decode").expect("frame").body, "0123");
    }

    #[test]
    fn test_line_codec_eof_inside_attachment() {
        let mut codec = LineCodec::new(64);
        let mut buf = BytesMut::from(&b"{}\t5\n"[..]);
        assert!(codec.decode(&mut buf).expect("decode").is_none());
        assert!(buf.is_empty());

        let err = codec.decode_eof(&mut buf).unwrap_err();
        assert!(matches!(err, Error::Io(ref e) if e.kind() == ErrorKind::UnexpectedEof));
    }

    #[test]
    fn test_line_codec_clean_eof() {
        let mut codec = LineCodec::new(64);
        let mut buf = BytesMut::from(&b"{}\n"[..]);
        assert_eq!(codec.decode_eof(&mut buf).expect("decode").expect("frame").body, "{}");
        assert!(codec.decode_eof(&mut buf).expect("decode").is_none());
    }

    #[test]
    fn test_line_codec_rejects_newline_in_body() {
        let mut codec = LineCodec::new(64);
        let mut buf = BytesMut::new();
        let err = codec
            .encode(Frame::new(Bytes::from_static(b"a\nb")), &mut buf)
            .unwrap_err();
        assert!(matches!(err, Error::Codec { .. }));
    }

    #[test]
    fn test_checksummed_drops_corrupt_frame_and_resyncs() {
        let mut codec = ChecksummedCodec::new(1024);
        let mut corrupt = encode(&mut codec, Frame::new(Bytes::from_static(b"first")));
        let last = corrupt.len() - 1;
        corrupt[last] ^= 0xff;
        corrupt.extend_from_slice(&encode(&mut codec, Frame::new(Bytes::from_static(b"second"))));

        let frame = codec.decode(&mut corrupt).expect("decode").expect("frame");
        assert_eq!(frame.body, "second");
        assert!(corrupt.is_empty());
    }

    #[test]
    fn test_checksummed_carries_attachment() {
        let mut codec = ChecksummedCodec::new(1024);
        let frame = Frame::with_attachment(
            Bytes::from_static(b"{\"pixels\":{\"$blob\":[0,3]}}"),
            Bytes::from_static(&[1, 2, 3]),
        );
        let mut buf = encode(&mut codec, frame.clone());
        buf.extend_from_slice(&encode(&mut codec, Frame::new(Bytes::from_static(b"plain"))));

        assert_eq!(codec.decode(&mut buf).expect("decode"), Some(frame));
        let plain = codec.decode(&mut buf).expect("decode").expect("frame");
        assert_eq!(plain.body, "plain");
        assert!(plain.attachment.is_none());
    }

    #[test]
    fn test_checksummed_detects_corrupt_attachment() {
        let mut codec = ChecksummedCodec::new(1024);
        let mut buf = encode(
            &mut codec,
            Frame::with_attachment(Bytes::from_static(b"{}"), Bytes::from_static(b"abc")),
        );
        let last = buf.len() - 1;
        buf[last] ^= 0x01;

        assert!(codec.decode(&mut buf).expect("decode").is_none());
        assert!(buf.is_empty());
    }

    #[test]
    fn test_checksummed_size_cap_counts_attachment() {
        let mut codec = ChecksummedCodec::new(8);
        let mut buf = BytesMut::new();
        let err = codec
            .encode(
                Frame::with_attachment(Bytes::from_static(b"{}"), Bytes::from_static(b"abc")),
                &mut buf,
            )
            .unwrap_err();
        assert!(matches!(err, Error::FrameTooLarge { size: 9, max: 8 }));
    }

    #[test]
    fn test_framing_from_str() {
        assert_eq!("checksummed".parse::<Framing>().expect("parse"), Framing::Checksummed);
        assert!("zigzag".parse::<Framing>().is_err());
    }

    #[tokio::test]
    async fn test_framed_stream_over_duplex() {
        let (client, server) = tokio::io::duplex(64);
        let (_, client_write) = tokio::io::split(client);
        let (server_read, _) = tokio::io::split(server);

        let (mut frames, _) = framed(server_read, tokio::io::sink(), Framing::LengthPrefixed, 1024);
        let (_, mut sink) = framed(tokio::io::empty(), client_write, Framing::LengthPrefixed, 1024);

        let big = Bytes::from(vec![7u8; 300]);
        let write = async {
            sink.send(Frame::new(big.clone())).await.expect("send");
            sink.send(Frame::new(Bytes::new())).await.expect("send");
            sink.close().await.expect("close");
        };
        let read = async {
            assert_eq!(frames.next().await.expect("item").expect("frame").body, big);
            assert!(frames.next().await.expect("item").expect("frame").is_empty());
            assert!(frames.next().await.is_none());
        };
        tokio::join!(write, read);
    }

    #[tokio::test]
    async fn test_truncated_stream_is_error() {
        let (mut client, server) = tokio::io::duplex(64);
        let (mut frames, _) = framed(server, tokio::io::sink(), Framing::LengthPrefixed, 1024);

        client.write_all(&[0, 0, 0, 10, 1, 2]).await.expect("write");
        drop(client);

        assert!(frames.next().await.expect("item").is_err());
    }
}
