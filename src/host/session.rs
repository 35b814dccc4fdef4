//! Single-peer serving loop.

// ============================================================================
// Imports
// ============================================================================

use std::sync::Arc;

use futures_util::{SinkExt, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::mpsc;
use tracing::{debug, info, trace, warn};

use crate::error::Result;
use crate::identifiers::ConnectionId;
use crate::protocol::{Encoding, Envelope, Handshake};
use crate::transport::{DEFAULT_MAX_FRAME_SIZE, FrameSink, Framing, framed};

use super::{Handler, HostContext};

// ============================================================================
// Serving
// ============================================================================

/// Serves the client on this process's stdin/stdout with JSON envelopes.
///
/// # Errors
///
/// Returns the framing error that ended the stream, if any.
pub async fn serve_stdio(handler: Arc<dyn Handler>, framing: Framing) -> Result<()> {
    serve_io(
        tokio::io::stdin(),
        tokio::io::stdout(),
        framing,
        Encoding::Json,
        handler,
    )
    .await
}

/// Serves one peer over a reader/writer pair.
///
/// Writes the `ready` handshake first, then handles each message on its own
/// task. Returns when the peer closes its side.
///
/// # Errors
///
/// Returns the framing error that ended the stream, if any. Undecodable
/// frames are logged and skipped.
pub async fn serve_io<R, W>(
    reader: R,
    writer: W,
    framing: Framing,
    encoding: Encoding,
    handler: Arc<dyn Handler>,
) -> Result<()>
where
    R: AsyncRead + Send + 'static,
    W: AsyncWrite + Send + 'static,
{
    let (mut frames, sink) = framed(reader, writer, framing, DEFAULT_MAX_FRAME_SIZE);
    let (tx, rx) = mpsc::unbounded_channel();
    tokio::spawn(write_envelopes(sink, rx, encoding));

    let _ = tx.send(Envelope::Response(Handshake::current().to_ready_response()));

    let connection_id = ConnectionId::next();
    let ctx = HostContext::peer(connection_id, tx.clone());
    info!(%connection_id, %framing, %encoding, "Serving peer");

    while let Some(frame) = frames.next().await {
        let frame = frame?;
        match encoding.decode(frame) {
            Ok(Envelope::Message(message)) => {
                trace!(id = %message.id, message_type = %message.message_type, "Message received");
                let handler = Arc::clone(&handler);
                let ctx = ctx.clone();
                let tx = tx.clone();
                tokio::spawn(async move {
                    let response = handler.handle(message, ctx).await;
                    let _ = tx.send(Envelope::Response(response));
                });
            }
            Ok(other) => warn!(kind = other.kind(), "Ignoring non-message envelope"),
            Err(e) => warn!(error = %e, "Dropping undecodable frame"),
        }
    }

    debug!(%connection_id, "Peer closed its side");
    Ok(())
}

/// Encodes envelopes from `rx` onto `sink` until every sender is gone.
pub(crate) async fn write_envelopes(
    mut sink: FrameSink,
    mut rx: mpsc::UnboundedReceiver<Envelope>,
    encoding: Encoding,
) {
    while let Some(envelope) = rx.recv().await {
        let frame = match encoding.encode(&envelope) {
            Ok(frame) => frame,
            Err(e) => {
                warn!(error = %e, kind = envelope.kind(), "Failed to encode envelope");
                continue;
            }
        };
        if let Err(e) = sink.send(frame).await {
            if e.is_fatal() {
                debug!(error = %e, "Peer stopped reading");
                break;
            }
            warn!(error = %e, "Frame rejected by encoder");
        }
    }
    let _ = sink.close().await;
}

// ============================================================================
// Tests
// ============================================================================
