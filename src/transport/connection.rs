//! Transport handle, writer task, and read loop.
//!
//! A [`Transport`] moves [`Frame`]s between this process and the host. It is
//! split in two halves that never block each other:
//!
//! - a writer task draining a bounded queue, so writes are serialized and
//!   callers suspend when the peer stops reading
//! - a read loop task delivering frames to a [`FrameHandler`] in wire order
//!
//! Reading and writing run on separate tasks so a host blocked on a full
//! stdout pipe can never deadlock against a client blocked on stdin.

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::str::FromStr;

use futures_util::{SinkExt, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, error, trace, warn};

use crate::bridge::BridgeConfig;
use crate::error::{Error, Result};
use crate::protocol::{Encoding, Handshake};

use super::framing::{Frame, FrameSink, FrameStream, Framing, framed};
use super::process::HostProcess;
use super::{rpc, socket, stdio};

// ============================================================================
// Constants
// ============================================================================

/// Frames queued for the writer before `write` suspends.
const WRITE_QUEUE_CAPACITY: usize = 256;

// ============================================================================
// TransportKind
// ============================================================================

/// Transport used to reach the host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TransportKind {
    /// Frames on the host's stdin/stdout.
    Stdio,
    /// Token-authenticated loopback TCP with length-prefixed CBOR.
    BinaryRpc,
    /// Unix socket (loopback TCP elsewhere) with length-prefixed CBOR.
    LocalSocket,
}

impl TransportKind {
    /// Returns the mode name passed to the host.
    #[inline]
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Stdio => "stdio",
            Self::BinaryRpc => "binary-rpc",
            Self::LocalSocket => "local-socket",
        }
    }

    /// Wire encoding used on this transport.
    #[inline]
    #[must_use]
    pub const fn encoding(&self) -> Encoding {
        match self {
            Self::Stdio => Encoding::Json,
            Self::BinaryRpc | Self::LocalSocket => Encoding::Cbor,
        }
    }
}

impl fmt::Display for TransportKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TransportKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "stdio" => Ok(Self::Stdio),
            "binary-rpc" | "grpc" => Ok(Self::BinaryRpc),
            "local-socket" | "msgpack-uds" => Ok(Self::LocalSocket),
            other => Err(Error::config(format!("unknown transport: {other}"))),
        }
    }
}

// ============================================================================
// FrameHandler
// ============================================================================

/// Receives frames from a [`ReadLoop`].
///
/// Called from the read loop task; `on_frame` should not block.
pub trait FrameHandler: Send + 'static {
    /// Called for each complete frame, in wire order.
    fn on_frame(&mut self, frame: Frame);

    /// Called once when the stream ends or fails.
    fn on_close(&mut self, reason: Error);
}

// ============================================================================
// FrameWriter
// ============================================================================

/// Commands for the writer task.
enum WriteCommand {
    /// Write one frame and report the outcome.
    Frame {
        frame: Frame,
        ack: oneshot::Sender<Result<()>>,
    },
    /// Flush and close the sink.
    Close { ack: oneshot::Sender<()> },
}

/// Cloneable handle to a transport's writer task.
#[derive(Clone)]
pub struct FrameWriter {
    tx: mpsc::Sender<WriteCommand>,
}

impl fmt::Debug for FrameWriter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FrameWriter")
            .field("closed", &self.tx.is_closed())
            .finish()
    }
}

impl FrameWriter {
    /// Spawns the writer task for `sink`.
    fn spawn(sink: FrameSink) -> Self {
        let (tx, rx) = mpsc::channel(WRITE_QUEUE_CAPACITY);
        tokio::spawn(run_writer(sink, rx));
        Self { tx }
    }

    /// Writes one frame.
    ///
    /// Suspends while the queue is full. Resolves once the frame has been
    /// handed to the underlying stream.
    ///
    /// # Errors
    ///
    /// - [`Error::ConnectionClosed`] if the writer has stopped
    /// - the encoder or IO error otherwise
    pub async fn write(&self, frame: Frame) -> Result<()> {
        let (ack, rx) = oneshot::channel();
        self.tx
            .send(WriteCommand::Frame { frame, ack })
            .await
            .map_err(|_| Error::ConnectionClosed)?;
        rx.await.map_err(|_| Error::ConnectionClosed)?
    }

    /// Flushes queued frames and closes the stream.
    ///
    /// No-op if the writer has already stopped.
    pub async fn close(&self) {
        let (ack, rx) = oneshot::channel();
        if self.tx.send(WriteCommand::Close { ack }).await.is_ok() {
            let _ = rx.await;
        }
    }

    /// Returns `true` if the writer task has stopped.
    #[inline]
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

/// Writer task: drains the queue into the sink.
async fn run_writer(mut sink: FrameSink, mut rx: mpsc::Receiver<WriteCommand>) {
    while let Some(command) = rx.recv().await {
        match command {
            WriteCommand::Frame { frame, ack } => {
                let len = frame.len();
                let result = sink.send(frame).await;
                let fatal = match &result {
                    Ok(()) => {
                        trace!(len, "Frame written");
                        false
                    }
                    Err(e) if e.is_fatal() => {
                        error!(error = %e, "Transport write failed");
                        true
                    }
                    Err(e) => {
                        warn!(error = %e, "Frame rejected by encoder");
                        false
                    }
                };
                let _ = ack.send(result);
                if fatal {
                    break;
                }
            }
            WriteCommand::Close { ack } => {
                if let Err(e) = sink.close().await {
                    debug!(error = %e, "Error closing transport sink");
                }
                let _ = ack.send(());
                break;
            }
        }
    }
    debug!("Writer task terminated");
}

// ============================================================================
// ReadLoop
// ============================================================================

/// Handle to a running read loop. Aborts the loop when dropped.
#[derive(Debug)]
pub struct ReadLoop {
    task: JoinHandle<()>,
}

impl ReadLoop {
    /// Stops the loop. The handler's `on_close` is not called.
    #[inline]
    pub fn abort(&self) {
        self.task.abort();
    }

    /// Returns `true` if the loop has ended.
    #[inline]
    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Waits for the loop to end.
    pub async fn finished(&mut self) {
        let _ = (&mut self.task).await;
    }
}

impl Drop for ReadLoop {
    fn drop(&mut self) {
        self.task.abort();
    }
}

/// Read loop task: delivers frames until the stream ends.
async fn run_reader<H: FrameHandler>(mut frames: FrameStream, mut handler: H, kind: TransportKind) {
    let reason = loop {
        match frames.next().await {
            Some(Ok(frame)) => {
                trace!(%kind, len = frame.len(), "Frame received");
                handler.on_frame(frame);
            }
            Some(Err(e)) => {
                error!(%kind, error = %e, "Transport read failed");
                break e;
            }
            None => {
                debug!(%kind, "Transport stream ended");
                break Error::HostTerminated;
            }
        }
    };
    handler.on_close(reason);
}

// ============================================================================
// Transport
// ============================================================================

/// An open transport to a host.
///
/// Created by [`Transport::open`] (spawns the host) or
/// [`Transport::from_io`] (wraps an existing stream pair).
pub struct Transport {
    kind: TransportKind,
    frames: Option<FrameStream>,
    writer: FrameWriter,
    host: Option<HostProcess>,
    handshake: Option<Handshake>,
}

impl fmt::Debug for Transport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Transport")
            .field("kind", &self.kind)
            .field("host", &self.host)
            .field("handshake", &self.handshake)
            .finish_non_exhaustive()
    }
}

impl Transport {
    /// Spawns the configured host and connects to it.
    ///
    /// For socket transports this completes the endpoint handshake; for
    /// stdio the `ready` frame arrives through the read loop.
    ///
    /// # Errors
    ///
    /// - [`Error::Config`] if the configuration is invalid
    /// - [`Error::HostNotFound`] / [`Error::ProcessLaunchFailed`] on spawn failure
    /// - [`Error::Startup`] / [`Error::ConnectionTimeout`] if the host never announces itself
    /// - [`Error::Connection`] if the announced endpoint refuses the connection
    pub async fn open(config: &BridgeConfig) -> Result<Self> {
        config.validate()?;
        debug!(kind = %config.transport, "Opening transport");
        match config.transport {
            TransportKind::Stdio => stdio::open(config),
            TransportKind::BinaryRpc => rpc::open(config).await,
            TransportKind::LocalSocket => socket::open(config).await,
        }
    }

    /// Wraps an existing reader/writer pair.
    pub fn from_io<R, W>(
        kind: TransportKind,
        reader: R,
        writer: W,
        framing: Framing,
        max_frame: usize,
    ) -> Self
    where
        R: AsyncRead + Send + 'static,
        W: AsyncWrite + Send + 'static,
    {
        let (frames, sink) = framed(reader, writer, framing, max_frame);
        Self {
            kind,
            frames: Some(frames),
            writer: FrameWriter::spawn(sink),
            host: None,
            handshake: None,
        }
    }

    /// Attaches the host process this transport talks to.
    #[must_use]
    pub(crate) fn with_host(mut self, host: HostProcess) -> Self {
        self.host = Some(host);
        self
    }

    /// Records a handshake completed while connecting.
    #[must_use]
    pub(crate) fn with_handshake(mut self, handshake: Handshake) -> Self {
        self.handshake = Some(handshake);
        self
    }

    /// Returns the transport kind.
    #[inline]
    #[must_use]
    pub fn kind(&self) -> TransportKind {
        self.kind
    }

    /// Returns the wire encoding.
    #[inline]
    #[must_use]
    pub fn encoding(&self) -> Encoding {
        self.kind.encoding()
    }

    /// Returns the handshake completed while connecting, if any.
    #[inline]
    #[must_use]
    pub fn handshake(&self) -> Option<&Handshake> {
        self.handshake.as_ref()
    }

    /// Returns the host process ID, if a host was spawned.
    #[inline]
    #[must_use]
    pub fn host_pid(&self) -> Option<u32> {
        self.host.as_ref().map(HostProcess::pid)
    }

    /// Returns a cloneable writer handle.
    #[inline]
    #[must_use]
    pub fn writer(&self) -> FrameWriter {
        self.writer.clone()
    }

    /// Writes one frame.
    ///
    /// # Errors
    ///
    /// See [`FrameWriter::write`].
    pub async fn write(&self, frame: Frame) -> Result<()> {
        self.writer.write(frame).await
    }

    /// Starts delivering frames to `handler`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Connection`] if the read loop was already started.
    pub fn read_loop<H: FrameHandler>(&mut self, handler: H) -> Result<ReadLoop> {
        let frames = self
            .frames
            .take()
            .ok_or_else(|| Error::connection("read loop already started"))?;
        Ok(ReadLoop {
            task: tokio::spawn(run_reader(frames, handler, self.kind)),
        })
    }

    /// Flushes and closes the outgoing stream. Does not touch the host.
    pub async fn close(&mut self) {
        self.writer.close().await;
        self.frames = None;
        debug!(kind = %self.kind, "Transport closed");
    }

    /// Takes ownership of the host process.
    #[inline]
    pub fn take_host(&mut self) -> Option<HostProcess> {
        self.host.take()
    }
}

// ============================================================================
// Tests
// ============================================================================
