//! Bridge connection façade and lifecycle.
//!
//! [`BridgeConnection`] is the only type upper layers need: `send`,
//! `on_event`, and `quit`, plus `wait_until_ready`.
//!
//! # State Machine
//!
//! ```text
//! Starting ──► Ready ──► Closing ──► Closed
//!     └──────────────────────┘
//!      startup failure / early quit
//! ```
//!
//! | State | `send` | `on_event` |
//! |-------|--------|------------|
//! | `Starting` | suspends until ready | allowed |
//! | `Ready` | written immediately | allowed |
//! | `Closing` / `Closed` | `ConnectionClosed` | allowed, never fires |
//!
//! # Teardown
//!
//! `quit` (or a lost transport) runs these steps in order, each best-effort:
//!
//! 1. Stop accepting sends
//! 2. Reject in-flight calls
//! 3. Close the transport
//! 4. Release the host: control-channel shutdown, grace period, kill

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tracing::{debug, error, info, warn};

use crate::error::{Error, Result};
use crate::protocol::{Encoding, Envelope, Event, Handshake, Payload};
use crate::transport::{Frame, FrameHandler, FrameWriter, ReadLoop, Transport, TransportKind};

use super::builder::BridgeBuilder;
use super::config::BridgeConfig;
use super::dispatcher::{Dispatcher, DispatcherStats};
use super::events::{EventBroadcaster, Subscription};

// ============================================================================
// State
// ============================================================================

/// Lifecycle state of a [`BridgeConnection`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum State {
    /// Transport opening or handshake in progress.
    Starting,
    /// Handshake complete, sends are written immediately.
    Ready,
    /// Teardown in progress.
    Closing,
    /// Fully torn down.
    Closed,
}

impl State {
    /// Returns the state name.
    #[inline]
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Starting => "starting",
            Self::Ready => "ready",
            Self::Closing => "closing",
            Self::Closed => "closed",
        }
    }

    /// Returns `true` for `Closing` and `Closed`.
    #[inline]
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        matches!(self, Self::Closing | Self::Closed)
    }
}

impl fmt::Display for State {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// Shared
// ============================================================================

/// Transport resources owned while the connection is open.
struct Runtime {
    transport: Transport,
    read_loop: ReadLoop,
}

/// State shared by connection handles and background tasks.
struct Shared {
    config: BridgeConfig,
    encoding: Encoding,
    dispatcher: Dispatcher,
    events: EventBroadcaster,
    state_tx: watch::Sender<State>,
    /// Set by the first teardown.
    closing: AtomicBool,
    /// Why startup failed, handed to every `wait_until_ready` caller.
    failure: Mutex<Option<Error>>,
    handshake: Mutex<Option<Handshake>>,
    writer: Mutex<Option<FrameWriter>>,
    runtime: Mutex<Option<Runtime>>,
    startup_task: Mutex<Option<JoinHandle<()>>>,
}

impl Shared {
    /// Startup task: open, handshake, then mark ready.
    async fn startup(self: Arc<Self>, preset: Option<Transport>) {
        let deadline = self.config.ready_timeout;
        let outcome = match timeout(deadline, self.connect(preset)).await {
            Ok(result) => result,
            Err(_) => Err(Error::connection_timeout(deadline.as_millis() as u64)),
        };

        match outcome {
            Ok(handshake) => {
                let became_ready = self.state_tx.send_if_modified(|state| {
                    if *state == State::Starting {
                        *state = State::Ready;
                        true
                    } else {
                        false
                    }
                });
                if became_ready {
                    info!(
                        protocol = handshake.protocol,
                        bridge_version = %handshake.bridge_version,
                        "Bridge ready"
                    );
                }
            }
            Err(e) => {
                error!(error = %e, "Bridge startup failed");
                tokio::spawn(self.shutdown(e));
            }
        }
    }

    /// Opens the transport, starts the read loop, completes the handshake.
    async fn connect(self: &Arc<Self>, preset: Option<Transport>) -> Result<Handshake> {
        let mut transport = match preset {
            Some(transport) => transport,
            None => Transport::open(&self.config).await?,
        };

        let ready_rx =
            (transport.kind() == TransportKind::Stdio).then(|| self.dispatcher.register_ready());
        let announced = transport.handshake().cloned();

        let read_loop = transport.read_loop(Inbound {
            shared: Arc::downgrade(self),
            encoding: self.encoding,
        })?;
        *self.writer.lock() = Some(transport.writer());
        *self.runtime.lock() = Some(Runtime {
            transport,
            read_loop,
        });

        let handshake = match ready_rx {
            Some(rx) => {
                let result = rx
                    .await
                    .map_err(|_| Error::ConnectionClosed)?
                    .map_err(|e| match e {
                        Error::Remote { message } => Error::startup(message),
                        other => other,
                    })?;
                Handshake::from_ready_result(&result)
            }
            None => announced.unwrap_or_else(Handshake::current),
        };

        handshake.ensure_compatible()?;
        *self.handshake.lock() = Some(handshake.clone());
        Ok(handshake)
    }

    /// Suspends while starting; fails once closing.
    async fn wait_ready(&self) -> Result<()> {
        let mut rx = self.state_tx.subscribe();
        let state = *rx
            .wait_for(|state| *state != State::Starting)
            .await
            .map_err(|_| Error::ConnectionClosed)?;
        match state {
            State::Ready => Ok(()),
            _ => Err(Error::ConnectionClosed),
        }
    }

    /// Tears the connection down. Later callers wait for the first to finish.
    async fn shutdown(self: Arc<Self>, reason: Error) {
        if self.closing.swap(true, Ordering::AcqRel) {
            let mut rx = self.state_tx.subscribe();
            let _ = rx.wait_for(|state| *state == State::Closed).await;
            return;
        }

        let previous = *self.state_tx.borrow();
        if previous == State::Starting {
            *self.failure.lock() = Some(reason.replicate());
        }
        self.state_tx.send_replace(State::Closing);
        info!(from = %previous, reason = %reason, "Bridge closing");

        let rejected = self.dispatcher.reject_all(|| reason.replicate());

        let startup = self.startup_task.lock().take();
        if let Some(task) = startup {
            task.abort();
            let _ = task.await;
        }

        self.writer.lock().take();
        let runtime = self.runtime.lock().take();
        if let Some(Runtime {
            mut transport,
            read_loop,
        }) = runtime
        {
            read_loop.abort();
            let grace = self.config.shutdown_grace;
            if timeout(grace, transport.close()).await.is_err() {
                warn!(grace_ms = grace.as_millis() as u64, "Transport close timed out");
            }
            if let Some(mut host) = transport.take_host() {
                host.terminate(grace).await;
            }
        }

        let stragglers = self.dispatcher.reject_all(|| Error::ConnectionClosed);
        self.state_tx.send_replace(State::Closed);
        debug!(rejected = rejected + stragglers, "Bridge closed");
    }
}

// ============================================================================
// Inbound
// ============================================================================

/// Routes decoded frames to the dispatcher and broadcaster.
struct Inbound {
    shared: Weak<Shared>,
    encoding: Encoding,
}

impl FrameHandler for Inbound {
    fn on_frame(&mut self, frame: Frame) {
        let Some(shared) = self.shared.upgrade() else {
            return;
        };
        match self.encoding.decode(frame) {
            Ok(Envelope::Response(response)) => {
                shared.dispatcher.resolve(response);
            }
            Ok(Envelope::Event(event)) => {
                shared.events.emit(&event);
            }
            Ok(Envelope::Message(message)) => {
                warn!(id = %message.id, message_type = %message.message_type, "Ignoring request sent by host");
            }
            Err(e) => warn!(error = %e, "Dropping undecodable frame"),
        }
    }

    fn on_close(&mut self, reason: Error) {
        let Some(shared) = self.shared.upgrade() else {
            return;
        };
        if shared.closing.load(Ordering::Acquire) {
            debug!("Read loop ended during shutdown");
            return;
        }
        warn!(error = %reason, "Transport lost");
        tokio::spawn(shared.shutdown(reason));
    }
}

// ============================================================================
// BridgeConnection
// ============================================================================

/// Connection to a UI host.
///
/// Cheap to clone; all clones share one transport. Dropping the last clone
/// kills the host, but only [`BridgeConnection::quit`] gives it a chance to
/// exit cleanly.
///
/// # Example
///
/// ```no_run
/// # use ui_bridge::{BridgeConnection, BridgeConfig, payload};
/// # async fn example() -> ui_bridge::Result<()> {
/// let bridge = BridgeConnection::start(BridgeConfig::new("/usr/local/bin/ui-bridge-host"))?;
/// bridge.wait_until_ready().await?;
///
/// let clicks = bridge.on_event("click", |event| {
///     println!("clicked: {}", event.source_id);
/// });
///
/// let result = bridge.send("echo", payload! { "text" => "hi" }).await?;
/// assert_eq!(result.get("text").and_then(|v| v.as_str()), Some("hi"));
///
/// clicks.unsubscribe();
/// bridge.quit().await;
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct BridgeConnection {
    shared: Arc<Shared>,
}

impl fmt::Debug for BridgeConnection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BridgeConnection")
            .field("state", &self.state())
            .field("transport", &self.shared.config.transport)
            .field("stats", &self.stats())
            .finish()
    }
}

// ============================================================================
// BridgeConnection - Constructors
// ============================================================================

impl BridgeConnection {
    /// Creates a builder.
    #[inline]
    #[must_use]
    pub fn builder() -> BridgeBuilder {
        BridgeBuilder::new()
    }

    /// Spawns the host and starts connecting in the background.
    ///
    /// Returns immediately in [`State::Starting`]. Must be called within a
    /// Tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if the configuration is invalid. Launch and
    /// handshake failures surface through [`BridgeConnection::wait_until_ready`].
    pub fn start(config: BridgeConfig) -> Result<Self> {
        config.validate()?;
        let encoding = config.transport.encoding();
        Ok(Self::launch(config, encoding, None))
    }

    /// Runs the bridge over an already open transport.
    ///
    /// The handshake still applies: a stdio transport must deliver the
    /// `ready` response first.
    #[must_use]
    pub fn with_transport(transport: Transport, config: BridgeConfig) -> Self {
        let encoding = transport.encoding();
        Self::launch(config, encoding, Some(transport))
    }

    fn launch(config: BridgeConfig, encoding: Encoding, preset: Option<Transport>) -> Self {
        let (state_tx, _) = watch::channel(State::Starting);
        let shared = Arc::new(Shared {
            dispatcher: Dispatcher::new(config.max_pending),
            config,
            encoding,
            events: EventBroadcaster::new(),
            state_tx,
            closing: AtomicBool::new(false),
            failure: Mutex::new(None),
            handshake: Mutex::new(None),
            writer: Mutex::new(None),
            runtime: Mutex::new(None),
            startup_task: Mutex::new(None),
        });

        let task = tokio::spawn(Arc::clone(&shared).startup(preset));
        *shared.startup_task.lock() = Some(task);

        Self { shared }
    }
}

// ============================================================================
// BridgeConnection - Operations
// ============================================================================

impl BridgeConnection {
    /// Waits until the handshake completes.
    ///
    /// # Errors
    ///
    /// - the startup error ([`Error::HostNotFound`], [`Error::Startup`], ...)
    /// - [`Error::ConnectionTimeout`] if the host never became ready
    /// - [`Error::ConnectionClosed`] if the connection was closed
    pub async fn wait_until_ready(&self) -> Result<()> {
        let config = &self.shared.config;
        let limit = config.ready_timeout + config.shutdown_grace;
        let mut rx = self.shared.state_tx.subscribe();

        let state = match timeout(limit, rx.wait_for(|state| *state != State::Starting)).await {
            Ok(Ok(state)) => *state,
            Ok(Err(_)) => return Err(Error::ConnectionClosed),
            Err(_) => return Err(Error::connection_timeout(limit.as_millis() as u64)),
        };

        match state {
            State::Ready => Ok(()),
            _ => Err(self
                .shared
                .failure
                .lock()
                .as_ref()
                .map_or(Error::ConnectionClosed, Error::replicate)),
        }
    }

    /// Sends a message and waits for its result with the default deadline.
    ///
    /// # Errors
    ///
    /// See [`BridgeConnection::send_with_timeout`].
    pub async fn send(&self, message_type: impl Into<String>, payload: Payload) -> Result<Payload> {
        self.send_with_timeout(message_type, payload, self.shared.config.request_timeout)
            .await
    }

    /// Sends a message and waits for its result.
    ///
    /// Suspends while the connection is starting; the deadline covers that
    /// wait too.
    ///
    /// # Errors
    ///
    /// - [`Error::Remote`] if the host reported failure
    /// - [`Error::RequestTimeout`] if no response arrived within `deadline`
    /// - [`Error::ConnectionClosed`] / [`Error::HostTerminated`] on teardown
    /// - [`Error::Protocol`] if too many calls are pending
    /// - [`Error::Codec`] if the payload cannot be encoded
    pub async fn send_with_timeout(
        &self,
        message_type: impl Into<String>,
        payload: Payload,
        deadline: Duration,
    ) -> Result<Payload> {
        let shared = &self.shared;
        if shared.state_tx.borrow().is_terminal() {
            return Err(Error::ConnectionClosed);
        }

        let (message, rx) = shared.dispatcher.register(message_type, payload)?;
        let id = message.id.clone();

        let exchange = async {
            let frame = shared.encoding.encode(&Envelope::Message(message))?;
            shared.wait_ready().await?;
            let writer = shared
                .writer
                .lock()
                .clone()
                .ok_or(Error::ConnectionClosed)?;
            writer.write(frame).await?;
            rx.await.map_err(|_| Error::ConnectionClosed)?
        };

        match timeout(deadline, exchange).await {
            Ok(Ok(result)) => Ok(result),
            Ok(Err(e)) => {
                shared.dispatcher.forget(&id);
                Err(e)
            }
            Err(_) => {
                shared.dispatcher.forget(&id);
                let timeout_ms = deadline.as_millis() as u64;
                warn!(%id, timeout_ms, "Request timed out");
                Err(Error::request_timeout(id, timeout_ms))
            }
        }
    }

    /// Subscribes `handler` to events of `event_type` (or `"*"` for all).
    pub fn on_event<F>(&self, event_type: impl Into<String>, handler: F) -> Subscription
    where
        F: Fn(&Event) + Send + Sync + 'static,
    {
        self.shared.events.on(event_type, handler)
    }

    /// Closes the connection and releases the host.
    ///
    /// Safe to call repeatedly and from several tasks; every call returns
    /// once teardown has finished.
    pub async fn quit(&self) {
        Arc::clone(&self.shared)
            .shutdown(Error::ConnectionClosed)
            .await;
    }
}

// ============================================================================
// BridgeConnection - Accessors
// ============================================================================

impl BridgeConnection {
    /// Returns the current state.
    #[inline]
    #[must_use]
    pub fn state(&self) -> State {
        *self.shared.state_tx.borrow()
    }

    /// Returns a receiver observing state changes.
    #[inline]
    #[must_use]
    pub fn state_changes(&self) -> watch::Receiver<State> {
        self.shared.state_tx.subscribe()
    }

    /// Returns the host's handshake once ready.
    #[must_use]
    pub fn handshake(&self) -> Option<Handshake> {
        self.shared.handshake.lock().clone()
    }

    /// Returns the host process ID, if a host was spawned.
    #[must_use]
    pub fn host_pid(&self) -> Option<u32> {
        self.shared
            .runtime
            .lock()
            .as_ref()
            .and_then(|runtime| runtime.transport.host_pid())
    }

    /// Returns the configuration.
    #[inline]
    #[must_use]
    pub fn config(&self) -> &BridgeConfig {
        &self.shared.config
    }

    /// Returns dispatcher counters.
    #[inline]
    #[must_use]
    pub fn stats(&self) -> DispatcherStats {
        self.shared.dispatcher.stats()
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use std::sync::atomic::AtomicUsize;
    use std::time::Instant;

    use futures_util::future::join_all;
    use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, DuplexStream, ReadHalf, WriteHalf};

    use crate::host::{EchoHandler, serve_io};
    use crate::payload;
    use crate::transport::{DEFAULT_MAX_FRAME_SIZE, Framing};

    const READY_LINE: &str = "{\"id\":\"ready\",\"success\":true,\"result\":{\"status\":\"ready\",\"protocol\":1,\"bridgeVersion\":\"test\",\"compatible\":true}}\n";

    fn config() -> BridgeConfig {
        BridgeConfig::new("in-process")
            .with_request_timeout(Duration::from_secs(5))
            .with_ready_timeout(Duration::from_secs(5))
            .with_shutdown_grace(Duration::from_millis(200))
    }

    fn client_transport(stream: DuplexStream) -> Transport {
        let (reader, writer) = tokio::io::split(stream);
        Transport::from_io(
            TransportKind::Stdio,
            reader,
            writer,
            Framing::Lines,
            DEFAULT_MAX_FRAME_SIZE,
        )
    }

    /// Bridge talking to an in-process echo host.
    fn echo_bridge() -> BridgeConnection {
        let (client, host) = tokio::io::duplex(64 * 1024);
        let (host_read, host_write) = tokio::io::split(host);
        tokio::spawn(serve_io(
            host_read,
            host_write,
            Framing::Lines,
            Encoding::Json,
            Arc::new(EchoHandler::new()),
        ));
        BridgeConnection::with_transport(client_transport(client), config())
    }

    /// Bridge talking to a scripted host driven by the test.
    fn scripted_bridge() -> (
        BridgeConnection,
        BufReader<ReadHalf<DuplexStream>>,
        WriteHalf<DuplexStream>,
    ) {
        let (client, host) = tokio::io::duplex(64 * 1024);
        let (host_read, host_write) = tokio::io::split(host);
        let bridge = BridgeConnection::with_transport(client_transport(client), config());
        (bridge, BufReader::new(host_read), host_write)
    }

    async fn read_message(reader: &mut BufReader<ReadHalf<DuplexStream>>) -> serde_json::Value {
        let mut line = String::new();
        reader.read_line(&mut line).await.expect("read");
        serde_json::from_str(&line).expect("json")
    }

    #[tokio::test]
    async fn test_ping() {
        let bridge = echo_bridge();
        bridge.wait_until_ready().await.expect("ready");
        assert_eq!(bridge.state(), State::Ready);

        let result = bridge.send("ping", Payload::new()).await.expect("ping");
        assert_eq!(result.get("pong").and_then(|v| v.as_bool()), Some(true));
        assert_eq!(bridge.handshake().map(|h| h.protocol), Some(1));
        bridge.quit().await;
    }

    #[tokio::test]
    async fn test_checksummed_echo_keeps_bytes() {
        let (client, host) = tokio::io::duplex(64 * 1024);
        let (host_read, host_write) = tokio::io::split(host);
        tokio::spawn(serve_io(
            host_read,
            host_write,
            Framing::Checksummed,
            Encoding::Json,
            Arc::new(EchoHandler::new()),
        ));
        let (reader, writer) = tokio::io::split(client);
        let transport = Transport::from_io(
            TransportKind::Stdio,
            reader,
            writer,
            Framing::Checksummed,
            DEFAULT_MAX_FRAME_SIZE,
        );
        let bridge = BridgeConnection::with_transport(transport, config());
        bridge.wait_until_ready().await.expect("ready");

        let pixels: Vec<u8> = (0..=255).rev().collect();
        let result = bridge
            .send("echo", payload! { "pixels" => pixels.clone() })
            .await
            .expect("echo");
        assert_eq!(result.get("pixels").and_then(|v| v.as_bytes()), Some(&pixels[..]));
        bridge.quit().await;
    }

    #[tokio::test]
    async fn test_out_of_order_responses() {
        let bridge = echo_bridge();
        bridge.wait_until_ready().await.expect("ready");

        let order = Arc::new(Mutex::new(Vec::new()));
        let slow = {
            let bridge = bridge.clone();
            let order = Arc::clone(&order);
            async move {
                let result = bridge.send("sleep", payload! { "ms" => 200u64 }).await;
                order.lock().push("slow");
                result
            }
        };
        let fast = {
            let bridge = bridge.clone();
            let order = Arc::clone(&order);
            async move {
                let result = bridge.send("ping", Payload::new()).await;
                order.lock().push("fast");
                result
            }
        };

        let (slow, fast) = tokio::join!(slow, fast);
        assert_eq!(slow.expect("slow").get("sleptMs").and_then(|v| v.as_u64()), Some(200));
        assert_eq!(fast.expect("fast").get("pong").and_then(|v| v.as_bool()), Some(true));
        assert_eq!(*order.lock(), ["fast", "slow"]);
        bridge.quit().await;
    }

    #[tokio::test]
    async fn test_host_lost_mid_flight() {
        let (bridge, mut reader, mut writer) = scripted_bridge();
        writer.write_all(READY_LINE.as_bytes()).await.expect("ready");
        bridge.wait_until_ready().await.expect("ready");

        let in_flight = {
            let bridge = bridge.clone();
            tokio::spawn(async move { bridge.send("anything", Payload::new()).await })
        };
        let message = read_message(&mut reader).await;
        assert_eq!(message["type"], "anything");

        drop(writer);
        drop(reader);

        let err = in_flight.await.expect("join").unwrap_err();
        assert!(err.is_connection_error(), "{err}");

        let mut states = bridge.state_changes();
        let _ = states.wait_for(|state| *state == State::Closed).await;
        let err = bridge.send("ping", Payload::new()).await.unwrap_err();
        assert!(matches!(err, Error::ConnectionClosed));
    }

    #[tokio::test]
    async fn test_fifty_concurrent_echoes() {
        let bridge = echo_bridge();
        bridge.wait_until_ready().await.expect("ready");

        let calls = (0..50).map(|i| {
            let bridge = bridge.clone();
            async move { (i, bridge.send("echo", payload! { "n" => i }).await) }
        });

        for (i, result) in join_all(calls).await {
            let result = result.expect("echo");
            assert_eq!(result.get("n").and_then(|v| v.as_i64()), Some(i64::from(i)));
        }
        assert_eq!(bridge.stats().pending, 0);
        assert_eq!(bridge.stats().resolved, 51);
        bridge.quit().await;
    }

    #[tokio::test]
    async fn test_event_without_handlers_then_with() {
        let bridge = echo_bridge();
        bridge.wait_until_ready().await.expect("ready");

        bridge
            .send("emit", payload! { "type" => "click", "sourceId" => "btn1" })
            .await
            .expect("emit");

        let hits = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&hits);
        let sub = bridge.on_event("click", move |event| {
            assert_eq!(event.source_id, "btn1");
            counter.fetch_add(1, Ordering::SeqCst);
        });

        bridge
            .send("emit", payload! { "type" => "click", "sourceId" => "btn1" })
            .await
            .expect("emit");
        assert_eq!(hits.load(Ordering::SeqCst), 1);

        sub.unsubscribe();
        bridge.send("ping", Payload::new()).await.expect("still healthy");
        bridge.quit().await;
    }

    #[tokio::test]
    async fn test_send_while_starting_is_flushed() {
        let (bridge, mut reader, mut writer) = scripted_bridge();
        assert_eq!(bridge.state(), State::Starting);

        let pending = {
            let bridge = bridge.clone();
            tokio::spawn(async move { bridge.send("echo", payload! { "a" => 1 }).await })
        };

        tokio::time::sleep(Duration::from_millis(50)).await;
        writer.write_all(READY_LINE.as_bytes()).await.expect("ready");

        let message = read_message(&mut reader).await;
        let reply = format!(
            "{{\"id\":{},\"success\":true,\"result\":{{\"a\":1}}}}\n",
            message["id"]
        );
        writer.write_all(reply.as_bytes()).await.expect("reply");

        let result = pending.await.expect("join").expect("echo");
        assert_eq!(result.get("a").and_then(|v| v.as_i64()), Some(1));
    }

    #[tokio::test]
    async fn test_incompatible_host() {
        let (bridge, _reader, mut writer) = scripted_bridge();
        let line = "{\"id\":\"ready\",\"success\":true,\"result\":{\"status\":\"ready\",\"protocol\":1,\"compatible\":false,\"reason\":\"too old\"}}\n";
        writer.write_all(line.as_bytes()).await.expect("ready");

        let err = bridge.wait_until_ready().await.unwrap_err();
        assert!(matches!(&err, Error::Startup { message } if message.contains("too old")), "{err}");
        assert!(bridge.state().is_terminal());
    }

    #[tokio::test]
    async fn test_garbage_frame_is_dropped() {
        let (bridge, mut reader, mut writer) = scripted_bridge();
        writer.write_all(READY_LINE.as_bytes()).await.expect("ready");
        bridge.wait_until_ready().await.expect("ready");

        let pending = {
            let bridge = bridge.clone();
            tokio::spawn(async move { bridge.send("ping", Payload::new()).await })
        };
        let message = read_message(&mut reader).await;

        writer.write_all(b"this is not json\n{\"neither\":\"is this\"}\n").await.expect("garbage");
        let reply = format!("{{\"id\":{},\"success\":true,\"result\":{{}}}}\n", message["id"]);
        writer.write_all(reply.as_bytes()).await.expect("reply");

        pending.await.expect("join").expect("ping survives garbage");
        assert_eq!(bridge.state(), State::Ready);
    }

    #[tokio::test]
    async fn test_request_timeout_and_orphan() {
        let bridge = echo_bridge();
        bridge.wait_until_ready().await.expect("ready");

        let err = bridge
            .send_with_timeout("sleep", payload! { "ms" => 300u64 }, Duration::from_millis(50))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::RequestTimeout { .. }));
        assert_eq!(bridge.stats().pending, 0);

        tokio::time::sleep(Duration::from_millis(400)).await;
        assert_eq!(bridge.stats().orphans, 1);
        bridge.send("ping", Payload::new()).await.expect("still healthy");
        bridge.quit().await;
    }

    #[tokio::test]
    async fn test_quit_rejects_in_flight_and_is_reentrant() {
        let bridge = echo_bridge();
        bridge.wait_until_ready().await.expect("ready");

        let in_flight = {
            let bridge = bridge.clone();
            tokio::spawn(async move { bridge.send("sleep", payload! { "ms" => 5_000u64 }).await })
        };
        tokio::time::sleep(Duration::from_millis(50)).await;

        let started = Instant::now();
        tokio::join!(bridge.quit(), bridge.quit());
        bridge.quit().await;
        assert!(started.elapsed() < Duration::from_secs(2));

        let err = in_flight.await.expect("join").unwrap_err();
        assert!(matches!(err, Error::ConnectionClosed));
        assert_eq!(bridge.state(), State::Closed);
        assert!(matches!(
            bridge.send("ping", Payload::new()).await,
            Err(Error::ConnectionClosed)
        ));
    }

    #[tokio::test]
    async fn test_silent_host_times_out() {
        let (client, _host) = tokio::io::duplex(64 * 1024);
        let bridge = BridgeConnection::with_transport(
            client_transport(client),
            config()
                .with_ready_timeout(Duration::from_millis(200))
                .with_shutdown_grace(Duration::from_millis(100)),
        );

        let started = Instant::now();
        let err = bridge.wait_until_ready().await.unwrap_err();
        assert!(matches!(err, Error::ConnectionTimeout { timeout_ms: 200 }), "{err}");
        assert!(started.elapsed() < Duration::from_secs(2));

        let mut states = bridge.state_changes();
        tokio::time::timeout(
            Duration::from_secs(2),
            states.wait_for(|state| *state == State::Closed),
        )
        .await
        .expect("closed in time")
        .expect("state channel");
        assert!(matches!(
            bridge.send("ping", Payload::new()).await,
            Err(Error::ConnectionClosed)
        ));
    }

    #[tokio::test]
    async fn test_quit_while_starting() {
        let (bridge, _reader, _writer) = scripted_bridge();
        bridge.quit().await;

        assert_eq!(bridge.state(), State::Closed);
        assert!(matches!(
            bridge.wait_until_ready().await,
            Err(Error::ConnectionClosed)
        ));
    }

    #[tokio::test]
    async fn test_remote_error_surfaces() {
        let bridge = echo_bridge();
        bridge.wait_until_ready().await.expect("ready");

        let err = bridge.send("fly", Payload::new()).await.unwrap_err();
        assert!(matches!(err, Error::Remote { message } if message.contains("fly")));
        bridge.quit().await;
    }

    #[tokio::test]
    async fn test_start_rejects_invalid_config() {
        let err = BridgeConnection::start(BridgeConfig::default()).unwrap_err();
        assert!(matches!(err, Error::Config { .. }));
    }

    #[tokio::test]
    async fn test_start_missing_host() {
        let bridge = BridgeConnection::start(BridgeConfig::new("/no/such/ui-bridge-host"))
            .expect("valid config");
        let err = bridge.wait_until_ready().await.unwrap_err();
        assert!(matches!(err, Error::HostNotFound { .. }), "{err}");
    }
}
