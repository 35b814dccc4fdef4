//! Multi-client host server.
//!
//! Serves any number of clients over length-prefixed CBOR frames.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────┐
//! │                 HostServer                   │
//! │  accept loop ──► client task per connection │
//! │  ┌────────────────────────────────────────┐  │
//! │  │ ClientRegistry                         │  │
//! │  │  conn-1 → outbound queue               │  │
//! │  │  conn-2 → outbound queue               │  │
//! │  │  in flight: (conn-1, "4"), (conn-2, "4")│  │
//! │  └────────────────────────────────────────┘  │
//! └──────────────────────────────────────────────┘
//! ```
//!
//! A response goes only to the client whose message produced it; events go
//! to every client.

// ============================================================================
// Imports
// ============================================================================

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use futures_util::StreamExt;
use parking_lot::{Mutex, RwLock};
use rustc_hash::{FxHashMap, FxHashSet};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::error::Result;
use crate::identifiers::{ConnectionId, MessageId};
use crate::protocol::{BRIDGE_VERSION, Encoding, Envelope, Event, PROTOCOL_VERSION, Response};
use crate::transport::{DEFAULT_MAX_FRAME_SIZE, Framing, InitLine, TransportKind, framed};

use super::session::write_envelopes;
use super::{Handler, HostContext};

// ============================================================================
// Constants
// ============================================================================

/// Default bind address for TCP endpoints (localhost).
const DEFAULT_BIND_IP: IpAddr = IpAddr::V4(Ipv4Addr::LOCALHOST);

/// Time a binary-rpc client has to present its token.
const AUTH_TIMEOUT: Duration = Duration::from_secs(10);

/// Accept poll interval, so the loop notices shutdown.
const ACCEPT_POLL: Duration = Duration::from_millis(100);

// ============================================================================
// Endpoint
// ============================================================================

/// Address a [`HostServer`] listens on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Endpoint {
    /// Unix domain socket.
    Unix(PathBuf),
    /// Loopback TCP port.
    Tcp(u16),
}

// ============================================================================
// ClientRegistry
// ============================================================================

/// Connected clients and the messages they have in flight.
#[derive(Default)]
pub(crate) struct ClientRegistry {
    /// Outbound queues by connection.
    clients: RwLock<FxHashMap<ConnectionId, mpsc::UnboundedSender<Envelope>>>,
    /// Messages being handled, keyed by originating connection.
    in_flight: Mutex<FxHashSet<(ConnectionId, MessageId)>>,
}

impl ClientRegistry {
    fn add(&self, connection_id: ConnectionId, tx: mpsc::UnboundedSender<Envelope>) {
        self.clients.write().insert(connection_id, tx);
    }

    /// Forgets a client; its queue closes and its writer finishes.
    fn remove(&self, connection_id: ConnectionId) {
        self.clients.write().remove(&connection_id);
        self.in_flight
            .lock()
            .retain(|(owner, _)| *owner != connection_id);
    }

    /// Records a message. Returns `false` if the client reused an ID still in flight.
    fn begin(&self, connection_id: ConnectionId, id: &MessageId) -> bool {
        self.in_flight.lock().insert((connection_id, id.clone()))
    }

    /// Routes `response` to the client that sent the message.
    fn complete(&self, connection_id: ConnectionId, response: Response) -> bool {
        let known = self
            .in_flight
            .lock()
            .remove(&(connection_id, response.id.clone()));
        if !known {
            debug!(%connection_id, id = %response.id, "Dropping response for departed client");
            return false;
        }

        let clients = self.clients.read();
        match clients.get(&connection_id) {
            Some(tx) => tx.send(Envelope::Response(response)).is_ok(),
            None => false,
        }
    }

    /// Queues `event` for every client.
    pub(crate) fn broadcast(&self, event: &Event) -> usize {
        let clients = self.clients.read();
        clients
            .values()
            .filter(|tx| tx.send(Envelope::Event(event.clone())).is_ok())
            .count()
    }

    fn len(&self) -> usize {
        self.clients.read().len()
    }

    fn in_flight_count(&self) -> usize {
        self.in_flight.lock().len()
    }

    fn clear(&self) {
        self.clients.write().clear();
        self.in_flight.lock().clear();
    }
}

// ============================================================================
// HostServer
// ============================================================================

/// State shared with the accept loop and client tasks.
struct ServerShared {
    registry: Arc<ClientRegistry>,
    handler: Arc<dyn Handler>,
    token: Option<String>,
    shutdown: AtomicBool,
    max_frame: usize,
}

/// Listening host server.
///
/// # Example
///
/// ```ignore
/// let server = HostServer::bind_rpc(Arc::new(EchoHandler::new())).await?;
/// println!("{}", serde_json::to_string(&server.init_line())?);
/// // ... wait for the shutdown command ...
/// server.shutdown().await;
/// ```
pub struct HostServer {
    kind: TransportKind,
    endpoint: Endpoint,
    shared: Arc<ServerShared>,
    accept_task: Option<JoinHandle<()>>,
}

impl std::fmt::Debug for HostServer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HostServer")
            .field("kind", &self.kind)
            .field("endpoint", &self.endpoint)
            .field("clients", &self.client_count())
            .finish_non_exhaustive()
    }
}

// ============================================================================
// HostServer - Constructors
// ============================================================================

impl HostServer {
    /// Binds a token-authenticated loopback TCP server on a random port.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Io`] if binding fails.
    pub async fn bind_rpc(handler: Arc<dyn Handler>) -> Result<Self> {
        let token = Uuid::new_v4().simple().to_string();
        Self::bind_tcp(handler, TransportKind::BinaryRpc, Some(token)).await
    }

    /// Binds the local-socket server.
    ///
    /// The socket lives at `<dir>/ui-bridge-<pid>.sock`; see
    /// [`socket_path`](crate::transport::socket_path). A stale file at that
    /// path is replaced.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Io`] if the directory or socket cannot be created.
    #[cfg(unix)]
    pub async fn bind_local(handler: Arc<dyn Handler>, dir: Option<&Path>) -> Result<Self> {
        let path = crate::transport::socket_path(dir, std::process::id());
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        if tokio::fs::remove_file(&path).await.is_ok() {
            debug!(path = %path.display(), "Removed stale socket");
        }

        let listener = tokio::net::UnixListener::bind(&path)?;
        let shared = ServerShared::new(handler, None);
        let accept_task = tokio::spawn(accept_unix(Arc::clone(&shared), listener));

        info!(path = %path.display(), "Local socket server started");

        Ok(Self {
            kind: TransportKind::LocalSocket,
            endpoint: Endpoint::Unix(path),
            shared,
            accept_task: Some(accept_task),
        })
    }

    /// Binds the local-socket server on loopback TCP.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Io`] if binding fails.
    #[cfg(not(unix))]
    pub async fn bind_local(handler: Arc<dyn Handler>, _dir: Option<&Path>) -> Result<Self> {
        Self::bind_tcp(handler, TransportKind::LocalSocket, None).await
    }

    async fn bind_tcp(
        handler: Arc<dyn Handler>,
        kind: TransportKind,
        token: Option<String>,
    ) -> Result<Self> {
        let listener = TcpListener::bind(SocketAddr::new(DEFAULT_BIND_IP, 0)).await?;
        let port = listener.local_addr()?.port();
        let shared = ServerShared::new(handler, token);
        let accept_task = tokio::spawn(accept_tcp(Arc::clone(&shared), listener));

        info!(port, %kind, "TCP server started");

        Ok(Self {
            kind,
            endpoint: Endpoint::Tcp(port),
            shared,
            accept_task: Some(accept_task),
        })
    }
}

impl ServerShared {
    fn new(handler: Arc<dyn Handler>, token: Option<String>) -> Arc<Self> {
        Arc::new(Self {
            registry: Arc::new(ClientRegistry::default()),
            handler,
            token,
            shutdown: AtomicBool::new(false),
            max_frame: DEFAULT_MAX_FRAME_SIZE,
        })
    }
}

// ============================================================================
// HostServer - Public API
// ============================================================================

impl HostServer {
    /// Returns the listening endpoint.
    #[inline]
    #[must_use]
    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    /// Returns the token clients must present, if any.
    #[inline]
    #[must_use]
    pub fn token(&self) -> Option<&str> {
        self.shared.token.as_deref()
    }

    /// Endpoint announcement to print on stdout.
    #[must_use]
    pub fn init_line(&self) -> InitLine {
        let (port, socket_path) = match &self.endpoint {
            Endpoint::Tcp(port) => (Some(*port), None),
            Endpoint::Unix(path) => (None, Some(path.clone())),
        };
        InitLine {
            protocol: self.kind.as_str().to_string(),
            port,
            socket_path,
            token: self.shared.token.clone(),
            protocol_version: PROTOCOL_VERSION,
            bridge_version: BRIDGE_VERSION.to_string(),
        }
    }

    /// Returns the number of connected clients.
    #[inline]
    #[must_use]
    pub fn client_count(&self) -> usize {
        self.shared.registry.len()
    }

    /// Returns the number of messages being handled.
    #[inline]
    #[must_use]
    pub fn in_flight_count(&self) -> usize {
        self.shared.registry.in_flight_count()
    }

    /// Sends `event` to every connected client.
    pub fn broadcast(&self, event: &Event) -> usize {
        self.shared.registry.broadcast(event)
    }

    /// Stops accepting, disconnects every client, and removes the socket file.
    pub async fn shutdown(&mut self) {
        info!(kind = %self.kind, "HostServer shutting down");

        self.shared.shutdown.store(true, Ordering::SeqCst);
        if let Some(task) = self.accept_task.take() {
            task.abort();
            let _ = task.await;
        }

        self.shared.registry.clear();
        self.remove_socket_file();

        info!("HostServer shutdown complete");
    }

    fn remove_socket_file(&self) {
        if let Endpoint::Unix(path) = &self.endpoint
            && let Err(e) = std::fs::remove_file(path)
            && e.kind() != std::io::ErrorKind::NotFound
        {
            warn!(path = %path.display(), error = %e, "Failed to remove socket file");
        }
    }
}

impl Drop for HostServer {
    fn drop(&mut self) {
        if let Some(task) = self.accept_task.take() {
            task.abort();
            self.shared.registry.clear();
            self.remove_socket_file();
        }
    }
}

// ============================================================================
// Accept Loops
// ============================================================================

async fn accept_tcp(shared: Arc<ServerShared>, listener: TcpListener) {
    debug!("Accept loop started");

    while !shared.shutdown.load(Ordering::SeqCst) {
        match timeout(ACCEPT_POLL, listener.accept()).await {
            Ok(Ok((stream, addr))) => {
                if let Err(e) = stream.set_nodelay(true) {
                    debug!(error = %e, ?addr, "Failed to set TCP_NODELAY");
                }
                debug!(?addr, "New TCP connection");
                tokio::spawn(serve_client(Arc::clone(&shared), stream));
            }
            Ok(Err(e)) => error!(error = %e, "Accept failed"),
            Err(_) => continue,
        }
    }

    debug!("Accept loop terminated");
}

#[cfg(unix)]
async fn accept_unix(shared: Arc<ServerShared>, listener: tokio::net::UnixListener) {
    debug!("Accept loop started");

    while !shared.shutdown.load(Ordering::SeqCst) {
        match timeout(ACCEPT_POLL, listener.accept()).await {
            Ok(Ok((stream, _))) => {
                debug!("New socket connection");
                tokio::spawn(serve_client(Arc::clone(&shared), stream));
            }
            Ok(Err(e)) => error!(error = %e, "Accept failed"),
            Err(_) => continue,
        }
    }

    debug!("Accept loop terminated");
}

// ============================================================================
// Client Task
// ============================================================================

/// Serves one client until it disconnects.
async fn serve_client<S>(shared: Arc<ServerShared>, stream: S)
where
    S: AsyncRead + AsyncWrite + Send + 'static,
{
    let connection_id = ConnectionId::next();
    let (reader, writer) = tokio::io::split(stream);
    let (mut frames, sink) = framed(reader, writer, Framing::LengthPrefixed, shared.max_frame);

    if let Some(token) = &shared.token {
        match timeout(AUTH_TIMEOUT, frames.next()).await {
            Ok(Some(Ok(frame))) if frame.body.as_ref() == token.as_bytes() => {
                debug!(%connection_id, "Client authenticated");
            }
            _ => {
                warn!(%connection_id, "Client failed authentication");
                return;
            }
        }
    }

    let (tx, rx) = mpsc::unbounded_channel();
    tokio::spawn(write_envelopes(sink, rx, Encoding::Cbor));
    shared.registry.add(connection_id, tx);
    let ctx = HostContext::clients(connection_id, Arc::clone(&shared.registry));
    info!(%connection_id, clients = shared.registry.len(), "Client connected");

    while let Some(frame) = frames.next().await {
        let frame = match frame {
            Ok(frame) => frame,
            Err(e) => {
                warn!(%connection_id, error = %e, "Client stream failed");
                break;
            }
        };

        match Encoding::Cbor.decode(frame) {
            Ok(Envelope::Message(message)) => {
                if !shared.registry.begin(connection_id, &message.id) {
                    warn!(%connection_id, id = %message.id, "Message ID reused while in flight");
                }
                let handler = Arc::clone(&shared.handler);
                let registry = Arc::clone(&shared.registry);
                let ctx = ctx.clone();
                tokio::spawn(async move {
                    let response = handler.handle(message, ctx).await;
                    registry.complete(connection_id, response);
                });
            }
            Ok(other) => warn!(%connection_id, kind = other.kind(), "Ignoring non-message envelope"),
            Err(e) => warn!(%connection_id, error = %e, "Dropping undecodable frame"),
        }
    }

    shared.registry.remove(connection_id);
    info!(%connection_id, "Client disconnected");
}

// ============================================================================
// Tests
// ============================================================================
