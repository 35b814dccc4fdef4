//! Local-socket transport.
//!
//! The host listens on a Unix socket at
//! `<socket dir>/ui-bridge-<pid>.sock` and announces the path with an
//! [`InitLine`](super::InitLine). On platforms without Unix sockets it
//! announces a loopback TCP port instead. Frames are length-prefixed CBOR.

// ============================================================================
// Imports
// ============================================================================

use std::path::{Path, PathBuf};

use tracing::debug;

use crate::bridge::BridgeConfig;
use crate::bridge::config::ENV_SOCKET_DIR;
use crate::error::{Error, Result};

use super::connection::{Transport, TransportKind};
use super::framing::Framing;
use super::process::{HostProcess, InitLine};
use super::rpc::connect_loopback;

// ============================================================================
// Socket Path
// ============================================================================

/// Socket path for a host with the given pid.
///
/// Uses `dir`, then `UI_BRIDGE_SOCKET_DIR`, then the system temp directory.
#[must_use]
pub fn socket_path(dir: Option<&Path>, pid: u32) -> PathBuf {
    let dir = dir.map(Path::to_path_buf).unwrap_or_else(|| {
        std::env::var_os(ENV_SOCKET_DIR)
            .filter(|v| !v.is_empty())
            .map_or_else(std::env::temp_dir, PathBuf::from)
    });
    dir.join(format!("ui-bridge-{pid}.sock"))
}

// ============================================================================
// Open
// ============================================================================

/// Spawns the host in local-socket mode and connects to its endpoint.
pub(crate) async fn open(config: &BridgeConfig) -> Result<Transport> {
    let (mut host, stdin, stdout) = HostProcess::spawn(config)?;
    host.set_control(stdin);

    let init = host.read_init_line(stdout, config.ready_timeout).await?;
    if init.protocol != TransportKind::LocalSocket.as_str() {
        return Err(Error::startup(format!(
            "expected a local-socket host, got '{}'",
            init.protocol
        )));
    }

    let transport = connect(&init, config).await?;
    debug!(pid = host.pid(), "Local socket transport connected");

    Ok(transport
        .with_host(host)
        .with_handshake(init.handshake()))
}

/// Connects to the endpoint named by `init`.
async fn connect(init: &InitLine, config: &BridgeConfig) -> Result<Transport> {
    #[cfg(unix)]
    {
        if let Some(path) = &init.socket_path {
            let stream = tokio::time::timeout(
                config.ready_timeout,
                tokio::net::UnixStream::connect(path),
            )
            .await
            .map_err(|_| Error::connection_timeout(config.ready_timeout.as_millis() as u64))?
            .map_err(|e| Error::connection(format!("connect to {}: {e}", path.display())))?;
            let (reader, writer) = stream.into_split();
            return Ok(Transport::from_io(
                TransportKind::LocalSocket,
                reader,
                writer,
                Framing::LengthPrefixed,
                config.max_frame_size,
            ));
        }
    }

    let port = init
        .port
        .ok_or_else(|| Error::startup("local-socket host announced no usable endpoint"))?;
    let stream = connect_loopback(port, config.ready_timeout).await?;
    let (reader, writer) = stream.into_split();
    Ok(Transport::from_io(
        TransportKind::LocalSocket,
        reader,
        writer,
        Framing::LengthPrefixed,
        config.max_frame_size,
    ))
}

// ============================================================================
// Tests
// ============================================================================
