//! Standard-stream transport.
//!
//! Frames travel on the host's stdin and stdout; stderr is diagnostics only
//! and never enters the framing layer. The host's first frame is the
//! `ready` response carrying its [`Handshake`](crate::protocol::Handshake).

// ============================================================================
// Imports
// ============================================================================

use crate::bridge::BridgeConfig;
use crate::error::Result;

use super::connection::{Transport, TransportKind};
use super::process::HostProcess;

// ============================================================================
// Open
// ============================================================================

/// Spawns the host in stdio mode and frames its standard streams.
pub(crate) fn open(config: &BridgeConfig) -> Result<Transport> {
    let (host, stdin, stdout) = HostProcess::spawn(config)?;
    let framing = config.effective_framing();

    tracing::debug!(pid = host.pid(), %framing, "Stdio transport ready for handshake");

    Ok(Transport::from_io(
        TransportKind::Stdio,
        stdout,
        stdin,
        framing,
        config.max_frame_size,
    )
    .with_host(host))
}
