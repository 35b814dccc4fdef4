//! Binary RPC transport.
//!
//! The host binds an ephemeral loopback port and prints an
//! [`InitLine`](super::InitLine) with the port and a one-time token. The
//! client connects, sends the token as its first frame, then exchanges
//! length-prefixed CBOR frames.

// ============================================================================
// Imports
// ============================================================================

use std::net::Ipv4Addr;
use std::time::Duration;

use bytes::Bytes;
use tokio::net::TcpStream;
use tokio::time::timeout;
use tracing::debug;

use crate::bridge::BridgeConfig;
use crate::error::{Error, Result};

use super::connection::{Transport, TransportKind};
use super::framing::{Frame, Framing};
use super::process::HostProcess;

// ============================================================================
// Open
// ============================================================================

/// Spawns the host in binary-rpc mode and authenticates to it.
pub(crate) async fn open(config: &BridgeConfig) -> Result<Transport> {
    let (mut host, stdin, stdout) = HostProcess::spawn(config)?;
    host.set_control(stdin);

    let init = host.read_init_line(stdout, config.ready_timeout).await?;
    if init.protocol != TransportKind::BinaryRpc.as_str() {
        return Err(Error::startup(format!(
            "expected a binary-rpc host, got '{}'",
            init.protocol
        )));
    }
    let port = init
        .port
        .ok_or_else(|| Error::startup("binary-rpc host announced no port"))?;
    let token = init
        .token
        .clone()
        .ok_or_else(|| Error::startup("binary-rpc host announced no token"))?;

    let stream = connect_loopback(port, config.ready_timeout).await?;
    let (reader, writer) = stream.into_split();

    let transport = Transport::from_io(
        TransportKind::BinaryRpc,
        reader,
        writer,
        Framing::LengthPrefixed,
        config.max_frame_size,
    )
    .with_host(host)
    .with_handshake(init.handshake());

    let writer = transport.writer();
    writer.write(Frame::new(Bytes::from(token))).await?;
    debug!(port, "Binary RPC transport authenticated");

    Ok(transport)
}

/// Connects to `127.0.0.1:port` with `TCP_NODELAY` set.
pub(crate) async fn connect_loopback(port: u16, deadline: Duration) -> Result<TcpStream> {
    let stream = timeout(deadline, TcpStream::connect((Ipv4Addr::LOCALHOST, port)))
        .await
        .map_err(|_| Error::connection_timeout(deadline.as_millis() as u64))?
        .map_err(|e| Error::connection(format!("connect to 127.0.0.1:{port}: {e}")))?;
    stream.set_nodelay(true)?;
    Ok(stream)
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use tokio::net::TcpListener;

    fn assert_send<T: Send>(_: &T) {}

    #[test]
    fn test_open_futures_are_send() {
        let config = BridgeConfig::new("ui-bridge-host");
        assert_send(&open(&config));
        assert_send(&Transport::open(&config));
    }

    #[tokio::test]
    async fn test_connect_loopback_sets_nodelay() {
        let listener = TcpListener::bind((Ipv4Addr::LOCALHOST, 0))
            .await
            .expect("bind");
        let port = listener.local_addr().expect("addr").port();

        let stream = connect_loopback(port, Duration::from_secs(5))
            .await
            .expect("connect");
        assert!(stream.nodelay().expect("nodelay"));
    }

    #[tokio::test]
    async fn test_connect_loopback_refused() {
        let listener = TcpListener::bind((Ipv4Addr::LOCALHOST, 0))
            .await
            .expect("bind");
        let port = listener.local_addr().expect("addr").port();
        drop(listener);

        let err = connect_loopback(port, Duration::from_secs(5))
            .await
            .unwrap_err();
        assert!(err.is_connection_error());
    }
}
