//! Reference UI host.
//!
//! Speaks the host side of every transport and answers with
//! [`EchoHandler`]. Integration tests launch it as the host process.
//!
//! # Usage
//!
//! ```bash
//! ui-bridge-host --mode stdio --framing checksummed
//! ui-bridge-host --mode binary-rpc
//! UI_BRIDGE_SOCKET_DIR=/tmp/bridge ui-bridge-host --mode local-socket
//! ```
//!
//! Logs go to stderr, filtered by `UI_BRIDGE_LOG` (default `info`).

use std::io::Write;
use std::sync::Arc;

use async_trait::async_trait;
use clap::Parser;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;
use ui_bridge::host::{EchoHandler, Handler, HostContext, HostServer, serve_stdio};
use ui_bridge::transport::SHUTDOWN_COMMAND;
use ui_bridge::{Framing, Message, Response, TransportKind};

/// Environment variable holding the log filter.
const LOG_ENV: &str = "UI_BRIDGE_LOG";

/// Exit code used by the `exit` command.
const EXIT_CODE: i32 = 3;

/// Reference UI host for ui-bridge
#[derive(Parser, Debug)]
#[command(name = "ui-bridge-host")]
#[command(about = "Reference UI host for ui-bridge")]
#[command(version)]
struct Args {
    /// Transport to serve: stdio, binary-rpc, or local-socket
    #[arg(long, default_value = "stdio")]
    mode: TransportKind,

    /// Framing for stdio: lines or checksummed
    #[arg(long, default_value = "lines")]
    framing: Framing,

    /// Run without showing any window
    #[arg(long)]
    headless: bool,
}

/// [`EchoHandler`] plus `exit`, which terminates the process without replying.
struct HostHandler {
    echo: EchoHandler,
}

#[async_trait]
impl Handler for HostHandler {
    async fn handle(&self, message: Message, ctx: HostContext) -> Response {
        if message.message_type == "exit" {
            warn!(id = %message.id, "Exit requested");
            std::process::exit(EXIT_CODE);
        }
        self.echo.handle(message, ctx).await
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    let filter = EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_ansi(false)
        .with_target(false)
        .init();

    info!(mode = %args.mode, framing = %args.framing, headless = args.headless, "Host starting");

    let handler: Arc<dyn Handler> = Arc::new(HostHandler {
        echo: EchoHandler::new(),
    });

    let mut server = match args.mode {
        TransportKind::Stdio => {
            serve_stdio(handler, args.framing).await?;
            info!("Client closed stdin");
            return Ok(());
        }
        TransportKind::BinaryRpc => HostServer::bind_rpc(handler).await?,
        TransportKind::LocalSocket => HostServer::bind_local(handler, None).await?,
    };

    let init = serde_json::to_string(&server.init_line())?;
    {
        let mut stdout = std::io::stdout().lock();
        writeln!(stdout, "{init}")?;
        stdout.flush()?;
    }

    let mut control = BufReader::new(tokio::io::stdin()).lines();
    loop {
        match control.next_line().await {
            Ok(Some(line)) if line.trim() == SHUTDOWN_COMMAND => {
                info!("Shutdown requested");
                break;
            }
            Ok(Some(line)) => warn!(%line, "Unknown control command"),
            Ok(None) => {
                info!("Control channel closed");
                break;
            }
            Err(e) => {
                warn!(error = %e, "Control channel failed");
                break;
            }
        }
    }

    server.shutdown().await;
    Ok(())
}
