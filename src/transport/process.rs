//! Host process management.
//!
//! [`HostProcess`] owns the spawned host binary. Its stderr is forwarded
//! into `tracing` under the `ui_bridge::host` target. Socket hosts announce
//! their endpoint with a single JSON [`InitLine`] on stdout and keep stdin
//! open as a control channel.

// ============================================================================
// Imports
// ============================================================================

use std::path::PathBuf;
use std::process::{ExitStatus, Stdio};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tracing::{debug, info, trace, warn};

use crate::bridge::BridgeConfig;
use crate::error::{Error, Result};
use crate::protocol::Handshake;

// ============================================================================
// Constants
// ============================================================================

/// Tracing target for lines the host writes to stderr.
pub const HOST_LOG_TARGET: &str = "ui_bridge::host";

/// Control-channel line asking a socket host to exit.
pub const SHUTDOWN_COMMAND: &str = "shutdown";

// ============================================================================
// InitLine
// ============================================================================

/// Endpoint announcement printed by socket hosts on stdout.
///
/// ```json
/// {"protocol":"binary-rpc","port":40123,"token":"9f..","protocolVersion":1,"bridgeVersion":"0.1.0"}
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InitLine {
    /// Transport name (`binary-rpc` or `local-socket`).
    pub protocol: String,
    /// Loopback TCP port.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,
    /// Unix socket path.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub socket_path: Option<PathBuf>,
    /// Token the client must send as its first frame.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
    /// Protocol version spoken by the host.
    pub protocol_version: u32,
    /// Host build version.
    #[serde(default)]
    pub bridge_version: String,
}

impl InitLine {
    /// Handshake equivalent of this announcement.
    #[must_use]
    pub fn handshake(&self) -> Handshake {
        Handshake {
            protocol: self.protocol_version,
            bridge_version: self.bridge_version.clone(),
            compatible: true,
            reason: None,
        }
    }
}

// ============================================================================
// HostProcess
// ============================================================================

/// Guards the host child process and kills it when dropped.
pub struct HostProcess {
    /// The child process handle.
    child: Option<Child>,
    /// Process ID for logging.
    pid: u32,
    /// Control channel (socket modes only).
    control: Option<ChildStdin>,
    /// Task forwarding stderr into tracing.
    stderr_task: Option<JoinHandle<()>>,
    /// Task draining stdout after the init line.
    stdout_task: Option<JoinHandle<()>>,
}

impl std::fmt::Debug for HostProcess {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HostProcess")
            .field("pid", &self.pid)
            .field("running", &self.child.is_some())
            .finish_non_exhaustive()
    }
}

impl HostProcess {
    /// Spawns the host described by `config`.
    ///
    /// Returns the guard together with the child's stdin and stdout.
    ///
    /// # Errors
    ///
    /// - [`Error::HostNotFound`] if the binary does not exist
    /// - [`Error::ProcessLaunchFailed`] if spawning fails
    pub(crate) fn spawn(config: &BridgeConfig) -> Result<(Self, ChildStdin, ChildStdout)> {
        if !config.host_path.exists() {
            return Err(Error::host_not_found(&config.host_path));
        }

        let mut command = Command::new(&config.host_path);
        command
            .args(config.to_args())
            .envs(config.to_env())
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let mut child = command.spawn().map_err(Error::process_launch_failed)?;
        let pid = child.id().unwrap_or(0);

        let (Some(stdin), Some(stdout), Some(stderr)) =
            (child.stdin.take(), child.stdout.take(), child.stderr.take())
        else {
            return Err(Error::startup("host pipes unavailable"));
        };

        info!(pid, host = %config.host_path.display(), mode = %config.transport, "Host spawned");

        Ok((
            Self {
                child: Some(child),
                pid,
                control: None,
                stderr_task: Some(forward_stderr(stderr, pid)),
                stdout_task: None,
            },
            stdin,
            stdout,
        ))
    }

    /// Returns the process ID.
    #[inline]
    #[must_use]
    pub fn pid(&self) -> u32 {
        self.pid
    }

    /// Keeps the host's stdin as the control channel.
    pub(crate) fn set_control(&mut self, stdin: ChildStdin) {
        self.control = Some(stdin);
    }

    /// Reads the init line from stdout, then drains the rest of stdout.
    ///
    /// Lines that are not an [`InitLine`] are logged and skipped.
    ///
    /// # Errors
    ///
    /// - [`Error::ConnectionTimeout`] if nothing is announced within `deadline`
    /// - [`Error::Startup`] if stdout closes first
    pub(crate) async fn read_init_line(
        &mut self,
        stdout: ChildStdout,
        deadline: Duration,
    ) -> Result<InitLine> {
        let mut reader = BufReader::new(stdout);
        let init = timeout(deadline, next_init_line(&mut reader))
            .await
            .map_err(|_| Error::connection_timeout(deadline.as_millis() as u64))??;

        debug!(pid = self.pid, ?init, "Host announced endpoint");

        let pid = self.pid;
        self.stdout_task = Some(tokio::spawn(async move {
            let mut lines = reader.lines();
            while let Ok(Some(line)) = lines.next_line().await {
                trace!(target: HOST_LOG_TARGET, pid, stdout = %line);
            }
        }));

        Ok(init)
    }

    /// Asks the host to exit through the control channel.
    ///
    /// Closing the channel afterwards gives the host an EOF as well.
    pub async fn signal_shutdown(&mut self) {
        if let Some(mut control) = self.control.take() {
            let line = format!("{SHUTDOWN_COMMAND}\n");
            if let Err(e) = control.write_all(line.as_bytes()).await {
                debug!(pid = self.pid, error = %e, "Control channel already closed");
            }
            let _ = control.shutdown().await;
        }
    }

    /// Returns the exit status if the host has already exited.
    pub fn try_exit_status(&mut self) -> Option<ExitStatus> {
        self.child.as_mut()?.try_wait().ok().flatten()
    }

    /// Signals shutdown, waits up to `grace`, then kills.
    ///
    /// Returns the exit status, or `None` if it could not be collected.
    pub async fn terminate(&mut self, grace: Duration) -> Option<ExitStatus> {
        self.signal_shutdown().await;

        let mut child = self.child.take()?;
        let status = match timeout(grace, child.wait()).await {
            Ok(Ok(status)) => Some(status),
            Ok(Err(e)) => {
                debug!(pid = self.pid, error = %e, "Failed to wait for host");
                None
            }
            Err(_) => {
                warn!(pid = self.pid, grace_ms = grace.as_millis() as u64, "Host ignored shutdown, killing");
                if let Err(e) = child.kill().await {
                    debug!(pid = self.pid, error = %e, "Failed to kill host");
                }
                child.wait().await.ok()
            }
        };

        self.finish_forwarders().await;
        info!(pid = self.pid, ?status, "Host terminated");
        status
    }

    /// Lets the output forwarders flush what the host wrote before exiting.
    async fn finish_forwarders(&mut self) {
        for task in [self.stderr_task.take(), self.stdout_task.take()]
            .into_iter()
            .flatten()
        {
            if timeout(Duration::from_millis(200), task).await.is_err() {
                trace!(pid = self.pid, "Output forwarder still busy");
            }
        }
    }
}

impl Drop for HostProcess {
    fn drop(&mut self) {
        if let Some(mut child) = self.child.take()
            && let Err(e) = child.start_kill()
        {
            debug!(pid = self.pid, error = %e, "Failed to send kill signal in Drop");
        }
        for task in [self.stderr_task.take(), self.stdout_task.take()]
            .into_iter()
            .flatten()
        {
            task.abort();
        }
    }
}

// ============================================================================
// Helpers
// ============================================================================

/// Forwards each stderr line into tracing.
fn forward_stderr<R>(stderr: R, pid: u32) -> JoinHandle<()>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut lines = BufReader::new(stderr).lines();
        loop {
            match lines.next_line().await {
                Ok(Some(line)) => info!(target: HOST_LOG_TARGET, pid, "{line}"),
                Ok(None) => break,
                Err(e) => {
                    debug!(pid, error = %e, "Host stderr unreadable");
                    break;
                }
            }
        }
    })
}

/// Reads lines until one parses as an [`InitLine`].
async fn next_init_line<R>(reader: &mut BufReader<R>) -> Result<InitLine>
where
    R: AsyncRead + Unpin,
{
    let mut line = String::new();
    loop {
        line.clear();
        if reader.read_line(&mut line).await? == 0 {
            return Err(Error::startup(
                "host exited before announcing its endpoint",
            ));
        }
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }
        match serde_json::from_str::<InitLine>(trimmed) {
            Ok(init) => return Ok(init),
            Err(e) => debug!(error = %e, line = %trimmed, "Skipping non-init stdout line"),
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
