//! Bridge configuration.
//!
//! Provides a type-safe interface for choosing the host binary, transport,
//! timeouts, and resource limits of a [`BridgeConnection`].
//!
//! # Example
//!
//! ```ignore
//! use std::time::Duration;
//! use ui_bridge::{BridgeConfig, TransportKind};
//!
//! let config = BridgeConfig::new("/usr/local/bin/ui-bridge-host")
//!     .with_transport(TransportKind::LocalSocket)
//!     .with_headless()
//!     .with_request_timeout(Duration::from_secs(5));
//!
//! let args = config.to_args();
//! // ["--mode", "local-socket", "--headless"]
//! ```
//!
//! # Environment
//!
//! | Variable | Field |
//! |----------|-------|
//! | `UI_BRIDGE_HOST` | `host_path` |
//! | `UI_BRIDGE_TRANSPORT` | `transport` (`stdio`, `binary-rpc`, `local-socket`) |
//! | `UI_BRIDGE_SOCKET_DIR` | `socket_dir` |
//! | `UI_BRIDGE_HEADLESS` | `headless` (`1`, `true`, `yes`) |
//!
//! [`BridgeConnection`]: crate::BridgeConnection

// ============================================================================
// Imports
// ============================================================================

use std::path::PathBuf;
use std::time::Duration;

use crate::error::{Error, Result};
use crate::transport::{DEFAULT_MAX_FRAME_SIZE, Framing, TransportKind};

// ============================================================================
// Constants
// ============================================================================

/// Environment variable naming the host binary.
pub const ENV_HOST: &str = "UI_BRIDGE_HOST";

/// Environment variable selecting the transport.
pub const ENV_TRANSPORT: &str = "UI_BRIDGE_TRANSPORT";

/// Environment variable overriding the socket directory.
pub const ENV_SOCKET_DIR: &str = "UI_BRIDGE_SOCKET_DIR";

/// Environment variable enabling headless hosts.
pub const ENV_HEADLESS: &str = "UI_BRIDGE_HEADLESS";

/// Default per-call deadline.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Default deadline for the startup handshake.
pub const DEFAULT_READY_TIMEOUT: Duration = Duration::from_secs(30);

/// Default time the host gets to exit before it is killed.
pub const DEFAULT_SHUTDOWN_GRACE: Duration = Duration::from_secs(2);

/// Default cap on in-flight calls.
pub const DEFAULT_MAX_PENDING: usize = 1024;

// ============================================================================
// BridgeConfig
// ============================================================================

/// Bridge connection configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BridgeConfig {
    /// Path to the host binary.
    pub host_path: PathBuf,

    /// Transport used to reach the host.
    pub transport: TransportKind,

    /// Framing on the stdio transport. Socket transports always use
    /// length-prefixed frames.
    pub framing: Framing,

    /// Directory for the host's Unix socket.
    pub socket_dir: Option<PathBuf>,

    /// Ask the host not to show windows.
    pub headless: bool,

    /// Additional host command-line arguments.
    pub extra_args: Vec<String>,

    /// Default per-call deadline.
    pub request_timeout: Duration,

    /// Deadline for the startup handshake.
    pub ready_timeout: Duration,

    /// Time the host gets to exit on `quit` before it is killed.
    pub shutdown_grace: Duration,

    /// Maximum number of in-flight calls.
    pub max_pending: usize,

    /// Maximum frame size in bytes.
    pub max_frame_size: usize,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            host_path: PathBuf::new(),
            transport: TransportKind::Stdio,
            framing: Framing::Lines,
            socket_dir: None,
            headless: false,
            extra_args: Vec::new(),
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            ready_timeout: DEFAULT_READY_TIMEOUT,
            shutdown_grace: DEFAULT_SHUTDOWN_GRACE,
            max_pending: DEFAULT_MAX_PENDING,
            max_frame_size: DEFAULT_MAX_FRAME_SIZE,
        }
    }
}

// ============================================================================
// Constructors
// ============================================================================

impl BridgeConfig {
    /// Creates a configuration for the given host binary.
    #[must_use]
    pub fn new(host_path: impl Into<PathBuf>) -> Self {
        Self {
            host_path: host_path.into(),
            ..Default::default()
        }
    }

    /// Creates a configuration from the process environment.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if a variable holds an unparsable value.
    pub fn from_env() -> Result<Self> {
        Self::default().overlay(|key| std::env::var(key).ok())
    }

    /// Overlays variables resolved through `lookup` onto `self`.
    fn overlay(mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        if let Some(path) = lookup(ENV_HOST).filter(|v| !v.is_empty()) {
            self.host_path = PathBuf::from(path);
        }

        if let Some(kind) = lookup(ENV_TRANSPORT).filter(|v| !v.is_empty()) {
            self.transport = kind.parse().map_err(|_| {
                Error::config(format!("{ENV_TRANSPORT}: unknown transport '{kind}'"))
            })?;
        }

        if let Some(dir) = lookup(ENV_SOCKET_DIR).filter(|v| !v.is_empty()) {
            self.socket_dir = Some(PathBuf::from(dir));
        }

        if let Some(flag) = lookup(ENV_HEADLESS) {
            self.headless = match flag.to_ascii_lowercase().as_str() {
                "1" | "true" | "yes" | "on" => true,
                "" | "0" | "false" | "no" | "off" => false,
                other => {
                    return Err(Error::config(format!(
                        "{ENV_HEADLESS}: expected a boolean, got '{other}'"
                    )));
                }
            };
        }

        Ok(self)
    }
}

// ============================================================================
// Builder Methods
// ============================================================================

impl BridgeConfig {
    /// Sets the host binary.
    #[inline]
    #[must_use]
    pub fn with_host(mut self, path: impl Into<PathBuf>) -> Self {
        self.host_path = path.into();
        self
    }

    /// Sets the transport.
    #[inline]
    #[must_use]
    pub fn with_transport(mut self, kind: TransportKind) -> Self {
        self.transport = kind;
        self
    }

    /// Sets the stdio framing.
    #[inline]
    #[must_use]
    pub fn with_framing(mut self, framing: Framing) -> Self {
        self.framing = framing;
        self
    }

    /// Sets the socket directory.
    #[inline]
    #[must_use]
    pub fn with_socket_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.socket_dir = Some(dir.into());
        self
    }

    /// Enables headless mode.
    #[inline]
    #[must_use]
    pub fn with_headless(mut self) -> Self {
        self.headless = true;
        self
    }

    /// Adds a custom host argument.
    #[inline]
    #[must_use]
    pub fn with_arg(mut self, arg: impl Into<String>) -> Self {
        self.extra_args.push(arg.into());
        self
    }

    /// Sets the default per-call deadline.
    #[inline]
    #[must_use]
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Sets the startup handshake deadline.
    #[inline]
    #[must_use]
    pub fn with_ready_timeout(mut self, timeout: Duration) -> Self {
        self.ready_timeout = timeout;
        self
    }

    /// Sets the shutdown grace period.
    #[inline]
    #[must_use]
    pub fn with_shutdown_grace(mut self, grace: Duration) -> Self {
        self.shutdown_grace = grace;
        self
    }

    /// Sets the in-flight call limit.
    #[inline]
    #[must_use]
    pub fn with_max_pending(mut self, max: usize) -> Self {
        self.max_pending = max;
        self
    }

    /// Sets the frame size limit.
    #[inline]
    #[must_use]
    pub fn with_max_frame_size(mut self, max: usize) -> Self {
        self.max_frame_size = max;
        self
    }
}

// ============================================================================
// Conversion Methods
// ============================================================================

impl BridgeConfig {
    /// Converts the configuration to host command-line arguments.
    #[must_use]
    pub fn to_args(&self) -> Vec<String> {
        let mut args = Vec::with_capacity(5 + self.extra_args.len());

        args.push("--mode".to_string());
        args.push(self.transport.as_str().to_string());

        if self.transport == TransportKind::Stdio && self.framing != Framing::Lines {
            args.push("--framing".to_string());
            args.push(self.framing.as_str().to_string());
        }

        if self.headless {
            args.push("--headless".to_string());
        }

        args.extend(self.extra_args.iter().cloned());
        args
    }

    /// Environment variables passed to the host.
    #[must_use]
    pub fn to_env(&self) -> Vec<(&'static str, String)> {
        self.socket_dir
            .iter()
            .map(|dir| (ENV_SOCKET_DIR, dir.display().to_string()))
            .collect()
    }

    /// Framing used on the selected transport.
    #[inline]
    #[must_use]
    pub fn effective_framing(&self) -> Framing {
        match self.transport {
            TransportKind::Stdio => self.framing,
            TransportKind::BinaryRpc | TransportKind::LocalSocket => Framing::LengthPrefixed,
        }
    }

    /// Validates the configuration.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] describing the first invalid field.
    pub fn validate(&self) -> Result<()> {
        if self.host_path.as_os_str().is_empty() {
            return Err(Error::config(format!(
                "host binary not set (use BridgeConfig::new or {ENV_HOST})"
            )));
        }
        if self.transport == TransportKind::Stdio && self.framing == Framing::LengthPrefixed {
            return Err(Error::config(
                "stdio framing must be 'lines' or 'checksummed'",
            ));
        }
        if self.request_timeout.is_zero() || self.ready_timeout.is_zero() {
            return Err(Error::config("timeouts must be greater than zero"));
        }
        if self.max_pending == 0 {
            return Err(Error::config("max_pending must be greater than zero"));
        }
        if self.max_frame_size == 0 || self.max_frame_size > u32::MAX as usize {
            return Err(Error::config(
                "max_frame_size must be between 1 and u32::MAX bytes",
            ));
        }
        Ok(())
    }
}

// ============================================================================
// Tests
// ============================================================================
