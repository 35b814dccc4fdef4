//! Builder pattern for bridge connections.
//!
//! Provides a fluent API for configuring and starting a
//! [`BridgeConnection`].
//!
//! # Example
//!
//! ```no_run
//! use ui_bridge::{BridgeConnection, TransportKind};
//!
//! # async fn example() -> ui_bridge::Result<()> {
//! let bridge = BridgeConnection::builder()
//!     .host("/usr/local/bin/ui-bridge-host")
//!     .transport(TransportKind::LocalSocket)
//!     .headless()
//!     .start()?;
//! bridge.wait_until_ready().await?;
//! # Ok(())
//! # }
//! ```

// ============================================================================
// Imports
// ============================================================================

use std::path::PathBuf;
use std::time::Duration;

use crate::error::{Error, Result};
use crate::transport::{Framing, TransportKind};

use super::config::{BridgeConfig, ENV_HOST};
use super::connection::BridgeConnection;

// ============================================================================
// BridgeBuilder
// ============================================================================

/// Builder for configuring a [`BridgeConnection`].
///
/// Use [`BridgeConnection::builder()`] to create a new builder.
#[derive(Debug, Default, Clone)]
pub struct BridgeBuilder {
    /// Path to the host binary.
    host: Option<PathBuf>,
    /// Everything else.
    config: BridgeConfig,
}

// ============================================================================
// BridgeBuilder Implementation
// ============================================================================

impl BridgeBuilder {
    /// Creates a new builder with default configuration.
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a builder seeded from the process environment.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if a variable holds an unparsable value.
    pub fn from_env() -> Result<Self> {
        let config = BridgeConfig::from_env()?;
        let host = (!config.host_path.as_os_str().is_empty()).then(|| config.host_path.clone());
        Ok(Self { host, config })
    }

    /// Sets the path to the host binary.
    ///
    /// # Arguments
    ///
    /// * `path` - Path to the host executable
    #[inline]
    #[must_use]
    pub fn host(mut self, path: impl Into<PathBuf>) -> Self {
        self.host = Some(path.into());
        self
    }

    /// Sets the transport.
    #[inline]
    #[must_use]
    pub fn transport(mut self, kind: TransportKind) -> Self {
        self.config.transport = kind;
        self
    }

    /// Sets the stdio framing.
    #[inline]
    #[must_use]
    pub fn framing(mut self, framing: Framing) -> Self {
        self.config.framing = framing;
        self
    }

    /// Sets the socket directory for the local-socket transport.
    #[inline]
    #[must_use]
    pub fn socket_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config.socket_dir = Some(dir.into());
        self
    }

    /// Asks the host not to show windows.
    #[inline]
    #[must_use]
    pub fn headless(mut self) -> Self {
        self.config.headless = true;
        self
    }

    /// Adds a host argument.
    #[inline]
    #[must_use]
    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.config.extra_args.push(arg.into());
        self
    }

    /// Sets the default per-call deadline.
    #[inline]
    #[must_use]
    pub fn request_timeout(mut self, timeout: Duration) -> Self {
        self.config.request_timeout = timeout;
        self
    }

    /// Sets the startup handshake deadline.
    #[inline]
    #[must_use]
    pub fn ready_timeout(mut self, timeout: Duration) -> Self {
        self.config.ready_timeout = timeout;
        self
    }

    /// Sets the grace period the host gets on quit.
    #[inline]
    #[must_use]
    pub fn shutdown_grace(mut self, grace: Duration) -> Self {
        self.config.shutdown_grace = grace;
        self
    }

    /// Sets the in-flight call limit.
    #[inline]
    #[must_use]
    pub fn max_pending(mut self, max: usize) -> Self {
        self.config.max_pending = max;
        self
    }

    /// Builds the configuration with validation.
    ///
    /// # Errors
    ///
    /// - [`Error::Config`] if the host is not set or a field is invalid
    /// - [`Error::HostNotFound`] if the host path doesn't exist
    pub fn build(self) -> Result<BridgeConfig> {
        let host = self.validate_host()?;
        let config = BridgeConfig {
            host_path: host,
            ..self.config
        };
        config.validate()?;
        Ok(config)
    }

    /// Builds the configuration and starts the connection.
    ///
    /// # Errors
    ///
    /// See [`BridgeBuilder::build`].
    pub fn start(self) -> Result<BridgeConnection> {
        BridgeConnection::start(self.build()?)
    }
}

// ============================================================================
// Validation
// ============================================================================

impl BridgeBuilder {
    /// Validates the host path configuration.
    fn validate_host(&self) -> Result<PathBuf> {
        let host = self.host.clone().ok_or_else(|| {
            Error::config(format!(
                "Host binary path is required. Use .host() or set {ENV_HOST}.\n\
                 Example: BridgeConnection::builder().host(\"/usr/local/bin/ui-bridge-host\")"
            ))
        })?;

        if !host.exists() {
            return Err(Error::host_not_found(&host));
        }

        Ok(host)
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_creates_empty_builder() {
        let builder = BridgeBuilder::new();
        assert!(builder.host.is_none());
        assert_eq!(builder.config.transport, TransportKind::Stdio);
    }

    #[test]
    fn test_setters() {
        let builder = BridgeBuilder::new()
            .host("/bin/sh")
            .transport(TransportKind::BinaryRpc)
            .headless()
            .arg("--trace")
            .request_timeout(Duration::from_secs(3))
            .max_pending(8);

        assert_eq!(builder.host, Some(PathBuf::from("/bin/sh")));
        assert_eq!(builder.config.transport, TransportKind::BinaryRpc);
        assert!(builder.config.headless);
        assert_eq!(builder.config.extra_args, ["--trace"]);
        assert_eq!(builder.config.request_timeout, Duration::from_secs(3));
        assert_eq!(builder.config.max_pending, 8);
    }

    #[test]
    fn test_build_fails_without_host() {
        let err = BridgeBuilder::new().build().unwrap_err();
        assert!(err.to_string().contains("Host binary path is required"));
    }

    #[test]
    fn test_build_fails_with_nonexistent_host() {
        let err = BridgeBuilder::new()
            .host("/nonexistent/ui-bridge-host")
            .build()
            .unwrap_err();
        assert!(matches!(err, Error::HostNotFound { .. }));
    }

    #[test]
    fn test_build_validates_fields() {
        let exe = std::env::current_exe().expect("current exe");
        let err = BridgeBuilder::new()
            .host(&exe)
            .max_pending(0)
            .build()
            .unwrap_err();
        assert!(matches!(err, Error::Config { .. }));

        let config = BridgeBuilder::new().host(&exe).build().expect("valid");
        assert_eq!(config.host_path, exe);
    }
}
