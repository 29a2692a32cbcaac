//! Client configuration - all durations in milliseconds.
//!
//! One [`ClientConfig`] describes a connect cycle and is immutable for its
//! duration; reconnects reuse it verbatim. Construction goes through
//! [`ClientConfigBuilder`], validation through [`ClientConfig::validate`].

mod validation;

use std::net::IpAddr;
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::Result;

/// Configuration for one client connection (shared by every member of a
/// pool built from it).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientConfig {
    /// Target hostname or literal IP address.
    pub host: String,
    /// Target port.
    pub port: u16,
    /// Hostname advertised during the TLS handshake. Defaults to `host`.
    pub sni_hostname: Option<String>,
    /// Local address to bind before connecting.
    pub source_address: Option<IpAddr>,
    /// TLS material; `None` means a plain TCP connection.
    pub tls: Option<TlsConfig>,
    /// Connect timeout in milliseconds.
    pub connect_timeout_ms: u64,
    /// Read-idle timeout in milliseconds; 0 disables it.
    pub read_timeout_ms: u64,
    /// Write-stall timeout in milliseconds; 0 disables it.
    pub write_timeout_ms: u64,
    /// Datarate sampling interval in milliseconds; 0 disables sampling.
    pub datarate_sample_ms: u64,
    /// Reconnection and teardown policy.
    pub reconnect: ReconnectPolicy,
    /// Self-synchronizing framing; `None` delivers raw reads.
    pub framing: Option<FramingConfig>,
    /// Maximum number of queued write requests before submission fails.
    pub max_queued_requests: usize,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            host: String::new(),
            port: 0,
            sni_hostname: None,
            source_address: None,
            tls: None,
            connect_timeout_ms: 10_000,
            read_timeout_ms: 0,
            write_timeout_ms: 0,
            datarate_sample_ms: 1_000,
            reconnect: ReconnectPolicy::default(),
            framing: None,
            max_queued_requests: 1_024,
        }
    }
}

impl ClientConfig {
    /// Start building a configuration for `host:port`.
    pub fn builder(host: impl Into<String>, port: u16) -> ClientConfigBuilder {
        ClientConfigBuilder {
            config: ClientConfig {
                host: host.into(),
                port,
                ..ClientConfig::default()
            },
        }
    }

    pub(crate) fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub(crate) fn sni(&self) -> &str {
        self.sni_hostname.as_deref().unwrap_or(&self.host)
    }
}

/// TLS certificate material, by path. All optional: with nothing set the
/// platform trust store (falling back to the bundled webpki roots) is used
/// and no client certificate is presented.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TlsConfig {
    /// Client certificate chain, PEM.
    pub cert_path: Option<PathBuf>,
    /// Client private key, PEM.
    pub key_path: Option<PathBuf>,
    /// Trust anchors, PEM. Overrides the platform store when set.
    pub ca_path: Option<PathBuf>,
}

/// What happens when a connection fails or closes.
///
/// Each cause (timeout, peer close, fatal error) has its own enable flag and
/// delay so callers can, say, reconnect aggressively after a timeout but sit
/// out a peer-initiated close.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReconnectPolicy {
    /// Reconnect after a read/write timeout.
    pub on_timeout: bool,
    /// Delay before reconnecting after a timeout, milliseconds.
    pub after_timeout_ms: u64,
    /// Reconnect after the peer closes the connection.
    pub on_close: bool,
    /// Delay before reconnecting after a close, milliseconds.
    pub after_close_ms: u64,
    /// Reconnect after a connect failure or fatal I/O error.
    pub on_fail: bool,
    /// Delay before reconnecting after a failure, milliseconds.
    pub after_fail_ms: u64,
    /// Destroy the connection outright when a connect attempt fails.
    pub destroy_after_connect_fail: bool,
    /// Rotate through the last DNS answer's addresses on reconnect.
    pub balance_across_resolved_ips: bool,
    /// Jitter factor (0.0 to 1.0) applied to reconnect delays to prevent
    /// thundering herds of clients reconnecting in lockstep.
    pub jitter_factor: f64,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            on_timeout: false,
            after_timeout_ms: 1_000,
            on_close: false,
            after_close_ms: 1_000,
            on_fail: false,
            after_fail_ms: 1_000,
            destroy_after_connect_fail: false,
            balance_across_resolved_ips: false,
            jitter_factor: 0.0,
        }
    }
}

impl ReconnectPolicy {
    /// Delay for the given cause with jitter applied, or `None` when the
    /// policy does not reconnect for that cause.
    pub(crate) fn delay_for(&self, cause: crate::error::CloseReason) -> Option<Duration> {
        use crate::error::CloseReason;
        let (enabled, base_ms) = match cause {
            CloseReason::Timeout => (self.on_timeout, self.after_timeout_ms),
            CloseReason::Eof => (self.on_close, self.after_close_ms),
            CloseReason::Error => (self.on_fail, self.after_fail_ms),
            CloseReason::Requested => (false, 0),
        };
        if !enabled {
            return None;
        }
        let jitter = if self.jitter_factor > 0.0 {
            let spread = base_ms as f64 * self.jitter_factor.clamp(0.0, 1.0);
            (fastrand::f64() * spread) as u64
        } else {
            0
        };
        Some(Duration::from_millis(base_ms + jitter))
    }
}

/// Self-synchronizing framing parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FramingConfig {
    /// Token terminating a frame; included in the delivered frame.
    pub token: Vec<u8>,
    /// Buffer cap: a token-less buffer reaching this size is flushed whole.
    pub max_buffer: usize,
}

/// Consuming builder for [`ClientConfig`].
#[derive(Debug, Clone)]
pub struct ClientConfigBuilder {
    config: ClientConfig,
}

impl ClientConfigBuilder {
    /// Set the SNI hostname advertised during the TLS handshake.
    #[must_use]
    pub fn sni_hostname(mut self, sni: impl Into<String>) -> Self {
        self.config.sni_hostname = Some(sni.into());
        self
    }

    /// Bind to this local address before connecting.
    #[must_use]
    pub fn source_address(mut self, addr: IpAddr) -> Self {
        self.config.source_address = Some(addr);
        self
    }

    /// Enable TLS with the given material.
    #[must_use]
    pub fn tls(mut self, tls: TlsConfig) -> Self {
        self.config.tls = Some(tls);
        self
    }

    /// Connect timeout in milliseconds.
    #[must_use]
    pub fn connect_timeout_ms(mut self, ms: u64) -> Self {
        self.config.connect_timeout_ms = ms;
        self
    }

    /// Read-idle timeout in milliseconds; 0 disables it.
    #[must_use]
    pub fn read_timeout_ms(mut self, ms: u64) -> Self {
        self.config.read_timeout_ms = ms;
        self
    }

    /// Write-stall timeout in milliseconds; 0 disables it.
    #[must_use]
    pub fn write_timeout_ms(mut self, ms: u64) -> Self {
        self.config.write_timeout_ms = ms;
        self
    }

    /// Datarate sampling interval in milliseconds; 0 disables sampling.
    #[must_use]
    pub fn datarate_sample_ms(mut self, ms: u64) -> Self {
        self.config.datarate_sample_ms = ms;
        self
    }

    /// Set the full reconnection policy.
    #[must_use]
    pub fn reconnect(mut self, policy: ReconnectPolicy) -> Self {
        self.config.reconnect = policy;
        self
    }

    /// Enable self-synchronizing framing on `token` with the given cap.
    #[must_use]
    pub fn framing(mut self, token: impl Into<Vec<u8>>, max_buffer: usize) -> Self {
        self.config.framing = Some(FramingConfig {
            token: token.into(),
            max_buffer,
        });
        self
    }

    /// Cap the write queue at `max` outstanding requests.
    #[must_use]
    pub fn max_queued_requests(mut self, max: usize) -> Self {
        self.config.max_queued_requests = max;
        self
    }

    /// Validate and produce the configuration.
    pub fn build(self) -> Result<ClientConfig> {
        self.config.validate()?;
        Ok(self.config)
    }
}
