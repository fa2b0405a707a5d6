// ── Runtime engine configuration ──
//
// These types describe *how* to reach a sensor server and how to treat its
// event stream. They never touch disk: the CLI resolves a profile into an
// `EngineConfig` and hands it in.

use std::path::PathBuf;
use std::time::Duration;

use hygrolink_api::{DEFAULT_RECONNECT_DELAY, ReconnectConfig, TlsMode, TransportConfig};
use url::Url;

/// TLS verification strategy.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum TlsVerification {
    /// System CA store (strict).
    #[default]
    SystemDefaults,
    /// Custom CA certificate file.
    CustomCa(PathBuf),
    /// Skip verification (self-signed lab servers).
    DangerAcceptInvalid,
}

/// Configuration for one sensor server.
///
/// Built by the CLI, passed to `SyncEngine` -- core never reads config files.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Server root (e.g., `http://192.168.0.235:8080`).
    pub server: Url,
    /// TLS verification strategy.
    pub tls: TlsVerification,
    /// Timeout for one-shot requests.
    pub timeout: Duration,
    /// Delay before reconnecting a dropped stream.
    pub reconnect_delay: Duration,
    /// Consecutive failed reconnects before giving up. `None` = forever.
    pub max_reconnect_attempts: Option<u32>,
    /// Reconnect when the server ends the stream cleanly.
    pub reconnect_on_close: bool,
    /// Device to select before the first load, instead of auto-selecting.
    pub initial_device: Option<String>,
}

impl EngineConfig {
    /// Defaults for everything but the server URL.
    pub fn new(server: Url) -> Self {
        Self {
            server,
            tls: TlsVerification::default(),
            timeout: Duration::from_secs(30),
            reconnect_delay: DEFAULT_RECONNECT_DELAY,
            max_reconnect_attempts: None,
            reconnect_on_close: false,
            initial_device: None,
        }
    }

    pub(crate) fn transport(&self) -> TransportConfig {
        let tls = match &self.tls {
            TlsVerification::SystemDefaults => TlsMode::System,
            TlsVerification::CustomCa(path) => TlsMode::CustomCa(path.clone()),
            TlsVerification::DangerAcceptInvalid => TlsMode::DangerAcceptInvalid,
        };
        TransportConfig {
            tls,
            timeout: self.timeout,
        }
    }

    pub(crate) fn reconnect(&self) -> ReconnectConfig {
        ReconnectConfig {
            delay: self.reconnect_delay,
            max_retries: self.max_reconnect_attempts,
            reconnect_on_close: self.reconnect_on_close,
        }
    }
}
