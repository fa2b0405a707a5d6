// ── Core error types ──
//
// User-facing errors from hygrolink-core. Consumers never match on HTTP
// plumbing directly: the `From<hygrolink_api::Error>` impl translates
// transport-layer errors into domain-appropriate variants.

use thiserror::Error;

/// Unified error type for the core crate.
#[derive(Debug, Error)]
pub enum CoreError {
    // ── Connection errors ────────────────────────────────────────────
    #[error("Cannot connect to server at {url}: {reason}")]
    ConnectionFailed { url: String, reason: String },

    #[error("Request to {url} timed out")]
    Timeout { url: String },

    // ── Data errors ──────────────────────────────────────────────────
    #[error("Device not found: {device_id}")]
    DeviceNotFound { device_id: String },

    #[error("Server sent malformed data: {message}")]
    Decode { message: String },

    // ── API errors (wrapped, not exposed raw) ────────────────────────
    #[error("API error: {message}")]
    Api {
        message: String,
        /// HTTP status code (if applicable).
        status: Option<u16>,
    },

    // ── Configuration errors ─────────────────────────────────────────
    #[error("Configuration error: {message}")]
    Config { message: String },

    #[error("Invalid endpoint: {message}")]
    InvalidEndpoint { message: String },

    // ── Engine lifecycle ─────────────────────────────────────────────
    #[error("Sync engine has stopped")]
    EngineStopped,
}

impl CoreError {
    /// Translate a fetch-latest failure, mapping 404 to `DeviceNotFound`.
    pub fn for_device(err: hygrolink_api::Error, device_id: &str) -> Self {
        if err.is_not_found() {
            Self::DeviceNotFound {
                device_id: device_id.to_owned(),
            }
        } else {
            err.into()
        }
    }
}

// ── Conversion from transport-layer errors ───────────────────────────

impl From<hygrolink_api::Error> for CoreError {
    fn from(err: hygrolink_api::Error) -> Self {
        match err {
            hygrolink_api::Error::Transport(ref e) => {
                let url = e
                    .url()
                    .map_or_else(|| "<unknown>".into(), ToString::to_string);
                if e.is_timeout() {
                    CoreError::Timeout { url }
                } else if e.is_connect() {
                    CoreError::ConnectionFailed {
                        url,
                        reason: e.to_string(),
                    }
                } else {
                    CoreError::Api {
                        message: e.to_string(),
                        status: e.status().map(|s| s.as_u16()),
                    }
                }
            }
            hygrolink_api::Error::InvalidUrl(e) => CoreError::Config {
                message: format!("Invalid URL: {e}"),
            },
            hygrolink_api::Error::InvalidEndpoint(message) => {
                CoreError::InvalidEndpoint { message }
            }
            hygrolink_api::Error::Tls(msg) => CoreError::ConnectionFailed {
                url: String::new(),
                reason: format!("TLS error: {msg}"),
            },
            hygrolink_api::Error::UnexpectedStatus { status, url } => CoreError::Api {
                message: format!("server returned HTTP {status} for {url}"),
                status: Some(status),
            },
            hygrolink_api::Error::StreamInterrupted(reason) => CoreError::ConnectionFailed {
                url: String::new(),
                reason: format!("stream interrupted: {reason}"),
            },
            hygrolink_api::Error::Deserialization { message, body: _ } => {
                CoreError::Decode { message }
            }
        }
    }
}
