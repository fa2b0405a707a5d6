//! CLI error types with miette diagnostics.
//!
//! Maps `CoreError` and `ConfigError` into user-facing errors with
//! actionable help text.

use miette::Diagnostic;
use thiserror::Error;

use hygrolink_config::ConfigError;
use hygrolink_core::CoreError;

/// Process exit codes.
pub mod exit_code {
    pub const GENERAL: i32 = 1;
    pub const USAGE: i32 = 2;
    pub const NOT_FOUND: i32 = 4;
    pub const CONNECTION: i32 = 7;
    pub const TIMEOUT: i32 = 8;
}

#[derive(Debug, Error, Diagnostic)]
pub enum CliError {
    // ── Connection ───────────────────────────────────────────────────

    #[error("Could not connect to server at {url}")]
    #[diagnostic(
        code(hygrolink::connection_failed),
        help(
            "Check that the sensor server is running and reachable.\n\
             URL: {url}\n\
             For self-signed HTTPS servers, try --insecure."
        )
    )]
    ConnectionFailed {
        url: String,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    #[error("Request to {url} timed out")]
    #[diagnostic(
        code(hygrolink::timeout),
        help("Increase timeout with --timeout or check server responsiveness.")
    )]
    Timeout { url: String },

    // ── Stream ───────────────────────────────────────────────────────

    #[error("Server refused the stream for '{device}' (HTTP {status})")]
    #[diagnostic(
        code(hygrolink::stream_rejected),
        help("Run: hygrolink devices to see which devices the server knows")
    )]
    StreamRejected { device: String, status: u16 },

    #[error("Gave up reconnecting the stream for '{device}'")]
    #[diagnostic(
        code(hygrolink::stream_gave_up),
        help("Raise max_reconnect_attempts in your profile, or remove it to retry forever.")
    )]
    StreamGaveUp { device: String },

    // ── Resources ────────────────────────────────────────────────────

    #[error("{resource_type} '{identifier}' not found")]
    #[diagnostic(
        code(hygrolink::not_found),
        help("Run: hygrolink {list_command} to see available {resource_type}s")
    )]
    NotFound {
        resource_type: String,
        identifier: String,
        list_command: String,
    },

    // ── API ──────────────────────────────────────────────────────────

    #[error("API error ({code}): {message}")]
    #[diagnostic(code(hygrolink::api_error))]
    ApiError { code: String, message: String },

    #[error("Server sent malformed data: {message}")]
    #[diagnostic(
        code(hygrolink::decode),
        help("Check that --server points at a hygrolink sensor server.")
    )]
    Decode { message: String },

    // ── Validation ───────────────────────────────────────────────────

    #[error("Invalid value for {field}: {reason}")]
    #[diagnostic(code(hygrolink::validation))]
    Validation { field: String, reason: String },

    // ── Configuration ────────────────────────────────────────────────

    #[error("Profile '{name}' not found in configuration")]
    #[diagnostic(
        code(hygrolink::profile_not_found),
        help(
            "Available profiles: {available}\n\
             Create one with: hygrolink config init --name {name} --server <URL>"
        )
    )]
    ProfileNotFound { name: String, available: String },

    #[error("Profile '{name}' already exists")]
    #[diagnostic(
        code(hygrolink::profile_exists),
        help("Use --force to overwrite it.")
    )]
    ProfileExists { name: String },

    #[error("No server configured")]
    #[diagnostic(
        code(hygrolink::no_config),
        help(
            "Create a profile with: hygrolink config init --server <URL>\n\
             Or pass --server. Config expected at: {path}"
        )
    )]
    NoConfig { path: String },

    #[error(transparent)]
    #[diagnostic(code(hygrolink::config))]
    Config(Box<ConfigError>),

    // ── Internal / IO ────────────────────────────────────────────────

    #[error("Internal error: {0}")]
    #[diagnostic(code(hygrolink::internal))]
    Internal(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("Failed to render output: {0}")]
    #[diagnostic(code(hygrolink::serialization))]
    Serialization(String),
}

impl CliError {
    /// Map this error to an exit code for process termination.
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::ConnectionFailed { .. }
            | Self::StreamRejected { .. }
            | Self::StreamGaveUp { .. } => exit_code::CONNECTION,
            Self::NotFound { .. } => exit_code::NOT_FOUND,
            Self::Timeout { .. } => exit_code::TIMEOUT,
            Self::Validation { .. } | Self::ProfileExists { .. } => exit_code::USAGE,
            _ => exit_code::GENERAL,
        }
    }
}

// ── CoreError → CliError mapping ─────────────────────────────────────

impl From<CoreError> for CliError {
    fn from(err: CoreError) -> Self {
        match err {
            CoreError::ConnectionFailed { url, reason } => CliError::ConnectionFailed {
                url,
                source: reason.into(),
            },

            CoreError::Timeout { url } => CliError::Timeout { url },

            CoreError::DeviceNotFound { device_id } => CliError::NotFound {
                resource_type: "device".into(),
                identifier: device_id,
                list_command: "devices".into(),
            },

            CoreError::Decode { message } => CliError::Decode { message },

            CoreError::Api { message, status } => CliError::ApiError {
                code: status.map_or_else(|| "unknown".into(), |s| s.to_string()),
                message,
            },

            CoreError::Config { message } => CliError::Validation {
                field: "config".into(),
                reason: message,
            },

            CoreError::InvalidEndpoint { message } => CliError::Validation {
                field: "server".into(),
                reason: message,
            },

            CoreError::EngineStopped => {
                CliError::Internal("sync engine stopped unexpectedly".into())
            }
        }
    }
}

// ── ConfigError → CliError mapping ───────────────────────────────────

impl From<ConfigError> for CliError {
    fn from(err: ConfigError) -> Self {
        match err {
            ConfigError::Validation { field, reason } => CliError::Validation { field, reason },
            ConfigError::ProfileNotFound { name } => CliError::ProfileNotFound {
                name,
                available: "(none)".into(),
            },
            other => CliError::Config(Box::new(other)),
        }
    }
}
