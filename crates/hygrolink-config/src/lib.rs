//! Shared configuration for hygrolink tools.
//!
//! TOML profiles, figment layering (defaults → file → environment), and
//! translation to `hygrolink_core::EngineConfig`. The CLI adds flag-aware
//! wrappers on top.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use directories::ProjectDirs;
use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use hygrolink_core::{EngineConfig, TlsVerification};

/// Environment variable overriding the config file location.
pub const CONFIG_PATH_ENV: &str = "HYGROLINK_CONFIG";

/// Prefix for environment overrides. Nested keys use `__`, e.g.
/// `HYGROLINK_DEFAULTS__OUTPUT=json`.
pub const ENV_PREFIX: &str = "HYGROLINK_";

// ── Error ───────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid {field}: {reason}")]
    Validation { field: String, reason: String },

    #[error("profile '{name}' not found")]
    ProfileNotFound { name: String },

    #[error("failed to serialize config: {0}")]
    Serialization(#[from] toml::ser::Error),

    #[error("config loading failed: {0}")]
    Figment(Box<figment::Error>),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<figment::Error> for ConfigError {
    fn from(err: figment::Error) -> Self {
        Self::Figment(Box::new(err))
    }
}

// ── TOML config structs ─────────────────────────────────────────────

/// Top-level TOML configuration.
#[derive(Debug, Deserialize, Serialize)]
pub struct Config {
    /// Default profile name.
    pub default_profile: Option<String>,

    /// Global defaults.
    #[serde(default)]
    pub defaults: Defaults,

    /// Named server profiles.
    #[serde(default)]
    pub profiles: HashMap<String, Profile>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            default_profile: Some("default".into()),
            defaults: Defaults::default(),
            profiles: HashMap::new(),
        }
    }
}

impl Config {
    /// Look up `name`, or the default profile when `None`.
    pub fn profile(&self, name: Option<&str>) -> Result<(String, &Profile), ConfigError> {
        let name = name
            .map(str::to_owned)
            .or_else(|| self.default_profile.clone())
            .unwrap_or_else(|| "default".into());

        let profile = self
            .profiles
            .get(&name)
            .ok_or_else(|| ConfigError::ProfileNotFound { name: name.clone() })?;
        Ok((name, profile))
    }
}

#[derive(Debug, Deserialize, Serialize)]
pub struct Defaults {
    #[serde(default = "default_output")]
    pub output: String,

    #[serde(default = "default_color")]
    pub color: String,

    #[serde(default)]
    pub insecure: bool,

    /// Request timeout in seconds.
    #[serde(default = "default_timeout")]
    pub timeout: u64,
}

impl Default for Defaults {
    fn default() -> Self {
        Self {
            output: default_output(),
            color: default_color(),
            insecure: false,
            timeout: default_timeout(),
        }
    }
}

fn default_output() -> String {
    "table".into()
}
fn default_color() -> String {
    "auto".into()
}
fn default_timeout() -> u64 {
    30
}

/// A named server profile.
#[derive(Debug, Default, Deserialize, Serialize)]
pub struct Profile {
    /// Server base URL (e.g., "http://192.168.0.235:8080").
    pub server: String,

    /// Delay before reconnecting a dropped stream, humantime format ("5s").
    pub reconnect_delay: Option<String>,

    /// Consecutive failed reconnects before giving up. Unset = forever.
    pub max_reconnect_attempts: Option<u32>,

    /// Reconnect when the server ends the stream cleanly.
    pub reconnect_on_close: Option<bool>,

    /// Device to select on startup.
    pub device: Option<String>,

    /// Path to custom CA certificate.
    pub ca_cert: Option<PathBuf>,

    /// Override insecure TLS setting.
    pub insecure: Option<bool>,

    /// Override timeout (seconds).
    pub timeout: Option<u64>,
}

// ── Config file path ────────────────────────────────────────────────

/// Resolve the config file path: `$HYGROLINK_CONFIG`, else platform
/// conventions.
pub fn config_path() -> PathBuf {
    if let Some(path) = std::env::var_os(CONFIG_PATH_ENV) {
        return PathBuf::from(path);
    }

    ProjectDirs::from("com", "hygrolink", "hygrolink").map_or_else(
        || {
            let mut p = dirs_fallback();
            p.push("config.toml");
            p
        },
        |dirs| dirs.config_dir().join("config.toml"),
    )
}

fn dirs_fallback() -> PathBuf {
    let mut p = PathBuf::from(std::env::var("HOME").unwrap_or_else(|_| ".".into()));
    p.push(".config");
    p.push("hygrolink");
    p
}

// ── Config loading ──────────────────────────────────────────────────

/// Load the full Config from the canonical file + environment.
pub fn load_config() -> Result<Config, ConfigError> {
    load_config_from(&config_path())
}

/// Load Config from `path` + environment. A missing file yields defaults.
pub fn load_config_from(path: &Path) -> Result<Config, ConfigError> {
    let figment = Figment::new()
        .merge(Serialized::defaults(Config::default()))
        .merge(Toml::file(path))
        .merge(Env::prefixed(ENV_PREFIX).split("__"));

    let config: Config = figment.extract()?;
    Ok(config)
}

/// Load config, returning a default if it cannot be read.
pub fn load_config_or_default() -> Config {
    load_config().unwrap_or_default()
}

// ── Config saving ───────────────────────────────────────────────────

/// Serialize config to TOML and write to the canonical config path.
pub fn save_config(cfg: &Config) -> Result<PathBuf, ConfigError> {
    let path = config_path();
    save_config_to(cfg, &path)?;
    Ok(path)
}

/// Serialize config to TOML and write it to `path`.
pub fn save_config_to(cfg: &Config, path: &Path) -> Result<(), ConfigError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let toml_str = toml::to_string_pretty(cfg)?;
    std::fs::write(path, toml_str)?;
    Ok(())
}

// ── Translation to runtime config ───────────────────────────────────

/// Build an `EngineConfig` from a profile and the global defaults.
pub fn profile_to_engine_config(
    profile: &Profile,
    defaults: &Defaults,
) -> Result<EngineConfig, ConfigError> {
    let server: url::Url = profile
        .server
        .parse()
        .map_err(|_| ConfigError::Validation {
            field: "server".into(),
            reason: format!("invalid URL: {}", profile.server),
        })?;

    let tls = if profile.insecure.unwrap_or(defaults.insecure) {
        TlsVerification::DangerAcceptInvalid
    } else if let Some(ref ca_path) = profile.ca_cert {
        TlsVerification::CustomCa(ca_path.clone())
    } else {
        TlsVerification::SystemDefaults
    };

    let mut config = EngineConfig::new(server);
    config.tls = tls;
    config.timeout = Duration::from_secs(profile.timeout.unwrap_or(defaults.timeout));
    if let Some(ref raw) = profile.reconnect_delay {
        config.reconnect_delay = parse_delay(raw)?;
    }
    config.max_reconnect_attempts = profile.max_reconnect_attempts;
    config.reconnect_on_close = profile.reconnect_on_close.unwrap_or(false);
    config.initial_device.clone_from(&profile.device);

    Ok(config)
}

fn parse_delay(raw: &str) -> Result<Duration, ConfigError> {
    humantime::parse_duration(raw).map_err(|e| ConfigError::Validation {
        field: "reconnect_delay".into(),
        reason: format!("'{raw}': {e}"),
    })
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    const SAMPLE: &str = r#"
default_profile = "home"

[defaults]
output = "json"
timeout = 10

[profiles.home]
server = "http://192.168.0.235:8080"
reconnect_delay = "2s 500ms"
max_reconnect_attempts = 4
device = "esp32-livingroom"

[profiles.lab]
server = "https://lab.example:8443"
insecure = true
"#;

    fn write_sample() -> (tempfile::TempDir, PathBuf) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, SAMPLE).unwrap();
        (dir, path)
    }

    #[test]
    fn loads_profiles_over_defaults() {
        let (_dir, path) = write_sample();
        let config = load_config_from(&path).unwrap();

        assert_eq!(config.defaults.output, "json");
        assert_eq!(config.defaults.color, "auto");
        let (name, profile) = config.profile(None).unwrap();
        assert_eq!(name, "home");
        assert_eq!(profile.max_reconnect_attempts, Some(4));
    }

    #[test]
    fn missing_file_yields_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = load_config_from(&dir.path().join("absent.toml")).unwrap();

        assert_eq!(config.default_profile.as_deref(), Some("default"));
        assert!(config.profiles.is_empty());
    }

    #[test]
    fn unknown_profile_is_an_error() {
        let (_dir, path) = write_sample();
        let config = load_config_from(&path).unwrap();

        let err = config.profile(Some("office")).unwrap_err();
        assert!(matches!(err, ConfigError::ProfileNotFound { ref name } if name == "office"));
    }

    #[test]
    fn profile_translates_to_engine_config() {
        let (_dir, path) = write_sample();
        let config = load_config_from(&path).unwrap();
        let (_, home) = config.profile(Some("home")).unwrap();

        let engine = profile_to_engine_config(home, &config.defaults).unwrap();
        assert_eq!(engine.server.as_str(), "http://192.168.0.235:8080/");
        assert_eq!(engine.timeout, Duration::from_secs(10));
        assert_eq!(engine.reconnect_delay, Duration::from_millis(2500));
        assert_eq!(engine.max_reconnect_attempts, Some(4));
        assert_eq!(engine.initial_device.as_deref(), Some("esp32-livingroom"));
        assert_eq!(engine.tls, TlsVerification::SystemDefaults);

        let (_, lab) = config.profile(Some("lab")).unwrap();
        let engine = profile_to_engine_config(lab, &config.defaults).unwrap();
        assert_eq!(engine.tls, TlsVerification::DangerAcceptInvalid);
        assert_eq!(engine.reconnect_delay, Duration::from_secs(5));
    }

    #[test]
    fn bad_values_are_validation_errors() {
        let defaults = Defaults::default();
        let bad_url = Profile {
            server: "not a url".into(),
            ..Profile::default()
        };
        assert!(matches!(
            profile_to_engine_config(&bad_url, &defaults),
            Err(ConfigError::Validation { ref field, .. }) if field == "server"
        ));

        let bad_delay = Profile {
            server: "http://h:8080".into(),
            reconnect_delay: Some("soon".into()),
            ..Profile::default()
        };
        assert!(matches!(
            profile_to_engine_config(&bad_delay, &defaults),
            Err(ConfigError::Validation { ref field, .. }) if field == "reconnect_delay"
        ));
    }

    #[test]
    fn saved_config_loads_back() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.toml");
        let mut config = Config::default();
        config.profiles.insert(
            "default".into(),
            Profile {
                server: "http://10.0.0.5:8080".into(),
                reconnect_delay: Some("5s".into()),
                ..Profile::default()
            },
        );

        save_config_to(&config, &path).unwrap();
        let loaded = load_config_from(&path).unwrap();

        let (_, profile) = loaded.profile(None).unwrap();
        assert_eq!(profile.server, "http://10.0.0.5:8080");
        assert_eq!(profile.reconnect_delay.as_deref(), Some("5s"));
    }
}
