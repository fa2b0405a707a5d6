//! Flag-aware profile resolution on top of `hygrolink_config`.
//!
//! Core never sees these flags: it receives a finished `EngineConfig`.

use std::time::Duration;

use hygrolink_config::{Config, config_path, load_config, profile_to_engine_config};
use hygrolink_core::{EngineConfig, TlsVerification};

use crate::cli::GlobalOpts;
use crate::error::CliError;

/// Determine the active profile name: `--profile` flag, then the
/// configured default, then `"default"`.
pub fn active_profile_name(global: &GlobalOpts, cfg: &Config) -> String {
    global
        .profile
        .clone()
        .or_else(|| cfg.default_profile.clone())
        .unwrap_or_else(|| "default".into())
}

/// Build an `EngineConfig` from the config file, profile, and CLI overrides.
pub fn build_engine_config(global: &GlobalOpts) -> Result<EngineConfig, CliError> {
    let cfg = load_config()?;
    let profile_name = active_profile_name(global, &cfg);

    let mut engine = if let Some(profile) = cfg.profiles.get(&profile_name) {
        tracing::debug!(profile = %profile_name, "using profile");
        profile_to_engine_config(profile, &cfg.defaults)?
    } else {
        // No profile: --server (or HYGROLINK_SERVER) must carry the whole config.
        let Some(raw) = global.server.as_deref() else {
            if global.profile.is_some() {
                return Err(CliError::ProfileNotFound {
                    name: profile_name,
                    available: available_profiles(&cfg),
                });
            }
            return Err(CliError::NoConfig {
                path: config_path().display().to_string(),
            });
        };
        let mut engine = EngineConfig::new(parse_server(raw)?);
        engine.timeout = Duration::from_secs(cfg.defaults.timeout);
        if cfg.defaults.insecure {
            engine.tls = TlsVerification::DangerAcceptInvalid;
        }
        engine
    };

    if let Some(ref raw) = global.server {
        engine.server = parse_server(raw)?;
    }
    if let Some(secs) = global.timeout {
        engine.timeout = Duration::from_secs(secs);
    }
    if global.insecure {
        engine.tls = TlsVerification::DangerAcceptInvalid;
    }

    Ok(engine)
}

fn parse_server(raw: &str) -> Result<url::Url, CliError> {
    raw.parse().map_err(|_| CliError::Validation {
        field: "server".into(),
        reason: format!("invalid URL: {raw}"),
    })
}

fn available_profiles(cfg: &Config) -> String {
    let mut names: Vec<&str> = cfg.profiles.keys().map(String::as_str).collect();
    if names.is_empty() {
        return "(none)".into();
    }
    names.sort_unstable();
    names.join(", ")
}
