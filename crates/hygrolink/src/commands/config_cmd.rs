//! Config subcommand handlers.

use hygrolink_config::{
    Config, Profile, config_path, load_config, profile_to_engine_config, save_config,
};

use crate::cli::{ConfigArgs, ConfigCommand, GlobalOpts, OutputFormat};
use crate::error::CliError;
use crate::output;

// ── Handler ─────────────────────────────────────────────────────────

pub fn handle(args: ConfigArgs, global: &GlobalOpts) -> Result<(), CliError> {
    match args.command {
        ConfigCommand::Init {
            server,
            name,
            device,
            reconnect_delay,
            force,
        } => {
            let mut cfg = load_config()?;
            if cfg.profiles.contains_key(&name) && !force {
                return Err(CliError::ProfileExists { name });
            }

            let profile = Profile {
                server,
                reconnect_delay,
                device,
                ..Profile::default()
            };
            // Reject bad URLs and delays before anything touches disk.
            profile_to_engine_config(&profile, &cfg.defaults)?;

            insert_profile(&mut cfg, &name, profile);
            let path = save_config(&cfg)?;

            if !global.quiet {
                eprintln!("Saved profile '{name}' to {}", path.display());
            }
            Ok(())
        }

        ConfigCommand::Show => {
            let cfg = load_config()?;
            let out = match global.output {
                OutputFormat::Json => output::render_json(&cfg, false)?,
                OutputFormat::JsonCompact => output::render_json(&cfg, true)?,
                OutputFormat::Yaml => output::render_yaml(&cfg)?,
                OutputFormat::Table | OutputFormat::Plain => toml::to_string_pretty(&cfg)
                    .map_err(|e| CliError::Serialization(e.to_string()))?,
            };
            output::print_output(&out, global.quiet);
            Ok(())
        }

        ConfigCommand::Path => {
            output::print_output(&config_path().display().to_string(), global.quiet);
            Ok(())
        }
    }
}

/// Add or replace `name`, making it the default when the configured
/// default doesn't exist yet.
fn insert_profile(cfg: &mut Config, name: &str, profile: Profile) {
    let default_missing = cfg
        .default_profile
        .as_ref()
        .is_none_or(|d| !cfg.profiles.contains_key(d));
    if default_missing {
        cfg.default_profile = Some(name.to_owned());
    }
    cfg.profiles.insert(name.to_owned(), profile);
}
