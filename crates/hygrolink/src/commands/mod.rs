//! Command dispatch: bridges CLI args -> core fetches/engine -> output formatting.

pub mod config_cmd;
pub mod devices;
pub mod latest;
pub mod watch;

use hygrolink_core::EngineConfig;

use crate::cli::{Command, GlobalOpts};
use crate::error::CliError;

/// Dispatch a server-bound command to the appropriate handler.
pub async fn dispatch(
    cmd: Command,
    config: EngineConfig,
    global: &GlobalOpts,
) -> Result<(), CliError> {
    match cmd {
        Command::Devices => devices::handle(&config, global).await,
        Command::Latest(args) => latest::handle(&config, &args, global).await,
        Command::Watch(args) => watch::handle(config, args, global).await,
        // Config and Completions are handled before dispatch
        Command::Config(_) | Command::Completions(_) => unreachable!(),
    }
}
