//! Latest-reading handler.

use hygrolink_core::{EngineConfig, fetch_latest};

use crate::cli::{GlobalOpts, LatestArgs};
use crate::error::CliError;
use crate::output;

use super::devices;

pub async fn handle(
    config: &EngineConfig,
    args: &LatestArgs,
    global: &GlobalOpts,
) -> Result<(), CliError> {
    let status = fetch_latest(config, &args.device).await?;
    let out = output::render_single(&global.output, &status, devices::detail, devices::plain_line)?;
    output::print_output(&out, global.quiet);
    Ok(())
}
