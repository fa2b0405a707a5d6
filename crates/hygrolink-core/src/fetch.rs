// ── One-shot fetches ──
//
// Single REST calls for callers that want a snapshot without running a
// `SyncEngine`.

use hygrolink_api::{ApiClient, DeviceStatus};
use tracing::debug;

use crate::config::EngineConfig;
use crate::error::CoreError;

/// Fetch every device's current status.
pub async fn fetch_devices(config: &EngineConfig) -> Result<Vec<DeviceStatus>, CoreError> {
    let api = ApiClient::new(config.server.clone(), &config.transport())?;
    let devices = api.list_devices().await?;
    debug!(count = devices.len(), "fetched device list");
    Ok(devices)
}

/// Fetch one device's latest reading. A 404 is `DeviceNotFound`.
pub async fn fetch_latest(
    config: &EngineConfig,
    device_id: &str,
) -> Result<DeviceStatus, CoreError> {
    let api = ApiClient::new(config.server.clone(), &config.transport())?;
    api.latest(device_id)
        .await
        .map_err(|e| CoreError::for_device(e, device_id))
}
