//! Device list handler and shared device formatting.

use chrono::Local;
use tabled::Tabled;

use hygrolink_core::{DeviceStatus, EngineConfig, fetch_devices};

use crate::cli::GlobalOpts;
use crate::error::CliError;
use crate::output;

// ── Table row ───────────────────────────────────────────────────────

#[derive(Tabled)]
pub(crate) struct DeviceRow {
    #[tabled(rename = "Device")]
    device: String,
    #[tabled(rename = "Humidity")]
    humidity: String,
    #[tabled(rename = "Temp")]
    temperature: String,
    #[tabled(rename = "Alert")]
    alert: String,
    #[tabled(rename = "Updated")]
    updated: String,
}

impl From<&DeviceStatus> for DeviceRow {
    fn from(s: &DeviceStatus) -> Self {
        Self {
            device: s.device_id.clone(),
            humidity: format!("{:.1}%", s.humidity),
            temperature: format!("{:.1}°C", s.temperature),
            alert: alert_text(s).unwrap_or("-").to_owned(),
            updated: local_time(s),
        }
    }
}

/// Alert message, or `None` when the device is not alerting.
pub(crate) fn alert_text(s: &DeviceStatus) -> Option<&str> {
    if !s.alert {
        return None;
    }
    Some(if s.message.is_empty() { "ALERT" } else { &s.message })
}

/// `last_updated` in local time, or verbatim when it doesn't parse.
pub(crate) fn local_time(s: &DeviceStatus) -> String {
    s.timestamp().map_or_else(
        || s.last_updated.clone(),
        |ts| ts.with_timezone(&Local).format("%Y-%m-%d %H:%M:%S").to_string(),
    )
}

/// Tab-separated line for `--output plain`.
pub(crate) fn plain_line(s: &DeviceStatus) -> String {
    format!(
        "{}\t{:.1}\t{:.1}\t{}\t{}",
        s.device_id,
        s.humidity,
        s.temperature,
        s.alert,
        s.last_updated
    )
}

pub(crate) fn detail(s: &DeviceStatus) -> String {
    let mut lines = vec![
        format!("Device:      {}", s.device_id),
        format!("Humidity:    {:.1}%", s.humidity),
        format!("Temperature: {:.1}°C", s.temperature),
        format!("Updated:     {}", local_time(s)),
    ];
    if let Some(message) = alert_text(s) {
        lines.push(format!("Alert:       {message}"));
    }
    lines.join("\n")
}

// ── Handler ─────────────────────────────────────────────────────────

pub async fn handle(config: &EngineConfig, global: &GlobalOpts) -> Result<(), CliError> {
    let devices = fetch_devices(config).await?;
    let out = output::render_list(
        &global.output,
        &devices,
        |s| DeviceRow::from(s),
        |s| s.device_id.clone(),
    )?;
    output::print_output(&out, global.quiet);
    Ok(())
}
