//! Live watch: runs a `SyncEngine` and prints every change until Ctrl-C.
//!
//! Device updates and series summaries go to stdout (one compact JSON
//! document per line for the JSON formats). Stream state transitions go to
//! stderr so they never corrupt machine-readable output.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Local, Utc};
use serde::Serialize;
use tracing::{info, warn};

use hygrolink_core::{
    DeviceEntry, DeviceStatus, DisconnectReason, EngineConfig, SeriesSnapshot, StreamState,
    SyncEngine,
};

use crate::cli::{GlobalOpts, OutputFormat, WatchArgs};
use crate::error::CliError;
use crate::output;

use super::devices;

pub async fn handle(
    mut config: EngineConfig,
    args: WatchArgs,
    global: &GlobalOpts,
) -> Result<(), CliError> {
    if let Some(device) = args.device {
        config.initial_device = Some(device);
    }

    let engine = SyncEngine::new(&config)?;
    // Subscribe before loading so the first population is observed.
    let mut devices = engine.devices();
    let mut series = engine.series();
    let mut states = engine.stream_states();

    match engine.load_devices().await {
        Ok(count) => info!(count, "loaded devices"),
        Err(err) => {
            if engine.selected_device_id().is_none() {
                return Err(err.into());
            }
            warn!(error = %err, "initial load failed, streaming anyway");
        }
    }

    let mut printer = Printer::new(global);
    let mut device = engine.selected_device_id().unwrap_or_default();
    printer.note(&format!("watching {device} (Ctrl-C to stop)"));

    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    let outcome = loop {
        tokio::select! {
            _ = &mut ctrl_c => break Ok(()),

            snap = devices.changed() => {
                let Some(snap) = snap else { break Ok(()) };
                if let Err(err) = printer.devices(&snap) {
                    break Err(err);
                }
            }

            snap = series.changed(), if args.series => {
                let Some(snap) = snap else { break Ok(()) };
                if let Err(err) = printer.series(&snap) {
                    break Err(err);
                }
            }

            changed = states.changed() => {
                if changed.is_err() {
                    break Ok(());
                }
                let state = states.borrow_and_update().clone();
                if let Some(id) = state.device_id() {
                    id.clone_into(&mut device);
                }
                printer.note(&describe(&state));
                if let Some(end) = stream_ended(&state, &device) {
                    // Print whatever the stream delivered before it ended.
                    let flushed = match engine.settle().await {
                        Ok(_) => printer.devices(&devices.latest()),
                        Err(err) => Err(err.into()),
                    };
                    break flushed.and(end);
                }
            }
        }
    };

    engine.shutdown();
    outcome
}

/// Whether `state` ends the watch, and how.
fn stream_ended(state: &StreamState, device: &str) -> Option<Result<(), CliError>> {
    let StreamState::Disconnected(reason) = state else {
        return None;
    };
    match reason {
        DisconnectReason::Rejected { status } => Some(Err(CliError::StreamRejected {
            device: device.to_owned(),
            status: *status,
        })),
        DisconnectReason::GaveUp => Some(Err(CliError::StreamGaveUp {
            device: device.to_owned(),
        })),
        DisconnectReason::Closed => Some(Ok(())),
        // Idle before the first connect, Intentional between device switches.
        DisconnectReason::Idle | DisconnectReason::Intentional => None,
    }
}

fn describe(state: &StreamState) -> String {
    match state {
        StreamState::Disconnected(DisconnectReason::Idle) => "stream idle".into(),
        StreamState::Disconnected(DisconnectReason::Intentional) => "stream disconnected".into(),
        StreamState::Disconnected(DisconnectReason::Rejected { status }) => {
            format!("stream rejected (HTTP {status})")
        }
        StreamState::Disconnected(DisconnectReason::Closed) => "stream closed by server".into(),
        StreamState::Disconnected(DisconnectReason::GaveUp) => {
            "stream gave up reconnecting".into()
        }
        StreamState::Connecting { device_id } => format!("connecting to {device_id}"),
        StreamState::Streaming { device_id } => format!("streaming {device_id}"),
        StreamState::Reconnecting { device_id, attempt } => {
            format!("reconnecting to {device_id} (attempt {attempt})")
        }
    }
}

// ── Printer ─────────────────────────────────────────────────────────

#[derive(Serialize)]
struct SeriesView<'a> {
    device_id: Option<&'a str>,
    samples: Vec<SampleView>,
}

#[derive(Serialize)]
struct SampleView {
    timestamp: DateTime<Utc>,
    humidity: f64,
    temperature: f64,
}

impl<'a> From<&'a SeriesSnapshot> for SeriesView<'a> {
    fn from(snap: &'a SeriesSnapshot) -> Self {
        Self {
            device_id: snap.device_id.as_deref(),
            samples: snap
                .samples
                .iter()
                .map(|s| SampleView {
                    timestamp: s.timestamp,
                    humidity: s.humidity,
                    temperature: s.temperature,
                })
                .collect(),
        }
    }
}

struct Printer {
    format: OutputFormat,
    color: bool,
    quiet: bool,
    /// Last status printed per device; unchanged entries are skipped.
    printed: HashMap<String, DeviceStatus>,
}

impl Printer {
    fn new(global: &GlobalOpts) -> Self {
        Self {
            format: global.output.clone(),
            color: output::should_color(&global.color),
            quiet: global.quiet,
            printed: HashMap::new(),
        }
    }

    /// Status line on stderr.
    fn note(&self, text: &str) {
        if !self.quiet {
            eprintln!("{}", output::dim(text, self.color));
        }
    }

    fn devices(&mut self, entries: &[Arc<DeviceEntry>]) -> Result<(), CliError> {
        for entry in entries {
            let status = &entry.status;
            if self.printed.get(&status.device_id) != Some(status) {
                let line = self.render_update(status)?;
                output::print_output(&line, self.quiet);
                self.printed.insert(status.device_id.clone(), status.clone());
            }
        }
        Ok(())
    }

    fn render_update(&self, status: &DeviceStatus) -> Result<String, CliError> {
        match self.format {
            OutputFormat::Table => Ok(self.update_line(status)),
            OutputFormat::Plain => Ok(devices::plain_line(status)),
            OutputFormat::Json | OutputFormat::JsonCompact => output::render_json(status, true),
            OutputFormat::Yaml => Ok(format!("---\n{}", output::render_yaml(status)?)),
        }
    }

    fn update_line(&self, status: &DeviceStatus) -> String {
        let time = status.timestamp().map_or_else(
            || status.last_updated.clone(),
            |ts| ts.with_timezone(&Local).format("%H:%M:%S").to_string(),
        );
        let mut line = format!(
            "{}  {}  {:>5.1}%  {:>5.1}°C",
            output::dim(&time, self.color),
            output::device(&status.device_id, self.color),
            status.humidity,
            status.temperature,
        );
        if let Some(message) = devices::alert_text(status) {
            line.push_str("  ");
            line.push_str(&output::alert(message, self.color));
        }
        line
    }

    fn series(&self, snap: &SeriesSnapshot) -> Result<(), CliError> {
        let rendered = match self.format {
            OutputFormat::Table | OutputFormat::Plain => series_summary(snap),
            OutputFormat::Json | OutputFormat::JsonCompact => {
                output::render_json(&SeriesView::from(snap), true)?
            }
            OutputFormat::Yaml => format!("---\n{}", output::render_yaml(&SeriesView::from(snap))?),
        };
        output::print_output(&rendered, self.quiet);
        Ok(())
    }
}

/// One-line summary of a series window.
fn series_summary(snap: &SeriesSnapshot) -> String {
    let device = snap.device_id.as_deref().unwrap_or("-");
    if snap.is_empty() {
        return format!("{device}: no samples");
    }

    let range = |values: &mut dyn Iterator<Item = f64>| {
        values.fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), v| {
            (lo.min(v), hi.max(v))
        })
    };
    let (h_lo, h_hi) = range(&mut snap.samples.iter().map(|s| s.humidity));
    let (t_lo, t_hi) = range(&mut snap.samples.iter().map(|s| s.temperature));

    format!(
        "{device}: {} samples, humidity {h_lo:.1}..{h_hi:.1}%, temperature {t_lo:.1}..{t_hi:.1}°C",
        snap.samples.len()
    )
}
