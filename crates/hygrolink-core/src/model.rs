// ── Domain model ──
//
// Registry rows and time-series points. Wire types live in hygrolink-api;
// these add identity for display lists and parsed timestamps.

use chrono::{DateTime, Utc};
use hygrolink_api::DeviceStatus;
use uuid::Uuid;

/// A device registry row.
///
/// `key` is a display-list key only: stable across in-place updates and
/// reassigned whenever the registry is repopulated. Identity is
/// `status.device_id`.
#[derive(Debug, Clone, PartialEq)]
pub struct DeviceEntry {
    pub key: Uuid,
    pub status: DeviceStatus,
}

impl DeviceEntry {
    pub fn new(status: DeviceStatus) -> Self {
        Self {
            key: Uuid::new_v4(),
            status,
        }
    }

    pub fn device_id(&self) -> &str {
        &self.status.device_id
    }
}

/// One time-series point.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Sample {
    pub timestamp: DateTime<Utc>,
    pub humidity: f64,
    pub temperature: f64,
}

impl Sample {
    /// Build a sample from a status, or `None` if its timestamp is unusable.
    pub fn from_status(status: &DeviceStatus) -> Option<Self> {
        Some(Self {
            timestamp: status.timestamp()?,
            humidity: status.humidity,
            temperature: status.temperature,
        })
    }
}

/// Published view of a device's time-series window.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SeriesSnapshot {
    /// Device the samples belong to. `None` before any selection.
    pub device_id: Option<String>,
    /// Time-ascending samples.
    pub samples: Vec<Sample>,
}

impl SeriesSnapshot {
    pub fn latest(&self) -> Option<&Sample> {
        self.samples.last()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }
}
