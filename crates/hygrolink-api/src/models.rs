// Wire types for the sensor server's REST and stream payloads.

use std::borrow::Cow;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Current status of one sensor device, exactly as the server sends it.
///
/// `last_updated` is kept verbatim; use [`DeviceStatus::timestamp`] to get a
/// parsed instant. Extra fields (e.g. a server-side `id`) are ignored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceStatus {
    pub device_id: String,
    /// Relative humidity in percent.
    pub humidity: f64,
    /// Temperature in degrees Celsius.
    pub temperature: f64,
    pub alert: bool,
    /// Human-readable alert text. Only meaningful when `alert` is set.
    pub message: String,
    /// ISO-8601 timestamp with fractional seconds of any precision.
    pub last_updated: String,
}

impl DeviceStatus {
    /// Parse `last_updated`, or `None` if the server sent something unusable.
    pub fn timestamp(&self) -> Option<DateTime<Utc>> {
        parse_timestamp(&self.last_updated)
    }
}

/// Body of `GET /v1/devices`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DevicesResponse {
    pub devices: Vec<DeviceStatus>,
}

/// Parse a server timestamp into UTC.
///
/// Fractional seconds are normalized to millisecond precision first
/// (see [`normalize_fractional_seconds`]), so nanosecond timestamps and
/// short fractions parse identically.
pub fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    let normalized = normalize_fractional_seconds(raw.trim());
    DateTime::parse_from_rfc3339(&normalized)
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

/// Force the fractional-seconds field to exactly three digits.
///
/// Longer fractions are truncated, shorter ones zero-padded. Timestamps
/// without a fractional part are returned untouched.
pub fn normalize_fractional_seconds(raw: &str) -> Cow<'_, str> {
    let Some(dot) = raw.find('.') else {
        return Cow::Borrowed(raw);
    };
    let fraction_start = dot + 1;
    let fraction_end = raw[fraction_start..]
        .find(|c: char| !c.is_ascii_digit())
        .map_or(raw.len(), |i| fraction_start + i);
    let digits = &raw[fraction_start..fraction_end];

    if digits.len() == 3 {
        return Cow::Borrowed(raw);
    }

    let mut out = String::with_capacity(raw.len() + 3);
    out.push_str(&raw[..fraction_start]);
    if digits.len() > 3 {
        out.push_str(&digits[..3]);
    } else {
        out.push_str(digits);
        out.extend(std::iter::repeat_n('0', 3 - digits.len()));
    }
    out.push_str(&raw[fraction_end..]);
    Cow::Owned(out)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Timelike};

    #[test]
    fn truncates_nanoseconds() {
        assert_eq!(
            normalize_fractional_seconds("2025-01-10T12:00:00.123456789Z"),
            "2025-01-10T12:00:00.123Z"
        );
    }

    #[test]
    fn pads_short_fractions() {
        assert_eq!(
            normalize_fractional_seconds("2025-01-10T12:00:00.5Z"),
            "2025-01-10T12:00:00.500Z"
        );
    }

    #[test]
    fn keeps_offsets_after_the_fraction() {
        assert_eq!(
            normalize_fractional_seconds("2025-01-10T21:00:00.1234+09:00"),
            "2025-01-10T21:00:00.123+09:00"
        );
    }

    #[test]
    fn leaves_whole_seconds_alone() {
        let raw = "2025-01-10T12:00:00Z";
        assert!(matches!(normalize_fractional_seconds(raw), Cow::Borrowed(_)));
    }

    #[test]
    fn parses_go_rfc3339nano_with_offset() {
        let ts = parse_timestamp("2025-01-10T21:00:00.987654321+09:00").unwrap();
        let noon = Utc.with_ymd_and_hms(2025, 1, 10, 12, 0, 0).unwrap();
        assert_eq!(ts, noon + chrono::Duration::milliseconds(987));
        assert_eq!(ts.nanosecond(), 987_000_000);
    }

    #[test]
    fn rejects_garbage() {
        assert!(parse_timestamp("yesterday-ish").is_none());
        assert!(parse_timestamp("").is_none());
    }

    #[test]
    fn deserializes_wire_shape_and_ignores_extra_fields() {
        let json = r#"{
            "id": null,
            "device_id": "esp32-01",
            "humidity": 61.5,
            "temperature": 22.25,
            "alert": true,
            "message": "humidity above threshold",
            "last_updated": "2025-01-10T12:00:00.5Z"
        }"#;

        let status: DeviceStatus = serde_json::from_str(json).unwrap();
        assert_eq!(status.device_id, "esp32-01");
        assert!(status.alert);
        assert_eq!(status.message, "humidity above threshold");
        assert!(status.timestamp().is_some());
    }

    #[test]
    fn missing_field_is_rejected() {
        let json = r#"{"device_id":"esp32-01","humidity":61.5}"#;
        assert!(serde_json::from_str::<DeviceStatus>(json).is_err());
    }
}
