// ── Time-series window ──
//
// Samples for the selected device, time-ascending, deduplicated by
// proximity and bounded by age.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use hygrolink_api::DeviceStatus;
use tokio::sync::watch;
use tracing::warn;

use crate::model::{Sample, SeriesSnapshot};

/// Two samples closer than this are the same reading.
pub const DEDUP_WINDOW: Duration = Duration::from_secs(1);

/// Samples older than this (relative to insertion time) are evicted.
pub const RETENTION: Duration = Duration::from_secs(60 * 60);

/// Per-device sample window.
///
/// Every mutation publishes a fresh [`SeriesSnapshot`].
pub struct TimeSeriesBuffer {
    device_id: Option<String>,
    samples: Vec<Sample>,
    snapshot: watch::Sender<Arc<SeriesSnapshot>>,
}

impl TimeSeriesBuffer {
    pub fn new() -> Self {
        let (snapshot, _) = watch::channel(Arc::new(SeriesSnapshot::default()));
        Self {
            device_id: None,
            samples: Vec::new(),
            snapshot,
        }
    }

    /// Insert `sample` relative to the current wall clock.
    pub fn add_sample(&mut self, sample: Sample) -> bool {
        self.add_sample_at(sample, Utc::now())
    }

    /// Insert `sample`, evicting relative to `now`.
    ///
    /// 1. A retained sample less than [`DEDUP_WINDOW`] away is replaced
    ///    (the first one found); otherwise the sample is appended.
    /// 2. Samples older than `now - RETENTION` are dropped.
    /// 3. The window is re-sorted by timestamp.
    ///
    /// Returns `false`, without publishing, if the window did not change.
    pub fn add_sample_at(&mut self, sample: Sample, now: DateTime<Utc>) -> bool {
        let mut changed = true;
        match self
            .samples
            .iter_mut()
            .find(|existing| is_duplicate(existing.timestamp, sample.timestamp))
        {
            Some(existing) => {
                changed = *existing != sample;
                *existing = sample;
            }
            None => self.samples.push(sample),
        }

        let before = self.samples.len();
        self.samples.retain(|s| within_retention(now, s.timestamp));
        changed |= self.samples.len() != before;

        if changed {
            self.samples.sort_by_key(|s| s.timestamp);
            self.publish();
        }
        changed
    }

    /// Record a status reading. Returns `false` if the window did not
    /// change, including when the timestamp does not parse.
    pub fn record(&mut self, status: &DeviceStatus) -> bool {
        if let Some(sample) = Sample::from_status(status) {
            self.add_sample(sample)
        } else {
            warn!(
                device_id = %status.device_id,
                last_updated = %status.last_updated,
                "unparseable timestamp, sample dropped"
            );
            false
        }
    }

    /// Discard every sample and retarget the window to `device_id`.
    pub fn reset(&mut self, device_id: Option<String>) {
        self.device_id = device_id;
        self.samples.clear();
        self.publish();
    }

    /// Discard every sample, keeping the target device.
    pub fn clear(&mut self) {
        self.samples.clear();
        self.publish();
    }

    pub fn device_id(&self) -> Option<&str> {
        self.device_id.as_deref()
    }

    pub fn samples(&self) -> &[Sample] {
        &self.samples
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn snapshot(&self) -> Arc<SeriesSnapshot> {
        self.snapshot.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<Arc<SeriesSnapshot>> {
        self.snapshot.subscribe()
    }

    fn publish(&self) {
        let snapshot = SeriesSnapshot {
            device_id: self.device_id.clone(),
            samples: self.samples.clone(),
        };
        self.snapshot.send_modify(|snap| *snap = Arc::new(snapshot));
    }
}

impl Default for TimeSeriesBuffer {
    fn default() -> Self {
        Self::new()
    }
}

fn is_duplicate(a: DateTime<Utc>, b: DateTime<Utc>) -> bool {
    (a - b)
        .abs()
        .to_std()
        .is_ok_and(|diff| diff < DEDUP_WINDOW)
}

/// Future-dated samples are kept.
fn within_retention(now: DateTime<Utc>, timestamp: DateTime<Utc>) -> bool {
    match (now - timestamp).to_std() {
        Ok(age) => age <= RETENTION,
        Err(_) => true,
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use chrono::TimeDelta;
    use pretty_assertions::assert_eq;

    use super::*;

    fn at(now: DateTime<Utc>, offset_ms: i64, humidity: f64) -> Sample {
        Sample {
            timestamp: now + TimeDelta::milliseconds(offset_ms),
            humidity,
            temperature: 20.0,
        }
    }

    fn base() -> DateTime<Utc> {
        DateTime::parse_from_rfc3339("2025-01-10T12:00:00Z")
            .unwrap()
            .with_timezone(&Utc)
    }

    #[test]
    fn samples_within_window_collapse_to_later() {
        let now = base();
        let mut buffer = TimeSeriesBuffer::new();

        buffer.add_sample_at(at(now, 0, 40.0), now);
        buffer.add_sample_at(at(now, 400, 41.0), now);

        assert_eq!(buffer.samples(), &[at(now, 400, 41.0)]);
    }

    #[test]
    fn samples_a_full_second_apart_are_both_kept() {
        let now = base();
        let mut buffer = TimeSeriesBuffer::new();

        buffer.add_sample_at(at(now, 0, 40.0), now);
        buffer.add_sample_at(at(now, 1000, 41.0), now);

        assert_eq!(buffer.len(), 2);
    }

    #[test]
    fn first_duplicate_is_replaced() {
        let now = base();
        let mut buffer = TimeSeriesBuffer::new();

        buffer.add_sample_at(at(now, -1000, 1.0), now);
        buffer.add_sample_at(at(now, 0, 2.0), now);
        // 500ms from both; only the first match is replaced.
        buffer.add_sample_at(at(now, -500, 3.0), now);

        assert_eq!(buffer.samples(), &[at(now, -500, 3.0), at(now, 0, 2.0)]);
    }

    #[test]
    fn out_of_order_samples_are_sorted() {
        let now = base();
        let mut buffer = TimeSeriesBuffer::new();

        buffer.add_sample_at(at(now, -5_000, 1.0), now);
        buffer.add_sample_at(at(now, -15_000, 2.0), now);
        buffer.add_sample_at(at(now, -10_000, 3.0), now);

        let humidities: Vec<f64> = buffer.samples().iter().map(|s| s.humidity).collect();
        assert_eq!(humidities, [2.0, 3.0, 1.0]);
    }

    #[test]
    fn old_samples_are_evicted() {
        let now = base();
        let mut buffer = TimeSeriesBuffer::new();
        let hour_ms = 60 * 60 * 1000;

        buffer.add_sample_at(at(now, -hour_ms - 1, 1.0), now);
        assert!(buffer.is_empty());

        buffer.add_sample_at(at(now, -hour_ms, 2.0), now);
        assert_eq!(buffer.len(), 1);

        let later = now + TimeDelta::minutes(30);
        buffer.add_sample_at(at(now, -10_000, 3.0), later);
        assert_eq!(buffer.samples(), &[at(now, -10_000, 3.0)]);
    }

    #[test]
    fn window_stays_sorted_and_bounded() {
        let now = base();
        let mut buffer = TimeSeriesBuffer::new();
        let hour_ms = 60 * 60 * 1000;

        // Deterministic pseudo-random offsets spanning 2h in the past.
        let mut seed: u64 = 0x2545_f491_4f6c_dd1d;
        for i in 0..500_i32 {
            seed ^= seed << 13;
            seed ^= seed >> 7;
            seed ^= seed << 17;
            let offset = i64::try_from(seed % (2 * 3_600_000)).unwrap();
            buffer.add_sample_at(at(now, -offset, f64::from(i)), now);

            let samples = buffer.samples();
            assert!(samples.windows(2).all(|w| w[0].timestamp <= w[1].timestamp));
            assert!(
                samples
                    .iter()
                    .all(|s| s.timestamp >= now - TimeDelta::milliseconds(hour_ms))
            );
        }
    }

    #[test]
    fn record_rejects_unparseable_timestamps() {
        let mut buffer = TimeSeriesBuffer::new();
        let status = DeviceStatus {
            device_id: "d1".into(),
            humidity: 50.0,
            temperature: 20.0,
            alert: false,
            message: String::new(),
            last_updated: "not a time".into(),
        };

        assert!(!buffer.record(&status));
        assert!(buffer.is_empty());
    }

    #[test]
    fn record_accepts_current_readings() {
        let mut buffer = TimeSeriesBuffer::new();
        let status = DeviceStatus {
            device_id: "d1".into(),
            humidity: 50.0,
            temperature: 20.0,
            alert: false,
            message: String::new(),
            last_updated: Utc::now().to_rfc3339(),
        };

        assert!(buffer.record(&status));
        assert_eq!(buffer.len(), 1);

        // Re-recording the same reading is a no-op.
        let rx = buffer.subscribe();
        assert!(!buffer.record(&status));
        assert!(!rx.has_changed().unwrap());
    }

    #[test]
    fn reset_retargets_and_publishes() {
        let now = base();
        let mut buffer = TimeSeriesBuffer::new();
        let rx = buffer.subscribe();

        buffer.reset(Some("d1".into()));
        buffer.add_sample_at(at(now, 0, 40.0), now);
        assert_eq!(rx.borrow().device_id.as_deref(), Some("d1"));
        assert_eq!(rx.borrow().samples.len(), 1);

        buffer.reset(Some("d2".into()));
        assert_eq!(buffer.device_id(), Some("d2"));
        assert!(rx.borrow().is_empty());
    }
}
