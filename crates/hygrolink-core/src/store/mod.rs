// ── Reactive device state ──
//
// Owner-mutated storage with push-based change notification.

mod registry;
mod series;

pub use registry::{DeviceRegistry, Upsert};
pub use series::{DEDUP_WINDOW, RETENTION, TimeSeriesBuffer};
