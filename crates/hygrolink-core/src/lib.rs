// hygrolink-core: Reactive device state between hygrolink-api and consumers (CLI).

pub mod config;
pub mod engine;
pub mod error;
pub mod fetch;
pub mod model;
pub mod store;
pub mod stream;

// ── Primary re-exports ──────────────────────────────────────────────
pub use config::{EngineConfig, TlsVerification};
pub use engine::{Activity, SyncEngine};
pub use error::CoreError;
pub use fetch::{fetch_devices, fetch_latest};
pub use model::{DeviceEntry, Sample, SeriesSnapshot};
pub use store::{DeviceRegistry, TimeSeriesBuffer, Upsert};
pub use stream::Snapshots;

// Stream-layer types consumers observe directly.
pub use hygrolink_api::{DeviceStatus, DisconnectReason, StreamState};
