// hygrolink-api: Async Rust client for hygrolink sensor servers (REST + event stream)

pub mod client;
pub mod error;
pub mod models;
pub mod sse;
pub mod stream;
pub mod transport;

#[cfg(any(test, feature = "test-util"))]
pub mod testing;

pub use client::ApiClient;
pub use error::Error;
pub use models::{DeviceStatus, DevicesResponse, parse_timestamp};
pub use sse::{FrameParser, decode_status};
pub use stream::{
    ConnectOutcome, DEFAULT_RECONNECT_DELAY, DisconnectReason, EventReceiver, HttpStreamTransport,
    ReconnectConfig, StreamClient, StreamEvent, StreamState, StreamTransport, TransportEvent,
};
pub use transport::{TlsMode, TransportConfig};
