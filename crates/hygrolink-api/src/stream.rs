//! Per-device event stream with generation-keyed reconnect.
//!
//! A [`StreamClient`] owns at most one live `text/event-stream` connection.
//! Decoded [`DeviceStatus`] events are pushed, in arrival order, through an
//! unbounded channel tagged with the connection *generation* that produced
//! them. Every `connect`/`disconnect` bumps the generation, so a consumer
//! can discard anything that was in flight for an abandoned connection by
//! comparing against [`StreamClient::generation`].
//!
//! Termination is classified three ways:
//!
//! - non-2xx response: the server rejected the subscription. Terminal.
//! - transport error: the connection dropped. One reconnect is scheduled
//!   after [`ReconnectConfig::delay`]; it only fires if nothing superseded
//!   the connection in the meantime.
//! - client disconnect: intentional. Never reconnects.
//!
//! # Example
//!
//! ```rust,ignore
//! use hygrolink_api::{HttpStreamTransport, ReconnectConfig, StreamClient, TransportConfig};
//!
//! let transport = HttpStreamTransport::new(&TransportConfig::default())?;
//! let (client, mut events) = StreamClient::new(base_url, Arc::new(transport), ReconnectConfig::default());
//!
//! client.connect("esp32-01")?;
//! while let Some(event) = events.recv().await {
//!     println!("{}: {:.1}%", event.status.device_id, event.status.humidity);
//! }
//! ```

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use bytes::Bytes;
use futures_util::StreamExt;
use futures_util::stream::BoxStream;
use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};
use url::Url;

use crate::client::stream_url;
use crate::error::Error;
use crate::models::DeviceStatus;
use crate::sse::{FrameParser, decode_status};
use crate::transport::TransportConfig;

/// Fixed delay between a dropped connection and its reconnect attempt.
pub const DEFAULT_RECONNECT_DELAY: Duration = Duration::from_secs(5);

// ── ReconnectConfig ──────────────────────────────────────────────────

/// Reconnection policy for dropped streams.
#[derive(Debug, Clone)]
pub struct ReconnectConfig {
    /// Delay before re-issuing the connect. Default: 5s.
    pub delay: Duration,

    /// Consecutive failed attempts allowed before giving up.
    /// `None` means retry forever. A connection that reached the
    /// streaming state resets the count.
    pub max_retries: Option<u32>,

    /// Treat a clean end of the response body like a dropped connection.
    /// Default: `false` (the server closing the stream is final).
    pub reconnect_on_close: bool,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            delay: DEFAULT_RECONNECT_DELAY,
            max_retries: None,
            reconnect_on_close: false,
        }
    }
}

// ── State ────────────────────────────────────────────────────────────

/// Why the client is not connected.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisconnectReason {
    /// No connection was ever requested.
    Idle,
    /// `disconnect()` was called, or another device took over.
    Intentional,
    /// The server answered the subscription with a non-2xx status.
    Rejected { status: u16 },
    /// The server ended the body cleanly.
    Closed,
    /// The retry budget ran out.
    GaveUp,
}

/// Connection state observable by consumers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamState {
    Disconnected(DisconnectReason),
    Connecting { device_id: String },
    Streaming { device_id: String },
    Reconnecting { device_id: String, attempt: u32 },
}

impl StreamState {
    /// The device this state refers to, if any.
    pub fn device_id(&self) -> Option<&str> {
        match self {
            Self::Disconnected(_) => None,
            Self::Connecting { device_id }
            | Self::Streaming { device_id }
            | Self::Reconnecting { device_id, .. } => Some(device_id),
        }
    }

    /// `true` while a connection attempt is open or established.
    pub fn is_live(&self) -> bool {
        matches!(self, Self::Connecting { .. } | Self::Streaming { .. })
    }

    pub fn is_streaming(&self) -> bool {
        matches!(self, Self::Streaming { .. })
    }
}

/// One decoded event, tagged with the connection generation that produced it.
#[derive(Debug, Clone, PartialEq)]
pub struct StreamEvent {
    pub generation: u64,
    pub status: DeviceStatus,
}

/// Receiving half of a client's event channel.
pub type EventReceiver = mpsc::UnboundedReceiver<StreamEvent>;

/// Result of [`StreamClient::connect`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectOutcome {
    /// A new connection was started under this generation.
    Started { generation: u64 },
    /// The client is already connecting or streaming for that device.
    AlreadyConnected,
}

// ── Transport capability ─────────────────────────────────────────────

/// What a stream transport reports for one streaming GET.
#[derive(Debug)]
pub enum TransportEvent {
    /// Response head received.
    Response { status: u16 },
    /// A body chunk, in arrival order.
    Chunk(Bytes),
    /// The connection failed. Terminal.
    Failed(Error),
    /// The body ended cleanly. Terminal.
    Finished,
}

/// Opens streaming GETs.
///
/// Dropping the returned stream must cancel the underlying request.
pub trait StreamTransport: Send + Sync + 'static {
    fn open(&self, url: Url) -> BoxStream<'static, TransportEvent>;
}

/// [`StreamTransport`] backed by `reqwest`.
#[derive(Debug, Clone)]
pub struct HttpStreamTransport {
    http: reqwest::Client,
}

impl HttpStreamTransport {
    /// Build a transport with a timeout-free client from `transport`.
    pub fn new(transport: &TransportConfig) -> Result<Self, Error> {
        Ok(Self {
            http: transport.build_stream_client()?,
        })
    }

    /// Wrap a pre-built client. It must not carry a request timeout.
    pub fn with_client(http: reqwest::Client) -> Self {
        Self { http }
    }
}

impl StreamTransport for HttpStreamTransport {
    fn open(&self, url: Url) -> BoxStream<'static, TransportEvent> {
        let http = self.http.clone();

        async_stream::stream! {
            let request = http
                .get(url)
                .header(reqwest::header::ACCEPT, "text/event-stream")
                .header(reqwest::header::CACHE_CONTROL, "no-cache");

            let response = match request.send().await {
                Ok(response) => response,
                Err(e) => {
                    yield TransportEvent::Failed(Error::Transport(e));
                    return;
                }
            };

            yield TransportEvent::Response { status: response.status().as_u16() };

            let mut body = response.bytes_stream();
            while let Some(chunk) = body.next().await {
                match chunk {
                    Ok(bytes) => yield TransportEvent::Chunk(bytes),
                    Err(e) => {
                        yield TransportEvent::Failed(Error::Transport(e));
                        return;
                    }
                }
            }

            yield TransportEvent::Finished;
        }
        .boxed()
    }
}

// ── StreamClient ─────────────────────────────────────────────────────

/// Handle to a device event stream.
///
/// Cheaply cloneable. Dropping the last handle disconnects.
#[derive(Clone)]
pub struct StreamClient {
    inner: Arc<StreamInner>,
    _guard: Arc<DisconnectOnDrop>,
}

struct StreamInner {
    base_url: Url,
    transport: Arc<dyn StreamTransport>,
    reconnect: ReconnectConfig,
    state: watch::Sender<StreamState>,
    events: mpsc::UnboundedSender<StreamEvent>,
    slot: Mutex<Slot>,
}

/// The single connection slot. Only touched under the mutex.
#[derive(Default)]
struct Slot {
    generation: u64,
    device_id: Option<String>,
    cancel: Option<CancellationToken>,
}

struct DisconnectOnDrop(Arc<StreamInner>);

impl Drop for DisconnectOnDrop {
    fn drop(&mut self) {
        self.0.disconnect();
    }
}

impl StreamClient {
    /// Create a client for the server at `base_url`.
    ///
    /// Returns the client and the receiving end of its event channel.
    /// Connecting requires a Tokio runtime.
    pub fn new(
        base_url: Url,
        transport: Arc<dyn StreamTransport>,
        reconnect: ReconnectConfig,
    ) -> (Self, EventReceiver) {
        let (events, event_rx) = mpsc::unbounded_channel();
        let (state, _) = watch::channel(StreamState::Disconnected(DisconnectReason::Idle));

        let inner = Arc::new(StreamInner {
            base_url,
            transport,
            reconnect,
            state,
            events,
            slot: Mutex::new(Slot::default()),
        });
        let guard = Arc::new(DisconnectOnDrop(Arc::clone(&inner)));

        (
            Self {
                inner,
                _guard: guard,
            },
            event_rx,
        )
    }

    /// Subscribe to `device_id`'s stream.
    ///
    /// A no-op if already connecting or streaming for the same device.
    /// Any other connection, including a pending reconnect, is closed
    /// first.
    pub fn connect(&self, device_id: &str) -> Result<ConnectOutcome, Error> {
        let url = stream_url(&self.inner.base_url, device_id)?;

        let mut slot = self.inner.lock_slot();
        let same_device = slot.device_id.as_deref() == Some(device_id);
        if same_device && self.inner.state.borrow().is_live() {
            debug!(device_id, "already connected");
            return Ok(ConnectOutcome::AlreadyConnected);
        }

        if let Some(previous) = slot.cancel.take() {
            previous.cancel();
            info!(
                previous = slot.device_id.as_deref().unwrap_or_default(),
                "closing previous stream"
            );
            self.inner
                .state
                .send_replace(StreamState::Disconnected(DisconnectReason::Intentional));
        }

        slot.generation += 1;
        let generation = slot.generation;
        let cancel = CancellationToken::new();
        slot.device_id = Some(device_id.to_owned());
        slot.cancel = Some(cancel.clone());
        self.inner.state.send_replace(StreamState::Connecting {
            device_id: device_id.to_owned(),
        });
        drop(slot);

        tokio::spawn(connection_task(
            Arc::clone(&self.inner),
            url,
            device_id.to_owned(),
            generation,
            cancel,
        ));

        Ok(ConnectOutcome::Started { generation })
    }

    /// Close the active connection and cancel any pending reconnect.
    ///
    /// Idempotent.
    pub fn disconnect(&self) {
        self.inner.disconnect();
    }

    /// Current connection generation.
    pub fn generation(&self) -> u64 {
        self.inner.lock_slot().generation
    }

    /// Device currently targeted by this client, if any.
    pub fn device_id(&self) -> Option<String> {
        self.inner.lock_slot().device_id.clone()
    }

    /// Current connection state.
    pub fn current_state(&self) -> StreamState {
        self.inner.state.borrow().clone()
    }

    /// Subscribe to connection state changes.
    pub fn state(&self) -> watch::Receiver<StreamState> {
        self.inner.state.subscribe()
    }
}

impl StreamInner {
    fn lock_slot(&self) -> MutexGuard<'_, Slot> {
        self.slot.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn disconnect(&self) {
        let mut slot = self.lock_slot();
        let had_connection = slot.cancel.is_some() || slot.device_id.is_some();
        if let Some(cancel) = slot.cancel.take() {
            cancel.cancel();
        }
        if had_connection {
            slot.generation += 1;
            info!(
                device_id = slot.device_id.as_deref().unwrap_or_default(),
                "stream disconnected"
            );
        }
        slot.device_id = None;

        let next = StreamState::Disconnected(DisconnectReason::Intentional);
        self.state.send_if_modified(|state| {
            if *state == next {
                false
            } else {
                *state = next;
                true
            }
        });
    }

    fn is_current(&self, generation: u64) -> bool {
        self.lock_slot().generation == generation
    }

    /// Publish `state` if `generation` still owns the slot.
    fn set_state(&self, generation: u64, state: StreamState) -> bool {
        let slot = self.lock_slot();
        if slot.generation != generation {
            return false;
        }
        self.state.send_replace(state);
        true
    }

    /// End `generation`'s connection for good.
    fn finish(&self, generation: u64, reason: DisconnectReason) {
        let mut slot = self.lock_slot();
        if slot.generation == generation {
            slot.cancel = None;
            self.state.send_replace(StreamState::Disconnected(reason));
        }
    }

    /// Take over the slot for a reconnect, unless something superseded
    /// `generation` while the timer was running.
    fn claim_reconnect(&self, generation: u64, device_id: &str) -> Option<u64> {
        let mut slot = self.lock_slot();
        if slot.generation != generation {
            return None;
        }
        slot.generation += 1;
        self.state.send_replace(StreamState::Connecting {
            device_id: device_id.to_owned(),
        });
        Some(slot.generation)
    }
}

// ── Connection lifecycle ─────────────────────────────────────────────

enum Termination {
    Rejected { status: u16 },
    Failed { error: Error, streamed: bool },
    Closed { streamed: bool },
}

/// Connect → stream → on drop, wait → reconnect, until cancelled or
/// terminated.
async fn connection_task(
    inner: Arc<StreamInner>,
    url: Url,
    device_id: String,
    mut generation: u64,
    cancel: CancellationToken,
) {
    let mut attempt: u32 = 0;

    loop {
        let termination = tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            termination = run_connection(&inner, &url, &device_id, generation) => termination,
        };

        let (error, streamed) = match termination {
            Termination::Rejected { status } => {
                warn!(device_id, status, "stream subscription rejected");
                inner.finish(generation, DisconnectReason::Rejected { status });
                break;
            }
            Termination::Closed { .. } if !inner.reconnect.reconnect_on_close => {
                info!(device_id, "stream closed by server");
                inner.finish(generation, DisconnectReason::Closed);
                break;
            }
            Termination::Closed { streamed } => (
                Error::StreamInterrupted("server closed the stream".into()),
                streamed,
            ),
            Termination::Failed { error, streamed } => (error, streamed),
        };

        if streamed {
            attempt = 0;
        }
        if inner.reconnect.max_retries.is_some_and(|max| attempt >= max) {
            error!(
                device_id,
                attempt,
                error = %error,
                "stream reconnection limit reached, giving up"
            );
            inner.finish(generation, DisconnectReason::GaveUp);
            break;
        }
        attempt += 1;

        let delay = inner.reconnect.delay;
        warn!(
            device_id,
            attempt,
            delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
            error = %error,
            "stream dropped, scheduling reconnect"
        );
        let reconnecting = StreamState::Reconnecting {
            device_id: device_id.clone(),
            attempt,
        };
        if !inner.set_state(generation, reconnecting) {
            break;
        }

        tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            () = tokio::time::sleep(delay) => {}
        }

        let Some(next) = inner.claim_reconnect(generation, &device_id) else {
            debug!(device_id, generation, "reconnect superseded, skipping");
            break;
        };
        generation = next;
        info!(device_id, generation, attempt, "reconnecting stream");
    }

    debug!(device_id, generation, "stream task exiting");
}

/// Drive one streaming GET until it terminates.
async fn run_connection(
    inner: &StreamInner,
    url: &Url,
    device_id: &str,
    generation: u64,
) -> Termination {
    info!(url = %url, device_id, generation, "opening device stream");

    let mut transport = inner.transport.open(url.clone());
    let mut parser = FrameParser::new();
    let mut streaming = false;

    while let Some(event) = transport.next().await {
        match event {
            TransportEvent::Response { status } if (200..300).contains(&status) => {
                streaming = true;
                inner.set_state(
                    generation,
                    StreamState::Streaming {
                        device_id: device_id.to_owned(),
                    },
                );
                info!(device_id, status, "stream established");
            }
            // Returning drops `transport`, which cancels the request.
            TransportEvent::Response { status } => return Termination::Rejected { status },
            TransportEvent::Chunk(bytes) => {
                if streaming {
                    for payload in parser.feed(&bytes) {
                        deliver(inner, generation, &payload);
                    }
                } else {
                    trace!(len = bytes.len(), "chunk before response head, dropping");
                }
            }
            TransportEvent::Failed(error) => {
                return Termination::Failed {
                    error,
                    streamed: streaming,
                };
            }
            TransportEvent::Finished => break,
        }
    }

    if parser.has_buffered() {
        debug!(device_id, "discarding partial frame");
    }
    Termination::Closed {
        streamed: streaming,
    }
}

fn deliver(inner: &StreamInner, generation: u64, payload: &str) {
    match decode_status(payload) {
        Ok(status) => {
            if !inner.is_current(generation) {
                trace!(generation, "dropping event from superseded connection");
                return;
            }
            if inner.events.send(StreamEvent { generation, status }).is_err() {
                trace!("event receiver dropped");
            }
        }
        Err(e) => warn!(error = %e, generation, "dropping undecodable stream event"),
    }
}

// ── Tests ────────────────────────────────────────────────────────────
