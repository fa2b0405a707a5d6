// ── Sync engine ──
//
// Single writer of the device registry and the selected device's
// time-series. Snapshot fetches and stream events both funnel into one
// owner task, so a fetch result and a stream event never interleave a
// read-modify-write. Handles talk to the owner over a request channel and
// observe state through `watch` snapshots.

use std::sync::Arc;

use hygrolink_api::{
    ApiClient, ConnectOutcome, DeviceStatus, HttpStreamTransport, ReconnectConfig, StreamClient,
    StreamEvent, StreamState, StreamTransport,
};
use tokio::sync::{mpsc, oneshot, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};

use crate::config::EngineConfig;
use crate::error::CoreError;
use crate::model::{DeviceEntry, SeriesSnapshot};
use crate::store::{DeviceRegistry, TimeSeriesBuffer, Upsert};
use crate::stream::Snapshots;

const REQUEST_CHANNEL_SIZE: usize = 64;

// ── Activity ─────────────────────────────────────────────────────

/// Observable one-shot fetch state.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Activity {
    /// At least one fetch is in flight.
    pub loading: bool,
    /// Message of the most recent failed fetch. Cleared when a fetch starts.
    pub last_error: Option<String>,
}

// ── SyncEngine ───────────────────────────────────────────────────

/// Handle to a running sync engine.
///
/// Cheaply cloneable via `Arc<EngineInner>`. Dropping the last handle
/// stops the owner task and closes the stream.
#[derive(Clone)]
pub struct SyncEngine {
    inner: Arc<EngineInner>,
}

struct EngineInner {
    requests: mpsc::Sender<Request>,
    registry: watch::Receiver<Arc<Vec<Arc<DeviceEntry>>>>,
    series: watch::Receiver<Arc<SeriesSnapshot>>,
    selection: watch::Receiver<Option<String>>,
    activity: watch::Receiver<Activity>,
    stream: StreamClient,
    cancel: CancellationToken,
}

impl Drop for EngineInner {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

enum Request {
    LoadDevices {
        reply: oneshot::Sender<Result<usize, CoreError>>,
    },
    SelectDevice {
        device_id: String,
        reply: oneshot::Sender<Result<DeviceStatus, CoreError>>,
    },
    RefreshLatest {
        reply: oneshot::Sender<Result<Option<DeviceStatus>, CoreError>>,
    },
    ApplyUpdate {
        status: DeviceStatus,
        reply: oneshot::Sender<Upsert>,
    },
    Settle {
        reply: oneshot::Sender<usize>,
    },
}

/// Results of spawned fetches, posted back to the owner.
enum Completion {
    Devices {
        result: Result<Vec<DeviceStatus>, hygrolink_api::Error>,
        reply: oneshot::Sender<Result<usize, CoreError>>,
    },
    Latest {
        device_id: String,
        result: Result<DeviceStatus, hygrolink_api::Error>,
        reply: LatestReply,
    },
}

/// Who is waiting on a fetch-latest.
enum LatestReply {
    Select(oneshot::Sender<Result<DeviceStatus, CoreError>>),
    Refresh(oneshot::Sender<Result<Option<DeviceStatus>, CoreError>>),
}

impl LatestReply {
    fn send(self, result: Result<DeviceStatus, CoreError>) {
        // A caller that stopped waiting is not an error.
        match self {
            Self::Select(tx) => {
                let _ = tx.send(result);
            }
            Self::Refresh(tx) => {
                let _ = tx.send(result.map(Some));
            }
        }
    }
}

impl SyncEngine {
    /// Build an engine talking HTTP to `config.server` and start its owner
    /// task. Must be called within a Tokio runtime.
    ///
    /// Nothing is fetched until [`load_devices`](Self::load_devices). A
    /// configured initial device is streamed immediately.
    pub fn new(config: &EngineConfig) -> Result<Self, CoreError> {
        let transport = config.transport();
        let api = ApiClient::new(config.server.clone(), &transport)?;
        let stream_transport = HttpStreamTransport::new(&transport)?;

        Ok(Self::with_parts(
            api,
            Arc::new(stream_transport),
            config.reconnect(),
            config.initial_device.clone(),
        ))
    }

    /// Build an engine from pre-built parts. `initial_device`, if set, is
    /// selected and streamed right away instead of auto-selecting on load.
    pub fn with_parts(
        api: ApiClient,
        transport: Arc<dyn StreamTransport>,
        reconnect: ReconnectConfig,
        initial_device: Option<String>,
    ) -> Self {
        let (stream, events) = StreamClient::new(api.base_url().clone(), transport, reconnect);
        let (request_tx, request_rx) = mpsc::channel(REQUEST_CHANNEL_SIZE);
        let (completion_tx, completion_rx) = mpsc::unbounded_channel();
        let (selection, selection_rx) = watch::channel(None);
        let (activity, activity_rx) = watch::channel(Activity::default());
        let cancel = CancellationToken::new();

        let registry = DeviceRegistry::new();
        let mut series = TimeSeriesBuffer::new();
        if let Some(device_id) = &initial_device {
            debug!(device_id, "preselecting device");
            series.reset(Some(device_id.clone()));
            selection.send_replace(initial_device.clone());
        }

        let inner = Arc::new(EngineInner {
            requests: request_tx,
            registry: registry.subscribe(),
            series: series.subscribe(),
            selection: selection_rx,
            activity: activity_rx,
            stream: stream.clone(),
            cancel: cancel.clone(),
        });

        let owner = Owner {
            api,
            stream,
            registry,
            series,
            selection,
            activity,
            in_flight: 0,
            completions: completion_tx,
        };
        tokio::spawn(owner.run(request_rx, completion_rx, events, cancel));

        Self { inner }
    }

    // ── Operations ───────────────────────────────────────────────

    /// Clear the registry and series, then repopulate from a fetch-all.
    ///
    /// Auto-selects the first device if nothing is selected, and opens the
    /// selected device's stream even if the fetch fails. Returns the
    /// number of devices loaded.
    pub async fn load_devices(&self) -> Result<usize, CoreError> {
        self.request(|reply| Request::LoadDevices { reply }).await?
    }

    /// Switch to `device_id`: discard the old series, stream the new
    /// device, and fetch its latest reading.
    ///
    /// Resolves once that reading has been applied or the fetch failed.
    /// The selection changes either way.
    pub async fn select_device(&self, device_id: &str) -> Result<DeviceStatus, CoreError> {
        let device_id = device_id.to_owned();
        self.request(|reply| Request::SelectDevice { device_id, reply })
            .await?
    }

    /// Fetch and apply the selected device's latest reading.
    ///
    /// `Ok(None)` when no device is selected.
    pub async fn refresh_latest(&self) -> Result<Option<DeviceStatus>, CoreError> {
        self.request(|reply| Request::RefreshLatest { reply })
            .await?
    }

    /// Apply a status as if it arrived from the stream.
    pub async fn apply_update(&self, status: DeviceStatus) -> Result<Upsert, CoreError> {
        self.request(|reply| Request::ApplyUpdate { status, reply })
            .await
    }

    /// Apply every stream event already delivered to the engine.
    ///
    /// Events are delivered before the stream reports the transition that
    /// follows them, so after observing e.g. `Disconnected(Closed)`,
    /// `settle` guarantees the registry reflects the whole stream. Returns
    /// the number of events drained.
    pub async fn settle(&self) -> Result<usize, CoreError> {
        self.request(|reply| Request::Settle { reply }).await
    }

    /// Stop the owner task and close the stream.
    pub fn shutdown(&self) {
        self.inner.cancel.cancel();
        self.inner.stream.disconnect();
    }

    // ── Observation ──────────────────────────────────────────────

    /// Subscribe to registry changes.
    pub fn devices(&self) -> Snapshots<Vec<Arc<DeviceEntry>>> {
        Snapshots::new(self.inner.registry.clone())
    }

    pub fn devices_snapshot(&self) -> Arc<Vec<Arc<DeviceEntry>>> {
        self.inner.registry.borrow().clone()
    }

    pub fn device(&self, device_id: &str) -> Option<Arc<DeviceEntry>> {
        self.devices_snapshot()
            .iter()
            .find(|e| e.device_id() == device_id)
            .cloned()
    }

    /// Subscribe to the selected device's time-series.
    pub fn series(&self) -> Snapshots<SeriesSnapshot> {
        Snapshots::new(self.inner.series.clone())
    }

    pub fn series_snapshot(&self) -> Arc<SeriesSnapshot> {
        self.inner.series.borrow().clone()
    }

    pub fn selected_device_id(&self) -> Option<String> {
        self.inner.selection.borrow().clone()
    }

    pub fn selected_device(&self) -> Option<Arc<DeviceEntry>> {
        let device_id = self.selected_device_id()?;
        self.device(&device_id)
    }

    pub fn activity(&self) -> Activity {
        self.inner.activity.borrow().clone()
    }

    /// Subscribe to activity flag changes.
    pub fn activity_changes(&self) -> watch::Receiver<Activity> {
        self.inner.activity.clone()
    }

    pub fn stream_state(&self) -> StreamState {
        self.inner.stream.current_state()
    }

    /// Subscribe to stream state transitions.
    pub fn stream_states(&self) -> watch::Receiver<StreamState> {
        self.inner.stream.state()
    }

    // ── Private helpers ──────────────────────────────────────────

    async fn request<T>(
        &self,
        make: impl FnOnce(oneshot::Sender<T>) -> Request,
    ) -> Result<T, CoreError> {
        let (tx, rx) = oneshot::channel();
        self.inner
            .requests
            .send(make(tx))
            .await
            .map_err(|_| CoreError::EngineStopped)?;
        rx.await.map_err(|_| CoreError::EngineStopped)
    }
}

// ── Owner task ───────────────────────────────────────────────────

struct Owner {
    api: ApiClient,
    stream: StreamClient,
    registry: DeviceRegistry,
    series: TimeSeriesBuffer,
    selection: watch::Sender<Option<String>>,
    activity: watch::Sender<Activity>,
    in_flight: usize,
    completions: mpsc::UnboundedSender<Completion>,
}

impl Owner {
    async fn run(
        mut self,
        mut requests: mpsc::Receiver<Request>,
        mut completions: mpsc::UnboundedReceiver<Completion>,
        mut events: mpsc::UnboundedReceiver<StreamEvent>,
        cancel: CancellationToken,
    ) {
        // A preselected device streams without waiting for a load.
        if let Some(device_id) = self.selected() {
            self.open_stream(&device_id);
        }

        loop {
            // Requests first: a selection change bumps the stream generation
            // before any queued event of the old connection is looked at.
            // Events before completions: a fetch result that completes after
            // queued pushes is applied last.
            tokio::select! {
                biased;
                () = cancel.cancelled() => break,
                request = requests.recv() => {
                    let Some(request) = request else { break };
                    if let Request::Settle { reply } = request {
                        let _ = reply.send(self.drain(&mut events));
                    } else {
                        self.handle(request);
                    }
                }
                Some(event) = events.recv() => self.apply_stream_event(event),
                Some(done) = completions.recv() => self.complete(done),
            }
        }

        self.stream.disconnect();
        info!("sync engine stopped");
    }

    fn handle(&mut self, request: Request) {
        match request {
            Request::LoadDevices { reply } => {
                debug!("loading devices");
                self.registry.clear();
                self.series.clear();
                self.begin_fetch();

                let api = self.api.clone();
                let tx = self.completions.clone();
                tokio::spawn(async move {
                    let result = api.list_devices().await;
                    let _ = tx.send(Completion::Devices { result, reply });
                });
            }
            Request::SelectDevice { device_id, reply } => {
                if let Err(e) = self.select(&device_id) {
                    let _ = reply.send(Err(e));
                    return;
                }
                self.fetch_latest(device_id, LatestReply::Select(reply));
            }
            Request::RefreshLatest { reply } => {
                let Some(device_id) = self.selected() else {
                    debug!("refresh requested with no device selected");
                    let _ = reply.send(Ok(None));
                    return;
                };
                self.fetch_latest(device_id, LatestReply::Refresh(reply));
            }
            Request::ApplyUpdate { status, reply } => {
                let _ = reply.send(self.apply_update(status));
            }
            // Needs the event receiver; answered in `run`.
            Request::Settle { .. } => {}
        }
    }

    fn drain(&mut self, events: &mut mpsc::UnboundedReceiver<StreamEvent>) -> usize {
        let mut drained = 0;
        while let Ok(event) = events.try_recv() {
            self.apply_stream_event(event);
            drained += 1;
        }
        trace!(drained, "settled pending stream events");
        drained
    }

    fn complete(&mut self, done: Completion) {
        match done {
            Completion::Devices { result, reply } => match result {
                Ok(devices) => {
                    let count = devices.len();
                    self.end_fetch(None);
                    self.populate(devices);
                    info!(count, "devices loaded");
                    let _ = reply.send(Ok(count));
                }
                Err(e) => {
                    let err = CoreError::from(e);
                    error!(error = %err, "device list fetch failed");
                    self.end_fetch(Some(err.to_string()));
                    // The selected device still gets its stream.
                    if let Some(device_id) = self.selected() {
                        self.open_stream(&device_id);
                    }
                    let _ = reply.send(Err(err));
                }
            },
            Completion::Latest {
                device_id,
                result,
                reply,
            } => match result {
                Ok(status) => {
                    self.end_fetch(None);
                    self.apply_update(status.clone());
                    reply.send(Ok(status));
                }
                Err(e) => {
                    let err = CoreError::for_device(e, &device_id);
                    error!(device_id, error = %err, "latest reading fetch failed");
                    self.end_fetch(Some(err.to_string()));
                    reply.send(Err(err));
                }
            },
        }
    }

    /// Fill the registry from a fetch-all and settle the selection.
    fn populate(&mut self, devices: Vec<DeviceStatus>) {
        self.registry.replace_all(devices);

        let device_id = match self.selected() {
            Some(device_id) => device_id,
            None => {
                let Some(first) = self.registry.first() else {
                    debug!("no devices reported, nothing to select");
                    return;
                };
                let device_id = first.device_id().to_owned();
                info!(device_id, "auto-selecting first device");
                self.selection.send_replace(Some(device_id.clone()));
                self.series.reset(Some(device_id.clone()));
                device_id
            }
        };

        if let Some(entry) = self.registry.get(&device_id) {
            self.series.record(&entry.status);
        }
        self.open_stream(&device_id);
    }

    /// Apply one status in arrival order. Last applied wins.
    fn apply_update(&mut self, status: DeviceStatus) -> Upsert {
        let outcome = self.registry.upsert(status.clone());
        match outcome {
            Upsert::Inserted => debug!(device_id = %status.device_id, "new device"),
            Upsert::Updated => trace!(device_id = %status.device_id, "device updated"),
            Upsert::Unchanged => {}
        }

        if outcome == Upsert::Inserted && self.selected().is_none() {
            info!(device_id = %status.device_id, "auto-selecting new device");
            if let Err(e) = self.select(&status.device_id) {
                warn!(device_id = %status.device_id, error = %e, "cannot select device");
            }
        }

        if self.selected().as_deref() == Some(status.device_id.as_str()) {
            self.series.record(&status);
        }
        outcome
    }

    fn apply_stream_event(&mut self, event: StreamEvent) {
        if event.generation != self.stream.generation() {
            trace!(
                generation = event.generation,
                device_id = %event.status.device_id,
                "dropping stale stream event"
            );
            return;
        }
        self.apply_update(event.status);
    }

    /// Make `device_id` the selected device and stream it.
    fn select(&mut self, device_id: &str) -> Result<(), CoreError> {
        self.stream.connect(device_id)?;
        info!(device_id, "device selected");
        self.selection.send_replace(Some(device_id.to_owned()));
        self.series.reset(Some(device_id.to_owned()));
        Ok(())
    }

    fn open_stream(&self, device_id: &str) {
        match self.stream.connect(device_id) {
            Ok(ConnectOutcome::Started { generation }) => {
                debug!(device_id, generation, "stream subscription opened");
            }
            Ok(ConnectOutcome::AlreadyConnected) => {}
            Err(e) => warn!(device_id, error = %e, "cannot open stream"),
        }
    }

    fn fetch_latest(&mut self, device_id: String, reply: LatestReply) {
        self.begin_fetch();
        let api = self.api.clone();
        let tx = self.completions.clone();
        tokio::spawn(async move {
            let result = api.latest(&device_id).await;
            let _ = tx.send(Completion::Latest {
                device_id,
                result,
                reply,
            });
        });
    }

    fn selected(&self) -> Option<String> {
        self.selection.borrow().clone()
    }

    fn begin_fetch(&mut self) {
        self.in_flight += 1;
        self.activity.send_modify(|a| {
            a.loading = true;
            a.last_error = None;
        });
    }

    fn end_fetch(&mut self, error: Option<String>) {
        self.in_flight = self.in_flight.saturating_sub(1);
        let loading = self.in_flight > 0;
        self.activity.send_modify(|a| {
            a.loading = loading;
            if error.is_some() {
                a.last_error = error;
            }
        });
    }
}
