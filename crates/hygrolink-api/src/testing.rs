//! Scriptable [`StreamTransport`] for driving a [`StreamClient`] without a
//! server.
//!
//! Each call to [`ChannelTransport::script`] queues one connection. The
//! next `open` consumes the oldest queued script; with nothing queued the
//! connection hangs forever, like a server that never answers.
//!
//! [`StreamClient`]: crate::StreamClient

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, PoisonError};

use bytes::Bytes;
use futures_util::StreamExt;
use futures_util::stream::{self, BoxStream};
use tokio::sync::{mpsc, watch};
use tokio_stream::wrappers::UnboundedReceiverStream;
use url::Url;

use crate::error::Error;
use crate::models::DeviceStatus;
use crate::stream::{StreamTransport, TransportEvent};

pub struct ChannelTransport {
    scripts: Mutex<VecDeque<mpsc::UnboundedReceiver<TransportEvent>>>,
    opened: watch::Sender<Vec<Url>>,
}

/// Sending half of one scripted connection.
///
/// Dropping it ends the connection's body cleanly.
pub struct ScriptedConnection {
    tx: mpsc::UnboundedSender<TransportEvent>,
}

impl ChannelTransport {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            scripts: Mutex::new(VecDeque::new()),
            opened: watch::channel(Vec::new()).0,
        })
    }

    /// Queue a connection for the next `open`.
    pub fn script(&self) -> ScriptedConnection {
        let (tx, rx) = mpsc::unbounded_channel();
        self.scripts
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push_back(rx);
        ScriptedConnection { tx }
    }

    /// Every URL opened so far, oldest first.
    pub fn opened(&self) -> Vec<Url> {
        self.opened.borrow().clone()
    }

    /// Wait until at least `count` connections were opened.
    pub async fn wait_for_opens(&self, count: usize) -> Vec<Url> {
        let mut rx = self.opened.subscribe();
        rx.wait_for(|urls| urls.len() >= count)
            .await
            .map(|urls| urls.clone())
            .unwrap_or_default()
    }

    /// `data:` frame carrying `status` as JSON.
    pub fn frame_text(status: &DeviceStatus) -> String {
        let json = serde_json::to_string(status).unwrap_or_default();
        format!("data: {json}\n\n")
    }
}

impl StreamTransport for ChannelTransport {
    fn open(&self, url: Url) -> BoxStream<'static, TransportEvent> {
        self.opened.send_modify(|urls| urls.push(url));
        let script = self
            .scripts
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pop_front();

        match script {
            Some(rx) => UnboundedReceiverStream::new(rx).boxed(),
            None => stream::pending().boxed(),
        }
    }
}

impl ScriptedConnection {
    /// Answer with a response head.
    pub fn respond(&self, status: u16) {
        self.push(TransportEvent::Response { status });
    }

    /// Send `status` as one complete frame.
    pub fn send_status(&self, status: &DeviceStatus) {
        self.send_raw(ChannelTransport::frame_text(status));
    }

    /// Send an arbitrary body chunk.
    pub fn send_raw(&self, chunk: impl Into<Bytes>) {
        self.push(TransportEvent::Chunk(chunk.into()));
    }

    /// Drop the connection with a transport error.
    pub fn fail(&self, message: &str) {
        self.push(TransportEvent::Failed(Error::StreamInterrupted(
            message.to_owned(),
        )));
    }

    /// End the body cleanly.
    pub fn finish(&self) {
        self.push(TransportEvent::Finished);
    }

    /// `true` once the client dropped this connection.
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }

    /// Wait until the client drops this connection.
    pub async fn closed(&self) {
        self.tx.closed().await;
    }

    fn push(&self, event: TransportEvent) {
        // The client may already have dropped the connection.
        let _ = self.tx.send(event);
    }
}
