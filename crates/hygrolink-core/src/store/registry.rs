// ── Device registry ──
//
// Insertion-ordered map from device id to its latest applied status.
// Every effective mutation rebuilds the snapshot that subscribers receive.

use std::sync::Arc;

use hygrolink_api::DeviceStatus;
use indexmap::IndexMap;
use tokio::sync::watch;

use crate::model::DeviceEntry;

/// Outcome of [`DeviceRegistry::upsert`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Upsert {
    /// The device was new.
    Inserted,
    /// An existing entry was overwritten with different data.
    Updated,
    /// The status was identical to the stored one. Nothing was published.
    Unchanged,
}

/// At most one entry per device id, in first-seen order.
pub struct DeviceRegistry {
    entries: IndexMap<String, Arc<DeviceEntry>>,
    snapshot: watch::Sender<Arc<Vec<Arc<DeviceEntry>>>>,
}

impl DeviceRegistry {
    pub fn new() -> Self {
        let (snapshot, _) = watch::channel(Arc::new(Vec::new()));
        Self {
            entries: IndexMap::new(),
            snapshot,
        }
    }

    /// Replace every entry with `devices`, assigning fresh keys.
    ///
    /// Duplicate ids in `devices` collapse to the last occurrence, keeping
    /// the position of the first.
    pub fn replace_all(&mut self, devices: Vec<DeviceStatus>) {
        self.entries.clear();
        for status in devices {
            let id = status.device_id.clone();
            self.entries.insert(id, Arc::new(DeviceEntry::new(status)));
        }
        self.publish();
    }

    /// Insert a new device or overwrite an existing one in place.
    ///
    /// The display key survives updates. An identical payload is a no-op.
    pub fn upsert(&mut self, status: DeviceStatus) -> Upsert {
        let outcome = match self.entries.get_mut(&status.device_id) {
            Some(existing) if existing.status == status => return Upsert::Unchanged,
            Some(existing) => {
                *existing = Arc::new(DeviceEntry {
                    key: existing.key,
                    status,
                });
                Upsert::Updated
            }
            None => {
                let id = status.device_id.clone();
                self.entries.insert(id, Arc::new(DeviceEntry::new(status)));
                Upsert::Inserted
            }
        };
        self.publish();
        outcome
    }

    pub fn get(&self, device_id: &str) -> Option<Arc<DeviceEntry>> {
        self.entries.get(device_id).cloned()
    }

    /// First device in received order.
    pub fn first(&self) -> Option<Arc<DeviceEntry>> {
        self.entries.first().map(|(_, entry)| Arc::clone(entry))
    }

    pub fn clear(&mut self) {
        if self.entries.is_empty() {
            return;
        }
        self.entries.clear();
        self.publish();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Current snapshot (cheap `Arc` clone).
    pub fn snapshot(&self) -> Arc<Vec<Arc<DeviceEntry>>> {
        self.snapshot.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<Arc<Vec<Arc<DeviceEntry>>>> {
        self.snapshot.subscribe()
    }

    fn publish(&self) {
        let values: Vec<Arc<DeviceEntry>> = self.entries.values().cloned().collect();
        // `send_modify` updates unconditionally, even with zero receivers.
        self.snapshot.send_modify(|snap| *snap = Arc::new(values));
    }
}

impl Default for DeviceRegistry {
    fn default() -> Self {
        Self::new()
    }
}
