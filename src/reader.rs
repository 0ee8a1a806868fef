//! Batch-bounded reader: wraps a [`StreamBridge`], extracting each record's
//! anchor and tracking completed-item progress.

use crate::bridge::StreamBridge;
use crate::error::StorageError;
use crate::item::{unwrap_envelope, Anchor, Item};
use crate::storage::Storage;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

pub struct Reader {
    bridge: StreamBridge,
    storage: Arc<dyn Storage>,
    completed_count: AtomicU64,
}

impl Reader {
    pub(crate) fn new(storage: Arc<dyn Storage>, channel: crate::channel::Channel, start: u64) -> Self {
        Self {
            bridge: StreamBridge::new(storage.clone(), channel, start),
            storage,
            completed_count: AtomicU64::new(start),
        }
    }

    /// Pull the next batch, returning `(items, anchors)`, or `None` once the
    /// upstream stream is sealed and fully drained.
    pub async fn read(
        &mut self,
        batch_size: usize,
        timeout: Duration,
    ) -> Result<Option<(Vec<Item>, Vec<Anchor>)>, StorageError> {
        let fallback_base = self.completed_count.load(Ordering::Acquire);
        let Some(raw) = self.bridge.next_batch(batch_size, timeout).await? else {
            return Ok(None);
        };

        let mut items = Vec::with_capacity(raw.len());
        let mut anchors = Vec::with_capacity(raw.len());
        for (i, record) in raw.into_iter().enumerate() {
            let (anchor, payload) = unwrap_envelope(record, fallback_base + i as u64);
            anchors.push(anchor);
            items.push(payload);
        }
        self.completed_count
            .fetch_add(items.len() as u64, Ordering::AcqRel);
        Ok(Some((items, anchors)))
    }

    /// Items handed out so far (monotonically increasing).
    pub fn completed_count(&self) -> u64 {
        self.completed_count.load(Ordering::Acquire)
    }

    /// Snapshot of upstream storage size, refreshed on demand.
    pub async fn total_count(&self) -> Result<u64, StorageError> {
        self.storage.size().await
    }

    pub fn get_current_progress(&self) -> u64 {
        self.completed_count()
    }
}
