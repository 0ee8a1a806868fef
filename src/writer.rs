//! Sync or async batching writer with bounded-queue back-pressure (spec
//! §4.6). Both modes share the same envelope-assignment write path; async
//! mode additionally runs a background coalescing worker.

use crate::channel::Channel;
use crate::error::StorageError;
use crate::item::{auto_anchor, envelope, wrap_non_map, Anchor, Item};
use crate::storage::Storage;
use parking_lot::Mutex as SyncMutex;
use serde_json::Value;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, Mutex as AsyncMutex};
use tokio::task::JoinHandle;

/// Writer tuning knobs.
#[derive(Clone, Debug)]
pub struct WriterConfig {
    pub async_mode: bool,
    pub queue_size: usize,
    pub flush_batch_size: usize,
    pub flush_interval: Duration,
    pub retry_interval: Duration,
}

impl Default for WriterConfig {
    fn default() -> Self {
        Self {
            async_mode: false,
            queue_size: 5000,
            flush_batch_size: 100,
            flush_interval: Duration::from_secs(1),
            retry_interval: Duration::from_millis(100),
        }
    }
}

impl WriterConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn async_mode(mut self, enabled: bool) -> Self {
        self.async_mode = enabled;
        self
    }

    pub fn queue_size(mut self, n: usize) -> Self {
        self.queue_size = n;
        self
    }

    pub fn flush_batch_size(mut self, n: usize) -> Self {
        self.flush_batch_size = n;
        self
    }

    pub fn flush_interval(mut self, d: Duration) -> Self {
        self.flush_interval = d;
        self
    }

    pub fn retry_interval(mut self, d: Duration) -> Self {
        self.retry_interval = d;
        self
    }
}

/// One unit of queued work for the async worker: pre-enveloped items plus
/// an ack channel so `write()` can, if desired, await physical persistence.
struct QueueEntry {
    envelopes: Vec<Item>,
    ack: tokio::sync::oneshot::Sender<()>,
}

/// Drop null items and assign each survivor an anchor, in flush order.
/// `position_in_flush` (used for auto anchors) counts only surviving items,
/// matching written_count's bookkeeping.
fn build_envelopes(items: Vec<Value>, anchors: &[Option<Anchor>], base: u64) -> Vec<Item> {
    items
        .into_iter()
        .enumerate()
        .filter(|(_, item)| !item.is_null())
        .enumerate()
        .map(|(position, (original_index, item))| {
            let anchor = anchors.get(original_index).and_then(|a| a.as_ref());
            assign_envelope(item, anchor, base, position)
        })
        .collect()
}

enum Inner {
    Sync {
        storage: Arc<dyn Storage>,
        lock: AsyncMutex<()>,
    },
    Async {
        storage: Arc<dyn Storage>,
        sender: mpsc::Sender<QueueEntry>,
        worker: SyncMutex<Option<JoinHandle<()>>>,
        closed: Arc<std::sync::atomic::AtomicBool>,
    },
}

/// Batching writer bound to one Storage+Channel pair.
pub struct Writer {
    inner: Inner,
    channel: Channel,
    written_count: Arc<AtomicU64>,
    config: WriterConfig,
}

fn assign_envelope(item: Value, anchor: Option<&Anchor>, base: u64, position: usize) -> Item {
    let anchor = anchor
        .cloned()
        .unwrap_or_else(|| auto_anchor(base + position as u64));
    match item {
        Value::Object(map) => envelope(map, &anchor),
        other => wrap_non_map(other, &anchor),
    }
}

impl Writer {
    /// `initial_count` seeds the anchor/offset base from the storage's
    /// current size, so a writer re-opened against non-empty storage (e.g.
    /// on resume) does not collide auto-assigned anchors with existing
    /// records.
    pub(crate) fn new(
        storage: Arc<dyn Storage>,
        channel: Channel,
        config: WriterConfig,
        initial_count: u64,
    ) -> Self {
        let written_count = Arc::new(AtomicU64::new(initial_count));

        let inner = if config.async_mode {
            let (sender, receiver) = mpsc::channel(config.queue_size);
            let closed = Arc::new(std::sync::atomic::AtomicBool::new(false));
            let worker = spawn_worker(
                storage.clone(),
                channel.clone(),
                written_count.clone(),
                receiver,
                config.clone(),
                closed.clone(),
            );
            Inner::Async {
                storage,
                sender,
                worker: SyncMutex::new(Some(worker)),
                closed,
            }
        } else {
            Inner::Sync {
                storage,
                lock: AsyncMutex::new(()),
            }
        };

        Self {
            inner,
            channel,
            written_count,
            config,
        }
    }

    /// Write a batch of items with optional per-position anchors.
    /// `anchors[i]` overrides the auto-assigned anchor for
    /// `items[i]`; pass an empty vec (or shorter than `items`) to let every
    /// item auto-assign. Null items are dropped before anchor assignment.
    /// Non-map items are wrapped as `{_i, data}`.
    pub async fn write(
        &self,
        items: Vec<Value>,
        anchors: Vec<Option<Anchor>>,
    ) -> Result<(), StorageError> {
        if items.is_empty() {
            return Ok(());
        }

        match &self.inner {
            Inner::Sync { storage, lock } => {
                let _guard = lock.lock().await;
                let base = self.written_count.load(Ordering::Acquire);
                let envelopes = build_envelopes(items, &anchors, base);
                let n = envelopes.len() as u64;
                if n == 0 {
                    return Ok(());
                }
                storage.append(&envelopes).await?;
                self.written_count.fetch_add(n, Ordering::AcqRel);
                self.channel.notify();
                Ok(())
            }
            Inner::Async {
                sender, closed, ..
            } => {
                if closed.load(Ordering::Acquire) {
                    return Err(StorageError::Io(std::io::Error::new(
                        std::io::ErrorKind::Other,
                        "writer is closed",
                    )));
                }
                // Anchors are assigned at enqueue time using a provisional
                // base of written_count, which is safe because flush order
                // equals enqueue order (both sides append-only, single
                // background worker).
                let surviving = items.iter().filter(|i| !i.is_null()).count() as u64;
                let base = self.written_count.fetch_add(surviving, Ordering::AcqRel);
                let envelopes = build_envelopes(items, &anchors, base);
                if envelopes.is_empty() {
                    return Ok(());
                }

                let (ack_tx, ack_rx) = tokio::sync::oneshot::channel();
                sender
                    .send(QueueEntry {
                        envelopes,
                        ack: ack_tx,
                    })
                    .await
                    .map_err(|_| {
                        StorageError::Io(std::io::Error::new(
                            std::io::ErrorKind::Other,
                            "writer queue closed",
                        ))
                    })?;
                let _ = ack_rx.await;
                Ok(())
            }
        }
    }

    pub fn written_count(&self) -> u64 {
        self.written_count.load(Ordering::Acquire)
    }

    /// Drain outstanding queued work, seal the output, and join the
    /// background worker (if any) within a bounded timeout.
    pub async fn close(&self) -> Result<(), StorageError> {
        let storage = match &self.inner {
            Inner::Sync { storage, .. } => storage.clone(),
            Inner::Async {
                storage,
                worker,
                closed,
                ..
            } => {
                // The worker polls this flag on its idle-timeout branch and
                // drains any remaining queued entries before exiting; the
                // sender itself stays alive in `self.inner` until the
                // Writer is dropped, so it can't be used to signal exit.
                closed.store(true, Ordering::Release);
                let handle = worker.lock().take();
                if let Some(handle) = handle {
                    if tokio::time::timeout(Duration::from_secs(30), handle)
                        .await
                        .is_err()
                    {
                        tracing::error!("writer worker did not shut down within 30s");
                    }
                }
                storage.clone()
            }
        };

        self.channel.set_eof();
        storage.mark_sealed().await?;
        Ok(())
    }
}

fn spawn_worker(
    storage: Arc<dyn Storage>,
    channel: Channel,
    written_count: Arc<AtomicU64>,
    mut receiver: mpsc::Receiver<QueueEntry>,
    config: WriterConfig,
    shutdown: Arc<std::sync::atomic::AtomicBool>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            let first = match tokio::time::timeout(config.retry_interval, receiver.recv()).await {
                Ok(Some(entry)) => entry,
                Ok(None) => return, // sender dropped, queue drained by recv() returning None
                Err(_) => {
                    if shutdown.load(Ordering::Acquire) {
                        // close() has signaled shutdown; drain whatever is
                        // already queued, then exit without waiting out a
                        // full idle poll per remaining entry.
                        match receiver.try_recv() {
                            Ok(entry) => entry,
                            Err(_) => return,
                        }
                    } else {
                        continue; // idle poll timeout; loop to re-check for shutdown
                    }
                }
            };

            let mut batch = vec![first];
            let mut item_count = batch[0].envelopes.len();
            let started = Instant::now();

            while item_count < config.flush_batch_size && started.elapsed() < config.flush_interval
            {
                let remaining = config.flush_interval.saturating_sub(started.elapsed());
                match tokio::time::timeout(remaining, receiver.recv()).await {
                    Ok(Some(entry)) => {
                        item_count += entry.envelopes.len();
                        batch.push(entry);
                    }
                    Ok(None) | Err(_) => break,
                }
            }

            let mut envelopes = Vec::with_capacity(item_count);
            let mut acks = Vec::with_capacity(batch.len());
            for entry in batch {
                envelopes.extend(entry.envelopes);
                acks.push(entry.ack);
            }

            match storage.append(&envelopes).await {
                Ok(()) => {
                    written_count.fetch_add(0, Ordering::AcqRel); // already counted at enqueue
                    channel.notify();
                }
                Err(e) => {
                    tracing::error!(error = %e, "writer worker failed to flush batch; continuing");
                }
            }
            for ack in acks {
                let _ = ack.send(());
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryStorage;

    #[tokio::test]
    async fn sync_write_assigns_auto_anchors_and_notifies() {
        let storage: Arc<dyn Storage> = Arc::new(MemoryStorage::new());
        let channel = Channel::new();
        let writer = Writer::new(storage.clone(), channel, WriterConfig::default(), 0);

        writer
            .write(
                vec![Value::String("a".into()), Value::String("b".into())],
                vec![],
            )
            .await
            .unwrap();

        let items = storage.read(0, 10).await.unwrap();
        assert_eq!(items[0]["_i"], "auto_0");
        assert_eq!(items[1]["_i"], "auto_1");
        assert_eq!(items[0]["data"], "a");
    }

    #[tokio::test]
    async fn supplied_anchors_are_preserved() {
        let storage: Arc<dyn Storage> = Arc::new(MemoryStorage::new());
        let channel = Channel::new();
        let writer = Writer::new(storage.clone(), channel, WriterConfig::default(), 0);

        let mut obj = serde_json::Map::new();
        obj.insert("text".into(), Value::String("hi".into()));
        writer
            .write(
                vec![Value::Object(obj)],
                vec![Some("parent_7".to_string())],
            )
            .await
            .unwrap();

        let items = storage.read(0, 10).await.unwrap();
        assert_eq!(items[0]["_i"], "parent_7");
    }

    #[tokio::test]
    async fn null_items_are_dropped_before_anchor_assignment() {
        let storage: Arc<dyn Storage> = Arc::new(MemoryStorage::new());
        let channel = Channel::new();
        let writer = Writer::new(storage.clone(), channel.clone(), WriterConfig::default(), 0);
        writer
            .write(vec![Value::Null, Value::String("a".into())], vec![])
            .await
            .unwrap();
        let items = storage.read(0, 10).await.unwrap();
        assert_eq!(items.len(), 1);
        assert_eq!(items[0]["_i"], "auto_0");
        writer.close().await.unwrap();
        assert!(storage.is_sealed().await.unwrap());
        assert!(channel.is_eof());
    }

    #[tokio::test]
    async fn async_mode_coalesces_and_flushes_on_batch_size() {
        let storage: Arc<dyn Storage> = Arc::new(MemoryStorage::new());
        let channel = Channel::new();
        let config = WriterConfig::default()
            .async_mode(true)
            .flush_batch_size(3)
            .flush_interval(Duration::from_secs(5));
        let writer = Writer::new(storage.clone(), channel, config, 0);

        for i in 0..3 {
            writer
                .write(vec![Value::Number(i.into())], vec![])
                .await
                .unwrap();
        }

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(storage.size().await.unwrap(), 3);
        writer.close().await.unwrap();
    }

    #[tokio::test]
    async fn async_mode_backpressure_blocks_producer_until_drained() {
        let storage: Arc<dyn Storage> = Arc::new(MemoryStorage::new());
        let channel = Channel::new();
        let config = WriterConfig::default()
            .async_mode(true)
            .queue_size(2)
            .flush_batch_size(10)
            .flush_interval(Duration::from_millis(50));
        let writer = Arc::new(Writer::new(storage.clone(), channel, config, 0));

        let mut handles = Vec::new();
        for i in 0..20 {
            let w = writer.clone();
            handles.push(tokio::spawn(async move {
                w.write(vec![Value::Number(i.into())], vec![]).await.unwrap();
            }));
        }
        for h in handles {
            h.await.unwrap();
        }
        writer.close().await.unwrap();
        assert_eq!(storage.size().await.unwrap(), 20);
    }
}
