//! Tail-follow reader loop over a (Storage, Channel) pair: the core
//! "edge-triggered notify/wait + EOF sealing" mechanism that lets a
//! downstream reader consume records as a concurrent writer produces them.

use crate::channel::Channel;
use crate::error::StorageError;
use crate::item::Item;
use crate::storage::Storage;
use std::sync::Arc;
use std::time::Duration;

/// Guards against terminating on a leftover seal from a previous run before
/// the upstream node's `open()` has had a chance to unseal.
const ZERO_PROGRESS_RETRY_LIMIT: u32 = 5;
const ZERO_PROGRESS_RETRY_SLEEP: Duration = Duration::from_millis(100);
const EOF_GRACE_SLEEP: Duration = Duration::from_millis(50);
const IDLE_SLEEP: Duration = Duration::from_millis(100);

/// Drives the tail-follow loop against storage that may still be receiving
/// writes. Call [`next_batch`] repeatedly; it returns `None` once the
/// stream is sealed and fully drained.
pub struct StreamBridge {
    storage: Arc<dyn Storage>,
    channel: Channel,
    offset: u64,
    zero_retries: u32,
}

impl StreamBridge {
    pub fn new(storage: Arc<dyn Storage>, channel: Channel, start: u64) -> Self {
        Self {
            storage,
            channel,
            offset: start,
            zero_retries: 0,
        }
    }

    pub fn offset(&self) -> u64 {
        self.offset
    }

    /// Pull the next non-empty batch, or `None` once the stream is done.
    pub async fn next_batch(
        &mut self,
        batch_size: usize,
        timeout: Duration,
    ) -> Result<Option<Vec<Item>>, StorageError> {
        loop {
            let batch = self.storage.read(self.offset, batch_size).await?;
            if !batch.is_empty() {
                let greedy_full = batch.len() >= batch_size;
                self.offset += batch.len() as u64;
                self.zero_retries = 0;
                if greedy_full {
                    // Likely more immediately available; skip the wait.
                    return Ok(Some(batch));
                }
                return Ok(Some(batch));
            }

            let done = self.channel.is_eof() || self.storage.is_sealed().await?;
            if done {
                if self.offset == 0 && self.zero_retries < ZERO_PROGRESS_RETRY_LIMIT {
                    tokio::time::sleep(ZERO_PROGRESS_RETRY_SLEEP).await;
                    self.zero_retries += 1;
                    continue;
                }
                tokio::time::sleep(EOF_GRACE_SLEEP).await;
                let drained = self.storage.read(self.offset, batch_size).await?;
                if drained.is_empty() {
                    return Ok(None);
                }
                self.offset += drained.len() as u64;
                return Ok(Some(drained));
            }

            if !self.channel.wait(timeout).await {
                let annealed = self.storage.read(self.offset, batch_size).await?;
                if !annealed.is_empty() {
                    self.offset += annealed.len() as u64;
                    return Ok(Some(annealed));
                }
                tokio::time::sleep(IDLE_SLEEP).await;
            }
        }
    }
}
