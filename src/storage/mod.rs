//! Append-only, offset-addressed record storage.
//!
//! `read(o, n)` always returns records `[o, min(o + n, size))`; offsets are
//! dense and never reused after `clear()`. A storage's seal marker is a
//! durable, out-of-band flag recording "no more appends will occur" — it is
//! distinct from the in-process [`crate::channel::Channel`] EOF flag so that
//! a freshly-opened reader in a new process can observe completion left
//! behind by a previous one.

#[cfg(feature = "csv")]
mod csv_backed;
mod jsonl;
mod memory;

#[cfg(feature = "csv")]
pub use csv_backed::CsvStorage;
pub use jsonl::JsonlStorage;
pub use memory::MemoryStorage;

use crate::error::StorageError;
use crate::item::Item;
use async_trait::async_trait;

/// Physical backing for a stream's records.
#[async_trait]
pub trait Storage: Send + Sync {
    /// Append records to the end of the log.
    async fn append(&self, items: &[Item]) -> Result<(), StorageError>;

    /// Read up to `limit` records starting at `offset`.
    async fn read(&self, offset: u64, limit: usize) -> Result<Vec<Item>, StorageError>;

    /// Number of records currently stored.
    async fn size(&self) -> Result<u64, StorageError>;

    /// Remove all data and any seal marker.
    async fn clear(&self) -> Result<(), StorageError>;

    /// Durably record that no more appends will occur.
    async fn mark_sealed(&self) -> Result<(), StorageError>;

    /// Whether a seal marker is present.
    async fn is_sealed(&self) -> Result<bool, StorageError>;

    /// Remove the seal marker, allowing further appends.
    async fn unseal(&self) -> Result<(), StorageError>;
}

#[async_trait]
impl<S: Storage + ?Sized> Storage for std::sync::Arc<S> {
    async fn append(&self, items: &[Item]) -> Result<(), StorageError> {
        (**self).append(items).await
    }

    async fn read(&self, offset: u64, limit: usize) -> Result<Vec<Item>, StorageError> {
        (**self).read(offset, limit).await
    }

    async fn size(&self) -> Result<u64, StorageError> {
        (**self).size().await
    }

    async fn clear(&self) -> Result<(), StorageError> {
        (**self).clear().await
    }

    async fn mark_sealed(&self) -> Result<(), StorageError> {
        (**self).mark_sealed().await
    }

    async fn is_sealed(&self) -> Result<bool, StorageError> {
        (**self).is_sealed().await
    }

    async fn unseal(&self) -> Result<(), StorageError> {
        (**self).unseal().await
    }
}
