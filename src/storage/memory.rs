//! In-memory storage backend. No seal marker file is needed — the
//! in-process [`crate::channel::Channel`] EOF flag is sufficient since a
//! memory stream never outlives the process that created it.

use super::Storage;
use crate::error::StorageError;
use crate::item::Item;
use async_trait::async_trait;
use parking_lot::RwLock;

#[derive(Default)]
pub struct MemoryStorage {
    items: RwLock<Vec<Item>>,
    sealed: RwLock<bool>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Storage for MemoryStorage {
    async fn append(&self, items: &[Item]) -> Result<(), StorageError> {
        self.items.write().extend_from_slice(items);
        Ok(())
    }

    async fn read(&self, offset: u64, limit: usize) -> Result<Vec<Item>, StorageError> {
        let items = self.items.read();
        let start = (offset as usize).min(items.len());
        let end = start.saturating_add(limit).min(items.len());
        Ok(items[start..end].to_vec())
    }

    async fn size(&self) -> Result<u64, StorageError> {
        Ok(self.items.read().len() as u64)
    }

    async fn clear(&self) -> Result<(), StorageError> {
        self.items.write().clear();
        *self.sealed.write() = false;
        Ok(())
    }

    async fn mark_sealed(&self) -> Result<(), StorageError> {
        *self.sealed.write() = true;
        Ok(())
    }

    async fn is_sealed(&self) -> Result<bool, StorageError> {
        Ok(*self.sealed.read())
    }

    async fn unseal(&self) -> Result<(), StorageError> {
        *self.sealed.write() = false;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::item::Item;

    fn item(n: i64) -> Item {
        let mut m = Item::new();
        m.insert("n".into(), n.into());
        m
    }

    #[tokio::test]
    async fn read_returns_dense_window() {
        let s = MemoryStorage::new();
        s.append(&[item(0), item(1), item(2)]).await.unwrap();
        let got = s.read(1, 10).await.unwrap();
        assert_eq!(got.len(), 2);
        assert_eq!(got[0]["n"], 1);
    }

    #[tokio::test]
    async fn size_is_monotone_until_clear() {
        let s = MemoryStorage::new();
        assert_eq!(s.size().await.unwrap(), 0);
        s.append(&[item(0)]).await.unwrap();
        assert_eq!(s.size().await.unwrap(), 1);
        s.clear().await.unwrap();
        assert_eq!(s.size().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn seal_round_trip() {
        let s = MemoryStorage::new();
        s.mark_sealed().await.unwrap();
        assert!(s.is_sealed().await.unwrap());
        s.unseal().await.unwrap();
        assert!(!s.is_sealed().await.unwrap());
        s.mark_sealed().await.unwrap();
        s.mark_sealed().await.unwrap();
        assert!(s.is_sealed().await.unwrap());
    }
}
