//! Line-delimited JSON file storage: one serialized record per line, UTF-8,
//! no trailing comma. Offset = line number; size = number of
//! newline-terminated lines.

use super::Storage;
use crate::error::StorageError;
use crate::item::Item;
use async_trait::async_trait;
use serde_json::Value;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::fs;
use tokio::sync::Mutex as AsyncMutex;

fn seal_path_for(path: &Path) -> PathBuf {
    let mut os = path.as_os_str().to_owned();
    os.push(".done");
    PathBuf::from(os)
}

pub struct JsonlStorage {
    path: PathBuf,
    seal_path: PathBuf,
    count: AtomicU64,
    append_lock: AsyncMutex<()>,
}

impl JsonlStorage {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let seal_path = seal_path_for(&path);
        Self {
            path,
            seal_path,
            count: AtomicU64::new(0),
            append_lock: AsyncMutex::new(()),
        }
    }

    /// Construct and prime the line-count cache from whatever is already on
    /// disk (used when resuming a node that followed this stream before).
    pub async fn open(path: impl Into<PathBuf>) -> Result<Self, StorageError> {
        let storage = Self::new(path);
        let n = count_lines(&storage.path).await?;
        storage.count.store(n, Ordering::Release);
        Ok(storage)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

async fn count_lines(path: &Path) -> Result<u64, StorageError> {
    match fs::read_to_string(path).await {
        Ok(contents) => Ok(contents.lines().count() as u64),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(0),
        Err(e) => Err(e.into()),
    }
}

#[async_trait]
impl Storage for JsonlStorage {
    async fn append(&self, items: &[Item]) -> Result<(), StorageError> {
        let _guard = self.append_lock.lock().await;

        let mut buf = String::new();
        let mut written = 0u64;
        for item in items {
            if item.is_empty() {
                continue;
            }
            let line = serde_json::to_string(&Value::Object(item.clone()))?;
            buf.push_str(&line);
            buf.push('\n');
            written += 1;
        }
        if written == 0 {
            return Ok(());
        }

        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).await?;
        }

        use tokio::io::AsyncWriteExt;
        let mut file = fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await?;
        file.write_all(buf.as_bytes()).await?;
        file.flush().await?;

        self.count.fetch_add(written, Ordering::AcqRel);
        Ok(())
    }

    async fn read(&self, offset: u64, limit: usize) -> Result<Vec<Item>, StorageError> {
        let contents = match fs::read_to_string(&self.path).await {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut out = Vec::with_capacity(limit);
        for (i, line) in contents.lines().enumerate().skip(offset as usize) {
            if out.len() >= limit {
                break;
            }
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<Value>(line) {
                Ok(Value::Object(map)) => out.push(map),
                Ok(_) | Err(_) => {
                    tracing::warn!(line_number = i, "skipping malformed jsonl record");
                }
            }
        }
        Ok(out)
    }

    async fn size(&self) -> Result<u64, StorageError> {
        Ok(self.count.load(Ordering::Acquire))
    }

    async fn clear(&self) -> Result<(), StorageError> {
        let _guard = self.append_lock.lock().await;
        match fs::remove_file(&self.path).await {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }
        match fs::remove_file(&self.seal_path).await {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }
        self.count.store(0, Ordering::Release);
        Ok(())
    }

    async fn mark_sealed(&self) -> Result<(), StorageError> {
        if let Some(parent) = self.seal_path.parent() {
            fs::create_dir_all(parent).await?;
        }
        fs::write(&self.seal_path, b"").await?;
        Ok(())
    }

    async fn is_sealed(&self) -> Result<bool, StorageError> {
        Ok(fs::try_exists(&self.seal_path).await?)
    }

    async fn unseal(&self) -> Result<(), StorageError> {
        match fs::remove_file(&self.seal_path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn item(n: i64) -> Item {
        let mut m = Item::new();
        m.insert("n".into(), n.into());
        m
    }

    #[tokio::test]
    async fn append_and_read_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("stream.jsonl");
        let storage = JsonlStorage::new(&path);

        storage.append(&[item(0), item(1)]).await.unwrap();
        storage.append(&[item(2)]).await.unwrap();

        assert_eq!(storage.size().await.unwrap(), 3);
        let got = storage.read(1, 10).await.unwrap();
        assert_eq!(got.len(), 2);
        assert_eq!(got[0]["n"], 1);
        assert_eq!(got[1]["n"], 2);
    }

    #[tokio::test]
    async fn empty_maps_and_nulls_are_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("stream.jsonl");
        let storage = JsonlStorage::new(&path);

        storage.append(&[Item::new(), item(5)]).await.unwrap();
        assert_eq!(storage.size().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn malformed_lines_are_skipped_not_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("stream.jsonl");
        tokio::fs::write(&path, "{\"n\":1}\nnot json\n{\"n\":2}\n")
            .await
            .unwrap();

        let storage = JsonlStorage::open(&path).await.unwrap();
        let got = storage.read(0, 10).await.unwrap();
        assert_eq!(got.len(), 2);
    }

    #[tokio::test]
    async fn seal_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("stream.jsonl");
        let storage = JsonlStorage::new(&path);

        storage.mark_sealed().await.unwrap();
        assert!(storage.is_sealed().await.unwrap());
        storage.unseal().await.unwrap();
        assert!(!storage.is_sealed().await.unwrap());
    }

    #[tokio::test]
    async fn clear_removes_data_and_seal() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("stream.jsonl");
        let storage = JsonlStorage::new(&path);
        storage.append(&[item(0)]).await.unwrap();
        storage.mark_sealed().await.unwrap();

        storage.clear().await.unwrap();
        assert_eq!(storage.size().await.unwrap(), 0);
        assert!(!storage.is_sealed().await.unwrap());
        assert!(!path.exists());
    }
}
