//! RFC-4180-style delimited-value file storage. The header row equals the
//! keys of the first appended record (in `BTreeMap` order, since
//! [`crate::item::Item`] does not otherwise track insertion order);
//! subsequent appends are assumed to share that schema.

use super::Storage;
use crate::error::StorageError;
use crate::item::Item;
use async_trait::async_trait;
use serde_json::Value;
use std::path::{Path, PathBuf};
use tokio::sync::Mutex as AsyncMutex;

fn seal_path_for(path: &Path) -> PathBuf {
    let mut os = path.as_os_str().to_owned();
    os.push(".done");
    PathBuf::from(os)
}

fn value_to_cell(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

pub struct CsvStorage {
    path: PathBuf,
    seal_path: PathBuf,
    append_lock: AsyncMutex<()>,
}

impl CsvStorage {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let seal_path = seal_path_for(&path);
        Self {
            path,
            seal_path,
            append_lock: AsyncMutex::new(()),
        }
    }

    fn read_header_blocking(path: &Path) -> Result<Option<Vec<String>>, StorageError> {
        if !path.exists() {
            return Ok(None);
        }
        let mut reader = csv::ReaderBuilder::new()
            .has_headers(true)
            .from_path(path)
            .map_err(|e| StorageError::Csv(e.to_string()))?;
        let headers = reader
            .headers()
            .map_err(|e| StorageError::Csv(e.to_string()))?;
        Ok(Some(headers.iter().map(str::to_string).collect()))
    }
}

#[async_trait]
impl Storage for CsvStorage {
    async fn append(&self, items: &[Item]) -> Result<(), StorageError> {
        let non_empty: Vec<&Item> = items.iter().filter(|i| !i.is_empty()).collect();
        if non_empty.is_empty() {
            return Ok(());
        }

        let _guard = self.append_lock.lock().await;
        let path = self.path.clone();

        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let existing_header = Self::read_header_blocking(&path)?;
        let header: Vec<String> = existing_header
            .clone()
            .unwrap_or_else(|| non_empty[0].keys().cloned().collect());

        for item in &non_empty {
            let keys: Vec<&String> = item.keys().collect();
            if keys.len() != header.len() || keys.into_iter().ne(header.iter()) {
                return Err(StorageError::SchemaMismatch);
            }
        }

        let needs_header = existing_header.is_none();
        let file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)?;
        let mut writer = csv::WriterBuilder::new()
            .has_headers(false)
            .from_writer(file);

        if needs_header {
            writer
                .write_record(&header)
                .map_err(|e| StorageError::Csv(e.to_string()))?;
        }
        for item in &non_empty {
            let row: Vec<String> = header
                .iter()
                .map(|k| item.get(k).map(value_to_cell).unwrap_or_default())
                .collect();
            writer
                .write_record(&row)
                .map_err(|e| StorageError::Csv(e.to_string()))?;
        }
        writer
            .flush()
            .map_err(|e| StorageError::Csv(e.to_string()))?;

        Ok(())
    }

    async fn read(&self, offset: u64, limit: usize) -> Result<Vec<Item>, StorageError> {
        let path = self.path.clone();
        if !path.exists() {
            return Ok(Vec::new());
        }

        let mut reader = csv::ReaderBuilder::new()
            .has_headers(true)
            .from_path(&path)
            .map_err(|e| StorageError::Csv(e.to_string()))?;
        let headers: Vec<String> = reader
            .headers()
            .map_err(|e| StorageError::Csv(e.to_string()))?
            .iter()
            .map(str::to_string)
            .collect();

        let mut out = Vec::with_capacity(limit);
        for (i, record) in reader.records().enumerate() {
            if i < offset as usize {
                continue;
            }
            if out.len() >= limit {
                break;
            }
            let record = match record {
                Ok(r) => r,
                Err(e) => {
                    tracing::warn!(row = i, error = %e, "skipping malformed csv record");
                    continue;
                }
            };
            let mut item = Item::new();
            for (key, value) in headers.iter().zip(record.iter()) {
                item.insert(key.clone(), Value::String(value.to_string()));
            }
            out.push(item);
        }
        Ok(out)
    }

    async fn size(&self) -> Result<u64, StorageError> {
        let path = self.path.clone();
        if !path.exists() {
            return Ok(0);
        }
        let mut reader = csv::ReaderBuilder::new()
            .has_headers(true)
            .from_path(&path)
            .map_err(|e| StorageError::Csv(e.to_string()))?;
        Ok(reader.records().count() as u64)
    }

    async fn clear(&self) -> Result<(), StorageError> {
        let _guard = self.append_lock.lock().await;
        match tokio::fs::remove_file(&self.path).await {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }
        match tokio::fs::remove_file(&self.seal_path).await {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }
        Ok(())
    }

    async fn mark_sealed(&self) -> Result<(), StorageError> {
        if let Some(parent) = self.seal_path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&self.seal_path, b"").await?;
        Ok(())
    }

    async fn is_sealed(&self) -> Result<bool, StorageError> {
        Ok(tokio::fs::try_exists(&self.seal_path).await?)
    }

    async fn unseal(&self) -> Result<(), StorageError> {
        match tokio::fs::remove_file(&self.seal_path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}
