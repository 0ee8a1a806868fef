//! Named stream endpoints: URI resolution plus the Storage+Channel pair a
//! Reader and Writer attach to on either side.

use crate::channel::Channel;
use crate::error::StreamError;
use crate::reader::Reader;
#[cfg(feature = "csv")]
use crate::storage::CsvStorage;
use crate::storage::{JsonlStorage, MemoryStorage, Storage};
use crate::types::Progress;
use crate::writer::{Writer, WriterConfig};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// A stream protocol. `File` is kept distinct from `Jsonl` only to preserve
/// the URI the caller wrote; it behaves identically.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Protocol {
    Jsonl,
    Csv,
    Memory,
    File,
}

impl Protocol {
    fn parse(s: &str) -> Result<Self, StreamError> {
        match s {
            "jsonl" => Ok(Protocol::Jsonl),
            "csv" => Ok(Protocol::Csv),
            "memory" => Ok(Protocol::Memory),
            "file" => Ok(Protocol::File),
            other => Err(StreamError::UnknownProtocol(other.to_string())),
        }
    }

    fn canonical_extension(self) -> Option<&'static str> {
        match self {
            Protocol::Jsonl | Protocol::File => Some("jsonl"),
            Protocol::Csv => Some("csv"),
            Protocol::Memory => None,
        }
    }
}

/// A resolved `(protocol, path)` pair, produced by [`resolve_uri`].
#[derive(Clone, Debug)]
pub struct ResolvedUri {
    pub protocol: Protocol,
    pub path: PathBuf,
}

/// Resolve a stream URI: split protocol, apply the prefix segment, then
/// auto-append the canonical extension if missing.
///
/// `default_protocol` is used when `uri` carries no `scheme://`.
pub fn resolve_uri(
    uri: &str,
    default_protocol: &str,
    prefix: Option<&str>,
) -> Result<ResolvedUri, StreamError> {
    let (protocol_str, raw_path) = match uri.split_once("://") {
        Some((p, rest)) => (p, rest),
        None => (default_protocol, uri),
    };
    let protocol = Protocol::parse(protocol_str)?;

    let mut path = PathBuf::new();
    if let Some(prefix) = prefix.filter(|p| !p.is_empty()) {
        path.push(prefix);
    }
    if raw_path.is_empty() {
        return Err(StreamError::InvalidUri(uri.to_string()));
    }
    path.push(raw_path);

    if let Some(ext) = protocol.canonical_extension() {
        let has_known_ext = path
            .extension()
            .map(|e| e == ext || e == "done")
            .unwrap_or(false);
        if !has_known_ext {
            let mut os = path.into_os_string();
            os.push(".");
            os.push(ext);
            path = PathBuf::from(os);
        }
    }

    Ok(ResolvedUri { protocol, path })
}

/// A named endpoint exposing Reader/Writer factories over one Storage and
/// one Channel.
pub struct Stream {
    uri: String,
    resolved: ResolvedUri,
    storage: Arc<dyn Storage>,
    channel: Channel,
    opened: AtomicBool,
}

impl Stream {
    /// Resolve `uri` and construct the matching concrete storage backend.
    /// `memory` streams are rejected here since this is the "recoverable"
    /// factory path used by on-disk pipelines; construct a bare `Stream`
    /// with `MemoryStorage` directly for transient in-process wiring.
    pub async fn create(
        uri: &str,
        default_protocol: &str,
        prefix: Option<&str>,
    ) -> Result<Self, StreamError> {
        let resolved = resolve_uri(uri, default_protocol, prefix)?;
        if resolved.protocol == Protocol::Memory {
            return Err(StreamError::MemoryNotRecoverable);
        }
        let storage: Arc<dyn Storage> = match resolved.protocol {
            Protocol::Jsonl | Protocol::File => {
                Arc::new(JsonlStorage::open(resolved.path.clone()).await?)
            }
            #[cfg(feature = "csv")]
            Protocol::Csv => Arc::new(CsvStorage::new(resolved.path.clone())),
            #[cfg(not(feature = "csv"))]
            Protocol::Csv => {
                return Err(StreamError::UnknownProtocol("csv".to_string()));
            }
            Protocol::Memory => unreachable!(),
        };
        Ok(Self {
            uri: uri.to_string(),
            resolved,
            storage,
            channel: Channel::new(),
            opened: AtomicBool::new(false),
        })
    }

    /// Construct a transient in-process memory stream (not restorable across
    /// a process restart).
    pub fn in_memory(uri: impl Into<String>) -> Self {
        Self {
            uri: uri.into(),
            resolved: ResolvedUri {
                protocol: Protocol::Memory,
                path: PathBuf::new(),
            },
            storage: Arc::new(MemoryStorage::new()),
            channel: Channel::new(),
            opened: AtomicBool::new(false),
        }
    }

    pub fn uri(&self) -> &str {
        &self.uri
    }

    pub fn path(&self) -> &Path {
        &self.resolved.path
    }

    pub fn protocol(&self) -> Protocol {
        self.resolved.protocol
    }

    pub fn is_opened(&self) -> bool {
        self.opened.load(Ordering::Acquire)
    }

    /// Acquire a reader over this stream, starting at `progress.current` if
    /// given. Marks the stream opened on this side; a stream may serve one
    /// Writer and one Reader simultaneously but not two readers.
    pub async fn get_reader(&self, progress: Option<Progress>) -> Result<Reader, StreamError> {
        if self
            .opened
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Err(StreamError::AlreadyOpened(self.uri.clone()));
        }
        let start = progress.map(|p| p.current).unwrap_or(0);
        Ok(Reader::new(self.storage.clone(), self.channel.clone(), start))
    }

    /// Acquire a writer over this stream. `initial_count` seeds the
    /// anchor/offset base from the storage's current size so resuming a
    /// partially-written stream does not collide auto-assigned anchors with
    /// records already on disk.
    pub async fn get_writer(&self, config: WriterConfig) -> Result<Writer, StreamError> {
        let initial_count = self.storage.size().await?;
        Ok(Writer::new(
            self.storage.clone(),
            self.channel.clone(),
            config,
            initial_count,
        ))
    }

    pub async fn clear_data(&self) -> Result<(), StreamError> {
        self.storage.clear().await?;
        self.channel.reset();
        Ok(())
    }

    pub async fn seal(&self) -> Result<(), StreamError> {
        self.storage.mark_sealed().await?;
        self.channel.set_eof();
        Ok(())
    }

    pub async fn unseal(&self) -> Result<(), StreamError> {
        self.storage.unseal().await?;
        self.channel.reset();
        Ok(())
    }

    pub async fn is_sealed(&self) -> Result<bool, StreamError> {
        Ok(self.storage.is_sealed().await?)
    }

    pub async fn size(&self) -> Result<u64, StreamError> {
        Ok(self.storage.size().await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolves_default_protocol_with_no_scheme() {
        let r = resolve_uri("in", "jsonl", None).unwrap();
        assert_eq!(r.protocol, Protocol::Jsonl);
        assert_eq!(r.path, PathBuf::from("in.jsonl"));
    }

    #[test]
    fn applies_prefix_with_one_separator() {
        let r = resolve_uri("jsonl://node_0", "jsonl", Some("work/pipe")).unwrap();
        assert_eq!(r.path, PathBuf::from("work/pipe/node_0.jsonl"));
    }

    #[test]
    fn leaves_known_extension_alone() {
        let r = resolve_uri("csv://out.csv", "jsonl", None).unwrap();
        assert_eq!(r.path, PathBuf::from("out.csv"));
    }

    #[test]
    fn memory_has_no_canonical_extension() {
        let r = resolve_uri("memory://scratch", "jsonl", None).unwrap();
        assert_eq!(r.path, PathBuf::from("scratch"));
    }

    #[test]
    fn unknown_protocol_is_rejected() {
        let err = resolve_uri("ftp://out", "jsonl", None).unwrap_err();
        assert!(matches!(err, StreamError::UnknownProtocol(_)));
    }

    #[tokio::test]
    async fn memory_is_rejected_by_recoverable_factory() {
        let err = Stream::create("memory://x", "jsonl", None).await.unwrap_err();
        assert!(matches!(err, StreamError::MemoryNotRecoverable));
    }

    #[tokio::test]
    async fn double_open_as_reader_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let uri = format!("jsonl://{}/s", dir.path().display());
        let stream = Stream::create(&uri, "jsonl", None).await.unwrap();
        let _r1 = stream.get_reader(None).await.unwrap();
        let err = stream.get_reader(None).await.unwrap_err();
        assert!(matches!(err, StreamError::AlreadyOpened(_)));
    }

    #[tokio::test]
    async fn seal_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let uri = format!("jsonl://{}/s", dir.path().display());
        let stream = Stream::create(&uri, "jsonl", None).await.unwrap();
        stream.seal().await.unwrap();
        assert!(stream.is_sealed().await.unwrap());
        stream.unseal().await.unwrap();
        assert!(!stream.is_sealed().await.unwrap());
    }
}
