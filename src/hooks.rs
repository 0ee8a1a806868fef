//! Small callback surface for progress, usage, and checkpoint persistence,
//! plus two stock implementations and a fan-out composite: `InMemoryHooks`
//! (in-memory stats with adaptive print thresholds and a final
//! `report.json`), `CheckpointHooks` (adds a `checkpoint.json` overwritten
//! on every event), and `CompositeHooks` (fan-out, state keyed by hook
//! name).

use crate::operator::LogLevel;
use crate::types::{NodeStatus, PipelineStatus, Progress, UsageMetrics};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};
use tokio::fs;

/// The callback surface a pipeline drives during execution. Stock
/// implementations below are thread-safe (`parking_lot::Mutex`-guarded);
/// custom implementations backing external systems (metrics emitters,
/// dashboards) only need to implement the events they care about, since
/// every method carries a default no-op body.
#[async_trait]
pub trait Hooks: Send + Sync {
    fn name(&self) -> &'static str {
        "hook"
    }

    async fn clear_state(&self) {}

    async fn on_pipeline_start(&self, _pipeline_id: &str) {}

    /// Called before the pipeline decides which nodes to skip, so a durable
    /// hook can rehydrate on-disk checkpoint state ahead of planning.
    async fn load_state(&self, _pipeline_id: &str) {}

    async fn on_pipeline_end(&self, _pipeline_id: &str, _status: PipelineStatus, _error: Option<&str>) {}

    async fn on_node_start(&self, _node_id: &str) {}

    async fn on_node_finish(&self, _node_id: &str) {}

    async fn on_node_error(&self, _node_id: &str, _error: &str) {}

    async fn on_node_progress(&self, _node_id: &str, _current: u64, _total: u64) {}

    async fn on_usage(&self, _node_id: &str, _metrics: &Map<String, Value>) {}

    async fn on_checkpoint(&self, _pipeline_id: &str, _node_id: &str, _progress: Progress) {}

    fn on_log(&self, _message: &str, _level: LogLevel) {}

    /// Export a JSON snapshot of this hook's state (used by
    /// [`CompositeHooks`] to persist/restore sub-hook state atomically).
    async fn get_state(&self) -> Value {
        Value::Null
    }

    async fn load_state_data(&self, _data: Value) {}

    /// The last known progress for a node, if this hook tracks it.
    async fn get_checkpoint(&self, _node_id: &str) -> Option<Progress> {
        None
    }
}

fn unix_time_secs() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs_f64())
        .unwrap_or(0.0)
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
struct NodeProgressEntry {
    current: u64,
    total: u64,
    status: NodeStatus,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
struct InMemoryState {
    node_usages: BTreeMap<String, UsageMetrics>,
    node_progress: BTreeMap<String, NodeProgressEntry>,
    all_nodes: Vec<String>,
    start_time: f64,
}

/// Thread-safe in-memory aggregation of per-node progress and usage
/// counters. Prints progress only at adaptive thresholds (1% steps when
/// `total` is known and positive, else every 50 items) to avoid log
/// flooding, and writes a final `report.json` under
/// `<results_dir>/<pipeline_id>/report.json` on pipeline end.
pub struct InMemoryHooks {
    results_dir: PathBuf,
    state: parking_lot::Mutex<InMemoryState>,
    last_printed: parking_lot::Mutex<BTreeMap<String, u64>>,
}

impl InMemoryHooks {
    pub fn new(results_dir: impl Into<PathBuf>) -> Self {
        Self {
            results_dir: results_dir.into(),
            state: parking_lot::Mutex::new(InMemoryState::default()),
            last_printed: parking_lot::Mutex::new(BTreeMap::new()),
        }
    }

    fn report_path(&self, pipeline_id: &str) -> PathBuf {
        self.results_dir.join(pipeline_id).join("report.json")
    }

    fn should_print(&self, node_id: &str, current: u64, total: u64) -> bool {
        let mut last = self.last_printed.lock();
        if last.get(node_id) == Some(&current) {
            return false;
        }
        let due = if total > 0 {
            let step = (total / 100).max(1);
            current % step == 0 || current >= total
        } else {
            current % 50 == 0
        };
        if due {
            last.insert(node_id.to_string(), current);
        }
        due
    }
}

#[async_trait]
impl Hooks for InMemoryHooks {
    fn name(&self) -> &'static str {
        "InMemoryHooks"
    }

    async fn clear_state(&self) {
        *self.state.lock() = InMemoryState::default();
        self.last_printed.lock().clear();
    }

    async fn on_pipeline_start(&self, pipeline_id: &str) {
        let mut state = self.state.lock();
        state.start_time = unix_time_secs();
        tracing::info!(pipeline_id, "pipeline started");
    }

    async fn on_node_start(&self, node_id: &str) {
        let mut state = self.state.lock();
        if !state.all_nodes.iter().any(|n| n == node_id) {
            state.all_nodes.push(node_id.to_string());
        }
        state.node_usages.entry(node_id.to_string()).or_default();
        let entry = state.node_progress.entry(node_id.to_string()).or_default();
        entry.status = NodeStatus::Running;
    }

    async fn on_node_finish(&self, node_id: &str) {
        let mut state = self.state.lock();
        let entry = state.node_progress.entry(node_id.to_string()).or_default();
        entry.status = NodeStatus::Completed;
        if entry.total < entry.current {
            entry.total = entry.current;
        }
    }

    async fn on_node_error(&self, node_id: &str, _error: &str) {
        let mut state = self.state.lock();
        state.node_progress.entry(node_id.to_string()).or_default().status = NodeStatus::Failed;
    }

    async fn on_node_progress(&self, node_id: &str, current: u64, total: u64) {
        {
            let mut state = self.state.lock();
            let entry = state.node_progress.entry(node_id.to_string()).or_default();
            if current > entry.current {
                entry.current = current;
            }
            if total > 0 {
                entry.total = total;
            }
            if entry.current > entry.total {
                entry.total = entry.current;
            }
            if entry.status != NodeStatus::Completed {
                entry.status = NodeStatus::Running;
            }
        }
        let (snapshot_current, snapshot_total) = {
            let state = self.state.lock();
            let entry = state.node_progress.get(node_id).cloned().unwrap_or_default();
            (entry.current, entry.total)
        };
        if self.should_print(node_id, snapshot_current, snapshot_total) {
            tracing::info!(node_id, current = snapshot_current, total = snapshot_total, "progress");
        }
    }

    async fn on_usage(&self, node_id: &str, metrics: &Map<String, Value>) {
        let mut state = self.state.lock();
        state
            .node_usages
            .entry(node_id.to_string())
            .or_default()
            .accumulate(metrics);
    }

    async fn on_checkpoint(&self, _pipeline_id: &str, node_id: &str, progress: Progress) {
        let mut state = self.state.lock();
        let entry = state.node_progress.entry(node_id.to_string()).or_default();
        if progress.current > entry.current {
            entry.current = progress.current;
        }
        entry.total = progress.total;
        entry.status = progress.status;
    }

    fn on_log(&self, message: &str, level: LogLevel) {
        match level {
            LogLevel::Debug => tracing::debug!("{message}"),
            LogLevel::Info => tracing::info!("{message}"),
            LogLevel::Warn => tracing::warn!("{message}"),
            LogLevel::Error => tracing::error!("{message}"),
        }
    }

    async fn get_state(&self) -> Value {
        serde_json::to_value(&*self.state.lock()).unwrap_or(Value::Null)
    }

    async fn load_state_data(&self, data: Value) {
        if data.is_null() {
            return;
        }
        if let Ok(restored) = serde_json::from_value::<InMemoryState>(data) {
            let mut state = self.state.lock();
            let node_count = restored.all_nodes.len();
            for node_id in &restored.all_nodes {
                if !state.all_nodes.iter().any(|n| n == node_id) {
                    state.all_nodes.push(node_id.clone());
                }
            }
            for node_id in restored.node_progress.keys() {
                if !state.all_nodes.iter().any(|n| n == node_id) {
                    state.all_nodes.push(node_id.clone());
                }
            }
            state.node_usages = restored.node_usages;
            state.node_progress = restored.node_progress;
            state.start_time = restored.start_time;
            tracing::info!(node_count, "hook state restored from snapshot");
        }
    }

    async fn get_checkpoint(&self, node_id: &str) -> Option<Progress> {
        let state = self.state.lock();
        state.node_progress.get(node_id).map(|e| Progress {
            current: e.current,
            total: e.total,
            status: e.status,
        })
    }

    async fn on_pipeline_end(&self, pipeline_id: &str, status: PipelineStatus, error: Option<&str>) {
        let (nodes, usages, duration) = {
            let state = self.state.lock();
            (
                state.node_progress.clone(),
                state.node_usages.clone(),
                unix_time_secs() - state.start_time,
            )
        };

        tracing::info!(
            pipeline_id,
            status = ?status,
            duration_secs = duration,
            "pipeline finished"
        );
        for (node_id, progress) in &nodes {
            let usage = usages.get(node_id).cloned().unwrap_or_default();
            tracing::info!(
                node_id,
                current = progress.current,
                total = progress.total,
                prompt_tokens = usage.prompt_tokens,
                completion_tokens = usage.completion_tokens,
                total_tokens = usage.total_tokens,
                "node summary"
            );
        }

        let report = Report {
            pipeline_id: pipeline_id.to_string(),
            status,
            error: error.map(str::to_string),
            duration_secs: duration,
            nodes,
            usages,
        };

        let path = self.report_path(pipeline_id);
        if let Some(parent) = path.parent() {
            if let Err(e) = fs::create_dir_all(parent).await {
                tracing::error!(error = %e, "failed to create results directory for report.json");
                return;
            }
        }
        match serde_json::to_vec_pretty(&report) {
            Ok(bytes) => {
                if let Err(e) = fs::write(&path, bytes).await {
                    tracing::error!(error = %e, path = %path.display(), "failed to write report.json");
                }
            }
            Err(e) => tracing::error!(error = %e, "failed to serialize report.json"),
        }
    }
}

#[derive(Serialize)]
struct Report {
    pipeline_id: String,
    status: PipelineStatus,
    error: Option<String>,
    duration_secs: f64,
    nodes: BTreeMap<String, NodeProgressEntry>,
    usages: BTreeMap<String, UsageMetrics>,
}

/// Extends [`InMemoryHooks`] with durable checkpointing: on every
/// progress/start/finish/error event, overwrites
/// `<results_dir>/<pipeline_id>/checkpoint.json` with
/// `{nodes: {node_id: {current,total,status,usage}}, updated_at, pipeline_id}`.
pub struct CheckpointHooks {
    inner: InMemoryHooks,
    results_dir: PathBuf,
}

#[derive(Serialize, Deserialize)]
struct CheckpointNodeEntry {
    current: u64,
    total: u64,
    status: NodeStatus,
    usage: UsageMetrics,
}

#[derive(Serialize, Deserialize)]
struct CheckpointFile {
    nodes: BTreeMap<String, CheckpointNodeEntry>,
    updated_at: f64,
    pipeline_id: String,
}

impl CheckpointHooks {
    pub fn new(results_dir: impl Into<PathBuf>) -> Self {
        let results_dir = results_dir.into();
        Self {
            inner: InMemoryHooks::new(results_dir.clone()),
            results_dir,
        }
    }

    fn checkpoint_path(&self, pipeline_id: &str) -> PathBuf {
        self.results_dir.join(pipeline_id).join("checkpoint.json")
    }

    async fn save_checkpoint(&self, pipeline_id: &str) {
        let state = self.inner.state.lock().clone();
        let mut nodes = BTreeMap::new();
        for (node_id, entry) in &state.node_progress {
            nodes.insert(
                node_id.clone(),
                CheckpointNodeEntry {
                    current: entry.current,
                    total: entry.total,
                    status: entry.status,
                    usage: state.node_usages.get(node_id).cloned().unwrap_or_default(),
                },
            );
        }
        let file = CheckpointFile {
            nodes,
            updated_at: unix_time_secs(),
            pipeline_id: pipeline_id.to_string(),
        };

        let path = self.checkpoint_path(pipeline_id);
        if let Some(parent) = path.parent() {
            if let Err(e) = fs::create_dir_all(parent).await {
                tracing::error!(error = %e, "failed to create results directory for checkpoint.json");
                return;
            }
        }
        match serde_json::to_vec_pretty(&file) {
            Ok(bytes) => {
                if let Err(e) = fs::write(&path, bytes).await {
                    tracing::error!(error = %e, path = %path.display(), "failed to write checkpoint.json");
                }
            }
            Err(e) => tracing::error!(error = %e, "failed to serialize checkpoint.json"),
        }
    }

    /// Load `checkpoint.json` from disk into this hook's in-memory state,
    /// restoring per-node progress, status, and token usage ahead of
    /// pipeline planning (`load_state`).
    pub async fn load_from_disk(&self, pipeline_id: &str) -> std::io::Result<()> {
        let path = self.checkpoint_path(pipeline_id);
        let bytes = match fs::read(&path).await {
            Ok(b) => b,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(()),
            Err(e) => return Err(e),
        };
        let file: CheckpointFile = match serde_json::from_slice(&bytes) {
            Ok(f) => f,
            Err(_) => return Ok(()),
        };

        let mut state = self.inner.state.lock();
        for (node_id, entry) in file.nodes {
            if !state.all_nodes.iter().any(|n| n == &node_id) {
                state.all_nodes.push(node_id.clone());
            }
            state.node_progress.insert(
                node_id.clone(),
                NodeProgressEntry {
                    current: entry.current,
                    total: entry.total,
                    status: entry.status,
                },
            );
            state.node_usages.insert(node_id, entry.usage);
        }
        tracing::info!(
            pipeline_id,
            nodes = state.node_progress.len(),
            "checkpoint restored from disk"
        );
        Ok(())
    }
}

#[async_trait]
impl Hooks for CheckpointHooks {
    fn name(&self) -> &'static str {
        "CheckpointHooks"
    }

    async fn clear_state(&self) {
        self.inner.clear_state().await;
    }

    async fn on_pipeline_start(&self, pipeline_id: &str) {
        self.inner.on_pipeline_start(pipeline_id).await;
    }

    async fn load_state(&self, pipeline_id: &str) {
        if let Err(e) = self.load_from_disk(pipeline_id).await {
            tracing::warn!(error = %e, "failed to load checkpoint.json");
        }
    }

    async fn on_pipeline_end(&self, pipeline_id: &str, status: PipelineStatus, error: Option<&str>) {
        self.inner.on_pipeline_end(pipeline_id, status, error).await;
    }

    async fn on_node_start(&self, node_id: &str) {
        self.inner.on_node_start(node_id).await;
    }

    async fn on_node_finish(&self, node_id: &str) {
        self.inner.on_node_finish(node_id).await;
    }

    async fn on_node_error(&self, node_id: &str, error: &str) {
        self.inner.on_node_error(node_id, error).await;
    }

    async fn on_node_progress(&self, node_id: &str, current: u64, total: u64) {
        self.inner.on_node_progress(node_id, current, total).await;
    }

    async fn on_usage(&self, node_id: &str, metrics: &Map<String, Value>) {
        self.inner.on_usage(node_id, metrics).await;
    }

    async fn on_checkpoint(&self, pipeline_id: &str, node_id: &str, progress: Progress) {
        self.inner.on_checkpoint(pipeline_id, node_id, progress).await;
        self.save_checkpoint(pipeline_id).await;
    }

    fn on_log(&self, message: &str, level: LogLevel) {
        self.inner.on_log(message, level);
    }

    async fn get_state(&self) -> Value {
        self.inner.get_state().await
    }

    async fn load_state_data(&self, data: Value) {
        self.inner.load_state_data(data).await;
    }

    async fn get_checkpoint(&self, node_id: &str) -> Option<Progress> {
        self.inner.get_checkpoint(node_id).await
    }
}

/// Fans out every event to an ordered list of sub-hooks. State round-trips
/// (`get_state`/`load_state_data`) are keyed by each sub-hook's [`Hooks::name`].
pub struct CompositeHooks {
    hooks: Vec<Arc<dyn Hooks>>,
}

impl CompositeHooks {
    pub fn new(hooks: Vec<Arc<dyn Hooks>>) -> Self {
        Self { hooks }
    }
}

#[async_trait]
impl Hooks for CompositeHooks {
    fn name(&self) -> &'static str {
        "CompositeHooks"
    }

    async fn clear_state(&self) {
        for h in &self.hooks {
            h.clear_state().await;
        }
    }

    async fn on_pipeline_start(&self, pipeline_id: &str) {
        for h in &self.hooks {
            h.on_pipeline_start(pipeline_id).await;
        }
    }

    async fn load_state(&self, pipeline_id: &str) {
        for h in &self.hooks {
            h.load_state(pipeline_id).await;
        }
    }

    async fn on_pipeline_end(&self, pipeline_id: &str, status: PipelineStatus, error: Option<&str>) {
        for h in &self.hooks {
            h.on_pipeline_end(pipeline_id, status, error).await;
        }
    }

    async fn on_node_start(&self, node_id: &str) {
        for h in &self.hooks {
            h.on_node_start(node_id).await;
        }
    }

    async fn on_node_finish(&self, node_id: &str) {
        for h in &self.hooks {
            h.on_node_finish(node_id).await;
        }
    }

    async fn on_node_error(&self, node_id: &str, error: &str) {
        for h in &self.hooks {
            h.on_node_error(node_id, error).await;
        }
    }

    async fn on_node_progress(&self, node_id: &str, current: u64, total: u64) {
        for h in &self.hooks {
            h.on_node_progress(node_id, current, total).await;
        }
    }

    async fn on_usage(&self, node_id: &str, metrics: &Map<String, Value>) {
        for h in &self.hooks {
            h.on_usage(node_id, metrics).await;
        }
    }

    async fn on_checkpoint(&self, pipeline_id: &str, node_id: &str, progress: Progress) {
        for h in &self.hooks {
            h.on_checkpoint(pipeline_id, node_id, progress).await;
        }
    }

    fn on_log(&self, message: &str, level: LogLevel) {
        for h in &self.hooks {
            h.on_log(message, level);
        }
    }

    async fn get_state(&self) -> Value {
        let mut map = Map::new();
        for h in &self.hooks {
            map.insert(h.name().to_string(), h.get_state().await);
        }
        Value::Object(map)
    }

    async fn load_state_data(&self, data: Value) {
        let Some(map) = data.as_object() else {
            return;
        };
        for h in &self.hooks {
            if let Some(sub) = map.get(h.name()) {
                h.load_state_data(sub.clone()).await;
            }
        }
    }

    async fn get_checkpoint(&self, node_id: &str) -> Option<Progress> {
        for h in &self.hooks {
            if let Some(cp) = h.get_checkpoint(node_id).await {
                return Some(cp);
            }
        }
        None
    }
}

/// A hooks implementation that does nothing; the default for pipelines
/// built without observers.
pub struct NullHooks;

#[async_trait]
impl Hooks for NullHooks {
    fn name(&self) -> &'static str {
        "NullHooks"
    }
}

/// Helper used at `Path` callsites: results directory layout is
/// `<results_dir>/<pipeline_id>/...`.
pub fn pipeline_results_dir(results_dir: &Path, pipeline_id: &str) -> PathBuf {
    results_dir.join(pipeline_id)
}
