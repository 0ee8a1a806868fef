//! Topology planning, execution (sequential/streaming), and resume for a
//! linear chain of nodes.

use crate::error::{NodeError, OperatorError, PipelineError, StreamError};
use crate::hooks::{Hooks, NullHooks};
use crate::node::{Node, NodeConfig};
use crate::operator::{identity_operator, Operator};
use crate::stream::Stream;
use crate::types::{NodeRuntime, NodeStatus, PipelineRuntime, PipelineStatus};
use crate::writer::WriterConfig;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::fs;
use tokio::task::JoinSet;

/// One user-supplied stage. `input_uri`/`output_uri` are only needed to
/// override the auto-welded edge between adjacent nodes; leave `None` for
/// the common case of a fully auto-wired chain.
pub struct NodeSpec {
    pub node_id: Option<String>,
    pub operator: Arc<dyn Operator>,
    pub input_uri: Option<String>,
    pub output_uri: Option<String>,
    pub node_config: Option<NodeConfig>,
}

impl NodeSpec {
    pub fn new(operator: Arc<dyn Operator>) -> Self {
        Self {
            node_id: None,
            operator,
            input_uri: None,
            output_uri: None,
            node_config: None,
        }
    }

    pub fn node_id(mut self, id: impl Into<String>) -> Self {
        self.node_id = Some(id.into());
        self
    }

    pub fn input_uri(mut self, uri: impl Into<String>) -> Self {
        self.input_uri = Some(uri.into());
        self
    }

    pub fn output_uri(mut self, uri: impl Into<String>) -> Self {
        self.output_uri = Some(uri.into());
        self
    }

    pub fn config(mut self, config: NodeConfig) -> Self {
        self.node_config = Some(config);
        self
    }
}

/// Pipeline-wide tuning knobs; every node adopts these unless its
/// [`NodeSpec`] sets its own [`NodeConfig`].
#[derive(Clone)]
pub struct PipelineConfig {
    pub streaming: bool,
    pub batch_size: usize,
    pub parallel_size: usize,
    pub writer_config: WriterConfig,
    pub default_protocol: String,
    pub base_path: PathBuf,
    pub protocol_prefix: String,
    pub results_dir: PathBuf,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            streaming: false,
            batch_size: 50,
            parallel_size: 1,
            writer_config: WriterConfig::default(),
            default_protocol: "jsonl".to_string(),
            base_path: PathBuf::from("."),
            protocol_prefix: String::new(),
            results_dir: PathBuf::from("results"),
        }
    }
}

/// Builds a [`Pipeline`] from a list of operators and the external
/// `(input_uri, output_uri)` boundary, then finalizes with [`create`] (fresh
/// run) or [`resume`] (continue a prior run).
///
/// [`create`]: PipelineBuilder::create
/// [`resume`]: PipelineBuilder::resume
pub struct PipelineBuilder {
    node_specs: Vec<NodeSpec>,
    input_uri: String,
    output_uri: String,
    config: PipelineConfig,
    hooks: Arc<dyn Hooks>,
}

impl PipelineBuilder {
    pub fn new(input_uri: impl Into<String>, output_uri: impl Into<String>) -> Self {
        Self {
            node_specs: Vec::new(),
            input_uri: input_uri.into(),
            output_uri: output_uri.into(),
            config: PipelineConfig::default(),
            hooks: Arc::new(NullHooks),
        }
    }

    pub fn operator(mut self, operator: Arc<dyn Operator>) -> Self {
        self.node_specs.push(NodeSpec::new(operator));
        self
    }

    pub fn operators(mut self, operators: Vec<Arc<dyn Operator>>) -> Self {
        self.node_specs.extend(operators.into_iter().map(NodeSpec::new));
        self
    }

    pub fn node(mut self, spec: NodeSpec) -> Self {
        self.node_specs.push(spec);
        self
    }

    pub fn streaming(mut self, enabled: bool) -> Self {
        self.config.streaming = enabled;
        self
    }

    pub fn batch_size(mut self, n: usize) -> Self {
        self.config.batch_size = n.max(1);
        self
    }

    pub fn parallel_size(mut self, n: usize) -> Self {
        self.config.parallel_size = n.max(1);
        self
    }

    pub fn writer_config(mut self, config: WriterConfig) -> Self {
        self.config.writer_config = config;
        self
    }

    pub fn default_protocol(mut self, protocol: impl Into<String>) -> Self {
        self.config.default_protocol = protocol.into();
        self
    }

    pub fn base_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.base_path = path.into();
        self
    }

    pub fn protocol_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.config.protocol_prefix = prefix.into();
        self
    }

    pub fn results_dir(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.results_dir = path.into();
        self
    }

    pub fn hooks(mut self, hooks: Arc<dyn Hooks>) -> Self {
        self.hooks = hooks;
        self
    }

    /// Plan, wire, and clear intermediate storage for a brand-new run.
    pub async fn create(self, pipeline_id: impl Into<String>) -> Result<Pipeline, PipelineError> {
        Pipeline::build(pipeline_id.into(), self, false).await
    }

    /// Plan and wire a pipeline that continues from a prior `runtime.json`,
    /// preserving all intermediate storage and rehydrating per-node
    /// progress.
    pub async fn resume(self, pipeline_id: impl Into<String>) -> Result<Pipeline, PipelineError> {
        Pipeline::build(pipeline_id.into(), self, true).await
    }
}

/// Weld adjacent node edges: if both sides declare a URI they must match,
/// else copy the non-blank side, else synthesize one under the pipeline's
/// internal namespace keyed by the upstream node's id.
fn weld_uris(
    node_specs: &[NodeSpec],
    input_uri: &str,
    output_uri: &str,
    pipeline_id: &str,
    default_protocol: &str,
) -> Result<Vec<(String, String, String)>, PipelineError> {
    let n = node_specs.len();
    let node_ids: Vec<String> = node_specs
        .iter()
        .enumerate()
        .map(|(i, spec)| spec.node_id.clone().unwrap_or_else(|| format!("node_{i}")))
        .collect();

    let mut resolved_input: Vec<Option<String>> = vec![None; n];
    let mut resolved_output: Vec<Option<String>> = vec![None; n];

    resolved_input[0] = Some(input_uri.to_string());
    resolved_output[n - 1] = Some(output_uri.to_string());

    for i in 0..n.saturating_sub(1) {
        let left = node_specs[i].output_uri.clone();
        let right = node_specs[i + 1].input_uri.clone();
        let welded = match (left, right) {
            (Some(l), Some(r)) if l == r => l,
            (Some(l), Some(r)) => {
                return Err(PipelineError::WeldConflict {
                    upstream: node_ids[i].clone(),
                    downstream: node_ids[i + 1].clone(),
                    reason: format!("{l} != {r}"),
                });
            }
            (Some(l), None) => l,
            (None, Some(r)) => r,
            (None, None) => format!("{default_protocol}://{pipeline_id}/{}", node_ids[i]),
        };
        resolved_output[i] = Some(welded.clone());
        resolved_input[i + 1] = Some(welded);
    }

    Ok(node_ids
        .into_iter()
        .enumerate()
        .map(|(i, id)| {
            (
                id,
                resolved_input[i].take().expect("every slot welded"),
                resolved_output[i].take().expect("every slot welded"),
            )
        })
        .collect())
}

/// A planned, wired pipeline ready to [`run`](Pipeline::run).
pub struct Pipeline {
    pipeline_id: String,
    input_uri: String,
    output_uri: String,
    config: PipelineConfig,
    hooks: Arc<dyn Hooks>,
    nodes: Vec<Node>,
    cancel_handles: Vec<Arc<AtomicBool>>,
    status: parking_lot::Mutex<PipelineStatus>,
    cancel: Arc<AtomicBool>,
}

impl Pipeline {
    async fn build(
        pipeline_id: String,
        builder: PipelineBuilder,
        is_resume: bool,
    ) -> Result<Self, PipelineError> {
        let PipelineBuilder {
            mut node_specs,
            input_uri,
            output_uri,
            config,
            hooks,
        } = builder;

        if node_specs.is_empty() {
            // Zero operators: an identity pass-through still moves input to
            // output.
            node_specs.push(NodeSpec::new(identity_operator()));
        }

        let welded = weld_uris(&node_specs, &input_uri, &output_uri, &pipeline_id, &config.default_protocol)?;
        let n = welded.len();

        let internal_prefix = if config.protocol_prefix.is_empty() {
            config.base_path.join(&pipeline_id)
        } else {
            config.base_path.join(&config.protocol_prefix)
        };
        let internal_prefix_str = internal_prefix.to_string_lossy().into_owned();

        let mut stream_cache: HashMap<String, Arc<Stream>> = HashMap::new();
        let mut internal_streams: Vec<Arc<Stream>> = Vec::new();

        for (i, (_, in_uri, out_uri)) in welded.iter().enumerate() {
            let in_external = i == 0;
            let out_external = i == n - 1;
            for (uri, external) in [(in_uri, in_external), (out_uri, out_external)] {
                if stream_cache.contains_key(uri) {
                    continue;
                }
                let prefix = if external { None } else { Some(internal_prefix_str.as_str()) };
                let stream = Stream::create(uri, &config.default_protocol, prefix)
                    .await
                    .map_err(|e: StreamError| PipelineError::Configuration(e.to_string()))?;
                let arc = Arc::new(stream);
                if !external {
                    internal_streams.push(arc.clone());
                }
                stream_cache.insert(uri.clone(), arc);
            }
        }

        if !is_resume {
            for stream in &internal_streams {
                stream.clear_data().await.map_err(StreamError::from).map_err(|e| {
                    PipelineError::Configuration(e.to_string())
                })?;
            }
            hooks.clear_state().await;
            for name in ["runtime.json", "checkpoint.json", "report.json"] {
                let _ = fs::remove_file(results_path(&config.results_dir, &pipeline_id, name)).await;
            }
        } else {
            hooks.load_state(&pipeline_id).await;
        }

        let prior_runtime = if is_resume {
            read_runtime(&config.results_dir, &pipeline_id).await
        } else {
            None
        };

        let mut nodes = Vec::with_capacity(n);
        let mut cancel_handles = Vec::with_capacity(n);
        for (spec, (node_id, in_uri, out_uri)) in node_specs.into_iter().zip(welded.into_iter()) {
            let node_config = spec.node_config.unwrap_or_else(|| {
                NodeConfig::new()
                    .batch_size(config.batch_size)
                    .parallel_size(config.parallel_size)
                    .writer_config(config.writer_config.clone())
            });
            let mut node = Node::new(&node_id, &pipeline_id, spec.operator, node_config, hooks.clone());

            let input_stream = stream_cache.get(&in_uri).expect("resolved above").clone();
            let output_stream = stream_cache.get(&out_uri).expect("resolved above").clone();
            node.bind_io(input_stream, output_stream.clone(), config.base_path.to_string_lossy(), config.protocol_prefix.clone());

            if let Some(runtime) = prior_runtime.as_ref().and_then(|r| r.nodes.iter().find(|nr| nr.node_id == node_id)) {
                node.resume_from_runtime(runtime);
                if runtime.status == NodeStatus::Completed && !output_stream.is_sealed().await.map_err(StreamError::from).map_err(|e| PipelineError::Configuration(e.to_string()))? {
                    output_stream.seal().await.map_err(StreamError::from).map_err(|e| PipelineError::Configuration(e.to_string()))?;
                }
            }

            cancel_handles.push(node.cancel_handle());
            nodes.push(node);
        }

        let status = if is_resume {
            PipelineStatus::Resuming
        } else {
            PipelineStatus::Pending
        };

        let pipeline = Self {
            pipeline_id,
            input_uri,
            output_uri,
            config,
            hooks,
            nodes,
            cancel_handles,
            status: parking_lot::Mutex::new(status),
            cancel: Arc::new(AtomicBool::new(false)),
        };
        pipeline.write_runtime().await.ok();
        Ok(pipeline)
    }

    pub fn pipeline_id(&self) -> &str {
        &self.pipeline_id
    }

    pub fn status(&self) -> PipelineStatus {
        *self.status.lock()
    }

    pub fn nodes(&self) -> &[Node] {
        &self.nodes
    }

    fn results_dir_path(&self) -> PathBuf {
        self.config.results_dir.join(&self.pipeline_id)
    }

    async fn write_runtime(&self) -> Result<(), PipelineError> {
        let runtime = self.get_runtime();
        let path = self.results_dir_path().join("runtime.json");
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await?;
        }
        let bytes = serde_json::to_vec_pretty(&runtime)?;
        fs::write(path, bytes).await?;
        Ok(())
    }

    pub fn get_runtime(&self) -> PipelineRuntime {
        PipelineRuntime {
            pipeline_id: self.pipeline_id.clone(),
            streaming: self.config.streaming,
            input_uri: self.input_uri.clone(),
            output_uri: self.output_uri.clone(),
            default_protocol: self.config.default_protocol.clone(),
            base_path: self.config.base_path.to_string_lossy().into_owned(),
            protocol_prefix: self.config.protocol_prefix.clone(),
            nodes: self.nodes.iter().map(Node::get_runtime).collect(),
        }
    }

    /// Idempotent; marks the pipeline `canceling` and forwards a shared
    /// cancellation flag to every node, including ones not yet started.
    pub fn cancel(&self) {
        if self.cancel.swap(true, Ordering::AcqRel) {
            return;
        }
        *self.status.lock() = PipelineStatus::Canceling;
        for handle in &self.cancel_handles {
            handle.store(true, Ordering::Release);
        }
    }

    pub async fn run(&mut self) -> Result<(), PipelineError> {
        *self.status.lock() = PipelineStatus::Running;
        self.hooks.on_pipeline_start(&self.pipeline_id).await;

        let result = if self.config.streaming {
            self.run_streaming().await
        } else {
            self.run_sequential().await
        };

        let final_status = match &result {
            Ok(()) => {
                if self.nodes.iter().any(|n| n.status() == NodeStatus::Canceled) {
                    PipelineStatus::Canceled
                } else {
                    PipelineStatus::Completed
                }
            }
            Err(PipelineError::NodeFailed { source, .. }) => {
                let any_failed = self.nodes.iter().any(|n| n.status() == NodeStatus::Failed);
                if matches!(source, NodeError::Cancelled) && !any_failed {
                    PipelineStatus::Canceled
                } else {
                    PipelineStatus::Failed
                }
            }
            Err(_) => PipelineStatus::Failed,
        };
        *self.status.lock() = final_status;
        self.write_runtime().await.ok();

        let error_message = result.as_ref().err().map(|e| e.to_string());
        self.hooks
            .on_pipeline_end(&self.pipeline_id, final_status, error_message.as_deref())
            .await;

        result
    }

    async fn run_sequential(&mut self) -> Result<(), PipelineError> {
        for node in &mut self.nodes {
            if node.status() == NodeStatus::Completed {
                continue;
            }

            let resume_progress = {
                let p = node.get_progress();
                if p.current > 0 {
                    Some(p)
                } else {
                    None
                }
            };
            let node_id = node.node_id().to_string();

            node.open(resume_progress).await.map_err(|source| PipelineError::NodeFailed {
                node_id: node_id.clone(),
                source,
            })?;
            let run_result = node.run().await;
            node.close().await.map_err(|source| PipelineError::NodeFailed {
                node_id: node_id.clone(),
                source,
            })?;
            self.write_runtime().await.ok();

            if let Err(source) = run_result {
                return Err(PipelineError::NodeFailed { node_id, source });
            }
        }
        Ok(())
    }

    /// Pre-open every non-completed node synchronously (so upstream unseals
    /// happen before a downstream reader tests EOF), then run them all
    /// concurrently on the tokio runtime, joined by their shared streams.
    async fn run_streaming(&mut self) -> Result<(), PipelineError> {
        let pending_indices: Vec<usize> = self
            .nodes
            .iter()
            .enumerate()
            .filter(|(_, n)| n.status() != NodeStatus::Completed)
            .map(|(i, _)| i)
            .collect();

        for &idx in &pending_indices {
            let resume_progress = {
                let p = self.nodes[idx].get_progress();
                if p.current > 0 {
                    Some(p)
                } else {
                    None
                }
            };
            let node = &mut self.nodes[idx];
            node.open(resume_progress).await.map_err(|source| PipelineError::NodeFailed {
                node_id: node.node_id().to_string(),
                source,
            })?;
        }

        let mut slots: Vec<Option<Node>> = self.nodes.drain(..).map(Some).collect();
        let mut set: JoinSet<(usize, Node, Result<(), NodeError>)> = JoinSet::new();
        for &idx in &pending_indices {
            let node = slots[idx].take().expect("pending node present");
            set.spawn(async move {
                let mut node = node;
                let run_result = node.run().await;
                // Seal this node's output as soon as its own run loop
                // finishes, not after the whole JoinSet joins: a downstream
                // node may already be tail-following this node's stream and
                // needs the seal to observe EOF and terminate.
                let close_result = node.close().await;
                let result = match (run_result, close_result) {
                    (Err(e), _) => Err(e),
                    (Ok(()), Err(e)) => Err(e),
                    (Ok(()), Ok(())) => Ok(()),
                };
                (idx, node, result)
            });
        }

        let mut first_error: Option<(String, String)> = None;
        let mut deadline: Option<tokio::time::Instant> = None;
        loop {
            let joined = match deadline {
                Some(d) => match tokio::time::timeout_at(d, set.join_next()).await {
                    Ok(v) => v,
                    Err(_) => break,
                },
                None => set.join_next().await,
            };
            let Some(joined) = joined else { break };
            let (idx, node, result) = joined.expect("node task panicked");
            if let Err(e) = &result {
                if first_error.is_none() && !matches!(e, NodeError::Cancelled) {
                    first_error = Some((node.node_id().to_string(), e.to_string()));
                    for handle in &self.cancel_handles {
                        handle.store(true, Ordering::Release);
                    }
                    deadline.get_or_insert_with(|| tokio::time::Instant::now() + Duration::from_secs(5));
                }
            }
            slots[idx] = Some(node);
        }
        set.abort_all();

        self.nodes = slots.into_iter().flatten().collect();

        if let Some((node_id, message)) = first_error {
            return Err(PipelineError::NodeFailed {
                node_id,
                source: NodeError::Operator(OperatorError::new(message)),
            });
        }
        Ok(())
    }
}

fn results_path(results_dir: &Path, pipeline_id: &str, name: &str) -> PathBuf {
    results_dir.join(pipeline_id).join(name)
}

async fn read_runtime(results_dir: &Path, pipeline_id: &str) -> Option<PipelineRuntime> {
    let path = results_path(results_dir, pipeline_id, "runtime.json");
    let bytes = fs::read(&path).await.ok()?;
    serde_json::from_slice(&bytes).ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::item::Item;
    use crate::operator::{FnOperator, NodeContext};
    use serde_json::Value;

    fn item(n: i64) -> Item {
        let mut m = Item::new();
        m.insert("n".into(), n.into());
        m
    }

    async fn write_input(dir: &Path, uri: &str, count: i64) {
        let stream = Stream::create(uri, "jsonl", None).await.unwrap();
        let writer = stream.get_writer(WriterConfig::default()).await.unwrap();
        writer
            .write((0..count).map(|n| Value::Object(item(n))).collect(), vec![])
            .await
            .unwrap();
        writer.close().await.unwrap();
        let _ = dir;
    }

    #[tokio::test]
    async fn identity_copy_with_zero_operators() {
        let dir = tempfile::tempdir().unwrap();
        let in_uri = format!("jsonl://{}/in", dir.path().display());
        let out_uri = format!("jsonl://{}/out", dir.path().display());
        write_input(dir.path(), &in_uri, 20).await;

        let mut pipeline = PipelineBuilder::new(&in_uri, &out_uri)
            .base_path(dir.path().join("work"))
            .results_dir(dir.path().join("results"))
            .create("p0")
            .await
            .unwrap();

        pipeline.run().await.unwrap();
        assert_eq!(pipeline.status(), PipelineStatus::Completed);

        let out_stream = Stream::create(&out_uri, "jsonl", None).await.unwrap();
        assert_eq!(out_stream.size().await.unwrap(), 20);
    }

    #[tokio::test]
    async fn multi_node_sequential_chain_welds_internal_edges() {
        let dir = tempfile::tempdir().unwrap();
        let in_uri = format!("jsonl://{}/in", dir.path().display());
        let out_uri = format!("jsonl://{}/out", dir.path().display());
        write_input(dir.path(), &in_uri, 10).await;

        let double: Arc<dyn Operator> = Arc::new(FnOperator(|items: Vec<Item>, _ctx: &dyn NodeContext| {
            Ok(items
                .into_iter()
                .map(|mut i| {
                    let n = i["n"].as_i64().unwrap();
                    i.insert("n".into(), (n * 2).into());
                    i
                })
                .collect())
        }));
        let increment: Arc<dyn Operator> = Arc::new(FnOperator(|items: Vec<Item>, _ctx: &dyn NodeContext| {
            Ok(items
                .into_iter()
                .map(|mut i| {
                    let n = i["n"].as_i64().unwrap();
                    i.insert("n".into(), (n + 1).into());
                    i
                })
                .collect())
        }));

        let mut pipeline = PipelineBuilder::new(&in_uri, &out_uri)
            .operator(double)
            .operator(increment)
            .base_path(dir.path().join("work"))
            .results_dir(dir.path().join("results"))
            .create("p1")
            .await
            .unwrap();

        pipeline.run().await.unwrap();
        assert_eq!(pipeline.status(), PipelineStatus::Completed);

        let out_stream = Stream::create(&out_uri, "jsonl", None).await.unwrap();
        let items = out_stream.path().exists();
        assert!(items);
        assert_eq!(out_stream.size().await.unwrap(), 10);
    }

    #[tokio::test]
    async fn streaming_mode_runs_nodes_concurrently() {
        let dir = tempfile::tempdir().unwrap();
        let in_uri = format!("jsonl://{}/in", dir.path().display());
        let out_uri = format!("jsonl://{}/out", dir.path().display());
        write_input(dir.path(), &in_uri, 30).await;

        let op: Arc<dyn Operator> = Arc::new(FnOperator(|items, _ctx: &dyn NodeContext| Ok(items)));
        let mut pipeline = PipelineBuilder::new(&in_uri, &out_uri)
            .operator(op.clone())
            .operator(op)
            .streaming(true)
            .batch_size(5)
            .base_path(dir.path().join("work"))
            .results_dir(dir.path().join("results"))
            .create("p2")
            .await
            .unwrap();

        pipeline.run().await.unwrap();
        assert_eq!(pipeline.status(), PipelineStatus::Completed);

        let out_stream = Stream::create(&out_uri, "jsonl", None).await.unwrap();
        assert_eq!(out_stream.size().await.unwrap(), 30);
    }

    #[tokio::test]
    async fn resume_skips_already_completed_nodes() {
        let dir = tempfile::tempdir().unwrap();
        let in_uri = format!("jsonl://{}/in", dir.path().display());
        let out_uri = format!("jsonl://{}/out", dir.path().display());
        write_input(dir.path(), &in_uri, 12).await;

        let op: Arc<dyn Operator> = Arc::new(FnOperator(|items, _ctx: &dyn NodeContext| Ok(items)));
        let mut pipeline = PipelineBuilder::new(&in_uri, &out_uri)
            .operator(op)
            .base_path(dir.path().join("work"))
            .results_dir(dir.path().join("results"))
            .create("p3")
            .await
            .unwrap();
        pipeline.run().await.unwrap();
        assert_eq!(pipeline.status(), PipelineStatus::Completed);

        let op2: Arc<dyn Operator> = Arc::new(FnOperator(|items, _ctx: &dyn NodeContext| Ok(items)));
        let mut resumed = PipelineBuilder::new(&in_uri, &out_uri)
            .operator(op2)
            .base_path(dir.path().join("work"))
            .results_dir(dir.path().join("results"))
            .resume("p3")
            .await
            .unwrap();
        assert_eq!(resumed.status(), PipelineStatus::Resuming);
        assert_eq!(resumed.nodes()[0].status(), NodeStatus::Completed);

        resumed.run().await.unwrap();
        assert_eq!(resumed.status(), PipelineStatus::Completed);
    }

    #[tokio::test]
    async fn cancel_before_run_short_circuits_every_node() {
        let dir = tempfile::tempdir().unwrap();
        let in_uri = format!("jsonl://{}/in", dir.path().display());
        let out_uri = format!("jsonl://{}/out", dir.path().display());
        write_input(dir.path(), &in_uri, 5).await;

        let op: Arc<dyn Operator> = Arc::new(FnOperator(|items, _ctx: &dyn NodeContext| Ok(items)));
        let mut pipeline = PipelineBuilder::new(&in_uri, &out_uri)
            .operator(op)
            .base_path(dir.path().join("work"))
            .results_dir(dir.path().join("results"))
            .create("p4")
            .await
            .unwrap();

        pipeline.cancel();
        let result = pipeline.run().await;
        assert!(result.is_err());
        assert_eq!(pipeline.status(), PipelineStatus::Canceled);
    }
}
