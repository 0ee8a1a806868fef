//! Per-stage runtime: binds a Reader+Writer pair, drives a user [`Operator`]
//! over successive batches, and reports a moving checkpoint.
//! The sequential and bounded-parallel variants share the same open/run/close
//! contract; `parallel_size` selects between them.

use crate::channel::Channel;
use crate::error::{NodeError, OperatorError, StreamError};
use crate::item::{Anchor, Item};
use crate::operator::{ItemResult, LogLevel, NodeContext, Operator};
use crate::reader::Reader;
use crate::stream::Stream;
use crate::types::{NodeRuntime, NodeStatus, Progress};
use crate::writer::{Writer, WriterConfig};
use crate::Hooks;
use futures::stream::{self, StreamExt};
use serde_json::{Map, Value};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;

/// Tuning knobs for a single node.
#[derive(Clone)]
pub struct NodeConfig {
    pub batch_size: usize,
    pub parallel_size: usize,
    pub read_timeout: Duration,
    pub writer_config: WriterConfig,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            batch_size: 50,
            parallel_size: 1,
            read_timeout: Duration::from_millis(500),
            writer_config: WriterConfig::default(),
        }
    }
}

impl NodeConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn batch_size(mut self, n: usize) -> Self {
        self.batch_size = n.max(1);
        self
    }

    pub fn parallel_size(mut self, n: usize) -> Self {
        self.parallel_size = n.max(1);
        self
    }

    pub fn read_timeout(mut self, d: Duration) -> Self {
        self.read_timeout = d;
        self
    }

    pub fn writer_config(mut self, w: WriterConfig) -> Self {
        self.writer_config = w;
        self
    }
}

/// `NodeContext` implementation handed to the operator on every call. Cheap
/// to clone: every field is an `Arc` or atomic shared with the owning
/// [`Node`].
#[derive(Clone)]
struct RunningContext {
    node_id: Arc<str>,
    context_id: Arc<str>,
    hooks: Arc<dyn Hooks>,
    cancel: Arc<AtomicBool>,
    progress: Arc<parking_lot::Mutex<Progress>>,
    pipeline_id: Arc<str>,
}

#[async_trait::async_trait]
impl NodeContext for RunningContext {
    fn node_id(&self) -> &str {
        &self.node_id
    }

    fn context_id(&self) -> &str {
        &self.context_id
    }

    fn is_cancelled(&self) -> bool {
        self.cancel.load(Ordering::Acquire)
    }

    async fn report_progress(&self, current: u64, total: u64) {
        self.hooks.on_node_progress(&self.node_id, current, total).await;
    }

    async fn report_usage(&self, metrics: &Map<String, Value>) {
        self.hooks.on_usage(&self.node_id, metrics).await;
    }

    fn log(&self, message: &str, level: LogLevel) {
        self.hooks.on_log(message, level);
    }

    async fn report_failed_items(&self, items: &[Item], error: &OperatorError) {
        tracing::warn!(
            node_id = %self.node_id,
            count = items.len(),
            error = %error,
            "operator reported failed items"
        );
    }

    async fn save_checkpoint(&self) {
        let snapshot = *self.progress.lock();
        self.hooks
            .on_checkpoint(&self.pipeline_id, &self.node_id, snapshot)
            .await;
    }
}

/// One stage of a pipeline: binds one input [`Stream`] and one output
/// [`Stream`], runs a user [`Operator`] over batches pulled from the input,
/// and writes results to the output while advancing a checkpoint.
pub struct Node {
    node_id: String,
    pipeline_id: String,
    input_uri: String,
    output_uri: String,
    input_stream: Option<Arc<Stream>>,
    output_stream: Option<Arc<Stream>>,
    operator: Arc<dyn Operator>,
    config: NodeConfig,
    hooks: Arc<dyn Hooks>,
    status: parking_lot::Mutex<NodeStatus>,
    progress: Arc<parking_lot::Mutex<Progress>>,
    cancel: Arc<AtomicBool>,
    reader: Option<Reader>,
    writer: Option<Arc<Writer>>,
    base_path: String,
    protocol_prefix: String,
}

impl Node {
    pub fn new(
        node_id: impl Into<String>,
        pipeline_id: impl Into<String>,
        operator: Arc<dyn Operator>,
        config: NodeConfig,
        hooks: Arc<dyn Hooks>,
    ) -> Self {
        Self {
            node_id: node_id.into(),
            pipeline_id: pipeline_id.into(),
            input_uri: String::new(),
            output_uri: String::new(),
            input_stream: None,
            output_stream: None,
            operator,
            config,
            hooks,
            status: parking_lot::Mutex::new(NodeStatus::Pending),
            progress: Arc::new(parking_lot::Mutex::new(Progress::new())),
            cancel: Arc::new(AtomicBool::new(false)),
            reader: None,
            writer: None,
            base_path: String::new(),
            protocol_prefix: String::new(),
        }
    }

    pub fn node_id(&self) -> &str {
        &self.node_id
    }

    pub fn input_uri(&self) -> &str {
        &self.input_uri
    }

    pub fn output_uri(&self) -> &str {
        &self.output_uri
    }

    pub fn status(&self) -> NodeStatus {
        *self.status.lock()
    }

    pub fn get_progress(&self) -> Progress {
        *self.progress.lock()
    }

    /// Attach the shared streams this node reads from and writes to. Also
    /// records the URIs/base_path/protocol_prefix so the node can rehydrate
    /// its runtime record after a restart.
    pub fn bind_io(
        &mut self,
        input: Arc<Stream>,
        output: Arc<Stream>,
        base_path: impl Into<String>,
        protocol_prefix: impl Into<String>,
    ) {
        self.input_uri = input.uri().to_string();
        self.output_uri = output.uri().to_string();
        self.base_path = base_path.into();
        self.protocol_prefix = protocol_prefix.into();
        self.input_stream = Some(input);
        self.output_stream = Some(output);
    }

    pub fn set_operator(&mut self, operator: Arc<dyn Operator>) {
        self.operator = operator;
    }

    /// Idempotent; safe to call from any thread while the node is running.
    pub fn cancel(&self) {
        self.cancel.store(true, Ordering::Release);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.load(Ordering::Acquire)
    }

    /// A clone of this node's cancellation flag, usable to cancel it from
    /// outside while it runs on a separate task (the pipeline's streaming
    /// engine holds one per node for exactly this reason).
    pub fn cancel_handle(&self) -> Arc<AtomicBool> {
        self.cancel.clone()
    }

    fn streams(&self) -> Result<(&Arc<Stream>, &Arc<Stream>), NodeError> {
        match (&self.input_stream, &self.output_stream) {
            (Some(i), Some(o)) => Ok((i, o)),
            _ => Err(NodeError::NotBound),
        }
    }

    fn make_context(&self) -> RunningContext {
        RunningContext {
            node_id: self.node_id.as_str().into(),
            context_id: format!("{}/{}", self.pipeline_id, self.node_id).into(),
            hooks: self.hooks.clone(),
            cancel: self.cancel.clone(),
            progress: self.progress.clone(),
            pipeline_id: self.pipeline_id.as_str().into(),
        }
    }

    async fn advance_progress(&self, current: u64, total: u64) {
        {
            let mut progress = self.progress.lock();
            progress.advance(current, total);
            progress.status = *self.status.lock();
        }
        let snapshot = *self.progress.lock();
        self.hooks
            .on_node_progress(&self.node_id, snapshot.current, snapshot.total)
            .await;
    }

    /// Open the node for execution: unseal the output if resuming an
    /// unfinished run, bind a reader/writer pair, and snapshot the initial
    /// total. No-op (beyond a progress report) if the node already finished.
    pub async fn open(&mut self, resume_progress: Option<Progress>) -> Result<(), NodeError> {
        let already_done = {
            let mut status = self.status.lock();
            let done = matches!(*status, NodeStatus::Completed | NodeStatus::Canceled);
            if !done {
                *status = NodeStatus::Running;
            }
            done
        };

        let (input, output) = self.streams()?;
        if !already_done {
            output.unseal().await?;
        }

        let reader = input.get_reader(resume_progress).await?;
        let writer = output.get_writer(self.config.writer_config.clone()).await?;
        let total = reader.total_count().await?;
        let current = resume_progress.map(|p| p.current).unwrap_or(0);

        self.reader = Some(reader);
        self.writer = Some(Arc::new(writer));
        self.advance_progress(current, total).await;
        Ok(())
    }

    /// Drive the node to completion: pull batches until the input stream is
    /// sealed and drained, invoking the operator and writing results for
    /// each. Delegates to the sequential or bounded-parallel loop based on
    /// `parallel_size`.
    pub async fn run(&mut self) -> Result<(), NodeError> {
        self.hooks.on_node_start(&self.node_id).await;

        let result = if self.config.parallel_size > 1 {
            self.run_parallel().await
        } else {
            self.run_sequential().await
        };

        if let Err(err) = &result {
            if !matches!(err, NodeError::Cancelled) {
                *self.status.lock() = NodeStatus::Failed;
                self.hooks.on_node_error(&self.node_id, &err.to_string()).await;
                self.make_context().save_checkpoint().await;
            }
        }
        result
    }

    async fn run_sequential(&mut self) -> Result<(), NodeError> {
        let operator = self.operator.clone();
        let batch_size = self.config.batch_size;
        loop {
            if self.is_cancelled() {
                return Err(NodeError::Cancelled);
            }

            let timeout = self.config.read_timeout;
            let reader = self.reader.as_mut().ok_or(NodeError::NotBound)?;
            let Some((items, anchors)) = reader.read(batch_size, timeout).await.map_err(StreamError::from)? else {
                break;
            };

            let current = reader.completed_count();
            let total = reader.total_count().await.map_err(StreamError::from)?;
            self.advance_progress(current, total).await;
            self.make_context().save_checkpoint().await;

            let ctx = self.make_context();
            let results = dispatch_operator(&*operator, items, &anchors, batch_size, &ctx).await?;
            if let (Some(writer), false) = (&self.writer, results.is_empty()) {
                let anchors_out = map_anchors(&results, &anchors);
                let values = results.into_iter().map(Value::Object).collect();
                writer.write(values, anchors_out).await.map_err(StreamError::from)?;
            }
        }

        let (current, total) = {
            let p = *self.progress.lock();
            (p.current.max(p.total), p.total.max(p.current))
        };
        self.advance_progress(current, total).await;
        Ok(())
    }

    async fn run_parallel(&mut self) -> Result<(), NodeError> {
        let semaphore = Arc::new(Semaphore::new(self.config.parallel_size));
        let mut tasks: JoinSet<Result<(), NodeError>> = JoinSet::new();
        let batch_size = self.config.batch_size;

        let drained = loop {
            if self.is_cancelled() {
                break Err(NodeError::Cancelled);
            }

            let timeout = self.config.read_timeout;
            let reader = self.reader.as_mut().ok_or(NodeError::NotBound)?;
            let next = reader.read(batch_size, timeout).await.map_err(StreamError::from)?;
            let Some((items, anchors)) = next else {
                break Ok(());
            };

            // Commit the offset before dispatch, not completion: the
            // chosen at-most-once gap on parallel nodes. A task that panics
            // mid-flight leaves its items read-but-unwritten, never
            // reprocessed.
            let current = reader.completed_count();
            let total = reader.total_count().await.map_err(StreamError::from)?;
            self.advance_progress(current, total).await;
            self.make_context().save_checkpoint().await;

            let permit = semaphore.clone().acquire_owned().await.expect("semaphore not closed");
            let operator = self.operator.clone();
            let writer = self.writer.clone();
            let ctx = self.make_context();

            let anchors_for_dispatch = anchors.clone();
            tasks.spawn(async move {
                let _permit = permit;
                let results =
                    dispatch_operator(&*operator, items, &anchors_for_dispatch, batch_size, &ctx).await?;
                if let (Some(writer), false) = (&writer, results.is_empty()) {
                    let anchors_out = map_anchors(&results, &anchors);
                    let values = results.into_iter().map(Value::Object).collect();
                    writer
                        .write(values, anchors_out)
                        .await
                        .map_err(StreamError::from)?;
                }
                Ok(())
            });

            // Reap already-finished tasks so failures surface promptly
            // without blocking on the semaphore alone.
            while let Some(joined) = tasks.try_join_next() {
                joined.map_err(|_| NodeError::NotBound)??;
            }
        };

        while let Some(joined) = tasks.join_next().await {
            joined.map_err(|_| NodeError::NotBound)??;
        }
        drained?;

        let (current, total) = {
            let p = *self.progress.lock();
            (p.current.max(p.total), p.total.max(p.current))
        };
        self.advance_progress(current, total).await;
        Ok(())
    }

    /// Close the reader/writer side and finalize the node's status.
    /// `writer.close()` seals the output so a downstream follower terminates.
    pub async fn close(&mut self) -> Result<(), NodeError> {
        self.reader = None;
        if let Some(writer) = self.writer.take() {
            writer.close().await.map_err(StreamError::from)?;
        }

        let final_status = {
            let mut status = self.status.lock();
            *status = if self.is_cancelled() {
                NodeStatus::Canceled
            } else if *status == NodeStatus::Running {
                NodeStatus::Completed
            } else {
                *status
            };
            *status
        };

        {
            let mut progress = self.progress.lock();
            if final_status == NodeStatus::Completed {
                let done = progress.current.max(progress.total);
                progress.current = done;
                progress.total = done;
            }
            progress.status = final_status;
        }

        let snapshot = *self.progress.lock();
        self.hooks
            .on_node_progress(&self.node_id, snapshot.current, snapshot.total)
            .await;
        if final_status == NodeStatus::Completed {
            self.hooks.on_node_finish(&self.node_id).await;
        }
        Ok(())
    }

    pub fn get_runtime(&self) -> NodeRuntime {
        NodeRuntime {
            node_id: self.node_id.clone(),
            input_uri: self.input_uri.clone(),
            output_uri: self.output_uri.clone(),
            batch_size: self.config.batch_size,
            parallel_size: self.config.parallel_size,
            progress: *self.progress.lock(),
            status: *self.status.lock(),
            base_path: self.base_path.clone(),
            protocol_prefix: self.protocol_prefix.clone(),
        }
    }

    /// Rehydrate status/progress from a previously persisted runtime record.
    /// Does not rebind streams; the caller re-resolves `input_uri`/
    /// `output_uri` and calls [`Node::bind_io`] separately.
    pub fn resume_from_runtime(&mut self, runtime: &NodeRuntime) {
        *self.status.lock() = runtime.status;
        *self.progress.lock() = runtime.progress;
        self.config.batch_size = runtime.batch_size;
        self.config.parallel_size = runtime.parallel_size;
        self.base_path = runtime.base_path.clone();
        self.protocol_prefix = runtime.protocol_prefix.clone();
    }
}

/// Drop the surviving `(result, anchor)` pairing only when counts line up
/// 1:1; a filter or fan-out changes item count, so lineage then relies on
/// whatever the operator itself embedded in the payload (e.g. `parent_i`).
fn map_anchors(results: &[Item], anchors: &[Anchor]) -> Vec<Option<Anchor>> {
    if results.len() == anchors.len() {
        anchors.iter().cloned().map(Some).collect()
    } else {
        Vec::new()
    }
}

/// Operator adaptation: call `process_batch` directly unless the operator
/// only meaningfully implements `process_item`, in which case fan
/// out within the batch with concurrency bounded by `batch_size` and
/// flatten: single results kept, list results spread (1:N), nulls dropped
/// (filter). `buffered` preserves submission order across the fan-out.
async fn dispatch_operator(
    operator: &dyn Operator,
    items: Vec<Item>,
    anchors: &[Anchor],
    batch_size: usize,
    ctx: &dyn NodeContext,
) -> Result<Vec<Item>, OperatorError> {
    if !operator.supports_item() {
        return operator.process_batch(items, ctx).await;
    }

    let concurrency = batch_size.max(1);
    let paired = items.into_iter().zip(anchors.iter().cloned());
    let outcomes: Vec<Result<Option<ItemResult>, OperatorError>> = stream::iter(paired)
        .map(|(item, anchor)| async move { operator.process_item(item, &anchor, ctx).await })
        .buffered(concurrency)
        .collect()
        .await;

    let mut out = Vec::new();
    for outcome in outcomes {
        match outcome? {
            None => {}
            Some(ItemResult::One(item)) => out.push(item),
            Some(ItemResult::Many(items)) => out.extend(items),
        }
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hooks::NullHooks;
    use crate::operator::FnOperator;

    fn item(n: i64) -> Item {
        let mut m = Item::new();
        m.insert("n".into(), n.into());
        m
    }

    async fn make_streams(dir: &std::path::Path) -> (Arc<Stream>, Arc<Stream>) {
        let in_uri = format!("jsonl://{}/in", dir.display());
        let out_uri = format!("jsonl://{}/out", dir.display());
        let input = Arc::new(Stream::create(&in_uri, "jsonl", None).await.unwrap());
        let output = Arc::new(Stream::create(&out_uri, "jsonl", None).await.unwrap());
        (input, output)
    }

    #[tokio::test]
    async fn identity_node_copies_all_items() {
        let dir = tempfile::tempdir().unwrap();
        let (input, output) = make_streams(dir.path()).await;

        let writer = input.get_writer(WriterConfig::default()).await.unwrap();
        writer
            .write(
                (0..5).map(|n| Value::Object(item(n))).collect(),
                vec![],
            )
            .await
            .unwrap();
        writer.close().await.unwrap();

        let op: Arc<dyn Operator> = Arc::new(FnOperator(|items, _ctx: &dyn NodeContext| Ok(items)));
        let mut node = Node::new("n0", "p0", op, NodeConfig::default(), Arc::new(NullHooks));
        node.bind_io(input, output.clone(), "", "");

        node.open(None).await.unwrap();
        node.run().await.unwrap();
        node.close().await.unwrap();

        assert_eq!(node.status(), NodeStatus::Completed);
        assert_eq!(node.get_progress().current, 5);

        let out_items = output.size().await.unwrap();
        assert_eq!(out_items, 5);
    }

    #[tokio::test]
    async fn filter_operator_drops_items_and_breaks_anchor_passthrough() {
        let dir = tempfile::tempdir().unwrap();
        let (input, output) = make_streams(dir.path()).await;

        let writer = input.get_writer(WriterConfig::default()).await.unwrap();
        writer
            .write((0..4).map(|n| Value::Object(item(n))).collect(), vec![])
            .await
            .unwrap();
        writer.close().await.unwrap();

        let op: Arc<dyn Operator> = Arc::new(FnOperator(|items: Vec<Item>, _ctx: &dyn NodeContext| {
            Ok(items
                .into_iter()
                .filter(|i| i["n"].as_i64().unwrap() % 2 == 0)
                .collect())
        }));
        let mut node = Node::new("n0", "p0", op, NodeConfig::default(), Arc::new(NullHooks));
        node.bind_io(input, output.clone(), "", "");
        node.open(None).await.unwrap();
        node.run().await.unwrap();
        node.close().await.unwrap();

        assert_eq!(output.size().await.unwrap(), 2);
    }

    #[tokio::test]
    async fn cancel_stops_sequential_run_between_batches() {
        let dir = tempfile::tempdir().unwrap();
        let (input, output) = make_streams(dir.path()).await;

        let writer = input.get_writer(WriterConfig::default()).await.unwrap();
        writer
            .write((0..10).map(|n| Value::Object(item(n))).collect(), vec![])
            .await
            .unwrap();
        writer.close().await.unwrap();

        let op: Arc<dyn Operator> = Arc::new(FnOperator(|items, _ctx: &dyn NodeContext| Ok(items)));
        let config = NodeConfig::default().batch_size(2);
        let mut node = Node::new("n0", "p0", op, config, Arc::new(NullHooks));
        node.bind_io(input, output, "", "");
        node.open(None).await.unwrap();
        node.cancel();

        let result = node.run().await;
        assert!(matches!(result, Err(NodeError::Cancelled)));
    }

    struct UpperOperator;

    #[async_trait::async_trait]
    impl Operator for UpperOperator {
        async fn process_batch(
            &self,
            items: Vec<Item>,
            _ctx: &dyn NodeContext,
        ) -> Result<Vec<Item>, OperatorError> {
            Ok(items)
        }

        fn supports_item(&self) -> bool {
            true
        }

        async fn process_item(
            &self,
            item: Item,
            anchor: &Anchor,
            _ctx: &dyn NodeContext,
        ) -> Result<Option<ItemResult>, OperatorError> {
            let mut out = item.clone();
            if let Some(Value::String(s)) = item.get("word") {
                out.insert("word".into(), Value::String(s.to_uppercase()));
            }
            out.insert("parent_i".into(), Value::String(anchor.clone()));
            Ok(Some(ItemResult::One(out)))
        }
    }

    /// Explodes a `{"text": "a b c"}` item into one output item per word,
    /// each stamped with `parent_i` from the input item's anchor.
    struct ExplodeWordsOperator;

    #[async_trait::async_trait]
    impl Operator for ExplodeWordsOperator {
        async fn process_batch(
            &self,
            items: Vec<Item>,
            _ctx: &dyn NodeContext,
        ) -> Result<Vec<Item>, OperatorError> {
            Ok(items)
        }

        fn supports_item(&self) -> bool {
            true
        }

        async fn process_item(
            &self,
            item: Item,
            anchor: &Anchor,
            _ctx: &dyn NodeContext,
        ) -> Result<Option<ItemResult>, OperatorError> {
            let Some(Value::String(text)) = item.get("text") else {
                return Ok(None);
            };
            let words: Vec<Item> = text
                .split_whitespace()
                .map(|w| {
                    let mut out = Item::new();
                    out.insert("word".into(), Value::String(w.to_string()));
                    out.insert("parent_i".into(), Value::String(anchor.clone()));
                    out
                })
                .collect();
            Ok(Some(ItemResult::Many(words)))
        }
    }

    #[tokio::test]
    async fn per_item_fan_out_preserves_order() {
        let dir = tempfile::tempdir().unwrap();
        let (input, output) = make_streams(dir.path()).await;

        let writer = input.get_writer(WriterConfig::default()).await.unwrap();
        let words: Vec<Value> = ["a", "b", "c"]
            .iter()
            .map(|w| {
                let mut m = Item::new();
                m.insert("word".into(), Value::String(w.to_string()));
                Value::Object(m)
            })
            .collect();
        writer.write(words, vec![]).await.unwrap();
        writer.close().await.unwrap();

        let op: Arc<dyn Operator> = Arc::new(UpperOperator);
        let mut node = Node::new("n0", "p0", op, NodeConfig::default(), Arc::new(NullHooks));
        node.bind_io(input, output.clone(), "", "");
        node.open(None).await.unwrap();
        node.run().await.unwrap();
        node.close().await.unwrap();

        let reader_storage = output.size().await.unwrap();
        assert_eq!(reader_storage, 3);
    }

    #[tokio::test]
    async fn fan_out_stamps_parent_anchor_on_each_exploded_item() {
        let dir = tempfile::tempdir().unwrap();
        let (input, output) = make_streams(dir.path()).await;

        let writer = input.get_writer(WriterConfig::default()).await.unwrap();
        let sentences: Vec<Value> = ["hello world", "a b c"]
            .iter()
            .map(|s| {
                let mut m = Item::new();
                m.insert("text".into(), Value::String(s.to_string()));
                Value::Object(m)
            })
            .collect();
        writer.write(sentences, vec![]).await.unwrap();
        writer.close().await.unwrap();

        let op: Arc<dyn Operator> = Arc::new(ExplodeWordsOperator);
        let mut node = Node::new("n0", "p0", op, NodeConfig::default(), Arc::new(NullHooks));
        node.bind_io(input, output.clone(), "", "");
        node.open(None).await.unwrap();
        node.run().await.unwrap();
        node.close().await.unwrap();

        // 2 words + 3 words = 5 exploded records, more than the 2 input
        // sentences.
        assert_eq!(output.size().await.unwrap(), 5);

        let mut reader = output.get_reader(None).await.unwrap();
        let (records, _anchors) = reader
            .read(10, Duration::from_millis(50))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(records[0]["parent_i"], "auto_0");
        assert_eq!(records[1]["parent_i"], "auto_0");
        assert_eq!(records[2]["parent_i"], "auto_1");
        assert_eq!(records[3]["parent_i"], "auto_1");
        assert_eq!(records[4]["parent_i"], "auto_1");
    }

    #[tokio::test]
    async fn parallel_size_one_is_observationally_equivalent_to_sequential() {
        let dir = tempfile::tempdir().unwrap();
        let (input, output) = make_streams(dir.path()).await;

        let writer = input.get_writer(WriterConfig::default()).await.unwrap();
        writer
            .write((0..6).map(|n| Value::Object(item(n))).collect(), vec![])
            .await
            .unwrap();
        writer.close().await.unwrap();

        let op: Arc<dyn Operator> = Arc::new(FnOperator(|items, _ctx: &dyn NodeContext| Ok(items)));
        let config = NodeConfig::default().parallel_size(1).batch_size(2);
        let mut node = Node::new("n0", "p0", op, config, Arc::new(NullHooks));
        node.bind_io(input, output.clone(), "", "");
        node.open(None).await.unwrap();
        node.run().await.unwrap();
        node.close().await.unwrap();

        assert_eq!(output.size().await.unwrap(), 6);
        assert_eq!(node.get_progress().current, 6);
    }

    #[tokio::test]
    async fn parallel_node_processes_all_batches_out_of_order_allowed() {
        let dir = tempfile::tempdir().unwrap();
        let (input, output) = make_streams(dir.path()).await;

        let writer = input.get_writer(WriterConfig::default()).await.unwrap();
        writer
            .write((0..40).map(|n| Value::Object(item(n))).collect(), vec![])
            .await
            .unwrap();
        writer.close().await.unwrap();

        let op: Arc<dyn Operator> = Arc::new(FnOperator(|items: Vec<Item>, _ctx: &dyn NodeContext| {
            Ok(items)
        }));
        let config = NodeConfig::default().parallel_size(4).batch_size(5);
        let mut node = Node::new("n0", "p0", op, config, Arc::new(NullHooks));
        node.bind_io(input, output.clone(), "", "");
        node.open(None).await.unwrap();
        node.run().await.unwrap();
        node.close().await.unwrap();

        assert_eq!(output.size().await.unwrap(), 40);
        assert_eq!(node.status(), NodeStatus::Completed);
    }

    #[tokio::test]
    async fn empty_input_completes_with_zero_progress() {
        let dir = tempfile::tempdir().unwrap();
        let (input, output) = make_streams(dir.path()).await;
        input.seal().await.unwrap();

        let op: Arc<dyn Operator> = Arc::new(FnOperator(|items, _ctx: &dyn NodeContext| Ok(items)));
        let mut node = Node::new("n0", "p0", op, NodeConfig::default(), Arc::new(NullHooks));
        node.bind_io(input, output, "", "");
        node.open(None).await.unwrap();
        node.run().await.unwrap();
        node.close().await.unwrap();

        let progress = node.get_progress();
        assert_eq!(progress.current, 0);
        assert_eq!(progress.total, 0);
        assert_eq!(node.status(), NodeStatus::Completed);
    }

    #[tokio::test]
    async fn resume_from_runtime_restores_progress_and_config() {
        let op: Arc<dyn Operator> = Arc::new(FnOperator(|items, _ctx: &dyn NodeContext| Ok(items)));
        let mut node = Node::new("n0", "p0", op, NodeConfig::default(), Arc::new(NullHooks));
        let runtime = NodeRuntime {
            node_id: "n0".into(),
            input_uri: "jsonl://in".into(),
            output_uri: "jsonl://out".into(),
            batch_size: 7,
            parallel_size: 3,
            progress: Progress {
                current: 15,
                total: 40,
                status: NodeStatus::Running,
            },
            status: NodeStatus::Resuming,
            base_path: "work".into(),
            protocol_prefix: "p0".into(),
        };
        node.resume_from_runtime(&runtime);

        assert_eq!(node.status(), NodeStatus::Resuming);
        assert_eq!(node.get_progress().current, 15);
        assert_eq!(node.config.batch_size, 7);
    }
}
