//! Core status, progress, and runtime-record types shared across the crate.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Lifecycle status of a single node.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeStatus {
    #[default]
    Pending,
    Resuming,
    Running,
    Completed,
    Failed,
    Canceled,
}

impl fmt::Display for NodeStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            NodeStatus::Pending => "pending",
            NodeStatus::Resuming => "resuming",
            NodeStatus::Running => "running",
            NodeStatus::Completed => "completed",
            NodeStatus::Failed => "failed",
            NodeStatus::Canceled => "canceled",
        };
        f.write_str(s)
    }
}

/// Lifecycle status of an entire pipeline.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineStatus {
    #[default]
    Pending,
    Resuming,
    Running,
    Canceling,
    Canceled,
    Completed,
    Failed,
}

/// Per-node progress triple: items committed, upstream size snapshot, and
/// current status.
#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize)]
pub struct Progress {
    pub current: u64,
    pub total: u64,
    pub status: NodeStatus,
}

impl Progress {
    pub fn new() -> Self {
        Self::default()
    }

    /// Merge an incoming `(current, total)` snapshot, keeping both
    /// monotonically non-decreasing (a live upstream's size only grows; an
    /// at-most-once reader's committed offset only grows).
    pub fn advance(&mut self, current: u64, total: u64) {
        if current > self.current {
            self.current = current;
        }
        if total > self.total {
            self.total = total;
        }
        if self.current > self.total {
            self.total = self.current;
        }
    }
}

/// Free-form usage metrics (LLM token counts, cost, etc.) aggregated across
/// a node's lifetime. Well-known keys get dedicated accumulation; everything
/// else is summed blindly as long as it is numeric.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct UsageMetrics {
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
    pub total_tokens: u64,
    #[serde(flatten)]
    pub other: std::collections::BTreeMap<String, f64>,
}

impl UsageMetrics {
    pub fn accumulate(&mut self, metrics: &serde_json::Map<String, serde_json::Value>) {
        let as_u64 = |v: &serde_json::Value| v.as_u64().or_else(|| v.as_f64().map(|f| f as u64));

        let prompt = metrics.get("prompt_tokens").and_then(as_u64).unwrap_or(0);
        let completion = metrics
            .get("completion_tokens")
            .and_then(as_u64)
            .unwrap_or(0);
        let total = metrics
            .get("total_tokens")
            .and_then(as_u64)
            .unwrap_or(prompt + completion);

        self.prompt_tokens += prompt;
        self.completion_tokens += completion;
        self.total_tokens += total;

        for (key, value) in metrics {
            if matches!(
                key.as_str(),
                "prompt_tokens" | "completion_tokens" | "total_tokens" | "provider" | "model"
            ) {
                continue;
            }
            if let Some(n) = value.as_f64() {
                *self.other.entry(key.clone()).or_insert(0.0) += n;
            }
        }
    }
}

/// The full tuple needed to rehydrate a node after restart.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct NodeRuntime {
    pub node_id: String,
    pub input_uri: String,
    pub output_uri: String,
    pub batch_size: usize,
    pub parallel_size: usize,
    pub progress: Progress,
    pub status: NodeStatus,
    pub base_path: String,
    pub protocol_prefix: String,
}

/// The full tuple needed to rehydrate a pipeline after restart.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PipelineRuntime {
    pub pipeline_id: String,
    pub streaming: bool,
    pub input_uri: String,
    pub output_uri: String,
    pub default_protocol: String,
    pub base_path: String,
    pub protocol_prefix: String,
    pub nodes: Vec<NodeRuntime>,
}
