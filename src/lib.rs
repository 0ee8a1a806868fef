//! Execution core for a streaming, record-oriented data pipeline engine.
//!
//! A pipeline is a linear chain of user-supplied [`Operator`] stages joined
//! by durable [`Stream`]s: each stage's [`Writer`] and the next stage's
//! [`Reader`] share one append-only [`storage::Storage`] log plus a
//! [`Channel`] used to tail-follow it while it is still being written.
//! [`Node`] drives one stage to completion (sequentially or with bounded
//! fan-out); [`Pipeline`] plans the topology, runs every node (sequential or
//! all-concurrent streaming mode), and supports crash-resume via [`Hooks`]
//! and the on-disk runtime/checkpoint records in [`types`].
//!
//! # Quick start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use streamforge::{FnOperator, NodeContext, Operator, OperatorError, PipelineBuilder};
//! use streamforge::item::Item;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let identity: Arc<dyn Operator> = Arc::new(FnOperator(
//!         |items: Vec<Item>, _ctx: &dyn NodeContext| -> Result<Vec<Item>, OperatorError> {
//!             Ok(items)
//!         },
//!     ));
//!
//!     let mut pipeline = PipelineBuilder::new("jsonl://in.jsonl", "jsonl://out.jsonl")
//!         .operator(identity)
//!         .create("demo")
//!         .await?;
//!
//!     pipeline.run().await?;
//!     Ok(())
//! }
//! ```

pub mod bridge;
pub mod channel;
pub mod error;
pub mod hooks;
pub mod item;
pub mod node;
pub mod operator;
pub mod pipeline;
pub mod reader;
pub mod storage;
pub mod stream;
pub mod types;
pub mod writer;

pub use channel::Channel;
pub use error::{NodeError, OperatorError, PipelineError, StorageError, StreamError};
pub use hooks::{CheckpointHooks, CompositeHooks, Hooks, InMemoryHooks, NullHooks};
pub use item::{Anchor, Item};
pub use node::{Node, NodeConfig};
pub use operator::{FnOperator, ItemResult, LogLevel, NodeContext, Operator};
pub use pipeline::{NodeSpec, Pipeline, PipelineBuilder, PipelineConfig};
pub use reader::Reader;
#[cfg(feature = "csv")]
pub use storage::CsvStorage;
pub use storage::{JsonlStorage, MemoryStorage, Storage};
pub use stream::Stream;
pub use types::{NodeRuntime, NodeStatus, PipelineRuntime, PipelineStatus, Progress, UsageMetrics};
pub use writer::{Writer, WriterConfig};
