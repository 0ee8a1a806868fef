//! The operator interface consumed by the node runtime and the
//! per-invocation context it receives.

use crate::error::{NodeError, OperatorError};
use crate::item::{Anchor, Item};
use async_trait::async_trait;
use serde_json::{Map, Value};
use std::sync::Arc;

/// Log level passed through `NodeContext::log`, mirrored onto `tracing`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LogLevel {
    Debug,
    Info,
    Warn,
    Error,
}

/// Context handed to an operator on every call: identity, cancellation,
/// progress/usage reporting, logging, and checkpointing.
#[async_trait]
pub trait NodeContext: Send + Sync {
    fn node_id(&self) -> &str;
    fn context_id(&self) -> &str;
    fn is_cancelled(&self) -> bool;
    async fn report_progress(&self, current: u64, total: u64);
    async fn report_usage(&self, metrics: &Map<String, Value>);
    fn log(&self, message: &str, level: LogLevel);
    async fn report_failed_items(&self, items: &[Item], error: &OperatorError);
    async fn save_checkpoint(&self);
}

/// A user-supplied processing stage. `process_batch` is required;
/// `process_item` is optional and only consulted when `supports_item`
/// returns true, enabling the node's batch/single-item adaptation (spec
/// §4.7).
#[async_trait]
pub trait Operator: Send + Sync {
    async fn process_batch(
        &self,
        items: Vec<Item>,
        ctx: &dyn NodeContext,
    ) -> Result<Vec<Item>, OperatorError>;

    /// Whether `process_item` is meaningfully implemented. Operators that
    /// only implement batch processing should leave this `false` (the
    /// default).
    fn supports_item(&self) -> bool {
        false
    }

    /// Process a single item, returning zero (`None`), one, or many
    /// results. Only called when `supports_item()` is true. `anchor` is the
    /// input item's anchor, carried along so a fan-out result can stamp a
    /// lineage field (e.g. `parent_i`) back to it — the core only threads
    /// anchors through automatically in the 1:1 case.
    async fn process_item(
        &self,
        _item: Item,
        _anchor: &Anchor,
        _ctx: &dyn NodeContext,
    ) -> Result<Option<ItemResult>, OperatorError> {
        Ok(None)
    }
}

/// Result shape of a single-item call: one result, many (fan-out), or none
/// (filtered out).
pub enum ItemResult {
    One(Item),
    Many(Vec<Item>),
}

/// Adapts a plain function into an [`Operator`] implementing only
/// `process_batch`.
pub struct FnOperator<F>(pub F);

#[async_trait]
impl<F> Operator for FnOperator<F>
where
    F: Fn(Vec<Item>, &dyn NodeContext) -> Result<Vec<Item>, OperatorError> + Send + Sync,
{
    async fn process_batch(
        &self,
        items: Vec<Item>,
        ctx: &dyn NodeContext,
    ) -> Result<Vec<Item>, OperatorError> {
        (self.0)(items, ctx)
    }
}

pub fn identity_operator() -> Arc<dyn Operator> {
    Arc::new(FnOperator(|items: Vec<Item>, _ctx: &dyn NodeContext| Ok(items)))
}

/// Surfaces a [`NodeError`] a `NodeContext` implementation might want to log
/// before propagating.
pub(crate) fn describe(err: &NodeError) -> String {
    err.to_string()
}
