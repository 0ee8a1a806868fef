//! The item envelope and anchor identity that flows through the pipeline.

use serde_json::{Map, Value};

/// The reserved envelope key holding an item's anchor.
pub const ANCHOR_KEY: &str = "_i";

/// An opaque record: a string-keyed, JSON-valued map.
pub type Item = Map<String, Value>;

/// A per-item identifier chosen by the writer, either supplied by the
/// producer or auto-assigned from the item's absolute offset in storage.
pub type Anchor = String;

/// Format the auto-assigned anchor for an item written at `absolute_offset`.
pub fn auto_anchor(absolute_offset: u64) -> Anchor {
    format!("auto_{absolute_offset}")
}

/// Wrap `item` with its anchor under [`ANCHOR_KEY`], producing the on-disk
/// envelope. Non-map items (handled upstream by the writer) are never passed
/// here; this only mutates/returns proper JSON objects.
pub fn envelope(mut item: Item, anchor: &Anchor) -> Item {
    item.insert(ANCHOR_KEY.to_string(), Value::String(anchor.clone()));
    item
}

/// Unwrap an on-disk envelope into its anchor and payload, tolerating a
/// missing `_i` (the fallback anchor is the physical absolute offset).
pub fn unwrap_envelope(mut record: Item, fallback_offset: u64) -> (Anchor, Item) {
    let anchor = match record.remove(ANCHOR_KEY) {
        Some(Value::String(s)) => s,
        _ => auto_anchor(fallback_offset),
    };
    (anchor, record)
}

/// Wrap a non-map value (the writer accepts any JSON-serializable item, but
/// the envelope format requires an object) as `{_i, data}`.
pub fn wrap_non_map(value: Value, anchor: &Anchor) -> Item {
    let mut envelope = Map::new();
    envelope.insert(ANCHOR_KEY.to_string(), Value::String(anchor.clone()));
    envelope.insert("data".to_string(), value);
    envelope
}
