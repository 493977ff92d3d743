//! Per-unit inventory of discovered resources.
//!
//! Discovery populates the inventory step by step; the check runner reads
//! it back. Items keep their append order, so identical API responses
//! always produce identical result ordering.

use std::collections::BTreeMap;

use super::value::Value;

/// One discovered resource, as shaped by a step's `emit.item` templates.
pub type Item = BTreeMap<String, Value>;

/// Lifecycle of a discovery step within one scan unit.
#[derive(Debug, Clone, PartialEq)]
pub enum StepStatus {
    Pending,
    Running,
    Done,
    /// Terminal failure. Checks bound to this step report a single ERROR
    /// carrying the reason instead of silently passing on zero items.
    Error(String),
}

impl StepStatus {
    pub fn is_done(&self) -> bool {
        matches!(self, StepStatus::Done)
    }

    pub fn is_error(&self) -> bool {
        matches!(self, StepStatus::Error(_))
    }
}

static PENDING: StepStatus = StepStatus::Pending;

#[derive(Debug, Default)]
pub struct Inventory {
    items: BTreeMap<String, Vec<Item>>,
    status: BTreeMap<String, StepStatus>,
}

impl Inventory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Declare a step before execution so every status lookup is total.
    pub fn register(&mut self, discovery_id: &str) {
        self.items.entry(discovery_id.to_string()).or_default();
        self.status
            .entry(discovery_id.to_string())
            .or_insert(StepStatus::Pending);
    }

    pub fn mark_running(&mut self, discovery_id: &str) {
        self.status
            .insert(discovery_id.to_string(), StepStatus::Running);
    }

    pub fn mark_done(&mut self, discovery_id: &str) {
        self.status.insert(discovery_id.to_string(), StepStatus::Done);
    }

    pub fn mark_error(&mut self, discovery_id: &str, reason: impl Into<String>) {
        self.status
            .insert(discovery_id.to_string(), StepStatus::Error(reason.into()));
    }

    pub fn status(&self, discovery_id: &str) -> &StepStatus {
        self.status.get(discovery_id).unwrap_or(&PENDING)
    }

    pub fn extend(&mut self, discovery_id: &str, items: Vec<Item>) {
        self.items
            .entry(discovery_id.to_string())
            .or_default()
            .extend(items);
    }

    pub fn items(&self, discovery_id: &str) -> &[Item] {
        self.items
            .get(discovery_id)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    pub fn total_items(&self) -> usize {
        self.items.values().map(Vec::len).sum()
    }
}

/// Evaluation context for one item: the map `{ item: <fields> }` every
/// check condition and emit template resolves against.
pub fn item_context(item: &Item) -> Value {
    let mut context = BTreeMap::new();
    context.insert("item".to_string(), Value::Map(item.clone()));
    Value::Map(context)
}
