//! Resource attribute maps
//!
//! A declaration's attributes map string keys to either plain JSON literals
//! or deferred values, nested arbitrarily (a deferred subnet ID can sit
//! inside a list of node-pool objects). [`Attrs::join`] flattens the whole
//! tree into a single deferred JSON object once every embedded deferred
//! resolves, which is what the coordinator hands to the engine.

use serde_json::{Map, Value};

use crate::output::OutputHandle;

/// One attribute value: a literal, a deferred value, or a nested container.
#[derive(Debug, Clone)]
pub enum AttrValue {
    Literal(Value),
    Deferred(OutputHandle),
    List(Vec<AttrValue>),
    Map(Vec<(String, AttrValue)>),
}

impl AttrValue {
    /// Collect embedded deferred handles in depth-first order.
    fn collect_deferreds(&self, out: &mut Vec<OutputHandle>) {
        match self {
            AttrValue::Literal(_) => {}
            AttrValue::Deferred(handle) => out.push(handle.clone()),
            AttrValue::List(items) => {
                for item in items {
                    item.collect_deferreds(out);
                }
            }
            AttrValue::Map(entries) => {
                for (_, value) in entries {
                    value.collect_deferreds(out);
                }
            }
        }
    }

    /// Rebuild a plain JSON value, pulling resolved payloads from `resolved`
    /// in the same depth-first order used by `collect_deferreds`.
    fn rebuild(&self, resolved: &mut std::vec::IntoIter<Value>) -> Value {
        match self {
            AttrValue::Literal(v) => v.clone(),
            AttrValue::Deferred(_) => resolved.next().unwrap_or(Value::Null),
            AttrValue::List(items) => {
                Value::Array(items.iter().map(|i| i.rebuild(resolved)).collect())
            }
            AttrValue::Map(entries) => {
                let mut map = Map::new();
                for (key, value) in entries {
                    map.insert(key.clone(), value.rebuild(resolved));
                }
                Value::Object(map)
            }
        }
    }
}

impl From<Value> for AttrValue {
    fn from(value: Value) -> Self {
        AttrValue::Literal(value)
    }
}

impl From<OutputHandle> for AttrValue {
    fn from(handle: OutputHandle) -> Self {
        AttrValue::Deferred(handle)
    }
}

impl From<&OutputHandle> for AttrValue {
    fn from(handle: &OutputHandle) -> Self {
        AttrValue::Deferred(handle.clone())
    }
}

/// Ordered attribute map for a resource declaration.
///
/// Created once per declaration and never mutated afterwards, only resolved.
#[derive(Debug, Clone, Default)]
pub struct Attrs {
    entries: Vec<(String, AttrValue)>,
}

impl Attrs {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style insertion.
    pub fn set(mut self, key: impl Into<String>, value: impl Into<AttrValue>) -> Self {
        self.entries.push((key.into(), value.into()));
        self
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Every deferred value embedded anywhere in this map.
    pub fn deferreds(&self) -> Vec<OutputHandle> {
        let mut out = Vec::new();
        for (_, value) in &self.entries {
            value.collect_deferreds(&mut out);
        }
        out
    }

    /// Deferred JSON object resolving once all embedded deferreds resolve.
    ///
    /// Fails (with the originating fault) as soon as any embedded deferred
    /// fails, so dependents of the declaration fail through the graph.
    pub fn join(&self, label: impl Into<String>) -> OutputHandle {
        let deferreds = self.deferreds();
        let entries = self.entries.clone();
        OutputHandle::combine(label, &deferreds, move |values| {
            let mut resolved = values.into_iter();
            let mut map = Map::new();
            for (key, value) in &entries {
                map.insert(key.clone(), value.rebuild(&mut resolved));
            }
            Ok(Value::Object(map))
        })
    }
}
