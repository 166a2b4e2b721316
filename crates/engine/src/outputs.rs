//! Shared store for named step outputs.
//!
//! The store keeps two views over the same data and never unifies them:
//! a per-step view `step_id → (name → value)` and a flat alias view
//! `name → value` owned by the first step that set the name. Later steps
//! that reuse a name do not displace the alias; they are tracked as
//! conflicts and remain reachable through their step-scoped view.

use std::sync::RwLock;

use indexmap::IndexMap;
use serde_json::{Map as JsonMap, Value};

use crate::error::ProbeError;

#[derive(Debug, Default)]
struct OutputsInner {
    by_step: IndexMap<String, IndexMap<String, Value>>,
    flat: IndexMap<String, FlatAlias>,
    conflicts: IndexMap<String, Vec<String>>,
}

#[derive(Debug, Clone)]
struct FlatAlias {
    step_id: String,
    value: Value,
}

/// Thread-safe outputs store shared by every job worker of a run.
#[derive(Debug, Default)]
pub struct Outputs {
    inner: RwLock<OutputsInner>,
}

impl Outputs {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record the named outputs of a step.
    ///
    /// Fails when a flat alias with the same name as `step_id` already
    /// exists: the step-scoped view would be permanently shadowed. Repeated
    /// calls for the same step merge into its record; an alias owned by the
    /// same step is refreshed, an alias owned by another step turns the name
    /// into a conflict.
    pub fn set(&self, step_id: &str, outputs: IndexMap<String, Value>) -> Result<(), ProbeError> {
        let mut inner = self.inner.write().expect("outputs lock poisoned");

        if let Some(alias) = inner.flat.get(step_id)
            && alias.step_id != step_id
        {
            return Err(
                ProbeError::validation("outputs.set", "step id collides with an existing output name")
                    .with_context("step_id", step_id)
                    .with_context("owned_by", alias.step_id.clone()),
            );
        }

        for (name, value) in &outputs {
            let owner = inner.flat.get(name).map(|alias| alias.step_id.clone());
            match owner.as_deref() {
                Some(owner) if owner == step_id => {
                    if let Some(alias) = inner.flat.get_mut(name) {
                        alias.value = value.clone();
                    }
                }
                Some(_) => {
                    let entry = inner.conflicts.entry(name.clone()).or_default();
                    if !entry.iter().any(|existing| existing == step_id) {
                        entry.push(step_id.to_string());
                    }
                }
                None => {
                    inner.flat.insert(
                        name.clone(),
                        FlatAlias {
                            step_id: step_id.to_string(),
                            value: value.clone(),
                        },
                    );
                }
            }
        }

        inner.by_step.entry(step_id.to_string()).or_default().extend(outputs);
        Ok(())
    }

    /// Per-step outputs, if the step recorded any.
    pub fn get(&self, step_id: &str) -> Option<IndexMap<String, Value>> {
        let inner = self.inner.read().expect("outputs lock poisoned");
        inner.by_step.get(step_id).cloned()
    }

    /// Flat alias lookup.
    pub fn get_flat(&self, name: &str) -> Option<Value> {
        let inner = self.inner.read().expect("outputs lock poisoned");
        inner.flat.get(name).map(|alias| alias.value.clone())
    }

    /// Combined view: step-scoped records first, flat aliases layered on
    /// top. A flat alias whose name equals a step id shadows that step's
    /// record, per the store's precedence rule.
    pub fn get_all(&self) -> JsonMap<String, Value> {
        let inner = self.inner.read().expect("outputs lock poisoned");
        let mut combined = JsonMap::new();
        for (step_id, record) in &inner.by_step {
            let mut step_map = JsonMap::new();
            for (name, value) in record {
                step_map.insert(name.clone(), value.clone());
            }
            combined.insert(step_id.clone(), Value::Object(step_map));
        }
        for (name, alias) in &inner.flat {
            combined.insert(name.clone(), alias.value.clone());
        }
        combined
    }

    /// Names set by more than one step, with the non-owning writers.
    pub fn get_conflicts(&self) -> IndexMap<String, Vec<String>> {
        let inner = self.inner.read().expect("outputs lock poisoned");
        inner.conflicts.clone()
    }

    /// Point-in-time snapshot used as the `outputs` root in expression
    /// environments.
    pub fn snapshot(&self) -> Value {
        Value::Object(self.get_all())
    }
}
