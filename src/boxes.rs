//! Scenario-discovery boxes
//!
//! A box restricts some variables or measures of a scope to a range or a set
//! of allowed values. Boxes may name a parent box; the store only records
//! that relation and keeps the parent graph of each scope a forest.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::error::{StorageError, StorageResult};
use crate::scope::ScopeDefinition;
use crate::table::Value;

/// Restriction on one variable or measure
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Threshold {
    Bounds {
        #[serde(default)]
        lower: Option<f64>,
        #[serde(default)]
        upper: Option<f64>,
    },
    Allowed(Vec<Value>),
}

impl Threshold {
    pub fn validate(&self, name: &str) -> StorageResult<()> {
        match self {
            Threshold::Bounds { lower: Some(lo), upper: Some(hi) } if lo > hi => Err(
                StorageError::invalid(format!("threshold '{}' has lower bound {} above upper bound {}", name, lo, hi)),
            ),
            Threshold::Bounds { lower: None, upper: None } => Err(StorageError::invalid(format!(
                "threshold '{}' has neither lower nor upper bound",
                name
            ))),
            Threshold::Allowed(values) if values.is_empty() => Err(StorageError::invalid(format!(
                "threshold '{}' allows no values",
                name
            ))),
            _ => Ok(()),
        }
    }
}

/// A named region of a scope
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScenarioBox {
    pub name: String,
    #[serde(default)]
    pub parent: Option<String>,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub thresholds: BTreeMap<String, Threshold>,
    /// Names of interest that carry no threshold
    #[serde(default)]
    pub relevant_features: BTreeSet<String>,
    /// Scope this box is bound to, if any
    #[serde(skip)]
    pub scope: Option<Arc<ScopeDefinition>>,
}

impl ScenarioBox {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            parent: None,
            description: String::new(),
            thresholds: BTreeMap::new(),
            relevant_features: BTreeSet::new(),
            scope: None,
        }
    }

    pub fn with_parent(mut self, parent: impl Into<String>) -> Self {
        self.parent = Some(parent.into());
        self
    }

    pub fn with_bounds(mut self, name: impl Into<String>, lower: Option<f64>, upper: Option<f64>) -> Self {
        self.thresholds.insert(name.into(), Threshold::Bounds { lower, upper });
        self
    }

    pub fn with_allowed(mut self, name: impl Into<String>, values: Vec<Value>) -> Self {
        self.thresholds.insert(name.into(), Threshold::Allowed(values));
        self
    }

    pub fn with_relevant(mut self, name: impl Into<String>) -> Self {
        self.relevant_features.insert(name.into());
        self
    }

    pub fn with_scope(mut self, scope: Arc<ScopeDefinition>) -> Self {
        self.scope = Some(scope);
        self
    }

    pub fn bound_scope_name(&self) -> Option<&str> {
        self.scope.as_deref().map(|s| s.name.as_str())
    }

    /// Every variable or measure name the box refers to
    pub fn referenced_names(&self) -> impl Iterator<Item = &String> {
        self.thresholds.keys().chain(self.relevant_features.iter())
    }
}

/// All boxes of one scope, keyed by name
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Boxes {
    pub scope: Option<Arc<ScopeDefinition>>,
    boxes: BTreeMap<String, ScenarioBox>,
}

impl Boxes {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_scope(scope: Arc<ScopeDefinition>) -> Self {
        Self {
            scope: Some(scope),
            boxes: BTreeMap::new(),
        }
    }

    /// Insert or replace a box by name
    pub fn insert(&mut self, b: ScenarioBox) {
        self.boxes.insert(b.name.clone(), b);
    }

    pub fn get(&self, name: &str) -> Option<&ScenarioBox> {
        self.boxes.get(name)
    }

    pub fn names(&self) -> Vec<String> {
        self.boxes.keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.boxes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.boxes.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &ScenarioBox> {
        self.boxes.values()
    }

    pub fn bound_scope_name(&self) -> Option<&str> {
        self.scope.as_deref().map(|s| s.name.as_str())
    }

    /// Children of `name`, sorted
    pub fn children(&self, name: &str) -> Vec<&str> {
        self.boxes
            .values()
            .filter(|b| b.parent.as_deref() == Some(name))
            .map(|b| b.name.as_str())
            .collect()
    }
}

/// Pick the scope a box write lands in. A bound scope wins; an explicit
/// name that disagrees with it is a conflict.
pub fn resolve_write_scope(bound: Option<&str>, explicit: Option<&str>) -> StorageResult<String> {
    match (bound, explicit) {
        (Some(b), Some(e)) if b != e => Err(StorageError::Conflict(format!(
            "box is bound to scope '{}' but scope '{}' was given",
            b, e
        ))),
        (Some(b), _) => Ok(b.to_string()),
        (None, Some(e)) => Ok(e.to_string()),
        (None, None) => Err(StorageError::invalid("no scope given for box write")),
    }
}

/// Check that every parent exists and the parent graph has no cycle
pub fn check_forest(parents: &BTreeMap<String, Option<String>>) -> StorageResult<()> {
    for (name, parent) in parents {
        if let Some(p) = parent {
            if !parents.contains_key(p) {
                return Err(StorageError::not_found(format!(
                    "parent box '{}' of box '{}'",
                    p, name
                )));
            }
        }
    }

    for start in parents.keys() {
        let mut seen = BTreeSet::new();
        let mut current = Some(start);
        while let Some(name) = current {
            if !seen.insert(name) {
                return Err(StorageError::invalid(format!(
                    "box '{}' is its own ancestor",
                    name
                )));
            }
            current = parents.get(name).and_then(|p| p.as_ref());
        }
    }
    Ok(())
}
