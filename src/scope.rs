//! Scope definitions
//!
//! A scope is the declared universe of one analysis: uncertainties, levers,
//! constants and performance measures. The store keeps the full definition
//! as an opaque JSON document and separately indexes the declared names so
//! every write can be checked against them.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::StorageError;
use crate::table::Value;

/// Category of an experiment variable
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VariableKind {
    Uncertainty,
    Lever,
    Constant,
}

impl VariableKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            VariableKind::Uncertainty => "uncertainty",
            VariableKind::Lever => "lever",
            VariableKind::Constant => "constant",
        }
    }
}

impl fmt::Display for VariableKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for VariableKind {
    type Err = StorageError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "uncertainty" => Ok(VariableKind::Uncertainty),
            "lever" | "policy" => Ok(VariableKind::Lever),
            "constant" => Ok(VariableKind::Constant),
            other => Err(StorageError::invalid(format!("unknown variable kind '{}'", other))),
        }
    }
}

/// Declared value type, used when reads ask for `ensure_dtypes`
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DType {
    #[default]
    Float,
    Int,
    Bool,
    Categorical {
        #[serde(default)]
        categories: Vec<String>,
    },
}

/// Uncertainty, lever or constant declared in a scope
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VariableDecl {
    pub name: String,
    pub kind: VariableKind,
    #[serde(default)]
    pub dtype: DType,
    #[serde(default)]
    pub default: Option<Value>,
    #[serde(default)]
    pub description: String,
}

/// Performance measure declared in a scope
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MeasureDecl {
    pub name: String,
    /// Free-form grouping such as `regional`, `transit` or `corridor`
    #[serde(default)]
    pub category: String,
    #[serde(default)]
    pub dtype: DType,
    #[serde(default)]
    pub description: String,
}

/// Full scope definition as stored by `write_scope`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScopeDefinition {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub variables: Vec<VariableDecl>,
    #[serde(default)]
    pub measures: Vec<MeasureDecl>,
    #[serde(default)]
    pub metadata: serde_json::Value,
}

impl ScopeDefinition {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: String::new(),
            variables: Vec::new(),
            measures: Vec::new(),
            metadata: serde_json::Value::Null,
        }
    }

    pub fn with_variable(mut self, name: impl Into<String>, kind: VariableKind, dtype: DType) -> Self {
        self.variables.push(VariableDecl {
            name: name.into(),
            kind,
            dtype,
            default: None,
            description: String::new(),
        });
        self
    }

    pub fn with_uncertainty(self, name: impl Into<String>) -> Self {
        self.with_variable(name, VariableKind::Uncertainty, DType::Float)
    }

    pub fn with_lever(self, name: impl Into<String>) -> Self {
        self.with_variable(name, VariableKind::Lever, DType::Float)
    }

    pub fn with_constant(self, name: impl Into<String>) -> Self {
        self.with_variable(name, VariableKind::Constant, DType::Float)
    }

    pub fn with_measure(mut self, name: impl Into<String>, category: impl Into<String>) -> Self {
        self.measures.push(MeasureDecl {
            name: name.into(),
            category: category.into(),
            dtype: DType::Float,
            description: String::new(),
        });
        self
    }

    pub fn variable(&self, name: &str) -> Option<&VariableDecl> {
        self.variables.iter().find(|v| v.name == name)
    }

    pub fn measure(&self, name: &str) -> Option<&MeasureDecl> {
        self.measures.iter().find(|m| m.name == name)
    }

    /// Declared type of a variable or measure column
    pub fn dtype_of(&self, column: &str) -> Option<&DType> {
        self.variable(column)
            .map(|v| &v.dtype)
            .or_else(|| self.measure(column).map(|m| &m.dtype))
    }

    pub fn variable_names(&self) -> Vec<String> {
        self.variables.iter().map(|v| v.name.clone()).collect()
    }

    pub fn measure_names(&self) -> Vec<String> {
        self.measures.iter().map(|m| m.name.clone()).collect()
    }

    /// `(name, kind)` pairs suitable for `init_xlm`
    pub fn parameter_list(&self) -> Vec<(String, VariableKind)> {
        self.variables.iter().map(|v| (v.name.clone(), v.kind)).collect()
    }

    /// `(name, category)` pairs suitable for `init_xlm`
    pub fn measure_list(&self) -> Vec<(String, String)> {
        self.measures
            .iter()
            .map(|m| (m.name.clone(), m.category.clone()))
            .collect()
    }
}
