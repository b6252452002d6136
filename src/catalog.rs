//! Column-name → category schema check
//!
//! Both experiment and measure writes arrive as tables whose column names
//! must be declared in the owning scope. [`ScopeCatalog`] holds the declared
//! names of one scope and performs that check for every writer.

use std::collections::{BTreeMap, BTreeSet};

use crate::error::{StorageError, StorageResult};
use crate::scope::VariableKind;

/// Declared variables and measures of one stored scope
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScopeCatalog {
    pub scope_name: String,
    pub variables: BTreeMap<String, VariableKind>,
    pub measures: BTreeMap<String, String>,
}

/// Column positions of a table split by category
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ColumnPartition {
    pub variables: Vec<usize>,
    pub measures: Vec<usize>,
}

impl ScopeCatalog {
    pub fn is_variable(&self, name: &str) -> bool {
        self.variables.contains_key(name)
    }

    pub fn is_measure(&self, name: &str) -> bool {
        self.measures.contains_key(name)
    }

    /// True when `name` is any declared variable or measure
    pub fn declares(&self, name: &str) -> bool {
        self.is_variable(name) || self.is_measure(name)
    }

    pub fn variable_names(&self) -> Vec<String> {
        self.variables.keys().cloned().collect()
    }

    pub fn measure_names(&self) -> Vec<String> {
        self.measures.keys().cloned().collect()
    }

    pub fn names_of_kind(&self, kind: VariableKind) -> Vec<String> {
        self.variables
            .iter()
            .filter(|(_, k)| **k == kind)
            .map(|(name, _)| name.clone())
            .collect()
    }

    /// Check parameter columns. With `complete` every declared variable
    /// must be present; lookups pass `false` to allow partial rows.
    pub fn check_parameter_columns(&self, columns: &[String], complete: bool) -> StorageResult<()> {
        check_unique(columns)?;

        if let Some(bad) = columns.iter().find(|c| !self.is_variable(c)) {
            return Err(StorageError::invalid(format!(
                "'{}' is not a variable of scope '{}'",
                bad, self.scope_name
            )));
        }

        if complete {
            let present: BTreeSet<&str> = columns.iter().map(String::as_str).collect();
            let missing: Vec<&str> = self
                .variables
                .keys()
                .map(String::as_str)
                .filter(|v| !present.contains(v))
                .collect();
            if !missing.is_empty() {
                return Err(StorageError::invalid(format!(
                    "experiment definition for scope '{}' is missing variables: {}",
                    self.scope_name,
                    missing.join(", ")
                )));
            }
        }

        Ok(())
    }

    pub fn check_measure_columns(&self, columns: &[String]) -> StorageResult<()> {
        check_unique(columns)?;

        match columns.iter().find(|c| !self.is_measure(c)) {
            Some(bad) => Err(StorageError::invalid(format!(
                "'{}' is not a performance measure of scope '{}'",
                bad, self.scope_name
            ))),
            None => Ok(()),
        }
    }

    /// Split columns into variables and measures; any other column fails
    pub fn partition(&self, columns: &[String]) -> StorageResult<ColumnPartition> {
        check_unique(columns)?;

        let mut partition = ColumnPartition::default();
        for (idx, column) in columns.iter().enumerate() {
            if self.is_variable(column) {
                partition.variables.push(idx);
            } else if self.is_measure(column) {
                partition.measures.push(idx);
            } else {
                return Err(StorageError::invalid(format!(
                    "'{}' is neither a variable nor a measure of scope '{}'",
                    column, self.scope_name
                )));
            }
        }
        Ok(partition)
    }
}

fn check_unique(columns: &[String]) -> StorageResult<()> {
    let mut seen = BTreeSet::new();
    for column in columns {
        if !seen.insert(column.as_str()) {
            return Err(StorageError::invalid(format!("duplicate column '{}'", column)));
        }
    }
    Ok(())
}
