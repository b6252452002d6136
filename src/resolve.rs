//! "Use the only one stored, else fail" lookup policy
//!
//! Measure reads may omit the source and metamodel reads may omit the id.
//! Both resolve the omitted key the same way: nothing stored gives `None`,
//! exactly one distinct candidate is used, more than one is ambiguous.

use std::collections::BTreeSet;
use std::fmt::Display;

use crate::error::{StorageError, StorageResult};

/// Resolve a single distinct value from `candidates`
pub fn resolve_singleton<T, I>(candidates: I, what: &str) -> StorageResult<Option<T>>
where
    T: Ord + Display,
    I: IntoIterator<Item = T>,
{
    let mut distinct: BTreeSet<T> = candidates.into_iter().collect();
    match distinct.len() {
        0 => Ok(None),
        1 => Ok(distinct.pop_first()),
        _ => {
            let listed: Vec<String> = distinct.iter().map(ToString::to_string).collect();
            Err(StorageError::AmbiguousSource(format!(
                "no {} given and several are stored: {}",
                what,
                listed.join(", ")
            )))
        }
    }
}

/// Use `explicit` when given, otherwise resolve from `candidates`
pub fn resolve_or_infer<T, I>(explicit: Option<T>, candidates: I, what: &str) -> StorageResult<Option<T>>
where
    T: Ord + Display,
    I: IntoIterator<Item = T>,
{
    match explicit {
        Some(value) => Ok(Some(value)),
        None => resolve_singleton(candidates, what),
    }
}
