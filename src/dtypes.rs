//! Declared-type coercion for reads that set `ensure_dtypes`
//!
//! SQLite keeps the storage class a value was written with, so a boolean
//! comes back as an integer and an integral float may have been written as
//! an integer. This pass brings every cell back to the type its scope
//! declares, failing on values that cannot represent that type.

use crate::error::{StorageError, StorageResult};
use crate::scope::{DType, ScopeDefinition};
use crate::table::{Table, Value};

/// Coerce one value to `dtype`; nulls pass through
pub fn coerce(value: &Value, dtype: &DType) -> StorageResult<Value> {
    if value.is_null() {
        return Ok(Value::Null);
    }

    let coerced = match dtype {
        DType::Float => value.as_f64().map(Value::Float).or_else(|| {
            value.as_str().and_then(|s| s.trim().parse::<f64>().ok()).map(Value::Float)
        }),
        DType::Int => match value {
            Value::Int(i) => Some(Value::Int(*i)),
            Value::Bool(b) => Some(Value::Int(*b as i64)),
            Value::Float(f) if f.fract() == 0.0 && f.is_finite() => Some(Value::Int(*f as i64)),
            Value::Text(s) => s.trim().parse::<i64>().ok().map(Value::Int),
            _ => None,
        },
        DType::Bool => match value {
            Value::Bool(b) => Some(Value::Bool(*b)),
            Value::Int(0) => Some(Value::Bool(false)),
            Value::Int(1) => Some(Value::Bool(true)),
            Value::Float(f) if *f == 0.0 || *f == 1.0 => Some(Value::Bool(*f == 1.0)),
            Value::Text(s) => match s.to_ascii_lowercase().as_str() {
                "true" => Some(Value::Bool(true)),
                "false" => Some(Value::Bool(false)),
                _ => None,
            },
            _ => None,
        },
        DType::Categorical { categories } => {
            let label = match value {
                Value::Text(s) => s.clone(),
                other => other.to_string(),
            };
            if categories.is_empty() || categories.contains(&label) {
                Some(Value::Text(label))
            } else {
                None
            }
        }
    };

    coerced.ok_or_else(|| {
        StorageError::invalid(format!("value '{}' cannot be read as {:?}", value, dtype))
    })
}

/// Coerce every column of `table` that `scope` declares a type for
pub fn ensure_dtypes(table: &mut Table, scope: &ScopeDefinition) -> StorageResult<()> {
    let typed: Vec<(usize, DType)> = table
        .columns()
        .iter()
        .enumerate()
        .filter_map(|(idx, column)| scope.dtype_of(column).map(|d| (idx, d.clone())))
        .collect();

    for row in table.rows_mut() {
        for (idx, dtype) in &typed {
            row.values[*idx] = coerce(&row.values[*idx], dtype)?;
        }
    }
    Ok(())
}
