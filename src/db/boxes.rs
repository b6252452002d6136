//! Scenario-discovery box operations

use std::collections::{BTreeMap, BTreeSet};

use rusqlite::{params, Connection, OptionalExtension, Row};
use tracing::info;

use crate::boxes::{check_forest, ScenarioBox, Threshold};
use crate::catalog::ScopeCatalog;
use crate::error::{StorageError, StorageResult};

use super::scopes;

struct BoxRow {
    name: String,
    parent: Option<String>,
    description: String,
    relevant_json: String,
}

impl BoxRow {
    fn from_row(row: &Row) -> Result<Self, rusqlite::Error> {
        Ok(Self {
            name: row.get("name")?,
            parent: row.get("parent_name")?,
            description: row.get("description")?,
            relevant_json: row.get("relevant_json")?,
        })
    }
}

fn check_references(catalog: &ScopeCatalog, b: &ScenarioBox) -> StorageResult<()> {
    if b.name.is_empty() {
        return Err(StorageError::invalid("box name is empty"));
    }
    if let Some(bad) = b.referenced_names().find(|n| !catalog.declares(n)) {
        return Err(StorageError::invalid(format!(
            "box '{}' refers to '{}', which scope '{}' does not declare",
            b.name, bad, catalog.scope_name
        )));
    }
    for (name, threshold) in &b.thresholds {
        threshold.validate(name)?;
    }
    Ok(())
}

/// Insert or overwrite boxes, then check the scope's parent graph
pub fn write_boxes(conn: &mut Connection, scope_name: &str, boxes: &[&ScenarioBox]) -> StorageResult<()> {
    let tx = conn.transaction()?;

    let scope_id = scopes::scope_id(&tx, scope_name)?;
    let catalog = scopes::load_catalog(&tx, scope_id, scope_name)?;

    for b in boxes {
        check_references(&catalog, b)?;

        tx.execute(
            "INSERT INTO boxes (scope_id, name, parent_name, description, relevant_json) VALUES (?, ?, ?, ?, ?)
             ON CONFLICT (scope_id, name) DO UPDATE SET
                parent_name = excluded.parent_name,
                description = excluded.description,
                relevant_json = excluded.relevant_json",
            params![
                scope_id,
                b.name,
                b.parent,
                b.description,
                serde_json::to_string(&b.relevant_features)?,
            ],
        )?;

        tx.execute(
            "DELETE FROM box_thresholds WHERE scope_id = ? AND box_name = ?",
            params![scope_id, b.name],
        )?;
        for (name, threshold) in &b.thresholds {
            tx.execute(
                "INSERT INTO box_thresholds (scope_id, box_name, name, threshold_json) VALUES (?, ?, ?, ?)",
                params![scope_id, b.name, name, serde_json::to_string(threshold)?],
            )?;
        }
    }

    check_forest(&parent_map(&tx, scope_id)?)?;

    tx.commit()?;
    info!(scope = %scope_name, count = boxes.len(), "Wrote boxes");
    Ok(())
}

fn parent_map(conn: &Connection, scope_id: i64) -> StorageResult<BTreeMap<String, Option<String>>> {
    let mut stmt = conn.prepare("SELECT name, parent_name FROM boxes WHERE scope_id = ?")?;
    let rows = stmt.query_map(params![scope_id], |row| Ok((row.get(0)?, row.get(1)?)))?;
    Ok(rows.collect::<Result<BTreeMap<String, Option<String>>, _>>()?)
}

fn thresholds(conn: &Connection, scope_id: i64, box_name: &str) -> StorageResult<BTreeMap<String, Threshold>> {
    let mut stmt = conn.prepare_cached(
        "SELECT name, threshold_json FROM box_thresholds WHERE scope_id = ? AND box_name = ?",
    )?;
    let rows = stmt.query_map(params![scope_id, box_name], |row| {
        Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
    })?;

    let mut out = BTreeMap::new();
    for row in rows {
        let (name, json) = row?;
        out.insert(name, serde_json::from_str(&json)?);
    }
    Ok(out)
}

fn hydrate(conn: &Connection, scope_id: i64, row: BoxRow) -> StorageResult<ScenarioBox> {
    let relevant: BTreeSet<String> = serde_json::from_str(&row.relevant_json)?;
    Ok(ScenarioBox {
        thresholds: thresholds(conn, scope_id, &row.name)?,
        name: row.name,
        parent: row.parent,
        description: row.description,
        relevant_features: relevant,
        scope: None,
    })
}

pub fn read_box(conn: &Connection, scope_name: &str, box_name: &str) -> StorageResult<ScenarioBox> {
    let scope_id = scopes::scope_id(conn, scope_name)?;
    let row = conn
        .query_row(
            "SELECT * FROM boxes WHERE scope_id = ? AND name = ?",
            params![scope_id, box_name],
            |row| BoxRow::from_row(row),
        )
        .optional()?
        .ok_or_else(|| StorageError::not_found(format!("box '{}' in scope '{}'", box_name, scope_name)))?;
    hydrate(conn, scope_id, row)
}

pub fn read_boxes(conn: &Connection, scope_name: &str) -> StorageResult<Vec<ScenarioBox>> {
    let scope_id = scopes::scope_id(conn, scope_name)?;
    let mut stmt = conn.prepare("SELECT * FROM boxes WHERE scope_id = ? ORDER BY name")?;
    let rows = stmt
        .query_map(params![scope_id], |row| BoxRow::from_row(row))?
        .collect::<Result<Vec<_>, _>>()?;

    rows.into_iter().map(|row| hydrate(conn, scope_id, row)).collect()
}

pub fn read_box_names(conn: &Connection, scope_name: &str) -> StorageResult<Vec<String>> {
    let scope_id = scopes::scope_id(conn, scope_name)?;
    Ok(parent_map(conn, scope_id)?.into_keys().collect())
}

pub fn read_box_parent_name(conn: &Connection, scope_name: &str, box_name: &str) -> StorageResult<Option<String>> {
    let scope_id = scopes::scope_id(conn, scope_name)?;
    let parent: Option<Option<String>> = conn
        .query_row(
            "SELECT parent_name FROM boxes WHERE scope_id = ? AND name = ?",
            params![scope_id, box_name],
            |row| row.get(0),
        )
        .optional()?;
    parent.ok_or_else(|| StorageError::not_found(format!("box '{}' in scope '{}'", box_name, scope_name)))
}

pub fn read_box_parent_names(conn: &Connection, scope_name: &str) -> StorageResult<BTreeMap<String, Option<String>>> {
    let scope_id = scopes::scope_id(conn, scope_name)?;
    parent_map(conn, scope_id)
}
