//! Universe and scope registry operations

use std::collections::BTreeSet;

use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension};
use tracing::{debug, info};

use crate::catalog::ScopeCatalog;
use crate::error::{StorageError, StorageResult};
use crate::scope::{ScopeDefinition, VariableKind};

/// Look up a scope's row id
pub fn find_scope_id(conn: &Connection, scope_name: &str) -> StorageResult<Option<i64>> {
    Ok(conn
        .query_row(
            "SELECT scope_id FROM scopes WHERE name = ?",
            params![scope_name],
            |row| row.get(0),
        )
        .optional()?)
}

/// Look up a scope's row id, failing with `NotFound`
pub fn scope_id(conn: &Connection, scope_name: &str) -> StorageResult<i64> {
    find_scope_id(conn, scope_name)?
        .ok_or_else(|| StorageError::not_found(format!("scope '{}'", scope_name)))
}

/// Declared names of a stored scope
pub fn load_catalog(conn: &Connection, scope_id: i64, scope_name: &str) -> StorageResult<ScopeCatalog> {
    let mut catalog = ScopeCatalog {
        scope_name: scope_name.to_string(),
        ..Default::default()
    };

    let mut stmt = conn.prepare(
        "SELECT u.name, u.kind FROM scope_variables sv
         JOIN xl_universe u ON u.name = sv.name
         WHERE sv.scope_id = ?",
    )?;
    let rows = stmt.query_map(params![scope_id], |row| {
        Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
    })?;
    for row in rows {
        let (name, kind) = row?;
        catalog.variables.insert(name, kind.parse()?);
    }

    let mut stmt = conn.prepare(
        "SELECT u.name, u.category FROM scope_measures sm
         JOIN measure_universe u ON u.name = sm.name
         WHERE sm.scope_id = ?",
    )?;
    let rows = stmt.query_map(params![scope_id], |row| {
        Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
    })?;
    for row in rows {
        let (name, category) = row?;
        catalog.measures.insert(name, category);
    }

    Ok(catalog)
}

/// Declare or extend the variable and measure universe
pub fn init_xlm(
    conn: &mut Connection,
    parameters: &[(String, VariableKind)],
    measures: &[(String, String)],
) -> StorageResult<()> {
    let tx = conn.transaction()?;

    let mut added = 0usize;
    for (name, kind) in parameters {
        added += tx.execute(
            "INSERT OR IGNORE INTO xl_universe (name, kind) VALUES (?, ?)",
            params![name, kind.as_str()],
        )?;
    }
    for (name, category) in measures {
        added += tx.execute(
            "INSERT OR IGNORE INTO measure_universe (name, category) VALUES (?, ?)",
            params![name, category],
        )?;
    }

    tx.commit()?;
    info!(added, "Initialized experiment universe");
    Ok(())
}

fn check_in_universe(conn: &Connection, table: &str, names: &[String]) -> StorageResult<()> {
    let sql = format!("SELECT 1 FROM {} WHERE name = ?", table);
    let mut stmt = conn.prepare(&sql)?;
    for name in names {
        if !stmt.exists(params![name])? {
            return Err(StorageError::invalid(format!(
                "'{}' has not been declared with init_xlm",
                name
            )));
        }
    }
    Ok(())
}

/// Register a new scope
pub fn write_scope(
    conn: &mut Connection,
    scope_name: &str,
    sheet: &str,
    variables: &[String],
    measures: &[String],
    content: &ScopeDefinition,
) -> StorageResult<()> {
    let tx = conn.transaction()?;

    if find_scope_id(&tx, scope_name)?.is_some() {
        return Err(StorageError::Conflict(format!("scope '{}' already exists", scope_name)));
    }
    check_in_universe(&tx, "xl_universe", variables)?;
    check_in_universe(&tx, "measure_universe", measures)?;

    tx.execute(
        "INSERT INTO scopes (name, sheet, content_json, created_at) VALUES (?, ?, ?, ?)",
        params![scope_name, sheet, serde_json::to_string(content)?, Utc::now().to_rfc3339()],
    )?;
    let scope_id = tx.last_insert_rowid();

    let unique_vars: BTreeSet<&String> = variables.iter().collect();
    for name in unique_vars {
        tx.execute(
            "INSERT INTO scope_variables (scope_id, name) VALUES (?, ?)",
            params![scope_id, name],
        )?;
    }
    let unique_measures: BTreeSet<&String> = measures.iter().collect();
    for name in unique_measures {
        tx.execute(
            "INSERT INTO scope_measures (scope_id, name) VALUES (?, ?)",
            params![scope_id, name],
        )?;
    }

    tx.commit()?;
    info!(scope = %scope_name, variables = variables.len(), measures = measures.len(), "Wrote scope");
    Ok(())
}

pub fn read_scope(conn: &Connection, scope_name: &str) -> StorageResult<ScopeDefinition> {
    let content: Option<String> = conn
        .query_row(
            "SELECT content_json FROM scopes WHERE name = ?",
            params![scope_name],
            |row| row.get(0),
        )
        .optional()?;

    let content = content.ok_or_else(|| StorageError::not_found(format!("scope '{}'", scope_name)))?;
    Ok(serde_json::from_str(&content)?)
}

/// Add universe measures to an existing scope. Measures the stored scope
/// content does not declare yet are appended to it as float measures.
pub fn add_scope_meas(conn: &mut Connection, scope_name: &str, measures: &[String]) -> StorageResult<()> {
    let tx = conn.transaction()?;

    let scope_id = scope_id(&tx, scope_name)?;
    check_in_universe(&tx, "measure_universe", measures)?;

    let mut content = read_scope(&tx, scope_name)?;
    let mut added = 0usize;
    for name in measures {
        added += tx.execute(
            "INSERT OR IGNORE INTO scope_measures (scope_id, name) VALUES (?, ?)",
            params![scope_id, name],
        )?;
        if content.measure(name).is_none() {
            let category: String = tx.query_row(
                "SELECT category FROM measure_universe WHERE name = ?",
                params![name],
                |row| row.get(0),
            )?;
            content = content.with_measure(name.as_str(), category);
        }
    }
    tx.execute(
        "UPDATE scopes SET content_json = ? WHERE scope_id = ?",
        params![serde_json::to_string(&content)?, scope_id],
    )?;

    tx.commit()?;
    info!(scope = %scope_name, added, "Extended scope measures");
    Ok(())
}

/// Delete a scope; foreign keys cascade to every dependent row
pub fn delete_scope(conn: &mut Connection, scope_name: &str) -> StorageResult<bool> {
    let tx = conn.transaction()?;
    let changes = tx.execute("DELETE FROM scopes WHERE name = ?", params![scope_name])?;
    tx.commit()?;

    if changes > 0 {
        info!(scope = %scope_name, "Deleted scope");
    } else {
        debug!(scope = %scope_name, "Delete of unknown scope ignored");
    }
    Ok(changes > 0)
}

pub fn read_scope_names(conn: &Connection, design_name: Option<&str>) -> StorageResult<Vec<String>> {
    let names = match design_name {
        Some(design) => {
            let mut stmt = conn.prepare(
                "SELECT s.name FROM scopes s
                 WHERE EXISTS (SELECT 1 FROM experiments e WHERE e.scope_id = s.scope_id AND e.design = ?)
                 ORDER BY s.name",
            )?;
            let rows = stmt.query_map(params![design], |row| row.get(0))?;
            rows.collect::<Result<Vec<String>, _>>()?
        }
        None => {
            let mut stmt = conn.prepare("SELECT name FROM scopes ORDER BY name")?;
            let rows = stmt.query_map([], |row| row.get(0))?;
            rows.collect::<Result<Vec<String>, _>>()?
        }
    };
    Ok(names)
}

pub fn read_variables(conn: &Connection, scope_name: &str, kind: VariableKind) -> StorageResult<Vec<String>> {
    let scope_id = scope_id(conn, scope_name)?;
    Ok(load_catalog(conn, scope_id, scope_name)?.names_of_kind(kind))
}

pub fn read_measures(conn: &Connection, scope_name: &str) -> StorageResult<Vec<String>> {
    let scope_id = scope_id(conn, scope_name)?;
    Ok(load_catalog(conn, scope_id, scope_name)?.measure_names())
}
