//! Metamodel storage and id allocation
//!
//! Each scope row carries `next_metamodel_id`, the lowest id never handed
//! out in that scope. Allocation and explicit writes both move it forward,
//! so a retired id is never reused.

use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension};
use tracing::info;

use crate::error::{StorageError, StorageResult};
use crate::metamodel::{Metamodel, MetamodelId};
use crate::resolve::resolve_or_infer;

use super::scopes;

fn next_id(conn: &Connection, scope_id: i64) -> StorageResult<MetamodelId> {
    Ok(conn.query_row(
        "SELECT next_metamodel_id FROM scopes WHERE scope_id = ?",
        params![scope_id],
        |row| row.get(0),
    )?)
}

fn advance_past(conn: &Connection, scope_id: i64, id: MetamodelId) -> StorageResult<()> {
    conn.execute(
        "UPDATE scopes SET next_metamodel_id = MAX(next_metamodel_id, ?) WHERE scope_id = ?",
        params![id as i64 + 1, scope_id],
    )?;
    Ok(())
}

fn allocate(conn: &Connection, scope_id: i64) -> StorageResult<MetamodelId> {
    let id = next_id(conn, scope_id)?;
    advance_past(conn, scope_id, id)?;
    Ok(id)
}

pub fn get_new_metamodel_id(conn: &mut Connection, scope_name: &str) -> StorageResult<MetamodelId> {
    let tx = conn.transaction()?;
    let scope_id = scopes::scope_id(&tx, scope_name)?;
    let id = allocate(&tx, scope_id)?;
    tx.commit()?;
    Ok(id)
}

/// Store a metamodel. Id precedence: explicit, then the model's own, then
/// a fresh allocation. Name precedence: explicit, then the model's own.
pub fn write_metamodel(
    conn: &mut Connection,
    scope_name: &str,
    model: &Metamodel,
    metamodel_id: Option<MetamodelId>,
    name: Option<&str>,
) -> StorageResult<MetamodelId> {
    let tx = conn.transaction()?;
    let scope_id = scopes::scope_id(&tx, scope_name)?;

    let id = match metamodel_id.or(model.metamodel_id) {
        Some(0) => {
            return Err(StorageError::invalid(
                "metamodel id 0 is reserved for the core model",
            ))
        }
        Some(id) => {
            advance_past(&tx, scope_id, id)?;
            id
        }
        None => allocate(&tx, scope_id)?,
    };
    let name = name.unwrap_or(&model.name);

    tx.execute(
        "INSERT INTO metamodels (scope_id, metamodel_id, name, payload, created_at) VALUES (?, ?, ?, ?, ?)
         ON CONFLICT (scope_id, metamodel_id) DO UPDATE SET name = excluded.name, payload = excluded.payload",
        params![scope_id, id, name, model.payload, Utc::now().to_rfc3339()],
    )?;

    tx.commit()?;
    info!(scope = %scope_name, metamodel_id = id, bytes = model.payload.len(), "Wrote metamodel");
    Ok(id)
}

pub fn read_metamodel_ids(conn: &Connection, scope_name: &str) -> StorageResult<Vec<MetamodelId>> {
    let scope_id = scopes::scope_id(conn, scope_name)?;
    let mut stmt = conn.prepare("SELECT metamodel_id FROM metamodels WHERE scope_id = ? ORDER BY metamodel_id")?;
    let rows = stmt.query_map(params![scope_id], |row| row.get(0))?;
    Ok(rows.collect::<Result<Vec<MetamodelId>, _>>()?)
}

/// Read a metamodel; without an id the scope must hold exactly one
pub fn read_metamodel(
    conn: &Connection,
    scope_name: &str,
    metamodel_id: Option<MetamodelId>,
) -> StorageResult<Metamodel> {
    let scope_id = scopes::scope_id(conn, scope_name)?;
    let stored = read_metamodel_ids(conn, scope_name)?;

    let id = resolve_or_infer(metamodel_id, stored, "metamodel id")?
        .ok_or_else(|| StorageError::not_found(format!("metamodel in scope '{}'", scope_name)))?;

    let found: Option<(String, Vec<u8>)> = conn
        .query_row(
            "SELECT name, payload FROM metamodels WHERE scope_id = ? AND metamodel_id = ?",
            params![scope_id, id],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )
        .optional()?;

    let (name, payload) =
        found.ok_or_else(|| StorageError::not_found(format!("metamodel {} in scope '{}'", id, scope_name)))?;
    Ok(Metamodel {
        metamodel_id: Some(id),
        name,
        payload,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::schema;
    use crate::scope::ScopeDefinition;

    fn conn_with_scope() -> Connection {
        let mut conn = Connection::open_in_memory().unwrap();
        conn.execute_batch("PRAGMA foreign_keys=ON;").unwrap();
        schema::init_schema(&conn).unwrap();
        scopes::write_scope(&mut conn, "s", "", &[], &[], &ScopeDefinition::new("s")).unwrap();
        conn
    }

    #[test]
    fn test_allocation_never_repeats() {
        let mut conn = conn_with_scope();
        let a = get_new_metamodel_id(&mut conn, "s").unwrap();
        let b = get_new_metamodel_id(&mut conn, "s").unwrap();
        assert_eq!((a, b), (1, 2));

        write_metamodel(&mut conn, "s", &Metamodel::new(vec![1u8]), Some(10), None).unwrap();
        assert_eq!(get_new_metamodel_id(&mut conn, "s").unwrap(), 11);
    }

    #[test]
    fn test_id_precedence() {
        let mut conn = conn_with_scope();
        let model = Metamodel::new(vec![1u8, 2]).with_id(5).with_name("own");

        assert_eq!(write_metamodel(&mut conn, "s", &model, None, None).unwrap(), 5);
        assert_eq!(write_metamodel(&mut conn, "s", &model, Some(7), Some("given")).unwrap(), 7);

        let read = read_metamodel(&conn, "s", Some(7)).unwrap();
        assert_eq!(read.name, "given");
        assert_eq!(read.payload, vec![1, 2]);
    }

    #[test]
    fn test_zero_id_rejected() {
        let mut conn = conn_with_scope();
        let err = write_metamodel(&mut conn, "s", &Metamodel::new(Vec::<u8>::new()), Some(0), None).unwrap_err();
        assert!(err.is_invalid_argument());
    }
}
