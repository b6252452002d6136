//! Performance measure operations

use std::collections::BTreeSet;

use rusqlite::{params, Connection, ToSql};
use tracing::{info, warn};

use crate::database::{ExperimentQuery, MeasureQuery, WriteAllOptions};
use crate::dtypes;
use crate::error::{StorageError, StorageResult};
use crate::resolve::resolve_or_infer;
use crate::table::{ExperimentId, SourceId, Table, TableRow, Value};

use super::experiments::{
    assemble_table, check_parameter_rows, experiment_design, insert_experiment, matching_ids, parameter_maps,
    query_filtered, select_ids, select_parameter_cells, upsert_parameters, ExperimentFilter,
};
use super::scopes;

/// Distinct measure sources stored for the selected experiments
pub(crate) fn select_sources(conn: &Connection, filter: &ExperimentFilter<'_>) -> StorageResult<Vec<SourceId>> {
    query_filtered(
        conn,
        "SELECT DISTINCT m.source FROM experiment_measures m
         JOIN experiments e ON e.experiment_id = m.experiment_id",
        filter,
        None,
        "ORDER BY m.source",
        |row| row.get(0),
    )
}

/// (experiment id, measure name, value) cells of one source
pub(crate) fn select_measure_cells(
    conn: &Connection,
    filter: &ExperimentFilter<'_>,
    source: SourceId,
) -> StorageResult<Vec<(ExperimentId, String, Value)>> {
    query_filtered(
        conn,
        "SELECT m.experiment_id, m.name, m.value FROM experiment_measures m
         JOIN experiments e ON e.experiment_id = m.experiment_id",
        filter,
        Some(("m.source = ?", Box::new(source) as Box<dyn ToSql>)),
        "ORDER BY m.experiment_id",
        |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
    )
}

fn ensure_in_scope(conn: &Connection, scope_id: i64, scope_name: &str, id: ExperimentId) -> StorageResult<()> {
    let mut stmt = conn.prepare_cached("SELECT 1 FROM experiments WHERE experiment_id = ? AND scope_id = ?")?;
    if stmt.exists(params![id, scope_id])? {
        Ok(())
    } else {
        Err(StorageError::not_found(format!(
            "experiment {} in scope '{}'",
            id, scope_name
        )))
    }
}

/// Upsert the non-null measure cells of `row`; returns the number written
fn upsert_measures(
    conn: &Connection,
    id: ExperimentId,
    source: SourceId,
    names: &[String],
    row: &TableRow,
    columns: &[usize],
) -> StorageResult<usize> {
    let mut stmt = conn.prepare_cached(
        "INSERT INTO experiment_measures (experiment_id, source, name, value) VALUES (?, ?, ?, ?)
         ON CONFLICT (experiment_id, source, name) DO UPDATE SET value = excluded.value",
    )?;

    let mut written = 0;
    for idx in columns {
        let value = &row.values[*idx];
        if value.is_missing() {
            continue;
        }
        written += stmt.execute(params![id, source, names[*idx], value])?;
    }
    Ok(written)
}

/// Write measures for rows indexed by experiment id. A missing scope is
/// logged and otherwise ignored.
pub fn write_experiment_measures(
    conn: &mut Connection,
    scope_name: &str,
    source: SourceId,
    rows: &Table,
) -> StorageResult<()> {
    let tx = conn.transaction()?;

    let Some(scope_id) = scopes::find_scope_id(&tx, scope_name)? else {
        warn!(scope = %scope_name, source, "Scope does not exist, measures not recorded");
        return Ok(());
    };
    let catalog = scopes::load_catalog(&tx, scope_id, scope_name)?;
    catalog.check_measure_columns(rows.columns())?;

    let columns: Vec<usize> = (0..rows.columns().len()).collect();
    let mut written = 0;
    for (pos, row) in rows.rows().iter().enumerate() {
        let id = row
            .experiment_id
            .ok_or_else(|| StorageError::invalid(format!("measure row {} has no experiment id", pos)))?;
        ensure_in_scope(&tx, scope_id, scope_name, id)?;
        written += upsert_measures(&tx, id, source, rows.columns(), row, &columns)?;
    }

    tx.commit()?;
    info!(scope = %scope_name, source, written, "Wrote experiment measures");
    Ok(())
}

/// Write parameters and measures in one transaction
pub fn write_experiment_all(
    conn: &mut Connection,
    scope_name: &str,
    design: &str,
    source: SourceId,
    rows: &Table,
    options: &WriteAllOptions,
) -> StorageResult<Vec<ExperimentId>> {
    let tx = conn.transaction()?;

    let scope_id = scopes::scope_id(&tx, scope_name)?;
    let catalog = scopes::load_catalog(&tx, scope_id, scope_name)?;
    let partition = catalog.partition(rows.columns())?;

    let variable_columns: Vec<String> = partition
        .variables
        .iter()
        .map(|idx| rows.columns()[*idx].clone())
        .collect();
    catalog.check_parameter_columns(&variable_columns, true)?;
    check_parameter_rows(&catalog, rows, &partition.variables)?;

    let designs = vec![design.to_string()];
    let existing = parameter_maps(&tx, &ExperimentFilter::scope(scope_id).designs(&designs))?;
    if !existing.is_empty() && !options.overwrite {
        return Err(StorageError::Conflict(format!(
            "design '{}' of scope '{}' already holds {} experiments",
            design,
            scope_name,
            existing.len()
        )));
    }

    let mut ids = Vec::with_capacity(rows.len());
    let mut reused = 0usize;
    for row in rows.rows() {
        let id = match row.experiment_id {
            // Only reachable with overwrite: a populated design failed above
            Some(id) if existing.contains_key(&id) => {
                upsert_parameters(&tx, id, rows.columns(), row, &partition.variables)?;
                id
            }
            Some(id) => {
                return Err(match experiment_design(&tx, scope_id, id)? {
                    Some(other) => StorageError::invalid(format!(
                        "experiment {} belongs to design '{}', not '{}'",
                        id, other, design
                    )),
                    None => StorageError::not_found(format!("experiment {} in scope '{}'", id, scope_name)),
                });
            }
            None => match matching_ids(&existing, rows.columns(), row, &partition.variables).first() {
                Some(id) => {
                    reused += 1;
                    *id
                }
                None => insert_experiment(&tx, scope_id, design, rows.columns(), row, &partition.variables)?,
            },
        };
        upsert_measures(&tx, id, source, rows.columns(), row, &partition.measures)?;
        ids.push(id);
    }

    tx.commit()?;
    info!(scope = %scope_name, design, source, count = ids.len(), reused, "Wrote experiments with measures");
    Ok(ids)
}

pub fn read_experiment_all(conn: &Connection, scope_name: &str, query: &ExperimentQuery) -> StorageResult<Table> {
    let scope_id = scopes::scope_id(conn, scope_name)?;
    let catalog = scopes::load_catalog(conn, scope_id, scope_name)?;

    let filter = ExperimentFilter {
        scope_id,
        designs: &query.designs,
        experiment_id: None,
        only_pending: query.only_pending,
    };
    let source = resolve_or_infer(query.source, select_sources(conn, &filter)?, "measure source")?;

    let ids = select_ids(conn, &filter)?;
    let mut cells = select_parameter_cells(conn, &filter)?;
    if let Some(source) = source {
        cells.extend(select_measure_cells(conn, &filter, source)?);
    }

    let mut columns = catalog.variable_names();
    columns.extend(catalog.measure_names());
    let mut table = assemble_table(&ids, columns, cells);

    if query.ensure_dtypes {
        let content = scopes::read_scope(conn, scope_name)?;
        dtypes::ensure_dtypes(&mut table, &content)?;
    }
    Ok(table)
}

pub fn read_experiment_measures(conn: &Connection, scope_name: &str, query: &MeasureQuery) -> StorageResult<Table> {
    let scope_id = scopes::scope_id(conn, scope_name)?;
    let catalog = scopes::load_catalog(conn, scope_id, scope_name)?;

    let designs: Vec<String> = query.design.iter().cloned().collect();
    let filter = ExperimentFilter {
        scope_id,
        designs: &designs,
        experiment_id: query.experiment_id,
        only_pending: false,
    };

    if let Some(id) = query.experiment_id {
        if select_ids(conn, &filter)?.is_empty() {
            return Err(StorageError::not_found(format!(
                "experiment {} in scope '{}'",
                id, scope_name
            )));
        }
    }

    let Some(source) = resolve_or_infer(query.source, select_sources(conn, &filter)?, "measure source")? else {
        return Ok(Table::new(catalog.measure_names()));
    };

    let cells = select_measure_cells(conn, &filter, source)?;
    let ids: Vec<ExperimentId> = cells
        .iter()
        .map(|(id, _, _)| *id)
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect();
    Ok(assemble_table(&ids, catalog.measure_names(), cells))
}
