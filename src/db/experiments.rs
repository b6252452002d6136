//! Experiment parameter operations

use std::collections::{BTreeMap, HashMap};

use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension, ToSql};
use tracing::{debug, info};

use crate::catalog::ScopeCatalog;
use crate::error::{StorageError, StorageResult};
use crate::table::{ExperimentId, Table, TableRow, Value};

use super::scopes;

/// Which experiments of a scope an operation touches
#[derive(Debug, Clone, Default)]
pub struct ExperimentFilter<'a> {
    pub scope_id: i64,
    /// Empty means every design
    pub designs: &'a [String],
    pub experiment_id: Option<ExperimentId>,
    pub only_pending: bool,
}

impl<'a> ExperimentFilter<'a> {
    pub fn scope(scope_id: i64) -> Self {
        Self {
            scope_id,
            ..Default::default()
        }
    }

    pub fn designs(mut self, designs: &'a [String]) -> Self {
        self.designs = designs;
        self
    }

    /// WHERE clause over experiments aliased `e`, with its parameters
    fn where_clause(&self) -> (String, Vec<Box<dyn ToSql>>) {
        let mut conditions = vec!["e.scope_id = ?".to_string()];
        let mut params: Vec<Box<dyn ToSql>> = vec![Box::new(self.scope_id)];

        if !self.designs.is_empty() {
            let placeholders: Vec<_> = self.designs.iter().map(|_| "?").collect();
            conditions.push(format!("e.design IN ({})", placeholders.join(", ")));
            for design in self.designs {
                params.push(Box::new(design.clone()));
            }
        }

        if let Some(id) = self.experiment_id {
            conditions.push("e.experiment_id = ?".to_string());
            params.push(Box::new(id));
        }

        if self.only_pending {
            conditions.push(
                "NOT EXISTS (SELECT 1 FROM experiment_measures m WHERE m.experiment_id = e.experiment_id)"
                    .to_string(),
            );
        }

        (conditions.join(" AND "), params)
    }
}

/// Run `select` (which must end in a WHERE over `e`) with the filter applied
pub(crate) fn query_filtered<T, F>(
    conn: &Connection,
    select: &str,
    filter: &ExperimentFilter<'_>,
    extra: Option<(&str, Box<dyn ToSql>)>,
    order_by: &str,
    map: F,
) -> StorageResult<Vec<T>>
where
    F: FnMut(&rusqlite::Row<'_>) -> rusqlite::Result<T>,
{
    let (clause, mut params) = filter.where_clause();
    let mut sql = format!("{} WHERE {}", select, clause);
    if let Some((condition, value)) = extra {
        sql.push_str(" AND ");
        sql.push_str(condition);
        params.push(value);
    }
    sql.push(' ');
    sql.push_str(order_by);

    debug!("Executing query: {}", sql);

    let mut stmt = conn.prepare(&sql)?;
    let param_refs: Vec<&dyn ToSql> = params.iter().map(|p| p.as_ref()).collect();
    let rows = stmt.query_map(param_refs.as_slice(), map)?;
    Ok(rows.collect::<Result<Vec<_>, _>>()?)
}

/// Ids of the selected experiments, ascending
pub(crate) fn select_ids(conn: &Connection, filter: &ExperimentFilter<'_>) -> StorageResult<Vec<ExperimentId>> {
    query_filtered(
        conn,
        "SELECT e.experiment_id FROM experiments e",
        filter,
        None,
        "ORDER BY e.experiment_id",
        |row| row.get(0),
    )
}

/// (experiment id, parameter name, value) cells of the selected experiments
pub(crate) fn select_parameter_cells(
    conn: &Connection,
    filter: &ExperimentFilter<'_>,
) -> StorageResult<Vec<(ExperimentId, String, Value)>> {
    query_filtered(
        conn,
        "SELECT p.experiment_id, p.name, p.value FROM experiment_parameters p
         JOIN experiments e ON e.experiment_id = p.experiment_id",
        filter,
        None,
        "ORDER BY p.experiment_id",
        |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
    )
}

/// Build an indexed table with one row per id, filling cells by column name.
/// Cells for unknown columns are dropped; missing cells stay null.
pub(crate) fn assemble_table(
    ids: &[ExperimentId],
    columns: Vec<String>,
    cells: impl IntoIterator<Item = (ExperimentId, String, Value)>,
) -> Table {
    let positions: HashMap<&str, usize> = columns.iter().enumerate().map(|(i, c)| (c.as_str(), i)).collect();
    let mut values: HashMap<ExperimentId, Vec<Value>> =
        ids.iter().map(|id| (*id, vec![Value::Null; columns.len()])).collect();

    for (id, name, value) in cells {
        if let (Some(row), Some(idx)) = (values.get_mut(&id), positions.get(name.as_str())) {
            row[*idx] = value;
        }
    }

    let mut table = Table::new(columns.iter().cloned());
    for id in ids {
        if let Some(row) = values.remove(id) {
            // Width always matches: every row was sized from `columns`
            let _ = table.push_indexed(*id, row);
        }
    }
    table
}

/// Reject null or NaN cells and check the columns against the scope
pub(crate) fn check_parameter_rows(catalog: &ScopeCatalog, rows: &Table, columns: &[usize]) -> StorageResult<()> {
    for (pos, row) in rows.rows().iter().enumerate() {
        for idx in columns {
            if row.values[*idx].is_missing() {
                return Err(StorageError::invalid(format!(
                    "row {} has no value for variable '{}' of scope '{}'",
                    pos,
                    rows.columns()[*idx],
                    catalog.scope_name
                )));
            }
        }
    }
    Ok(())
}

/// Insert one experiment with the values at `columns` of `row`
pub(crate) fn insert_experiment(
    conn: &Connection,
    scope_id: i64,
    design: &str,
    names: &[String],
    row: &TableRow,
    columns: &[usize],
) -> StorageResult<ExperimentId> {
    conn.execute(
        "INSERT INTO experiments (scope_id, design, created_at) VALUES (?, ?, ?)",
        params![scope_id, design, Utc::now().to_rfc3339()],
    )?;
    let id = conn.last_insert_rowid();
    upsert_parameters(conn, id, names, row, columns)?;
    Ok(id)
}

/// Set the parameters at `columns` of `row` on a stored experiment
pub(crate) fn upsert_parameters(
    conn: &Connection,
    id: ExperimentId,
    names: &[String],
    row: &TableRow,
    columns: &[usize],
) -> StorageResult<()> {
    let mut stmt = conn.prepare_cached(
        "INSERT INTO experiment_parameters (experiment_id, name, value) VALUES (?, ?, ?)
         ON CONFLICT (experiment_id, name) DO UPDATE SET value = excluded.value",
    )?;
    for idx in columns {
        stmt.execute(params![id, names[*idx], row.values[*idx]])?;
    }
    Ok(())
}

/// Design of an experiment in the scope, `None` if the scope has no such experiment
pub(crate) fn experiment_design(conn: &Connection, scope_id: i64, id: ExperimentId) -> StorageResult<Option<String>> {
    Ok(conn
        .query_row(
            "SELECT design FROM experiments WHERE experiment_id = ? AND scope_id = ?",
            params![id, scope_id],
            |row| row.get(0),
        )
        .optional()?)
}

/// Store one experiment per row; ids are returned in row order
pub fn write_experiment_parameters(
    conn: &mut Connection,
    scope_name: &str,
    design: &str,
    rows: &Table,
) -> StorageResult<Vec<ExperimentId>> {
    let tx = conn.transaction()?;

    let scope_id = scopes::scope_id(&tx, scope_name)?;
    let catalog = scopes::load_catalog(&tx, scope_id, scope_name)?;
    catalog.check_parameter_columns(rows.columns(), true)?;

    let columns: Vec<usize> = (0..rows.columns().len()).collect();
    check_parameter_rows(&catalog, rows, &columns)?;

    let mut ids = Vec::with_capacity(rows.len());
    for row in rows.rows() {
        ids.push(insert_experiment(&tx, scope_id, design, rows.columns(), row, &columns)?);
    }

    tx.commit()?;
    info!(scope = %scope_name, design, count = ids.len(), "Wrote experiment parameters");
    Ok(ids)
}

pub fn read_experiment_parameters(
    conn: &Connection,
    scope_name: &str,
    design: Option<&str>,
    only_pending: bool,
) -> StorageResult<Table> {
    let scope_id = scopes::scope_id(conn, scope_name)?;
    let catalog = scopes::load_catalog(conn, scope_id, scope_name)?;

    let designs: Vec<String> = design.map(str::to_string).into_iter().collect();
    let filter = ExperimentFilter {
        scope_id,
        designs: &designs,
        experiment_id: None,
        only_pending,
    };

    let ids = select_ids(conn, &filter)?;
    let cells = select_parameter_cells(conn, &filter)?;
    Ok(assemble_table(&ids, catalog.variable_names(), cells))
}

/// Parameter maps of the selected experiments, keyed by id
pub(crate) fn parameter_maps(
    conn: &Connection,
    filter: &ExperimentFilter<'_>,
) -> StorageResult<BTreeMap<ExperimentId, BTreeMap<String, Value>>> {
    let mut maps: BTreeMap<ExperimentId, BTreeMap<String, Value>> = select_ids(conn, filter)?
        .into_iter()
        .map(|id| (id, BTreeMap::new()))
        .collect();

    for (id, name, value) in select_parameter_cells(conn, filter)? {
        if let Some(map) = maps.get_mut(&id) {
            map.insert(name, value);
        }
    }
    Ok(maps)
}

/// Ids of stored experiments whose parameters agree with `row` at `columns`
pub(crate) fn matching_ids(
    candidates: &BTreeMap<ExperimentId, BTreeMap<String, Value>>,
    names: &[String],
    row: &TableRow,
    columns: &[usize],
) -> Vec<ExperimentId> {
    candidates
        .iter()
        .filter(|(_, stored)| {
            columns.iter().all(|idx| {
                stored
                    .get(&names[*idx])
                    .map(|v| v.matches(&row.values[*idx]))
                    .unwrap_or(false)
            })
        })
        .map(|(id, _)| *id)
        .collect()
}

pub fn read_experiment_ids(
    conn: &Connection,
    scope_name: &str,
    design: Option<&str>,
    rows: &Table,
) -> StorageResult<Vec<Option<ExperimentId>>> {
    let scope_id = scopes::scope_id(conn, scope_name)?;
    let catalog = scopes::load_catalog(conn, scope_id, scope_name)?;
    catalog.check_parameter_columns(rows.columns(), false)?;

    let designs: Vec<String> = design.map(str::to_string).into_iter().collect();
    let candidates = parameter_maps(conn, &ExperimentFilter::scope(scope_id).designs(&designs))?;

    let columns: Vec<usize> = (0..rows.columns().len()).collect();
    let mut found = Vec::with_capacity(rows.len());
    for (pos, row) in rows.rows().iter().enumerate() {
        let matches = matching_ids(&candidates, rows.columns(), row, &columns);
        match matches.as_slice() {
            [] => found.push(None),
            [id] => found.push(Some(*id)),
            many => {
                return Err(StorageError::invalid(format!(
                    "row {} matches {} experiments in scope '{}'; the definition is ambiguous",
                    pos,
                    many.len(),
                    scope_name
                )))
            }
        }
    }
    Ok(found)
}

pub fn read_design_names(conn: &Connection, scope_name: &str) -> StorageResult<Vec<String>> {
    let scope_id = scopes::scope_id(conn, scope_name)?;
    let mut stmt = conn.prepare("SELECT DISTINCT design FROM experiments WHERE scope_id = ? ORDER BY design")?;
    let rows = stmt.query_map(params![scope_id], |row| row.get(0))?;
    Ok(rows.collect::<Result<Vec<String>, _>>()?)
}

/// Delete a design's experiments; parameters and measures cascade
pub fn delete_experiments(conn: &mut Connection, scope_name: &str, design: &str) -> StorageResult<usize> {
    let tx = conn.transaction()?;
    let scope_id = scopes::scope_id(&tx, scope_name)?;
    let deleted = tx.execute(
        "DELETE FROM experiments WHERE scope_id = ? AND design = ?",
        params![scope_id, design],
    )?;
    tx.commit()?;

    info!(scope = %scope_name, design, deleted, "Deleted experiments");
    Ok(deleted)
}
