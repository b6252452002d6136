//! SQLite backing store
//!
//! One connection guarded by a mutex: every operation on a handle, reads
//! included, is serialized. Id allocation is atomic and each cascading
//! delete runs inside a single transaction. Concurrent readers need their
//! own handles on the same file, which WAL journaling allows.
//!
//! ## Tables
//!
//! - `xl_universe`, `measure_universe` - every declared variable and measure
//! - `scopes`, `scope_variables`, `scope_measures` - scope registry
//! - `experiments`, `experiment_parameters`, `experiment_measures`
//! - `metamodels` - serialized surrogate models per scope
//! - `boxes`, `box_thresholds` - scenario-discovery regions

pub mod schema;
pub mod scopes;
pub mod experiments;
pub mod measures;
pub mod metamodels;
pub mod boxes;

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use rusqlite::{Connection, OpenFlags};
use tracing::{debug, info};

use crate::boxes::{resolve_write_scope, Boxes, ScenarioBox};
use crate::config::StorageConfig;
use crate::database::{Database, ExperimentQuery, MeasureQuery, ParameterQuery, WriteAllOptions};
use crate::error::{StorageError, StorageResult};
use crate::metamodel::{Metamodel, MetamodelId};
use crate::scope::{ScopeDefinition, VariableKind};
use crate::table::{ExperimentId, SourceId, Table};

/// SQLite database for scopes, experiments, measures, metamodels and boxes
pub struct SqliteDatabase {
    conn: Mutex<Connection>,
    location: Option<PathBuf>,
}

impl SqliteDatabase {
    /// Open or create the database described by `config`
    pub fn open(config: &StorageConfig) -> StorageResult<Self> {
        let path = &config.database_path;
        info!("Opening SQLite database at {:?}", path);

        let mut flags = OpenFlags::SQLITE_OPEN_READ_WRITE | OpenFlags::SQLITE_OPEN_NO_MUTEX | OpenFlags::SQLITE_OPEN_URI;
        if config.create_if_missing {
            if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                std::fs::create_dir_all(parent)?;
            }
            flags |= OpenFlags::SQLITE_OPEN_CREATE;
        }

        let conn = Connection::open_with_flags(path, flags)?;
        conn.busy_timeout(Duration::from_millis(config.busy_timeout_ms))?;
        if config.wal {
            conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA synchronous=NORMAL;")?;
        }

        Self::init(conn, Some(path.clone()))
    }

    /// Open or create a database file with default settings
    pub fn open_path<P: AsRef<Path>>(path: P) -> StorageResult<Self> {
        Self::open(&StorageConfig::with_path(path.as_ref()))
    }

    /// Open an in-memory database (for testing)
    pub fn open_in_memory() -> StorageResult<Self> {
        debug!("Opening in-memory SQLite database");
        Self::init(Connection::open_in_memory()?, None)
    }

    fn init(conn: Connection, location: Option<PathBuf>) -> StorageResult<Self> {
        conn.execute_batch("PRAGMA foreign_keys=ON;")?;
        schema::init_schema(&conn)?;

        Ok(Self {
            conn: Mutex::new(conn),
            location,
        })
    }

    /// Path of the database file, `None` when in memory
    pub fn location(&self) -> Option<&Path> {
        self.location.as_deref()
    }

    /// Run a read with shared access to the connection
    pub fn with_conn<F, T>(&self, f: F) -> StorageResult<T>
    where
        F: FnOnce(&Connection) -> StorageResult<T>,
    {
        let conn = self
            .conn
            .lock()
            .map_err(|e| StorageError::Internal(format!("Lock poisoned: {}", e)))?;
        f(&conn)
    }

    /// Run a write with exclusive access to the connection
    pub fn with_conn_mut<F, T>(&self, f: F) -> StorageResult<T>
    where
        F: FnOnce(&mut Connection) -> StorageResult<T>,
    {
        let mut conn = self
            .conn
            .lock()
            .map_err(|e| StorageError::Internal(format!("Lock poisoned: {}", e)))?;
        f(&mut conn)
    }

    /// Row counts across the store
    pub fn stats(&self) -> StorageResult<DbStats> {
        self.with_conn(|conn| {
            let count = |table: &str| -> StorageResult<u64> {
                let n: i64 = conn.query_row(&format!("SELECT COUNT(*) FROM {}", table), [], |row| row.get(0))?;
                Ok(n as u64)
            };

            Ok(DbStats {
                scope_count: count("scopes")?,
                experiment_count: count("experiments")?,
                measure_count: count("experiment_measures")?,
                metamodel_count: count("metamodels")?,
                box_count: count("boxes")?,
            })
        })
    }
}

/// Database statistics
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct DbStats {
    pub scope_count: u64,
    pub experiment_count: u64,
    pub measure_count: u64,
    pub metamodel_count: u64,
    pub box_count: u64,
}

impl Database for SqliteDatabase {
    fn get_db_info(&self) -> String {
        match &self.location {
            Some(path) => format!("SQLite @ {}", path.display()),
            None => "SQLite @ :memory:".to_string(),
        }
    }

    fn init_xlm(&self, parameters: &[(String, VariableKind)], measures: &[(String, String)]) -> StorageResult<()> {
        self.with_conn_mut(|conn| scopes::init_xlm(conn, parameters, measures))
    }

    fn write_scope(
        &self,
        scope_name: &str,
        sheet: &str,
        variables: &[String],
        measures: &[String],
        content: &ScopeDefinition,
    ) -> StorageResult<()> {
        self.with_conn_mut(|conn| scopes::write_scope(conn, scope_name, sheet, variables, measures, content))
    }

    fn read_scope(&self, scope_name: &str) -> StorageResult<ScopeDefinition> {
        self.with_conn(|conn| scopes::read_scope(conn, scope_name))
    }

    fn add_scope_meas(&self, scope_name: &str, measures: &[String]) -> StorageResult<()> {
        self.with_conn_mut(|conn| scopes::add_scope_meas(conn, scope_name, measures))
    }

    fn delete_scope(&self, scope_name: &str) -> StorageResult<bool> {
        self.with_conn_mut(|conn| scopes::delete_scope(conn, scope_name))
    }

    fn read_scope_names(&self, design_name: Option<&str>) -> StorageResult<Vec<String>> {
        self.with_conn(|conn| scopes::read_scope_names(conn, design_name))
    }

    fn write_experiment_parameters(
        &self,
        scope_name: &str,
        design_name: &str,
        rows: &Table,
    ) -> StorageResult<Vec<ExperimentId>> {
        self.with_conn_mut(|conn| experiments::write_experiment_parameters(conn, scope_name, design_name, rows))
    }

    fn read_experiment_parameters(&self, scope_name: &str, query: &ParameterQuery) -> StorageResult<Table> {
        self.with_conn(|conn| {
            experiments::read_experiment_parameters(conn, scope_name, query.design.as_deref(), query.only_pending)
        })
    }

    fn read_experiment_ids(
        &self,
        scope_name: &str,
        design_name: Option<&str>,
        rows: &Table,
    ) -> StorageResult<Vec<Option<ExperimentId>>> {
        self.with_conn(|conn| experiments::read_experiment_ids(conn, scope_name, design_name, rows))
    }

    fn read_design_names(&self, scope_name: &str) -> StorageResult<Vec<String>> {
        self.with_conn(|conn| experiments::read_design_names(conn, scope_name))
    }

    fn delete_experiments(&self, scope_name: &str, design_name: &str) -> StorageResult<usize> {
        self.with_conn_mut(|conn| experiments::delete_experiments(conn, scope_name, design_name))
    }

    fn read_variables(&self, scope_name: &str, kind: VariableKind) -> StorageResult<Vec<String>> {
        self.with_conn(|conn| scopes::read_variables(conn, scope_name, kind))
    }

    fn read_measures(&self, scope_name: &str) -> StorageResult<Vec<String>> {
        self.with_conn(|conn| scopes::read_measures(conn, scope_name))
    }

    fn write_experiment_measures(&self, scope_name: &str, source: SourceId, rows: &Table) -> StorageResult<()> {
        self.with_conn_mut(|conn| measures::write_experiment_measures(conn, scope_name, source, rows))
    }

    fn write_experiment_all(
        &self,
        scope_name: &str,
        design_name: &str,
        source: SourceId,
        rows: &Table,
        options: &WriteAllOptions,
    ) -> StorageResult<Vec<ExperimentId>> {
        self.with_conn_mut(|conn| measures::write_experiment_all(conn, scope_name, design_name, source, rows, options))
    }

    fn read_experiment_all(&self, scope_name: &str, query: &ExperimentQuery) -> StorageResult<Table> {
        self.with_conn(|conn| measures::read_experiment_all(conn, scope_name, query))
    }

    fn read_experiment_measures(&self, scope_name: &str, query: &MeasureQuery) -> StorageResult<Table> {
        self.with_conn(|conn| measures::read_experiment_measures(conn, scope_name, query))
    }

    fn write_metamodel(
        &self,
        scope_name: &str,
        model: &Metamodel,
        metamodel_id: Option<MetamodelId>,
        name: Option<&str>,
    ) -> StorageResult<MetamodelId> {
        self.with_conn_mut(|conn| metamodels::write_metamodel(conn, scope_name, model, metamodel_id, name))
    }

    fn read_metamodel(&self, scope_name: &str, metamodel_id: Option<MetamodelId>) -> StorageResult<Metamodel> {
        self.with_conn(|conn| metamodels::read_metamodel(conn, scope_name, metamodel_id))
    }

    fn read_metamodel_ids(&self, scope_name: &str) -> StorageResult<Vec<MetamodelId>> {
        self.with_conn(|conn| metamodels::read_metamodel_ids(conn, scope_name))
    }

    fn get_new_metamodel_id(&self, scope_name: &str) -> StorageResult<MetamodelId> {
        self.with_conn_mut(|conn| metamodels::get_new_metamodel_id(conn, scope_name))
    }

    fn write_box(&self, b: &ScenarioBox, scope_name: Option<&str>) -> StorageResult<()> {
        let scope_name = resolve_write_scope(b.bound_scope_name(), scope_name)?;
        self.with_conn_mut(|conn| boxes::write_boxes(conn, &scope_name, &[b]))
    }

    fn write_boxes(&self, all: &Boxes, scope_name: Option<&str>) -> StorageResult<()> {
        let scope_name = resolve_write_scope(all.bound_scope_name(), scope_name)?;
        let list: Vec<&ScenarioBox> = all.iter().collect();
        self.with_conn_mut(|conn| boxes::write_boxes(conn, &scope_name, &list))
    }

    fn read_box(
        &self,
        scope_name: &str,
        box_name: &str,
        scope: Option<Arc<ScopeDefinition>>,
    ) -> StorageResult<ScenarioBox> {
        let mut b = self.with_conn(|conn| boxes::read_box(conn, scope_name, box_name))?;
        b.scope = scope;
        Ok(b)
    }

    fn read_box_names(&self, scope_name: &str) -> StorageResult<Vec<String>> {
        self.with_conn(|conn| boxes::read_box_names(conn, scope_name))
    }

    fn read_box_parent_name(&self, scope_name: &str, box_name: &str) -> StorageResult<Option<String>> {
        self.with_conn(|conn| boxes::read_box_parent_name(conn, scope_name, box_name))
    }

    fn read_box_parent_names(&self, scope_name: &str) -> StorageResult<BTreeMap<String, Option<String>>> {
        self.with_conn(|conn| boxes::read_box_parent_names(conn, scope_name))
    }

    fn read_boxes(&self, scope_name: &str, scope: Option<Arc<ScopeDefinition>>) -> StorageResult<Boxes> {
        let stored = self.with_conn(|conn| boxes::read_boxes(conn, scope_name))?;

        let mut out = Boxes::new();
        out.scope = scope.clone();
        for mut b in stored {
            b.scope = scope.clone();
            out.insert(b);
        }
        Ok(out)
    }
}
