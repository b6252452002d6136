//! The storage contract
//!
//! [`Database`] is everything a backing store must provide: the scope
//! registry, experiment and measure stores, metamodel store and box store.
//! Callers program against the trait; [`crate::db::SqliteDatabase`] is the
//! SQLite implementation.
//!
//! ## Lifecycle
//!
//! ```text
//! init_xlm ─► write_scope ─► write_experiment_parameters ─► write_experiment_measures
//!                 │                                               (source 0 = core model)
//!                 ├─► write_metamodel / write_box(es)
//!                 └─► delete_scope  (cascades to everything above)
//! ```

use std::collections::BTreeMap;
use std::sync::Arc;

use crate::boxes::{Boxes, ScenarioBox};
use crate::error::{StorageError, StorageResult};
use crate::metamodel::{Metamodel, MetamodelId};
use crate::scope::{ScopeDefinition, VariableKind};
use crate::table::{ExperimentId, SourceId, Table, Value};

// =============================================================================
// Operation options
// =============================================================================

/// Options for `read_experiment_parameters`
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ParameterQuery {
    /// Only experiments of this design; `None` reads every design
    pub design: Option<String>,
    /// Only experiments without any stored measure
    pub only_pending: bool,
}

impl ParameterQuery {
    pub fn design(design: impl Into<String>) -> Self {
        Self {
            design: Some(design.into()),
            only_pending: false,
        }
    }

    pub fn pending(mut self) -> Self {
        self.only_pending = true;
        self
    }
}

/// Options for `read_experiment_all`
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExperimentQuery {
    /// Designs to read; empty reads every design
    pub designs: Vec<String>,
    /// Measure source; `None` uses the only stored source or fails
    pub source: Option<SourceId>,
    /// Only experiments without any stored measure
    pub only_pending: bool,
    /// Coerce values to the types the scope declares
    pub ensure_dtypes: bool,
}

impl ExperimentQuery {
    pub fn design(design: impl Into<String>) -> Self {
        Self {
            designs: vec![design.into()],
            ..Default::default()
        }
    }

    pub fn source(mut self, source: SourceId) -> Self {
        self.source = Some(source);
        self
    }

    pub fn pending(mut self) -> Self {
        self.only_pending = true;
        self
    }

    pub fn typed(mut self) -> Self {
        self.ensure_dtypes = true;
        self
    }
}

/// Options for `read_experiment_measures`
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MeasureQuery {
    /// Only experiments of this design; `None` reads every design
    pub design: Option<String>,
    /// Only this experiment
    pub experiment_id: Option<ExperimentId>,
    /// Measure source; `None` uses the only stored source or fails
    pub source: Option<SourceId>,
}

impl MeasureQuery {
    pub fn design(design: impl Into<String>) -> Self {
        Self {
            design: Some(design.into()),
            ..Default::default()
        }
    }

    pub fn experiment(mut self, id: ExperimentId) -> Self {
        self.experiment_id = Some(id);
        self
    }

    pub fn source(mut self, source: SourceId) -> Self {
        self.source = Some(source);
        self
    }
}

/// Options for `write_experiment_all`
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WriteAllOptions {
    /// Allow writing into a design that already holds experiments. Rows
    /// matching a stored experiment of the design reuse its id.
    pub overwrite: bool,
}

// =============================================================================
// Contract
// =============================================================================

pub trait Database: Send + Sync {
    /// Short description of this database
    fn get_db_info(&self) -> String {
        "no info available".to_string()
    }

    // -------------------------------------------------------------------------
    // Scope registry
    // -------------------------------------------------------------------------

    /// Declare or extend the universe of variables and measures. Names that
    /// are already declared keep their first category.
    fn init_xlm(
        &self,
        parameters: &[(String, VariableKind)],
        measures: &[(String, String)],
    ) -> StorageResult<()>;

    /// Bind a new scope to universe variables and measures.
    ///
    /// Fails with `Conflict` if the name is taken and `InvalidArgument` if a
    /// name is not in the universe.
    fn write_scope(
        &self,
        scope_name: &str,
        sheet: &str,
        variables: &[String],
        measures: &[String],
        content: &ScopeDefinition,
    ) -> StorageResult<()>;

    fn read_scope(&self, scope_name: &str) -> StorageResult<ScopeDefinition>;

    /// Add universe measures to an existing scope
    fn add_scope_meas(&self, scope_name: &str, measures: &[String]) -> StorageResult<()>;

    /// Delete a scope with all its experiments, measures, metamodels and
    /// boxes. Returns `false` when there was no such scope.
    fn delete_scope(&self, scope_name: &str) -> StorageResult<bool>;

    /// All scope names, optionally only those holding a design of that name
    fn read_scope_names(&self, design_name: Option<&str>) -> StorageResult<Vec<String>>;

    // -------------------------------------------------------------------------
    // Experiment store
    // -------------------------------------------------------------------------

    /// Store one experiment per row and return the new ids in row order
    fn write_experiment_parameters(
        &self,
        scope_name: &str,
        design_name: &str,
        rows: &Table,
    ) -> StorageResult<Vec<ExperimentId>>;

    /// Store a single experiment. The parameter maps are merged in order,
    /// later values replacing earlier ones.
    fn write_experiment_parameters_1(
        &self,
        scope_name: &str,
        design_name: &str,
        parameters: &[BTreeMap<String, Value>],
    ) -> StorageResult<ExperimentId> {
        let mut merged = BTreeMap::new();
        for p in parameters {
            merged.extend(p.iter().map(|(k, v)| (k.clone(), v.clone())));
        }
        let ids = self.write_experiment_parameters(scope_name, design_name, &Table::from_record(&merged))?;
        ids.into_iter()
            .next()
            .ok_or_else(|| StorageError::Internal("no id returned for single experiment".to_string()))
    }

    fn read_experiment_parameters(&self, scope_name: &str, query: &ParameterQuery) -> StorageResult<Table>;

    /// Find stored experiments matching full or partial parameter rows.
    /// `None` for a row without match; several matches is `InvalidArgument`.
    fn read_experiment_ids(
        &self,
        scope_name: &str,
        design_name: Option<&str>,
        rows: &Table,
    ) -> StorageResult<Vec<Option<ExperimentId>>>;

    fn read_design_names(&self, scope_name: &str) -> StorageResult<Vec<String>>;

    /// Delete every experiment of a design with its measures; returns the count
    fn delete_experiments(&self, scope_name: &str, design_name: &str) -> StorageResult<usize>;

    fn read_variables(&self, scope_name: &str, kind: VariableKind) -> StorageResult<Vec<String>>;

    fn read_uncertainties(&self, scope_name: &str) -> StorageResult<Vec<String>> {
        self.read_variables(scope_name, VariableKind::Uncertainty)
    }

    fn read_levers(&self, scope_name: &str) -> StorageResult<Vec<String>> {
        self.read_variables(scope_name, VariableKind::Lever)
    }

    fn read_constants(&self, scope_name: &str) -> StorageResult<Vec<String>> {
        self.read_variables(scope_name, VariableKind::Constant)
    }

    fn read_measures(&self, scope_name: &str) -> StorageResult<Vec<String>>;

    // -------------------------------------------------------------------------
    // Measure store
    // -------------------------------------------------------------------------

    /// Write measures for indexed rows. Does nothing if the scope does not
    /// exist.
    fn write_experiment_measures(&self, scope_name: &str, source: SourceId, rows: &Table) -> StorageResult<()>;

    /// Write parameters and measures together; returns ids in row order
    fn write_experiment_all(
        &self,
        scope_name: &str,
        design_name: &str,
        source: SourceId,
        rows: &Table,
        options: &WriteAllOptions,
    ) -> StorageResult<Vec<ExperimentId>>;

    /// Parameters joined with measures of one source
    fn read_experiment_all(&self, scope_name: &str, query: &ExperimentQuery) -> StorageResult<Table>;

    fn read_experiment_measures(&self, scope_name: &str, query: &MeasureQuery) -> StorageResult<Table>;

    // -------------------------------------------------------------------------
    // Metamodel store
    // -------------------------------------------------------------------------

    /// Store a metamodel; the id is `metamodel_id`, else the model's own id,
    /// else newly allocated. Returns the id used.
    fn write_metamodel(
        &self,
        scope_name: &str,
        model: &Metamodel,
        metamodel_id: Option<MetamodelId>,
        name: Option<&str>,
    ) -> StorageResult<MetamodelId>;

    /// Read a metamodel; without an id the scope must hold exactly one
    fn read_metamodel(&self, scope_name: &str, metamodel_id: Option<MetamodelId>) -> StorageResult<Metamodel>;

    fn read_metamodel_ids(&self, scope_name: &str) -> StorageResult<Vec<MetamodelId>>;

    /// Reserve an id never handed out before in this scope
    fn get_new_metamodel_id(&self, scope_name: &str) -> StorageResult<MetamodelId>;

    // -------------------------------------------------------------------------
    // Box store
    // -------------------------------------------------------------------------

    fn write_box(&self, b: &ScenarioBox, scope_name: Option<&str>) -> StorageResult<()>;

    fn write_boxes(&self, boxes: &Boxes, scope_name: Option<&str>) -> StorageResult<()>;

    /// Read one box, attaching `scope` to it when given
    fn read_box(
        &self,
        scope_name: &str,
        box_name: &str,
        scope: Option<Arc<ScopeDefinition>>,
    ) -> StorageResult<ScenarioBox>;

    fn read_box_names(&self, scope_name: &str) -> StorageResult<Vec<String>>;

    /// Parent of a box, `None` for a root box
    fn read_box_parent_name(&self, scope_name: &str, box_name: &str) -> StorageResult<Option<String>>;

    /// Parent of every box in the scope
    fn read_box_parent_names(&self, scope_name: &str) -> StorageResult<BTreeMap<String, Option<String>>>;

    fn read_boxes(&self, scope_name: &str, scope: Option<Arc<ScopeDefinition>>) -> StorageResult<Boxes>;
}
