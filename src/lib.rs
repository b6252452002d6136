//! EMAT Storage - persistence for exploratory modeling scopes
//!
//! Records what a modeling study explored: the scopes (which variables and
//! measures an analysis considers), the experiments run under them, the
//! performance measures each model produced, fitted metamodels, and the
//! scenario-discovery boxes found in the results.
//!
//! ## Architecture
//!
//! - **[`Database`]**: the storage contract every backing store implements
//! - **[`SqliteDatabase`]**: single-file SQLite implementation
//! - **[`Table`]**: rows of experiment parameters and measures, keyed by
//!   experiment id
//!
//! ## Storage Layout
//!
//! ```text
//! ~/.local/share/emat-storage/
//! ├── emat.db          # SQLite database (WAL mode)
//! └── config.toml      # Configuration
//! ```
//!
//! ## Sources
//!
//! Every measure value carries a source: `0` for the core model, a
//! metamodel id for values a metamodel predicted. Reads without an explicit
//! source use the only source present and fail with
//! [`StorageError::AmbiguousSource`] if several are stored.

pub mod boxes;
pub mod catalog;
pub mod config;
pub mod database;
pub mod db;
pub mod dtypes;
pub mod error;
pub mod metamodel;
pub mod resolve;
pub mod scope;
pub mod table;

// Re-exports
pub use boxes::{Boxes, ScenarioBox, Threshold};
pub use config::StorageConfig;
pub use database::{Database, ExperimentQuery, MeasureQuery, ParameterQuery, WriteAllOptions};
pub use db::{DbStats, SqliteDatabase};
pub use error::{StorageError, StorageResult};
pub use metamodel::{Metamodel, MetamodelId};
pub use scope::{DType, MeasureDecl, ScopeDefinition, VariableDecl, VariableKind};
pub use table::{ExperimentId, SourceId, Table, TableRow, Value, CORE_MODEL_SOURCE};
