//! Database schema definitions

use rusqlite::Connection;
use tracing::{debug, info};

use crate::error::StorageError;

/// Current schema version for migrations
pub const SCHEMA_VERSION: i32 = 1;

/// Initialize the database schema
pub fn init_schema(conn: &Connection) -> Result<(), StorageError> {
    let current_version = get_schema_version(conn)?;

    if current_version == 0 {
        info!("Creating new database schema v{}", SCHEMA_VERSION);
        create_tables(conn)?;
        set_schema_version(conn, SCHEMA_VERSION)?;
    } else if current_version < SCHEMA_VERSION {
        info!("Migrating schema from v{} to v{}", current_version, SCHEMA_VERSION);
        migrate_schema(conn, current_version)?;
    } else if current_version > SCHEMA_VERSION {
        return Err(StorageError::Config(format!(
            "database schema v{} is newer than supported v{}",
            current_version, SCHEMA_VERSION
        )));
    } else {
        info!("Database schema is up to date (v{})", current_version);
    }

    Ok(())
}

/// Get current schema version (0 if not initialized)
fn get_schema_version(conn: &Connection) -> Result<i32, StorageError> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS schema_version (version INTEGER NOT NULL)",
        [],
    )?;

    let version: Option<i32> = conn
        .query_row("SELECT version FROM schema_version LIMIT 1", [], |row| row.get(0))
        .map(Some)
        .or_else(|e| match e {
            rusqlite::Error::QueryReturnedNoRows => Ok(None),
            other => Err(other),
        })?;

    Ok(version.unwrap_or(0))
}

fn set_schema_version(conn: &Connection, version: i32) -> Result<(), StorageError> {
    conn.execute("DELETE FROM schema_version", [])?;
    conn.execute("INSERT INTO schema_version (version) VALUES (?)", [version])?;
    Ok(())
}

fn create_tables(conn: &Connection) -> Result<(), StorageError> {
    conn.execute_batch(UNIVERSE_SCHEMA)?;
    conn.execute_batch(EXPERIMENT_SCHEMA)?;
    conn.execute_batch(SIDE_STORE_SCHEMA)?;
    conn.execute_batch(INDEXES_SCHEMA)?;
    Ok(())
}

fn migrate_schema(conn: &Connection, from_version: i32) -> Result<(), StorageError> {
    // v1 is the first layout, nothing to transform yet
    debug!(from_version, "No migration steps required");

    set_schema_version(conn, SCHEMA_VERSION)?;
    Ok(())
}

/// Universe and scope registry
const UNIVERSE_SCHEMA: &str = r#"
-- Every variable any scope may use
CREATE TABLE IF NOT EXISTS xl_universe (
    name TEXT PRIMARY KEY NOT NULL,
    kind TEXT NOT NULL CHECK (kind IN ('uncertainty', 'lever', 'constant'))
);

-- Every performance measure any scope may use
CREATE TABLE IF NOT EXISTS measure_universe (
    name TEXT PRIMARY KEY NOT NULL,
    category TEXT NOT NULL DEFAULT ''
);

-- Scopes; the full definition is kept as JSON in content_json
CREATE TABLE IF NOT EXISTS scopes (
    scope_id INTEGER PRIMARY KEY AUTOINCREMENT,
    name TEXT NOT NULL UNIQUE,
    sheet TEXT NOT NULL DEFAULT '',
    content_json TEXT NOT NULL,
    next_metamodel_id INTEGER NOT NULL DEFAULT 1,
    created_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS scope_variables (
    scope_id INTEGER NOT NULL,
    name TEXT NOT NULL,
    PRIMARY KEY (scope_id, name),
    FOREIGN KEY (scope_id) REFERENCES scopes(scope_id) ON DELETE CASCADE,
    FOREIGN KEY (name) REFERENCES xl_universe(name)
);

CREATE TABLE IF NOT EXISTS scope_measures (
    scope_id INTEGER NOT NULL,
    name TEXT NOT NULL,
    PRIMARY KEY (scope_id, name),
    FOREIGN KEY (scope_id) REFERENCES scopes(scope_id) ON DELETE CASCADE,
    FOREIGN KEY (name) REFERENCES measure_universe(name)
);
"#;

/// Experiments, parameters and measures
const EXPERIMENT_SCHEMA: &str = r#"
-- AUTOINCREMENT so ids are never handed out twice, even after deletes
CREATE TABLE IF NOT EXISTS experiments (
    experiment_id INTEGER PRIMARY KEY AUTOINCREMENT,
    scope_id INTEGER NOT NULL,
    design TEXT NOT NULL,
    created_at TEXT NOT NULL,
    FOREIGN KEY (scope_id) REFERENCES scopes(scope_id) ON DELETE CASCADE
);

-- value has no declared type so SQLite keeps the storage class it was given
CREATE TABLE IF NOT EXISTS experiment_parameters (
    experiment_id INTEGER NOT NULL,
    name TEXT NOT NULL,
    value,
    PRIMARY KEY (experiment_id, name),
    FOREIGN KEY (experiment_id) REFERENCES experiments(experiment_id) ON DELETE CASCADE
);

-- source 0 is the core model, anything else a metamodel id
CREATE TABLE IF NOT EXISTS experiment_measures (
    experiment_id INTEGER NOT NULL,
    source INTEGER NOT NULL CHECK (source >= 0),
    name TEXT NOT NULL,
    value,
    PRIMARY KEY (experiment_id, source, name),
    FOREIGN KEY (experiment_id) REFERENCES experiments(experiment_id) ON DELETE CASCADE
);
"#;

/// Metamodels and boxes
const SIDE_STORE_SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS metamodels (
    scope_id INTEGER NOT NULL,
    metamodel_id INTEGER NOT NULL CHECK (metamodel_id > 0),
    name TEXT NOT NULL DEFAULT '',
    payload BLOB NOT NULL,
    created_at TEXT NOT NULL,
    PRIMARY KEY (scope_id, metamodel_id),
    FOREIGN KEY (scope_id) REFERENCES scopes(scope_id) ON DELETE CASCADE
);

-- parent_name is a plain reference; the forest check runs on write
CREATE TABLE IF NOT EXISTS boxes (
    scope_id INTEGER NOT NULL,
    name TEXT NOT NULL,
    parent_name TEXT,
    description TEXT NOT NULL DEFAULT '',
    relevant_json TEXT NOT NULL DEFAULT '[]',
    PRIMARY KEY (scope_id, name),
    FOREIGN KEY (scope_id) REFERENCES scopes(scope_id) ON DELETE CASCADE
);

CREATE TABLE IF NOT EXISTS box_thresholds (
    scope_id INTEGER NOT NULL,
    box_name TEXT NOT NULL,
    name TEXT NOT NULL,
    threshold_json TEXT NOT NULL,
    PRIMARY KEY (scope_id, box_name, name),
    FOREIGN KEY (scope_id, box_name) REFERENCES boxes(scope_id, name) ON DELETE CASCADE
);
"#;

const INDEXES_SCHEMA: &str = r#"
CREATE INDEX IF NOT EXISTS idx_experiments_scope_design ON experiments(scope_id, design);
CREATE INDEX IF NOT EXISTS idx_measures_source ON experiment_measures(source);
"#;
