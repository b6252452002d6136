//! Integration tests for the SQLite store
//!
//! Each test opens a database file in a temporary directory and drives it
//! only through the `Database` trait.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::thread;

use emat_storage::{
    Boxes, DType, Database, ExperimentQuery, MeasureQuery, Metamodel, ParameterQuery, ScenarioBox,
    ScopeDefinition, SqliteDatabase, Table, Value, VariableKind, WriteAllOptions, CORE_MODEL_SOURCE,
};
use tempfile::TempDir;

const SCOPE: &str = "road_test";

fn road_test_scope() -> ScopeDefinition {
    ScopeDefinition::new(SCOPE)
        .with_uncertainty("alpha")
        .with_uncertainty("beta")
        .with_lever("expand_capacity")
        .with_measure("net_benefits", "regional")
        .with_measure("build_cost", "regional")
}

/// Open a fresh database file holding the road test scope
fn create_db() -> (SqliteDatabase, TempDir) {
    let temp_dir = TempDir::new().unwrap();
    let db = SqliteDatabase::open_path(temp_dir.path().join("emat.db")).unwrap();
    register(&db, &road_test_scope());
    (db, temp_dir)
}

fn register(db: &SqliteDatabase, scope: &ScopeDefinition) {
    db.init_xlm(&scope.parameter_list(), &scope.measure_list()).unwrap();
    db.write_scope(
        &scope.name,
        "road_test.yaml",
        &scope.variable_names(),
        &scope.measure_names(),
        scope,
    )
    .unwrap();
}

fn design_rows(points: &[(f64, f64, f64)]) -> Table {
    let mut table = Table::new(["alpha", "beta", "expand_capacity"]);
    for (a, b, c) in points {
        table
            .push_row(vec![Value::Float(*a), Value::Float(*b), Value::Float(*c)])
            .unwrap();
    }
    table
}

fn measure_rows(values: &[(i64, f64, f64)]) -> Table {
    let mut table = Table::new(["net_benefits", "build_cost"]);
    for (id, nb, cost) in values {
        table
            .push_indexed(*id, vec![Value::Float(*nb), Value::Float(*cost)])
            .unwrap();
    }
    table
}

#[test]
fn test_scope_lifecycle() {
    let (db, _temp) = create_db();

    assert_eq!(db.read_scope_names(None).unwrap(), vec![SCOPE]);
    assert_eq!(db.read_scope(SCOPE).unwrap(), road_test_scope());
    assert_eq!(db.read_uncertainties(SCOPE).unwrap(), vec!["alpha", "beta"]);
    assert_eq!(db.read_levers(SCOPE).unwrap(), vec!["expand_capacity"]);
    assert!(db.read_constants(SCOPE).unwrap().is_empty());
    assert_eq!(db.read_measures(SCOPE).unwrap(), vec!["build_cost", "net_benefits"]);

    let dup = db.write_scope(SCOPE, "", &[], &[], &road_test_scope()).unwrap_err();
    assert!(dup.is_conflict());

    assert!(db.read_scope("missing").unwrap_err().is_not_found());
    assert!(db.get_db_info().starts_with("SQLite @"));
}

#[test]
fn test_parameter_round_trip() {
    let (db, _temp) = create_db();

    let ids = db
        .write_experiment_parameters(SCOPE, "lhs", &design_rows(&[(0.1, 1.0, 0.0), (0.2, 2.0, 10.0)]))
        .unwrap();
    assert_eq!(ids.len(), 2);
    assert!(ids[0] < ids[1]);

    let table = db.read_experiment_parameters(SCOPE, &ParameterQuery::design("lhs")).unwrap();
    assert_eq!(table.columns(), &["alpha", "beta", "expand_capacity"]);
    assert_eq!(table.ids(), ids);
    assert_eq!(table.value(ids[1], "beta"), Some(&Value::Float(2.0)));

    assert_eq!(db.read_design_names(SCOPE).unwrap(), vec!["lhs"]);
    assert_eq!(db.read_scope_names(Some("lhs")).unwrap(), vec![SCOPE]);
    assert!(db.read_scope_names(Some("uniform")).unwrap().is_empty());

    // Unknown designs read as empty
    let empty = db.read_experiment_parameters(SCOPE, &ParameterQuery::design("uniform")).unwrap();
    assert!(empty.is_empty());
}

#[test]
fn test_parameter_write_rejects_bad_columns() {
    let (db, _temp) = create_db();

    let mut unknown = Table::new(["alpha", "beta", "expand_capacity", "gamma"]);
    unknown
        .push_row(vec![Value::Float(0.1), Value::Float(1.0), Value::Float(0.0), Value::Float(3.0)])
        .unwrap();
    assert!(db.write_experiment_parameters(SCOPE, "lhs", &unknown).unwrap_err().is_invalid_argument());

    let mut partial = Table::new(["alpha"]);
    partial.push_row(vec![Value::Float(0.1)]).unwrap();
    assert!(db.write_experiment_parameters(SCOPE, "lhs", &partial).unwrap_err().is_invalid_argument());

    // Nothing was written by either failure
    assert!(db.read_design_names(SCOPE).unwrap().is_empty());
}

#[test]
fn test_single_experiment_merges_maps() {
    let (db, _temp) = create_db();

    let mut base = BTreeMap::new();
    base.insert("alpha".to_string(), Value::Float(0.1));
    base.insert("beta".to_string(), Value::Float(1.0));
    base.insert("expand_capacity".to_string(), Value::Float(0.0));
    let mut overrides = BTreeMap::new();
    overrides.insert("expand_capacity".to_string(), Value::Float(50.0));

    let id = db.write_experiment_parameters_1(SCOPE, "manual", &[base, overrides]).unwrap();
    let table = db.read_experiment_parameters(SCOPE, &ParameterQuery::design("manual")).unwrap();
    assert_eq!(table.value(id, "expand_capacity"), Some(&Value::Float(50.0)));
}

#[test]
fn test_ids_unique_and_never_reused() {
    let (db, _temp) = create_db();

    let first = db
        .write_experiment_parameters(SCOPE, "lhs", &design_rows(&[(0.1, 1.0, 0.0), (0.2, 2.0, 0.0)]))
        .unwrap();
    let second = db
        .write_experiment_parameters(SCOPE, "uniform", &design_rows(&[(0.3, 3.0, 0.0)]))
        .unwrap();
    assert!(second[0] > first[1]);

    assert_eq!(db.delete_experiments(SCOPE, "uniform").unwrap(), 1);
    let third = db
        .write_experiment_parameters(SCOPE, "uniform", &design_rows(&[(0.3, 3.0, 0.0)]))
        .unwrap();
    assert!(third[0] > second[0]);
}

#[test]
fn test_measures_and_pending() {
    let (db, _temp) = create_db();

    let ids = db
        .write_experiment_parameters(SCOPE, "lhs", &design_rows(&[(0.1, 1.0, 0.0), (0.2, 2.0, 0.0)]))
        .unwrap();
    db.write_experiment_measures(SCOPE, CORE_MODEL_SOURCE, &measure_rows(&[(ids[0], 100.0, 5.0)]))
        .unwrap();

    let pending = db
        .read_experiment_parameters(SCOPE, &ParameterQuery::design("lhs").pending())
        .unwrap();
    assert_eq!(pending.ids(), vec![ids[1]]);

    let all = db.read_experiment_all(SCOPE, &ExperimentQuery::design("lhs")).unwrap();
    assert_eq!(all.ids(), ids);
    assert_eq!(all.value(ids[0], "net_benefits"), Some(&Value::Float(100.0)));
    assert_eq!(all.value(ids[1], "net_benefits"), Some(&Value::Null));
    assert_eq!(all.value(ids[1], "alpha"), Some(&Value::Float(0.2)));

    let measures = db
        .read_experiment_measures(SCOPE, &MeasureQuery::design("lhs"))
        .unwrap();
    assert_eq!(measures.ids(), vec![ids[0]]);
    assert_eq!(measures.value(ids[0], "build_cost"), Some(&Value::Float(5.0)));

    let one = db
        .read_experiment_measures(SCOPE, &MeasureQuery::default().experiment(ids[0]))
        .unwrap();
    assert_eq!(one.len(), 1);
}

#[test]
fn test_measure_overwrite_keeps_other_cells() {
    let (db, _temp) = create_db();
    let ids = db
        .write_experiment_parameters(SCOPE, "lhs", &design_rows(&[(0.1, 1.0, 0.0)]))
        .unwrap();

    db.write_experiment_measures(SCOPE, 0, &measure_rows(&[(ids[0], 100.0, 5.0)])).unwrap();

    let mut update = Table::new(["net_benefits"]);
    update.push_indexed(ids[0], vec![Value::Float(120.0)]).unwrap();
    db.write_experiment_measures(SCOPE, 0, &update).unwrap();

    let measures = db.read_experiment_measures(SCOPE, &MeasureQuery::default()).unwrap();
    assert_eq!(measures.value(ids[0], "net_benefits"), Some(&Value::Float(120.0)));
    assert_eq!(measures.value(ids[0], "build_cost"), Some(&Value::Float(5.0)));
}

#[test]
fn test_measures_for_missing_scope_are_ignored() {
    let (db, _temp) = create_db();
    db.write_experiment_measures("nowhere", 0, &measure_rows(&[(1, 1.0, 1.0)]))
        .unwrap();
    assert_eq!(db.stats().unwrap().measure_count, 0);
}

#[test]
fn test_measure_write_validation() {
    let (db, _temp) = create_db();
    let ids = db
        .write_experiment_parameters(SCOPE, "lhs", &design_rows(&[(0.1, 1.0, 0.0)]))
        .unwrap();

    let mut unindexed = Table::new(["net_benefits"]);
    unindexed.push_row(vec![Value::Float(1.0)]).unwrap();
    assert!(db.write_experiment_measures(SCOPE, 0, &unindexed).unwrap_err().is_invalid_argument());

    let mut not_a_measure = Table::new(["alpha"]);
    not_a_measure.push_indexed(ids[0], vec![Value::Float(1.0)]).unwrap();
    assert!(db.write_experiment_measures(SCOPE, 0, &not_a_measure).unwrap_err().is_invalid_argument());

    let unknown_experiment = measure_rows(&[(ids[0] + 1000, 1.0, 1.0)]);
    assert!(db.write_experiment_measures(SCOPE, 0, &unknown_experiment).unwrap_err().is_not_found());
}

#[test]
fn test_ambiguous_source() {
    let (db, _temp) = create_db();
    let ids = db
        .write_experiment_parameters(SCOPE, "lhs", &design_rows(&[(0.1, 1.0, 0.0)]))
        .unwrap();

    db.write_experiment_measures(SCOPE, 0, &measure_rows(&[(ids[0], 100.0, 5.0)])).unwrap();
    db.write_experiment_measures(SCOPE, 3, &measure_rows(&[(ids[0], 90.0, 4.0)])).unwrap();

    let err = db.read_experiment_all(SCOPE, &ExperimentQuery::design("lhs")).unwrap_err();
    assert!(err.is_ambiguous_source());
    let err = db.read_experiment_measures(SCOPE, &MeasureQuery::design("lhs")).unwrap_err();
    assert!(err.is_ambiguous_source());

    let core = db
        .read_experiment_all(SCOPE, &ExperimentQuery::design("lhs").source(0))
        .unwrap();
    assert_eq!(core.value(ids[0], "net_benefits"), Some(&Value::Float(100.0)));
    let meta = db
        .read_experiment_measures(SCOPE, &MeasureQuery::design("lhs").source(3))
        .unwrap();
    assert_eq!(meta.value(ids[0], "net_benefits"), Some(&Value::Float(90.0)));
}

#[test]
fn test_no_measures_reads_parameters_only() {
    let (db, _temp) = create_db();
    let ids = db
        .write_experiment_parameters(SCOPE, "lhs", &design_rows(&[(0.1, 1.0, 0.0)]))
        .unwrap();

    let all = db.read_experiment_all(SCOPE, &ExperimentQuery::default()).unwrap();
    assert_eq!(all.value(ids[0], "alpha"), Some(&Value::Float(0.1)));
    assert_eq!(all.value(ids[0], "net_benefits"), Some(&Value::Null));

    let measures = db.read_experiment_measures(SCOPE, &MeasureQuery::default()).unwrap();
    assert!(measures.is_empty());
    assert_eq!(measures.columns(), &["build_cost", "net_benefits"]);
}

#[test]
fn test_write_all_conflict_and_overwrite() {
    let (db, _temp) = create_db();

    let mut rows = Table::new(["alpha", "beta", "expand_capacity", "net_benefits"]);
    rows.push_row(vec![Value::Float(0.1), Value::Float(1.0), Value::Float(0.0), Value::Float(10.0)])
        .unwrap();
    rows.push_row(vec![Value::Float(0.2), Value::Float(2.0), Value::Float(0.0), Value::Float(20.0)])
        .unwrap();

    let ids = db
        .write_experiment_all(SCOPE, "lhs", 0, &rows, &WriteAllOptions::default())
        .unwrap();
    assert_eq!(ids.len(), 2);

    let err = db
        .write_experiment_all(SCOPE, "lhs", 0, &rows, &WriteAllOptions::default())
        .unwrap_err();
    assert!(err.is_conflict());

    let again = db
        .write_experiment_all(SCOPE, "lhs", 0, &rows, &WriteAllOptions { overwrite: true })
        .unwrap();
    assert_eq!(again, ids);
    assert_eq!(db.stats().unwrap().experiment_count, 2);
}

#[test]
fn test_write_all_keeps_explicit_ids_in_their_design() {
    let (db, _temp) = create_db();
    let ids = db
        .write_experiment_parameters(SCOPE, "lhs", &design_rows(&[(0.1, 1.0, 0.0)]))
        .unwrap();

    let mut rows = Table::new(["alpha", "beta", "expand_capacity", "net_benefits"]);
    rows.push_indexed(ids[0], vec![Value::Float(0.9), Value::Float(1.0), Value::Float(0.0), Value::Float(5.0)])
        .unwrap();

    let err = db
        .write_experiment_all(SCOPE, "other_design", 0, &rows, &WriteAllOptions::default())
        .unwrap_err();
    assert!(err.is_invalid_argument());

    let stored = db.read_experiment_parameters(SCOPE, &ParameterQuery::design("lhs")).unwrap();
    assert_eq!(stored.value(ids[0], "alpha"), Some(&Value::Float(0.1)));
    assert_eq!(db.read_design_names(SCOPE).unwrap(), vec!["lhs"]);
    assert_eq!(db.stats().unwrap().measure_count, 0);

    db.write_experiment_all(SCOPE, "lhs", 0, &rows, &WriteAllOptions { overwrite: true })
        .unwrap();
    let updated = db.read_experiment_all(SCOPE, &ExperimentQuery::design("lhs")).unwrap();
    assert_eq!(updated.value(ids[0], "alpha"), Some(&Value::Float(0.9)));
    assert_eq!(updated.value(ids[0], "net_benefits"), Some(&Value::Float(5.0)));
}

#[test]
fn test_ragged_table_rejected_before_write() {
    let (db, _temp) = create_db();
    let parsed = serde_json::from_str::<Table>(r#"{"columns":["alpha","beta"],"rows":[{"values":[0.1]}]}"#);
    assert!(parsed.is_err());
    assert!(db.read_design_names(SCOPE).unwrap().is_empty());
}

#[test]
fn test_nan_measure_is_not_recorded() {
    let (db, _temp) = create_db();
    let ids = db
        .write_experiment_parameters(SCOPE, "lhs", &design_rows(&[(0.1, 1.0, 0.0)]))
        .unwrap();

    db.write_experiment_measures(SCOPE, 0, &measure_rows(&[(ids[0], f64::NAN, f64::NAN)]))
        .unwrap();

    let pending = db
        .read_experiment_parameters(SCOPE, &ParameterQuery::design("lhs").pending())
        .unwrap();
    assert_eq!(pending.ids(), ids);
    assert_eq!(db.stats().unwrap().measure_count, 0);
}

#[test]
fn test_read_experiment_ids() {
    let (db, _temp) = create_db();
    let ids = db
        .write_experiment_parameters(SCOPE, "lhs", &design_rows(&[(0.1, 1.0, 0.0), (0.1, 2.0, 0.0)]))
        .unwrap();

    let mut exact = Table::new(["alpha", "beta"]);
    exact.push_row(vec![Value::Float(0.1), Value::Int(2)]).unwrap();
    exact.push_row(vec![Value::Float(0.9), Value::Float(9.0)]).unwrap();
    assert_eq!(db.read_experiment_ids(SCOPE, Some("lhs"), &exact).unwrap(), vec![Some(ids[1]), None]);

    let mut ambiguous = Table::new(["alpha"]);
    ambiguous.push_row(vec![Value::Float(0.1)]).unwrap();
    let err = db.read_experiment_ids(SCOPE, None, &ambiguous).unwrap_err();
    assert!(err.is_invalid_argument());
}

#[test]
fn test_ensure_dtypes() {
    let temp = TempDir::new().unwrap();
    let db = SqliteDatabase::open_path(temp.path().join("typed.db")).unwrap();
    let scope = ScopeDefinition::new("typed")
        .with_variable("toll", VariableKind::Lever, DType::Bool)
        .with_variable("lanes", VariableKind::Lever, DType::Int)
        .with_measure("delay", "local");
    register(&db, &scope);

    let mut rows = Table::new(["toll", "lanes"]);
    rows.push_row(vec![Value::Bool(true), Value::Float(3.0)]).unwrap();
    let ids = db.write_experiment_parameters("typed", "manual", &rows).unwrap();

    let raw = db.read_experiment_all("typed", &ExperimentQuery::default()).unwrap();
    assert_eq!(raw.value(ids[0], "toll"), Some(&Value::Int(1)));

    let typed = db.read_experiment_all("typed", &ExperimentQuery::default().typed()).unwrap();
    assert_eq!(typed.value(ids[0], "toll"), Some(&Value::Bool(true)));
    assert_eq!(typed.value(ids[0], "lanes"), Some(&Value::Int(3)));
}

#[test]
fn test_metamodels() {
    let (db, _temp) = create_db();

    assert!(db.read_metamodel(SCOPE, None).unwrap_err().is_not_found());

    let first = db.get_new_metamodel_id(SCOPE).unwrap();
    let second = db.get_new_metamodel_id(SCOPE).unwrap();
    assert!(second > first);

    let id = db
        .write_metamodel(SCOPE, &Metamodel::new(b"model-a".to_vec()), None, Some("gp"))
        .unwrap();
    assert!(id > second);

    let read = db.read_metamodel(SCOPE, None).unwrap();
    assert_eq!(read.metamodel_id, Some(id));
    assert_eq!(read.name, "gp");
    assert_eq!(read.payload, b"model-a".to_vec());

    db.write_metamodel(SCOPE, &Metamodel::new(b"model-b".to_vec()), Some(first), None)
        .unwrap();
    assert_eq!(db.read_metamodel_ids(SCOPE).unwrap(), vec![first, id]);
    assert!(db.read_metamodel(SCOPE, None).unwrap_err().is_ambiguous_source());
    assert_eq!(db.read_metamodel(SCOPE, Some(first)).unwrap().payload, b"model-b".to_vec());
}

#[test]
fn test_metamodel_ids_across_threads() {
    let (db, _temp) = create_db();
    let db = Arc::new(db);

    let handles: Vec<_> = (0..4)
        .map(|_| {
            let db = Arc::clone(&db);
            thread::spawn(move || {
                (0..10)
                    .map(|_| db.get_new_metamodel_id(SCOPE).unwrap())
                    .collect::<Vec<_>>()
            })
        })
        .collect();

    let mut all: Vec<_> = handles.into_iter().flat_map(|h| h.join().unwrap()).collect();
    all.sort_unstable();
    all.dedup();
    assert_eq!(all.len(), 40);
}

#[test]
fn test_box_hierarchy() {
    let (db, _temp) = create_db();
    let scope = Arc::new(road_test_scope());

    let mut boxes = Boxes::with_scope(Arc::clone(&scope));
    boxes.insert(ScenarioBox::new("high_alpha").with_bounds("alpha", Some(0.15), None));
    boxes.insert(
        ScenarioBox::new("high_alpha_no_build")
            .with_parent("high_alpha")
            .with_allowed("expand_capacity", vec![Value::Float(0.0)])
            .with_relevant("net_benefits"),
    );
    db.write_boxes(&boxes, None).unwrap();

    assert_eq!(db.read_box_names(SCOPE).unwrap(), vec!["high_alpha", "high_alpha_no_build"]);
    assert_eq!(
        db.read_box_parent_name(SCOPE, "high_alpha_no_build").unwrap().as_deref(),
        Some("high_alpha")
    );
    assert_eq!(db.read_box_parent_name(SCOPE, "high_alpha").unwrap(), None);
    assert!(db.read_box_parent_name(SCOPE, "absent").unwrap_err().is_not_found());

    let parents = db.read_box_parent_names(SCOPE).unwrap();
    assert_eq!(parents.len(), db.read_box_names(SCOPE).unwrap().len());
    for (name, parent) in &parents {
        assert_eq!(&db.read_box_parent_name(SCOPE, name).unwrap(), parent);
    }

    let read = db.read_boxes(SCOPE, Some(Arc::clone(&scope))).unwrap();
    assert_eq!(read.children("high_alpha"), vec!["high_alpha_no_build"]);
    let child = read.get("high_alpha_no_build").unwrap();
    assert!(child.relevant_features.contains("net_benefits"));
    assert_eq!(child.bound_scope_name(), Some(SCOPE));

    let single = db.read_box(SCOPE, "high_alpha", None).unwrap();
    assert_eq!(single.thresholds.len(), 1);
    assert!(single.scope.is_none());
}

#[test]
fn test_box_scope_resolution() {
    let (db, _temp) = create_db();

    let unbound = ScenarioBox::new("b");
    assert!(db.write_box(&unbound, None).unwrap_err().is_invalid_argument());
    db.write_box(&unbound, Some(SCOPE)).unwrap();

    let bound = ScenarioBox::new("c").with_scope(Arc::new(road_test_scope()));
    assert!(db.write_box(&bound, Some("other")).unwrap_err().is_conflict());

    let orphan = ScenarioBox::new("d").with_parent("missing");
    assert!(db.write_box(&orphan, Some(SCOPE)).unwrap_err().is_not_found());
}

#[test]
fn test_delete_scope_cascades() {
    let (db, _temp) = create_db();
    let ids = db
        .write_experiment_parameters(SCOPE, "lhs", &design_rows(&[(0.1, 1.0, 0.0)]))
        .unwrap();
    db.write_experiment_measures(SCOPE, 0, &measure_rows(&[(ids[0], 1.0, 1.0)])).unwrap();
    db.write_metamodel(SCOPE, &Metamodel::new(vec![7u8]), None, None).unwrap();
    db.write_box(&ScenarioBox::new("b").with_bounds("alpha", Some(0.0), Some(1.0)), Some(SCOPE))
        .unwrap();

    assert!(db.delete_scope(SCOPE).unwrap());
    assert!(!db.delete_scope(SCOPE).unwrap());

    let stats = db.stats().unwrap();
    assert_eq!(stats.scope_count, 0);
    assert_eq!(stats.experiment_count, 0);
    assert_eq!(stats.measure_count, 0);
    assert_eq!(stats.metamodel_count, 0);
    assert_eq!(stats.box_count, 0);

    assert!(!db.read_scope_names(None).unwrap().contains(&SCOPE.to_string()));
    assert!(db
        .read_experiment_parameters(SCOPE, &ParameterQuery::default())
        .unwrap_err()
        .is_not_found());
    assert!(db.read_boxes(SCOPE, None).unwrap_err().is_not_found());
    assert!(db.read_metamodel_ids(SCOPE).unwrap_err().is_not_found());

    // The universe survives, so the scope can be registered again
    register(&db, &road_test_scope());
    assert!(db.read_design_names(SCOPE).unwrap().is_empty());
}

#[test]
fn test_reopen_persists() {
    let temp = TempDir::new().unwrap();
    let path = temp.path().join("emat.db");

    let ids = {
        let db = SqliteDatabase::open_path(&path).unwrap();
        register(&db, &road_test_scope());
        db.write_experiment_parameters(SCOPE, "lhs", &design_rows(&[(0.1, 1.0, 0.0)]))
            .unwrap()
    };

    let db = SqliteDatabase::open_path(&path).unwrap();
    let table = db.read_experiment_parameters(SCOPE, &ParameterQuery::default()).unwrap();
    assert_eq!(table.ids(), ids);

    let next = db
        .write_experiment_parameters(SCOPE, "lhs", &design_rows(&[(0.2, 2.0, 0.0)]))
        .unwrap();
    assert!(next[0] > ids[0]);
}
