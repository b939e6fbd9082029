//! Composition tests against a small simulation config directory.

use std::{fs, path::Path};

use plan_config::{Composer, ConfigError, Override, Value};
use tempfile::{TempDir, tempdir};

fn write(root: &Path, rel: &str, content: &str) {
    let path = root.join(rel);
    fs::create_dir_all(path.parent().unwrap()).unwrap();
    fs::write(path, content).unwrap();
}

/// A config directory shaped like a simulation entry point.
fn simulation_config_dir() -> TempDir {
    let dir = tempdir().unwrap();
    let root = dir.path();

    write(
        root,
        "default_simulation.toml",
        r#"
experiment_name = "simulation"
job_name = "default"
group = "/tmp/exp"

[defaults]
scenario_builder = "nuplan"
scenario_filter = "all_scenarios"
planner = "simple_planner"
model = "raster_model"
"#,
    );
    write(
        root,
        "scenario_builder/nuplan.toml",
        "data_root = \"/data/sets/nuplan\"\n",
    );
    write(
        root,
        "scenario_builder/nuplan_mini.toml",
        "data_root = \"/data/sets/nuplan/mini\"\n",
    );
    write(
        root,
        "scenario_filter/all_scenarios.toml",
        r#"
scenario_types = []
num_scenarios_per_type = 10
limit_total_scenarios = 100
"#,
    );
    write(
        root,
        "scenario_filter/nuplan_mini.toml",
        r#"
scenario_types = ["starting_left_turn"]
num_scenarios_per_type = 5
limit_total_scenarios = 50
"#,
    );
    write(
        root,
        "planner/simple_planner.toml",
        r#"
[simple_planner]
horizon_seconds = 10.0
"#,
    );
    write(
        root,
        "planner/ml_planner.toml",
        r#"
[ml_planner]
model_config = "???"
checkpoint_path = "???"
"#,
    );
    write(
        root,
        "model/raster_model.toml",
        r#"
model_name = "raster_model"
num_input_channels = 4
"#,
    );
    write(
        root,
        "simulation/closed_loop_nonreactive_agents.toml",
        r#"
_package_ = "_global_"

[defaults]
observation = "box_observation"

[ego_controller]
controller = "two_stage_controller"
"#,
    );
    write(
        root,
        "observation/box_observation.toml",
        "kind = \"boxes\"\n",
    );
    dir
}

fn overrides(items: &[&str]) -> Vec<Override> {
    Override::parse_all(items).unwrap()
}

#[test]
fn test_defaults_compose() {
    let dir = simulation_config_dir();
    let cfg = Composer::new(dir.path())
        .compose("default_simulation", &[])
        .unwrap();

    assert_eq!(
        cfg.get("scenario_builder.data_root").and_then(Value::as_str),
        Some("/data/sets/nuplan")
    );
    assert!(cfg.contains("planner.simple_planner.horizon_seconds"));
    assert!(!cfg.contains("defaults"));
    assert_eq!(
        cfg.keys().collect::<Vec<_>>(),
        vec![
            "scenario_builder",
            "scenario_filter",
            "planner",
            "model",
            "experiment_name",
            "job_name",
            "group"
        ]
    );
}

#[test]
fn test_group_selection_replaces_subtree() {
    let dir = simulation_config_dir();
    let cfg = Composer::new(dir.path())
        .compose(
            "default_simulation",
            &overrides(&[
                // value override listed before its group selection still lands on the new option
                "scenario_filter.num_scenarios_per_type=1",
                "scenario_filter=nuplan_mini",
                "scenario_builder=nuplan_mini",
                "planner=ml_planner",
            ]),
        )
        .unwrap();

    assert_eq!(
        cfg.get("scenario_filter.num_scenarios_per_type"),
        Some(&Value::Integer(1))
    );
    assert_eq!(
        cfg.get("scenario_filter.limit_total_scenarios"),
        Some(&Value::Integer(50))
    );
    assert_eq!(
        cfg.get("scenario_builder.data_root").and_then(Value::as_str),
        Some("/data/sets/nuplan/mini")
    );
    assert!(cfg.contains("planner.ml_planner"));
    assert!(!cfg.contains("planner.simple_planner"));
}

#[test]
fn test_ml_planner_overrides() {
    let dir = simulation_config_dir();
    let cfg = Composer::new(dir.path())
        .compose(
            "default_simulation",
            &overrides(&[
                "planner=ml_planner",
                "planner.ml_planner.model_config=${model}",
                "planner.ml_planner.checkpoint_path=\"/tmp/save/last.ckpt\"",
                "+simulation=closed_loop_nonreactive_agents",
                "scenario_filter.scenario_types=[near_multiple_vehicles]",
            ]),
        )
        .unwrap();

    assert_eq!(
        cfg.get("planner.ml_planner.model_config.model_name")
            .and_then(Value::as_str),
        Some("raster_model")
    );
    assert_eq!(
        cfg.get("planner.ml_planner.checkpoint_path")
            .and_then(Value::as_str),
        Some("/tmp/save/last.ckpt")
    );
    // global package merges into the root, nested defaults are placed too
    assert_eq!(
        cfg.get("ego_controller.controller").and_then(Value::as_str),
        Some("two_stage_controller")
    );
    assert_eq!(
        cfg.get("observation.kind").and_then(Value::as_str),
        Some("boxes")
    );
    assert!(!cfg.contains("simulation"));
    assert_eq!(
        cfg.get("scenario_filter.scenario_types"),
        Some(&Value::Array(vec![Value::String(
            "near_multiple_vehicles".to_string()
        )]))
    );
}

#[test]
fn test_group_errors() {
    let dir = simulation_config_dir();
    let composer = Composer::new(dir.path());

    let err = composer
        .compose("default_simulation", &overrides(&["simulation=closed_loop_nonreactive_agents"]))
        .unwrap_err();
    assert!(matches!(err, ConfigError::GroupNotSelected { ref group, .. } if group == "simulation"));

    let err = composer
        .compose("default_simulation", &overrides(&["+planner=ml_planner"]))
        .unwrap_err();
    assert!(matches!(err, ConfigError::GroupAlreadySelected(ref g) if g == "planner"));

    let err = composer
        .compose("default_simulation", &overrides(&["planner=imitation_planner"]))
        .unwrap_err();
    match err {
        ConfigError::UnknownOption { available, .. } => {
            assert_eq!(available, "ml_planner, simple_planner");
        }
        other => panic!("unexpected error: {other}"),
    }

    let err = composer.compose("missing", &[]).unwrap_err();
    assert!(matches!(err, ConfigError::NotFound { .. }));
}

#[test]
fn test_group_delete() {
    let dir = simulation_config_dir();
    let cfg = Composer::new(dir.path())
        .compose("default_simulation", &overrides(&["~planner"]))
        .unwrap();
    assert!(!cfg.contains("planner"));
}

#[test]
fn test_value_override_validation() {
    let dir = simulation_config_dir();
    let composer = Composer::new(dir.path());

    let err = composer
        .compose("default_simulation", &overrides(&["output_dir=/tmp/out"]))
        .unwrap_err();
    assert!(matches!(err, ConfigError::MissingKey(ref k) if k == "output_dir"));

    let cfg = composer
        .compose("default_simulation", &overrides(&["+output_dir=/tmp/out"]))
        .unwrap();
    assert_eq!(cfg.get("output_dir").and_then(Value::as_str), Some("/tmp/out"));
}

#[test]
fn test_compositions_are_independent() {
    let dir = simulation_config_dir();
    let composer = Composer::new(dir.path());

    let first = composer
        .compose(
            "default_simulation",
            &overrides(&["experiment_name=debug_simulation", "planner=ml_planner"]),
        )
        .unwrap();
    let second = composer.compose("default_simulation", &[]).unwrap();

    assert_eq!(
        first.get("experiment_name").and_then(Value::as_str),
        Some("debug_simulation")
    );
    assert_eq!(
        second.get("experiment_name").and_then(Value::as_str),
        Some("simulation")
    );
    assert!(second.contains("planner.simple_planner"));
}

/// `main` selects `planner=ml`, whose own defaults select `model=raster`.
fn nested_config_dir() -> TempDir {
    let dir = tempdir().unwrap();
    let root = dir.path();
    write(root, "main.toml", "[defaults]\nplanner = \"ml\"\n");
    write(root, "planner/ml.toml", "horizon = 8\n\n[defaults]\nmodel = \"raster\"\n");
    write(root, "planner/simple.toml", "horizon = 10\n");
    write(root, "model/raster.toml", "name = \"raster\"\n");
    write(root, "model/vector.toml", "name = \"vector\"\n");
    dir
}

#[test]
fn test_nested_group_overrides() {
    let dir = nested_config_dir();
    let composer = Composer::new(dir.path());

    let cfg = composer.compose("main", &[]).unwrap();
    assert_eq!(cfg.get("model.name").and_then(Value::as_str), Some("raster"));

    let cfg = composer.compose("main", &overrides(&["model=vector"])).unwrap();
    assert_eq!(cfg.get("model.name").and_then(Value::as_str), Some("vector"));
    assert_eq!(cfg.get("planner.horizon"), Some(&Value::Integer(8)));

    let cfg = composer.compose("main", &overrides(&["++model=vector"])).unwrap();
    assert_eq!(cfg.get("model.name").and_then(Value::as_str), Some("vector"));

    let cfg = composer.compose("main", &overrides(&["~model=raster"])).unwrap();
    assert!(!cfg.contains("model"));
    assert!(cfg.contains("planner.horizon"));

    let err = composer.compose("main", &overrides(&["~model=vector"])).unwrap_err();
    assert!(matches!(err, ConfigError::DeleteMismatch { ref found, .. } if found == "raster"));

    let err = composer.compose("main", &overrides(&["+model=vector"])).unwrap_err();
    assert!(matches!(err, ConfigError::GroupAlreadySelected(ref g) if g == "model"));

    // switching away from the option that selected the group leaves nothing to override
    let err = composer
        .compose("main", &overrides(&["planner=simple", "model=vector"]))
        .unwrap_err();
    assert!(matches!(err, ConfigError::GroupNotSelected { ref group, .. } if group == "model"));

    let cfg = composer
        .compose("main", &overrides(&["planner=simple", "+model=vector"]))
        .unwrap();
    assert_eq!(cfg.get("model.name").and_then(Value::as_str), Some("vector"));
}
