//! Configuration parsing for the harness.
//!
//! `harness.toml` says where the framework's config directories live, which
//! command runs each entry point, and how the pipelines are parameterized.

use std::{
    collections::BTreeMap,
    path::{Path, PathBuf},
};

use serde::{Deserialize, Serialize};

use crate::job::EntryPoint;

/// Top-level harness configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct HarnessConfig {
    pub harness: HarnessSettings,
    pub entry_points: EntryPoints,
    pub pipeline: PipelineSettings,
    pub debug_sim: DebugSimSettings,
}

/// Harness-level settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HarnessSettings {
    /// Root that entry point `config_dir`s are relative to.
    /// Relative paths are resolved against the harness file's directory.
    #[serde(default = "default_config_root")]
    pub config_root: PathBuf,
    /// Where training output and checkpoints are kept between runs.
    #[serde(default = "default_save_dir")]
    pub save_dir: PathBuf,
    /// Environment variables passed to every framework command.
    #[serde(default)]
    pub env: BTreeMap<String, String>,
    /// Flag that precedes the composed config file on the command line.
    #[serde(default = "default_config_flag")]
    pub config_flag: String,
    /// File extension of checkpoint files, without the dot.
    #[serde(default = "default_checkpoint_extension")]
    pub checkpoint_extension: String,
    /// Substring marking the most recently saved checkpoint.
    #[serde(default = "default_checkpoint_marker")]
    pub checkpoint_marker: String,
    /// Compose and write configs, log the commands, but do not run them.
    #[serde(default)]
    pub dry_run: bool,
}

impl Default for HarnessSettings {
    fn default() -> Self {
        Self {
            config_root: default_config_root(),
            save_dir: default_save_dir(),
            env: BTreeMap::new(),
            config_flag: default_config_flag(),
            checkpoint_extension: default_checkpoint_extension(),
            checkpoint_marker: default_checkpoint_marker(),
            dry_run: false,
        }
    }
}

/// How to run one framework entry point.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EntryPointConfig {
    /// Program and leading arguments.
    pub command: Vec<String>,
    /// Config directory, relative to `config_root`.
    pub config_dir: PathBuf,
    /// Primary config file name, without `.toml`.
    pub config_name: String,
}

impl EntryPointConfig {
    fn new(module: &str, config_dir: &str, config_name: &str) -> Self {
        Self {
            command: vec!["python".into(), "-m".into(), module.into()],
            config_dir: PathBuf::from(config_dir),
            config_name: config_name.into(),
        }
    }
}

/// Commands and config locations for each entry point.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EntryPoints {
    #[serde(default = "default_training")]
    pub training: EntryPointConfig,
    #[serde(default = "default_simulation")]
    pub simulation: EntryPointConfig,
    #[serde(default = "default_dashboard")]
    pub dashboard: EntryPointConfig,
}

impl Default for EntryPoints {
    fn default() -> Self {
        Self {
            training: default_training(),
            simulation: default_simulation(),
            dashboard: default_dashboard(),
        }
    }
}

impl EntryPoints {
    #[must_use]
    pub fn get(&self, entry: EntryPoint) -> &EntryPointConfig {
        match entry {
            EntryPoint::Training => &self.training,
            EntryPoint::Simulation => &self.simulation,
            EntryPoint::Dashboard => &self.dashboard,
        }
    }
}

/// Parameters of the train-then-simulate pipeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineSettings {
    pub train_experiment: String,
    pub train_job: String,
    pub sim_experiment: String,
    pub sim_job: String,
    pub planner: String,
    pub model: String,
    pub challenge: String,
    /// Extra training overrides, applied after the harness-managed ones.
    pub training_overrides: Vec<String>,
    /// Scenario selection for the simulation.
    pub dataset_overrides: Vec<String>,
    /// Open the dashboard on the simulation output when done.
    pub dashboard: bool,
    pub dashboard_overrides: Vec<String>,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            train_experiment: "training_raster_experiment".into(),
            train_job: "train_default_raster".into(),
            sim_experiment: "simulation_ml_planner_experiment".into(),
            sim_job: "sim_ml_debug".into(),
            planner: "ml_planner".into(),
            model: "raster_model".into(),
            challenge: "closed_loop_nonreactive_agents".into(),
            training_overrides: strings(&[
                "py_func=train",
                "+training=training_raster_model",
                "scenario_builder=nuplan_mini",
                // too few scenarios leaves the validation split empty
                "scenario_filter.limit_total_scenarios=20",
                "lightning.trainer.params.accelerator=ddp_spawn",
                "lightning.trainer.params.max_epochs=1",
                "data_loader.params.batch_size=2",
                "data_loader.params.num_workers=0",
            ]),
            dataset_overrides: strings(&[
                "scenario_builder=nuplan_mini",
                "scenario_filter=all_scenarios",
                "scenario_filter.scenario_types=[near_multiple_vehicles]",
                "scenario_filter.num_scenarios_per_type=1",
                "scenario_filter.limit_total_scenarios=5",
            ]),
            dashboard: false,
            dashboard_overrides: strings(&["scenario_builder=nuplan_mini"]),
        }
    }
}

/// Parameters of the debug simulation.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DebugSimSettings {
    pub overrides: Vec<String>,
    /// Section holding the planner configuration.
    pub planner_key: String,
    /// Flag that passes the split-out planner file to the simulation command.
    pub planner_flag: String,
}

impl Default for DebugSimSettings {
    fn default() -> Self {
        Self {
            overrides: strings(&[
                "group=debug_sim",
                "experiment_name=debug_simulation",
                "scenario_builder=nuplan_mini",
                "scenario_filter=nuplan_mini",
                "scenario_filter.num_scenarios_per_type=1",
                "observation=box_observation",
                "ego_controller=log_play_back_controller",
                "planner=simple_planner",
            ]),
            planner_key: "planner".into(),
            planner_flag: "--planner-config".into(),
        }
    }
}

fn strings(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| (*s).to_string()).collect()
}

fn default_config_root() -> PathBuf {
    PathBuf::from(".")
}

fn default_save_dir() -> PathBuf {
    std::env::temp_dir().join("plan_harness_tutorial")
}

fn default_config_flag() -> String {
    "--config".to_string()
}

fn default_checkpoint_extension() -> String {
    "ckpt".to_string()
}

fn default_checkpoint_marker() -> String {
    "last".to_string()
}

fn default_training() -> EntryPointConfig {
    EntryPointConfig::new("planning.run_training", "config/training", "default_training")
}

fn default_simulation() -> EntryPointConfig {
    EntryPointConfig::new(
        "planning.run_simulation",
        "config/simulation",
        "default_simulation",
    )
}

fn default_dashboard() -> EntryPointConfig {
    EntryPointConfig::new("planning.run_nuboard", "config/nuboard", "default_nuboard")
}

impl HarnessConfig {
    /// Load configuration from a TOML file.
    ///
    /// A relative `config_root` is resolved against the file's directory.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, SettingsError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .map_err(|e| SettingsError::Io(path.display().to_string(), e))?;
        let mut config: Self =
            toml::from_str(&content).map_err(|e| SettingsError::Parse(e.to_string()))?;

        if config.harness.config_root.is_relative()
            && let Some(parent) = path.parent()
        {
            config.harness.config_root = parent.join(&config.harness.config_root);
        }
        config.validate()?;
        Ok(config)
    }

    /// Load from `path` if it exists, otherwise use defaults.
    pub fn load_or_default(path: impl AsRef<Path>) -> Result<Self, SettingsError> {
        let path = path.as_ref();
        if path.exists() {
            Self::load(path)
        } else {
            tracing::info!(
                "No harness config at {}, using defaults",
                path.display()
            );
            Ok(Self::default())
        }
    }

    /// Absolute (or config-root-relative) config directory of an entry point.
    #[must_use]
    pub fn config_dir(&self, entry: EntryPoint) -> PathBuf {
        self.harness
            .config_root
            .join(&self.entry_points.get(entry).config_dir)
    }

    fn validate(&self) -> Result<(), SettingsError> {
        for entry in EntryPoint::ALL {
            if self.entry_points.get(entry).command.is_empty() {
                return Err(SettingsError::Validation(format!(
                    "entry_points.{entry}.command must not be empty"
                )));
            }
        }
        if self.harness.checkpoint_extension.is_empty() {
            return Err(SettingsError::Validation(
                "harness.checkpoint_extension must not be empty".into(),
            ));
        }
        Ok(())
    }
}

/// Errors that can occur when loading harness configuration.
#[derive(Debug, thiserror::Error)]
pub enum SettingsError {
    #[error("failed to read harness config {0}: {1}")]
    Io(String, std::io::Error),
    #[error("failed to parse harness config: {0}")]
    Parse(String),
    #[error("invalid harness config: {0}")]
    Validation(String),
}

#[cfg(test)]
mod tests {
    use tempfile::tempdir;

    use super::*;

    fn parse_config(toml_str: &str) -> (tempfile::TempDir, HarnessConfig) {
        let dir = tempdir().unwrap();
        let path = dir.path().join("harness.toml");
        std::fs::write(&path, toml_str).unwrap();
        let config = HarnessConfig::load(&path).unwrap();
        (dir, config)
    }

    #[test]
    fn test_parse_minimal_config() {
        let (dir, config) = parse_config("");
        assert_eq!(config.harness.config_root, dir.path().join("."));
        assert_eq!(config.harness.checkpoint_marker, "last");
        assert_eq!(config.entry_points.training.config_name, "default_training");
        assert_eq!(config.pipeline.planner, "ml_planner");
        assert_eq!(config.debug_sim.planner_key, "planner");
    }

    #[test]
    fn test_entry_point_override() {
        let (dir, config) = parse_config(
            r#"
[harness]
config_root = "framework"
save_dir = "/tmp/save"

[harness.env]
CUDA_VISIBLE_DEVICES = "0"

[entry_points.simulation]
command = ["sh", "run_sim.sh"]
config_dir = "sim"
config_name = "sim_base"
"#,
        );
        assert_eq!(config.harness.save_dir, PathBuf::from("/tmp/save"));
        assert_eq!(config.harness.env.get("CUDA_VISIBLE_DEVICES").unwrap(), "0");
        assert_eq!(config.entry_points.simulation.command, vec!["sh", "run_sim.sh"]);
        assert_eq!(
            config.config_dir(EntryPoint::Simulation),
            dir.path().join("framework").join("sim")
        );
        // untouched entry points keep their defaults
        assert_eq!(config.entry_points.training.config_name, "default_training");
    }

    #[test]
    fn test_pipeline_partial_override() {
        let (_dir, config) = parse_config(
            r#"
[pipeline]
challenge = "open_loop_boxes"
dashboard = true
"#,
        );
        assert_eq!(config.pipeline.challenge, "open_loop_boxes");
        assert!(config.pipeline.dashboard);
        assert_eq!(config.pipeline.model, "raster_model");
        assert!(!config.pipeline.dataset_overrides.is_empty());
    }

    #[test]
    fn test_empty_command_rejected() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("harness.toml");
        std::fs::write(
            &path,
            r#"
[entry_points.training]
command = []
config_dir = "config/training"
config_name = "default_training"
"#,
        )
        .unwrap();
        let err = HarnessConfig::load(&path).unwrap_err();
        assert!(matches!(err, SettingsError::Validation(_)));
    }

    #[test]
    fn test_load_or_default_missing_file() {
        let dir = tempdir().unwrap();
        let config = HarnessConfig::load_or_default(dir.path().join("absent.toml")).unwrap();
        assert_eq!(config.harness.config_flag, "--config");
    }
}
