//! Framework jobs: a composed configuration bound to one entry point.

use std::{
    fmt,
    path::{Path, PathBuf},
};

use chrono::{DateTime, Local};
use plan_config::{Composer, ConfigError, ConfigTree, Override, OverrideError, Value};
use serde::{Deserialize, Serialize};

use crate::config::HarnessConfig;

/// Name of the composed config file written into a job's output directory.
pub const CONFIG_FILE: &str = "config.toml";

/// An entry point of the external framework.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum EntryPoint {
    #[value(alias = "train")]
    Training,
    #[value(alias = "sim")]
    Simulation,
    #[value(alias = "nuboard")]
    Dashboard,
}

impl EntryPoint {
    pub const ALL: [EntryPoint; 3] = [Self::Training, Self::Simulation, Self::Dashboard];
}

impl fmt::Display for EntryPoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Training => write!(f, "training"),
            Self::Simulation => write!(f, "simulation"),
            Self::Dashboard => write!(f, "dashboard"),
        }
    }
}

impl std::str::FromStr for EntryPoint {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "training" | "train" => Ok(Self::Training),
            "simulation" | "sim" => Ok(Self::Simulation),
            "dashboard" | "nuboard" => Ok(Self::Dashboard),
            _ => Err(format!(
                "unknown entry point '{s}' (expected training, simulation or dashboard)"
            )),
        }
    }
}

/// A composed configuration ready to hand to an entry point.
#[derive(Debug, Clone)]
pub struct Job {
    pub entry: EntryPoint,
    pub config: ConfigTree,
    pub output_dir: PathBuf,
    /// Arguments appended after the config file on the command line.
    pub extra_args: Vec<String>,
}

impl Job {
    /// Compose the entry point's primary config with `overrides`.
    ///
    /// Uses a fresh [`Composer`] per call. If the composed config has no
    /// `output_dir`, one is derived and written into it.
    pub fn compose<S: AsRef<str>>(
        harness: &HarnessConfig,
        entry: EntryPoint,
        overrides: &[S],
    ) -> Result<Self, JobError> {
        let overrides = Override::parse_all(overrides)?;
        let composer = Composer::new(harness.config_dir(entry));
        let config_name = &harness.entry_points.get(entry).config_name;
        let config = composer.compose(config_name, &overrides)?;

        tracing::info!(
            "Composed {entry} config {} from {} ({} overrides)",
            config_name,
            composer.config_dir().display(),
            overrides.len()
        );
        for o in &overrides {
            tracing::debug!("  {o}");
        }

        Self::from_config(entry, config, &harness.harness.save_dir, Local::now())
    }

    /// Bind an already composed config to an entry point.
    pub fn from_config(
        entry: EntryPoint,
        mut config: ConfigTree,
        save_dir: &Path,
        now: DateTime<Local>,
    ) -> Result<Self, JobError> {
        let output_dir = match config.get_as::<PathBuf>("output_dir")? {
            Some(dir) => dir,
            None => {
                let group = config.get_as::<PathBuf>("group")?;
                let experiment_name = config.get_as::<String>("experiment_name")?;
                let job_name = config.get_as::<String>("job_name")?;
                let dir = group
                    .unwrap_or_else(|| save_dir.to_path_buf())
                    .join(experiment_name.as_deref().unwrap_or("default_experiment"))
                    .join(job_name.unwrap_or_else(|| entry.to_string()))
                    .join(now.format("%Y.%m.%d.%H.%M.%S").to_string());
                config.set(
                    "output_dir",
                    Value::String(dir.to_string_lossy().into_owned()),
                )?;
                dir
            }
        };

        Ok(Self {
            entry,
            config,
            output_dir,
            extra_args: Vec::new(),
        })
    }

    #[must_use]
    pub fn config_path(&self) -> PathBuf {
        self.output_dir.join(CONFIG_FILE)
    }

    /// Remove a section from the config and return it.
    pub fn split_section(&mut self, key: &str) -> Option<ConfigTree> {
        let section = self.config.section(key)?;
        self.config.remove(key);
        Some(section)
    }

    /// Write the composed config into the output directory.
    pub fn write_config(&self) -> Result<PathBuf, JobError> {
        let path = self.config_path();
        self.write_tree(&path, &self.config)?;
        Ok(path)
    }

    /// Write another tree next to the config, e.g. a split-out section.
    pub fn write_sidecar(&self, file_name: &str, tree: &ConfigTree) -> Result<PathBuf, JobError> {
        let path = self.output_dir.join(file_name);
        self.write_tree(&path, tree)?;
        Ok(path)
    }

    fn write_tree(&self, path: &Path, tree: &ConfigTree) -> Result<(), JobError> {
        std::fs::create_dir_all(&self.output_dir)
            .map_err(|e| JobError::Io(self.output_dir.clone(), e))?;
        let content = tree.to_toml_string()?;
        std::fs::write(path, content).map_err(|e| JobError::Io(path.to_path_buf(), e))
    }
}

/// Errors that can occur while preparing a job.
#[derive(Debug, thiserror::Error)]
pub enum JobError {
    #[error("invalid override: {0}")]
    Override(#[from] OverrideError),
    #[error("config error: {0}")]
    Config(#[from] ConfigError),
    #[error("failed to write {0}: {1}")]
    Io(PathBuf, std::io::Error),
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;
    use tempfile::tempdir;

    use super::*;

    fn fixed_time() -> DateTime<Local> {
        Local.with_ymd_and_hms(2024, 3, 9, 14, 5, 7).unwrap()
    }

    #[test]
    fn test_entry_point_parse() {
        assert_eq!("train".parse::<EntryPoint>().unwrap(), EntryPoint::Training);
        assert_eq!("SIM".parse::<EntryPoint>().unwrap(), EntryPoint::Simulation);
        assert_eq!("nuboard".parse::<EntryPoint>().unwrap(), EntryPoint::Dashboard);
        assert!("replay".parse::<EntryPoint>().is_err());
        assert_eq!(EntryPoint::Simulation.to_string(), "simulation");
    }

    #[test]
    fn test_output_dir_derived() {
        let config = ConfigTree::parse(
            r#"
group = "/tmp/save"
experiment_name = "simulation_ml_planner_experiment"
job_name = "sim_ml_debug"
"#,
        )
        .unwrap();
        let job = Job::from_config(
            EntryPoint::Simulation,
            config,
            Path::new("/unused"),
            fixed_time(),
        )
        .unwrap();

        let expected = PathBuf::from(
            "/tmp/save/simulation_ml_planner_experiment/sim_ml_debug/2024.03.09.14.05.07",
        );
        assert_eq!(job.output_dir, expected);
        assert_eq!(
            job.config.get("output_dir").and_then(Value::as_str),
            Some(expected.to_str().unwrap())
        );
    }

    #[test]
    fn test_output_dir_falls_back_to_save_dir() {
        let job = Job::from_config(
            EntryPoint::Training,
            ConfigTree::new(),
            Path::new("/tmp/save"),
            fixed_time(),
        )
        .unwrap();
        assert_eq!(
            job.output_dir,
            PathBuf::from("/tmp/save/default_experiment/training/2024.03.09.14.05.07")
        );
    }

    #[test]
    fn test_explicit_output_dir_kept() {
        let config = ConfigTree::parse("output_dir = \"/tmp/explicit\"").unwrap();
        let job = Job::from_config(EntryPoint::Dashboard, config, Path::new("/tmp"), fixed_time())
            .unwrap();
        assert_eq!(job.output_dir, PathBuf::from("/tmp/explicit"));
    }

    #[test]
    fn test_output_dir_keys_must_be_strings() {
        let config = ConfigTree::parse("job_name = 3").unwrap();
        let err = Job::from_config(EntryPoint::Training, config, Path::new("/tmp"), fixed_time())
            .unwrap_err();
        assert!(matches!(
            err,
            JobError::Config(ConfigError::Deserialize { ref path, .. }) if path == "job_name"
        ));
    }

    #[test]
    fn test_split_section_and_write() {
        let dir = tempdir().unwrap();
        let config = ConfigTree::parse(
            r#"
experiment_name = "debug_simulation"
[planner.simple_planner]
horizon_seconds = 10.0
"#,
        )
        .unwrap();
        let mut job =
            Job::from_config(EntryPoint::Simulation, config, dir.path(), fixed_time()).unwrap();

        let planner = job.split_section("planner").unwrap();
        assert!(planner.contains("simple_planner.horizon_seconds"));
        assert!(!job.config.contains("planner"));
        assert!(job.split_section("planner").is_none());

        let config_path = job.write_config().unwrap();
        let planner_path = job.write_sidecar("planner.toml", &planner).unwrap();
        let written = ConfigTree::from_file(&config_path).unwrap();
        assert_eq!(
            written.get("experiment_name").and_then(Value::as_str),
            Some("debug_simulation")
        );
        assert!(ConfigTree::from_file(planner_path).unwrap().contains("simple_planner"));
    }
}
