//! Train-then-simulate pipeline.
//!
//! Reuses an existing checkpoint under the save directory when there is one,
//! otherwise trains once. The simulation then runs the ML planner from that
//! checkpoint, and the dashboard can optionally be opened on its output.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::{
    checkpoint::{CheckpointError, CheckpointResolver},
    config::HarnessConfig,
    job::{EntryPoint, Job, JobError},
    runner::{RunError, RunResult, Runner, now_timestamp},
};

/// File written under the save directory after a pipeline run.
pub const REPORT_FILE: &str = "pipeline_report.json";

/// Outcome of a pipeline run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineReport {
    pub checkpoint: PathBuf,
    /// Whether training ran in this invocation.
    pub trained: bool,
    pub simulation_output: PathBuf,
    pub dashboard_output: Option<PathBuf>,
    pub dry_run: bool,
    pub finished_at: String,
}

/// Drives training, simulation and the dashboard in sequence.
pub struct Pipeline {
    config: HarnessConfig,
    runner: Runner,
    resolver: CheckpointResolver,
}

impl Pipeline {
    #[must_use]
    pub fn new(config: HarnessConfig) -> Self {
        let runner = Runner::new(&config);
        let resolver = CheckpointResolver::new(
            config.harness.checkpoint_extension.clone(),
            config.harness.checkpoint_marker.clone(),
        );
        Self {
            config,
            runner,
            resolver,
        }
    }

    #[must_use]
    pub fn save_dir(&self) -> &Path {
        &self.config.harness.save_dir
    }

    /// Directory the trainer is told to write checkpoints into.
    #[must_use]
    pub fn log_dir(&self) -> PathBuf {
        let p = &self.config.pipeline;
        self.save_dir().join(&p.train_experiment).join(&p.train_job)
    }

    /// Overrides for the training run.
    #[must_use]
    pub fn training_overrides(&self) -> Vec<String> {
        let p = &self.config.pipeline;
        let save_dir = self.save_dir().display();
        let mut overrides = vec![
            format!("group=\"{save_dir}\""),
            format!("cache.cache_path=\"{save_dir}/cache\""),
            format!("experiment_name={}", p.train_experiment),
            format!("job_name={}", p.train_job),
            // pin the trainer's output root so the checkpoint can be found
            format!(
                "lightning.trainer.params.default_root_dir=\"{}\"",
                self.log_dir().display()
            ),
        ];
        overrides.extend(p.training_overrides.iter().cloned());
        overrides
    }

    /// Overrides for the simulation run with the ML planner loaded from `checkpoint`.
    #[must_use]
    pub fn simulation_overrides(&self, checkpoint: &Path) -> Vec<String> {
        let p = &self.config.pipeline;
        let mut overrides = vec![
            format!("experiment_name={}", p.sim_experiment),
            format!("group=\"{}\"", self.save_dir().display()),
            format!("job_name={}", p.sim_job),
            format!("model={}", p.model),
            format!("planner={}", p.planner),
            format!("planner.{}.model_config=${{model}}", p.planner),
            format!(
                "planner.{}.checkpoint_path=\"{}\"",
                p.planner,
                checkpoint.display()
            ),
            format!("+simulation={}", p.challenge),
        ];
        overrides.extend(p.dataset_overrides.iter().cloned());
        overrides
    }

    /// Overrides for the dashboard reading `simulation_output`.
    #[must_use]
    pub fn dashboard_overrides(&self, simulation_output: &Path) -> Vec<String> {
        let mut overrides = self.config.pipeline.dashboard_overrides.clone();
        overrides.push(format!(
            "simulation_path=[\"{}\"]",
            simulation_output.display()
        ));
        overrides
    }

    /// Find a checkpoint, training once if there is none.
    ///
    /// Returns the checkpoint and whether training ran.
    pub async fn ensure_checkpoint(&self) -> Result<(PathBuf, bool), PipelineError> {
        if let Some(checkpoint) = self.resolver.resolve(self.save_dir())? {
            tracing::info!(
                "Found existing checkpoint, skipping training: {}",
                checkpoint.display()
            );
            return Ok((checkpoint, false));
        }

        tracing::info!(
            "No checkpoint under {}, training once...",
            self.save_dir().display()
        );
        let job = Job::compose(&self.config, EntryPoint::Training, &self.training_overrides())?;
        check(self.runner.run(&job).await?)?;

        match self.resolver.resolve(self.save_dir())? {
            Some(checkpoint) => {
                tracing::info!("Training complete, checkpoint: {}", checkpoint.display());
                Ok((checkpoint, true))
            }
            None if self.runner.is_dry_run() => {
                let expected = self.log_dir().join(format!(
                    "{}.{}",
                    self.config.harness.checkpoint_marker, self.config.harness.checkpoint_extension
                ));
                tracing::warn!(
                    "[dry run] no checkpoint produced, assuming {}",
                    expected.display()
                );
                Ok((expected, true))
            }
            None => Err(PipelineError::NoCheckpointAfterTraining {
                root: self.save_dir().to_path_buf(),
                extension: self.config.harness.checkpoint_extension.clone(),
            }),
        }
    }

    /// Run the whole pipeline and write a report under the save directory.
    pub async fn run(&self) -> Result<PipelineReport, PipelineError> {
        let (checkpoint, trained) = self.ensure_checkpoint().await?;

        let sim_job = Job::compose(
            &self.config,
            EntryPoint::Simulation,
            &self.simulation_overrides(&checkpoint),
        )?;
        let simulation = check(self.runner.run(&sim_job).await?)?;

        let dashboard_output = if self.config.pipeline.dashboard {
            let job = Job::compose(
                &self.config,
                EntryPoint::Dashboard,
                &self.dashboard_overrides(&simulation.output_dir),
            )?;
            Some(check(self.runner.run(&job).await?)?.output_dir)
        } else {
            None
        };

        let report = PipelineReport {
            checkpoint,
            trained,
            simulation_output: simulation.output_dir,
            dashboard_output,
            dry_run: self.runner.is_dry_run(),
            finished_at: now_timestamp(),
        };
        self.write_report(&report)?;
        Ok(report)
    }

    fn write_report(&self, report: &PipelineReport) -> Result<(), PipelineError> {
        let path = self.save_dir().join(REPORT_FILE);
        std::fs::create_dir_all(self.save_dir())
            .map_err(|e| PipelineError::Report(path.clone(), e.to_string()))?;
        let file =
            std::fs::File::create(&path).map_err(|e| PipelineError::Report(path.clone(), e.to_string()))?;
        serde_json::to_writer_pretty(std::io::BufWriter::new(file), report)
            .map_err(|e| PipelineError::Report(path.clone(), e.to_string()))?;
        tracing::info!("Wrote {}", path.display());
        Ok(())
    }
}

/// Turn a failed run into an error.
pub(crate) fn check(result: RunResult) -> Result<RunResult, PipelineError> {
    if result.success {
        Ok(result)
    } else {
        Err(PipelineError::JobFailed {
            entry: result.entry,
            output_dir: result.output_dir,
            message: result.error.unwrap_or_default(),
        })
    }
}

/// Errors that can occur while running a pipeline.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("checkpoint search failed: {0}")]
    Checkpoint(#[from] CheckpointError),
    #[error(transparent)]
    Job(#[from] JobError),
    #[error(transparent)]
    Run(#[from] RunError),
    #[error("{entry} run failed (logs in {}):\n{message}", output_dir.display())]
    JobFailed {
        entry: EntryPoint,
        output_dir: PathBuf,
        message: String,
    },
    #[error(
        "training finished but no .{extension} file was found under {}; verify the trainer's output directory (lightning.trainer.params.default_root_dir)",
        root.display()
    )]
    NoCheckpointAfterTraining { root: PathBuf, extension: String },
    #[error("simulation config has no '{key}' section; select a planner with {key}=<name>")]
    MissingPlannerSection { key: String },
    #[error("failed to write report {0}: {1}")]
    Report(PathBuf, String),
}
