//! Debug simulation: inspect a composed simulation config and run it with the
//! planner supplied as a separate file.

use std::path::PathBuf;

use crate::{
    config::HarnessConfig,
    job::{EntryPoint, Job, JobError},
    pipeline::{PipelineError, check},
    runner::Runner,
};

/// File the planner section is written to, next to the simulation config.
pub const PLANNER_FILE: &str = "planner.toml";

/// Compose the debug simulation, split out its planner and run it.
///
/// `extra_overrides` are applied after the configured `[debug_sim]` ones.
/// Returns the simulation's output directory.
pub async fn debug_simulation<S: AsRef<str>>(
    config: &HarnessConfig,
    extra_overrides: &[S],
) -> Result<PathBuf, PipelineError> {
    let settings = &config.debug_sim;
    let overrides: Vec<&str> = settings
        .overrides
        .iter()
        .map(String::as_str)
        .chain(extra_overrides.iter().map(AsRef::as_ref))
        .collect();

    let mut job = Job::compose(config, EntryPoint::Simulation, &overrides)?;
    tracing::info!(
        "Simulation config keys: {}",
        job.config.keys().collect::<Vec<_>>().join(", ")
    );

    let planner = job
        .split_section(&settings.planner_key)
        .ok_or_else(|| PipelineError::MissingPlannerSection {
            key: settings.planner_key.clone(),
        })?;
    println!("{}:", settings.planner_key);
    println!("{}", planner.to_toml_string().map_err(JobError::from)?);

    let planner_path = job.write_sidecar(PLANNER_FILE, &planner)?;
    tracing::info!("Planner config written to {}", planner_path.display());
    job.extra_args = vec![
        settings.planner_flag.clone(),
        planner_path.to_string_lossy().into_owned(),
    ];

    let result = check(Runner::new(config).run(&job).await?)?;
    Ok(result.output_dir)
}
