//! Planning Framework Harness CLI
//!
//! Composes framework configs, trains a model if no checkpoint exists yet,
//! simulates a planner from it and opens the dashboard.

use std::path::PathBuf;

use clap::{Args, CommandFactory, Parser, Subcommand};
use clap_complete::{Shell, generate};
use plan_config::{Composer, Override};
use plan_harness::{
    checkpoint::CheckpointResolver,
    config::HarnessConfig,
    debug::debug_simulation,
    job::{EntryPoint, Job},
    pipeline::Pipeline,
    runner::Runner,
};
use tracing_indicatif::IndicatifLayer;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "plan", about = "Planning framework harness")]
struct Cli {
    /// Path to harness.toml config file
    #[arg(long, global = true, default_value = "harness.toml")]
    harness: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Train once if needed, then simulate the ML planner from the checkpoint
    Pipeline {
        /// Open the dashboard on the simulation output
        #[arg(long)]
        dashboard: bool,

        /// Compose and write configs without running anything
        #[arg(long)]
        dry_run: bool,

        /// Override the save directory
        #[arg(long)]
        save_dir: Option<PathBuf>,
    },
    /// Run training
    Train(RunArgs),
    /// Run a simulation
    Simulate(RunArgs),
    /// Run the dashboard
    Dashboard(RunArgs),
    /// Run the debug simulation with the planner split into its own file
    DebugSim(RunArgs),
    /// Print the composed config of an entry point
    Compose {
        /// Entry point whose primary config is composed
        entry: EntryPoint,

        /// Overrides, e.g. `planner=simple_planner` or `+simulation=open_loop_boxes`
        overrides: Vec<String>,
    },
    /// Print the checkpoint that would be used
    FindCheckpoint {
        /// Directory to search (defaults to the save directory)
        root: Option<PathBuf>,

        /// List every checkpoint instead of the selected one
        #[arg(long)]
        all: bool,
    },
    /// Generate shell completions
    Completions {
        /// Shell to generate completions for
        shell: Shell,
    },
}

#[derive(Args)]
struct RunArgs {
    /// Compose and write the config without running it
    #[arg(long)]
    dry_run: bool,

    /// Overrides applied after the configured ones
    overrides: Vec<String>,
}

async fn run_entry(
    mut config: HarnessConfig,
    entry: EntryPoint,
    args: RunArgs,
) -> Result<(), Box<dyn std::error::Error>> {
    config.harness.dry_run |= args.dry_run;
    let job = Job::compose(&config, entry, &args.overrides)?;
    let result = Runner::new(&config).run(&job).await?;
    if !result.success {
        return Err(format!(
            "{entry} failed (logs in {}):\n{}",
            result.output_dir.display(),
            result.error.unwrap_or_default()
        )
        .into());
    }
    println!("{}", result.output_dir.display());
    Ok(())
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // tracing needs to be initialized with indicatif_layer to not clobber progress bars
    let indicatif_layer = IndicatifLayer::new();

    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_writer(indicatif_layer.get_stderr_writer()))
        .with(
            EnvFilter::builder()
                .with_default_directive(tracing::Level::INFO.into())
                .from_env_lossy(),
        )
        .with(indicatif_layer)
        .init();

    let cli = Cli::parse();

    let mut config = HarnessConfig::load_or_default(&cli.harness)?;

    match cli.command {
        Commands::Pipeline {
            dashboard,
            dry_run,
            save_dir,
        } => {
            config.harness.dry_run |= dry_run;
            config.pipeline.dashboard |= dashboard;
            if let Some(save_dir) = save_dir {
                config.harness.save_dir = save_dir;
            }

            let report = Pipeline::new(config).run().await?;

            println!();
            println!("=== Pipeline Complete ===");
            println!(
                "Checkpoint: {}{}",
                report.checkpoint.display(),
                if report.trained { " (trained)" } else { "" }
            );
            println!("Simulation: {}", report.simulation_output.display());
            if let Some(dir) = &report.dashboard_output {
                println!("Dashboard: {}", dir.display());
            }
        }

        Commands::Train(args) => run_entry(config, EntryPoint::Training, args).await?,
        Commands::Simulate(args) => run_entry(config, EntryPoint::Simulation, args).await?,
        Commands::Dashboard(args) => run_entry(config, EntryPoint::Dashboard, args).await?,

        Commands::DebugSim(args) => {
            config.harness.dry_run |= args.dry_run;
            let output_dir = debug_simulation(&config, &args.overrides).await?;
            println!("{}", output_dir.display());
        }

        Commands::Compose { entry, overrides } => {
            let overrides = Override::parse_all(&overrides)?;
            let composer = Composer::new(config.config_dir(entry));
            let tree = composer.compose(&config.entry_points.get(entry).config_name, &overrides)?;
            print!("{}", tree.to_toml_string()?);
        }

        Commands::FindCheckpoint { root, all } => {
            let root = root.unwrap_or_else(|| config.harness.save_dir.clone());
            let resolver = CheckpointResolver::new(
                config.harness.checkpoint_extension.clone(),
                config.harness.checkpoint_marker.clone(),
            );

            let found = if all {
                resolver.list(&root)?
            } else {
                resolver.resolve(&root)?.into_iter().collect()
            };
            if found.is_empty() {
                eprintln!("No checkpoint found under {}", root.display());
                std::process::exit(1);
            }
            for path in &found {
                println!("{}", path.display());
            }
        }

        Commands::Completions { shell } => {
            generate(shell, &mut Cli::command(), "plan", &mut std::io::stdout());
        }
    }

    Ok(())
}
