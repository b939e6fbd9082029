#![warn(clippy::pedantic)]
#![allow(
    clippy::missing_errors_doc,
    clippy::missing_panics_doc,
    clippy::module_name_repetitions
)]

//! Planning Framework Harness
//!
//! Composes framework configs, runs training, simulation and the dashboard as
//! subprocesses, and finds the checkpoint a training run left behind.

pub mod checkpoint;
pub mod config;
pub mod debug;
pub mod job;
pub mod pipeline;
pub mod runner;

pub use checkpoint::{CheckpointResolver, find_checkpoint};
pub use config::HarnessConfig;
pub use job::{EntryPoint, Job};
pub use pipeline::{Pipeline, PipelineReport};
pub use runner::Runner;
