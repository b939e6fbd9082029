//! Subprocess execution for framework jobs.

use std::{
    collections::{BTreeMap, VecDeque},
    path::PathBuf,
    process::Stdio,
};

use indicatif::{MultiProgress, ProgressBar, ProgressStyle};
use tokio::{
    fs::OpenOptions,
    io::{AsyncBufReadExt, AsyncRead, AsyncWriteExt, BufReader},
    process::{Child, Command},
};

use crate::{
    config::{EntryPoints, HarnessConfig},
    job::{EntryPoint, Job, JobError},
};

const STDERR_TAIL_LINES: usize = 20;

/// Result of a framework run.
#[derive(Debug)]
pub struct RunResult {
    pub entry: EntryPoint,
    /// Whether the run succeeded.
    pub success: bool,
    /// Exit code if available.
    pub exit_code: Option<i32>,
    /// Error message if failed.
    pub error: Option<String>,
    /// Directory holding the config and logs of the run.
    pub output_dir: PathBuf,
}

/// Runs framework entry points as subprocesses.
pub struct Runner {
    entry_points: EntryPoints,
    env: BTreeMap<String, String>,
    config_flag: String,
    dry_run: bool,
    progress: MultiProgress,
}

impl Runner {
    #[must_use]
    pub fn new(config: &HarnessConfig) -> Self {
        Self {
            entry_points: config.entry_points.clone(),
            env: config.harness.env.clone(),
            config_flag: config.harness.config_flag.clone(),
            dry_run: config.harness.dry_run,
            progress: MultiProgress::new(),
        }
    }

    #[must_use]
    pub fn is_dry_run(&self) -> bool {
        self.dry_run
    }

    /// Full command line for `job`: entry point command, config flag and file, extra args.
    #[must_use]
    pub fn command_line(&self, job: &Job) -> Vec<String> {
        let mut argv = self.entry_points.get(job.entry).command.clone();
        argv.push(self.config_flag.clone());
        argv.push(job.config_path().to_string_lossy().into_owned());
        argv.extend(job.extra_args.iter().cloned());
        argv
    }

    /// Write the job's config and run it to completion.
    ///
    /// In dry-run mode the config is written and the command logged, but
    /// nothing is spawned.
    pub async fn run(&self, job: &Job) -> Result<RunResult, RunError> {
        if self.dry_run {
            job.write_config()?;
            tracing::info!(
                "[dry run] {}: {}",
                job.entry,
                self.command_line(job).join(" ")
            );
            return Ok(RunResult {
                entry: job.entry,
                success: true,
                exit_code: None,
                error: None,
                output_dir: job.output_dir.clone(),
            });
        }

        let handle = self.spawn(job)?;
        let result = self.wait(handle).await;
        if result.success {
            tracing::info!("{} finished ({})", result.entry, result.output_dir.display());
        } else {
            tracing::error!(
                "{} failed with exit code {:?}",
                result.entry,
                result.exit_code
            );
        }
        Ok(result)
    }

    /// Spawn a job as a subprocess.
    pub fn spawn(&self, job: &Job) -> Result<RunHandle, RunError> {
        let config_file = job.write_config()?;
        let argv = self.command_line(job);
        let (program, args) = argv
            .split_first()
            .ok_or(RunError::EmptyCommand(job.entry))?;

        tracing::debug!("Spawning: {}", argv.join(" "));

        let mut cmd = Command::new(program);
        cmd.args(args)
            .envs(&self.env)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        let child = cmd.spawn().map_err(|e| RunError::Spawn(job.entry, e))?;

        let pid = child
            .id()
            .ok_or_else(|| RunError::Spawn(job.entry, std::io::Error::other("no PID")))?;
        tracing::info!(
            "Started {} (PID {pid}, config {})",
            job.entry,
            config_file.display()
        );

        Ok(RunHandle {
            entry: job.entry,
            output_dir: job.output_dir.clone(),
            child,
            pid,
        })
    }

    /// Wait for a run to complete, streaming its output to log files.
    pub async fn wait(&self, mut handle: RunHandle) -> RunResult {
        let pb = self.progress.add(ProgressBar::new_spinner());
        pb.set_style(
            ProgressStyle::default_spinner()
                .template("{spinner:.green} [{elapsed_precise}] {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_spinner()),
        );
        pb.set_message(format!("{:10}: running (PID {})", handle.entry, handle.pid));
        pb.enable_steady_tick(std::time::Duration::from_millis(100));

        let stdout_path = handle.output_dir.join("stdout.log");
        let stderr_path = handle.output_dir.join("stderr.log");
        let timestamp = now_timestamp();

        // Stream stdout to file and show the latest line on the spinner
        let stdout_task = handle.child.stdout.take().map(|stdout| {
            let pb = pb.clone();
            let entry = handle.entry;
            let ts = timestamp.clone();
            tokio::spawn(async move {
                stream_lines(stdout, stdout_path, &ts, |line| {
                    pb.set_message(format!("{entry:10}: {}", truncate(line, 80)));
                })
                .await;
            })
        });

        // Stream stderr to file and keep the tail for error reporting
        let stderr_task = handle.child.stderr.take().map(|stderr| {
            let ts = timestamp;
            tokio::spawn(async move {
                let mut tail = VecDeque::with_capacity(STDERR_TAIL_LINES);
                stream_lines(stderr, stderr_path, &ts, |line| {
                    if tail.len() >= STDERR_TAIL_LINES {
                        tail.pop_front();
                    }
                    tail.push_back(line.to_string());
                })
                .await;
                tail.into_iter().collect::<Vec<_>>()
            })
        });

        let status = handle.child.wait().await;

        if let Some(task) = stdout_task {
            let _ = task.await;
        }
        let stderr_output = match stderr_task {
            Some(task) => task.await.ok(),
            None => None,
        };

        let result = match status {
            Ok(status) if status.success() => RunResult {
                entry: handle.entry,
                success: true,
                exit_code: status.code(),
                error: None,
                output_dir: handle.output_dir,
            },
            Ok(status) => {
                let error_msg = stderr_output
                    .filter(|lines| !lines.is_empty())
                    .map_or_else(
                        || format!("Exit code: {:?}", status.code()),
                        |lines| lines.join("\n"),
                    );
                RunResult {
                    entry: handle.entry,
                    success: false,
                    exit_code: status.code(),
                    error: Some(error_msg),
                    output_dir: handle.output_dir,
                }
            }
            Err(e) => RunResult {
                entry: handle.entry,
                success: false,
                exit_code: None,
                error: Some(format!("Process error: {e}")),
                output_dir: handle.output_dir,
            },
        };

        pb.finish_with_message(format!(
            "{:10}: {}",
            result.entry,
            if result.success { "completed" } else { "failed" }
        ));
        result
    }
}

/// Copy lines from `reader` into the log at `path`, calling `on_line` for each.
async fn stream_lines<R, F>(reader: R, path: PathBuf, timestamp: &str, mut on_line: F)
where
    R: AsyncRead + Unpin,
    F: FnMut(&str),
{
    let mut lines = BufReader::new(reader).lines();
    let mut file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(&path)
        .await
        .ok();

    // Separate runs that share a log file
    if let Some(ref mut f) = file
        && f.metadata().await.is_ok_and(|m| m.len() > 0)
    {
        let _ = f
            .write_all(format!("\n--- run at {timestamp} ---\n\n").as_bytes())
            .await;
    }

    while let Ok(Some(line)) = lines.next_line().await {
        if let Some(ref mut f) = file {
            let _ = f.write_all(line.as_bytes()).await;
            let _ = f.write_all(b"\n").await;
        }
        on_line(&line);
    }
    if let Some(ref mut f) = file {
        let _ = f.flush().await;
    }
}

fn truncate(line: &str, max_chars: usize) -> &str {
    match line.char_indices().nth(max_chars) {
        Some((idx, _)) => &line[..idx],
        None => line,
    }
}

/// Current local time, for log separators and reports.
#[must_use]
pub fn now_timestamp() -> String {
    chrono::Local::now().format("%Y-%m-%d %H:%M:%S").to_string()
}

/// Handle to a running subprocess.
pub struct RunHandle {
    pub entry: EntryPoint,
    pub output_dir: PathBuf,
    child: Child,
    pub pid: u32,
}

/// Errors that can occur when running a subprocess.
#[derive(Debug, thiserror::Error)]
pub enum RunError {
    #[error("no command configured for {0}")]
    EmptyCommand(EntryPoint),
    #[error("failed to spawn process for {0}: {1}")]
    Spawn(EntryPoint, std::io::Error),
    #[error("failed to prepare job: {0}")]
    Job(#[from] JobError),
}
