use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

use mocap_jobs::config::{Config, WorkerConfig};
use mocap_jobs::jobs::{JobManager, JobState};
use mocap_jobs::producer;
use mocap_jobs::store::FileQueueStore;
use mocap_jobs::worker::{ProcessLauncher, WorkerSupervisor};
use mocap_jobs::workflow::{ToolConfig, WorkflowExecutor, WorkflowRunner};

/// Queue motion-capture scaling jobs and run them one at a time.
#[derive(Parser, Debug)]
#[command(name = "mocap-jobs")]
#[command(version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Enqueue a job from a JSON payload file and make sure a worker is running
    Submit {
        /// Payload file; `working_directory` defaults to `<work_dir>/<id>`
        payload: PathBuf,
    },

    /// Print the state of a job (`unknown` if there is no such job)
    Status { id: Uuid },

    /// List all jobs with their state
    #[command(alias = "ls")]
    List,

    /// Remove a job that is not running, along with its working directory
    Remove { id: Uuid },

    /// Block until a job is finished or failed
    Wait {
        id: Uuid,

        /// Seconds between status checks
        #[arg(long, default_value_t = 10)]
        interval: u64,
    },

    /// Drop finished and failed jobs from the queue
    Clear,

    /// Print the path of a job's result archive
    Download { id: Uuid },

    /// Run the worker loop (started by `submit`; not usually run by hand)
    Worker {
        #[arg(long)]
        queue_file: PathBuf,

        /// Program that runs the workflow
        #[arg(long)]
        executable: PathBuf,

        #[arg(long)]
        workflow_dir: PathBuf,

        /// Shared working directory (worker log is written here)
        #[arg(long)]
        working_dir: PathBuf,

        #[arg(long, env = "MOCAP_JOBS_POLL_INTERVAL_MS", default_value_t = 200)]
        poll_interval_ms: u64,

        #[arg(
            long,
            env = "MOCAP_JOBS_MAX_IDLE_POLLS",
            default_value_t = 3,
            value_parser = clap::value_parser!(u32).range(1..)
        )]
        max_idle_polls: u32,

        /// Kill the workflow after this many seconds
        #[arg(long, env = "MOCAP_JOBS_TOOL_TIMEOUT_SECS")]
        tool_timeout_secs: Option<u64>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Worker {
            queue_file,
            executable,
            workflow_dir,
            working_dir,
            poll_interval_ms,
            max_idle_polls,
            tool_timeout_secs,
        } => {
            let _log_guard = init_worker_logging(&working_dir);

            let jobs = JobManager::new(Arc::new(FileQueueStore::new(queue_file)));
            let tool = ToolConfig::new(executable)
                .with_timeout(tool_timeout_secs.map(Duration::from_secs));
            let runner = Arc::new(WorkflowRunner::new(workflow_dir, tool));
            let config = WorkerConfig {
                poll_interval: Duration::from_millis(poll_interval_ms),
                max_idle_polls,
            };

            WorkflowExecutor::new(jobs, runner, config).run().await;
        }
        Commands::Submit { payload } => {
            let (jobs, config) = load_producer()?;
            let raw = std::fs::read_to_string(&payload)
                .with_context(|| format!("Failed to read {}", payload.display()))?;
            let payload: serde_json::Value =
                serde_json::from_str(&raw).context("Payload is not valid JSON")?;

            let launcher = ProcessLauncher::current_exe(&config.queue_file)?;
            let supervisor = WorkerSupervisor::new(Arc::new(launcher));
            let (id, _) = producer::submit(&jobs, &supervisor, &config, payload)
                .await
                .context("Failed to submit job")?;
            println!("{id}");
        }
        Commands::Status { id } => {
            let (jobs, _) = load_producer()?;
            println!("{}", JobState::label(jobs.get_state(id).await?));
        }
        Commands::List => {
            let (jobs, _) = load_producer()?;
            for job in jobs.list_jobs().await? {
                println!("{} {}", job.id, job.state);
            }
        }
        Commands::Remove { id } => {
            let (jobs, config) = load_producer()?;
            if !jobs.remove(id).await? {
                bail!("Could not remove job {id}: unknown or still running");
            }
            let job_dir = config.job_dir(id);
            match std::fs::remove_dir_all(&job_dir) {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                    tracing::warn!(job_id = %id, "Job had no working directory");
                }
                Err(e) => {
                    return Err(e)
                        .with_context(|| format!("Failed to remove {}", job_dir.display()));
                }
            }
            println!("Removed {id}");
        }
        Commands::Wait { id, interval } => {
            let (jobs, _) = load_producer()?;
            while !jobs.is_finished(id).await? {
                if jobs.get_state(id).await?.is_none() {
                    bail!("Job {id} does not exist");
                }
                tokio::time::sleep(Duration::from_secs(interval)).await;
            }
            println!("{}", JobState::label(jobs.get_state(id).await?));
        }
        Commands::Clear => {
            let (jobs, _) = load_producer()?;
            let cleared = jobs.clear_stale().await?;
            println!("Cleared {cleared} jobs");
        }
        Commands::Download { id } => {
            let (_, config) = load_producer()?;
            let Some(archive) = producer::download(&config, id) else {
                bail!("no download for {id}");
            };
            println!("{}", archive.display());
        }
    }

    Ok(())
}

/// Logging and configuration for the producer-side commands.
fn load_producer() -> Result<(JobManager, Config)> {
    init_cli_logging();
    let config = Config::from_env().context("Invalid configuration")?;
    let jobs = JobManager::new(Arc::new(FileQueueStore::new(&config.queue_file)));
    Ok((jobs, config))
}

fn init_cli_logging() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

/// The worker is detached from any terminal, so it logs to `<working_dir>/worker.log`.
fn init_worker_logging(working_dir: &Path) -> tracing_appender::non_blocking::WorkerGuard {
    let appender = tracing_appender::rolling::never(working_dir, "worker.log");
    let (writer, guard) = tracing_appender::non_blocking(appender);
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_ansi(false)
        .with_writer(writer)
        .init();
    guard
}
