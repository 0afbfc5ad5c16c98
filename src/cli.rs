//! Command-line interface — argument definitions and command handlers.

use std::path::Path;
use std::str::FromStr;
use std::sync::Arc;

use chrono::Utc;
use clap::{Parser, Subcommand};

use crate::config::{CONFIG_FILE, Config};
use crate::job::{JobState, NewJob};
use crate::store::{JobStore, LibSqlStore};
use crate::worker::{
    PID_FILE, Shutdown, StopResult, Worker, WorkerConfig, install_signal_handler, start_workers,
    stop_workers,
};

#[derive(Debug, Parser)]
#[command(name = "jobq", version, about = "Durable background job queue for shell commands")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Enqueue a job from a JSON payload, e.g. '{"id":"job1","command":"sleep 2"}'
    Enqueue {
        /// Job data as a JSON string with "id" and "command" keys
        job: String,
    },
    /// Show job counts per state
    Status,
    /// List jobs, optionally filtered by state
    List {
        /// Filter by state (pending, processing, completed, failed, dead)
        #[arg(long)]
        state: Option<String>,
    },
    /// Manage the dead-letter queue
    #[command(subcommand)]
    Dlq(DlqCommands),
    /// Manage configuration
    #[command(subcommand)]
    Config(ConfigCommands),
    /// Manage worker processes
    #[command(subcommand)]
    Worker(WorkerCommands),
}

#[derive(Debug, Subcommand)]
pub enum DlqCommands {
    /// List dead jobs
    List,
    /// Move a dead job back to pending with a fresh retry budget
    Retry {
        /// Id of the job to retry
        id: String,
    },
}

#[derive(Debug, Subcommand)]
pub enum ConfigCommands {
    /// Print the current configuration
    Show,
    /// Set a configuration key (max_retries, backoff_base, poll_interval_ms, db_path)
    Set { key: String, value: String },
}

#[derive(Debug, Subcommand)]
pub enum WorkerCommands {
    /// Run a worker loop in this process until shutdown is requested
    Run,
    /// Spawn detached worker processes and record their PIDs
    Start {
        /// Number of worker processes to start
        #[arg(long, default_value_t = 1)]
        count: u32,
    },
    /// Signal all recorded worker processes to shut down gracefully
    Stop,
}

async fn open_store(config: &Config) -> anyhow::Result<Arc<dyn JobStore>> {
    let store = LibSqlStore::new_local(&config.db_path).await?;
    Ok(Arc::new(store))
}

/// Dispatch a parsed command.
pub async fn run(cli: Cli) -> anyhow::Result<()> {
    let config = Config::load();

    match cli.command {
        Commands::Enqueue { job } => {
            let job = NewJob::from_json(&job)?;
            let store = open_store(&config).await?;
            store.insert(&job, config.max_retries).await?;
            println!("Job '{}' enqueued.", job.id);
        }

        Commands::Status => {
            let store = open_store(&config).await?;
            let counts = store.counts_by_state().await?;
            println!("--- Job Status Summary ---");
            for state in JobState::ALL {
                let count = counts.get(&state).copied().unwrap_or(0);
                println!("- {:<12}: {}", capitalize(state.as_str()), count);
            }
        }

        Commands::List { state } => {
            let filter = state.as_deref().map(JobState::from_str).transpose()?;
            let store = open_store(&config).await?;
            print_jobs(&store.list_by_state(filter).await?, filter);
        }

        Commands::Dlq(DlqCommands::List) => {
            let store = open_store(&config).await?;
            println!("--- Dead Letter Queue (DLQ) ---");
            print_jobs(
                &store.list_by_state(Some(JobState::Dead)).await?,
                Some(JobState::Dead),
            );
        }

        Commands::Dlq(DlqCommands::Retry { id }) => {
            let store = open_store(&config).await?;
            store.dlq_retry(&id, Utc::now()).await?;
            println!("Job '{id}' moved to 'pending' for retry.");
        }

        Commands::Config(ConfigCommands::Show) => {
            println!("--- Current Configuration ({CONFIG_FILE}) ---");
            println!("{}", serde_json::to_string_pretty(&config)?);
        }

        Commands::Config(ConfigCommands::Set { key, value }) => {
            let mut config = config;
            config.set(&key, &value)?;
            config.save_to(Path::new(CONFIG_FILE))?;
            println!("Config updated: {key} = {value}");
        }

        Commands::Worker(WorkerCommands::Run) => {
            let shutdown = Shutdown::new();
            install_signal_handler(shutdown.clone());
            let store = open_store(&config).await?;
            let worker = Worker::new(store, WorkerConfig::from(&config), shutdown);
            worker.run().await?;
        }

        Commands::Worker(WorkerCommands::Start { count }) => {
            println!("Starting {count} worker(s)...");
            let pids = start_workers(count, Path::new(PID_FILE))?;
            for pid in &pids {
                println!("Started worker with PID: {pid}");
            }
            println!("PIDs written to {PID_FILE}");
        }

        Commands::Worker(WorkerCommands::Stop) => match stop_workers(Path::new(PID_FILE))? {
            None => println!("No workers running (PID file not found)."),
            Some(results) => {
                for result in results {
                    match result {
                        StopResult::Signalled(pid) => println!("Sent shutdown signal to PID: {pid}"),
                        StopResult::NotRunning(pid) => {
                            println!("Worker PID {pid} not found (already stopped).")
                        }
                    }
                }
                println!("Cleaned up {PID_FILE}.");
            }
        },
    }

    Ok(())
}

fn print_jobs(jobs: &[crate::job::Job], filter: Option<JobState>) {
    if jobs.is_empty() {
        match filter {
            Some(state) => println!("No jobs found with state '{state}'."),
            None => println!("No jobs found."),
        }
        return;
    }
    println!("--- Showing {} Jobs ---", jobs.len());
    for job in jobs {
        println!("Job ID: {}", job.id);
        println!("  State:    {}", job.state);
        println!("  Command:  {}", job.command);
        println!("  Attempts: {}/{}", job.attempts, job.max_retries);
        println!("  Run At:   {}", job.run_at);
        if let Some(err) = &job.last_error {
            println!("  Error:    {err}");
        }
        println!("{}", "-".repeat(20));
    }
}

fn capitalize(s: &str) -> String {
    let mut chars = s.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().collect::<String>() + chars.as_str(),
        None => String::new(),
    }
}
