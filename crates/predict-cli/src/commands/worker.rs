//! Worker management CLI commands.

use std::sync::Arc;

use clap::{Args, Subcommand};

use crate::output::{self, OutputFormat};
use predict_core::error::AppError;
use predict_worker::{
    CycleOutcome, JobMetrics, JobProcessor, RetryPolicy, SubprocessExecutor,
};

/// Arguments for worker commands
#[derive(Debug, Args)]
pub struct WorkerArgs {
    /// Worker subcommand
    #[command(subcommand)]
    pub command: WorkerCommand,
}

/// Worker subcommands
#[derive(Debug, Subcommand)]
pub enum WorkerCommand {
    /// Show queue counts and worker settings
    Status,
    /// Run a single processing cycle with the configured executor
    RunOnce,
}

/// Execute worker commands
pub async fn execute(
    args: &WorkerArgs,
    config_path: &str,
    format: OutputFormat,
) -> Result<(), AppError> {
    let config = super::load_config(config_path)?;
    let db = super::create_db_pool(&config).await?;
    let queue = super::job_queue(&db);

    match &args.command {
        WorkerCommand::Status => {
            let stats = queue.stats().await?;
            match format {
                OutputFormat::Json => output::print_json(&stats),
                OutputFormat::Table => {
                    println!("Queue Status:");
                    for (status, count) in &stats.by_status {
                        output::print_kv(status, &count.to_string());
                    }
                    println!("Worker Settings:");
                    output::print_kv("Enabled", &config.worker.enabled.to_string());
                    output::print_kv(
                        "Poll interval",
                        &format!("{}ms", config.worker.poll_interval_ms),
                    );
                    output::print_kv("Max attempts", &config.worker.max_attempts.to_string());
                    output::print_kv(
                        "Base backoff",
                        &format!("{}s", config.worker.base_backoff_seconds),
                    );
                    output::print_kv(
                        "Lease timeout",
                        &config
                            .worker
                            .lease_timeout_seconds
                            .map(|s| format!("{s}s"))
                            .unwrap_or_else(|| "disabled".to_string()),
                    );
                    output::print_kv("Executor", &config.executor.program);
                }
            }
        }
        WorkerCommand::RunOnce => {
            let metrics = Arc::new(JobMetrics::new());
            let processor = JobProcessor::new(
                Arc::new(db.jobs()),
                Arc::new(SubprocessExecutor::new(config.executor.clone())),
                metrics.clone(),
                RetryPolicy::from(&config.worker),
            )
            .with_content_store(Arc::new(db.contents()));

            let outcome = processor.process_one().await?;
            match format {
                OutputFormat::Json => output::print_json(&serde_json::json!({
                    "outcome": format!("{outcome:?}"),
                    "metrics": metrics.snapshot(),
                })),
                OutputFormat::Table => match outcome {
                    CycleOutcome::Idle | CycleOutcome::Busy => println!("No due jobs."),
                    CycleOutcome::Completed(id) => {
                        output::print_success(&format!("Job {} completed", id))
                    }
                    CycleOutcome::Retrying {
                        job_id,
                        next_run_at,
                    } => println!(
                        "Job {} failed; next attempt at {}",
                        job_id,
                        next_run_at.to_rfc3339()
                    ),
                    CycleOutcome::Failed(id) => {
                        println!("Job {} failed permanently", id)
                    }
                },
            }
        }
    }

    db.close().await;
    Ok(())
}
