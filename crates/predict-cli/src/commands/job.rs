//! Prediction job CLI commands.

use clap::{Args, Subcommand};
use serde::Serialize;
use tabled::Tabled;
use uuid::Uuid;

use crate::output::{self, OutputFormat};
use predict_core::error::AppError;
use predict_core::types::PageRequest;
use predict_entity::job::{CreateJob, JobFilter, JobStatus, PredictionJob};
use predict_worker::Requester;

/// Arguments for job commands
#[derive(Debug, Args)]
pub struct JobArgs {
    /// Job subcommand
    #[command(subcommand)]
    pub command: JobCommand,
}

/// Job subcommands
#[derive(Debug, Subcommand)]
pub enum JobCommand {
    /// Enqueue a new prediction job
    Enqueue {
        /// JSON input handed to the prediction program
        #[arg(short, long)]
        input: String,
        /// Content item the prediction is for
        #[arg(long)]
        content: Option<Uuid>,
        /// User enqueuing the job
        #[arg(long)]
        owner: Option<Uuid>,
    },
    /// Show a job
    Get {
        /// Job ID
        id: Uuid,
    },
    /// List jobs, newest first
    List {
        /// Filter by status
        #[arg(short, long)]
        status: Option<JobStatus>,
        /// Filter by owner
        #[arg(long)]
        owner: Option<Uuid>,
        /// Page number (1-based)
        #[arg(long, default_value_t = 1)]
        page: u64,
        /// Page size (at most 100)
        #[arg(long, default_value_t = 20)]
        limit: u64,
    },
    /// Cancel a pending job
    Cancel {
        /// Job ID
        id: Uuid,
        /// User performing the cancellation
        #[arg(long)]
        user: Uuid,
        /// Act with the admin role
        #[arg(long)]
        admin: bool,
    },
    /// Enqueue a fresh copy of a failed or cancelled job
    Requeue {
        /// Job ID
        id: Uuid,
    },
}

/// Job display row for table output
#[derive(Debug, Serialize, Tabled)]
struct JobRow {
    /// Job ID
    id: String,
    /// Status
    status: String,
    /// Attempts
    attempts: i32,
    /// Owner
    owner: String,
    /// Next run
    next_run_at: String,
    /// Last error
    last_error: String,
    /// Created at
    created_at: String,
}

impl From<&PredictionJob> for JobRow {
    fn from(job: &PredictionJob) -> Self {
        Self {
            id: job.id.to_string(),
            status: job.status.to_string(),
            attempts: job.attempts,
            owner: job.enqueued_by.map(|id| id.to_string()).unwrap_or_default(),
            next_run_at: job
                .next_run_at
                .map(|at| at.format("%Y-%m-%d %H:%M:%S").to_string())
                .unwrap_or_default(),
            last_error: job
                .last_error
                .as_deref()
                .map(|e| e.chars().take(60).collect())
                .unwrap_or_default(),
            created_at: job.created_at.format("%Y-%m-%d %H:%M").to_string(),
        }
    }
}

/// Execute job commands
pub async fn execute(
    args: &JobArgs,
    config_path: &str,
    format: OutputFormat,
) -> Result<(), AppError> {
    let config = super::load_config(config_path)?;
    let db = super::create_db_pool(&config).await?;
    let queue = super::job_queue(&db);

    match &args.command {
        JobCommand::Enqueue {
            input,
            content,
            owner,
        } => {
            let input: serde_json::Value = serde_json::from_str(input)
                .map_err(|e| AppError::validation(format!("Invalid JSON input: {}", e)))?;

            let job = queue
                .enqueue(CreateJob {
                    content_id: *content,
                    enqueued_by: *owner,
                    input,
                })
                .await?;

            match format {
                OutputFormat::Json => output::print_json(&job),
                OutputFormat::Table => {
                    output::print_success(&format!("Job enqueued (id: {})", job.id))
                }
            }
        }
        JobCommand::Get { id } => {
            let job = queue.get(*id).await?;
            print_job(&job, format);
        }
        JobCommand::List {
            status,
            owner,
            page,
            limit,
        } => {
            let filter = JobFilter {
                status: *status,
                enqueued_by: *owner,
            };
            let page = queue
                .list(&filter, &PageRequest::new(*page, *limit))
                .await?;

            match format {
                OutputFormat::Json => output::print_json(&page),
                OutputFormat::Table => {
                    let rows: Vec<JobRow> = page.items.iter().map(JobRow::from).collect();
                    output::print_list(&rows, format);
                    println!(
                        "Page {}/{} ({} jobs)",
                        page.page, page.total_pages, page.total_items
                    );
                }
            }
        }
        JobCommand::Cancel { id, user, admin } => {
            let requester = if *admin {
                Requester::admin(*user)
            } else {
                Requester::user(*user)
            };
            let job = queue.cancel(*id, &requester).await?;
            output::print_success(&format!("Job {} cancelled", job.id));
        }
        JobCommand::Requeue { id } => {
            let job = queue.requeue(*id).await?;
            output::print_success(&format!("Job {} requeued as {}", id, job.id));
        }
    }

    db.close().await;
    Ok(())
}

fn print_job(job: &PredictionJob, format: OutputFormat) {
    if format == OutputFormat::Json {
        output::print_json(job);
        return;
    }

    let fmt_time = |at: Option<chrono::DateTime<chrono::Utc>>| {
        at.map(|at| at.to_rfc3339()).unwrap_or_else(|| "-".to_string())
    };

    println!("Job {}", job.id);
    output::print_kv("Status", job.status.as_str());
    output::print_kv("Attempts", &job.attempts.to_string());
    output::print_kv(
        "Owner",
        &job.enqueued_by
            .map(|id| id.to_string())
            .unwrap_or_else(|| "-".to_string()),
    );
    output::print_kv(
        "Content",
        &job.content_id
            .map(|id| id.to_string())
            .unwrap_or_else(|| "-".to_string()),
    );
    output::print_kv("Input", &job.input.to_string());
    output::print_kv(
        "Result",
        &job.result
            .as_ref()
            .map(|r| r.to_string())
            .unwrap_or_else(|| "-".to_string()),
    );
    output::print_kv("Last error", job.last_error.as_deref().unwrap_or("-"));
    output::print_kv("Next run", &fmt_time(job.next_run_at));
    output::print_kv("Created", &job.created_at.to_rfc3339());
    output::print_kv("Updated", &job.updated_at.to_rfc3339());
    output::print_kv("Processed", &fmt_time(job.processed_at));
    if job.status == JobStatus::Cancelled {
        output::print_kv(
            "Cancelled by",
            &job.cancelled_by
                .map(|id| id.to_string())
                .unwrap_or_else(|| "-".to_string()),
        );
    }
}
