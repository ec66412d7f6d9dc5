//! CLI command definitions and dispatch.

pub mod job;
pub mod migrate;
pub mod worker;

use std::sync::Arc;

use clap::{Parser, Subcommand};

use crate::output::OutputFormat;
use predict_core::config::AppConfig;
use predict_core::error::AppError;
use predict_database::DatabasePool;
use predict_worker::JobQueue;

/// Prediction queue operator tool
#[derive(Debug, Parser)]
#[command(name = "predict-cli", version, about, long_about = None)]
pub struct Cli {
    /// Path to configuration file
    #[arg(short, long, default_value = "config/default.toml")]
    pub config: String,

    /// Output format
    #[arg(short, long, value_enum, default_value = "table")]
    pub format: OutputFormat,

    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Commands,
}

/// Top-level commands
#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Apply database migrations
    Migrate,
    /// Prediction job management
    Job(job::JobArgs),
    /// Worker and queue status
    Worker(worker::WorkerArgs),
}

impl Cli {
    /// Execute the CLI command
    pub async fn execute(&self) -> Result<(), AppError> {
        match &self.command {
            Commands::Migrate => migrate::execute(&self.config).await,
            Commands::Job(args) => job::execute(args, &self.config, self.format).await,
            Commands::Worker(args) => worker::execute(args, &self.config, self.format).await,
        }
    }
}

/// Helper: load configuration from file
pub fn load_config(config_path: &str) -> Result<AppConfig, AppError> {
    AppConfig::load_from(config_path)
}

/// Helper: create database pool from config
pub async fn create_db_pool(config: &AppConfig) -> Result<DatabasePool, AppError> {
    DatabasePool::connect(&config.database).await
}

/// Helper: job queue over the PostgreSQL store
pub fn job_queue(db: &DatabasePool) -> JobQueue {
    JobQueue::new(Arc::new(db.jobs()))
}
