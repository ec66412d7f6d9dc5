//! Database migration command.

use crate::output;
use predict_core::error::AppError;

/// Apply all pending migrations
pub async fn execute(config_path: &str) -> Result<(), AppError> {
    let config = super::load_config(config_path)?;
    let db = super::create_db_pool(&config).await?;

    println!("Running database migrations...");
    db.migrate().await?;
    output::print_success("All migrations applied successfully.");

    db.close().await;
    Ok(())
}
