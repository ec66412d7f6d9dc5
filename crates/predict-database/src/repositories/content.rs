//! Content repository implementation.

use async_trait::async_trait;
use sqlx::PgPool;
use sqlx::types::Json;
use uuid::Uuid;

use predict_core::error::{AppError, ErrorKind};
use predict_core::result::AppResult;
use predict_entity::content::LastPrediction;

use crate::store::ContentStore;

/// Repository for the prediction fields of content items.
#[derive(Debug, Clone)]
pub struct ContentRepository {
    pool: PgPool,
}

impl ContentRepository {
    /// Create a new content repository.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ContentStore for ContentRepository {
    async fn record_last_prediction(
        &self,
        content_id: Uuid,
        prediction: &LastPrediction,
    ) -> AppResult<()> {
        let result = sqlx::query(
            "UPDATE contents SET last_prediction = $2, updated_at = NOW() WHERE id = $1",
        )
        .bind(content_id)
        .bind(Json(prediction))
        .execute(&self.pool)
        .await
        .map_err(|e| {
            AppError::with_source(ErrorKind::Database, "Failed to record last prediction", e)
        })?;

        if result.rows_affected() == 0 {
            return Err(AppError::not_found(format!(
                "Content {content_id} not found"
            )));
        }
        Ok(())
    }
}
