use axum::extract::{Query, State};
use axum::Json;
use serde::{Deserialize, Serialize};

use super::trades::{DEFAULT_LIMIT, MAX_LIMIT};
use crate::api::AppState;
use crate::db::{DeadLetter, LedgerStats};
use crate::engine::SyncReport;
use crate::error::AppError;

pub async fn get_stats(State(state): State<AppState>) -> Result<Json<LedgerStats>, AppError> {
    Ok(Json(state.reader.stats().await?))
}

#[derive(Debug, Deserialize)]
pub struct DeadLettersQuery {
    pub limit: Option<i64>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeadLettersResponse {
    pub dead_letters: Vec<DeadLetter>,
}

/// Events given up on after retries, newest first.
pub async fn get_dead_letters(
    Query(params): Query<DeadLettersQuery>,
    State(state): State<AppState>,
) -> Result<Json<DeadLettersResponse>, AppError> {
    let limit = params.limit.unwrap_or(DEFAULT_LIMIT);
    if limit < 1 {
        return Err(AppError::BadRequest("limit must be positive".to_string()));
    }

    let dead_letters = state.reader.dead_letters(limit.min(MAX_LIMIT)).await?;
    Ok(Json(DeadLettersResponse { dead_letters }))
}

/// Manual registry re-sync.
pub async fn sync_assets(State(state): State<AppState>) -> Result<Json<SyncReport>, AppError> {
    let report = state.sync.sync_assets().await?;
    Ok(Json(report))
}
