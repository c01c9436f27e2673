use axum::extract::{Query, State};
use axum::Json;
use serde::{Deserialize, Serialize};

use super::{parse_optional_address, AppState};
use crate::domain::{Claim, Dividend};
use crate::error::AppError;

#[derive(Debug, Deserialize)]
pub struct DividendsQuery {
    pub mint: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct DividendsResponse {
    pub dividends: Vec<Dividend>,
}

pub async fn get_dividends(
    Query(params): Query<DividendsQuery>,
    State(state): State<AppState>,
) -> Result<Json<DividendsResponse>, AppError> {
    let mint = parse_optional_address(params.mint.as_deref(), "mint")?;
    let dividends = state.reader.list_dividends(mint.as_ref()).await?;
    Ok(Json(DividendsResponse { dividends }))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClaimsQuery {
    pub wallet: Option<String>,
    pub dividend_id: Option<i64>,
}

#[derive(Debug, Serialize)]
pub struct ClaimsResponse {
    pub claims: Vec<Claim>,
}

pub async fn get_claims(
    Query(params): Query<ClaimsQuery>,
    State(state): State<AppState>,
) -> Result<Json<ClaimsResponse>, AppError> {
    let wallet = parse_optional_address(params.wallet.as_deref(), "wallet")?;
    let claims = state
        .reader
        .list_claims(wallet.as_ref(), params.dividend_id)
        .await?;
    Ok(Json(ClaimsResponse { claims }))
}
