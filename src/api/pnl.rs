use axum::extract::{Query, State};
use axum::Json;
use serde::{Deserialize, Serialize};

use crate::api::{parse_address, parse_days, AppState};
use crate::domain::Address;
use crate::engine::{PnlPoint, PortfolioPnl};
use crate::error::AppError;

#[derive(Debug, Deserialize)]
pub struct PortfolioPnlQuery {
    pub wallet: String,
}

pub async fn get_portfolio_pnl(
    Query(params): Query<PortfolioPnlQuery>,
    State(state): State<AppState>,
) -> Result<Json<PortfolioPnl>, AppError> {
    let wallet = parse_address(&params.wallet, "wallet")?;
    let pnl = state.pnl.calculate_portfolio_pnl(&wallet).await?;
    Ok(Json(pnl))
}

#[derive(Debug, Deserialize)]
pub struct PnlHistoryQuery {
    pub wallet: String,
    pub days: Option<u32>,
}

#[derive(Debug, Serialize)]
pub struct PnlHistoryResponse {
    pub wallet: Address,
    pub days: u32,
    pub history: Vec<PnlPoint>,
}

pub async fn get_pnl_history(
    Query(params): Query<PnlHistoryQuery>,
    State(state): State<AppState>,
) -> Result<Json<PnlHistoryResponse>, AppError> {
    let wallet = parse_address(&params.wallet, "wallet")?;
    let days = parse_days(params.days)?;
    let history = state.pnl.historical_pnl(&wallet, days).await?;
    Ok(Json(PnlHistoryResponse {
        wallet,
        days,
        history,
    }))
}
