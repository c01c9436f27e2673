use axum::extract::{Query, State};
use axum::Json;
use serde::{Deserialize, Serialize};

use super::{parse_address, AppState};
use crate::domain::{Address, Decimal, TimeMs};
use crate::engine::{PortfolioPnl, PositionPnl};
use crate::error::AppError;

#[derive(Debug, Deserialize)]
pub struct PortfolioQuery {
    pub wallet: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HoldingDto {
    pub mint: Address,
    pub ticker: Option<String>,
    pub shares: i64,
    pub price: Decimal,
    pub updated_at: TimeMs,
    #[serde(flatten)]
    pub pnl: PositionPnl,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PortfolioResponse {
    pub wallet: Address,
    pub positions: Vec<HoldingDto>,
    pub summary: PortfolioPnl,
}

/// Open positions of a wallet with per-position and aggregate P&L.
pub async fn get_portfolio(
    Query(params): Query<PortfolioQuery>,
    State(state): State<AppState>,
) -> Result<Json<PortfolioResponse>, AppError> {
    let wallet = parse_address(&params.wallet, "wallet")?;

    let mut positions = Vec::new();
    for position in state.reader.open_positions(&wallet).await? {
        let asset = state.reader.get_asset(&position.mint).await?;
        let pnl = state
            .pnl
            .calculate_position_pnl(&wallet, &position.mint)
            .await?;
        positions.push(HoldingDto {
            ticker: asset.as_ref().map(|a| a.ticker.clone()),
            price: Decimal::from_micro(asset.map(|a| a.price_usdc).unwrap_or_default()),
            mint: position.mint,
            shares: position.shares,
            updated_at: position.updated_at,
            pnl,
        });
    }

    let pnls: Vec<PositionPnl> = positions.iter().map(|p| p.pnl).collect();
    Ok(Json(PortfolioResponse {
        wallet,
        summary: crate::engine::pnl::portfolio_pnl(&pnls),
        positions,
    }))
}
