use axum::extract::{Query, State};
use axum::Json;
use serde::{Deserialize, Serialize};

use super::{parse_optional_address, AppState};
use crate::db::TradeFilter;
use crate::domain::{Decimal, Trade};
use crate::error::AppError;

pub const DEFAULT_LIMIT: i64 = 50;
pub const MAX_LIMIT: i64 = 500;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TradesQuery {
    pub mint: Option<String>,
    pub wallet: Option<String>,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TradeDto {
    #[serde(flatten)]
    pub trade: Trade,
    /// Consideration per share in currency units.
    pub price_per_share: Decimal,
}

impl From<Trade> for TradeDto {
    fn from(trade: Trade) -> Self {
        Self {
            price_per_share: Decimal::from_micro(trade.price_usdc)
                .checked_div_or_zero(Decimal::from_i64(trade.amount)),
            trade,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct TradesResponse {
    pub trades: Vec<TradeDto>,
    pub limit: i64,
    pub offset: i64,
}

pub async fn get_trades(
    Query(params): Query<TradesQuery>,
    State(state): State<AppState>,
) -> Result<Json<TradesResponse>, AppError> {
    let limit = params.limit.unwrap_or(DEFAULT_LIMIT);
    if limit < 1 {
        return Err(AppError::BadRequest("limit must be positive".to_string()));
    }
    let offset = params.offset.unwrap_or(0);
    if offset < 0 {
        return Err(AppError::BadRequest("offset must not be negative".to_string()));
    }

    let filter = TradeFilter {
        mint: parse_optional_address(params.mint.as_deref(), "mint")?,
        wallet: parse_optional_address(params.wallet.as_deref(), "wallet")?,
        limit: limit.min(MAX_LIMIT),
        offset,
    };

    let trades = state.reader.list_trades(&filter).await?;
    Ok(Json(TradesResponse {
        trades: trades.into_iter().map(TradeDto::from).collect(),
        limit: filter.limit,
        offset: filter.offset,
    }))
}
