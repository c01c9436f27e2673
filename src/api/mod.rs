pub mod assets;
pub mod dividends;
pub mod health;
pub mod pnl;
pub mod portfolio;
pub mod stats;
pub mod trades;

use crate::db::LedgerReader;
use crate::domain::Address;
use crate::engine::{AssetSyncService, PnlService};
use crate::error::AppError;
use axum::{
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};

/// Largest accepted `days` window.
pub const MAX_DAYS: u32 = 3650;
pub const DEFAULT_DAYS: u32 = 30;

#[derive(Clone)]
pub struct AppState {
    pub reader: LedgerReader,
    pub pnl: Arc<PnlService>,
    pub sync: Arc<AssetSyncService>,
}

impl AppState {
    pub fn new(reader: LedgerReader, sync: Arc<AssetSyncService>) -> Self {
        Self {
            pnl: Arc::new(PnlService::new(reader.clone())),
            reader,
            sync,
        }
    }
}

pub fn create_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(health::health))
        .route("/ready", get(health::ready))
        .route("/v1/assets", get(assets::list_assets))
        .route("/v1/assets/:mint", get(assets::get_asset))
        .route("/v1/assets/:mint/price", post(assets::update_price))
        .route("/v1/assets/:mint/performance", get(assets::get_performance))
        .route("/v1/trades", get(trades::get_trades))
        .route("/v1/portfolio", get(portfolio::get_portfolio))
        .route("/v1/dividends", get(dividends::get_dividends))
        .route("/v1/claims", get(dividends::get_claims))
        .route("/v1/pnl/portfolio", get(pnl::get_portfolio_pnl))
        .route("/v1/pnl/history", get(pnl::get_pnl_history))
        .route("/v1/stats", get(stats::get_stats))
        .route("/v1/dead-letters", get(stats::get_dead_letters))
        .route("/v1/sync/assets", post(stats::sync_assets))
        .layer(cors)
        .with_state(state)
}

/// Parse a base58 wallet or mint parameter.
pub(crate) fn parse_address(input: &str, field: &str) -> Result<Address, AppError> {
    Address::parse(input).map_err(|_| AppError::BadRequest(format!("Invalid {}", field)))
}

/// Parse an optional address filter; empty strings mean "no filter".
pub(crate) fn parse_optional_address(
    input: Option<&str>,
    field: &str,
) -> Result<Option<Address>, AppError> {
    match input.map(str::trim) {
        None | Some("") => Ok(None),
        Some(s) => parse_address(s, field).map(Some),
    }
}

pub(crate) fn parse_days(days: Option<u32>) -> Result<u32, AppError> {
    let days = days.unwrap_or(DEFAULT_DAYS);
    if !(1..=MAX_DAYS).contains(&days) {
        return Err(AppError::BadRequest(format!(
            "days must be between 1 and {}",
            MAX_DAYS
        )));
    }
    Ok(days)
}
