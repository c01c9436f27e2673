use axum::extract::{Path, Query, State};
use axum::Json;
use serde::{Deserialize, Serialize};

use crate::api::{parse_address, parse_days, parse_optional_address, AppState};
use crate::db::{AssetFilter, AssetSort};
use crate::domain::{Asset, Decimal};
use crate::engine::AssetPerformance;
use crate::error::AppError;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AssetsQuery {
    pub mint: Option<String>,
    pub q: Option<String>,
    pub sort: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AssetDto {
    #[serde(flatten)]
    pub asset: Asset,
    /// `price_usdc` in currency units.
    pub price: Decimal,
}

impl From<Asset> for AssetDto {
    fn from(asset: Asset) -> Self {
        Self {
            price: Decimal::from_micro(asset.price_usdc),
            asset,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct AssetsResponse {
    pub assets: Vec<AssetDto>,
}

pub async fn list_assets(
    Query(params): Query<AssetsQuery>,
    State(state): State<AppState>,
) -> Result<Json<AssetsResponse>, AppError> {
    let sort = match params.sort.as_deref().map(str::trim) {
        None | Some("") => AssetSort::default(),
        Some(s) => s.parse::<AssetSort>().map_err(AppError::BadRequest)?,
    };
    let filter = AssetFilter {
        mint: parse_optional_address(params.mint.as_deref(), "mint")?,
        query: params
            .q
            .map(|q| q.trim().to_string())
            .filter(|q| !q.is_empty()),
        sort,
    };

    let assets = state.reader.list_assets(&filter).await?;
    Ok(Json(AssetsResponse {
        assets: assets.into_iter().map(AssetDto::from).collect(),
    }))
}

pub async fn get_asset(
    Path(mint): Path<String>,
    State(state): State<AppState>,
) -> Result<Json<AssetDto>, AppError> {
    let mint = parse_address(&mint, "mint")?;
    let asset = state
        .reader
        .get_asset(&mint)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("Asset {} not found", mint)))?;
    Ok(Json(asset.into()))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PriceUpdate {
    /// New reference price in micro-units.
    pub price_usdc: i64,
}

pub async fn update_price(
    Path(mint): Path<String>,
    State(state): State<AppState>,
    Json(body): Json<PriceUpdate>,
) -> Result<Json<AssetDto>, AppError> {
    let mint = parse_address(&mint, "mint")?;
    state.sync.update_asset_price(&mint, body.price_usdc).await?;

    let asset = state
        .reader
        .get_asset(&mint)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("Asset {} not found", mint)))?;
    Ok(Json(asset.into()))
}

#[derive(Debug, Deserialize)]
pub struct PerformanceQuery {
    pub days: Option<u32>,
}

pub async fn get_performance(
    Path(mint): Path<String>,
    Query(params): Query<PerformanceQuery>,
    State(state): State<AppState>,
) -> Result<Json<AssetPerformance>, AppError> {
    let mint = parse_address(&mint, "mint")?;
    let days = parse_days(params.days)?;
    let performance = state.pnl.asset_performance(&mint, days).await?;
    Ok(Json(performance))
}
