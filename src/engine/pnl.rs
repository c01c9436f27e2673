//! Read-only P&L derivation over the trade ledger.
//!
//! The service holds a [`LedgerReader`], so it can aggregate the ledger but
//! never mutate it.

use crate::db::LedgerReader;
use crate::domain::{Address, Decimal, Trade, TimeMs};
use crate::engine::cost_basis::CostBasis;
use chrono::NaiveDate;
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PositionPnl {
    /// Cost basis re-based to the live position size.
    pub total_invested: Decimal,
    pub current_value: Decimal,
    pub profit_loss: Decimal,
    pub profit_loss_percent: Decimal,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PortfolioPnl {
    pub total_invested: Decimal,
    pub total_current_value: Decimal,
    pub total_profit_loss: Decimal,
    pub total_profit_loss_percent: Decimal,
}

/// One day of the historical P&L series.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PnlPoint {
    pub date: NaiveDate,
    pub pnl: Decimal,
    /// UTC midnight of `date`, in milliseconds.
    pub timestamp: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PricePoint {
    pub date: NaiveDate,
    pub price: Decimal,
    pub timestamp: i64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AssetPerformance {
    pub chart_data: Vec<PricePoint>,
    /// Percentage change between the first and last daily average.
    pub performance: Decimal,
    pub first_price: Decimal,
    pub last_price: Decimal,
}

#[derive(Debug, Clone)]
pub struct PnlService {
    reader: LedgerReader,
}

impl PnlService {
    pub fn new(reader: LedgerReader) -> Self {
        Self { reader }
    }

    /// P&L of the open position `(wallet, mint)`; zero when there is none.
    pub async fn calculate_position_pnl(
        &self,
        wallet: &Address,
        mint: &Address,
    ) -> Result<PositionPnl, sqlx::Error> {
        let Some(position) = self.reader.get_position(wallet, mint).await? else {
            return Ok(PositionPnl::default());
        };
        if position.shares <= 0 {
            return Ok(PositionPnl::default());
        }

        let trades = self.reader.trades_for_position(wallet, mint).await?;
        let price = self
            .reader
            .get_asset(mint)
            .await?
            .map(|asset| asset.price_usdc)
            .unwrap_or_default();

        Ok(position_pnl(&trades, position.shares, price))
    }

    /// Sum of per-position results over the wallet's open positions.
    pub async fn calculate_portfolio_pnl(
        &self,
        wallet: &Address,
    ) -> Result<PortfolioPnl, sqlx::Error> {
        let mut positions = Vec::new();
        for position in self.reader.open_positions(wallet).await? {
            positions.push(self.calculate_position_pnl(wallet, &position.mint).await?);
        }
        Ok(portfolio_pnl(&positions))
    }

    /// Daily P&L for the trailing `days` days ending now.
    pub async fn historical_pnl(
        &self,
        wallet: &Address,
        days: u32,
    ) -> Result<Vec<PnlPoint>, sqlx::Error> {
        self.historical_pnl_at(wallet, days, TimeMs::now()).await
    }

    pub async fn historical_pnl_at(
        &self,
        wallet: &Address,
        days: u32,
        now: TimeMs,
    ) -> Result<Vec<PnlPoint>, sqlx::Error> {
        let from = now.minus_days(i64::from(days));
        let trades = self
            .reader
            .trades_for_wallet_between(wallet, from, now)
            .await?;
        if trades.is_empty() {
            return Ok(Vec::new());
        }

        let mut prices = HashMap::new();
        for trade in &trades {
            if !prices.contains_key(&trade.mint) {
                let price = self
                    .reader
                    .get_asset(&trade.mint)
                    .await?
                    .map(|asset| asset.price_usdc)
                    .unwrap_or_default();
                prices.insert(trade.mint.clone(), price);
            }
        }

        Ok(daily_pnl(&trades, &prices))
    }

    /// Daily average traded price of `mint` over the trailing `days` days.
    pub async fn asset_performance(
        &self,
        mint: &Address,
        days: u32,
    ) -> Result<AssetPerformance, sqlx::Error> {
        self.asset_performance_at(mint, days, TimeMs::now()).await
    }

    pub async fn asset_performance_at(
        &self,
        mint: &Address,
        days: u32,
        now: TimeMs,
    ) -> Result<AssetPerformance, sqlx::Error> {
        let from = now.minus_days(i64::from(days));
        let trades = self.reader.trades_for_mint_between(mint, from, now).await?;
        Ok(asset_performance(&trades))
    }
}

/// Weighted-average P&L of a position, re-based to `current_shares`.
///
/// `price_usdc` is the asset's current per-share price in micro-units.
pub fn position_pnl(trades: &[Trade], current_shares: i64, price_usdc: i64) -> PositionPnl {
    let basis = CostBasis::from_trades(trades);
    let shares = Decimal::from_i64(current_shares);

    let total_invested = shares * basis.avg_cost();
    let current_value = shares * Decimal::from_micro(price_usdc);
    let profit_loss = current_value - total_invested;

    PositionPnl {
        total_invested,
        current_value,
        profit_loss,
        profit_loss_percent: profit_loss.percent_of(total_invested),
    }
}

pub fn portfolio_pnl(positions: &[PositionPnl]) -> PortfolioPnl {
    let total_invested: Decimal = positions.iter().map(|p| p.total_invested).sum();
    let total_current_value: Decimal = positions.iter().map(|p| p.current_value).sum();
    let total_profit_loss = total_current_value - total_invested;

    PortfolioPnl {
        total_invested,
        total_current_value,
        total_profit_loss,
        total_profit_loss_percent: total_profit_loss.percent_of(total_invested),
    }
}

/// Replay `trades` chronologically with one book per mint and mark each mint
/// at `prices` (micro-units). Every trade adds its mint's P&L after that trade
/// to the accumulator of its UTC day, so a day with several trades sums
/// several marks.
pub fn daily_pnl(trades: &[Trade], prices: &HashMap<Address, i64>) -> Vec<PnlPoint> {
    let mut books: HashMap<&Address, CostBasis> = HashMap::new();
    let mut days: BTreeMap<NaiveDate, Decimal> = BTreeMap::new();

    for trade in trades {
        let book = books.entry(&trade.mint).or_default();
        book.apply(trade);

        let price = Decimal::from_micro(prices.get(&trade.mint).copied().unwrap_or_default());
        *days.entry(trade.created_at.utc_date()).or_default() += book.unrealized_pnl(price);
    }

    days.into_iter()
        .map(|(date, pnl)| PnlPoint {
            date,
            pnl,
            timestamp: midnight_ms(date),
        })
        .collect()
}

/// Daily average of per-share prices (`consideration / quantity`).
pub fn asset_performance(trades: &[Trade]) -> AssetPerformance {
    let mut days: BTreeMap<NaiveDate, (Decimal, i64)> = BTreeMap::new();

    for trade in trades.iter().filter(|t| t.amount > 0) {
        let per_share = Decimal::from_micro(trade.price_usdc) / Decimal::from_i64(trade.amount);
        let entry = days
            .entry(trade.created_at.utc_date())
            .or_insert((Decimal::zero(), 0));
        entry.0 += per_share;
        entry.1 += 1;
    }

    let chart_data: Vec<PricePoint> = days
        .into_iter()
        .map(|(date, (total, count))| PricePoint {
            date,
            price: total / Decimal::from_i64(count),
            timestamp: midnight_ms(date),
        })
        .collect();

    let first_price = chart_data.first().map(|p| p.price).unwrap_or_default();
    let last_price = chart_data.last().map(|p| p.price).unwrap_or_default();

    AssetPerformance {
        performance: (last_price - first_price).percent_of(first_price),
        chart_data,
        first_price,
        last_price,
    }
}

fn midnight_ms(date: NaiveDate) -> i64 {
    date.and_hms_opt(0, 0, 0)
        .map(|dt| dt.and_utc().timestamp_millis())
        .unwrap_or_default()
}
