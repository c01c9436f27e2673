//! Read-only view of the ledger.
//!
//! `LedgerReader` only issues SELECT statements. The P&L service and the
//! query surface are handed a reader, never a [`crate::db::Repository`].

use crate::db::repo::DeadLetter;
use crate::db::rows::{
    asset_from_row, claim_from_row, dividend_from_row, position_from_row, trade_from_row,
    ASSET_COLUMNS, CLAIM_COLUMNS, DIVIDEND_COLUMNS, TRADE_COLUMNS,
};
use crate::domain::{Address, Asset, Claim, Dividend, Position, Trade, TimeMs};
use serde::Serialize;
use sqlx::sqlite::{Sqlite, SqlitePool};
use sqlx::{QueryBuilder, Row};
use std::str::FromStr;

/// Sort order for asset listings.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum AssetSort {
    /// Ticker ascending.
    Name,
    /// Price descending.
    Price,
    /// Most recently created first.
    #[default]
    Newest,
}

impl FromStr for AssetSort {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "name" => Ok(AssetSort::Name),
            "price" => Ok(AssetSort::Price),
            "newest" => Ok(AssetSort::Newest),
            other => Err(format!("sort must be name, price or newest, got {}", other)),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct AssetFilter {
    pub mint: Option<Address>,
    /// Case-insensitive substring of ticker or issuer.
    pub query: Option<String>,
    pub sort: AssetSort,
}

#[derive(Debug, Clone)]
pub struct TradeFilter {
    pub mint: Option<Address>,
    pub wallet: Option<Address>,
    pub limit: i64,
    pub offset: i64,
}

impl Default for TradeFilter {
    fn default() -> Self {
        Self {
            mint: None,
            wallet: None,
            limit: 50,
            offset: 0,
        }
    }
}

/// Row counts per ledger table.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LedgerStats {
    pub assets: i64,
    pub trades: i64,
    pub positions: i64,
    pub dividends: i64,
    pub claims: i64,
    pub dead_letters: i64,
}

#[derive(Debug, Clone)]
pub struct LedgerReader {
    pool: SqlitePool,
}

impl LedgerReader {
    pub fn new(pool: SqlitePool) -> Self {
        LedgerReader { pool }
    }

    /// Database round trip used by `/ready`.
    pub async fn ping(&self) -> Result<(), sqlx::Error> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }

    // =========================================================================
    // Assets
    // =========================================================================

    pub async fn get_asset(&self, mint: &Address) -> Result<Option<Asset>, sqlx::Error> {
        let row = sqlx::query(&format!("SELECT {} FROM assets WHERE mint = ?", ASSET_COLUMNS))
            .bind(mint.as_str())
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(asset_from_row).transpose()
    }

    pub async fn list_assets(&self, filter: &AssetFilter) -> Result<Vec<Asset>, sqlx::Error> {
        let mut qb: QueryBuilder<Sqlite> =
            QueryBuilder::new(format!("SELECT {} FROM assets WHERE 1 = 1", ASSET_COLUMNS));

        if let Some(mint) = &filter.mint {
            qb.push(" AND mint = ").push_bind(mint.as_str().to_string());
        }
        if let Some(query) = filter.query.as_deref().filter(|q| !q.trim().is_empty()) {
            let pattern = format!("%{}%", query.trim());
            qb.push(" AND (ticker LIKE ")
                .push_bind(pattern.clone())
                .push(" OR issuer LIKE ")
                .push_bind(pattern)
                .push(")");
        }
        qb.push(match filter.sort {
            AssetSort::Name => " ORDER BY ticker ASC, mint ASC",
            AssetSort::Price => " ORDER BY price_usdc DESC, mint ASC",
            AssetSort::Newest => " ORDER BY created_at DESC, id DESC",
        });

        let rows = qb.build().fetch_all(&self.pool).await?;
        rows.iter().map(asset_from_row).collect()
    }

    // =========================================================================
    // Trades
    // =========================================================================

    /// Newest-first trade listing with optional filters.
    pub async fn list_trades(&self, filter: &TradeFilter) -> Result<Vec<Trade>, sqlx::Error> {
        let mut qb: QueryBuilder<Sqlite> =
            QueryBuilder::new(format!("SELECT {} FROM trades WHERE 1 = 1", TRADE_COLUMNS));

        if let Some(mint) = &filter.mint {
            qb.push(" AND mint = ").push_bind(mint.as_str().to_string());
        }
        if let Some(wallet) = &filter.wallet {
            qb.push(" AND wallet = ").push_bind(wallet.as_str().to_string());
        }
        qb.push(" ORDER BY created_at DESC, id DESC LIMIT ")
            .push_bind(filter.limit)
            .push(" OFFSET ")
            .push_bind(filter.offset);

        let rows = qb.build().fetch_all(&self.pool).await?;
        rows.iter().map(trade_from_row).collect()
    }

    /// Full chronological history of one (wallet, mint) pair.
    pub async fn trades_for_position(
        &self,
        wallet: &Address,
        mint: &Address,
    ) -> Result<Vec<Trade>, sqlx::Error> {
        let rows = sqlx::query(&format!(
            r#"
            SELECT {}
            FROM trades
            WHERE wallet = ? AND mint = ?
            ORDER BY created_at ASC, id ASC
            "#,
            TRADE_COLUMNS
        ))
        .bind(wallet.as_str())
        .bind(mint.as_str())
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(trade_from_row).collect()
    }

    /// Chronological trades of a wallet with `from <= created_at <= to`.
    pub async fn trades_for_wallet_between(
        &self,
        wallet: &Address,
        from: TimeMs,
        to: TimeMs,
    ) -> Result<Vec<Trade>, sqlx::Error> {
        let rows = sqlx::query(&format!(
            r#"
            SELECT {}
            FROM trades
            WHERE wallet = ? AND created_at >= ? AND created_at <= ?
            ORDER BY created_at ASC, id ASC
            "#,
            TRADE_COLUMNS
        ))
        .bind(wallet.as_str())
        .bind(from.as_i64())
        .bind(to.as_i64())
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(trade_from_row).collect()
    }

    /// Chronological trades on an asset with `from <= created_at <= to`.
    pub async fn trades_for_mint_between(
        &self,
        mint: &Address,
        from: TimeMs,
        to: TimeMs,
    ) -> Result<Vec<Trade>, sqlx::Error> {
        let rows = sqlx::query(&format!(
            r#"
            SELECT {}
            FROM trades
            WHERE mint = ? AND created_at >= ? AND created_at <= ?
            ORDER BY created_at ASC, id ASC
            "#,
            TRADE_COLUMNS
        ))
        .bind(mint.as_str())
        .bind(from.as_i64())
        .bind(to.as_i64())
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(trade_from_row).collect()
    }

    // =========================================================================
    // Positions
    // =========================================================================

    pub async fn get_position(
        &self,
        wallet: &Address,
        mint: &Address,
    ) -> Result<Option<Position>, sqlx::Error> {
        let row = sqlx::query(
            "SELECT wallet, mint, shares, updated_at FROM positions WHERE wallet = ? AND mint = ?",
        )
        .bind(wallet.as_str())
        .bind(mint.as_str())
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(position_from_row).transpose()
    }

    /// Open positions (shares > 0) of a wallet, ordered by mint.
    pub async fn open_positions(&self, wallet: &Address) -> Result<Vec<Position>, sqlx::Error> {
        let rows = sqlx::query(
            r#"
            SELECT wallet, mint, shares, updated_at
            FROM positions
            WHERE wallet = ? AND shares > 0
            ORDER BY mint ASC
            "#,
        )
        .bind(wallet.as_str())
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(position_from_row).collect()
    }

    /// Replay `Σbuy − Σsell` for a pair straight from the ledger.
    pub async fn replayed_shares(
        &self,
        wallet: &Address,
        mint: &Address,
    ) -> Result<i64, sqlx::Error> {
        sqlx::query_scalar(
            r#"
            SELECT COALESCE(SUM(CASE WHEN side = 'buy' THEN amount ELSE -amount END), 0)
            FROM trades
            WHERE wallet = ? AND mint = ?
            "#,
        )
        .bind(wallet.as_str())
        .bind(mint.as_str())
        .fetch_one(&self.pool)
        .await
    }

    // =========================================================================
    // Dividends and claims
    // =========================================================================

    pub async fn get_dividend(&self, pda: &Address) -> Result<Option<Dividend>, sqlx::Error> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM dividends WHERE pda = ?",
            DIVIDEND_COLUMNS
        ))
        .bind(pda.as_str())
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(dividend_from_row).transpose()
    }

    pub async fn list_dividends(
        &self,
        mint: Option<&Address>,
    ) -> Result<Vec<Dividend>, sqlx::Error> {
        let mut qb: QueryBuilder<Sqlite> = QueryBuilder::new(format!(
            "SELECT {} FROM dividends WHERE 1 = 1",
            DIVIDEND_COLUMNS
        ));
        if let Some(mint) = mint {
            qb.push(" AND mint = ").push_bind(mint.as_str().to_string());
        }
        qb.push(" ORDER BY created_at DESC, id DESC");

        let rows = qb.build().fetch_all(&self.pool).await?;
        rows.iter().map(dividend_from_row).collect()
    }

    pub async fn list_claims(
        &self,
        wallet: Option<&Address>,
        dividend_id: Option<i64>,
    ) -> Result<Vec<Claim>, sqlx::Error> {
        let mut qb: QueryBuilder<Sqlite> =
            QueryBuilder::new(format!("SELECT {} FROM claims WHERE 1 = 1", CLAIM_COLUMNS));
        if let Some(wallet) = wallet {
            qb.push(" AND wallet = ").push_bind(wallet.as_str().to_string());
        }
        if let Some(dividend_id) = dividend_id {
            qb.push(" AND dividend_id = ").push_bind(dividend_id);
        }
        qb.push(" ORDER BY created_at DESC, id DESC");

        let rows = qb.build().fetch_all(&self.pool).await?;
        rows.iter().map(claim_from_row).collect()
    }

    // =========================================================================
    // Operations
    // =========================================================================

    pub async fn stats(&self) -> Result<LedgerStats, sqlx::Error> {
        let row = sqlx::query(
            r#"
            SELECT
                (SELECT COUNT(*) FROM assets) AS assets,
                (SELECT COUNT(*) FROM trades) AS trades,
                (SELECT COUNT(*) FROM positions) AS positions,
                (SELECT COUNT(*) FROM dividends) AS dividends,
                (SELECT COUNT(*) FROM claims) AS claims,
                (SELECT COUNT(*) FROM dead_letters) AS dead_letters
            "#,
        )
        .fetch_one(&self.pool)
        .await?;

        Ok(LedgerStats {
            assets: row.try_get("assets")?,
            trades: row.try_get("trades")?,
            positions: row.try_get("positions")?,
            dividends: row.try_get("dividends")?,
            claims: row.try_get("claims")?,
            dead_letters: row.try_get("dead_letters")?,
        })
    }

    /// Most recent dead letters first.
    pub async fn dead_letters(&self, limit: i64) -> Result<Vec<DeadLetter>, sqlx::Error> {
        let rows = sqlx::query(
            r#"
            SELECT id, signature, slot, event_name, payload, error, created_at
            FROM dead_letters
            ORDER BY id DESC
            LIMIT ?
            "#,
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|row| {
                Ok(DeadLetter {
                    id: row.try_get("id")?,
                    signature: row.try_get("signature")?,
                    slot: row.try_get("slot")?,
                    event_name: row.try_get("event_name")?,
                    payload: row.try_get("payload")?,
                    error: row.try_get("error")?,
                    created_at: TimeMs::new(row.try_get("created_at")?),
                })
            })
            .collect()
    }
}
