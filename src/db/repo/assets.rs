//! Registry snapshot upserts and external price updates.

use crate::domain::{Address, AssetAccount, TimeMs};

use super::Repository;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertOutcome {
    Inserted,
    Updated,
    Unchanged,
}

impl Repository {
    /// Reconcile one registry account into the `assets` table.
    ///
    /// Chain-owned columns are overwritten from the snapshot; `ticker` and
    /// `created_at` are kept. The row, `updated_at` included, is only written
    /// when a chain-owned column actually differs.
    pub async fn upsert_asset_account(
        &self,
        account: &AssetAccount,
        at: TimeMs,
    ) -> Result<UpsertOutcome, sqlx::Error> {
        let existed: i64 = sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM assets WHERE mint = ?)")
            .bind(account.mint.as_str())
            .fetch_one(&self.pool)
            .await?;

        let result = sqlx::query(
            r#"
            INSERT INTO assets (
                mint, account, ticker, issuer, usdc_mint, decimals,
                price_usdc, total_supply, free_float, created_at, updated_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(mint) DO UPDATE SET
                account = excluded.account,
                issuer = excluded.issuer,
                usdc_mint = excluded.usdc_mint,
                decimals = excluded.decimals,
                price_usdc = excluded.price_usdc,
                total_supply = excluded.total_supply,
                free_float = excluded.free_float,
                updated_at = excluded.updated_at
            WHERE assets.account IS NOT excluded.account
               OR assets.issuer <> excluded.issuer
               OR assets.usdc_mint <> excluded.usdc_mint
               OR assets.decimals <> excluded.decimals
               OR assets.price_usdc <> excluded.price_usdc
               OR assets.total_supply <> excluded.total_supply
               OR assets.free_float <> excluded.free_float
            "#,
        )
        .bind(account.mint.as_str())
        .bind(account.account.as_str())
        .bind(account.mint.short())
        .bind(account.issuer.as_str())
        .bind(account.usdc_mint.as_str())
        .bind(i64::from(account.decimals))
        .bind(account.price_usdc)
        .bind(account.total_supply)
        .bind(account.clamped_free_float())
        .bind(at.as_i64())
        .bind(at.as_i64())
        .execute(&self.pool)
        .await?;

        Ok(match (existed != 0, result.rows_affected() > 0) {
            (_, false) => UpsertOutcome::Unchanged,
            (false, true) => UpsertOutcome::Inserted,
            (true, true) => UpsertOutcome::Updated,
        })
    }

    /// Set an externally sourced reference price. Returns false for an unknown mint.
    pub async fn update_asset_price(
        &self,
        mint: &Address,
        price_usdc: i64,
        at: TimeMs,
    ) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            r#"
            UPDATE assets
            SET price_usdc = ?, updated_at = ?
            WHERE mint = ?
            "#,
        )
        .bind(price_usdc)
        .bind(at.as_i64())
        .bind(mint.as_str())
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }
}
