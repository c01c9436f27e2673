//! Transactional application of program events.
//!
//! Every method runs in one SQLite transaction whose first statement is a
//! write, so the connection takes the write lock up front instead of
//! upgrading a read snapshot.

use crate::domain::{Address, Asset, Trade, TimeMs};
use sqlx::Row;

use super::Repository;

/// Free-float adjustment requested by an event and the value actually stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FloatChange {
    pub requested: i64,
    pub applied: i64,
}

impl FloatChange {
    pub fn is_clamped(&self) -> bool {
        self.requested != self.applied
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TradeApplied {
    /// A trade with this key already exists; nothing changed.
    Duplicate,
    Recorded {
        /// Position balance after the trade (0 means the row was removed).
        position_shares: i64,
        /// `None` when the asset is not indexed yet.
        free_float: Option<FloatChange>,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewDividend {
    pub pda: Address,
    /// Registry account or mint of the asset.
    pub asset: Address,
    pub index: i64,
    pub total_amount: i64,
    pub supply_circ_at_open: i64,
    pub created_at: TimeMs,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DividendApplied {
    Recorded,
    Duplicate,
    UnknownAsset,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewClaim {
    pub pda: String,
    pub dividend: Address,
    pub wallet: Address,
    pub amount: i64,
    pub created_at: TimeMs,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClaimApplied {
    Recorded {
        /// Sum of all claims on the dividend, this one included.
        claimed_total: i64,
        dividend_total: i64,
    },
    Duplicate,
    UnknownDividend,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseApplied {
    Recorded,
    AlreadyClosed,
    UnknownDividend,
}

impl Repository {
    /// Append a trade, rebuild its position from the ledger and move the asset's free float.
    ///
    /// The position is recomputed as `Σbuy − Σsell` over every trade of the
    /// pair, so it stays equal to a ledger replay whatever order trades arrive in.
    pub async fn apply_trade(&self, trade: &Trade) -> Result<TradeApplied, sqlx::Error> {
        let mut tx = self.pool.begin().await?;

        let inserted = sqlx::query(
            r#"
            INSERT INTO trades (sig, mint, side, wallet, amount, price_usdc, slot, created_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(sig) DO NOTHING
            "#,
        )
        .bind(&trade.sig)
        .bind(trade.mint.as_str())
        .bind(trade.side.as_str())
        .bind(trade.wallet.as_str())
        .bind(trade.amount)
        .bind(trade.price_usdc)
        .bind(trade.slot)
        .bind(trade.created_at.as_i64())
        .execute(&mut *tx)
        .await?;

        if inserted.rows_affected() == 0 {
            tx.rollback().await?;
            return Ok(TradeApplied::Duplicate);
        }

        let position_shares: i64 = sqlx::query_scalar(
            r#"
            SELECT COALESCE(SUM(CASE WHEN side = 'buy' THEN amount ELSE -amount END), 0)
            FROM trades
            WHERE wallet = ? AND mint = ?
            "#,
        )
        .bind(trade.wallet.as_str())
        .bind(trade.mint.as_str())
        .fetch_one(&mut *tx)
        .await?;

        let now = TimeMs::now();
        if position_shares > 0 {
            sqlx::query(
                r#"
                INSERT INTO positions (wallet, mint, shares, updated_at)
                VALUES (?, ?, ?, ?)
                ON CONFLICT(wallet, mint) DO UPDATE SET
                    shares = excluded.shares,
                    updated_at = excluded.updated_at
                "#,
            )
            .bind(trade.wallet.as_str())
            .bind(trade.mint.as_str())
            .bind(position_shares)
            .bind(now.as_i64())
            .execute(&mut *tx)
            .await?;
        } else {
            sqlx::query("DELETE FROM positions WHERE wallet = ? AND mint = ?")
                .bind(trade.wallet.as_str())
                .bind(trade.mint.as_str())
                .execute(&mut *tx)
                .await?;
        }

        let asset = sqlx::query("SELECT free_float, total_supply FROM assets WHERE mint = ?")
            .bind(trade.mint.as_str())
            .fetch_optional(&mut *tx)
            .await?;

        let free_float = match asset {
            Some(row) => {
                let current: i64 = row.try_get("free_float")?;
                let supply: i64 = row.try_get("total_supply")?;
                // Buys take shares out of the float, sells return them.
                let requested = current.saturating_sub(trade.signed_amount());
                let applied = requested.clamp(0, supply.max(0));

                sqlx::query("UPDATE assets SET free_float = ?, updated_at = ? WHERE mint = ?")
                    .bind(applied)
                    .bind(now.as_i64())
                    .bind(trade.mint.as_str())
                    .execute(&mut *tx)
                    .await?;

                Some(FloatChange { requested, applied })
            }
            None => None,
        };

        tx.commit().await?;
        Ok(TradeApplied::Recorded {
            position_shares: position_shares.max(0),
            free_float,
        })
    }

    /// Insert an asset first seen through `AssetCreated`. Returns false when
    /// the mint or registry account is already indexed.
    pub async fn insert_asset(&self, asset: &Asset) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            r#"
            INSERT INTO assets (
                mint, account, ticker, issuer, usdc_mint, decimals,
                price_usdc, total_supply, free_float, created_at, updated_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT DO NOTHING
            "#,
        )
        .bind(asset.mint.as_str())
        .bind(asset.account.as_ref().map(|a| a.as_str()))
        .bind(&asset.ticker)
        .bind(asset.issuer.as_str())
        .bind(&asset.usdc_mint)
        .bind(i64::from(asset.decimals))
        .bind(asset.price_usdc)
        .bind(asset.total_supply)
        .bind(asset.free_float.clamp(0, asset.total_supply.max(0)))
        .bind(asset.created_at.as_i64())
        .bind(asset.updated_at.as_i64())
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    /// Apply an `AssetUpdated` event to the asset held by registry `account`.
    ///
    /// Returns `None` when no asset has that registry account.
    pub async fn apply_asset_update(
        &self,
        account: &Address,
        price_usdc: i64,
        free_float: i64,
        at: TimeMs,
    ) -> Result<Option<FloatChange>, sqlx::Error> {
        let mut tx = self.pool.begin().await?;

        let updated = sqlx::query(
            r#"
            UPDATE assets
            SET price_usdc = ?, free_float = MIN(MAX(?, 0), total_supply), updated_at = ?
            WHERE account = ?
            "#,
        )
        .bind(price_usdc)
        .bind(free_float)
        .bind(at.as_i64())
        .bind(account.as_str())
        .execute(&mut *tx)
        .await?;

        if updated.rows_affected() == 0 {
            tx.commit().await?;
            return Ok(None);
        }

        let applied: i64 = sqlx::query_scalar("SELECT free_float FROM assets WHERE account = ?")
            .bind(account.as_str())
            .fetch_one(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(Some(FloatChange {
            requested: free_float,
            applied,
        }))
    }

    /// Record a dividend declaration, resolving its asset by registry account or mint.
    pub async fn apply_dividend_opened(
        &self,
        dividend: &NewDividend,
    ) -> Result<DividendApplied, sqlx::Error> {
        let mut tx = self.pool.begin().await?;

        let inserted = sqlx::query(
            r#"
            INSERT INTO dividends (pda, mint, dividend_index, total_amount, supply_circ_at_open, created_at)
            SELECT ?, mint, ?, ?, ?, ?
            FROM assets
            WHERE account = ? OR mint = ?
            LIMIT 1
            ON CONFLICT(pda) DO NOTHING
            "#,
        )
        .bind(dividend.pda.as_str())
        .bind(dividend.index)
        .bind(dividend.total_amount)
        .bind(dividend.supply_circ_at_open)
        .bind(dividend.created_at.as_i64())
        .bind(dividend.asset.as_str())
        .bind(dividend.asset.as_str())
        .execute(&mut *tx)
        .await?;

        let outcome = if inserted.rows_affected() > 0 {
            DividendApplied::Recorded
        } else if exists(&mut tx, "SELECT EXISTS(SELECT 1 FROM dividends WHERE pda = ?)", dividend.pda.as_str()).await? {
            DividendApplied::Duplicate
        } else {
            DividendApplied::UnknownAsset
        };

        tx.commit().await?;
        Ok(outcome)
    }

    /// Record a claim against the dividend with PDA `claim.dividend`.
    ///
    /// A claim is keyed by `(dividend, wallet)`. `claim.pda` is stored as
    /// given, and a redelivery under a different pda is still a duplicate.
    pub async fn apply_claim(&self, claim: &NewClaim) -> Result<ClaimApplied, sqlx::Error> {
        let mut tx = self.pool.begin().await?;

        let inserted = sqlx::query(
            r#"
            INSERT INTO claims (pda, dividend_id, wallet, amount, created_at)
            SELECT ?, id, ?, ?, ?
            FROM dividends
            WHERE pda = ?
            ON CONFLICT DO NOTHING
            "#,
        )
        .bind(&claim.pda)
        .bind(claim.wallet.as_str())
        .bind(claim.amount)
        .bind(claim.created_at.as_i64())
        .bind(claim.dividend.as_str())
        .execute(&mut *tx)
        .await?;

        let outcome = if inserted.rows_affected() > 0 {
            let row = sqlx::query(
                r#"
                SELECT d.total_amount AS dividend_total,
                       COALESCE(SUM(c.amount), 0) AS claimed_total
                FROM dividends d
                LEFT JOIN claims c ON c.dividend_id = d.id
                WHERE d.pda = ?
                GROUP BY d.id
                "#,
            )
            .bind(claim.dividend.as_str())
            .fetch_one(&mut *tx)
            .await?;

            ClaimApplied::Recorded {
                claimed_total: row.try_get("claimed_total")?,
                dividend_total: row.try_get("dividend_total")?,
            }
        } else {
            let found: i64 = sqlx::query_scalar(
                r#"
                SELECT EXISTS(
                    SELECT 1 FROM claims
                    WHERE pda = ?
                       OR (wallet = ? AND dividend_id = (SELECT id FROM dividends WHERE pda = ?))
                )
                "#,
            )
            .bind(&claim.pda)
            .bind(claim.wallet.as_str())
            .bind(claim.dividend.as_str())
            .fetch_one(&mut *tx)
            .await?;

            if found != 0 {
                ClaimApplied::Duplicate
            } else {
                ClaimApplied::UnknownDividend
            }
        };

        tx.commit().await?;
        Ok(outcome)
    }

    /// Close a dividend. The first close wins; redelivery is reported as `AlreadyClosed`.
    pub async fn apply_dividend_closed(
        &self,
        pda: &Address,
        remaining_amount: i64,
        closed_at: TimeMs,
    ) -> Result<CloseApplied, sqlx::Error> {
        let mut tx = self.pool.begin().await?;

        let updated = sqlx::query(
            r#"
            UPDATE dividends
            SET is_closed = 1, closed_at = ?, remaining_amount = ?
            WHERE pda = ? AND is_closed = 0
            "#,
        )
        .bind(closed_at.as_i64())
        .bind(remaining_amount)
        .bind(pda.as_str())
        .execute(&mut *tx)
        .await?;

        let outcome = if updated.rows_affected() > 0 {
            CloseApplied::Recorded
        } else if exists(&mut tx, "SELECT EXISTS(SELECT 1 FROM dividends WHERE pda = ?)", pda.as_str()).await? {
            CloseApplied::AlreadyClosed
        } else {
            CloseApplied::UnknownDividend
        };

        tx.commit().await?;
        Ok(outcome)
    }
}

async fn exists(
    tx: &mut sqlx::Transaction<'_, sqlx::Sqlite>,
    sql: &str,
    key: &str,
) -> Result<bool, sqlx::Error> {
    let found: i64 = sqlx::query_scalar(sql)
        .bind(key)
        .fetch_one(&mut **tx)
        .await?;
    Ok(found != 0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::repo::test_support::setup_test_db;
    use crate::domain::{Claim, Side};

    fn addr(b: u8) -> Address {
        Address::from_bytes([b; 32])
    }

    fn asset(mint: Address, account: Address, supply: i64, float: i64) -> Asset {
        Asset {
            mint: mint.clone(),
            account: Some(account),
            ticker: mint.short(),
            issuer: addr(200),
            usdc_mint: String::new(),
            decimals: 6,
            price_usdc: 1_000_000,
            total_supply: supply,
            free_float: float,
            created_at: TimeMs::new(1_000),
            updated_at: TimeMs::new(1_000),
        }
    }

    fn trade(sig: &str, side: Side, wallet: &Address, mint: &Address, amount: i64) -> Trade {
        Trade {
            sig: sig.to_string(),
            mint: mint.clone(),
            side,
            wallet: wallet.clone(),
            amount,
            price_usdc: amount * 1_000_000,
            slot: 1,
            created_at: TimeMs::new(2_000),
        }
    }

    #[tokio::test]
    async fn test_trade_is_recorded_once() {
        let (repo, _temp) = setup_test_db().await;
        let (wallet, mint) = (addr(1), addr(2));
        repo.insert_asset(&asset(mint.clone(), addr(3), 1_000, 1_000))
            .await
            .unwrap();

        let buy = trade("s1", Side::Buy, &wallet, &mint, 10);
        let first = repo.apply_trade(&buy).await.unwrap();
        assert_eq!(
            first,
            TradeApplied::Recorded {
                position_shares: 10,
                free_float: Some(FloatChange {
                    requested: 990,
                    applied: 990
                }),
            }
        );
        assert_eq!(repo.apply_trade(&buy).await.unwrap(), TradeApplied::Duplicate);

        let position = repo.reader().get_position(&wallet, &mint).await.unwrap().unwrap();
        assert_eq!(position.shares, 10);
        let stored = repo.reader().get_asset(&mint).await.unwrap().unwrap();
        assert_eq!(stored.free_float, 990);
    }

    #[tokio::test]
    async fn test_sell_to_zero_deletes_position_and_clamps_float() {
        let (repo, _temp) = setup_test_db().await;
        let (wallet, mint) = (addr(1), addr(2));
        repo.insert_asset(&asset(mint.clone(), addr(3), 100, 100))
            .await
            .unwrap();

        repo.apply_trade(&trade("b", Side::Buy, &wallet, &mint, 5))
            .await
            .unwrap();
        // Float is back at 100 after this sell; a second sell would push it past supply.
        repo.apply_trade(&trade("s", Side::Sell, &wallet, &mint, 5))
            .await
            .unwrap();
        let outcome = repo
            .apply_trade(&trade("s2", Side::Sell, &wallet, &mint, 3))
            .await
            .unwrap();

        match outcome {
            TradeApplied::Recorded {
                position_shares,
                free_float: Some(change),
            } => {
                assert_eq!(position_shares, 0);
                assert!(change.is_clamped());
                assert_eq!(change.applied, 100);
            }
            other => panic!("unexpected outcome: {:?}", other),
        }
        assert!(repo.reader().get_position(&wallet, &mint).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_trade_for_unknown_asset_still_recorded() {
        let (repo, _temp) = setup_test_db().await;
        let outcome = repo
            .apply_trade(&trade("x", Side::Buy, &addr(1), &addr(9), 4))
            .await
            .unwrap();
        assert_eq!(
            outcome,
            TradeApplied::Recorded {
                position_shares: 4,
                free_float: None
            }
        );
    }

    #[tokio::test]
    async fn test_asset_update_by_registry_account() {
        let (repo, _temp) = setup_test_db().await;
        let (mint, account) = (addr(2), addr(3));
        repo.insert_asset(&asset(mint.clone(), account.clone(), 100, 50))
            .await
            .unwrap();

        let change = repo
            .apply_asset_update(&account, 7_000_000, 150, TimeMs::new(5_000))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(change, FloatChange { requested: 150, applied: 100 });

        let stored = repo.reader().get_asset(&mint).await.unwrap().unwrap();
        assert_eq!(stored.price_usdc, 7_000_000);
        assert_eq!(stored.updated_at, TimeMs::new(5_000));

        let missing = repo
            .apply_asset_update(&addr(99), 1, 1, TimeMs::new(6_000))
            .await
            .unwrap();
        assert!(missing.is_none());
    }

    #[tokio::test]
    async fn test_dividend_lifecycle() {
        let (repo, _temp) = setup_test_db().await;
        let (mint, account, pda) = (addr(2), addr(3), addr(40));
        repo.insert_asset(&asset(mint.clone(), account.clone(), 100, 100))
            .await
            .unwrap();

        let claim = NewClaim {
            pda: "claim-1".to_string(),
            dividend: pda.clone(),
            wallet: addr(1),
            amount: 600,
            created_at: TimeMs::new(3_000),
        };
        assert_eq!(
            repo.apply_claim(&claim).await.unwrap(),
            ClaimApplied::UnknownDividend
        );

        let dividend = NewDividend {
            pda: pda.clone(),
            asset: account.clone(),
            index: 40,
            total_amount: 1_000,
            supply_circ_at_open: 100,
            created_at: TimeMs::new(2_500),
        };
        assert_eq!(
            repo.apply_dividend_opened(&dividend).await.unwrap(),
            DividendApplied::Recorded
        );
        assert_eq!(
            repo.apply_dividend_opened(&dividend).await.unwrap(),
            DividendApplied::Duplicate
        );

        assert_eq!(
            repo.apply_claim(&claim).await.unwrap(),
            ClaimApplied::Recorded {
                claimed_total: 600,
                dividend_total: 1_000
            }
        );
        assert_eq!(repo.apply_claim(&claim).await.unwrap(), ClaimApplied::Duplicate);

        assert_eq!(
            repo.apply_dividend_closed(&pda, 400, TimeMs::new(9_000))
                .await
                .unwrap(),
            CloseApplied::Recorded
        );
        assert_eq!(
            repo.apply_dividend_closed(&pda, 400, TimeMs::new(9_999))
                .await
                .unwrap(),
            CloseApplied::AlreadyClosed
        );

        let stored = repo.reader().get_dividend(&pda).await.unwrap().unwrap();
        assert!(stored.is_closed);
        assert_eq!(stored.closed_at, Some(TimeMs::new(9_000)));
        assert_eq!(stored.remaining_amount, Some(400));
        assert_eq!(stored.mint, mint);
    }

    #[tokio::test]
    async fn test_claim_redelivered_under_another_key_is_duplicate() {
        let (repo, _temp) = setup_test_db().await;
        let (mint, account, pda) = (addr(2), addr(3), addr(40));
        repo.insert_asset(&asset(mint, account.clone(), 100, 100))
            .await
            .unwrap();
        repo.apply_dividend_opened(&NewDividend {
            pda: pda.clone(),
            asset: account,
            index: 40,
            total_amount: 1_000,
            supply_circ_at_open: 100,
            created_at: TimeMs::new(2_500),
        })
        .await
        .unwrap();

        let resolved = NewClaim {
            pda: addr(77).to_string(),
            dividend: pda.clone(),
            wallet: addr(1),
            amount: 600,
            created_at: TimeMs::new(3_000),
        };
        let unresolved = NewClaim {
            pda: Claim::fallback_key(&pda, &addr(1)),
            ..resolved.clone()
        };

        assert!(matches!(
            repo.apply_claim(&resolved).await.unwrap(),
            ClaimApplied::Recorded { claimed_total: 600, .. }
        ));
        assert_eq!(repo.apply_claim(&unresolved).await.unwrap(), ClaimApplied::Duplicate);

        let claims = repo.reader().list_claims(Some(&addr(1)), None).await.unwrap();
        assert_eq!(claims.len(), 1);
        assert_eq!(claims[0].pda, addr(77).to_string());

        // Another holder of the same dividend is a separate claim.
        let other = NewClaim {
            pda: Claim::fallback_key(&pda, &addr(5)),
            wallet: addr(5),
            amount: 100,
            ..resolved
        };
        assert_eq!(
            repo.apply_claim(&other).await.unwrap(),
            ClaimApplied::Recorded {
                claimed_total: 700,
                dividend_total: 1_000
            }
        );
    }

    #[tokio::test]
    async fn test_asset_update_is_visible_on_return() {
        let (repo, _temp) = setup_test_db().await;
        let (mint, account) = (addr(2), addr(3));
        repo.insert_asset(&asset(mint.clone(), account.clone(), 100, 50))
            .await
            .unwrap();
        let reader = repo.reader();

        for price in 1..=50 {
            repo.apply_asset_update(&account, price, 40, TimeMs::new(5_000 + price))
                .await
                .unwrap()
                .unwrap();
            let stored = reader.get_asset(&mint).await.unwrap().unwrap();
            assert_eq!(stored.price_usdc, price);
        }
    }

    #[tokio::test]
    async fn test_dividend_for_unknown_asset_is_not_recorded() {
        let (repo, _temp) = setup_test_db().await;
        let dividend = NewDividend {
            pda: addr(40),
            asset: addr(41),
            index: 40,
            total_amount: 1,
            supply_circ_at_open: 1,
            created_at: TimeMs::new(1),
        };
        assert_eq!(
            repo.apply_dividend_opened(&dividend).await.unwrap(),
            DividendApplied::UnknownAsset
        );
        assert_eq!(
            repo.apply_dividend_closed(&addr(40), 0, TimeMs::new(2))
                .await
                .unwrap(),
            CloseApplied::UnknownDividend
        );
    }
}
