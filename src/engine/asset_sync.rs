//! Reconciles the `assets` table with the registry program's accounts.
//!
//! A sync is the self-healing path for missed or reordered stream events. It is
//! safe to run alongside live processing because the upsert only touches
//! chain-owned columns and is a no-op on unchanged input.

use crate::chain::{ChainClient, ChainError};
use crate::db::{Repository, UpsertOutcome};
use crate::decoder::EventDecoder;
use crate::domain::{Address, TimeMs};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{watch, Mutex};
use tracing::{debug, error, info, warn};

#[derive(Debug, Error)]
pub enum SyncError {
    #[error("failed to fetch registry accounts: {0}")]
    Fetch(#[from] ChainError),
    #[error(transparent)]
    Database(#[from] sqlx::Error),
    #[error("unknown asset {0}")]
    UnknownAsset(Address),
    #[error("invalid price {0}")]
    InvalidPrice(i64),
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncReport {
    pub accounts_seen: usize,
    pub inserted: usize,
    pub updated: usize,
    pub unchanged: usize,
    /// Registry accounts of another type.
    pub skipped: usize,
    pub failed: usize,
}

pub struct AssetSyncService {
    chain: Arc<dyn ChainClient>,
    repo: Arc<Repository>,
    decoder: EventDecoder,
    registry_program: Address,
    running: Mutex<()>,
}

impl AssetSyncService {
    pub fn new(chain: Arc<dyn ChainClient>, repo: Arc<Repository>, registry_program: Address) -> Self {
        Self {
            chain,
            repo,
            decoder: EventDecoder::new(),
            registry_program,
            running: Mutex::new(()),
        }
    }

    /// Fetch every registry account and upsert the ones that decode as assets.
    ///
    /// Concurrent calls are serialized. A failure on one account is logged and
    /// counted; only a failed account listing aborts the sync.
    pub async fn sync_assets(&self) -> Result<SyncReport, SyncError> {
        let _guard = self.running.lock().await;

        let accounts = self
            .chain
            .get_program_accounts(&self.registry_program)
            .await?;
        let now = TimeMs::now();

        let mut report = SyncReport {
            accounts_seen: accounts.len(),
            ..SyncReport::default()
        };

        for account in &accounts {
            let decoded = match self
                .decoder
                .decode_asset_account(&account.address, &account.data)
            {
                Ok(Some(decoded)) => decoded,
                Ok(None) => {
                    report.skipped += 1;
                    continue;
                }
                Err(e) => {
                    warn!(account = %account.address, error = %e, "Failed to decode registry account");
                    report.failed += 1;
                    continue;
                }
            };

            match self.repo.upsert_asset_account(&decoded, now).await {
                Ok(UpsertOutcome::Inserted) => {
                    debug!(mint = %decoded.mint, "Asset inserted by sync");
                    report.inserted += 1;
                }
                Ok(UpsertOutcome::Updated) => {
                    debug!(mint = %decoded.mint, "Asset updated by sync");
                    report.updated += 1;
                }
                Ok(UpsertOutcome::Unchanged) => report.unchanged += 1,
                Err(e) => {
                    warn!(mint = %decoded.mint, error = %e, "Failed to upsert asset");
                    report.failed += 1;
                }
            }
        }

        info!(
            seen = report.accounts_seen,
            inserted = report.inserted,
            updated = report.updated,
            unchanged = report.unchanged,
            skipped = report.skipped,
            failed = report.failed,
            "Asset sync complete"
        );
        Ok(report)
    }

    /// Set an externally sourced reference price (micro-units).
    pub async fn update_asset_price(&self, mint: &Address, price_usdc: i64) -> Result<(), SyncError> {
        if price_usdc < 0 {
            return Err(SyncError::InvalidPrice(price_usdc));
        }
        if !self
            .repo
            .update_asset_price(mint, price_usdc, TimeMs::now())
            .await?
        {
            return Err(SyncError::UnknownAsset(mint.clone()));
        }
        info!(mint = %mint, price_usdc, "Asset price updated");
        Ok(())
    }
}

/// Run [`AssetSyncService::sync_assets`] every `interval` until `shutdown` flips.
pub async fn run_periodic_sync(
    service: Arc<AssetSyncService>,
    interval: Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    // The first tick fires immediately; startup already ran a sync.
    ticker.tick().await;

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                if let Err(e) = service.sync_assets().await {
                    error!(error = %e, "Periodic asset sync failed");
                }
            }
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    info!("Asset sync loop stopping");
                    return;
                }
            }
        }
    }
}
