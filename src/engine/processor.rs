//! Applies decoded program events to the ledger.
//!
//! Each event is one unit of work: its side effects land in a single SQLite
//! transaction, and re-delivery of the same event is a no-op keyed on the
//! chain's own identities (signature, PDA).

use crate::db::{
    ClaimApplied, CloseApplied, DividendApplied, NewClaim, NewDividend, Repository, TradeApplied,
};
use crate::decoder::EventRoles;
use crate::domain::{
    Address, Asset, AssetCreated, AssetUpdated, Claim, Dividend, DividendClaimed, DividendClosed,
    DividendOpened, ProgramEvent, Side, Trade, TimeMs,
};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, error, info, warn};

/// Default decimals of registry share mints.
const SHARE_DECIMALS: u8 = 6;

/// Where an event came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventContext {
    pub signature: String,
    pub slot: u64,
    /// Block time of the transaction, when the chain reported one.
    pub block_time: Option<TimeMs>,
    pub roles: EventRoles,
    /// Position of this event among the trade events of its transaction.
    pub trade_ordinal: usize,
}

impl EventContext {
    pub fn new(signature: impl Into<String>, slot: u64) -> Self {
        Self {
            signature: signature.into(),
            slot,
            block_time: None,
            roles: EventRoles::default(),
            trade_ordinal: 0,
        }
    }

    pub fn with_block_time(mut self, block_time: Option<TimeMs>) -> Self {
        self.block_time = block_time;
        self
    }

    pub fn with_roles(mut self, roles: EventRoles) -> Self {
        self.roles = roles;
        self
    }

    pub fn with_trade_ordinal(mut self, ordinal: usize) -> Self {
        self.trade_ordinal = ordinal;
        self
    }

    /// Block time, or wall-clock time when the block time is unknown.
    pub fn timestamp(&self) -> TimeMs {
        self.block_time.unwrap_or_else(TimeMs::now)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SkipReason {
    UnknownAsset(Address),
    UnknownDividend(Address),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProcessOutcome {
    Applied,
    /// Already applied by an earlier delivery.
    Duplicate,
    /// Referenced entity not indexed yet.
    Skipped(SkipReason),
}

#[derive(Debug, Error)]
pub enum ProcessError {
    #[error(transparent)]
    Database(#[from] sqlx::Error),
    #[error("slot {0} does not fit in a signed 64-bit column")]
    SlotOverflow(u64),
}

impl ProcessError {
    /// Whether retrying the same event can succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, ProcessError::Database(_))
    }
}

pub struct EventProcessor {
    repo: Arc<Repository>,
}

impl EventProcessor {
    pub fn new(repo: Arc<Repository>) -> Self {
        Self { repo }
    }

    pub async fn process(
        &self,
        event: &ProgramEvent,
        ctx: &EventContext,
    ) -> Result<ProcessOutcome, ProcessError> {
        debug!(
            signature = %ctx.signature,
            slot = ctx.slot,
            event = event.name(),
            "Processing event"
        );

        match event {
            ProgramEvent::SharesBought(e) => {
                self.apply_trade(Side::Buy, &e.buyer, &e.mint, e.amount, e.total_paid, ctx)
                    .await
            }
            ProgramEvent::SharesSold(e) => {
                self.apply_trade(Side::Sell, &e.seller, &e.mint, e.amount, e.total_received, ctx)
                    .await
            }
            ProgramEvent::AssetCreated(e) => self.asset_created(e, ctx).await,
            ProgramEvent::AssetUpdated(e) => self.asset_updated(e, ctx).await,
            ProgramEvent::DividendOpened(e) => self.dividend_opened(e, ctx).await,
            ProgramEvent::DividendClaimed(e) => self.dividend_claimed(e, ctx).await,
            ProgramEvent::DividendClosed(e) => self.dividend_closed(e, ctx).await,
        }
    }

    async fn apply_trade(
        &self,
        side: Side,
        wallet: &Address,
        mint: &Address,
        amount: i64,
        price_usdc: i64,
        ctx: &EventContext,
    ) -> Result<ProcessOutcome, ProcessError> {
        let trade = Trade {
            sig: Trade::key_for(&ctx.signature, ctx.trade_ordinal),
            mint: mint.clone(),
            side,
            wallet: wallet.clone(),
            amount,
            price_usdc,
            slot: slot_column(ctx.slot)?,
            created_at: ctx.timestamp(),
        };

        match self.repo.apply_trade(&trade).await? {
            TradeApplied::Duplicate => {
                debug!(sig = %trade.sig, "Trade already recorded");
                Ok(ProcessOutcome::Duplicate)
            }
            TradeApplied::Recorded {
                position_shares,
                free_float,
            } => {
                match free_float {
                    None => warn!(
                        sig = %trade.sig,
                        mint = %mint,
                        "Trade on unindexed asset, free float not adjusted"
                    ),
                    Some(change) if change.is_clamped() => warn!(
                        sig = %trade.sig,
                        mint = %mint,
                        requested = change.requested,
                        applied = change.applied,
                        "Free float clamped"
                    ),
                    Some(_) => {}
                }
                info!(
                    sig = %trade.sig,
                    side = %side,
                    wallet = %wallet,
                    mint = %mint,
                    amount,
                    position_shares,
                    "Trade recorded"
                );
                Ok(ProcessOutcome::Applied)
            }
        }
    }

    async fn asset_created(
        &self,
        e: &AssetCreated,
        ctx: &EventContext,
    ) -> Result<ProcessOutcome, ProcessError> {
        let at = ctx.timestamp();
        let asset = Asset {
            mint: e.asset_mint.clone(),
            account: Some(e.asset.clone()),
            ticker: e.asset_mint.short(),
            issuer: e.issuer.clone(),
            usdc_mint: ctx
                .roles
                .usdc_mint
                .as_ref()
                .map(|m| m.to_string())
                .unwrap_or_default(),
            decimals: SHARE_DECIMALS,
            price_usdc: e.price_usdc,
            total_supply: e.total_supply,
            free_float: e.free_float,
            created_at: at,
            updated_at: at,
        };

        if self.repo.insert_asset(&asset).await? {
            info!(mint = %asset.mint, ticker = %asset.ticker, "Asset indexed");
            Ok(ProcessOutcome::Applied)
        } else {
            Ok(ProcessOutcome::Duplicate)
        }
    }

    async fn asset_updated(
        &self,
        e: &AssetUpdated,
        ctx: &EventContext,
    ) -> Result<ProcessOutcome, ProcessError> {
        let change = self
            .repo
            .apply_asset_update(&e.asset, e.price_usdc, e.free_float, ctx.timestamp())
            .await?;

        match change {
            None => {
                warn!(account = %e.asset, "AssetUpdated for unindexed asset, skipping");
                Ok(ProcessOutcome::Skipped(SkipReason::UnknownAsset(
                    e.asset.clone(),
                )))
            }
            Some(change) => {
                if change.is_clamped() {
                    warn!(
                        account = %e.asset,
                        requested = change.requested,
                        applied = change.applied,
                        "Free float clamped"
                    );
                }
                Ok(ProcessOutcome::Applied)
            }
        }
    }

    async fn dividend_opened(
        &self,
        e: &DividendOpened,
        ctx: &EventContext,
    ) -> Result<ProcessOutcome, ProcessError> {
        let dividend = NewDividend {
            pda: e.dividend.clone(),
            asset: e.asset.clone(),
            index: Dividend::index_from_pda(&e.dividend),
            total_amount: e.total_amount,
            supply_circ_at_open: e.supply_circ_at_open,
            created_at: ctx.timestamp(),
        };

        match self.repo.apply_dividend_opened(&dividend).await? {
            DividendApplied::Recorded => {
                info!(
                    dividend = %e.dividend,
                    asset = %e.asset,
                    total_amount = e.total_amount,
                    "Dividend opened"
                );
                Ok(ProcessOutcome::Applied)
            }
            DividendApplied::Duplicate => Ok(ProcessOutcome::Duplicate),
            DividendApplied::UnknownAsset => {
                warn!(
                    dividend = %e.dividend,
                    asset = %e.asset,
                    "Dividend for unindexed asset, skipping"
                );
                Ok(ProcessOutcome::Skipped(SkipReason::UnknownAsset(
                    e.asset.clone(),
                )))
            }
        }
    }

    async fn dividend_claimed(
        &self,
        e: &DividendClaimed,
        ctx: &EventContext,
    ) -> Result<ProcessOutcome, ProcessError> {
        let claim = NewClaim {
            pda: ctx
                .roles
                .claim
                .as_ref()
                .map(|pda| pda.to_string())
                .unwrap_or_else(|| Claim::fallback_key(&e.dividend, &e.holder)),
            dividend: e.dividend.clone(),
            wallet: e.holder.clone(),
            amount: e.amount,
            created_at: ctx.timestamp(),
        };

        match self.repo.apply_claim(&claim).await? {
            ClaimApplied::Recorded {
                claimed_total,
                dividend_total,
            } => {
                if claimed_total > dividend_total {
                    warn!(
                        dividend = %e.dividend,
                        claimed_total,
                        dividend_total,
                        "Claims exceed dividend total"
                    );
                }
                info!(dividend = %e.dividend, holder = %e.holder, amount = e.amount, "Claim recorded");
                Ok(ProcessOutcome::Applied)
            }
            ClaimApplied::Duplicate => Ok(ProcessOutcome::Duplicate),
            ClaimApplied::UnknownDividend => {
                error!(
                    dividend = %e.dividend,
                    holder = %e.holder,
                    signature = %ctx.signature,
                    "Claim references unknown dividend, skipping"
                );
                Ok(ProcessOutcome::Skipped(SkipReason::UnknownDividend(
                    e.dividend.clone(),
                )))
            }
        }
    }

    async fn dividend_closed(
        &self,
        e: &DividendClosed,
        ctx: &EventContext,
    ) -> Result<ProcessOutcome, ProcessError> {
        match self
            .repo
            .apply_dividend_closed(&e.dividend, e.remaining_amount, ctx.timestamp())
            .await?
        {
            CloseApplied::Recorded => {
                info!(dividend = %e.dividend, remaining = e.remaining_amount, "Dividend closed");
                Ok(ProcessOutcome::Applied)
            }
            CloseApplied::AlreadyClosed => Ok(ProcessOutcome::Duplicate),
            CloseApplied::UnknownDividend => {
                warn!(dividend = %e.dividend, "Close for unknown dividend, skipping");
                Ok(ProcessOutcome::Skipped(SkipReason::UnknownDividend(
                    e.dividend.clone(),
                )))
            }
        }
    }
}

fn slot_column(slot: u64) -> Result<i64, ProcessError> {
    i64::try_from(slot).map_err(|_| ProcessError::SlotOverflow(slot))
}
