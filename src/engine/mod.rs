//! Ledger engines: event application, asset reconciliation and P&L derivation.
//!
//! - `processor` is the only path from decoded events to ledger writes
//! - `asset_sync` reconciles assets with the registry program's accounts
//! - `cost_basis` and `pnl` derive analytics from the ledger, read-only

pub mod asset_sync;
pub mod cost_basis;
pub mod pnl;
pub mod processor;

pub use asset_sync::{run_periodic_sync, AssetSyncService, SyncError, SyncReport};
pub use cost_basis::CostBasis;
pub use pnl::{AssetPerformance, PnlPoint, PnlService, PortfolioPnl, PositionPnl, PricePoint};
pub use processor::{EventContext, EventProcessor, ProcessError, ProcessOutcome, SkipReason};
