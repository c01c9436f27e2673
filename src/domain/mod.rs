//! Domain types for the RWA indexer.
//!
//! This module provides:
//! - Lossless numeric handling via the Decimal wrapper and micro-unit conversion
//! - Domain primitives: TimeMs, Address, Side
//! - Ledger entities: Asset, Trade, Position, Dividend, Claim
//! - The closed ProgramEvent sum type consumed by the event processor

pub mod asset;
pub mod decimal;
pub mod dividend;
pub mod event;
pub mod primitives;
pub mod trade;

pub use asset::{Asset, AssetAccount};
pub use decimal::{Decimal, MICRO_SCALE};
pub use dividend::{Claim, Dividend};
pub use event::{
    AssetCreated, AssetUpdated, DividendClaimed, DividendClosed, DividendOpened, ProgramEvent,
    SharesBought, SharesSold,
};
pub use primitives::{Address, AddressParseError, Side, TimeMs};
pub use trade::{Position, Trade};
