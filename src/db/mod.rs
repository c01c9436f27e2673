//! Database module for SQLite operations.
//!
//! This module provides:
//! - Database initialization and schema application
//! - SQLite pragma configuration
//! - `Repository`, the write side used by event processing and asset sync
//! - `LedgerReader`, the read-only side used by P&L and the query surface

pub mod migrations;
pub mod reader;
pub mod repo;
mod rows;

pub use migrations::init_db;
pub use reader::{AssetFilter, AssetSort, LedgerReader, LedgerStats, TradeFilter};
pub use repo::{
    ClaimApplied, CloseApplied, DeadLetter, DividendApplied, FloatChange, NewClaim, NewDeadLetter,
    NewDividend, Repository, TradeApplied, UpsertOutcome,
};
