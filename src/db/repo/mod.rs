//! Write side of the ledger.
//!
//! Methods are organized across submodules by domain:
//! - `ledger.rs` - transactional application of program events
//! - `assets.rs` - registry snapshot upserts and external price updates

mod assets;
mod ledger;

pub use assets::UpsertOutcome;
pub use ledger::{
    ClaimApplied, CloseApplied, DividendApplied, FloatChange, NewClaim, NewDividend, TradeApplied,
};

use crate::db::reader::LedgerReader;
use crate::domain::TimeMs;
use serde::Serialize;
use sqlx::sqlite::SqlitePool;

/// Event that could not be persisted after retries.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewDeadLetter {
    pub signature: String,
    pub slot: i64,
    pub event_name: String,
    /// JSON rendering of the event.
    pub payload: String,
    pub error: String,
    pub created_at: TimeMs,
}

/// Stored dead letter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeadLetter {
    pub id: i64,
    pub signature: String,
    pub slot: i64,
    pub event_name: String,
    pub payload: String,
    pub error: String,
    pub created_at: TimeMs,
}

/// Repository for ledger mutations. Only the event processor and the asset
/// sync service hold one.
#[derive(Debug)]
pub struct Repository {
    pool: SqlitePool,
}

impl Repository {
    pub fn new(pool: SqlitePool) -> Self {
        Repository { pool }
    }

    /// Read-only view over the same pool.
    pub fn reader(&self) -> LedgerReader {
        LedgerReader::new(self.pool.clone())
    }

    // =========================================================================
    // Dead letters
    // =========================================================================

    /// Record an event the listener gave up on. Returns the row id.
    pub async fn insert_dead_letter(&self, letter: &NewDeadLetter) -> Result<i64, sqlx::Error> {
        let result = sqlx::query(
            r#"
            INSERT INTO dead_letters (signature, slot, event_name, payload, error, created_at)
            VALUES (?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&letter.signature)
        .bind(letter.slot)
        .bind(&letter.event_name)
        .bind(&letter.payload)
        .bind(&letter.error)
        .bind(letter.created_at.as_i64())
        .execute(&self.pool)
        .await?;

        Ok(result.last_insert_rowid())
    }
}
