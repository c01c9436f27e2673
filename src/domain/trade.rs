//! Trade ledger rows and open positions.

use crate::domain::{Address, Side, TimeMs};
use serde::{Deserialize, Serialize};

/// One immutable ledger entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Trade {
    /// Natural key; see [`Trade::key_for`].
    pub sig: String,
    pub mint: Address,
    pub side: Side,
    pub wallet: Address,
    /// Share quantity.
    pub amount: i64,
    /// Total consideration in micro-units (not per share).
    pub price_usdc: i64,
    pub slot: i64,
    pub created_at: TimeMs,
}

impl Trade {
    /// Ledger key of the `ordinal`-th trade event inside one transaction.
    ///
    /// The first trade keeps the bare signature so single-trade transactions are
    /// keyed exactly by their chain signature.
    pub fn key_for(signature: &str, ordinal: usize) -> String {
        if ordinal == 0 {
            signature.to_string()
        } else {
            format!("{}#{}", signature, ordinal)
        }
    }

    /// Signed share delta this trade applies to its position.
    pub fn signed_amount(&self) -> i64 {
        self.side.sign() * self.amount
    }
}

/// Materialized running balance for one (wallet, mint) pair.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Position {
    pub wallet: Address,
    pub mint: Address,
    pub shares: i64,
    pub updated_at: TimeMs,
}
