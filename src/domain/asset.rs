//! Tokenized real-world asset as indexed from the registry program.

use crate::domain::{Address, TimeMs};
use serde::{Deserialize, Serialize};

/// An indexed asset row. All amounts are integer micro-units.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Asset {
    /// On-chain mint of the share token (natural key).
    pub mint: Address,
    /// Registry account (asset PDA) that holds this asset's state, when known.
    pub account: Option<Address>,
    pub ticker: String,
    pub issuer: Address,
    /// Reference currency mint; empty when not yet learned from the chain.
    pub usdc_mint: String,
    pub decimals: u8,
    pub price_usdc: i64,
    pub total_supply: i64,
    pub free_float: i64,
    pub created_at: TimeMs,
    pub updated_at: TimeMs,
}

/// Decoded registry account: the chain-owned subset of [`Asset`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssetAccount {
    pub account: Address,
    pub issuer: Address,
    pub mint: Address,
    pub usdc_mint: Address,
    pub decimals: u8,
    pub price_usdc: i64,
    pub total_supply: i64,
    pub free_float: i64,
}

impl AssetAccount {
    /// Chain snapshots can momentarily report a float above supply; never store that.
    pub fn clamped_free_float(&self) -> i64 {
        self.free_float.clamp(0, self.total_supply.max(0))
    }
}
