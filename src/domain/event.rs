//! Strongly-typed program events emitted by the registry and market programs.

use crate::domain::Address;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AssetCreated {
    /// Registry account (asset PDA).
    pub asset: Address,
    pub issuer: Address,
    pub asset_mint: Address,
    pub price_usdc: i64,
    pub total_supply: i64,
    pub free_float: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AssetUpdated {
    pub asset: Address,
    pub price_usdc: i64,
    pub free_float: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SharesBought {
    pub buyer: Address,
    pub mint: Address,
    pub amount: i64,
    pub total_paid: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SharesSold {
    pub seller: Address,
    pub mint: Address,
    pub amount: i64,
    pub total_received: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DividendOpened {
    pub dividend: Address,
    /// Registry account of the asset (the program emits the PDA, not the mint).
    pub asset: Address,
    pub total_amount: i64,
    pub supply_circ_at_open: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DividendClaimed {
    pub dividend: Address,
    pub holder: Address,
    pub amount: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DividendClosed {
    pub dividend: Address,
    pub remaining_amount: i64,
}

/// Closed set of events the indexer understands.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "name", content = "data")]
pub enum ProgramEvent {
    AssetCreated(AssetCreated),
    AssetUpdated(AssetUpdated),
    SharesBought(SharesBought),
    SharesSold(SharesSold),
    DividendOpened(DividendOpened),
    DividendClaimed(DividendClaimed),
    DividendClosed(DividendClosed),
}

impl ProgramEvent {
    /// Anchor event name; also the discriminator preimage suffix.
    pub fn name(&self) -> &'static str {
        match self {
            ProgramEvent::AssetCreated(_) => "AssetCreated",
            ProgramEvent::AssetUpdated(_) => "AssetUpdated",
            ProgramEvent::SharesBought(_) => "SharesBought",
            ProgramEvent::SharesSold(_) => "SharesSold",
            ProgramEvent::DividendOpened(_) => "DividendOpened",
            ProgramEvent::DividendClaimed(_) => "DividendClaimed",
            ProgramEvent::DividendClosed(_) => "DividendClosed",
        }
    }

    /// Whether this event appends to the trade ledger.
    pub fn is_trade(&self) -> bool {
        matches!(
            self,
            ProgramEvent::SharesBought(_) | ProgramEvent::SharesSold(_)
        )
    }
}
