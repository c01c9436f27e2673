//! Decoding of program log lines and registry accounts into domain values.
//!
//! Events are emitted as `Program data: <base64>` log lines whose payload is an
//! 8-byte discriminator (`sha256("event:<Name>")[..8]`) followed by the borsh
//! encoded fields. Registry accounts use the `account:<Name>` namespace.

pub mod layout;

pub use layout::{AccountLayout, AccountRole, EventRoles, LayoutVersion};

use crate::domain::{
    Address, AssetAccount, AssetCreated, AssetUpdated, DividendClaimed, DividendClosed,
    DividendOpened, ProgramEvent, SharesBought, SharesSold,
};
use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use borsh::{BorshDeserialize, BorshSerialize};
use sha2::{Digest, Sha256};
use thiserror::Error;
use tracing::{debug, warn};

/// Marker that prefixes every emitted event in the transaction logs.
pub const PROGRAM_DATA_MARKER: &str = "Program data: ";

const EVENT_NAMES: [&str; 7] = [
    "AssetCreated",
    "AssetUpdated",
    "SharesBought",
    "SharesSold",
    "DividendOpened",
    "DividendClaimed",
    "DividendClosed",
];

#[derive(Debug, Error, PartialEq, Eq)]
pub enum DecodeError {
    #[error("invalid base64 payload: {0}")]
    Base64(String),
    #[error("payload too short: {0} bytes")]
    TooShort(usize),
    #[error("unknown discriminator {0}")]
    UnknownDiscriminator(String),
    #[error("malformed {kind} payload: {message}")]
    Payload { kind: &'static str, message: String },
    #[error("{0} exceeds i64 range")]
    Overflow(&'static str),
    #[error("invalid address: {0}")]
    Address(String),
}

/// Anchor discriminator for `namespace:name`.
pub fn discriminator(namespace: &str, name: &str) -> [u8; 8] {
    let mut hasher = Sha256::new();
    hasher.update(namespace.as_bytes());
    hasher.update(b":");
    hasher.update(name.as_bytes());
    let hash = hasher.finalize();
    let mut out = [0u8; 8];
    out.copy_from_slice(&hash[..8]);
    out
}

#[derive(BorshSerialize, BorshDeserialize)]
struct RawAssetCreated {
    asset: [u8; 32],
    issuer: [u8; 32],
    asset_mint: [u8; 32],
    price_usdc: u64,
    total_supply: u64,
    free_float: u64,
}

#[derive(BorshSerialize, BorshDeserialize)]
struct RawAssetUpdated {
    asset: [u8; 32],
    price_usdc: u64,
    free_float: u64,
}

#[derive(BorshSerialize, BorshDeserialize)]
struct RawSharesTraded {
    trader: [u8; 32],
    mint: [u8; 32],
    amount: u64,
    total: u64,
}

#[derive(BorshSerialize, BorshDeserialize)]
struct RawDividendOpened {
    dividend: [u8; 32],
    asset: [u8; 32],
    total_amount: u64,
    supply_circ_at_open: u64,
}

#[derive(BorshSerialize, BorshDeserialize)]
struct RawDividendClaimed {
    dividend: [u8; 32],
    holder: [u8; 32],
    amount: u64,
}

#[derive(BorshSerialize, BorshDeserialize)]
struct RawDividendClosed {
    dividend: [u8; 32],
    remaining_amount: u64,
}

#[derive(BorshSerialize, BorshDeserialize)]
struct RawAssetAccount {
    issuer: [u8; 32],
    asset_mint: [u8; 32],
    usdc_mint: [u8; 32],
    decimals: u8,
    price_usdc: u64,
    total_supply: u64,
    free_float: u64,
    bump_asset: u8,
    bump_mint_auth: u8,
    bump_vault_usdc: u8,
}

fn to_i64(field: &'static str, value: u64) -> Result<i64, DecodeError> {
    i64::try_from(value).map_err(|_| DecodeError::Overflow(field))
}

fn to_u64(field: &'static str, value: i64) -> Result<u64, DecodeError> {
    u64::try_from(value).map_err(|_| DecodeError::Overflow(field))
}

fn key(addr: &Address) -> Result<[u8; 32], DecodeError> {
    addr.to_bytes()
        .map_err(|_| DecodeError::Address(addr.to_string()))
}

fn parse<T: BorshDeserialize>(kind: &'static str, body: &[u8]) -> Result<T, DecodeError> {
    T::try_from_slice(body).map_err(|e| DecodeError::Payload {
        kind,
        message: e.to_string(),
    })
}

fn encode<T: BorshSerialize>(kind: &'static str, value: &T) -> Result<Vec<u8>, DecodeError> {
    borsh::to_vec(value).map_err(|e| DecodeError::Payload {
        kind,
        message: e.to_string(),
    })
}

/// Stateless decoder with precomputed discriminators.
#[derive(Debug, Clone)]
pub struct EventDecoder {
    events: Vec<([u8; 8], &'static str)>,
    asset_account: [u8; 8],
}

impl EventDecoder {
    pub fn new() -> Self {
        Self {
            events: EVENT_NAMES
                .iter()
                .map(|name| (discriminator("event", name), *name))
                .collect(),
            asset_account: discriminator("account", "Asset"),
        }
    }

    /// Extract every recognised event from one transaction's logs, in log order.
    ///
    /// Lines that are not event payloads, or that fail to decode, are skipped.
    pub fn decode_logs(&self, logs: &[String]) -> Vec<ProgramEvent> {
        let mut events = Vec::new();
        for line in logs {
            match self.decode_line(line) {
                Ok(Some(event)) => events.push(event),
                Ok(None) => {}
                Err(DecodeError::UnknownDiscriminator(d)) => {
                    debug!(discriminator = %d, "Skipping event from another program");
                }
                Err(e) => {
                    warn!(error = %e, "Skipping undecodable program data");
                }
            }
        }
        events
    }

    /// Decode a single log line; `Ok(None)` when the line carries no event data.
    pub fn decode_line(&self, line: &str) -> Result<Option<ProgramEvent>, DecodeError> {
        let Some(pos) = line.find(PROGRAM_DATA_MARKER) else {
            return Ok(None);
        };
        let encoded = line[pos + PROGRAM_DATA_MARKER.len()..].trim();
        let bytes = BASE64
            .decode(encoded)
            .map_err(|e| DecodeError::Base64(e.to_string()))?;
        self.decode_payload(&bytes).map(Some)
    }

    /// Decode a discriminator-prefixed event payload.
    pub fn decode_payload(&self, bytes: &[u8]) -> Result<ProgramEvent, DecodeError> {
        if bytes.len() < 8 {
            return Err(DecodeError::TooShort(bytes.len()));
        }
        let (disc, body) = bytes.split_at(8);
        let name = self
            .events
            .iter()
            .find(|(d, _)| d.as_slice() == disc)
            .map(|(_, n)| *n)
            .ok_or_else(|| DecodeError::UnknownDiscriminator(hex::encode(disc)))?;

        let event = match name {
            "AssetCreated" => {
                let raw: RawAssetCreated = parse(name, body)?;
                ProgramEvent::AssetCreated(AssetCreated {
                    asset: Address::from_bytes(raw.asset),
                    issuer: Address::from_bytes(raw.issuer),
                    asset_mint: Address::from_bytes(raw.asset_mint),
                    price_usdc: to_i64("price_usdc", raw.price_usdc)?,
                    total_supply: to_i64("total_supply", raw.total_supply)?,
                    free_float: to_i64("free_float", raw.free_float)?,
                })
            }
            "AssetUpdated" => {
                let raw: RawAssetUpdated = parse(name, body)?;
                ProgramEvent::AssetUpdated(AssetUpdated {
                    asset: Address::from_bytes(raw.asset),
                    price_usdc: to_i64("price_usdc", raw.price_usdc)?,
                    free_float: to_i64("free_float", raw.free_float)?,
                })
            }
            "SharesBought" => {
                let raw: RawSharesTraded = parse(name, body)?;
                ProgramEvent::SharesBought(SharesBought {
                    buyer: Address::from_bytes(raw.trader),
                    mint: Address::from_bytes(raw.mint),
                    amount: to_i64("amount", raw.amount)?,
                    total_paid: to_i64("total_paid", raw.total)?,
                })
            }
            "SharesSold" => {
                let raw: RawSharesTraded = parse(name, body)?;
                ProgramEvent::SharesSold(SharesSold {
                    seller: Address::from_bytes(raw.trader),
                    mint: Address::from_bytes(raw.mint),
                    amount: to_i64("amount", raw.amount)?,
                    total_received: to_i64("total_received", raw.total)?,
                })
            }
            "DividendOpened" => {
                let raw: RawDividendOpened = parse(name, body)?;
                ProgramEvent::DividendOpened(DividendOpened {
                    dividend: Address::from_bytes(raw.dividend),
                    asset: Address::from_bytes(raw.asset),
                    total_amount: to_i64("total_amount", raw.total_amount)?,
                    supply_circ_at_open: to_i64("supply_circ_at_open", raw.supply_circ_at_open)?,
                })
            }
            "DividendClaimed" => {
                let raw: RawDividendClaimed = parse(name, body)?;
                ProgramEvent::DividendClaimed(DividendClaimed {
                    dividend: Address::from_bytes(raw.dividend),
                    holder: Address::from_bytes(raw.holder),
                    amount: to_i64("amount", raw.amount)?,
                })
            }
            "DividendClosed" => {
                let raw: RawDividendClosed = parse(name, body)?;
                ProgramEvent::DividendClosed(DividendClosed {
                    dividend: Address::from_bytes(raw.dividend),
                    remaining_amount: to_i64("remaining_amount", raw.remaining_amount)?,
                })
            }
            other => return Err(DecodeError::UnknownDiscriminator(other.to_string())),
        };

        Ok(event)
    }

    /// Decode a registry-owned account.
    ///
    /// Returns `Ok(None)` for accounts of other types owned by the same program.
    pub fn decode_asset_account(
        &self,
        address: &Address,
        data: &[u8],
    ) -> Result<Option<AssetAccount>, DecodeError> {
        if data.len() < 8 {
            return Err(DecodeError::TooShort(data.len()));
        }
        let (disc, mut body) = data.split_at(8);
        if disc != self.asset_account.as_slice() {
            return Ok(None);
        }
        // Accounts may be padded past the struct size, so read a prefix only.
        let raw = RawAssetAccount::deserialize(&mut body).map_err(|e| DecodeError::Payload {
            kind: "Asset",
            message: e.to_string(),
        })?;
        Ok(Some(AssetAccount {
            account: address.clone(),
            issuer: Address::from_bytes(raw.issuer),
            mint: Address::from_bytes(raw.asset_mint),
            usdc_mint: Address::from_bytes(raw.usdc_mint),
            decimals: raw.decimals,
            price_usdc: to_i64("price_usdc", raw.price_usdc)?,
            total_supply: to_i64("total_supply", raw.total_supply)?,
            free_float: to_i64("free_float", raw.free_float)?,
        }))
    }
}

impl Default for EventDecoder {
    fn default() -> Self {
        Self::new()
    }
}

/// Encode an event exactly as the programs emit it (discriminator + borsh).
pub fn encode_event(event: &ProgramEvent) -> Result<Vec<u8>, DecodeError> {
    let name = event.name();
    let body = match event {
        ProgramEvent::AssetCreated(e) => encode(
            name,
            &RawAssetCreated {
                asset: key(&e.asset)?,
                issuer: key(&e.issuer)?,
                asset_mint: key(&e.asset_mint)?,
                price_usdc: to_u64("price_usdc", e.price_usdc)?,
                total_supply: to_u64("total_supply", e.total_supply)?,
                free_float: to_u64("free_float", e.free_float)?,
            },
        )?,
        ProgramEvent::AssetUpdated(e) => encode(
            name,
            &RawAssetUpdated {
                asset: key(&e.asset)?,
                price_usdc: to_u64("price_usdc", e.price_usdc)?,
                free_float: to_u64("free_float", e.free_float)?,
            },
        )?,
        ProgramEvent::SharesBought(e) => encode(
            name,
            &RawSharesTraded {
                trader: key(&e.buyer)?,
                mint: key(&e.mint)?,
                amount: to_u64("amount", e.amount)?,
                total: to_u64("total_paid", e.total_paid)?,
            },
        )?,
        ProgramEvent::SharesSold(e) => encode(
            name,
            &RawSharesTraded {
                trader: key(&e.seller)?,
                mint: key(&e.mint)?,
                amount: to_u64("amount", e.amount)?,
                total: to_u64("total_received", e.total_received)?,
            },
        )?,
        ProgramEvent::DividendOpened(e) => encode(
            name,
            &RawDividendOpened {
                dividend: key(&e.dividend)?,
                asset: key(&e.asset)?,
                total_amount: to_u64("total_amount", e.total_amount)?,
                supply_circ_at_open: to_u64("supply_circ_at_open", e.supply_circ_at_open)?,
            },
        )?,
        ProgramEvent::DividendClaimed(e) => encode(
            name,
            &RawDividendClaimed {
                dividend: key(&e.dividend)?,
                holder: key(&e.holder)?,
                amount: to_u64("amount", e.amount)?,
            },
        )?,
        ProgramEvent::DividendClosed(e) => encode(
            name,
            &RawDividendClosed {
                dividend: key(&e.dividend)?,
                remaining_amount: to_u64("remaining_amount", e.remaining_amount)?,
            },
        )?,
    };

    let mut bytes = discriminator("event", name).to_vec();
    bytes.extend_from_slice(&body);
    Ok(bytes)
}

/// Render an event as the `Program data:` log line a validator would report.
pub fn encode_event_log(event: &ProgramEvent) -> Result<String, DecodeError> {
    let bytes = encode_event(event)?;
    Ok(format!("{}{}", PROGRAM_DATA_MARKER, BASE64.encode(bytes)))
}

/// Encode a registry `Asset` account body with its discriminator.
pub fn encode_asset_account(account: &AssetAccount) -> Result<Vec<u8>, DecodeError> {
    let body = encode(
        "Asset",
        &RawAssetAccount {
            issuer: key(&account.issuer)?,
            asset_mint: key(&account.mint)?,
            usdc_mint: key(&account.usdc_mint)?,
            decimals: account.decimals,
            price_usdc: to_u64("price_usdc", account.price_usdc)?,
            total_supply: to_u64("total_supply", account.total_supply)?,
            free_float: to_u64("free_float", account.free_float)?,
            bump_asset: 255,
            bump_mint_auth: 254,
            bump_vault_usdc: 253,
        },
    )?;
    let mut bytes = discriminator("account", "Asset").to_vec();
    bytes.extend_from_slice(&body);
    Ok(bytes)
}
