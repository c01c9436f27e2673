//! Domain primitives: TimeMs, Address, Side.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Time in milliseconds since Unix epoch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct TimeMs(pub i64);

impl TimeMs {
    /// Create a TimeMs from milliseconds.
    pub fn new(ms: i64) -> Self {
        TimeMs(ms)
    }

    /// Create a TimeMs from a chain block time (seconds).
    pub fn from_unix_seconds(secs: i64) -> Self {
        TimeMs(secs.saturating_mul(1000))
    }

    /// Current wall-clock time.
    pub fn now() -> Self {
        TimeMs(Utc::now().timestamp_millis())
    }

    /// Get the underlying milliseconds value.
    pub fn as_i64(&self) -> i64 {
        self.0
    }

    /// Alias of [`TimeMs::as_i64`].
    pub fn as_ms(&self) -> i64 {
        self.0
    }

    /// UTC calendar day containing this instant.
    pub fn utc_date(&self) -> NaiveDate {
        DateTime::<Utc>::from_timestamp_millis(self.0)
            .unwrap_or_default()
            .date_naive()
    }

    /// Shift back by a whole number of days.
    pub fn minus_days(&self, days: i64) -> Self {
        TimeMs(self.0.saturating_sub(days.saturating_mul(86_400_000)))
    }
}

/// Error returned when a string is not a base58-encoded 32-byte key.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid address: {0}")]
pub struct AddressParseError(pub String);

/// Base58-encoded 32-byte public key (wallet, mint, program or PDA).
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Address(pub String);

impl Address {
    /// Wrap a string without validating it.
    pub fn new(addr: String) -> Self {
        Address(addr)
    }

    /// Encode raw key bytes.
    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        Address(bs58::encode(bytes).into_string())
    }

    /// Parse and validate a base58 key.
    pub fn parse(input: &str) -> Result<Self, AddressParseError> {
        let trimmed = input.trim();
        let decoded = bs58::decode(trimmed)
            .into_vec()
            .map_err(|_| AddressParseError(trimmed.to_string()))?;
        if decoded.len() != 32 {
            return Err(AddressParseError(trimmed.to_string()));
        }
        Ok(Address(trimmed.to_string()))
    }

    /// Decode back to raw key bytes.
    pub fn to_bytes(&self) -> Result<[u8; 32], AddressParseError> {
        let decoded = bs58::decode(&self.0)
            .into_vec()
            .map_err(|_| AddressParseError(self.0.clone()))?;
        decoded
            .try_into()
            .map_err(|_| AddressParseError(self.0.clone()))
    }

    /// Get the address as a string reference.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Short display form used as a fallback ticker.
    pub fn short(&self) -> String {
        self.0.chars().take(6).collect::<String>().to_uppercase()
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for Address {
    type Err = AddressParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Address::parse(s)
    }
}

/// Trade side: Buy or Sell.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Side {
    /// Shares purchased from the free float.
    Buy,
    /// Shares sold back to the vault.
    Sell,
}

impl Side {
    /// Get the signed multiplier for this side (+1 for Buy, -1 for Sell).
    pub fn sign(&self) -> i64 {
        match self {
            Side::Buy => 1,
            Side::Sell => -1,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Side::Buy => "buy",
            Side::Sell => "sell",
        }
    }
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Side {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "buy" => Ok(Side::Buy),
            "sell" => Ok(Side::Sell),
            other => Err(format!("unknown side: {}", other)),
        }
    }
}
