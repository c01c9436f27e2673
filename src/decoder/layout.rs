//! Versioned account-role schema.
//!
//! Event payloads carry most identities, but a few roles only exist in the
//! transaction's account list. Each layout version names the index at which a
//! role sits for a given event, so a protocol upgrade adds a version instead of
//! moving magic numbers around.

use crate::domain::{Address, ProgramEvent};
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LayoutVersion {
    V1,
}

impl FromStr for LayoutVersion {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "v1" => Ok(LayoutVersion::V1),
            other => Err(format!("unknown account layout version: {}", other)),
        }
    }
}

impl fmt::Display for LayoutVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LayoutVersion::V1 => f.write_str("v1"),
        }
    }
}

/// Roles that can be looked up in a transaction's account keys.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccountRole {
    /// Reference currency mint passed to `create_asset`.
    UsdcMint,
    /// Claim record PDA initialised by `claim_dividend`.
    Claim,
}

#[derive(Debug, Clone, Copy)]
struct RoleSlot {
    event: &'static str,
    role: AccountRole,
    index: usize,
}

/// Roles resolved for one event.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EventRoles {
    pub usdc_mint: Option<Address>,
    pub claim: Option<Address>,
}

#[derive(Debug, Clone)]
pub struct AccountLayout {
    version: LayoutVersion,
    slots: Vec<RoleSlot>,
}

impl AccountLayout {
    pub fn for_version(version: LayoutVersion) -> Self {
        let slots = match version {
            // Message order: signers first, then writable non-signers, then readonly.
            LayoutVersion::V1 => vec![
                RoleSlot {
                    event: "AssetCreated",
                    role: AccountRole::UsdcMint,
                    index: 4,
                },
                RoleSlot {
                    event: "DividendClaimed",
                    role: AccountRole::Claim,
                    index: 1,
                },
            ],
        };
        Self { version, slots }
    }

    pub fn version(&self) -> LayoutVersion {
        self.version
    }

    pub fn index_of(&self, event_name: &str, role: AccountRole) -> Option<usize> {
        self.slots
            .iter()
            .find(|s| s.event == event_name && s.role == role)
            .map(|s| s.index)
    }

    fn lookup(
        &self,
        event_name: &str,
        role: AccountRole,
        account_keys: &[Address],
    ) -> Option<Address> {
        self.index_of(event_name, role)
            .and_then(|i| account_keys.get(i))
            .cloned()
    }

    /// Resolve the roles this layout defines for `event`.
    pub fn resolve(&self, event: &ProgramEvent, account_keys: &[Address]) -> EventRoles {
        let name = event.name();
        EventRoles {
            usdc_mint: self.lookup(name, AccountRole::UsdcMint, account_keys),
            claim: self.lookup(name, AccountRole::Claim, account_keys),
        }
    }
}

impl Default for AccountLayout {
    fn default() -> Self {
        Self::for_version(LayoutVersion::V1)
    }
}
