//! Dividend distributions and holder claims.

use crate::domain::{Address, TimeMs};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Dividend {
    pub id: i64,
    /// Dividend PDA (natural key).
    pub pda: Address,
    pub mint: Address,
    pub index: i64,
    pub total_amount: i64,
    pub supply_circ_at_open: i64,
    pub is_closed: bool,
    pub closed_at: Option<TimeMs>,
    pub remaining_amount: Option<i64>,
    pub created_at: TimeMs,
}

impl Dividend {
    /// Sequence number the market program assigns: the first byte of the PDA.
    pub fn index_from_pda(pda: &Address) -> i64 {
        pda.to_bytes().map(|b| i64::from(b[0])).unwrap_or(0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Claim {
    pub id: i64,
    /// Claim PDA, or `claim:<dividend>:<holder>` when the PDA was not resolvable.
    pub pda: String,
    pub dividend_id: i64,
    pub wallet: Address,
    pub amount: i64,
    pub created_at: TimeMs,
}

impl Claim {
    /// Fallback natural key; the program allows one claim per (dividend, holder).
    pub fn fallback_key(dividend: &Address, holder: &Address) -> String {
        format!("claim:{}:{}", dividend, holder)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_index_from_pda_uses_first_byte() {
        let mut bytes = [9u8; 32];
        bytes[0] = 200;
        assert_eq!(Dividend::index_from_pda(&Address::from_bytes(bytes)), 200);
        assert_eq!(Dividend::index_from_pda(&Address::new("bad".to_string())), 0);
    }

    #[test]
    fn test_claim_fallback_key() {
        let d = Address::from_bytes([1; 32]);
        let h = Address::from_bytes([2; 32]);
        assert_eq!(Claim::fallback_key(&d, &h), format!("claim:{}:{}", d, h));
    }
}
