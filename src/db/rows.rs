//! Row-to-domain mapping shared by the repository and the ledger reader.

use crate::domain::{Address, Asset, Claim, Dividend, Position, Side, Trade, TimeMs};
use sqlx::sqlite::SqliteRow;
use sqlx::Row;

pub(crate) const ASSET_COLUMNS: &str = "mint, account, ticker, issuer, usdc_mint, decimals, \
     price_usdc, total_supply, free_float, created_at, updated_at";

pub(crate) const TRADE_COLUMNS: &str =
    "sig, mint, side, wallet, amount, price_usdc, slot, created_at";

pub(crate) const DIVIDEND_COLUMNS: &str = "id, pda, mint, dividend_index, total_amount, \
     supply_circ_at_open, is_closed, closed_at, remaining_amount, created_at";

pub(crate) const CLAIM_COLUMNS: &str = "id, pda, dividend_id, wallet, amount, created_at";

fn decode_err(column: &str, message: String) -> sqlx::Error {
    sqlx::Error::ColumnDecode {
        index: column.to_string(),
        source: message.into(),
    }
}

pub(crate) fn asset_from_row(row: &SqliteRow) -> Result<Asset, sqlx::Error> {
    let decimals: i64 = row.try_get("decimals")?;
    let decimals = u8::try_from(decimals)
        .map_err(|_| decode_err("decimals", format!("out of range: {}", decimals)))?;

    Ok(Asset {
        mint: Address::new(row.try_get("mint")?),
        account: row.try_get::<Option<String>, _>("account")?.map(Address::new),
        ticker: row.try_get("ticker")?,
        issuer: Address::new(row.try_get("issuer")?),
        usdc_mint: row.try_get("usdc_mint")?,
        decimals,
        price_usdc: row.try_get("price_usdc")?,
        total_supply: row.try_get("total_supply")?,
        free_float: row.try_get("free_float")?,
        created_at: TimeMs::new(row.try_get("created_at")?),
        updated_at: TimeMs::new(row.try_get("updated_at")?),
    })
}

pub(crate) fn trade_from_row(row: &SqliteRow) -> Result<Trade, sqlx::Error> {
    let side: String = row.try_get("side")?;
    let side = side.parse::<Side>().map_err(|e| decode_err("side", e))?;

    Ok(Trade {
        sig: row.try_get("sig")?,
        mint: Address::new(row.try_get("mint")?),
        side,
        wallet: Address::new(row.try_get("wallet")?),
        amount: row.try_get("amount")?,
        price_usdc: row.try_get("price_usdc")?,
        slot: row.try_get("slot")?,
        created_at: TimeMs::new(row.try_get("created_at")?),
    })
}

pub(crate) fn position_from_row(row: &SqliteRow) -> Result<Position, sqlx::Error> {
    Ok(Position {
        wallet: Address::new(row.try_get("wallet")?),
        mint: Address::new(row.try_get("mint")?),
        shares: row.try_get("shares")?,
        updated_at: TimeMs::new(row.try_get("updated_at")?),
    })
}

pub(crate) fn dividend_from_row(row: &SqliteRow) -> Result<Dividend, sqlx::Error> {
    Ok(Dividend {
        id: row.try_get("id")?,
        pda: Address::new(row.try_get("pda")?),
        mint: Address::new(row.try_get("mint")?),
        index: row.try_get("dividend_index")?,
        total_amount: row.try_get("total_amount")?,
        supply_circ_at_open: row.try_get("supply_circ_at_open")?,
        is_closed: row.try_get::<i64, _>("is_closed")? != 0,
        closed_at: row.try_get::<Option<i64>, _>("closed_at")?.map(TimeMs::new),
        remaining_amount: row.try_get("remaining_amount")?,
        created_at: TimeMs::new(row.try_get("created_at")?),
    })
}

pub(crate) fn claim_from_row(row: &SqliteRow) -> Result<Claim, sqlx::Error> {
    Ok(Claim {
        id: row.try_get("id")?,
        pda: row.try_get("pda")?,
        dividend_id: row.try_get("dividend_id")?,
        wallet: Address::new(row.try_get("wallet")?),
        amount: row.try_get("amount")?,
        created_at: TimeMs::new(row.try_get("created_at")?),
    })
}
