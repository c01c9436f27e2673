//! Weighted-average cost basis over a trade ledger.

use crate::domain::{Decimal, Side, Trade};
use tracing::warn;

/// Running weighted-average book for one (wallet, mint) pair.
///
/// All purchase lots blend into one average: a sell removes the same fraction
/// of `total_invested` as it removes of `total_shares`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CostBasis {
    /// Remaining cost of the shares still held, in currency units.
    pub total_invested: Decimal,
    /// Shares held according to the replay.
    pub total_shares: Decimal,
}

impl CostBasis {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replay `trades` in the order given.
    pub fn from_trades<'a>(trades: impl IntoIterator<Item = &'a Trade>) -> Self {
        let mut basis = Self::new();
        for trade in trades {
            basis.apply(trade);
        }
        basis
    }

    pub fn apply(&mut self, trade: &Trade) {
        let shares = Decimal::from_i64(trade.amount);
        match trade.side {
            Side::Buy => {
                self.total_invested += Decimal::from_micro(trade.price_usdc);
                self.total_shares += shares;
            }
            Side::Sell => {
                let ratio = self.sell_ratio(trade, shares);
                self.total_invested -= self.total_invested * ratio;
                self.total_shares -= shares;
            }
        }
    }

    fn sell_ratio(&self, trade: &Trade, shares: Decimal) -> Decimal {
        if !self.total_shares.is_positive() {
            warn!(
                sig = %trade.sig,
                wallet = %trade.wallet,
                mint = %trade.mint,
                "Sell with no shares in the replayed book, cost basis unchanged"
            );
            return Decimal::zero();
        }
        let ratio = shares / self.total_shares;
        if ratio > Decimal::from_i64(1) {
            warn!(
                sig = %trade.sig,
                sold = %shares,
                held = %self.total_shares,
                "Sell exceeds replayed holdings, clearing cost basis"
            );
            return Decimal::from_i64(1);
        }
        ratio
    }

    /// Average cost per share, 0 when the book is empty.
    pub fn avg_cost(&self) -> Decimal {
        if self.total_shares.is_positive() {
            self.total_invested / self.total_shares
        } else {
            Decimal::zero()
        }
    }

    /// `shares * price - total_invested` for the replayed book.
    pub fn unrealized_pnl(&self, price: Decimal) -> Decimal {
        self.total_shares * price - self.total_invested
    }
}
