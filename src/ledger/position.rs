use serde::{Deserialize, Serialize};

use super::{mul_scaled, Amount};

/// Where acquired tokens came from, for cost-basis attribution.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Lineage {
    Clob,
    Split,
}

/// Result of applying a sell to a position.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SellFill {
    /// Realized PnL delta from the long-closing portion.
    pub realized_delta: Amount,
    /// Portion of the sell that exceeded tracked long inventory. The caller
    /// decides whether this was a genuine short or an untracked acquisition
    /// (the replay may impute a split for it before calling).
    pub overcapped: Amount,
}

/// Ledger state for one `(condition, outcome)` leg.
///
/// `amount` is signed: negative means short. `total_cost` is signed with the
/// same sign convention, so the average price `total_cost / amount` is
/// meaningful for both directions.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerPosition {
    pub amount: Amount,
    pub total_cost: Amount,
    pub realized_pnl: Amount,
    /// Tokens acquired via splits (real or imputed).
    pub from_splits: Amount,
    /// Tokens acquired via order-book fills.
    pub from_clob: Amount,
}

impl LedgerPosition {
    pub fn is_flat(&self) -> bool {
        self.amount == 0
    }

    /// Apply a buy of `qty` tokens at `price`. Closes short inventory first
    /// at the short average, then opens or extends a long at the trade price.
    /// Returns the realized PnL delta from the closing phase.
    pub fn apply_buy(&mut self, qty: Amount, price: Amount, lineage: Lineage) -> Amount {
        debug_assert!(qty >= 0, "buy quantity must be non-negative");
        let mut realized = 0;
        let mut remaining = qty;

        if self.amount < 0 && remaining > 0 {
            let closing = remaining.min(-self.amount);
            // Proportional share of the (negative) short book being retired.
            let removed = self.total_cost * closing / -self.amount;
            self.total_cost -= removed;
            realized += -mul_scaled(closing, price) - removed;
            self.amount += closing;
            remaining -= closing;
            if self.amount == 0 {
                self.total_cost = 0;
            }
        }

        if remaining > 0 {
            self.amount += remaining;
            self.total_cost += mul_scaled(remaining, price);
        }

        match lineage {
            Lineage::Clob => self.from_clob += qty,
            Lineage::Split => self.from_splits += qty,
        }

        self.realized_pnl += realized;
        realized
    }

    /// Apply a sell of `qty` tokens at `price`. Closes long inventory first
    /// at the long average, then opens or extends a short at the trade price.
    pub fn apply_sell(&mut self, qty: Amount, price: Amount) -> SellFill {
        debug_assert!(qty >= 0, "sell quantity must be non-negative");
        let mut realized = 0;
        let mut remaining = qty;
        let mut overcapped = 0;

        if self.amount > 0 && remaining > 0 {
            let closing = remaining.min(self.amount);
            let removed = self.total_cost * closing / self.amount;
            self.total_cost -= removed;
            realized += mul_scaled(closing, price) - removed;
            self.amount -= closing;
            remaining -= closing;
            if self.amount == 0 {
                self.total_cost = 0;
            }
            overcapped = remaining;
        } else {
            overcapped = remaining;
        }

        if remaining > 0 {
            self.amount -= remaining;
            self.total_cost -= mul_scaled(remaining, price);
        }

        self.realized_pnl += realized;
        SellFill {
            realized_delta: realized,
            overcapped,
        }
    }

    /// Settle the position at a resolution payout, draining it.
    ///
    /// For a long `q > 0` of average `a`: realizes `(payout - a) * q`.
    /// For a short `q < 0` of average `s`: realizes `(s - payout) * |q|`.
    /// Both collapse to `amount * payout - total_cost`.
    pub fn settle(&mut self, payout: Amount) -> Amount {
        let realized = mul_scaled(self.amount, payout) - self.total_cost;
        self.amount = 0;
        self.total_cost = 0;
        self.realized_pnl += realized;
        realized
    }

    /// Mark-to-market PnL of the open amount at `mark`.
    pub fn unrealized(&self, mark: Amount) -> Amount {
        mul_scaled(self.amount, mark) - self.total_cost
    }

    /// Value of the open amount at `mark`.
    pub fn position_value(&self, mark: Amount) -> Amount {
        mul_scaled(self.amount, mark)
    }

    /// Average entry price, if any inventory is tracked.
    pub fn average_price(&self) -> Option<f64> {
        if self.amount == 0 {
            None
        } else {
            Some(self.total_cost as f64 / self.amount as f64)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::{from_amount, to_amount, AMOUNT_SCALE};

    fn amt(v: f64) -> Amount {
        to_amount(v)
    }

    #[test]
    fn buy_then_sell_realizes_spread() {
        let mut pos = LedgerPosition::default();
        pos.apply_buy(amt(100.0), amt(0.40), Lineage::Clob);
        assert_eq!(pos.amount, amt(100.0));
        assert_eq!(pos.total_cost, amt(40.0));

        let fill = pos.apply_sell(amt(100.0), amt(0.55));
        assert_eq!(fill.overcapped, 0);
        assert_eq!(fill.realized_delta, amt(15.0));
        assert!(pos.is_flat());
        assert_eq!(pos.total_cost, 0);
    }

    #[test]
    fn partial_close_keeps_average() {
        let mut pos = LedgerPosition::default();
        pos.apply_buy(amt(100.0), amt(0.50), Lineage::Clob);
        pos.apply_buy(amt(100.0), amt(0.30), Lineage::Clob);
        // Average is 0.40 on 200 tokens.
        let fill = pos.apply_sell(amt(50.0), amt(0.60));
        assert_eq!(fill.realized_delta, amt(10.0));
        assert_eq!(pos.amount, amt(150.0));
        assert_eq!(pos.total_cost, amt(60.0));
    }

    #[test]
    fn sell_crossing_zero_splits_into_two_phases() {
        let mut pos = LedgerPosition::default();
        pos.apply_buy(amt(3.0), amt(0.40), Lineage::Clob);

        // Sell 8 from +3: close 3 at the long average, open a 5-token short
        // at the trade price.
        let fill = pos.apply_sell(amt(8.0), amt(0.60));
        assert_eq!(fill.realized_delta, amt(0.60));
        assert_eq!(fill.overcapped, amt(5.0));
        assert_eq!(pos.amount, amt(-5.0));
        assert_eq!(pos.total_cost, amt(-3.0));
        assert_eq!(pos.average_price(), Some(0.60));
    }

    #[test]
    fn buy_closing_short_realizes_short_spread() {
        let mut pos = LedgerPosition::default();
        pos.apply_sell(amt(100.0), amt(0.70));
        assert_eq!(pos.amount, amt(-100.0));

        let realized = pos.apply_buy(amt(100.0), amt(0.55), Lineage::Clob);
        assert_eq!(realized, amt(15.0));
        assert!(pos.is_flat());
        assert_eq!(pos.total_cost, 0);
    }

    #[test]
    fn settle_long_and_short() {
        let mut long = LedgerPosition::default();
        long.apply_buy(amt(100.0), amt(0.40), Lineage::Clob);
        assert_eq!(long.settle(AMOUNT_SCALE), amt(60.0));
        assert!(long.is_flat());

        let mut short = LedgerPosition::default();
        short.apply_sell(amt(50.0), amt(0.30));
        // Short 50 at 0.30, payout 1.0: (0.30 - 1.00) * 50 = -35.
        assert_eq!(short.settle(AMOUNT_SCALE), amt(-35.0));

        let mut losing_long = LedgerPosition::default();
        losing_long.apply_buy(amt(80.0), amt(0.25), Lineage::Clob);
        assert_eq!(losing_long.settle(0), amt(-20.0));
    }

    #[test]
    fn cash_flow_identity_holds_over_mixed_sequences() {
        // realized + amount * mark - total_cost == sum(cash flows) + amount * mark
        // which reduces to: realized - total_cost == sells - buys.
        let sequences: &[&[(f64, f64)]] = &[
            // (signed qty, price); positive qty = buy
            &[(100.0, 0.40), (-100.0, 0.55)],
            &[(50.0, 0.30), (50.0, 0.50), (-120.0, 0.45), (20.0, 0.60)],
            &[(-40.0, 0.80), (-40.0, 0.70), (100.0, 0.65), (-20.0, 0.50)],
            &[(3.0, 0.40), (-8.0, 0.60), (5.0, 0.20)],
            &[(1000.0, 0.013), (-999.0, 0.017), (-1.0, 0.999)],
        ];

        for seq in sequences {
            let mut pos = LedgerPosition::default();
            let mut cash: Amount = 0;
            for &(qty, price) in *seq {
                let q = amt(qty.abs());
                let p = amt(price);
                if qty >= 0.0 {
                    pos.apply_buy(q, p, Lineage::Clob);
                    cash -= mul_scaled(q, p);
                } else {
                    pos.apply_sell(q, p);
                    cash += mul_scaled(q, p);
                }
            }
            let lhs = pos.realized_pnl - pos.total_cost;
            let tolerance = amt(0.001);
            assert!(
                (lhs - cash).abs() <= tolerance,
                "identity violated: lhs={} cash={} seq={:?}",
                from_amount(lhs),
                from_amount(cash),
                seq
            );
        }
    }

    #[test]
    fn lineage_counters_accumulate() {
        let mut pos = LedgerPosition::default();
        pos.apply_buy(amt(10.0), amt(0.50), Lineage::Split);
        pos.apply_buy(amt(5.0), amt(0.60), Lineage::Clob);
        assert_eq!(pos.from_splits, amt(10.0));
        assert_eq!(pos.from_clob, amt(5.0));
    }
}
