//! # Box-Spread Candidate Model
//!
//! A box spread is four option legs on the same underlying and expiry:
//! long call at the lower strike, short call at the higher strike, long put
//! at the higher strike, short put at the lower strike. Its payoff at expiry
//! is fixed at `higher − lower` regardless of where the underlying settles,
//! so any difference between that theoretical value and the net premium is a
//! pricing error to capture.

use crate::instrument::Instrument;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

/// Economics the evaluator fills in for a candidate.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct SpreadMetrics {
    /// Signed entry cash flow per unit; positive = net credit received.
    pub net_premium: f64,
    /// `higher_strike − lower_strike`.
    pub theoretical_value: f64,
    /// Depth-walk slippage across all four legs for the scan quantity.
    pub slippage: f64,
    /// Total transaction costs for the scan quantity.
    pub fees: f64,
    /// Margin the broker would block.
    pub margin: f64,
    /// Adjusted P/L over margin, in percent.
    pub roi: f64,
    /// Ranking score: `roi · ln(1 + |adjusted_pl|)`.
    pub profitability: f64,
    pub max_loss: f64,
    pub max_profit: f64,
}

/// Which way a leg trades.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LegSide {
    Buy,
    Sell,
}

/// A fully-resolved 4-leg box-spread candidate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BoxSpread {
    /// Deterministic id: `underlying|exchange|lower|higher|expiry`.
    pub id: String,
    pub underlying: String,
    pub exchange: String,
    pub lower_strike: f64,
    pub higher_strike: f64,
    pub expiry: NaiveDate,
    pub long_call_lower: Instrument,
    pub short_call_higher: Instrument,
    pub long_put_higher: Instrument,
    pub short_put_lower: Instrument,
    pub metrics: SpreadMetrics,
    pub executed: bool,
}

impl BoxSpread {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        underlying: &str,
        exchange: &str,
        lower_strike: f64,
        higher_strike: f64,
        expiry: NaiveDate,
        long_call_lower: Instrument,
        short_call_higher: Instrument,
        long_put_higher: Instrument,
        short_put_lower: Instrument,
    ) -> Self {
        Self {
            id: Self::make_id(underlying, exchange, lower_strike, higher_strike, expiry),
            underlying: underlying.to_string(),
            exchange: exchange.to_string(),
            lower_strike,
            higher_strike,
            expiry,
            long_call_lower,
            short_call_higher,
            long_put_higher,
            short_put_lower,
            metrics: SpreadMetrics::default(),
            executed: false,
        }
    }

    /// Pure function of (underlying, exchange, strikes, formatted expiry).
    pub fn make_id(
        underlying: &str,
        exchange: &str,
        lower_strike: f64,
        higher_strike: f64,
        expiry: NaiveDate,
    ) -> String {
        format!(
            "{}|{}|{:.2}|{:.2}|{}",
            underlying,
            exchange,
            lower_strike,
            higher_strike,
            expiry.format("%Y-%m-%d")
        )
    }

    /// The fixed payoff at expiry per unit.
    pub fn theoretical_value(&self) -> f64 {
        self.higher_strike - self.lower_strike
    }

    /// Signed entry cash flow per unit. Long legs pay premium (negative),
    /// short legs receive it (positive).
    pub fn net_premium(&self) -> f64 {
        -self.long_call_lower.quote.last_price + self.short_call_higher.quote.last_price
            - self.long_put_higher.quote.last_price
            + self.short_put_lower.quote.last_price
    }

    /// P/L per unit before slippage and fees.
    pub fn raw_profit_loss(&self) -> f64 {
        self.theoretical_value() - self.net_premium()
    }

    /// Sum of the four last prices; the turnover base for fees and margin.
    pub fn leg_last_sum(&self) -> f64 {
        self.long_call_lower.quote.last_price
            + self.short_call_higher.quote.last_price
            + self.long_put_higher.quote.last_price
            + self.short_put_lower.quote.last_price
    }

    /// Legs paired with the side they trade on.
    pub fn legs(&self) -> [(&Instrument, LegSide); 4] {
        [
            (&self.long_call_lower, LegSide::Buy),
            (&self.short_call_higher, LegSide::Sell),
            (&self.long_put_higher, LegSide::Buy),
            (&self.short_put_lower, LegSide::Sell),
        ]
    }

    /// A candidate is priceable only when every leg has a positive last price
    /// and a non-empty ladder on the side the order would hit (asks for buy
    /// legs, bids for sell legs).
    pub fn has_complete_market_data(&self) -> bool {
        self.legs().iter().all(|(leg, side)| {
            let ladder = match side {
                LegSide::Buy => &leg.quote.depth.sell,
                LegSide::Sell => &leg.quote.depth.buy,
            };
            leg.quote.last_price > 0.0 && !ladder.is_empty()
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::instrument::{DepthLevel, OptionKind, OptionTerms, QuoteSnapshot, Security};

    fn leg(symbol: &str, strike: f64, kind: OptionKind, last: f64) -> Instrument {
        Instrument {
            token: strike as u64 * 10 + if kind == OptionKind::Call { 1 } else { 2 },
            tradingsymbol: symbol.into(),
            exchange: "NFO".into(),
            name: "NIFTY".into(),
            segment: "NFO-OPT".into(),
            security: Security::Option(OptionTerms {
                underlying: "NIFTY".into(),
                strike,
                kind,
                expiry: NaiveDate::from_ymd_opt(2024, 6, 27),
            }),
            quote: QuoteSnapshot { last_price: last, ..QuoteSnapshot::default() },
        }
    }

    fn deep_level(price: f64) -> DepthLevel {
        DepthLevel { price, quantity: 10_000, orders: 10 }
    }

    fn sample_spread() -> BoxSpread {
        let expiry = NaiveDate::from_ymd_opt(2024, 6, 27).unwrap();
        let mut lc = leg("NIFTY24JUN18000CE", 18000.0, OptionKind::Call, 30.0);
        let mut sc = leg("NIFTY24JUN18100CE", 18100.0, OptionKind::Call, 50.0);
        let mut lp = leg("NIFTY24JUN18100PE", 18100.0, OptionKind::Put, 90.0);
        let mut sp = leg("NIFTY24JUN18000PE", 18000.0, OptionKind::Put, 40.0);
        lc.quote.depth.sell = vec![deep_level(30.0)];
        lp.quote.depth.sell = vec![deep_level(90.0)];
        sc.quote.depth.buy = vec![deep_level(50.0)];
        sp.quote.depth.buy = vec![deep_level(40.0)];
        BoxSpread::new("NIFTY", "NFO", 18000.0, 18100.0, expiry, lc, sc, lp, sp)
    }

    #[test]
    fn theoretical_value_is_strike_difference() {
        let spread = sample_spread();
        assert_eq!(spread.theoretical_value(), 100.0);
        assert_eq!(
            spread.theoretical_value(),
            spread.higher_strike - spread.lower_strike
        );
    }

    #[test]
    fn net_premium_signs_per_leg() {
        // -30 + 50 - 90 + 40 = -30 (net debit of 30).
        let spread = sample_spread();
        assert_eq!(spread.net_premium(), -30.0);
        assert_eq!(spread.raw_profit_loss(), 130.0);
    }

    #[test]
    fn id_is_deterministic() {
        let spread = sample_spread();
        assert_eq!(spread.id, "NIFTY|NFO|18000.00|18100.00|2024-06-27");
        assert_eq!(
            spread.id,
            BoxSpread::make_id("NIFTY", "NFO", 18000.0, 18100.0, spread.expiry)
        );
    }

    #[test]
    fn complete_market_data_needs_relevant_ladders() {
        let mut spread = sample_spread();
        assert!(spread.has_complete_market_data());

        // Buy legs read the sell ladder; emptying a sell-leg's sell ladder is fine.
        spread.short_call_higher.quote.depth.sell.clear();
        assert!(spread.has_complete_market_data());

        // But a buy leg without asks is not priceable.
        spread.long_call_lower.quote.depth.sell.clear();
        assert!(!spread.has_complete_market_data());
    }

    #[test]
    fn complete_market_data_needs_positive_last() {
        let mut spread = sample_spread();
        spread.short_put_lower.quote.last_price = 0.0;
        assert!(!spread.has_complete_market_data());
    }
}
