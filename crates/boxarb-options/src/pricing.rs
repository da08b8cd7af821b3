//! # Depth-Walk Execution Pricing
//!
//! Estimates what actually filling an order would cost against the visible
//! book, instead of pretending everything trades at last price.
//!
//! ## Description
//! A buy consumes the sell ladder, a sell consumes the buy ladder, best level
//! first. If the ladder can serve the full quantity, slippage is the signed
//! gap between the volume-weighted fill price and last. If the ladder runs
//! dry — or there is no ladder at all — the leg is charged a flat worst-case
//! percentage of its notional; the partially-fillable portion earns no
//! credit.

use boxarb_models::spread::LegSide;
use boxarb_models::{BoxSpread, DepthLevel, Instrument};
use tracing::debug;

/// Slippage for one leg at one quantity. `worst_case_pct` is a percentage
/// (5.0 means 5%).
pub fn leg_slippage(leg: &Instrument, quantity: u64, side: LegSide, worst_case_pct: f64) -> f64 {
    let ladder = match side {
        LegSide::Buy => &leg.quote.depth.sell,
        LegSide::Sell => &leg.quote.depth.buy,
    };
    let last = leg.quote.last_price;
    let worst_case = last * quantity as f64 * worst_case_pct / 100.0;

    if ladder.is_empty() {
        return worst_case;
    }

    match walk(ladder, quantity) {
        Some(vwap) => match side {
            LegSide::Buy => (vwap - last) * quantity as f64,
            LegSide::Sell => (last - vwap) * quantity as f64,
        },
        // Ladder exhausted before the full quantity.
        None => worst_case,
    }
}

/// Volume-weighted fill price for `quantity`, or `None` when the ladder
/// cannot serve it all.
fn walk(ladder: &[DepthLevel], quantity: u64) -> Option<f64> {
    if quantity == 0 {
        return None;
    }
    let mut remaining = quantity;
    let mut notional = 0.0;
    for level in ladder {
        let consumed = remaining.min(level.quantity);
        notional += consumed as f64 * level.price;
        remaining -= consumed;
        if remaining == 0 {
            return Some(notional / quantity as f64);
        }
    }
    None
}

/// Sum over all four legs.
pub fn total_slippage(spread: &BoxSpread, quantity: u64, worst_case_pct: f64) -> f64 {
    let total: f64 = spread
        .legs()
        .iter()
        .map(|(leg, side)| leg_slippage(leg, quantity, *side, worst_case_pct))
        .sum();
    debug!("slippage for {} q={}: {:.2}", spread.id, quantity, total);
    total
}

/// How many units every leg's relevant ladder can absorb: the minimum across
/// legs of the ladder's total visible quantity.
pub fn available_liquidity(spread: &BoxSpread) -> u64 {
    spread
        .legs()
        .iter()
        .map(|(leg, side)| {
            let ladder = match side {
                LegSide::Buy => &leg.quote.depth.sell,
                LegSide::Sell => &leg.quote.depth.buy,
            };
            ladder.iter().map(|level| level.quantity).sum::<u64>()
        })
        .min()
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use boxarb_models::{OptionKind, OptionTerms, QuoteSnapshot, Security};
    use chrono::NaiveDate;

    fn leg_with(last: f64, sell: Vec<DepthLevel>, buy: Vec<DepthLevel>) -> Instrument {
        let mut quote = QuoteSnapshot { last_price: last, ..QuoteSnapshot::default() };
        quote.depth.sell = sell;
        quote.depth.buy = buy;
        Instrument {
            token: 7,
            tradingsymbol: "NIFTY24JUN18000CE".into(),
            exchange: "NFO".into(),
            name: "NIFTY".into(),
            segment: "NFO-OPT".into(),
            security: Security::Option(OptionTerms {
                underlying: "NIFTY".into(),
                strike: 18000.0,
                kind: OptionKind::Call,
                expiry: NaiveDate::from_ymd_opt(2024, 6, 27),
            }),
            quote,
        }
    }

    fn level(price: f64, quantity: u64) -> DepthLevel {
        DepthLevel { price, quantity, orders: 1 }
    }

    #[test]
    fn buy_slippage_is_vwap_minus_last() {
        // 5 @ 30.5 then 5 @ 31.0 for q=10: vwap 30.75, last 30.
        let leg = leg_with(30.0, vec![level(30.5, 5), level(31.0, 20)], vec![]);
        let slip = leg_slippage(&leg, 10, LegSide::Buy, 5.0);
        assert!((slip - (30.75 - 30.0) * 10.0).abs() < 1e-9);
    }

    #[test]
    fn sell_slippage_is_last_minus_vwap() {
        // Selling 10 into 6 @ 29.8 and 10 @ 29.5: vwap 29.68.
        let leg = leg_with(30.0, vec![], vec![level(29.8, 6), level(29.5, 10)]);
        let slip = leg_slippage(&leg, 10, LegSide::Sell, 5.0);
        let vwap = (6.0 * 29.8 + 4.0 * 29.5) / 10.0;
        assert!((slip - (30.0 - vwap) * 10.0).abs() < 1e-9);
    }

    #[test]
    fn exhausted_ladder_charges_worst_case() {
        // Only 3 units visible against q=10: 30 * 10 * 5% = 15.
        let leg = leg_with(30.0, vec![level(30.1, 3)], vec![]);
        let slip = leg_slippage(&leg, 10, LegSide::Buy, 5.0);
        assert!((slip - 15.0).abs() < 1e-9);
    }

    #[test]
    fn empty_ladder_charges_worst_case() {
        let leg = leg_with(30.0, vec![], vec![]);
        let slip = leg_slippage(&leg, 10, LegSide::Buy, 5.0);
        assert!((slip - 15.0).abs() < 1e-9);
    }

    #[test]
    fn full_fill_at_last_price_is_free() {
        let leg = leg_with(30.0, vec![level(30.0, 100)], vec![]);
        assert_eq!(leg_slippage(&leg, 10, LegSide::Buy, 5.0), 0.0);
    }

    #[test]
    fn liquidity_is_min_over_relevant_ladders() {
        let expiry = NaiveDate::from_ymd_opt(2024, 6, 27).unwrap();
        let lc = leg_with(30.0, vec![level(30.1, 40), level(30.2, 60)], vec![]);
        let sc = leg_with(50.0, vec![], vec![level(49.9, 25)]);
        let lp = leg_with(90.0, vec![level(90.2, 80)], vec![]);
        let sp = leg_with(40.0, vec![], vec![level(39.8, 30), level(39.5, 10)]);
        let spread = BoxSpread::new("NIFTY", "NFO", 18000.0, 18100.0, expiry, lc, sc, lp, sp);
        // legs offer 100 / 25 / 80 / 40 respectively.
        assert_eq!(available_liquidity(&spread), 25);
    }
}
