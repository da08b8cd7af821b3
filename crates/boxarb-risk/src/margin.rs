//! # Margin and Profitability
//!
//! SPAN-style margin estimate for a box position and the derived sizing and
//! ranking numbers.
//!
//! ## Description
//! A box's worst case depends on the sign of the net premium: a net debit can
//! lose at most the premium paid, while a net credit's downside is the
//! friction (fees + slippage) spent entering it. The broker blocks that worst
//! case plus a buffer (SPAN), plus an exposure margin proportional to premium
//! turnover. ROI is adjusted P/L over margin; the ranking score scales ROI by
//! the log of absolute adjusted P/L so a high-ROI-tiny-profit candidate does
//! not outrank a meaningful one.

use boxarb_core::Settings;
use boxarb_models::BoxSpread;
use tracing::debug;

/// Risk knobs, overridable under `risk/*`. Capital and the ROI floor are
/// shared with the strategy section (`strategy/capital`, `strategy/min_roi`)
/// so the evaluator's survivor filter and the routing gate always agree.
#[derive(Debug, Clone)]
pub struct RiskParams {
    pub capital: f64,
    pub min_roi: f64,
    pub max_loss_percentage: f64,
    pub margin_buffer_percentage: f64,
    pub exposure_margin_percentage: f64,
    pub capital_safety_factor: f64,
}

impl Default for RiskParams {
    fn default() -> Self {
        Self {
            capital: 75_000.0,
            min_roi: 0.5,
            max_loss_percentage: 2.0,
            margin_buffer_percentage: 25.0,
            exposure_margin_percentage: 3.0,
            capital_safety_factor: 0.9,
        }
    }
}

impl RiskParams {
    pub fn from_settings(settings: &Settings) -> Self {
        let d = Self::default();
        Self {
            capital: settings.get_f64("strategy/capital", d.capital),
            min_roi: settings.get_f64("strategy/min_roi", d.min_roi),
            max_loss_percentage: settings.get_f64("risk/max_loss_percentage", d.max_loss_percentage),
            margin_buffer_percentage: settings.get_f64("risk/margin_buffer_percentage", d.margin_buffer_percentage),
            exposure_margin_percentage: settings.get_f64("risk/exposure_margin_percentage", d.exposure_margin_percentage),
            capital_safety_factor: settings.get_f64("risk/capital_safety_factor", d.capital_safety_factor),
        }
    }
}

pub struct RiskCalculator {
    params: RiskParams,
}

impl RiskCalculator {
    pub fn new(params: RiskParams) -> Self {
        Self { params }
    }

    pub fn params(&self) -> &RiskParams {
        &self.params
    }

    /// Worst case for the position. `fees` and `slippage` are the candidate
    /// totals already computed for this quantity.
    pub fn max_loss(&self, spread: &BoxSpread, quantity: u64, fees: f64, slippage: f64) -> f64 {
        let net_premium = spread.net_premium();
        if net_premium < 0.0 {
            -net_premium * quantity as f64
        } else {
            (fees + slippage) * quantity as f64
        }
    }

    /// SPAN (buffered max loss) plus exposure margin on premium turnover.
    pub fn margin_required(
        &self,
        spread: &BoxSpread,
        quantity: u64,
        fees: f64,
        slippage: f64,
    ) -> f64 {
        let max_loss = self.max_loss(spread, quantity, fees, slippage);
        let span = max_loss * (1.0 + self.params.margin_buffer_percentage / 100.0);
        let turnover = spread.leg_last_sum() * quantity as f64;
        let exposure = turnover * self.params.exposure_margin_percentage / 100.0;
        let total = span + exposure;
        debug!(
            "margin for {} q={}: span {:.2} + exposure {:.2} = {:.2}",
            spread.id, quantity, span, exposure, total
        );
        total
    }

    /// Adjusted P/L over margin, in percent. Zero when margin is zero.
    pub fn roi(&self, adjusted_pl: f64, margin: f64) -> f64 {
        if margin > 0.0 {
            adjusted_pl / margin * 100.0
        } else {
            0.0
        }
    }

    /// Ranking score: `roi · ln(1 + |adjusted_pl|)`.
    pub fn profitability(&self, roi: f64, adjusted_pl: f64) -> f64 {
        roi * (1.0 + adjusted_pl.abs()).ln()
    }

    /// Largest quantity the capital supports at the unit margin, scaled by
    /// the safety factor and clamped to at least one.
    pub fn max_quantity(&self, margin_per_unit: f64) -> u64 {
        if margin_per_unit <= 0.0 {
            return 1;
        }
        let raw = (self.params.capital / margin_per_unit).floor();
        let scaled = (raw * self.params.capital_safety_factor) as u64;
        scaled.max(1)
    }

    /// ROI floor and loss-versus-capital ceiling.
    pub fn meets_risk(&self, roi: f64, max_loss: f64) -> bool {
        let loss_pct = max_loss / self.params.capital * 100.0;
        roi >= self.params.min_roi && loss_pct <= self.params.max_loss_percentage
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use boxarb_models::{Instrument, OptionKind, OptionTerms, QuoteSnapshot, Security};
    use chrono::NaiveDate;

    fn leg(strike: f64, kind: OptionKind, last: f64) -> Instrument {
        Instrument {
            token: (strike as u64) * 10 + if kind == OptionKind::Call { 1 } else { 2 },
            tradingsymbol: format!("NIFTY24JUN{}{}", strike as u64, kind.symbol_suffix()),
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

    /// net premium = -30 + 50 - 90 + 40 = -30 (debit).
    fn debit_spread() -> BoxSpread {
        BoxSpread::new(
            "NIFTY",
            "NFO",
            18000.0,
            18100.0,
            NaiveDate::from_ymd_opt(2024, 6, 27).unwrap(),
            leg(18000.0, OptionKind::Call, 30.0),
            leg(18100.0, OptionKind::Call, 50.0),
            leg(18100.0, OptionKind::Put, 90.0),
            leg(18000.0, OptionKind::Put, 40.0),
        )
    }

    /// net premium = -30 + 95 - 90 + 40 = +15 (credit).
    fn credit_spread() -> BoxSpread {
        BoxSpread::new(
            "NIFTY",
            "NFO",
            18000.0,
            18100.0,
            NaiveDate::from_ymd_opt(2024, 6, 27).unwrap(),
            leg(18000.0, OptionKind::Call, 30.0),
            leg(18100.0, OptionKind::Call, 95.0),
            leg(18100.0, OptionKind::Put, 90.0),
            leg(18000.0, OptionKind::Put, 40.0),
        )
    }

    #[test]
    fn max_loss_for_net_debit_is_premium_paid() {
        let calc = RiskCalculator::new(RiskParams::default());
        assert_eq!(calc.max_loss(&debit_spread(), 10, 12.0, 3.0), 300.0);
    }

    #[test]
    fn max_loss_for_net_credit_is_friction() {
        let calc = RiskCalculator::new(RiskParams::default());
        assert_eq!(calc.max_loss(&credit_spread(), 10, 12.0, 3.0), 150.0);
    }

    #[test]
    fn margin_is_buffered_loss_plus_exposure() {
        let calc = RiskCalculator::new(RiskParams::default());
        let spread = debit_spread();
        let margin = calc.margin_required(&spread, 10, 0.0, 0.0);
        // span = 300 * 1.25 = 375; exposure = 2100 * 0.03 = 63.
        assert!((margin - 438.0).abs() < 1e-9);
    }

    #[test]
    fn roi_and_profitability() {
        let calc = RiskCalculator::new(RiskParams::default());
        assert_eq!(calc.roi(50.0, 0.0), 0.0);
        assert!((calc.roi(50.0, 1000.0) - 5.0).abs() < 1e-12);

        let score = calc.profitability(5.0, 50.0);
        assert!((score - 5.0 * (51.0f64).ln()).abs() < 1e-12);
        // Same ROI, bigger absolute profit, better score.
        assert!(calc.profitability(5.0, 500.0) > score);
    }

    #[test]
    fn max_quantity_applies_safety_factor_and_floor() {
        let calc = RiskCalculator::new(RiskParams::default());
        // 75000 / 438 = 171.2 -> 171 * 0.9 = 153.9 -> 153
        assert_eq!(calc.max_quantity(438.0), 153);
        // Margin larger than capital still yields one unit.
        assert_eq!(calc.max_quantity(1_000_000.0), 1);
        assert_eq!(calc.max_quantity(0.0), 1);
    }

    #[test]
    fn risk_gate_checks_roi_and_loss_share() {
        let calc = RiskCalculator::new(RiskParams::default());
        // capital 75000, max loss 2% -> 1500 ceiling.
        assert!(calc.meets_risk(1.0, 1000.0));
        assert!(!calc.meets_risk(0.2, 1000.0)); // roi below 0.5 floor
        assert!(!calc.meets_risk(1.0, 2000.0)); // loss above ceiling
    }

    #[test]
    fn roi_floor_comes_from_the_strategy_section() {
        let settings = boxarb_core::Settings::from_value(serde_json::json!({
            "strategy": { "min_roi": 2.0 },
            "risk": { "max_loss_percentage": 5.0 }
        }));
        let calc = RiskCalculator::new(RiskParams::from_settings(&settings));
        // The same knob that drives the evaluator filter drives the gate.
        assert!(!calc.meets_risk(1.0, 100.0));
        assert!(calc.meets_risk(2.5, 100.0));
        assert_eq!(calc.params().max_loss_percentage, 5.0);
    }
}
