//! # Fee Calculator
//!
//! Transaction costs for a four-leg box at a given quantity, per the NSE
//! options fee stack:
//!
//! | Component | Base | Default |
//! |---|---|---|
//! | Brokerage | turnover, capped at flat per-order | 0.03%, ₹20 × 4 legs |
//! | STT | sell-leg premium only | 0.05% |
//! | Exchange charges | turnover | 0.00053% |
//! | GST | brokerage + exchange charges | 18% |
//! | SEBI charges | turnover | ₹10 per crore |
//! | Stamp duty | buy-leg premium only | 0.003% |
//!
//! Turnover is the sum of all four last prices times quantity.

use boxarb_core::Settings;
use boxarb_models::BoxSpread;
use serde::Serialize;
use tracing::debug;

/// Fee percentages and caps, overridable under `fees/*`.
#[derive(Debug, Clone)]
pub struct FeeSchedule {
    /// Brokerage as a percentage of turnover.
    pub brokerage_percentage: f64,
    /// Flat brokerage cap per executed order.
    pub max_brokerage_per_order: f64,
    /// Securities transaction tax, sell side only.
    pub stt_percentage: f64,
    /// Exchange transaction charges on turnover.
    pub exchange_charges_percentage: f64,
    /// GST on brokerage + exchange charges.
    pub gst_percentage: f64,
    /// SEBI charges in rupees per crore of turnover.
    pub sebi_charges_per_crore: f64,
    /// Stamp duty, buy side only.
    pub stamp_duty_percentage: f64,
}

impl Default for FeeSchedule {
    fn default() -> Self {
        Self {
            brokerage_percentage: 0.03,
            max_brokerage_per_order: 20.0,
            stt_percentage: 0.05,
            exchange_charges_percentage: 0.00053,
            gst_percentage: 18.0,
            sebi_charges_per_crore: 10.0,
            stamp_duty_percentage: 0.003,
        }
    }
}

impl FeeSchedule {
    pub fn from_settings(settings: &Settings) -> Self {
        let d = Self::default();
        Self {
            brokerage_percentage: settings.get_f64("fees/brokerage_percentage", d.brokerage_percentage),
            max_brokerage_per_order: settings.get_f64("fees/max_brokerage_per_order", d.max_brokerage_per_order),
            stt_percentage: settings.get_f64("fees/stt_percentage", d.stt_percentage),
            exchange_charges_percentage: settings.get_f64("fees/exchange_charges_percentage", d.exchange_charges_percentage),
            gst_percentage: settings.get_f64("fees/gst_percentage", d.gst_percentage),
            sebi_charges_per_crore: settings.get_f64("fees/sebi_charges_per_crore", d.sebi_charges_per_crore),
            stamp_duty_percentage: settings.get_f64("fees/stamp_duty_percentage", d.stamp_duty_percentage),
        }
    }
}

/// Per-component fee totals for one candidate at one quantity.
#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct FeeBreakdown {
    pub brokerage: f64,
    pub stt: f64,
    pub exchange_charges: f64,
    pub gst: f64,
    pub sebi_charges: f64,
    pub stamp_duty: f64,
}

impl FeeBreakdown {
    pub fn total(&self) -> f64 {
        self.brokerage
            + self.stt
            + self.exchange_charges
            + self.gst
            + self.sebi_charges
            + self.stamp_duty
    }
}

pub struct FeeCalculator {
    schedule: FeeSchedule,
}

impl FeeCalculator {
    pub fn new(schedule: FeeSchedule) -> Self {
        Self { schedule }
    }

    /// Premium turnover across all four legs.
    pub fn turnover(&self, spread: &BoxSpread, quantity: u64) -> f64 {
        spread.leg_last_sum() * quantity as f64
    }

    pub fn calculate(&self, spread: &BoxSpread, quantity: u64) -> FeeBreakdown {
        let q = quantity as f64;
        let s = &self.schedule;
        let turnover = self.turnover(spread, quantity);

        // Percentage brokerage, capped at the flat rate for four orders.
        let brokerage = (turnover * s.brokerage_percentage / 100.0)
            .min(4.0 * s.max_brokerage_per_order);

        // STT hits the two sell legs only.
        let sell_turnover = (spread.short_call_higher.quote.last_price
            + spread.short_put_lower.quote.last_price)
            * q;
        let stt = sell_turnover * s.stt_percentage / 100.0;

        let exchange_charges = turnover * s.exchange_charges_percentage / 100.0;
        let gst = (brokerage + exchange_charges) * s.gst_percentage / 100.0;
        let sebi_charges = turnover * s.sebi_charges_per_crore / 1.0e7;

        // Stamp duty hits the two buy legs only.
        let buy_turnover = (spread.long_call_lower.quote.last_price
            + spread.long_put_higher.quote.last_price)
            * q;
        let stamp_duty = buy_turnover * s.stamp_duty_percentage / 100.0;

        let breakdown = FeeBreakdown {
            brokerage,
            stt,
            exchange_charges,
            gst,
            sebi_charges,
            stamp_duty,
        };
        debug!(
            "fees for {}: total {:.2} (brokerage {:.2}, stt {:.2}, exch {:.4}, gst {:.2}, sebi {:.4}, stamp {:.4})",
            spread.id,
            breakdown.total(),
            brokerage,
            stt,
            exchange_charges,
            gst,
            sebi_charges,
            stamp_duty
        );
        breakdown
    }
}
