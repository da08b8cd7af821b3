//! # Fees, Margin, and Profitability
//!
//! Pre-trade economics for box-spread candidates: the exchange/broker fee
//! stack on one side, and the SPAN-style margin estimate with its derived
//! ROI and profitability score on the other. Both read their percentages
//! from configuration with NSE-realistic defaults, so a fee-schedule change
//! is a config edit, not a release.

pub mod fees;
pub mod margin;

pub use fees::{FeeBreakdown, FeeCalculator, FeeSchedule};
pub use margin::{RiskCalculator, RiskParams};
