//! # Core Data Model for the Box-Spread Scanner
//!
//! Shared types describing the tradable universe and the 4-leg box-spread
//! candidate that the scanner prices and ranks.
//!
//! ## Description
//! This crate is the dependency-free foundation of the workspace. It defines:
//! - **Instruments**: one record per exchange-traded contract, with the
//!   option/future contract terms carried in a tagged `Security` variant and
//!   the live quote snapshot (LTP, OHLC, volumes, L2 depth) alongside.
//! - **Box spreads**: the four-leg synthetic whose payoff at expiry equals the
//!   strike difference, plus the derived economics the evaluator fills in.
//! - **Orders**: request/response types matching the Kite Connect order API.
//! - **Calendar**: NSE expiry-date arithmetic (Thursday cycles).

pub mod calendar;
pub mod instrument;
pub mod order;
pub mod spread;

pub use instrument::{DepthLevel, Instrument, MarketDepth, OptionKind, OptionTerms, QuoteSnapshot, Security};
pub use spread::{BoxSpread, SpreadMetrics};
