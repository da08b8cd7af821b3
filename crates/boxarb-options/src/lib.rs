//! # Option-Chain Analysis
//!
//! The scan pipeline's brain: choosing which expiries to look at, pricing
//! execution friction off the visible book, and enumerating + evaluating
//! every admissible strike pair into ranked box-spread candidates.
//!
//! ## Description
//! - [`expiry`]: weekly/monthly classification (NSE last-Thursday rule) and
//!   the recency-window filter, computed in the exchange time zone.
//! - [`pricing`]: depth-walk slippage per leg and the liquidity floor.
//! - [`chain`]: strike-set retrieval with a spot-relative band and call/put
//!   pair resolution.
//! - [`evaluator`]: the parallel combination evaluator that fans pricing out
//!   over the worker pool and emits survivors ranked by profitability.

pub mod chain;
pub mod evaluator;
pub mod expiry;
pub mod pricing;

pub use evaluator::{CombinationScanner, ScanError};
pub use expiry::{ExpiryClass, ExpiryService};
