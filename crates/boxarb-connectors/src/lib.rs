//! # Kite Connect Market Connectors
//!
//! Everything that talks to the broker's REST API lives here: the
//! authenticated HTTP transport, the session/auth state, the instrument
//! universe store with its disk cache, and the batched quote fetchers.
//!
//! ## Kite wire contract (the parts this crate depends on)
//! - `GET /instruments` returns the full universe as CSV.
//! - `GET /quote`, `/quote/ltp`, `/quote/ohlc` accept repeated `i=<token>`
//!   query params and answer with `{status, data, message?}` where `data` is
//!   keyed by token-as-string.
//! - 401/403 invalidates the session; 429 shrinks the rate limiter's budget
//!   for that endpoint.
//!
//! ## References
//! - Kite Connect API: <https://kite.trade/docs/connect/v3/>

pub mod auth;
pub mod error;
pub mod instruments;
pub mod kite;
pub mod quotes;

pub use auth::AuthSession;
pub use error::{ConnectorError, Result};
pub use instruments::InstrumentStore;
pub use kite::KiteClient;
pub use quotes::{Ohlc, QuoteFetcher};
