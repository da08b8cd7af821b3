//! # Batched Quote Retrieval
//!
//! Level-2 quote, LTP, and OHLC fetchers over the Kite quote endpoints.
//!
//! ## Description
//! Inputs are split into chunks of at most `api/quote_batch_size` tokens
//! (default 250, hard-capped at the upstream maximum of 500). Chunks are
//! dispatched concurrently; each one passes rate-limit admission once, then
//! issues a single GET with repeated `i=<token>` params, so the limiter —
//! not request serialization — is the only pacing. Tokens missing from the
//! response are omitted silently; a malformed per-token entry logs a warning
//! and the batch continues. On success the parsed fields are merged into the
//! instrument store so later cache reads see the fresh snapshot.

use crate::error::{ConnectorError, Result};
use crate::instruments::InstrumentStore;
use crate::kite::KiteClient;
use boxarb_core::Settings;
use boxarb_models::{DepthLevel, Instrument, QuoteSnapshot};
use futures::future;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, warn};

/// Upstream hard cap on instruments per quote request.
const BATCH_HARD_CAP: usize = 500;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Ohlc {
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
}

pub struct QuoteFetcher {
    client: Arc<KiteClient>,
    store: Arc<InstrumentStore>,
    settings: Arc<Settings>,
}

impl QuoteFetcher {
    pub fn new(
        client: Arc<KiteClient>,
        store: Arc<InstrumentStore>,
        settings: Arc<Settings>,
    ) -> Self {
        Self { client, store, settings }
    }

    fn batch_size(&self) -> usize {
        let configured = self.settings.get_i64("api/quote_batch_size", 250);
        (configured.max(1) as usize).min(BATCH_HARD_CAP)
    }

    /// Dispatches one endpoint's chunks concurrently and pairs each chunk
    /// with its outcome. A failed chunk is logged and surfaces as an empty
    /// contribution; an invalid session fails the whole call.
    async fn fetch_chunks<'a>(
        &self,
        endpoint: &str,
        tokens: &'a [u64],
    ) -> Result<Vec<(&'a [u64], Option<Value>)>> {
        let chunks: Vec<&[u64]> = tokens.chunks(self.batch_size()).collect();
        let outcomes = future::join_all(
            chunks.iter().map(|chunk| self.fetch_chunk(endpoint, chunk)),
        )
        .await;

        let mut fetched = Vec::with_capacity(chunks.len());
        for (chunk, outcome) in chunks.into_iter().zip(outcomes) {
            match outcome {
                Ok(data) => fetched.push((chunk, Some(data))),
                Err(ConnectorError::AuthInvalid) => return Err(ConnectorError::AuthInvalid),
                Err(e) => {
                    warn!(
                        "{} batch of {} tokens failed: {}",
                        endpoint,
                        chunk.len(),
                        e
                    );
                    fetched.push((chunk, None));
                }
            }
        }
        Ok(fetched)
    }

    /// Full level-2 quotes. The returned instruments are the store's merged
    /// records, so static contract terms are present where the store knows
    /// the token.
    pub async fn quotes(&self, tokens: &[u64]) -> Result<HashMap<u64, Instrument>> {
        let mut result = HashMap::new();
        for (chunk, data) in self.fetch_chunks("/quote", tokens).await? {
            let Some(data) = data else { continue };
            for &token in chunk {
                let Some(entry) = data.get(&token.to_string()) else {
                    continue;
                };
                match parse_quote_snapshot(entry) {
                    Some(snapshot) => {
                        let merged = self.store.merge_quote(token, snapshot);
                        result.insert(token, merged);
                    }
                    None => warn!("malformed quote entry for token {}", token),
                }
            }
        }
        debug!("got quotes for {}/{} instruments", result.len(), tokens.len());
        Ok(result)
    }

    /// Last traded prices only.
    pub async fn ltps(&self, tokens: &[u64]) -> Result<HashMap<u64, f64>> {
        let mut result = HashMap::new();
        for (chunk, data) in self.fetch_chunks("/quote/ltp", tokens).await? {
            let Some(data) = data else { continue };
            for &token in chunk {
                let Some(entry) = data.get(&token.to_string()) else {
                    continue;
                };
                match entry.get("last_price").and_then(Value::as_f64) {
                    Some(ltp) => {
                        self.store.update_ltp(token, ltp);
                        result.insert(token, ltp);
                    }
                    None => warn!("malformed ltp entry for token {}", token),
                }
            }
        }
        Ok(result)
    }

    /// Open/high/low/close blocks.
    pub async fn ohlcs(&self, tokens: &[u64]) -> Result<HashMap<u64, Ohlc>> {
        let mut result = HashMap::new();
        for (chunk, data) in self.fetch_chunks("/quote/ohlc", tokens).await? {
            let Some(data) = data else { continue };
            for &token in chunk {
                let Some(entry) = data.get(&token.to_string()) else {
                    continue;
                };
                match parse_ohlc(entry) {
                    Some(ohlc) => {
                        self.store
                            .update_ohlc(token, ohlc.open, ohlc.high, ohlc.low, ohlc.close);
                        result.insert(token, ohlc);
                    }
                    None => warn!("malformed ohlc entry for token {}", token),
                }
            }
        }
        Ok(result)
    }

    /// Spot price of the underlying: symbol lookup on the cash exchange, then
    /// a single-token LTP call.
    pub async fn spot_price(&self, underlying: &str, exchange: &str) -> Result<f64> {
        let instrument = self
            .store
            .by_symbol(underlying, exchange)
            .await?
            .ok_or_else(|| {
                ConnectorError::Parse(format!("no spot instrument for {underlying}:{exchange}"))
            })?;
        let ltps = self.ltps(&[instrument.token]).await?;
        ltps.get(&instrument.token).copied().ok_or_else(|| {
            ConnectorError::Parse(format!("no ltp returned for {underlying}:{exchange}"))
        })
    }

    async fn fetch_chunk(&self, endpoint: &str, chunk: &[u64]) -> Result<Value> {
        let params: Vec<(String, String)> = chunk
            .iter()
            .map(|token| ("i".to_string(), token.to_string()))
            .collect();
        self.client.get_json(endpoint, &params).await
    }
}

/// Parses one per-token object of a `/quote` response.
pub(crate) fn parse_quote_snapshot(entry: &Value) -> Option<QuoteSnapshot> {
    if !entry.is_object() {
        return None;
    }
    let mut snapshot = QuoteSnapshot {
        last_price: entry.get("last_price").and_then(Value::as_f64)?,
        average_price: entry.get("average_price").and_then(Value::as_f64).unwrap_or(0.0),
        volume: entry.get("volume").and_then(Value::as_u64).unwrap_or(0),
        buy_quantity: entry.get("buy_quantity").and_then(Value::as_u64).unwrap_or(0),
        sell_quantity: entry.get("sell_quantity").and_then(Value::as_u64).unwrap_or(0),
        open_interest: entry.get("open_interest").and_then(Value::as_f64).unwrap_or(0.0),
        ..QuoteSnapshot::default()
    };

    if let Some(ohlc) = entry.get("ohlc") {
        snapshot.open = ohlc.get("open").and_then(Value::as_f64).unwrap_or(0.0);
        snapshot.high = ohlc.get("high").and_then(Value::as_f64).unwrap_or(0.0);
        snapshot.low = ohlc.get("low").and_then(Value::as_f64).unwrap_or(0.0);
        snapshot.close = ohlc.get("close").and_then(Value::as_f64).unwrap_or(0.0);
    }

    if let Some(depth) = entry.get("depth") {
        snapshot.depth.buy = parse_ladder(depth.get("buy"));
        snapshot.depth.sell = parse_ladder(depth.get("sell"));
    }

    Some(snapshot)
}

/// Ladder arrays keep the upstream order: best price first.
fn parse_ladder(side: Option<&Value>) -> Vec<DepthLevel> {
    let Some(Value::Array(levels)) = side else {
        return Vec::new();
    };
    levels
        .iter()
        .map(|level| DepthLevel {
            price: level.get("price").and_then(Value::as_f64).unwrap_or(0.0),
            quantity: level.get("quantity").and_then(Value::as_u64).unwrap_or(0),
            orders: level.get("orders").and_then(Value::as_u64).unwrap_or(0) as u32,
        })
        .collect()
}

fn parse_ohlc(entry: &Value) -> Option<Ohlc> {
    let ohlc = entry.get("ohlc")?;
    Some(Ohlc {
        open: ohlc.get("open").and_then(Value::as_f64)?,
        high: ohlc.get("high").and_then(Value::as_f64)?,
        low: ohlc.get("low").and_then(Value::as_f64)?,
        close: ohlc.get("close").and_then(Value::as_f64)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parses_full_quote_with_depth() {
        let entry = json!({
            "last_price": 31.5,
            "average_price": 30.9,
            "volume": 125000,
            "buy_quantity": 4200,
            "sell_quantity": 3900,
            "open_interest": 1500000.0,
            "ohlc": {"open": 29.0, "high": 33.2, "low": 28.4, "close": 30.1},
            "depth": {
                "buy": [
                    {"price": 31.4, "quantity": 150, "orders": 3},
                    {"price": 31.3, "quantity": 600, "orders": 9}
                ],
                "sell": [
                    {"price": 31.6, "quantity": 200, "orders": 4}
                ]
            }
        });
        let snapshot = parse_quote_snapshot(&entry).unwrap();
        assert_eq!(snapshot.last_price, 31.5);
        assert_eq!(snapshot.high, 33.2);
        assert_eq!(snapshot.volume, 125000);
        assert_eq!(snapshot.depth.buy.len(), 2);
        // Upstream order preserved: best bid first.
        assert_eq!(snapshot.depth.buy[0].price, 31.4);
        assert_eq!(snapshot.depth.buy[0].orders, 3);
        assert_eq!(snapshot.depth.sell[0].quantity, 200);
    }

    #[test]
    fn missing_last_price_is_malformed() {
        assert!(parse_quote_snapshot(&json!({"volume": 10})).is_none());
        assert!(parse_quote_snapshot(&json!("not an object")).is_none());
    }

    #[test]
    fn absent_depth_yields_empty_ladders() {
        let snapshot = parse_quote_snapshot(&json!({"last_price": 10.0})).unwrap();
        assert!(snapshot.depth.buy.is_empty());
        assert!(snapshot.depth.sell.is_empty());
    }

    #[test]
    fn parses_ohlc_entry() {
        let entry = json!({"last_price": 10.0, "ohlc": {"open": 1.0, "high": 2.0, "low": 0.5, "close": 1.5}});
        let ohlc = parse_ohlc(&entry).unwrap();
        assert_eq!(ohlc, Ohlc { open: 1.0, high: 2.0, low: 0.5, close: 1.5 });
        assert!(parse_ohlc(&json!({"last_price": 10.0})).is_none());
    }
}
