//! # Combination Evaluator
//!
//! Enumerates every admissible strike pair for one expiry, fans pricing out
//! over the worker pool, and emits survivors ranked by profitability.
//!
//! ## Pipeline for one (underlying, exchange, expiry)
//! 1. Strike set within a spot-relative band (unbounded if spot fails).
//! 2. Pair enumeration bounded by the configured strike-difference window.
//! 3. Parallel call/put leg resolution on the pool, cached per strike.
//! 4. One batched quote preload for the union of leg tokens.
//! 5. Sharded evaluation: workers pull adaptive batches off a shared queue,
//!    price each candidate, and aggregate survivors under a results lock.
//! 6. Threshold filter and profitability-descending rank (id tie-break, so
//!    identical inputs always produce identical output).
//!
//! Network fetches run on the async runtime; pricing runs on pool threads
//! via `spawn_blocking`, so a slow quote batch never occupies a pool slot.

use crate::chain;
use crate::pricing;
use boxarb_connectors::{ConnectorError, InstrumentStore, QuoteFetcher};
use boxarb_core::{PoolError, Settings, WorkerPool};
use boxarb_models::{BoxSpread, Instrument, SpreadMetrics};
use boxarb_risk::{FeeCalculator, FeeSchedule, RiskCalculator, RiskParams};
use chrono::NaiveDate;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{debug, info, warn};

#[derive(Debug, Error)]
pub enum ScanError {
    #[error(transparent)]
    Connector(#[from] ConnectorError),
    #[error(transparent)]
    Pool(#[from] PoolError),
    #[error("background task failed: {0}")]
    Task(String),
}

/// Largest batch a worker pulls from the shared queue in one lock hold.
const MAX_EVAL_BATCH: usize = 50;

/// Progress log cadence for the monitor thread.
const PROGRESS_INTERVAL: Duration = Duration::from_secs(5);

struct EvalCaches {
    /// Composite key → sorted strike set.
    strikes: HashMap<String, Vec<f64>>,
    /// Composite key → (call, put) for one strike.
    pairs: HashMap<String, (Instrument, Instrument)>,
}

pub struct CombinationScanner {
    settings: Arc<Settings>,
    store: Arc<InstrumentStore>,
    quotes: Arc<QuoteFetcher>,
    pool: Arc<WorkerPool>,
    caches: Mutex<EvalCaches>,
}

impl CombinationScanner {
    pub fn new(
        settings: Arc<Settings>,
        store: Arc<InstrumentStore>,
        quotes: Arc<QuoteFetcher>,
        pool: Arc<WorkerPool>,
    ) -> Self {
        Self {
            settings,
            store,
            quotes,
            pool,
            caches: Mutex::new(EvalCaches {
                strikes: HashMap::new(),
                pairs: HashMap::new(),
            }),
        }
    }

    /// Full pipeline for one expiry. Returns the ranked survivors.
    pub async fn scan_expiry(
        self: &Arc<Self>,
        underlying: &str,
        exchange: &str,
        expiry: NaiveDate,
    ) -> Result<Vec<BoxSpread>, ScanError> {
        info!("scanning {}:{} expiry {}", underlying, exchange, expiry);

        let strikes = self.strike_set_cached(underlying, exchange, expiry).await?;
        if strikes.len() < 2 {
            warn!("not enough strikes ({}) to form a box spread", strikes.len());
            return Ok(Vec::new());
        }

        let min_diff = self.settings.get_f64("strategy/min_strike_diff", 100.0);
        let max_diff = self.settings.get_f64("strategy/max_strike_diff", 1000.0);
        let pairs = enumerate_pairs(&strikes, min_diff, max_diff);
        info!(
            "generated {} strike pairs from {} strikes (diff {} - {})",
            pairs.len(),
            strikes.len(),
            min_diff,
            max_diff
        );
        if pairs.is_empty() {
            return Ok(Vec::new());
        }

        // Leg resolution scans a universe snapshot on pool threads.
        let instruments = Arc::new(self.store.all().await?);
        let legs = {
            let this = Arc::clone(self);
            let underlying = underlying.to_string();
            let exchange = exchange.to_string();
            let strikes = strikes.clone();
            tokio::task::spawn_blocking(move || {
                this.resolve_legs(&instruments, &underlying, &exchange, expiry, &strikes)
            })
            .await
            .map_err(|e| ScanError::Task(e.to_string()))??
        };
        if legs.is_empty() {
            warn!("no call/put pairs resolved for expiry {}", expiry);
            return Ok(Vec::new());
        }

        // One preload for every leg the pairs could touch.
        let mut tokens: Vec<u64> = legs
            .values()
            .flat_map(|(call, put)| [call.token, put.token])
            .collect();
        tokens.sort_unstable();
        tokens.dedup();
        info!("preloading quotes for {} legs", tokens.len());
        let quotes_map = Arc::new(self.quotes.quotes(&tokens).await?);

        let evaluated = {
            let this = Arc::clone(self);
            let underlying = underlying.to_string();
            let exchange = exchange.to_string();
            let legs = Arc::new(legs);
            tokio::task::spawn_blocking(move || {
                this.evaluate_pairs(&underlying, &exchange, expiry, pairs, legs, quotes_map)
            })
            .await
            .map_err(|e| ScanError::Task(e.to_string()))??
        };

        let ranked = self.filter_and_rank(evaluated);
        info!("expiry {} produced {} ranked candidates", expiry, ranked.len());
        Ok(ranked)
    }

    /// Drops strike-set and leg-pair caches. The only invalidation path.
    pub fn clear_caches(&self) {
        let mut caches = self.caches.lock().unwrap_or_else(|e| e.into_inner());
        caches.strikes.clear();
        caches.pairs.clear();
        info!("evaluator caches cleared");
    }

    async fn strike_set_cached(
        &self,
        underlying: &str,
        exchange: &str,
        expiry: NaiveDate,
    ) -> Result<Vec<f64>, ScanError> {
        let key = strikes_cache_key(underlying, exchange, expiry);
        {
            let caches = self.caches.lock().unwrap_or_else(|e| e.into_inner());
            if let Some(strikes) = caches.strikes.get(&key) {
                debug!("using cached strike set for {}", key);
                return Ok(strikes.clone());
            }
        }

        let band = match self.quotes.spot_price(underlying, "NSE").await {
            Ok(spot) => {
                let range = self.settings.get_f64("option_chain/strike_range_percent", 5.0);
                chain::strike_band(spot, range)
            }
            Err(e) => {
                warn!("spot fetch failed ({}), using unbounded strike range", e);
                None
            }
        };

        let instruments = self.store.all().await?;
        let strikes = chain::strike_set(&instruments, underlying, exchange, expiry, band);
        info!("found {} strikes for {}:{} expiry {}", strikes.len(), underlying, exchange, expiry);

        let mut caches = self.caches.lock().unwrap_or_else(|e| e.into_inner());
        caches.strikes.insert(key, strikes.clone());
        Ok(strikes)
    }

    /// Resolves the (call, put) pair for each strike, in parallel on the
    /// pool. Hits the pair cache first; misses are computed and cached.
    fn resolve_legs(
        &self,
        instruments: &Arc<Vec<Instrument>>,
        underlying: &str,
        exchange: &str,
        expiry: NaiveDate,
        strikes: &[f64],
    ) -> Result<HashMap<i64, (Instrument, Instrument)>, ScanError> {
        let mut resolved = HashMap::new();
        let mut missing = Vec::new();
        {
            let caches = self.caches.lock().unwrap_or_else(|e| e.into_inner());
            for &strike in strikes {
                let key = pair_cache_key(underlying, exchange, expiry, strike);
                match caches.pairs.get(&key) {
                    Some(pair) => {
                        resolved.insert(strike_key(strike), pair.clone());
                    }
                    None => missing.push(strike),
                }
            }
        }
        if missing.is_empty() {
            return Ok(resolved);
        }
        debug!("resolving legs for {} strikes on the pool", missing.len());

        let mut handles = Vec::with_capacity(missing.len());
        for &strike in &missing {
            let instruments = Arc::clone(instruments);
            let underlying = underlying.to_string();
            let exchange = exchange.to_string();
            handles.push(self.pool.submit(move || {
                chain::resolve_pair(&instruments, &underlying, &exchange, expiry, strike)
                    .map(|pair| (strike, pair))
            })?);
        }

        let mut fresh = Vec::new();
        for handle in handles {
            if let Some((strike, pair)) = handle.wait()? {
                fresh.push((strike, pair));
            }
        }

        let mut caches = self.caches.lock().unwrap_or_else(|e| e.into_inner());
        for (strike, pair) in fresh {
            caches
                .pairs
                .insert(pair_cache_key(underlying, exchange, expiry, strike), pair.clone());
            resolved.insert(strike_key(strike), pair);
        }
        Ok(resolved)
    }

    /// Sharded evaluation of all pairs. Workers pull adaptive batches from a
    /// shared queue; a monitor thread reports progress every few seconds.
    fn evaluate_pairs(
        &self,
        underlying: &str,
        exchange: &str,
        expiry: NaiveDate,
        pairs: Vec<(f64, f64)>,
        legs: Arc<HashMap<i64, (Instrument, Instrument)>>,
        quotes: Arc<HashMap<u64, Instrument>>,
    ) -> Result<Vec<BoxSpread>, ScanError> {
        let total = pairs.len();
        let quantity = self.settings.get_i64("strategy/quantity", 1).max(1) as u64;
        let worst_case_pct = self.settings.get_f64("strategy/worst_case_slippage_percent", 5.0);
        let fees = Arc::new(FeeCalculator::new(FeeSchedule::from_settings(&self.settings)));
        let risk = Arc::new(RiskCalculator::new(RiskParams::from_settings(&self.settings)));

        let queue = Arc::new(Mutex::new(pairs.into_iter().collect::<VecDeque<_>>()));
        let results = Arc::new(Mutex::new(Vec::new()));
        let processed = Arc::new(AtomicUsize::new(0));
        let done = Arc::new(AtomicBool::new(false));

        let monitor = spawn_progress_monitor(Arc::clone(&processed), Arc::clone(&done), total);

        let threads = self.pool.thread_count().max(1);
        let mut handles = Vec::with_capacity(threads);
        let mut first_error = None;
        for _ in 0..threads {
            let queue = Arc::clone(&queue);
            let results = Arc::clone(&results);
            let processed = Arc::clone(&processed);
            let legs = Arc::clone(&legs);
            let quotes = Arc::clone(&quotes);
            let fees = Arc::clone(&fees);
            let risk = Arc::clone(&risk);
            let underlying = underlying.to_string();
            let exchange = exchange.to_string();

            let submitted = self.pool.submit(move || {
                loop {
                    let batch: Vec<(f64, f64)> = {
                        let mut queue = queue.lock().unwrap_or_else(|e| e.into_inner());
                        let remaining = queue.len();
                        if remaining == 0 {
                            break;
                        }
                        let size = (remaining / threads).clamp(1, MAX_EVAL_BATCH);
                        queue.drain(..size.min(remaining)).collect()
                    };

                    for (lower, higher) in batch {
                        if let Some(spread) = build_candidate(
                            &underlying, &exchange, expiry, lower, higher, &legs, &quotes,
                        ) {
                            let spread =
                                analyze(spread, quantity, worst_case_pct, &fees, &risk);
                            results.lock().unwrap_or_else(|e| e.into_inner()).push(spread);
                        }
                        processed.fetch_add(1, Ordering::Relaxed);
                    }
                }
            });
            match submitted {
                Ok(handle) => handles.push(handle),
                Err(e) => {
                    first_error.get_or_insert(e);
                    break;
                }
            }
        }

        for handle in handles {
            if let Err(e) = handle.wait() {
                first_error.get_or_insert(e);
            }
        }
        done.store(true, Ordering::Relaxed);
        let _ = monitor.join();

        if let Some(e) = first_error {
            return Err(e.into());
        }
        let evaluated = {
            let mut results = results.lock().unwrap_or_else(|e| e.into_inner());
            std::mem::take(&mut *results)
        };
        debug!("evaluated {} pairs, {} candidates priceable", total, evaluated.len());
        Ok(evaluated)
    }

    /// Threshold filter plus the deterministic ranking.
    fn filter_and_rank(&self, mut spreads: Vec<BoxSpread>) -> Vec<BoxSpread> {
        let min_roi = self.settings.get_f64("strategy/min_roi", 0.5);
        let min_profitability = self.settings.get_f64("strategy/min_profitability", 0.1);
        let max_slippage = self.settings.get_f64("strategy/max_slippage", 20.0);

        spreads.retain(|s| {
            s.metrics.roi >= min_roi
                && s.metrics.profitability >= min_profitability
                && s.metrics.slippage <= max_slippage
        });
        spreads.sort_by(|a, b| {
            b.metrics
                .profitability
                .partial_cmp(&a.metrics.profitability)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.id.cmp(&b.id))
        });
        spreads
    }
}

/// All (lower, higher) pairs whose difference sits inside the window.
pub(crate) fn enumerate_pairs(strikes: &[f64], min_diff: f64, max_diff: f64) -> Vec<(f64, f64)> {
    let mut pairs = Vec::new();
    for i in 0..strikes.len() {
        for j in (i + 1)..strikes.len() {
            let diff = strikes[j] - strikes[i];
            if diff >= min_diff && diff <= max_diff {
                pairs.push((strikes[i], strikes[j]));
            }
        }
    }
    pairs
}

/// Materializes one candidate from the resolved legs and the quote preload.
/// Returns `None` (silent drop) when a leg is unresolved or market data is
/// incomplete.
fn build_candidate(
    underlying: &str,
    exchange: &str,
    expiry: NaiveDate,
    lower: f64,
    higher: f64,
    legs: &HashMap<i64, (Instrument, Instrument)>,
    quotes: &HashMap<u64, Instrument>,
) -> Option<BoxSpread> {
    let (lower_call, lower_put) = legs.get(&strike_key(lower))?;
    let (higher_call, higher_put) = legs.get(&strike_key(higher))?;

    let attach = |leg: &Instrument| quotes.get(&leg.token).cloned().unwrap_or_else(|| leg.clone());

    let spread = BoxSpread::new(
        underlying,
        exchange,
        lower,
        higher,
        expiry,
        attach(lower_call),
        attach(higher_call),
        attach(higher_put),
        attach(lower_put),
    );
    if !spread.has_complete_market_data() {
        debug!("dropping {}: incomplete market data", spread.id);
        return None;
    }
    Some(spread)
}

/// Prices one candidate: slippage, fees, margin, ROI, profitability.
fn analyze(
    mut spread: BoxSpread,
    quantity: u64,
    worst_case_pct: f64,
    fees: &FeeCalculator,
    risk: &RiskCalculator,
) -> BoxSpread {
    let theoretical_value = spread.theoretical_value();
    let net_premium = spread.net_premium();
    let raw_pl = spread.raw_profit_loss();

    let slippage = pricing::total_slippage(&spread, quantity, worst_case_pct);
    let fee_total = fees.calculate(&spread, quantity).total();
    let margin = risk.margin_required(&spread, quantity, fee_total, slippage);

    let adjusted_pl = raw_pl - slippage - fee_total;
    let roi = risk.roi(adjusted_pl, margin);
    let profitability = risk.profitability(roi, adjusted_pl);
    let max_loss = risk.max_loss(&spread, quantity, fee_total, slippage);
    let max_profit = (adjusted_pl * quantity as f64).max(0.0);

    spread.metrics = SpreadMetrics {
        net_premium,
        theoretical_value,
        slippage,
        fees: fee_total,
        margin,
        roi,
        profitability,
        max_loss,
        max_profit,
    };
    debug!(
        "analyzed {}: roi {:.2}%, pl {:.2}, slippage {:.2}, fees {:.2}, margin {:.2}",
        spread.id, roi, adjusted_pl, slippage, fee_total, margin
    );
    spread
}

fn spawn_progress_monitor(
    processed: Arc<AtomicUsize>,
    done: Arc<AtomicBool>,
    total: usize,
) -> std::thread::JoinHandle<()> {
    let start = Instant::now();
    std::thread::spawn(move || {
        if total == 0 {
            return;
        }
        loop {
            let tick_until = Instant::now() + PROGRESS_INTERVAL;
            while Instant::now() < tick_until {
                if done.load(Ordering::Relaxed) || processed.load(Ordering::Relaxed) >= total {
                    return;
                }
                std::thread::sleep(Duration::from_millis(100));
            }
            let count = processed.load(Ordering::Relaxed);
            let percent = count as f64 / total as f64 * 100.0;
            let eta = if count > 0 {
                let per_item = start.elapsed().as_secs_f64() / count as f64;
                per_item * (total - count) as f64
            } else {
                f64::NAN
            };
            info!(
                "evaluated {}/{} combinations ({:.1}%), eta {:.0}s",
                count, total, percent, eta
            );
        }
    })
}

fn strike_key(strike: f64) -> i64 {
    (strike * 100.0).round() as i64
}

fn strikes_cache_key(underlying: &str, exchange: &str, expiry: NaiveDate) -> String {
    format!("{}:{}:{}:strikes", underlying, exchange, expiry.format("%Y-%m-%d"))
}

fn pair_cache_key(underlying: &str, exchange: &str, expiry: NaiveDate, strike: f64) -> String {
    format!(
        "{}:{}:{}:{:.2}",
        underlying,
        exchange,
        expiry.format("%Y-%m-%d"),
        strike
    )
}
