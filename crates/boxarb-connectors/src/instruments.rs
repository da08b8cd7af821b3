//! # Instrument Store
//!
//! Fetches, parses, persists, and indexes the option universe.
//!
//! ## Description
//! `/instruments` is the heaviest endpoint upstream (whole-universe CSV, rate
//! limited to about one call a minute), so the store works hard to avoid it:
//! the raw CSV is persisted next to the process and honoured while its mtime
//! is inside `api/instruments_cache_ttl_minutes` (default one day). The
//! in-memory cache keeps two indexes — token → instrument and
//! (symbol, exchange) → token — rebuilt together under one lock.
//!
//! ## CSV layout
//! `instrument_token, exchange_token, tradingsymbol, name, last_price,
//! expiry, strike, tick_size, lot_size, instrument_type, segment, exchange`.
//! Rows with fewer than 12 fields are skipped. `CE`/`PE` mark options,
//! `FUT` futures, `EQ`/`INDICES` cash instruments; an `-OPT`/`-FUT` segment
//! suffix overrides the type code. Some weekly rows carry a malformed expiry
//! column; for those the expiry is recovered from the trading symbol.

use crate::error::{ConnectorError, Result};
use crate::kite::KiteClient;
use boxarb_core::Settings;
use boxarb_models::{Instrument, OptionKind, OptionTerms, QuoteSnapshot, Security};
use chrono::NaiveDate;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::SystemTime;
use tracing::{debug, info, warn};

struct StoreCache {
    by_token: HashMap<u64, Instrument>,
    by_symbol: HashMap<(String, String), u64>,
    loaded: bool,
}

pub struct InstrumentStore {
    client: Arc<KiteClient>,
    settings: Arc<Settings>,
    cache: Mutex<StoreCache>,
}

impl InstrumentStore {
    pub fn new(client: Arc<KiteClient>, settings: Arc<Settings>) -> Self {
        Self {
            client,
            settings,
            cache: Mutex::new(StoreCache {
                by_token: HashMap::new(),
                by_symbol: HashMap::new(),
                loaded: false,
            }),
        }
    }

    /// Returns the cached universe, fetching it if stale. The returned list
    /// is sorted by token so downstream iteration is deterministic.
    pub async fn all(&self) -> Result<Vec<Instrument>> {
        if self.disk_cache_fresh() {
            let snapshot = {
                let cache = self.cache.lock().unwrap_or_else(|e| e.into_inner());
                if cache.loaded {
                    Some(cache.by_token.values().cloned().collect::<Vec<_>>())
                } else {
                    None
                }
            };
            if let Some(mut instruments) = snapshot {
                instruments.sort_by_key(|i| i.token);
                return Ok(instruments);
            }

            match std::fs::read_to_string(self.cache_path()) {
                Ok(csv) => {
                    info!("loading instruments from disk cache");
                    let instruments = self.parse_and_index(&csv);
                    if !instruments.is_empty() {
                        return Ok(instruments);
                    }
                    warn!("disk cache parsed to zero instruments, refetching");
                }
                Err(e) => warn!("failed to read instruments cache: {}", e),
            }
        }

        self.fetch_and_index().await
    }

    /// O(1) token lookup, falling back to a universe load on miss.
    pub async fn by_token(&self, token: u64) -> Result<Option<Instrument>> {
        {
            let cache = self.cache.lock().unwrap_or_else(|e| e.into_inner());
            if let Some(instrument) = cache.by_token.get(&token) {
                return Ok(Some(instrument.clone()));
            }
        }
        let instruments = self.all().await?;
        Ok(instruments.into_iter().find(|i| i.token == token))
    }

    /// O(1) (symbol, exchange) lookup, falling back to a universe load.
    pub async fn by_symbol(&self, tradingsymbol: &str, exchange: &str) -> Result<Option<Instrument>> {
        let key = (tradingsymbol.to_string(), exchange.to_string());
        {
            let cache = self.cache.lock().unwrap_or_else(|e| e.into_inner());
            if let Some(token) = cache.by_symbol.get(&key) {
                if let Some(instrument) = cache.by_token.get(token) {
                    return Ok(Some(instrument.clone()));
                }
            }
        }
        let instruments = self.all().await?;
        Ok(instruments
            .into_iter()
            .find(|i| i.tradingsymbol == tradingsymbol && i.exchange == exchange))
    }

    /// Linear filter of the universe by exchange.
    pub async fn by_exchange(&self, exchange: &str) -> Result<Vec<Instrument>> {
        let instruments = self.all().await?;
        Ok(instruments
            .into_iter()
            .filter(|i| i.exchange == exchange)
            .collect())
    }

    /// Forces a refetch from the API, replacing both caches.
    pub async fn refresh(&self) -> Result<usize> {
        info!("forcing refresh of instruments cache");
        let instruments = self.fetch_and_index().await?;
        Ok(instruments.len())
    }

    /// Wipes the in-memory cache and removes the disk cache file.
    pub fn clear(&self) {
        let path = self.cache_path();
        if path.exists() {
            if let Err(e) = std::fs::remove_file(&path) {
                warn!("failed to remove instruments cache file {}: {}", path.display(), e);
            }
        }
        let mut cache = self.cache.lock().unwrap_or_else(|e| e.into_inner());
        cache.by_token.clear();
        cache.by_symbol.clear();
        cache.loaded = false;
        info!("instrument cache cleared");
    }

    /// Merges a full quote snapshot into the cache entry for `token`.
    /// Unknown tokens become new (bare) entries. Returns the merged record.
    pub(crate) fn merge_quote(&self, token: u64, snapshot: QuoteSnapshot) -> Instrument {
        let mut cache = self.cache.lock().unwrap_or_else(|e| e.into_inner());
        let entry = cache
            .by_token
            .entry(token)
            .or_insert_with(|| Instrument::unknown(token));
        entry.quote = snapshot;
        let merged = entry.clone();
        if !merged.tradingsymbol.is_empty() && !merged.exchange.is_empty() {
            cache
                .by_symbol
                .insert((merged.tradingsymbol.clone(), merged.exchange.clone()), token);
        }
        merged
    }

    /// Updates just the last price (LTP endpoint).
    pub(crate) fn update_ltp(&self, token: u64, last_price: f64) {
        let mut cache = self.cache.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(entry) = cache.by_token.get_mut(&token) {
            entry.quote.last_price = last_price;
        }
    }

    /// Updates just the OHLC block.
    pub(crate) fn update_ohlc(&self, token: u64, open: f64, high: f64, low: f64, close: f64) {
        let mut cache = self.cache.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(entry) = cache.by_token.get_mut(&token) {
            entry.quote.open = open;
            entry.quote.high = high;
            entry.quote.low = low;
            entry.quote.close = close;
        }
    }

    async fn fetch_and_index(&self) -> Result<Vec<Instrument>> {
        info!("fetching instruments from API");
        let response = self.client.get("/instruments", &[]).await?;
        if response.status != 200 {
            return Err(ConnectorError::Api {
                status: response.status,
                message: "instrument dump request failed".to_string(),
            });
        }

        if let Err(e) = self.persist_atomic(&response.body) {
            // In-memory cache stays authoritative for the process lifetime.
            warn!("failed to persist instruments cache: {}", e);
        }

        Ok(self.parse_and_index(&response.body))
    }

    fn parse_and_index(&self, csv: &str) -> Vec<Instrument> {
        let underlying_hint = self.settings.get_str("strategy/underlying", "NIFTY");
        let mut instruments = parse_instruments_csv(csv, &underlying_hint);
        instruments.sort_by_key(|i| i.token);

        let mut cache = self.cache.lock().unwrap_or_else(|e| e.into_inner());
        cache.by_token.clear();
        cache.by_symbol.clear();
        for instrument in &instruments {
            cache.by_token.insert(instrument.token, instrument.clone());
            cache.by_symbol.insert(
                (instrument.tradingsymbol.clone(), instrument.exchange.clone()),
                instrument.token,
            );
        }
        cache.loaded = true;
        info!("indexed {} instruments", instruments.len());
        instruments
    }

    fn cache_path(&self) -> PathBuf {
        PathBuf::from(
            self.settings
                .get_str("api/instruments_cache_file", "instruments_cache.csv"),
        )
    }

    fn disk_cache_fresh(&self) -> bool {
        let path = self.cache_path();
        let Ok(metadata) = std::fs::metadata(&path) else {
            return false;
        };
        let Ok(modified) = metadata.modified() else {
            return false;
        };
        let age_minutes = SystemTime::now()
            .duration_since(modified)
            .map(|age| age.as_secs() / 60)
            .unwrap_or(u64::MAX);
        let ttl_minutes = self.settings.get_i64("api/instruments_cache_ttl_minutes", 1440) as u64;
        let fresh = age_minutes < ttl_minutes;
        debug!(
            "instruments cache age {} min, ttl {} min -> {}",
            age_minutes,
            ttl_minutes,
            if fresh { "fresh" } else { "stale" }
        );
        fresh
    }

    /// Writes the CSV to a temp file in the target directory, then renames it
    /// over the cache path so readers never see a half-written file.
    fn persist_atomic(&self, csv: &str) -> std::io::Result<()> {
        let path = self.cache_path();
        let tmp = path.with_extension("csv.tmp");
        std::fs::write(&tmp, csv)?;
        std::fs::rename(&tmp, &path)?;
        info!("persisted instruments cache to {}", path.display());
        Ok(())
    }
}

/// Parses the instruments dump. Bad rows are skipped, not fatal.
pub(crate) fn parse_instruments_csv(csv: &str, underlying_hint: &str) -> Vec<Instrument> {
    let mut instruments = Vec::new();
    let mut options = 0usize;
    let mut futures = 0usize;

    for line in csv.lines().skip(1) {
        let fields: Vec<&str> = line.split(',').collect();
        if fields.len() < 12 {
            continue;
        }
        if let Some(instrument) = parse_row(&fields, underlying_hint) {
            match instrument.security {
                Security::Option(_) => options += 1,
                Security::Future { .. } => futures += 1,
                _ => {}
            }
            instruments.push(instrument);
        }
    }

    info!(
        "parsed {} instruments ({} options, {} futures)",
        instruments.len(),
        options,
        futures
    );
    instruments
}

fn parse_row(fields: &[&str], underlying_hint: &str) -> Option<Instrument> {
    let token: u64 = fields[0].trim_matches('"').parse().ok()?;
    let tradingsymbol = fields[2].trim_matches('"').to_string();
    let name = fields[3].trim_matches('"').to_string();
    let last_price: f64 = fields[4].trim_matches('"').parse().unwrap_or(0.0);
    let expiry_field = fields[5].trim_matches('"');
    let strike: f64 = fields[6].trim_matches('"').parse().unwrap_or(0.0);
    let type_code = fields[9].trim_matches('"');
    let segment = fields[10].trim_matches('"').to_string();
    let exchange = fields[11].trim_matches('"').to_string();

    let mut expiry = NaiveDate::parse_from_str(expiry_field, "%Y-%m-%d").ok();

    let mut kind = match type_code {
        "CE" | "PE" => Some(SecurityKind::Option(OptionKind::from_code(type_code)?)),
        "FUT" => Some(SecurityKind::Future),
        "EQ" => Some(SecurityKind::Equity),
        "INDICES" => Some(SecurityKind::Index),
        _ => None,
    };

    // Segment suffix is more reliable than the type code and overrides it.
    if segment.ends_with("-OPT") {
        if !matches!(kind, Some(SecurityKind::Option(_))) {
            kind = symbol_option_kind(&tradingsymbol).map(SecurityKind::Option);
        }
    } else if segment.ends_with("-FUT") {
        kind = Some(SecurityKind::Future);
    }

    // Symbols of the configured underlying pin the underlying name and can
    // rescue a missing type code.
    let matches_hint = starts_with_ignore_case(&tradingsymbol, underlying_hint);
    if matches_hint && kind.is_none() {
        if let Some(option_kind) = symbol_option_kind(&tradingsymbol) {
            kind = Some(SecurityKind::Option(option_kind));
        } else if tradingsymbol.contains("FUT") {
            kind = Some(SecurityKind::Future);
        }
    }

    let security = match kind {
        Some(SecurityKind::Option(option_kind)) => {
            let underlying = if matches_hint {
                underlying_hint.to_string()
            } else {
                name.clone()
            };
            if expiry.is_none() {
                expiry = expiry_from_symbol(&tradingsymbol, &underlying);
            }
            Security::Option(OptionTerms {
                underlying,
                strike,
                kind: option_kind,
                expiry,
            })
        }
        Some(SecurityKind::Future) => Security::Future { expiry },
        Some(SecurityKind::Equity) => Security::Equity,
        Some(SecurityKind::Index) => Security::Index,
        None => Security::Unknown,
    };

    Some(Instrument {
        token,
        tradingsymbol,
        exchange,
        name,
        segment,
        security,
        quote: QuoteSnapshot {
            last_price,
            ..QuoteSnapshot::default()
        },
    })
}

enum SecurityKind {
    Option(OptionKind),
    Future,
    Equity,
    Index,
}

fn symbol_option_kind(symbol: &str) -> Option<OptionKind> {
    if symbol.ends_with("CE") {
        Some(OptionKind::Call)
    } else if symbol.ends_with("PE") {
        Some(OptionKind::Put)
    } else {
        None
    }
}

fn starts_with_ignore_case(text: &str, prefix: &str) -> bool {
    text.len() >= prefix.len() && text[..prefix.len()].eq_ignore_ascii_case(prefix)
}

/// Recovers an expiry from the trading symbol when the CSV column was
/// malformed. Two shapes occur:
/// - `<UND>YY<MON3>DD…` (`NIFTY23JUN22…`) → that exact date.
/// - `<UND>YYMM…` (`NIFTY2306…`) → the last Thursday of that month.
pub(crate) fn expiry_from_symbol(symbol: &str, underlying: &str) -> Option<NaiveDate> {
    if !starts_with_ignore_case(symbol, underlying) {
        return None;
    }
    let rest = &symbol[underlying.len()..];
    let bytes = rest.as_bytes();
    if bytes.len() < 4 || !bytes[0].is_ascii_digit() || !bytes[1].is_ascii_digit() {
        return None;
    }
    let year = 2000 + rest[0..2].parse::<i32>().ok()?;

    // <UND>YY<MON3>DD…
    if bytes.len() >= 7 && bytes[2].is_ascii_alphabetic() {
        let month = month_from_abbrev(&rest[2..5])?;
        if bytes[5].is_ascii_digit() && bytes[6].is_ascii_digit() {
            let day: u32 = rest[5..7].parse().ok()?;
            return NaiveDate::from_ymd_opt(year, month, day);
        }
        return None;
    }

    // <UND>YYMM… → monthly contract, last Thursday of the month.
    if bytes[2].is_ascii_digit() && bytes[3].is_ascii_digit() {
        let month: u32 = rest[2..4].parse().ok()?;
        if (1..=12).contains(&month) {
            return boxarb_models::calendar::last_thursday_of_month(year, month);
        }
    }
    None
}

fn month_from_abbrev(abbrev: &str) -> Option<u32> {
    match abbrev.to_ascii_uppercase().as_str() {
        "JAN" => Some(1),
        "FEB" => Some(2),
        "MAR" => Some(3),
        "APR" => Some(4),
        "MAY" => Some(5),
        "JUN" => Some(6),
        "JUL" => Some(7),
        "AUG" => Some(8),
        "SEP" => Some(9),
        "OCT" => Some(10),
        "NOV" => Some(11),
        "DEC" => Some(12),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const HEADER: &str = "instrument_token,exchange_token,tradingsymbol,name,last_price,expiry,strike,tick_size,lot_size,instrument_type,segment,exchange";

    fn parse_one(row: &str) -> Instrument {
        let csv = format!("{HEADER}\n{row}");
        let parsed = parse_instruments_csv(&csv, "NIFTY");
        assert_eq!(parsed.len(), 1, "row should parse: {row}");
        parsed.into_iter().next().unwrap()
    }

    #[test]
    fn parses_a_call_option_row() {
        let inst = parse_one(
            "11536642,45065,NIFTY24JUN18000CE,NIFTY,12.5,2024-06-27,18000,0.05,50,CE,NFO-OPT,NFO",
        );
        assert_eq!(inst.token, 11536642);
        assert_eq!(inst.tradingsymbol, "NIFTY24JUN18000CE");
        assert_eq!(inst.exchange, "NFO");
        assert_eq!(inst.quote.last_price, 12.5);
        assert_eq!(inst.strike(), 18000.0);
        assert_eq!(inst.option_kind(), Some(OptionKind::Call));
        assert_eq!(inst.underlying(), Some("NIFTY"));
        assert_eq!(inst.expiry(), NaiveDate::from_ymd_opt(2024, 6, 27));
    }

    #[test]
    fn segment_overrides_type_code() {
        // Bogus type code, but an -FUT segment: treated as a future.
        let inst = parse_one(
            "13368834,52222,NIFTY24JUNFUT,NIFTY,22100.0,2024-06-27,0,0.05,50,XX,NFO-FUT,NFO",
        );
        assert!(matches!(inst.security, Security::Future { .. }));
        assert_eq!(inst.expiry(), NaiveDate::from_ymd_opt(2024, 6, 27));
    }

    #[test]
    fn short_rows_are_skipped() {
        let csv = format!("{HEADER}\n123,45,ABC,abc,1.0");
        assert!(parse_instruments_csv(&csv, "NIFTY").is_empty());
    }

    #[test]
    fn equity_and_index_rows() {
        let eq = parse_one("340481,1330,HDFCBANK,HDFC BANK,1650.0,,0,0.05,1,EQ,NSE,NSE");
        assert!(matches!(eq.security, Security::Equity));

        let idx = parse_one("256265,1001,NIFTY 50,NIFTY 50,22000.0,,0,0.05,1,INDICES,INDICES,NSE");
        assert!(matches!(idx.security, Security::Index));
    }

    #[test]
    fn symbol_fallback_day_form() {
        // Expiry column empty; NIFTY23JUN27 encodes 2023-06-27.
        let inst = parse_one(
            "11111,1,NIFTY23JUN2718500CE,NIFTY,5.0,,18500,0.05,50,CE,NFO-OPT,NFO",
        );
        assert_eq!(inst.expiry(), NaiveDate::from_ymd_opt(2023, 6, 27));
    }

    #[test]
    fn symbol_fallback_month_form_uses_last_thursday() {
        // NIFTY2306… → last Thursday of June 2023 (2023-06-29).
        let inst = parse_one(
            "22222,2,NIFTY230618500PE,NIFTY,7.0,,18500,0.05,50,PE,NFO-OPT,NFO",
        );
        assert_eq!(inst.expiry(), NaiveDate::from_ymd_opt(2023, 6, 29));
    }

    #[test]
    fn expiry_from_symbol_forms() {
        assert_eq!(
            expiry_from_symbol("NIFTY23JUN2218000CE", "NIFTY"),
            NaiveDate::from_ymd_opt(2023, 6, 22)
        );
        assert_eq!(
            expiry_from_symbol("NIFTY230618000CE", "NIFTY"),
            NaiveDate::from_ymd_opt(2023, 6, 29)
        );
        assert_eq!(expiry_from_symbol("BANKNIFTY23JUN22CE", "NIFTY"), None);
        assert_eq!(expiry_from_symbol("NIFTYXX", "NIFTY"), None);
    }

    #[test]
    fn hint_prefix_pins_underlying() {
        // name column differs, but the symbol carries the configured prefix.
        let inst = parse_one(
            "33333,3,nifty24JUN18000CE,SOMETHING,1.0,2024-06-27,18000,0.05,50,CE,NFO-OPT,NFO",
        );
        assert_eq!(inst.underlying(), Some("NIFTY"));
    }

    mod store {
        use super::*;
        use crate::auth::AuthSession;
        use boxarb_core::RateLimiter;
        use serde_json::json;

        fn offline_store(cache_file: &std::path::Path) -> InstrumentStore {
            let settings = Arc::new(Settings::from_value(json!({
                "strategy": { "underlying": "NIFTY" },
                "api": {
                    "key": "k", "secret": "s",
                    "instruments_cache_file": cache_file.to_str().unwrap(),
                    "instruments_cache_ttl_minutes": 1440,
                }
            })));
            let auth = Arc::new(AuthSession::from_settings(Arc::clone(&settings)));
            let limiter = Arc::new(RateLimiter::new());
            let client = Arc::new(KiteClient::new(&settings, auth, limiter).unwrap());
            InstrumentStore::new(client, settings)
        }

        fn sample_csv() -> String {
            format!(
                "{HEADER}\n\
                 11536642,45065,NIFTY24JUN18000CE,NIFTY,12.5,2024-06-27,18000,0.05,50,CE,NFO-OPT,NFO\n\
                 11536643,45066,NIFTY24JUN18000PE,NIFTY,40.0,2024-06-27,18000,0.05,50,PE,NFO-OPT,NFO\n\
                 340481,1330,HDFCBANK,HDFC BANK,1650.0,,0,0.05,1,EQ,NSE,NSE"
            )
        }

        #[tokio::test]
        async fn serves_from_fresh_disk_cache_and_indexes() {
            let dir = tempfile::tempdir().unwrap();
            let cache_file = dir.path().join("instruments_cache.csv");
            std::fs::write(&cache_file, sample_csv()).unwrap();

            let store = offline_store(&cache_file);
            let all = store.all().await.unwrap();
            assert_eq!(all.len(), 3);
            // Sorted by token for deterministic iteration.
            assert_eq!(all[0].token, 340481);

            let call = store.by_symbol("NIFTY24JUN18000CE", "NFO").await.unwrap().unwrap();
            assert_eq!(call.token, 11536642);
            let byt = store.by_token(11536643).await.unwrap().unwrap();
            assert_eq!(byt.tradingsymbol, "NIFTY24JUN18000PE");

            let nfo = store.by_exchange("NFO").await.unwrap();
            assert_eq!(nfo.len(), 2);

            // A repeated all() returns the same ids without refetching.
            let again = store.all().await.unwrap();
            let ids: Vec<u64> = again.iter().map(|i| i.token).collect();
            assert_eq!(ids, vec![340481, 11536642, 11536643]);
        }

        #[tokio::test]
        async fn clear_wipes_cache_and_forces_refetch() {
            let dir = tempfile::tempdir().unwrap();
            let cache_file = dir.path().join("instruments_cache.csv");
            std::fs::write(&cache_file, sample_csv()).unwrap();

            let store = offline_store(&cache_file);
            assert_eq!(store.all().await.unwrap().len(), 3);

            store.clear();
            assert!(!cache_file.exists());
            // With no disk cache and no valid session, the forced refetch
            // surfaces as an auth error instead of stale data.
            assert!(matches!(store.all().await, Err(ConnectorError::AuthInvalid)));
        }

        #[tokio::test]
        async fn merge_quote_creates_entries_for_unknown_tokens() {
            let dir = tempfile::tempdir().unwrap();
            let cache_file = dir.path().join("instruments_cache.csv");
            let store = offline_store(&cache_file);

            let merged = store.merge_quote(
                999,
                QuoteSnapshot { last_price: 5.5, ..QuoteSnapshot::default() },
            );
            assert_eq!(merged.token, 999);
            assert_eq!(merged.quote.last_price, 5.5);
            assert!(matches!(merged.security, Security::Unknown));
        }
    }
}
