//! # Expiry Classification and Selection
//!
//! NSE index derivatives expire on Thursdays; the last Thursday of a month is
//! the monthly series, every other Thursday is a weekly. Classification and
//! the "strictly in the future" cut both happen on dates in the exchange time
//! zone, never host-local time.

use boxarb_connectors::{InstrumentStore, Result};
use boxarb_core::Settings;
use boxarb_models::calendar;
use boxarb_models::Instrument;
use chrono::{NaiveDate, Utc};
use chrono_tz::Tz;
use std::collections::BTreeSet;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tracing::{info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExpiryClass {
    Weekly,
    Monthly,
}

/// Classifies a date, or `None` for non-Thursdays.
pub fn classify(date: NaiveDate) -> Option<ExpiryClass> {
    if calendar::is_monthly_expiry(date) {
        Some(ExpiryClass::Monthly)
    } else if calendar::is_weekly_expiry(date) {
        Some(ExpiryClass::Weekly)
    } else {
        None
    }
}

pub struct ExpiryService {
    settings: Arc<Settings>,
    store: Arc<InstrumentStore>,
    tz: Tz,
    /// Filtered expiry lists per (underlying, exchange).
    cache: Mutex<HashMap<(String, String), Vec<NaiveDate>>>,
}

impl ExpiryService {
    pub fn new(settings: Arc<Settings>, store: Arc<InstrumentStore>) -> Self {
        let tz_name = settings.get_str("system/exchange_timezone", "Asia/Kolkata");
        let tz = tz_name.parse::<Tz>().unwrap_or_else(|_| {
            warn!("unknown exchange timezone {:?}, falling back to Asia/Kolkata", tz_name);
            chrono_tz::Asia::Kolkata
        });
        Self {
            settings,
            store,
            tz,
            cache: Mutex::new(HashMap::new()),
        }
    }

    /// Today's date at the exchange.
    pub fn today(&self) -> NaiveDate {
        Utc::now().with_timezone(&self.tz).date_naive()
    }

    /// Distinct future expiries of the configured underlying, classified.
    /// Returns (weekly, monthly), each sorted ascending.
    pub async fn expiries(
        &self,
        include_weekly: bool,
        include_monthly: bool,
    ) -> Result<(Vec<NaiveDate>, Vec<NaiveDate>)> {
        let underlying = self.settings.get_str("strategy/underlying", "NIFTY");
        let exchange = self.settings.get_str("strategy/exchange", "NFO");
        info!("collecting expiries for {}:{}", underlying, exchange);

        let instruments = self.store.by_exchange(&exchange).await?;
        let today = self.today();

        let mut unique: BTreeSet<NaiveDate> = BTreeSet::new();
        for instrument in &instruments {
            if !matches_underlying(instrument, &underlying) {
                continue;
            }
            if let Some(expiry) = instrument.expiry() {
                if expiry > today {
                    unique.insert(expiry);
                }
            }
        }

        let mut weekly = Vec::new();
        let mut monthly = Vec::new();
        for expiry in unique {
            match classify(expiry) {
                Some(ExpiryClass::Monthly) if include_monthly => monthly.push(expiry),
                Some(ExpiryClass::Weekly) if include_weekly => weekly.push(expiry),
                _ => {}
            }
        }

        info!(
            "found {} weekly and {} monthly expiries for {}",
            weekly.len(),
            monthly.len(),
            underlying
        );
        Ok((weekly, monthly))
    }

    /// Applies the recency window and count cap to a candidate list. The
    /// result is cached per (underlying, exchange) until `clear_cache`.
    pub fn filter(&self, expiries: &[NaiveDate]) -> Vec<NaiveDate> {
        let underlying = self.settings.get_str("strategy/underlying", "NIFTY");
        let exchange = self.settings.get_str("strategy/exchange", "NFO");
        let key = (underlying, exchange);

        let include_weekly = self.settings.get_bool("expiry/include_weekly", true);
        let include_monthly = self.settings.get_bool("expiry/include_monthly", true);
        let min_days = self.settings.get_i64("expiry/min_days", 0);
        let max_days = self.settings.get_i64("expiry/max_days", 30);
        let max_count = self.settings.get_i64("expiry/max_count", 3).max(0) as usize;

        let today = self.today();
        let mut filtered: Vec<NaiveDate> = expiries
            .iter()
            .copied()
            .filter(|expiry| {
                let days = (*expiry - today).num_days();
                if days < min_days || days > max_days {
                    return false;
                }
                match classify(*expiry) {
                    Some(ExpiryClass::Monthly) => include_monthly,
                    Some(ExpiryClass::Weekly) => include_weekly,
                    None => false,
                }
            })
            .collect();
        filtered.sort();
        filtered.truncate(max_count);

        let mut cache = self.cache.lock().unwrap_or_else(|e| e.into_inner());
        cache.insert(key, filtered.clone());
        filtered
    }

    /// The expiries one scan cycle works through: collect, merge, filter.
    pub async fn next_expiries(&self) -> Result<Vec<NaiveDate>> {
        let include_weekly = self.settings.get_bool("expiry/include_weekly", true);
        let include_monthly = self.settings.get_bool("expiry/include_monthly", true);
        let (weekly, monthly) = self.expiries(include_weekly, include_monthly).await?;

        let mut merged = weekly;
        merged.extend(monthly);
        merged.sort();
        Ok(self.filter(&merged))
    }

    /// Last filter result for the configured (underlying, exchange), if any.
    pub fn cached(&self) -> Option<Vec<NaiveDate>> {
        let underlying = self.settings.get_str("strategy/underlying", "NIFTY");
        let exchange = self.settings.get_str("strategy/exchange", "NFO");
        let cache = self.cache.lock().unwrap_or_else(|e| e.into_inner());
        cache.get(&(underlying, exchange)).cloned()
    }

    pub fn clear_cache(&self) {
        let mut cache = self.cache.lock().unwrap_or_else(|e| e.into_inner());
        cache.clear();
        info!("expiry cache cleared");
    }
}

/// An instrument belongs to the configured underlying when its underlying
/// field matches case-insensitively, or its symbol starts with the underlying
/// and ends in an option suffix.
fn matches_underlying(instrument: &Instrument, underlying: &str) -> bool {
    if !instrument.is_option() {
        return false;
    }
    if let Some(u) = instrument.underlying() {
        if u.eq_ignore_ascii_case(underlying) {
            return true;
        }
    }
    let symbol = &instrument.tradingsymbol;
    symbol.len() >= underlying.len()
        && symbol[..underlying.len()].eq_ignore_ascii_case(underlying)
        && (symbol.ends_with("CE") || symbol.ends_with("PE"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use boxarb_models::{OptionKind, OptionTerms, QuoteSnapshot, Security};

    #[test]
    fn classification_matches_last_thursday_rule() {
        // Last Thursday of June 2024.
        assert_eq!(
            classify(NaiveDate::from_ymd_opt(2024, 6, 27).unwrap()),
            Some(ExpiryClass::Monthly)
        );
        // An earlier Thursday.
        assert_eq!(
            classify(NaiveDate::from_ymd_opt(2024, 6, 20).unwrap()),
            Some(ExpiryClass::Weekly)
        );
        // A Wednesday.
        assert_eq!(classify(NaiveDate::from_ymd_opt(2024, 6, 26).unwrap()), None);
    }

    fn option_instrument(symbol: &str, underlying: &str) -> Instrument {
        Instrument {
            token: 1,
            tradingsymbol: symbol.to_string(),
            exchange: "NFO".into(),
            name: underlying.to_string(),
            segment: "NFO-OPT".into(),
            security: Security::Option(OptionTerms {
                underlying: underlying.to_string(),
                strike: 18000.0,
                kind: OptionKind::Call,
                expiry: NaiveDate::from_ymd_opt(2024, 6, 27),
            }),
            quote: QuoteSnapshot::default(),
        }
    }

    #[test]
    fn underlying_match_is_case_insensitive() {
        let inst = option_instrument("NIFTY24JUN18000CE", "nifty");
        assert!(matches_underlying(&inst, "NIFTY"));
    }

    #[test]
    fn symbol_prefix_match_requires_option_suffix() {
        let mut inst = option_instrument("NIFTY24JUN18000CE", "OTHER");
        assert!(matches_underlying(&inst, "NIFTY"));

        inst.tradingsymbol = "NIFTY24JUNFUT".into();
        assert!(!matches_underlying(&inst, "NIFTY"));
    }

    #[test]
    fn non_options_never_match() {
        let mut inst = option_instrument("NIFTY", "NIFTY");
        inst.security = Security::Index;
        assert!(!matches_underlying(&inst, "NIFTY"));
    }

    mod service {
        use super::*;
        use boxarb_connectors::{AuthSession, KiteClient};
        use boxarb_core::RateLimiter;
        use boxarb_models::calendar;
        use chrono::{Datelike, Duration};
        use serde_json::json;

        const HEADER: &str = "instrument_token,exchange_token,tradingsymbol,name,last_price,expiry,strike,tick_size,lot_size,instrument_type,segment,exchange";

        /// Next strictly-future Thursday that is not the monthly one.
        fn future_weekly() -> NaiveDate {
            let mut d = Utc::now().date_naive() + Duration::days(1);
            while !calendar::is_weekly_expiry(d) {
                d += Duration::days(1);
            }
            d
        }

        /// Last Thursday of the month after next; always strictly future.
        fn future_monthly() -> NaiveDate {
            let today = Utc::now().date_naive();
            let (year, month) = if today.month() >= 11 {
                (today.year() + 1, today.month() - 10)
            } else {
                (today.year(), today.month() + 2)
            };
            calendar::last_thursday_of_month(year, month).unwrap()
        }

        fn service_with_universe(
            expiries: &[NaiveDate],
            config: serde_json::Value,
            dir: &std::path::Path,
        ) -> ExpiryService {
            let cache_file = dir.join("instruments_cache.csv");
            let mut csv = String::from(HEADER);
            let mut token = 1_000u64;
            for expiry in expiries {
                for kind in ["CE", "PE"] {
                    csv.push_str(&format!(
                        "\n{},{},NIFTY{}18000{},NIFTY,10.0,{},18000,0.05,50,{},NFO-OPT,NFO",
                        token,
                        token,
                        expiry.format("%y%b%d").to_string().to_uppercase(),
                        kind,
                        expiry.format("%Y-%m-%d"),
                        kind
                    ));
                    token += 1;
                }
            }
            std::fs::write(&cache_file, csv).unwrap();

            let mut base = json!({
                "strategy": { "underlying": "NIFTY", "exchange": "NFO" },
                "api": {
                    "key": "k", "secret": "s",
                    "instruments_cache_file": cache_file.to_str().unwrap(),
                    "instruments_cache_ttl_minutes": 1440,
                },
                "expiry": { "max_days": 400 }
            });
            if let (Some(base), serde_json::Value::Object(patch)) = (base.as_object_mut(), config) {
                for (key, value) in patch {
                    base.insert(key, value);
                }
            }
            let settings = Arc::new(Settings::from_value(base));
            let auth = Arc::new(AuthSession::from_settings(Arc::clone(&settings)));
            let limiter = Arc::new(RateLimiter::new());
            let client = Arc::new(KiteClient::new(&settings, auth, limiter).unwrap());
            let store = Arc::new(InstrumentStore::new(client, Arc::clone(&settings)));
            ExpiryService::new(settings, store)
        }

        #[tokio::test]
        async fn collects_and_classifies_future_expiries() {
            let dir = tempfile::tempdir().unwrap();
            let weekly = future_weekly();
            let monthly = future_monthly();
            let service = service_with_universe(&[weekly, monthly], json!({}), dir.path());

            let (weeklies, monthlies) = service.expiries(true, true).await.unwrap();
            assert!(weeklies.contains(&weekly));
            assert!(monthlies.contains(&monthly));
            assert!(!weeklies.contains(&monthly));
        }

        #[tokio::test]
        async fn class_exclusion_drops_whole_side() {
            let dir = tempfile::tempdir().unwrap();
            let weekly = future_weekly();
            let monthly = future_monthly();
            let service = service_with_universe(&[weekly, monthly], json!({}), dir.path());

            let (weeklies, monthlies) = service.expiries(false, true).await.unwrap();
            assert!(weeklies.is_empty());
            assert!(monthlies.contains(&monthly));
        }

        #[tokio::test]
        async fn next_expiries_truncates_to_max_count() {
            let dir = tempfile::tempdir().unwrap();
            let weekly = future_weekly();
            let monthly = future_monthly();
            let service = service_with_universe(
                &[weekly, monthly],
                json!({ "expiry": { "max_count": 1, "max_days": 400 } }),
                dir.path(),
            );

            let next = service.next_expiries().await.unwrap();
            assert_eq!(next, vec![weekly.min(monthly)]);
            // The filter result is cached until cleared.
            assert_eq!(service.cached(), Some(next));
            service.clear_cache();
            assert_eq!(service.cached(), None);
        }

        #[tokio::test]
        async fn day_window_excludes_far_expiries() {
            let dir = tempfile::tempdir().unwrap();
            let weekly = future_weekly();
            let monthly = future_monthly();
            let service = service_with_universe(
                &[weekly, monthly],
                // Window that ends before the month-after-next monthly.
                json!({ "expiry": { "max_days": 21, "max_count": 10 } }),
                dir.path(),
            );

            let next = service.next_expiries().await.unwrap();
            assert!(next.contains(&weekly));
            assert!(!next.contains(&monthly));
        }
    }
}
