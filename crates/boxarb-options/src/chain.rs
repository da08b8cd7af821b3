//! # Strike-Set and Leg Resolution Helpers
//!
//! Small, stateless pieces the evaluator composes: which strikes are worth
//! looking at (a spot-relative band), and which concrete call/put contracts
//! represent a strike.

use boxarb_models::{Instrument, OptionKind};
use chrono::NaiveDate;
use tracing::debug;

/// Tolerance when comparing strike prices parsed from CSV/quotes.
const STRIKE_EPS: f64 = 0.01;

/// Strike band around spot: `[spot·(1−r%), spot·(1+r%)]`. `None` means
/// unbounded (spot unavailable).
pub fn strike_band(spot: f64, range_percent: f64) -> Option<(f64, f64)> {
    if spot <= 0.0 {
        return None;
    }
    let min = spot * (1.0 - range_percent / 100.0);
    let max = spot * (1.0 + range_percent / 100.0);
    debug!("strike band {:.2} - {:.2} (spot {:.2}, ±{}%)", min, max, spot, range_percent);
    Some((min, max))
}

/// Distinct strikes of the matching option chain, ascending, band-filtered.
pub fn strike_set(
    instruments: &[Instrument],
    underlying: &str,
    exchange: &str,
    expiry: NaiveDate,
    band: Option<(f64, f64)>,
) -> Vec<f64> {
    let mut strikes: Vec<f64> = instruments
        .iter()
        .filter(|inst| is_chain_member(inst, underlying, exchange, expiry))
        .map(|inst| inst.strike())
        .filter(|strike| match band {
            Some((min, max)) => *strike >= min && *strike <= max,
            None => true,
        })
        .collect();
    strikes.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
    strikes.dedup_by(|a, b| (*a - *b).abs() < STRIKE_EPS);
    strikes
}

/// Finds the call and put for one strike. When several contracts match
/// (rare relistings), the lexically smallest trading symbol wins so repeated
/// scans resolve identically.
pub fn resolve_pair(
    instruments: &[Instrument],
    underlying: &str,
    exchange: &str,
    expiry: NaiveDate,
    strike: f64,
) -> Option<(Instrument, Instrument)> {
    let mut call: Option<&Instrument> = None;
    let mut put: Option<&Instrument> = None;

    for inst in instruments {
        if !is_chain_member(inst, underlying, exchange, expiry) {
            continue;
        }
        if (inst.strike() - strike).abs() >= STRIKE_EPS {
            continue;
        }
        let slot = match inst.option_kind() {
            Some(OptionKind::Call) => &mut call,
            Some(OptionKind::Put) => &mut put,
            None => continue,
        };
        match slot {
            Some(existing) if existing.tradingsymbol <= inst.tradingsymbol => {}
            _ => *slot = Some(inst),
        }
    }

    Some((call?.clone(), put?.clone()))
}

fn is_chain_member(
    inst: &Instrument,
    underlying: &str,
    exchange: &str,
    expiry: NaiveDate,
) -> bool {
    inst.exchange == exchange
        && inst
            .underlying()
            .is_some_and(|u| u.eq_ignore_ascii_case(underlying))
        && inst.expiry() == Some(expiry)
}

#[cfg(test)]
mod tests {
    use super::*;
    use boxarb_models::{OptionTerms, QuoteSnapshot, Security};

    fn option(symbol: &str, strike: f64, kind: OptionKind, expiry: NaiveDate) -> Instrument {
        Instrument {
            token: (strike as u64) * 10 + if kind == OptionKind::Call { 1 } else { 2 },
            tradingsymbol: symbol.to_string(),
            exchange: "NFO".into(),
            name: "NIFTY".into(),
            segment: "NFO-OPT".into(),
            security: Security::Option(OptionTerms {
                underlying: "NIFTY".into(),
                strike,
                kind,
                expiry: Some(expiry),
            }),
            quote: QuoteSnapshot::default(),
        }
    }

    fn expiry() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 6, 27).unwrap()
    }

    #[test]
    fn band_is_spot_relative() {
        let (min, max) = strike_band(20000.0, 5.0).unwrap();
        assert!((min - 19000.0).abs() < 1e-9);
        assert!((max - 21000.0).abs() < 1e-9);
        assert_eq!(strike_band(0.0, 5.0), None);
    }

    #[test]
    fn strike_set_dedups_and_sorts() {
        let instruments = vec![
            option("NIFTY24JUN18100CE", 18100.0, OptionKind::Call, expiry()),
            option("NIFTY24JUN18000CE", 18000.0, OptionKind::Call, expiry()),
            option("NIFTY24JUN18000PE", 18000.0, OptionKind::Put, expiry()),
            option("NIFTY24JUN18200CE", 18200.0, OptionKind::Call, expiry()),
        ];
        let strikes = strike_set(&instruments, "NIFTY", "NFO", expiry(), None);
        assert_eq!(strikes, vec![18000.0, 18100.0, 18200.0]);
    }

    #[test]
    fn strike_set_honours_band() {
        let instruments = vec![
            option("NIFTY24JUN17000CE", 17000.0, OptionKind::Call, expiry()),
            option("NIFTY24JUN18000CE", 18000.0, OptionKind::Call, expiry()),
            option("NIFTY24JUN19000CE", 19000.0, OptionKind::Call, expiry()),
        ];
        let strikes = strike_set(
            &instruments,
            "NIFTY",
            "NFO",
            expiry(),
            Some((17500.0, 18500.0)),
        );
        assert_eq!(strikes, vec![18000.0]);
    }

    #[test]
    fn pair_resolution_needs_both_sides() {
        let call_only = vec![option("NIFTY24JUN18000CE", 18000.0, OptionKind::Call, expiry())];
        assert!(resolve_pair(&call_only, "NIFTY", "NFO", expiry(), 18000.0).is_none());

        let both = vec![
            option("NIFTY24JUN18000CE", 18000.0, OptionKind::Call, expiry()),
            option("NIFTY24JUN18000PE", 18000.0, OptionKind::Put, expiry()),
        ];
        let (call, put) = resolve_pair(&both, "NIFTY", "NFO", expiry(), 18000.0).unwrap();
        assert_eq!(call.option_kind(), Some(OptionKind::Call));
        assert_eq!(put.option_kind(), Some(OptionKind::Put));
    }

    #[test]
    fn duplicate_contracts_resolve_to_lexically_smallest() {
        let both = vec![
            option("NIFTY24JUN18000CEB", 18000.0, OptionKind::Call, expiry()),
            option("NIFTY24JUN18000CEA", 18000.0, OptionKind::Call, expiry()),
            option("NIFTY24JUN18000PE", 18000.0, OptionKind::Put, expiry()),
        ];
        let (call, _) = resolve_pair(&both, "NIFTY", "NFO", expiry(), 18000.0).unwrap();
        assert_eq!(call.tradingsymbol, "NIFTY24JUN18000CEA");
    }

    #[test]
    fn other_expiries_are_excluded() {
        let other = NaiveDate::from_ymd_opt(2024, 7, 25).unwrap();
        let instruments = vec![
            option("NIFTY24JUL18000CE", 18000.0, OptionKind::Call, other),
            option("NIFTY24JUL18000PE", 18000.0, OptionKind::Put, other),
        ];
        assert!(resolve_pair(&instruments, "NIFTY", "NFO", expiry(), 18000.0).is_none());
        assert!(strike_set(&instruments, "NIFTY", "NFO", expiry(), None).is_empty());
    }
}
