//! # Instrument Model
//!
//! One record per exchange-traded contract, as listed in the Zerodha
//! instruments master and enriched by `/quote` responses.
//!
//! ## Description
//! The numeric instrument token is the sole identity; (trading symbol,
//! exchange) is a secondary unique key maintained by the instrument store.
//! Contract terms that only exist for derivatives live inside the tagged
//! [`Security`] variant rather than as always-present zeroed fields.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

/// Call (CE) or Put (PE), as encoded in NSE trading symbols.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OptionKind {
    Call,
    Put,
}

impl OptionKind {
    /// Suffix used in NSE ticker symbols.
    pub fn symbol_suffix(&self) -> &'static str {
        match self {
            OptionKind::Call => "CE",
            OptionKind::Put => "PE",
        }
    }

    /// Parses the Kite `instrument_type` code.
    pub fn from_code(code: &str) -> Option<Self> {
        match code {
            "CE" | "CALL" => Some(OptionKind::Call),
            "PE" | "PUT" => Some(OptionKind::Put),
            _ => None,
        }
    }
}

/// One price level of a depth ladder. Ladders keep the upstream order
/// (best price first).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DepthLevel {
    pub price: f64,
    pub quantity: u64,
    pub orders: u32,
}

/// Both sides of the visible book for one instrument.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MarketDepth {
    /// Bids, best (highest) first.
    pub buy: Vec<DepthLevel>,
    /// Asks, best (lowest) first.
    pub sell: Vec<DepthLevel>,
}

/// Live snapshot fields merged in from the quote endpoints.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QuoteSnapshot {
    pub last_price: f64,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub average_price: f64,
    pub volume: u64,
    /// Pending buy quantity across the book (buy-side pressure).
    pub buy_quantity: u64,
    /// Pending sell quantity across the book (sell-side pressure).
    pub sell_quantity: u64,
    pub open_interest: f64,
    pub depth: MarketDepth,
}

/// Option contract terms.
///
/// `expiry` is `None` when the instruments master carried a malformed expiry
/// and the symbol fallback could not recover it either; such contracts are
/// skipped by the expiry classifier and the evaluator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OptionTerms {
    pub underlying: String,
    pub strike: f64,
    pub kind: OptionKind,
    pub expiry: Option<NaiveDate>,
}

/// What kind of contract this is, with derivative terms in the variant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Security {
    Index,
    Equity,
    Future { expiry: Option<NaiveDate> },
    Option(OptionTerms),
    Currency,
    Commodity,
    Unknown,
}

impl Security {
    pub fn label(&self) -> &'static str {
        match self {
            Security::Index => "INDEX",
            Security::Equity => "EQUITY",
            Security::Future { .. } => "FUTURE",
            Security::Option(_) => "OPTION",
            Security::Currency => "CURRENCY",
            Security::Commodity => "COMMODITY",
            Security::Unknown => "UNKNOWN",
        }
    }
}

/// A single exchange-traded contract.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Instrument {
    /// Upstream numeric token; the sole identity.
    pub token: u64,
    pub tradingsymbol: String,
    pub exchange: String,
    pub name: String,
    pub segment: String,
    pub security: Security,
    pub quote: QuoteSnapshot,
}

impl Instrument {
    /// A bare record for a token that appeared in a quote response before the
    /// universe was (re)loaded.
    pub fn unknown(token: u64) -> Self {
        Self {
            token,
            tradingsymbol: String::new(),
            exchange: String::new(),
            name: String::new(),
            segment: String::new(),
            security: Security::Unknown,
            quote: QuoteSnapshot::default(),
        }
    }

    pub fn is_option(&self) -> bool {
        matches!(self.security, Security::Option(_))
    }

    pub fn option(&self) -> Option<&OptionTerms> {
        match &self.security {
            Security::Option(terms) => Some(terms),
            _ => None,
        }
    }

    /// Strike price; zero unless this is an option.
    pub fn strike(&self) -> f64 {
        self.option().map(|o| o.strike).unwrap_or(0.0)
    }

    /// Expiry date for options and futures.
    pub fn expiry(&self) -> Option<NaiveDate> {
        match &self.security {
            Security::Option(terms) => terms.expiry,
            Security::Future { expiry } => *expiry,
            _ => None,
        }
    }

    pub fn option_kind(&self) -> Option<OptionKind> {
        self.option().map(|o| o.kind)
    }

    pub fn underlying(&self) -> Option<&str> {
        self.option().map(|o| o.underlying.as_str())
    }

    pub fn best_bid(&self) -> Option<f64> {
        self.quote.depth.buy.first().map(|l| l.price)
    }

    pub fn best_ask(&self) -> Option<f64> {
        self.quote.depth.sell.first().map(|l| l.price)
    }
}
