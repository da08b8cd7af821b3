//! # Scan Orchestrator
//!
//! Drives one scan cycle: pick expiries, scan each, merge and rank.
//!
//! ## Failure semantics
//! A single expiry failing (bad fetch, parse error) only costs that expiry's
//! contribution; the cycle continues and logs the loss. Only an invalid
//! session aborts the cycle, because every later fetch would fail the same
//! way and the caller needs to re-authenticate before trying again.

use boxarb_connectors::ConnectorError;
use boxarb_core::Settings;
use boxarb_models::BoxSpread;
use boxarb_options::{CombinationScanner, ExpiryService, ScanError};
use chrono::NaiveDate;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info};

pub struct ScanOrchestrator {
    settings: Arc<Settings>,
    expiries: Arc<ExpiryService>,
    scanner: Arc<CombinationScanner>,
    stop: Arc<AtomicBool>,
}

impl ScanOrchestrator {
    pub fn new(
        settings: Arc<Settings>,
        expiries: Arc<ExpiryService>,
        scanner: Arc<CombinationScanner>,
        stop: Arc<AtomicBool>,
    ) -> Self {
        Self {
            settings,
            expiries,
            scanner,
            stop,
        }
    }

    /// One full cycle across the selected expiries. The result is globally
    /// sorted by profitability (id tie-break).
    pub async fn run_cycle(&self) -> Result<Vec<BoxSpread>, ScanError> {
        let underlying = self.settings.get_str("strategy/underlying", "NIFTY");
        let exchange = self.settings.get_str("strategy/exchange", "NFO");

        let expiries = self.expiries.next_expiries().await?;
        info!("scan cycle over {} expiries for {}:{}", expiries.len(), underlying, exchange);

        let parallel = self.settings.get_bool("expiry/process_in_parallel", false);
        let mut all = if parallel {
            self.scan_parallel(&underlying, &exchange, &expiries).await?
        } else {
            self.scan_sequential(&underlying, &exchange, &expiries).await?
        };

        all.sort_by(|a, b| {
            b.metrics
                .profitability
                .partial_cmp(&a.metrics.profitability)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.id.cmp(&b.id))
        });
        info!("scan cycle complete: {} ranked candidates", all.len());
        Ok(all)
    }

    async fn scan_sequential(
        &self,
        underlying: &str,
        exchange: &str,
        expiries: &[NaiveDate],
    ) -> Result<Vec<BoxSpread>, ScanError> {
        let delay_ms = self
            .settings
            .get_i64("option_chain/pipeline/delay_between_expiries_ms", 1000)
            .max(0) as u64;

        let mut all = Vec::new();
        for (index, &expiry) in expiries.iter().enumerate() {
            if self.stop.load(Ordering::Relaxed) {
                info!("stop requested, abandoning remaining expiries");
                break;
            }
            match self.scanner.scan_expiry(underlying, exchange, expiry).await {
                Ok(spreads) => {
                    info!("expiry {}: {} candidates", expiry, spreads.len());
                    all.extend(spreads);
                }
                Err(ScanError::Connector(ConnectorError::AuthInvalid)) => {
                    return Err(ScanError::Connector(ConnectorError::AuthInvalid));
                }
                Err(e) => error!("expiry {} failed: {}", expiry, e),
            }
            if delay_ms > 0 && index + 1 < expiries.len() {
                tokio::time::sleep(Duration::from_millis(delay_ms)).await;
            }
        }
        Ok(all)
    }

    async fn scan_parallel(
        &self,
        underlying: &str,
        exchange: &str,
        expiries: &[NaiveDate],
    ) -> Result<Vec<BoxSpread>, ScanError> {
        let mut tasks = Vec::with_capacity(expiries.len());
        for &expiry in expiries {
            let scanner = Arc::clone(&self.scanner);
            let underlying = underlying.to_string();
            let exchange = exchange.to_string();
            tasks.push(tokio::spawn(async move {
                (expiry, scanner.scan_expiry(&underlying, &exchange, expiry).await)
            }));
        }

        let mut all = Vec::new();
        for task in tasks {
            match task.await {
                Ok((expiry, Ok(spreads))) => {
                    info!("expiry {}: {} candidates", expiry, spreads.len());
                    all.extend(spreads);
                }
                Ok((_, Err(ScanError::Connector(ConnectorError::AuthInvalid)))) => {
                    return Err(ScanError::Connector(ConnectorError::AuthInvalid));
                }
                Ok((expiry, Err(e))) => error!("expiry {} failed: {}", expiry, e),
                Err(e) => error!("expiry scan task failed: {}", e),
            }
        }
        Ok(all)
    }
}
