//! # boxarb — Box-Spread Scanner for NSE Index Options
//!
//! Wires the whole system together: config, logging, auth, the rate-limited
//! market connectors, the worker pool, the combination evaluator, and the
//! scan loop that routes ranked candidates to the paper trader or the live
//! order manager.
//!
//! Usage: `boxarb <config.json>`. Exit code 0 on clean shutdown, 1 when the
//! config cannot be loaded or no session token can be obtained.

mod logging;
mod orders;
mod paper;
mod scanner;

use anyhow::Context;
use boxarb_connectors::{AuthSession, InstrumentStore, KiteClient, QuoteFetcher};
use boxarb_core::{RateLimiter, Settings, WorkerPool};
use boxarb_models::BoxSpread;
use boxarb_options::{pricing, CombinationScanner, ExpiryService};
use boxarb_risk::{RiskCalculator, RiskParams};
use clap::Parser;
use orders::OrderManager;
use paper::PaperTrader;
use scanner::ScanOrchestrator;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

#[derive(Parser)]
#[command(name = "boxarb", about = "Scans NSE index options for mispriced box spreads")]
struct Args {
    /// Path to the JSON configuration file.
    config: PathBuf,
}

fn main() {
    let args = Args::parse();

    let settings = match Settings::load(&args.config) {
        Ok(settings) => Arc::new(settings),
        Err(e) => {
            eprintln!("fatal: {e}");
            std::process::exit(1);
        }
    };
    logging::init(&settings);

    if let Err(e) = run(settings) {
        error!("fatal: {e:#}");
        std::process::exit(1);
    }
}

#[tokio::main]
async fn run(settings: Arc<Settings>) -> anyhow::Result<()> {
    info!("starting boxarb scanner");

    let limiter = Arc::new(build_limiter(&settings));
    let auth = Arc::new(AuthSession::from_settings(Arc::clone(&settings)));
    let client = Arc::new(KiteClient::new(&settings, Arc::clone(&auth), Arc::clone(&limiter))?);

    if !auth.is_valid() {
        authenticate_interactively(&auth, &client)
            .await
            .context("unable to obtain an access token")?;
    } else {
        info!("using persisted access token");
    }

    let store = Arc::new(InstrumentStore::new(Arc::clone(&client), Arc::clone(&settings)));
    let quotes = Arc::new(QuoteFetcher::new(
        Arc::clone(&client),
        Arc::clone(&store),
        Arc::clone(&settings),
    ));
    let num_threads = settings.get_i64("system/num_threads", 4).max(1) as usize;
    let pool = Arc::new(WorkerPool::new(num_threads));
    let expiries = Arc::new(ExpiryService::new(Arc::clone(&settings), Arc::clone(&store)));
    let combo_scanner = Arc::new(CombinationScanner::new(
        Arc::clone(&settings),
        Arc::clone(&store),
        Arc::clone(&quotes),
        Arc::clone(&pool),
    ));

    let stop = Arc::new(AtomicBool::new(false));
    spawn_signal_handler(Arc::clone(&stop));

    let orchestrator = ScanOrchestrator::new(
        Arc::clone(&settings),
        Arc::clone(&expiries),
        Arc::clone(&combo_scanner),
        Arc::clone(&stop),
    );
    let paper = PaperTrader::new();
    let order_manager = OrderManager::new(Arc::clone(&client), Arc::clone(&settings));

    info!("all components initialized, entering scan loop");
    while !stop.load(Ordering::Relaxed) {
        match orchestrator.run_cycle().await {
            Ok(spreads) if spreads.is_empty() => {
                info!("no profitable box spreads this cycle");
            }
            Ok(spreads) => {
                route_best(&settings, &spreads, &paper, &order_manager).await;
            }
            Err(e) => error!("scan cycle failed: {}", e),
        }

        let interval = settings.get_i64("strategy/scan_interval_seconds", 60).max(1);
        info!("waiting {}s for next scan", interval);
        for _ in 0..interval {
            if stop.load(Ordering::Relaxed) {
                break;
            }
            tokio::time::sleep(Duration::from_secs(1)).await;
        }
    }

    info!("scan loop terminated");
    if settings.get_bool("strategy/paper_trading", true) && paper.trade_count() > 0 {
        let path = settings.get_str("strategy/paper_trade_log", "paper_trades.csv");
        match paper.export_csv(Path::new(&path)) {
            Ok(count) => info!(
                "paper session: {} trades, total P/L {:.2}",
                count,
                paper.total_profit_loss()
            ),
            Err(e) => warn!("failed to export paper blotter: {}", e),
        }
    }
    pool.shutdown();
    info!("shutdown complete");
    Ok(())
}

fn build_limiter(settings: &Settings) -> RateLimiter {
    let limiter = RateLimiter::new();
    limiter.register(
        "/instruments",
        settings.get_i64("api/rate_limits/instruments", 1).max(1) as u32,
    );
    limiter.register("/quote", settings.get_i64("api/rate_limits/quote", 15).max(1) as u32);
    limiter.register("/quote/ltp", settings.get_i64("api/rate_limits/ltp", 15).max(1) as u32);
    limiter.register("/quote/ohlc", settings.get_i64("api/rate_limits/ohlc", 15).max(1) as u32);
    limiter.register("default", settings.get_i64("api/rate_limits/default", 10).max(1) as u32);
    limiter
}

/// Walks the user through the Connect login flow on stdin/stdout.
async fn authenticate_interactively(auth: &AuthSession, client: &KiteClient) -> anyhow::Result<()> {
    println!("Open the following URL in your browser and complete the login:");
    println!("{}", auth.login_url());
    print!("Enter the request token: ");
    std::io::stdout().flush()?;

    let mut request_token = String::new();
    std::io::stdin().read_line(&mut request_token)?;
    let request_token = request_token.trim();
    if request_token.is_empty() {
        anyhow::bail!("no request token provided");
    }

    auth.exchange_request_token(client.http(), request_token).await?;
    info!("authentication successful");
    Ok(())
}

fn spawn_signal_handler(stop: Arc<AtomicBool>) {
    tokio::spawn(async move {
        let ctrl_c = tokio::signal::ctrl_c();
        #[cfg(unix)]
        {
            use tokio::signal::unix::{signal, SignalKind};
            match signal(SignalKind::terminate()) {
                Ok(mut term) => {
                    tokio::select! {
                        _ = ctrl_c => {}
                        _ = term.recv() => {}
                    }
                }
                Err(_) => {
                    let _ = ctrl_c.await;
                }
            }
        }
        #[cfg(not(unix))]
        {
            let _ = ctrl_c.await;
        }
        info!("shutdown signal received");
        stop.store(true, Ordering::Relaxed);
    });
}

/// Routes the best liquid candidate that clears the risk gate.
async fn route_best(
    settings: &Arc<Settings>,
    spreads: &[BoxSpread],
    paper: &PaperTrader,
    order_manager: &OrderManager,
) {
    let quantity = settings.get_i64("strategy/quantity", 1).max(1) as u64;

    let Some(best) = spreads
        .iter()
        .find(|s| pricing::available_liquidity(s) >= quantity)
    else {
        info!("no candidate has sufficient depth for q={}", quantity);
        return;
    };

    info!(
        "selected {}: theoretical {:.2}, net premium {:.2}, roi {:.2}%, profitability {:.2}",
        best.id,
        best.metrics.theoretical_value,
        best.metrics.net_premium,
        best.metrics.roi,
        best.metrics.profitability
    );

    let risk = RiskCalculator::new(RiskParams::from_settings(settings));
    if !risk.meets_risk(best.metrics.roi, best.metrics.max_loss) {
        info!("{} fails the risk gate, not routing", best.id);
        return;
    }

    if settings.get_bool("strategy/paper_trading", true) {
        paper.simulate_box_trade(best, quantity);
        return;
    }

    match order_manager.place_box_spread(best, quantity).await {
        Ok(order_ids) => {
            let timeout = settings.get_i64("strategy/execution_timeout_seconds", 300).max(1) as u64;
            match order_manager.wait_for_execution(&order_ids, timeout).await {
                Ok(true) => info!("box spread {} fully executed", best.id),
                Ok(false) => {
                    warn!("box spread {} not fully executed within {}s, cancelling open legs", best.id, timeout);
                    for order_id in &order_ids {
                        if let Err(e) = order_manager
                            .cancel_order(order_id, boxarb_models::order::OrderVariety::Regular)
                            .await
                        {
                            error!("failed to cancel order {}: {}", order_id, e);
                        }
                    }
                }
                Err(e) => error!("execution wait failed for {}: {}", best.id, e),
            }
        }
        Err(e) => error!("failed to place box spread {}: {}", best.id, e),
    }
}
