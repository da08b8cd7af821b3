//! # Paper Trader
//!
//! Simulates executing a ranked box and keeps the session blotter. The
//! candidate's own slippage and fee estimates stand in for fill quality, so
//! a paper profit is exactly the adjusted P/L the scanner promised. The
//! blotter can be exported as CSV on shutdown.

use boxarb_models::BoxSpread;
use chrono::{DateTime, Utc};
use std::io::Write;
use std::path::Path;
use std::sync::Mutex;
use tracing::info;
use uuid::Uuid;

#[derive(Debug, Clone)]
pub struct PaperTradeResult {
    pub id: String,
    pub box_id: String,
    pub underlying: String,
    pub exchange: String,
    pub quantity: u64,
    pub executed_at: DateTime<Utc>,
    pub net_premium: f64,
    pub slippage: f64,
    pub fees: f64,
    pub profit: f64,
}

#[derive(Default)]
pub struct PaperTrader {
    trades: Mutex<Vec<PaperTradeResult>>,
}

impl PaperTrader {
    pub fn new() -> Self {
        Self::default()
    }

    /// Books a simulated fill for the candidate at `quantity` units.
    pub fn simulate_box_trade(&self, spread: &BoxSpread, quantity: u64) -> PaperTradeResult {
        let theoretical = spread.theoretical_value();
        let net_premium = spread.net_premium();
        let slippage = spread.metrics.slippage;
        let fees = spread.metrics.fees;
        let profit = (theoretical - net_premium - slippage - fees) * quantity as f64;

        let result = PaperTradeResult {
            id: Uuid::new_v4().to_string(),
            box_id: spread.id.clone(),
            underlying: spread.underlying.clone(),
            exchange: spread.exchange.clone(),
            quantity,
            executed_at: Utc::now(),
            net_premium,
            slippage,
            fees,
            profit,
        };
        info!(
            "paper trade {} on {}: profit {:.2} (q={})",
            result.id, result.box_id, result.profit, quantity
        );
        self.trades
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(result.clone());
        result
    }

    pub fn trade_count(&self) -> usize {
        self.trades.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn total_profit_loss(&self) -> f64 {
        self.trades
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .map(|t| t.profit)
            .sum()
    }

    /// Writes the blotter as CSV. Returns the number of rows written.
    pub fn export_csv(&self, path: &Path) -> std::io::Result<usize> {
        let trades = self.trades.lock().unwrap_or_else(|e| e.into_inner());
        let mut file = std::fs::File::create(path)?;
        writeln!(
            file,
            "id,box_id,underlying,exchange,quantity,executed_at,net_premium,slippage,fees,profit"
        )?;
        for t in trades.iter() {
            writeln!(
                file,
                "{},{},{},{},{},{},{:.4},{:.4},{:.4},{:.4}",
                t.id,
                t.box_id,
                t.underlying,
                t.exchange,
                t.quantity,
                t.executed_at.to_rfc3339(),
                t.net_premium,
                t.slippage,
                t.fees,
                t.profit
            )?;
        }
        info!("exported {} paper trades to {}", trades.len(), path.display());
        Ok(trades.len())
    }
}
