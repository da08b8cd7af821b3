//! # Sliding-Window Rate Limiter
//!
//! Per-endpoint admission control for the upstream API: at most `r` grants in
//! any trailing 60-second window. When the server still answers 429, the
//! offending endpoint's budget shrinks by 20% (floored at one request per
//! minute) and never grows back on its own.
//!
//! Waiters sleep on the tokio timer, so a blocked `acquire` never occupies a
//! worker-pool slot. Lock order is registry → cell; neither lock is held
//! across the sleep.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::time::Instant;
use tracing::{info, warn};

const WINDOW: Duration = Duration::from_secs(60);

struct CellState {
    per_minute: u32,
    grants: VecDeque<Instant>,
}

/// Process-wide limiter keyed by endpoint path.
pub struct RateLimiter {
    cells: Mutex<HashMap<String, Arc<Mutex<CellState>>>>,
}

impl RateLimiter {
    pub fn new() -> Self {
        Self {
            cells: Mutex::new(HashMap::new()),
        }
    }

    /// Registers (or replaces) a cell's budget.
    pub fn register(&self, endpoint: &str, per_minute: u32) {
        let cell = Arc::new(Mutex::new(CellState {
            per_minute: per_minute.max(1),
            grants: VecDeque::new(),
        }));
        let mut cells = self.cells.lock().unwrap_or_else(|e| e.into_inner());
        cells.insert(endpoint.to_string(), cell);
    }

    /// Looks up the cell for an endpoint, falling back to `default` —
    /// installing a default cell if none was registered.
    fn cell(&self, endpoint: &str) -> Arc<Mutex<CellState>> {
        let mut cells = self.cells.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(cell) = cells.get(endpoint) {
            return Arc::clone(cell);
        }
        let default = cells
            .entry("default".to_string())
            .or_insert_with(|| {
                Arc::new(Mutex::new(CellState {
                    per_minute: 10,
                    grants: VecDeque::new(),
                }))
            });
        Arc::clone(default)
    }

    /// Blocks (asynchronously) until a grant is available, then records it.
    pub async fn acquire(&self, endpoint: &str) {
        let cell = self.cell(endpoint);
        loop {
            let wait = {
                let mut state = cell.lock().unwrap_or_else(|e| e.into_inner());
                let now = Instant::now();
                while let Some(front) = state.grants.front() {
                    if now.duration_since(*front) >= WINDOW {
                        state.grants.pop_front();
                    } else {
                        break;
                    }
                }
                if state.grants.len() < state.per_minute as usize {
                    state.grants.push_back(now);
                    return;
                }
                let oldest = *state.grants.front().expect("window is non-empty here");
                WINDOW.saturating_sub(now.duration_since(oldest))
            };
            warn!(
                "rate limit reached for {}, waiting {} ms",
                endpoint,
                wait.as_millis()
            );
            tokio::time::sleep(wait).await;
        }
    }

    /// Called on an upstream 429: shrink the endpoint's budget by 20%,
    /// floored at one request per minute. Budgets never grow automatically.
    pub fn throttle(&self, endpoint: &str) {
        let cell = self.cell(endpoint);
        let mut state = cell.lock().unwrap_or_else(|e| e.into_inner());
        state.per_minute = (((state.per_minute as f64) * 0.8).floor() as u32).max(1);
        info!(
            "shrunk rate limit for {} to {} requests per minute",
            endpoint, state.per_minute
        );
    }

    /// Current budget for an endpoint (observability / tests).
    pub fn budget(&self, endpoint: &str) -> u32 {
        let cell = self.cell(endpoint);
        let state = cell.lock().unwrap_or_else(|e| e.into_inner());
        state.per_minute
    }
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::new()
    }
}
