//! # Scanner Infrastructure
//!
//! Process-wide plumbing shared by every other crate in the workspace:
//!
//! - [`config`]: the JSON settings store with dotted-path lookups. Hot keys
//!   are re-read on every call so a config edit between scan cycles takes
//!   effect without a restart.
//! - [`pool`]: the OS-thread worker pool that runs CPU-bound combination
//!   evaluation. Network I/O never runs on it.
//! - [`ratelimit`]: the per-endpoint sliding-window admission controller
//!   that keeps the upstream API happy, shrinking its budgets when the
//!   server pushes back with 429s.

pub mod config;
pub mod pool;
pub mod ratelimit;

pub use config::Settings;
pub use pool::{PoolError, TaskHandle, WorkerPool};
pub use ratelimit::RateLimiter;
