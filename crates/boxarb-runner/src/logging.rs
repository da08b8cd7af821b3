//! Logging setup: console plus a daily-rolling JSON file under `./logs`.

use boxarb_core::Settings;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Initializes the global subscriber. `RUST_LOG` wins over the configured
/// `system/log_level`.
pub fn init(settings: &Settings) {
    let level = settings.get_str("system/log_level", "info");

    std::fs::create_dir_all("./logs").ok();
    let file_appender = RollingFileAppender::new(Rotation::DAILY, "./logs", "boxarb.log");

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(true)
                .with_ansi(true),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(file_appender)
                .with_target(true)
                .with_ansi(false)
                .json(),
        )
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level)))
        .init();
}
