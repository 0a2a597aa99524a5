//! Tracing setup for the binary.

use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer, Registry};

use crate::config::LoggingConfig;

pub const LOG_ENV: &str = "SHADOW_SYNC_LOG";
const LOG_FILE_PREFIX: &str = "shadow-sync.log";

/// Filter from `SHADOW_SYNC_LOG`, then `RUST_LOG`, then the configured
/// level raised by `-v` flags.
fn build_filter(config: &LoggingConfig, verbosity: u8) -> EnvFilter {
    for var in [LOG_ENV, "RUST_LOG"] {
        if let Ok(directives) = std::env::var(var) {
            if let Ok(filter) = EnvFilter::try_new(&directives) {
                return filter;
            }
        }
    }
    let level = match verbosity {
        0 => config.level.clone().unwrap_or_else(|| "info".to_string()),
        1 => "debug".to_string(),
        _ => "trace".to_string(),
    };
    EnvFilter::try_new(&level).unwrap_or_else(|_| EnvFilter::new("info"))
}

/// Install the global subscriber. Hold the returned guard for the life of
/// the process or buffered file output is lost.
pub fn init(config: &LoggingConfig, verbosity: u8) -> Option<WorkerGuard> {
    let mut layers: Vec<Box<dyn Layer<Registry> + Send + Sync>> = vec![Box::new(
        tracing_subscriber::fmt::layer()
            .compact()
            .with_writer(std::io::stderr)
            .with_target(true),
    )];

    let mut guard = None;
    if let Some(dir) = &config.directory {
        let appender = tracing_appender::rolling::daily(dir, LOG_FILE_PREFIX);
        let (writer, worker) = tracing_appender::non_blocking(appender);
        layers.push(Box::new(
            tracing_subscriber::fmt::layer()
                .with_writer(writer)
                .with_ansi(false)
                .with_target(true),
        ));
        guard = Some(worker);
    }

    let filter = build_filter(config, verbosity);
    // a subscriber may already be installed (tests, embedding)
    let _ = Registry::default().with(layers).with(filter).try_init();
    guard
}
