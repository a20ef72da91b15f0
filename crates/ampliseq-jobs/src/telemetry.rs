//! Process-wide logging setup.
//!
//! Library code logs through the `log` facade and opens `tracing` spans;
//! this module installs the subscriber that receives both.

use std::sync::OnceLock;

use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::{fmt, EnvFilter, Layer, Registry};

/// Output format for log lines.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    #[default]
    Human,
    Json,
}

static INITIALIZED: OnceLock<bool> = OnceLock::new();

/// Installs the global subscriber and the `log` bridge. `RUST_LOG`
/// overrides the default `info` filter. Returns `false` when logging was
/// already set up by an earlier call or by another subscriber.
pub fn init_logging(format: LogFormat) -> bool {
    let mut installed = false;
    INITIALIZED.get_or_init(|| {
        let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

        let layer: Box<dyn Layer<Registry> + Send + Sync> = match format {
            LogFormat::Human => fmt::layer().with_target(true).boxed(),
            LogFormat::Json => fmt::layer().json().with_current_span(true).boxed(),
        };

        let subscriber = tracing_subscriber::registry().with(layer).with(filter);
        if tracing::subscriber::set_global_default(subscriber).is_err() {
            return false;
        }

        if let Err(e) = tracing_log::LogTracer::init() {
            tracing::warn!("log records will not be forwarded to tracing: {}", e);
        }

        installed = true;
        true
    });
    installed
}
