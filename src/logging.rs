//! Log output for the shelfwatch daemon.
//!
//! Every line is `HH:MM:SS.mmm LEVEL target: [component] event: detail`.
//! A typical batch cycle at the default `info` level reads:
//!
//! ```text
//! [watcher] watching: movies library folder /srv/media/movies
//! [engine] started: 30s window, 2 libraries
//! [batch] opened: /srv/media/movies/Heat (1995)/heat.mkv
//! [batch] closed: 4 events, touched [movies]
//! [mqtt] published: 4 events
//! [engine] stopped: 4 events, 1 published, 0 discarded
//! ```
//!
//! Publish retries and broker outages are `WARN`, a discarded batch is
//! `ERROR`. State transitions, per-event attribution and drain counts
//! only show at `debug` for `shelfwatch::aggregate`.
//!
//! # Configuration
//!
//! ```json
//! "logging": {
//!   "default": "info",
//!   "modules": { "shelfwatch::aggregate": "debug" }
//! }
//! ```
//!
//! # Environment Variable
//!
//! `RUST_LOG` takes precedence over config:
//! ```bash
//! RUST_LOG=debug shelfwatch config.json
//! RUST_LOG=shelfwatch::publish=trace shelfwatch config.json
//! ```

use std::sync::Once;
use tracing_subscriber::fmt::time::FormatTime;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

use crate::config::LoggingConfig;

static INIT: Once = Once::new();

/// Compact time format: HH:MM:SS.mmm
struct CompactTime;

impl FormatTime for CompactTime {
    fn format_time(&self, w: &mut tracing_subscriber::fmt::format::Writer<'_>) -> std::fmt::Result {
        write!(w, "{}", chrono::Local::now().format("%H:%M:%S%.3f"))
    }
}

/// Build the filter directive string from config.
fn filter_directives(config: &LoggingConfig) -> String {
    let mut filter_str = config.default.clone();
    for (module, level) in &config.modules {
        filter_str.push_str(&format!(",{module}={level}"));
    }
    filter_str
}

/// Initialize logging with configuration.
///
/// Call once at startup. Safe to call multiple times (only first call takes effect).
/// The `RUST_LOG` environment variable takes precedence over config settings.
pub fn init_with_config(config: &LoggingConfig) {
    INIT.call_once(|| {
        let filter = if std::env::var("RUST_LOG").is_ok() {
            EnvFilter::from_default_env()
        } else {
            EnvFilter::new(filter_directives(config))
        };

        let fmt_layer = tracing_subscriber::fmt::layer()
            .with_target(true)
            .with_timer(CompactTime)
            .with_level(true)
            .with_filter(filter);

        tracing_subscriber::registry().with(fmt_layer).init();
    });
}

/// Log an event with component context.
///
/// # Examples
/// ```ignore
/// log_event!("batch", "opened", "{}", path.display());
/// log_event!("mqtt", "connected");
/// ```
#[macro_export]
macro_rules! log_event {
    ($component:expr, $event:expr) => {
        tracing::info!("[{}] {}", $component, $event)
    };
    ($component:expr, $event:expr, $($arg:tt)*) => {
        tracing::info!("[{}] {}: {}", $component, $event, format!($($arg)*))
    };
}

/// Debug-only event logging.
///
/// # Examples
/// ```ignore
/// debug_event!("batch", "event", "{:?}", event);
/// ```
#[macro_export]
macro_rules! debug_event {
    ($component:expr, $event:expr) => {
        tracing::debug!("[{}] {}", $component, $event)
    };
    ($component:expr, $event:expr, $($arg:tt)*) => {
        tracing::debug!("[{}] {}: {}", $component, $event, format!($($arg)*))
    };
}
