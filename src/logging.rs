//! Logging configuration and initialization

use crate::config::Settings;
use tracing::debug;
use tracing_subscriber::EnvFilter;

/// Initialize tracing for processes embedding the engine
///
/// `RUST_LOG` takes precedence over `Settings::log_level`. Calling this more
/// than once keeps the first subscriber.
pub fn init_logging(settings: &Settings) {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&settings.log_level))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    let installed = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .try_init()
        .is_ok();

    if installed {
        debug!("Logging initialized at level: {}", settings.log_level);
    }
}
