//! Process-wide tracing setup.
//!
//! The storage layer logs through `log`; everything else emits `tracing`
//! spans and events. [`init_tracing`] routes both into one subscriber.

use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::{fmt, EnvFilter, Layer, Registry};

use crate::config::LoggingConfig;
use crate::error::ConfigError;

/// Installs the global subscriber and the `log` bridge.
///
/// `RUST_LOG` wins over the configured filter. Returns `Ok(false)` when a
/// global subscriber was already installed, which leaves the existing one in
/// place.
pub fn init_tracing(config: &LoggingConfig) -> Result<bool, ConfigError> {
    let filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => EnvFilter::try_new(&config.filter)
            .map_err(|e| ConfigError::Logging(format!("bad filter '{}': {}", config.filter, e)))?,
    };

    let fmt_layer: Box<dyn Layer<Registry> + Send + Sync> = if config.json {
        fmt::layer().json().with_current_span(true).boxed()
    } else {
        fmt::layer().with_target(true).boxed()
    };

    let subscriber = tracing_subscriber::registry().with(fmt_layer).with(filter);

    if tracing::subscriber::set_global_default(subscriber).is_err() {
        return Ok(false);
    }

    if let Err(e) = tracing_log::LogTracer::init() {
        tracing::debug!("log bridge already installed: {}", e);
    }

    Ok(true)
}
