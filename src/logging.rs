//! Tracing subscriber setup.
//!
//! All log output goes to stderr. The process-isolated worker uses stdout as its
//! status wire, so nothing else may ever write there.

use crate::config::{ApplicationConfig, LogFormat};
use tracing_subscriber::EnvFilter;

/// Install the global tracing subscriber.
///
/// `RUST_LOG` takes precedence over the configured level. Calling this twice is
/// harmless; the second call leaves the first subscriber in place.
pub fn init(app: &ApplicationConfig) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("maia_daq={}", app.log_level)));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(true);

    let result = match app.log_format {
        LogFormat::Pretty => builder.try_init(),
        LogFormat::Json => builder.json().try_init(),
    };

    if let Err(e) = result {
        tracing::debug!("tracing subscriber already installed: {}", e);
    }
}
