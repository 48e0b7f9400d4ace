//! JSON structured logging on stdout.

use tracing_subscriber::EnvFilter;

use crate::config::Config;

/// Install the global tracing subscriber. Call once at startup, before
/// anything logs.
pub fn init(config: &Config) {
    let filter = EnvFilter::try_new(&config.log_level)
        .unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .json()
        .flatten_event(true)
        .with_current_span(false)
        .with_span_list(false)
        .with_env_filter(filter)
        .init();
}
