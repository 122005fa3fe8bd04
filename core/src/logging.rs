//! Structured logging setup, grounded on `phnx-im-air/server/src/logging.rs`: bunyan-formatted
//! JSON on stdout, level controlled by `RUST_LOG`/the configured `application.log` directive.

use tracing::level_filters::LevelFilter;
use tracing_bunyan_formatter::{BunyanFormattingLayer, JsonStorageLayer};
use tracing_log::LogTracer;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::{EnvFilter, Registry};

/// Installs the global subscriber. Call once, at process startup.
pub fn init_logging(default_directive: &str) {
    let env_filter = EnvFilter::builder()
        .with_default_directive(
            default_directive
                .parse()
                .unwrap_or(LevelFilter::INFO.into()),
        )
        .from_env_lossy();
    let formatting_layer = BunyanFormattingLayer::new("wire-sdk".into(), std::io::stdout);
    let subscriber = Registry::default()
        .with(env_filter)
        .with(JsonStorageLayer)
        .with(formatting_layer);

    LogTracer::init().expect("failed to set logger");
    tracing::subscriber::set_global_default(subscriber).expect("failed to set subscriber");
}
