//! Logging and metrics setup for the binary.
//!
//! Library code only emits `tracing` events and `metrics` values; this
//! module decides where they go.

use std::net::SocketAddr;

use anyhow::{Context, Result};
use metrics_exporter_prometheus::PrometheusBuilder;
use tracing_subscriber::EnvFilter;

use crate::config::{LoggingConfig, MetricsConfig};

/// Install the global tracing subscriber.
///
/// `RUST_LOG` wins over `logging.level`. Output goes to stderr so stdout
/// stays clean for command summaries. `auto` picks pretty output on a TTY
/// and JSON otherwise.
pub fn init_logging(config: &LoggingConfig) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.level));

    let json = match config.format.as_str() {
        "json" => true,
        "pretty" => false,
        _ => !atty::is(atty::Stream::Stderr),
    };

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr);

    // A second init (tests, embedding) keeps the first subscriber.
    let _ = if json {
        builder.json().try_init()
    } else {
        builder.try_init()
    };
}

/// Start the Prometheus scrape endpoint when `metrics.listen` is set.
pub fn init_metrics(config: &MetricsConfig) -> Result<()> {
    let Some(listen) = &config.listen else {
        return Ok(());
    };
    let addr: SocketAddr = listen
        .parse()
        .with_context(|| format!("Invalid metrics.listen address: {}", listen))?;
    PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
        .context("Failed to start Prometheus exporter")?;
    tracing::info!(%addr, "metrics endpoint listening");
    Ok(())
}
