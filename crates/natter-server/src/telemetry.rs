//! Logging setup for the relay server.
//!
//! All output goes through `tracing-subscriber`. The filter comes from
//! `RUST_LOG` and defaults to `info,natter_relay=debug,natter_server=debug`.

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

const DEFAULT_FILTER: &str = "info,natter_relay=debug,natter_server=debug";

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    /// Single-line records with target, file and line
    #[default]
    Compact,
    /// Multi-line, human-oriented output for local development
    Pretty,
    /// One JSON object per record
    Json,
}

impl LogFormat {
    /// Parse a format name. Unknown values fall back to `Compact`.
    pub fn parse(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "pretty" | "local" => LogFormat::Pretty,
            "json" => LogFormat::Json,
            _ => LogFormat::Compact,
        }
    }
}

fn filter() -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER))
}

/// Initialize logging in the given format.
pub fn init(format: LogFormat) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    match format {
        LogFormat::Compact => {
            let fmt_layer = tracing_subscriber::fmt::layer()
                .with_target(true)
                .with_thread_ids(false)
                .with_file(true)
                .with_line_number(true);
            tracing_subscriber::registry()
                .with(filter())
                .with(fmt_layer)
                .try_init()?;
        }
        LogFormat::Pretty => return init_local(),
        LogFormat::Json => {
            let fmt_layer = tracing_subscriber::fmt::layer()
                .json()
                .with_current_span(true)
                .with_span_list(false);
            tracing_subscriber::registry()
                .with(filter())
                .with(fmt_layer)
                .try_init()?;
        }
    }

    tracing::info!(?format, "Telemetry initialized");
    Ok(())
}

/// Initialize pretty console logging for local development.
pub fn init_local() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let fmt_layer = tracing_subscriber::fmt::layer()
        .with_target(true)
        .with_thread_ids(false)
        .with_file(true)
        .with_line_number(true)
        .pretty();

    tracing_subscriber::registry()
        .with(filter())
        .with(fmt_layer)
        .try_init()?;

    tracing::info!("Local telemetry initialized");
    Ok(())
}

/// Flush logging before exit.
pub fn shutdown() {
    tracing::info!("Telemetry shutdown complete");
}
