//! Logging setup for the engine and the CLI front-end.

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Initialize the tracing subscriber.
///
/// `RUST_LOG` wins when set; otherwise `level` applies to the `snapvault`
/// target only, so library consumers embedding the engine are not spammed by
/// their own dependencies.
pub fn init(level: &str) -> anyhow::Result<()> {
    let directives = format!("warn,snapvault={level}");
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&directives))
        .unwrap_or_else(|_| EnvFilter::new("warn,snapvault=info"));

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .init();

    Ok(())
}
