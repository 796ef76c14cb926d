//! partload command-line entry point.

mod app;
mod config;

use tracing_subscriber::EnvFilter;

fn main() -> anyhow::Result<()> {
    // Initialize structured logging.
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let args = app::Args::parse(std::env::args().skip(1))?;

    tracing::info!(version = env!("CARGO_PKG_VERSION"), "starting partload");

    let config = config::Config::load()?;
    tracing::info!(endpoint = %config.api_endpoint, "configuration loaded");

    let rt = tokio::runtime::Runtime::new()?;
    rt.block_on(app::run(config, args))
}
