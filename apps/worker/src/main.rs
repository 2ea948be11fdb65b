//! genworker entry point.

mod app;
mod config;
mod engine;
mod handler;
mod queue;
mod template;

use tracing_subscriber::EnvFilter;

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,genworker=debug")),
        )
        .init();

    tracing::info!(version = env!("CARGO_PKG_VERSION"), "starting genworker");

    let config = config::Config::load()?;
    tracing::info!(
        name = %config.name,
        api_base = %config.api_base,
        engine = %config.engine_url,
        "configuration loaded"
    );

    let rt = tokio::runtime::Runtime::new()?;
    rt.block_on(app::run(config))?;

    tracing::info!("worker shut down cleanly");
    Ok(())
}
