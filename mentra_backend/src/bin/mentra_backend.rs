use anyhow::{Context, Result};
use flume::unbounded;
use mentra_backend::config::MentraConfig;
use mentra_backend::runtime::BackendRuntime;
use mentra_backend::server::serve_backend;
use tracing_subscriber::EnvFilter;

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,mentra_backend=debug")),
        )
        .init();

    let config = MentraConfig::load();
    let (event_tx, event_rx) = unbounded();
    let runtime = BackendRuntime::bootstrap(config, event_tx)
        .context("failed to bootstrap backend runtime")?;

    tracing::info!(
        "Starting Mentra backend (database: {}, auth mode: {:?})",
        runtime.config.database_path,
        runtime.config.auth_mode
    );

    let server_rt = tokio::runtime::Runtime::new().context("failed to start server runtime")?;
    server_rt.block_on(serve_backend(runtime, event_rx))
}
