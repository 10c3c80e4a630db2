use anyhow::{Context, Result};
use earthlink_core::config::EarthlinkConfig;
use earthlink_core::runtime::SessionRuntime;
use earthlink_core::server::serve_backend;
use tracing_subscriber::EnvFilter;

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,earthlink_core=debug")),
        )
        .init();

    // Leave an editable template behind on first run. Defaults only, so
    // tokens from the environment never land on disk.
    if !EarthlinkConfig::config_path().exists() {
        if let Err(e) = EarthlinkConfig::default().save() {
            tracing::warn!("Could not write default config: {:#}", e);
        }
    }
    let config = EarthlinkConfig::load();

    tracing::info!(
        "Starting session server (set EARTHLINK_TOKEN + optional EARTHLINK_BIND; \
         auth mode via EARTHLINK_AUTH_MODE)"
    );

    let server_rt = tokio::runtime::Runtime::new().context("failed to start server runtime")?;
    server_rt.block_on(async move {
        let runtime = SessionRuntime::bootstrap(config)
            .await
            .context("failed to bootstrap session runtime")?;
        serve_backend(runtime).await
    })
}
