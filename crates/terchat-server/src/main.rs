use std::sync::Arc;

use anyhow::Context;
use terchat_server::{AppState, Server, ServerConfig};
use terchat_shared::constants::APP_NAME;
use terchat_store::Store;
use tokio::net::TcpListener;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // -----------------------------------------------------------------------
    // 1. Initialize tracing (respects RUST_LOG env var)
    // -----------------------------------------------------------------------
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,terchat_server=debug")),
        )
        .init();

    info!("Starting {} server v{}", APP_NAME, env!("CARGO_PKG_VERSION"));

    // -----------------------------------------------------------------------
    // 2. Load configuration
    // -----------------------------------------------------------------------
    let config = ServerConfig::from_env();
    info!(?config, "Loaded configuration");

    // -----------------------------------------------------------------------
    // 3. Open the store (creates the data directory if missing)
    // -----------------------------------------------------------------------
    let store = Store::open(&config.data_dir)
        .with_context(|| format!("opening store at {}", config.data_dir.display()))?;
    info!(
        root = %store.root().display(),
        users = store.registered_count(),
        "Store ready"
    );

    let listener = TcpListener::bind(config.listen_addr)
        .await
        .with_context(|| format!("binding {}", config.listen_addr))?;

    // -----------------------------------------------------------------------
    // 4. Serve until the listener fails or Ctrl+C
    // -----------------------------------------------------------------------
    let server = Arc::new(Server::new(AppState::new(store, config)));
    let mut serve = tokio::spawn({
        let server = Arc::clone(&server);
        async move { server.serve(listener).await }
    });

    tokio::select! {
        result = &mut serve => {
            if let Err(e) = result? {
                tracing::error!(error = %e, "Listener failed");
                return Err(e);
            }
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Received Ctrl+C, shutting down");
            server.shutdown().await;
            serve.await??;
        }
    }

    Ok(())
}
