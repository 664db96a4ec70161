use anyhow::{Context, Result};
use axum::{routing::get, serve, Router};
use clap::Parser;
use std::sync::Arc;
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;
use tracing::info;
use tracing_subscriber::EnvFilter;

use config_hub::api;
use config_hub::config::{load_config, Cli};
use config_hub_core::store::ConfinedStore;
use config_hub_core::watch::{ChangeStream, WatchRegistry};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = load_config(Cli::parse())?;

    tokio::fs::create_dir_all(&config.root)
        .await
        .with_context(|| format!("creating {}", config.root.display()))?;
    let store = Arc::new(
        ConfinedStore::new(&config.root)
            .with_context(|| format!("resolving {}", config.root.display()))?,
    );
    let changes = Arc::new(ChangeStream::new(
        store.root(),
        config.watch.clone(),
        WatchRegistry::new(),
    ));

    let app = Router::new()
        .merge(api::router(store.clone(), changes))
        .route("/health", get(|| async { "OK" }))
        .layer(TraceLayer::new_for_http());

    let listener = TcpListener::bind(config.addr)
        .await
        .with_context(|| format!("binding {}", config.addr))?;
    info!(
        addr = %config.addr,
        root = %store.root().display(),
        debounce_ms = config.watch.debounce.as_millis() as u64,
        "config hub listening"
    );
    serve(listener, app.into_make_service()).await?;
    Ok(())
}
