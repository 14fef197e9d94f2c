use anyhow::{Context, Result};
use axum::Router;
use std::{io::ErrorKind, path::Path};
use tokio::{fs, net::TcpListener};
use tracing_subscriber::EnvFilter;

mod config;
mod errors;
mod handlers;
mod models;
mod routes;
mod services;
mod state;

#[tokio::main]
async fn main() -> Result<()> {
    // --- Logging setup ---
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    // --- Parse config ---
    let cfg = config::AppConfig::from_env_and_args()?;

    tracing::info!("Starting orgshare with config: {:?}", cfg);

    // --- Ensure working directories exist ---
    for dir in [&cfg.save_dir, &cfg.temp_dir] {
        ensure_dir(dir).await?;
    }
    if cfg.storage_backend == config::StorageBackend::Local {
        ensure_dir(&cfg.storage_dir).await?;
    }
    if !fs::try_exists(&cfg.sample_file).await.unwrap_or(false) {
        tracing::warn!(
            "Sample file {} not found, new buckets will start empty",
            cfg.sample_file.display()
        );
    }

    // --- Build router ---
    let addr = cfg.addr();
    let host = cfg.host.clone();
    let port = cfg.port;
    let routes = routes::routes::routes(&cfg);
    let state = state::AppState::from_config(cfg)?;
    let app: Router = routes.with_state(state);

    // --- Start server ---
    let listener = match TcpListener::bind(&addr).await {
        Ok(listener) => listener,
        Err(err)
            if err.kind() == ErrorKind::PermissionDenied
                && matches!(host.as_str(), "0.0.0.0" | "::") =>
        {
            let fallback_addr = format!("127.0.0.1:{}", port);
            tracing::warn!(
                "Permission denied binding to {} ({}). Falling back to {}",
                addr,
                err,
                fallback_addr
            );
            TcpListener::bind(&fallback_addr).await?
        }
        Err(err) => return Err(err.into()),
    };

    tracing::info!("Server listening on http://{}", listener.local_addr()?);
    axum::serve(listener, app).await?;

    Ok(())
}

async fn ensure_dir(dir: &Path) -> Result<()> {
    if !fs::try_exists(dir).await.unwrap_or(false) {
        fs::create_dir_all(dir)
            .await
            .with_context(|| format!("creating {}", dir.display()))?;
        tracing::info!("Created directory {}", dir.display());
    }
    Ok(())
}
