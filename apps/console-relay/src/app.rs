use std::future::Future;

use anyhow::{Context, Result};
use axum::{routing::get, Router};
use tokio::net::TcpListener;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::config::ServerConfig;
use crate::handlers::{health_check, relay_stats};
use crate::hub::RelayHandle;
use crate::websocket::websocket_handler;

#[derive(Clone)]
pub struct AppState {
    pub relay: RelayHandle,
}

/// Builds the HTTP router. Sockets are accepted on `path_prefix` and on any
/// path below it; `{path_prefix}/viewer` attaches a viewer.
pub fn router(state: AppState, path_prefix: &str) -> Router {
    let prefix = path_prefix.trim_end_matches('/');
    Router::new()
        .route("/health", get(health_check))
        .route("/stats", get(relay_stats))
        .route(prefix, get(websocket_handler))
        .route(&format!("{prefix}/*rest"), get(websocket_handler))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Serves the relay on `listener` until `signal` resolves, then tears the
/// relay down so every socket receives a close frame.
pub async fn serve<F>(
    listener: TcpListener,
    relay: RelayHandle,
    path_prefix: &str,
    signal: F,
) -> Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let local_addr = listener.local_addr().context("listener has no local address")?;
    info!(%local_addr, path_prefix, "console relay listening");

    let app = router(
        AppState {
            relay: relay.clone(),
        },
        path_prefix,
    );
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            signal.await;
            info!("shutdown requested; closing relay connections");
            relay.shutdown().await;
        })
        .await
        .context("server shutdown with error")
}

/// Binds, serves until Ctrl-C, and waits out the shutdown grace period.
pub async fn run(config: ServerConfig) -> Result<()> {
    let listener = TcpListener::bind(config.listen_addr)
        .await
        .with_context(|| format!("failed to bind {}", config.listen_addr))?;
    let local_addr = listener.local_addr()?;

    if let Some(viewer_url) = &config.viewer_url {
        info!("remote console viewer: {viewer_url}?host=localhost:{}", local_addr.port());
    }

    let (relay, hub) = RelayHandle::spawn(config.relay.clone());
    serve(listener, relay.clone(), &config.path_prefix, shutdown_signal()).await?;

    relay.shutdown().await;
    hub.await.context("relay hub panicked")?;
    tokio::time::sleep(config.shutdown_grace).await;
    info!("console relay stopped");
    Ok(())
}

async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
}
