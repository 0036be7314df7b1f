//! HTTP front-end for the re-entrant session adapter.

pub mod api;

use std::sync::Arc;

use anyhow::{Context, Result};
use axum::Router;
use tower_http::cors::CorsLayer;
use tracing::{error, info};

use crate::config::Config;
use crate::orchestrator::Orchestrator;
use crate::session::OrchestratorFactory;
use crate::stage::Agents;
use api::{AppState, SharedState};

/// Configuration for the HTTP server.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub port: u16,
    /// Bind on all interfaces and allow any origin
    pub dev_mode: bool,
}

pub fn build_router(state: SharedState) -> Router {
    api::api_router().with_state(state)
}

/// Sessions build command-backed orchestrators from `config`.
pub fn command_factory(config: Config) -> OrchestratorFactory {
    Arc::new(move || Orchestrator::new(config.clone(), Agents::from_config(&config)))
}

/// Serve until Ctrl+C.
pub async fn start_server(server: ServerConfig, config: Config) -> Result<()> {
    let state = Arc::new(AppState::new(
        config.registry(),
        command_factory(config.clone()),
        config.poll_interval_ms,
    ));

    let mut app = build_router(state);
    if server.dev_mode {
        app = app.layer(CorsLayer::permissive());
    }

    let host = if server.dev_mode { "0.0.0.0" } else { "127.0.0.1" };
    let addr = format!("{}:{}", host, server.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind to {}", addr))?;

    let local_addr = listener.local_addr()?;
    info!("Working directory: {}", config.work_dir.display());
    println!("Conductor running at http://{}", local_addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    println!("Server shut down gracefully.");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("Failed to install Ctrl+C handler: {}", e);
        std::future::pending::<()>().await;
    }
    println!("\nShutting down...");
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use tempfile::tempdir;
    use tower::ServiceExt;

    #[tokio::test]
    async fn test_health_via_full_router() {
        let dir = tempdir().unwrap();
        let config = Config::for_work_dir(dir.path(), Some("https://test.example.com"));
        let state = Arc::new(AppState::new(
            config.registry(),
            command_factory(config.clone()),
            config.poll_interval_ms,
        ));
        let app = build_router(state);

        let req = Request::builder()
            .uri("/health")
            .body(Body::empty())
            .unwrap();
        let resp = app.oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
    }

    #[test]
    fn test_command_factory_requires_endpoint() {
        let dir = tempdir().unwrap();
        let factory = command_factory(Config::for_work_dir(dir.path(), None));
        assert!(factory().is_err());
    }
}
