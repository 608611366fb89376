//! HTTP server wiring for the session API and pipeline progress stream.

pub mod api;
pub mod sse;

use std::sync::Arc;

use anyhow::{Context, Result};
use axum::Router;
use tower_http::cors::CorsLayer;
use tracing::info;

use crate::backend::{GenerationBackend, HttpBackend};
use crate::config::Config;
use crate::pipeline::PipelineRunner;
use crate::session::OwnerGate;
use crate::store::{Db, DbHandle};

use api::{AppState, SharedState};

/// Configuration for the distill server.
pub struct ServerConfig {
    pub port: u16,
    pub db_path: std::path::PathBuf,
    pub dev_mode: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: 4242,
            db_path: std::path::PathBuf::from(".distill/distill.db"),
            dev_mode: false,
        }
    }
}

/// Build the application router.
pub fn build_router(state: SharedState) -> Router {
    api::api_router().with_state(state)
}

/// Start the distill server.
pub async fn start_server(server: ServerConfig, config: &Config) -> Result<()> {
    // Ensure parent directory exists for the database.
    if let Some(parent) = server.db_path.parent() {
        std::fs::create_dir_all(parent).context("Failed to create database directory")?;
    }

    let db = DbHandle::new(Db::new(&server.db_path).context("Failed to initialize database")?);
    let backend: Arc<dyn GenerationBackend> = Arc::new(HttpBackend::new(&config.backend));
    let runner = PipelineRunner::new(db.clone(), backend, Arc::new(OwnerGate));

    let state = Arc::new(AppState { db, runner });

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
    info!("distill running at http://{}", local_addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    info!("server shut down gracefully");
    Ok(())
}

async fn shutdown_signal() {
    if tokio::signal::ctrl_c().await.is_err() {
        info!("ctrl-c handler unavailable, running until killed");
        std::future::pending::<()>().await;
    }
    info!("shutting down");
}
