//! Web server module: a read-only status page and JSON API over stored
//! check results.

mod handlers;

pub use handlers::*;

use crate::config::ServerConfig;
use crate::storage::Storage;

use axum::{routing::get, Router};
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

/// Application state shared across handlers.
#[derive(Clone)]
pub struct AppState {
    pub config: ServerConfig,
    pub storage: Arc<dyn Storage>,
}

/// Status web server.
pub struct Server {
    state: AppState,
}

impl Server {
    pub fn new(config: ServerConfig, storage: Arc<dyn Storage>) -> Self {
        Self {
            state: AppState { config, storage },
        }
    }

    /// Build the router with all routes.
    fn routes(&self) -> Router {
        let cors = CorsLayer::new().allow_origin(Any).allow_methods(Any);

        Router::new()
            .route("/", get(handlers::handle_status))
            .route("/api/index", get(handlers::handle_get_index))
            .route("/api/latest", get(handlers::handle_get_latest))
            .route("/api/checks/{name}", get(handlers::handle_get_check))
            .layer(TraceLayer::new_for_http())
            .layer(cors)
            .with_state(self.state.clone())
    }

    /// Serve on an already bound listener.
    pub async fn serve(&self, listener: tokio::net::TcpListener) -> std::io::Result<()> {
        axum::serve(listener, self.routes()).await
    }

    /// Start the server on the configured port.
    pub async fn start(&self) -> std::io::Result<()> {
        let addr = SocketAddr::from(([0, 0, 0, 0], self.state.config.http_port));
        tracing::info!("Web server listening on {}", addr);

        let listener = tokio::net::TcpListener::bind(addr).await?;
        self.serve(listener).await
    }
}
