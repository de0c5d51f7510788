//! Read-only HTTP API over the state store
//!
//! ## Endpoints
//!
//! - `GET /health` - Liveness and number of configured targets
//! - `GET /api/v1/instances?since=<ts>` - Index of instance status
//! - `GET /api/v1/instances/:id` - Full record of one instance
//! - `GET /api/v1/state?ids=a,b` - Full records, optionally filtered

pub mod error;
pub mod routes;
pub mod state;

pub use error::{ApiError, ApiResult};
pub use state::ApiState;

use axum::{Router, routing::get};
use std::net::SocketAddr;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::info;

/// API server configuration
#[derive(Debug, Clone)]
pub struct ApiConfig {
    /// Bind address (e.g., "0.0.0.0:8080")
    pub bind_addr: SocketAddr,

    /// Allow cross-origin requests from any origin
    pub enable_cors: bool,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([127, 0, 0, 1], 8080)),
            enable_cors: true,
        }
    }
}

/// Build the router with all routes and layers
pub fn router(config: &ApiConfig, state: ApiState) -> Router {
    let mut app = Router::new()
        .route("/health", get(routes::health::health_check))
        .route("/api/v1/instances", get(routes::instances::list_instances))
        .route("/api/v1/instances/:id", get(routes::instances::get_instance))
        .route("/api/v1/state", get(routes::instances::get_state))
        .with_state(state)
        .layer(TraceLayer::new_for_http());

    if config.enable_cors {
        let cors = CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(Any);
        app = app.layer(cors);
    }

    app
}

/// Spawn the API server
///
/// Starts serving in a background task and returns the bound address.
pub async fn spawn_api_server(config: ApiConfig, state: ApiState) -> anyhow::Result<SocketAddr> {
    info!("starting API server on {}", config.bind_addr);

    let app = router(&config, state);

    let listener = tokio::net::TcpListener::bind(config.bind_addr).await?;
    let addr = listener.local_addr()?;

    info!("API server listening on {}", addr);

    tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app).await {
            tracing::error!("API server error: {}", e);
        }
    });

    Ok(addr)
}
