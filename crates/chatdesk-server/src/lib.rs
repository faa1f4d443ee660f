//! Real-time conversation routing and presence server for chatdesk.
//!
//! Customers (through the embeddable widget) and agents (through the
//! dashboard) connect over one WebSocket endpoint. The server keeps room
//! membership, typing and presence state in memory, decides whether a customer
//! message opens a new conversation or continues an existing one, persists
//! messages through a [`chatdesk_store::ConversationStore`] and fans events
//! out to the right connections.
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use chatdesk_server::{Server, ServerConfig};
//! use chatdesk_store::InMemoryStore;
//!
//! let config = ServerConfig::new().with_bind_address("127.0.0.1:8080".parse()?);
//! let server = Server::new(Arc::new(InMemoryStore::new()), config);
//! server.run().await?;
//! ```

pub mod config;
pub mod error;
pub mod realtime;
pub mod routes;
pub mod state;

pub use config::ServerConfig;
pub use error::{Result, ServerError};
pub use realtime::{ConnectionId, Realtime, Room};
pub use routes::{ClientEvent, HealthResponse, ServerEvent};
pub use state::AppState;

use std::future::Future;
use std::net::SocketAddr;

use axum::Router;
use axum::http::HeaderValue;
use chatdesk_store::SharedStore;
use tokio::net::TcpListener;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

/// The chatdesk HTTP/WebSocket server.
pub struct Server {
    /// Application state.
    state: AppState,
}

impl Server {
    /// Create a new server over the given store.
    pub fn new(store: SharedStore, config: ServerConfig) -> Self {
        Self {
            state: AppState::new(store, config),
        }
    }

    /// Create a server from a pre-built application state.
    pub fn from_state(state: AppState) -> Self {
        Self { state }
    }

    /// Shared state, e.g. for inspecting the real-time core.
    pub fn state(&self) -> &AppState {
        &self.state
    }

    /// Build the router with all routes and middleware.
    pub fn router(&self) -> Router {
        use axum::routing::get;

        let mut router = Router::new()
            .merge(routes::health_routes())
            .route("/ws", get(routes::ws_handler))
            .nest("/api/v1", self.api_routes());

        if let Some(cors) = self.cors_layer() {
            router = router.layer(cors);
        }

        router
            .layer(TraceLayer::new_for_http())
            .with_state(self.state.clone())
    }

    /// API routes (v1).
    fn api_routes(&self) -> Router<AppState> {
        use axum::routing::get;

        Router::new().route(
            "/conversations/{id}",
            get(routes::get_conversation_handler),
        )
    }

    fn cors_layer(&self) -> Option<CorsLayer> {
        let origins = &self.state.config.cors_origins;
        if origins.is_empty() {
            return None;
        }
        if origins.iter().any(|o| o == "*") {
            return Some(CorsLayer::new().allow_origin(Any).allow_methods(Any).allow_headers(Any));
        }

        let allowed: Vec<HeaderValue> = origins
            .iter()
            .filter_map(|origin| match origin.parse() {
                Ok(value) => Some(value),
                Err(_) => {
                    warn!(origin = %origin, "Ignoring invalid CORS origin");
                    None
                }
            })
            .collect();
        Some(
            CorsLayer::new()
                .allow_origin(allowed)
                .allow_methods(Any)
                .allow_headers(Any),
        )
    }

    /// Run the server until the process is stopped.
    pub async fn run(self) -> Result<()> {
        let addr = self.state.config.bind_address;
        self.run_until(addr, std::future::pending()).await
    }

    /// Run the server on a specific address (useful for testing).
    pub async fn run_on(self, addr: SocketAddr) -> Result<()> {
        self.run_until(addr, std::future::pending()).await
    }

    /// Run the server on `addr` until `shutdown` resolves.
    pub async fn run_until<F>(self, addr: SocketAddr, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let router = self.router();

        info!("Starting server on {}", addr);

        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| ServerError::Internal(format!("Failed to bind: {}", e)))?;

        axum::serve(listener, router)
            .with_graceful_shutdown(shutdown)
            .await
            .map_err(|e| ServerError::Internal(format!("Server error: {}", e)))?;

        info!("Server stopped");
        Ok(())
    }

    /// Get the configured bind address.
    pub fn bind_address(&self) -> SocketAddr {
        self.state.config.bind_address
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use axum::{
        body::Body,
        http::{Request, StatusCode, header},
    };
    use chatdesk_store::InMemoryStore;
    use tower::ServiceExt;

    fn server(config: ServerConfig) -> Server {
        Server::new(Arc::new(InMemoryStore::new()), config)
    }

    #[tokio::test]
    async fn test_server_health_endpoint() {
        let app = server(ServerConfig::default()).router();

        let response = app
            .oneshot(
                Request::builder()
                    .uri("/health")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_unknown_conversation_is_404() {
        let app = server(ServerConfig::default()).router();

        let response = app
            .oneshot(
                Request::builder()
                    .uri("/api/v1/conversations/missing")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_cors_header_for_allowed_origin() {
        let config = ServerConfig::default()
            .with_cors_origins(vec!["https://support.example.com".to_string()]);
        let app = server(config).router();

        let response = app
            .oneshot(
                Request::builder()
                    .uri("/health")
                    .header(header::ORIGIN, "https://support.example.com")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(
            response
                .headers()
                .get(header::ACCESS_CONTROL_ALLOW_ORIGIN)
                .unwrap(),
            "https://support.example.com"
        );
    }

    #[test]
    fn test_bind_address_from_config() {
        let config = ServerConfig::new().with_bind_address("0.0.0.0:9000".parse().unwrap());
        assert_eq!(server(config).bind_address().port(), 9000);
    }
}
