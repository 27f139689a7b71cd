//! API Server
//!
//! Binds the router with its middleware stack and serves until a shutdown
//! signal arrives.

use super::{
    handlers::AppState,
    middleware::{create_cors_layer, request_id_middleware},
    routes::create_router,
};
use crate::config::ServerConfig;
use crate::services::ServiceContainer;
use std::{net::SocketAddr, sync::Arc, time::Duration};
use tokio::signal;
use tower_http::{timeout::TimeoutLayer, trace::TraceLayer};
use tracing::info;

pub struct ApiServer {
    config: ServerConfig,
    services: ServiceContainer,
}

impl ApiServer {
    pub fn new(services: ServiceContainer) -> Self {
        Self {
            config: services.config().server.clone(),
            services,
        }
    }

    pub async fn run(self) -> Result<(), Box<dyn std::error::Error>> {
        let addr = self.get_socket_addr()?;
        self.log_server_info(&addr);

        let app = create_app(self.services, &self.config);
        let listener = tokio::net::TcpListener::bind(addr).await?;
        info!("API server running on http://{}", addr);

        axum::serve(listener, app)
            .with_graceful_shutdown(shutdown_signal())
            .await?;

        info!("API server stopped gracefully");
        Ok(())
    }

    fn get_socket_addr(&self) -> Result<SocketAddr, Box<dyn std::error::Error>> {
        Ok(SocketAddr::from((
            self.config.host.parse::<std::net::IpAddr>()?,
            self.config.port,
        )))
    }

    fn log_server_info(&self, addr: &SocketAddr) {
        let config = self.services.config();
        info!(
            %addr,
            cors = ?self.config.allowed_origins,
            request_timeout_secs = self.config.request_timeout_secs,
            backend = ?config.storage.backend,
            coins = config.game.coins,
            "Server configuration"
        );
        info!("Available endpoints:");
        info!("   GET  /health");
        info!("   GET  /menu");
        info!("   POST /game");
        info!("   GET  /game/:game_id?sum=");
        info!("   POST /game/:game_id/round/:round/:choice");
        info!("   GET  /metrics");
    }
}

/// Router with the full middleware stack
pub fn create_app(services: ServiceContainer, config: &ServerConfig) -> axum::Router {
    let state = Arc::new(AppState::new(services));

    create_router(state)
        // Request ID middleware (first for tracing)
        .layer(axum::middleware::from_fn(request_id_middleware))
        // CORS layer (before timeout to handle preflight)
        .layer(create_cors_layer(config.allowed_origins.clone()))
        // Must outlast the lobby wait and the long poll
        .layer(TimeoutLayer::new(Duration::from_secs(config.request_timeout_secs)))
        .layer(TraceLayer::new_for_http())
}

/// Wait for shutdown signal
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C signal");
        },
        _ = terminate => {
            info!("Received terminate signal");
        },
    }
}
