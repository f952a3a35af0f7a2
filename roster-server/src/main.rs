//! Roster Presence Server
//!
//! Presence and lightweight messaging over reconnecting sockets.
//! Provides:
//! - WebSocket endpoint for the presence protocol
//! - Static mount for the bundled client assets
//! - HTTP endpoints for health checks and Prometheus metrics
//! - Periodic session/contact count report

use std::sync::Arc;
use std::time::Instant;

use tokio::net::TcpListener;
use tracing::info;

use roster_server::config::ServerConfig;
use roster_server::directory::StaticDirectory;
use roster_server::http::{create_router, HttpState};
use roster_server::metrics::PresenceMetrics;
use roster_server::server::PresenceServer;
use roster_server::ws;

#[tokio::main]
async fn main() {
    // Load configuration first; it decides log verbosity.
    let config = ServerConfig::from_env();

    let default_level = if config.debug { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env().add_directive(
                format!("roster_server={default_level}")
                    .parse()
                    .expect("invalid log directive"),
            ),
        )
        .init();

    info!(
        "Starting Roster Presence Server v{}",
        env!("CARGO_PKG_VERSION")
    );
    info!("WebSocket: {} ({})", config.listen_addr, config.server_route);
    info!("HTTP (client/health/metrics): {}", config.http_addr);

    let directory_file = std::env::var("ROSTER_DIRECTORY_FILE")
        .unwrap_or_else(|_| "directory.json".to_string());
    let directory = Arc::new(
        StaticDirectory::from_file(std::path::Path::new(&directory_file))
            .expect("Failed to load directory file"),
    );

    let metrics = PresenceMetrics::new();
    let server = PresenceServer::new(config.clone(), directory, metrics.clone());
    let handle = server.handle();
    let server_id = server.server_id();

    // HTTP server for the client mount, health and metrics.
    let http_state = HttpState {
        metrics: metrics.clone(),
        start_time: Instant::now(),
    };
    let http_router = create_router(&config, http_state);
    let http_addr = config.http_addr;
    let http_listener = TcpListener::bind(&http_addr)
        .await
        .expect("Failed to bind HTTP listener");
    tokio::spawn(async move {
        info!("HTTP server listening on {}", http_addr);
        axum::serve(http_listener, http_router)
            .await
            .expect("HTTP server failed");
    });

    // The actor owning registry and graph state.
    tokio::spawn(server.run());

    let listener = TcpListener::bind(&config.listen_addr)
        .await
        .expect("Failed to bind WebSocket listener");
    info!("WebSocket server listening on {}", config.listen_addr);

    ws::run(listener, config, handle, metrics, server_id).await;
}
