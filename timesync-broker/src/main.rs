//! Time-Sync Broker Server
//!
//! Coordinates clock-offset measurements between paired devices:
//! - WebSocket endpoint where devices keep persistent sessions
//! - HTTP endpoints for pairing management, measurements, and history
//! - NTP-style multi-sample selection with per-pair auto-sync schedules
//! - SQLite persistence for records, aggregates, and pairings

mod handler;
mod http;
mod metrics;

use std::sync::Arc;
use std::time::Instant;

use tokio::net::TcpListener;
use tracing::{error, info, warn};

use timesync_core::config::Config;
use timesync_core::hub::Hub;
use timesync_core::service::{AutoSyncMonitor, PairingOperator, SyncService};
use timesync_core::storage::Repository;

use http::{create_router, HttpState};
use metrics::BrokerMetrics;

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("timesync_broker=info".parse().unwrap())
                .add_directive("timesync_core=info".parse().unwrap()),
        )
        .init();

    let config = Arc::new(Config::from_env());
    if let Err(e) = config.validate() {
        error!("Invalid configuration: {}", e);
        std::process::exit(1);
    }

    info!("Starting Time-Sync Broker v{}", env!("CARGO_PKG_VERSION"));
    info!("HTTP API: 0.0.0.0:{}", config.http_port);
    info!("Device WebSocket: 0.0.0.0:{}", config.ws_port);
    info!("Database: {}", config.db_path.display());

    let repo = Arc::new(Repository::open(&config.db_path).expect("Failed to open database"));
    let hub = Hub::new();
    let service = Arc::new(SyncService::new(hub.clone(), repo.clone()));
    let monitor = Arc::new(AutoSyncMonitor::new(service.clone()));
    let operator = Arc::new(PairingOperator::new(
        hub.clone(),
        repo.clone(),
        monitor.clone(),
    ));
    hub.set_connect_listener(operator);

    // Event loop plus dead-session detector.
    tokio::spawn(hub.clone().run());

    let metrics = BrokerMetrics::new();
    let start_time = Instant::now();

    // HTTP operator plane.
    let http_state = HttpState {
        service,
        monitor: monitor.clone(),
        hub: hub.clone(),
        repo,
        config: config.clone(),
        metrics: metrics.clone(),
        start_time,
    };
    let router = create_router(http_state);
    let http_addr = format!("0.0.0.0:{}", config.http_port);
    let http_listener = TcpListener::bind(&http_addr)
        .await
        .expect("Failed to bind HTTP listener");
    tokio::spawn(async move {
        info!("HTTP server listening on {}", http_addr);
        if let Err(e) = axum::serve(http_listener, router).await {
            error!("HTTP server exited: {}", e);
        }
    });

    // Device plane.
    let ws_addr = format!("0.0.0.0:{}", config.ws_port);
    let listener = TcpListener::bind(&ws_addr)
        .await
        .expect("Failed to bind WebSocket listener");
    info!("WebSocket server listening on {}", ws_addr);

    loop {
        tokio::select! {
            accepted = listener.accept() => {
                match accepted {
                    Ok((stream, addr)) => {
                        let hub = hub.clone();
                        let metrics = metrics.clone();
                        let max_message_size = config.max_message_size;
                        tokio::spawn(async move {
                            info!("New connection from {}", addr);
                            handler::handle_connection(stream, hub, metrics, max_message_size)
                                .await;
                        });
                    }
                    Err(e) => warn!("Failed to accept connection: {}", e),
                }
            }
            _ = tokio::signal::ctrl_c() => {
                info!("Shutting down");
                monitor.shutdown();
                break;
            }
        }
    }
}
