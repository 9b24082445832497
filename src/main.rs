//! Service entry point: loads configuration from the environment, wires
//! the façade, mounts the Live-Update Fabric's websocket route, and
//! serves until `SIGINT`/`SIGTERM`.

use std::sync::Arc;

use log::{error, info};
use tagflow_core::{AppConfig, Facade};

#[tokio::main]
async fn main() {
    env_logger::init();

    let config = match AppConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            error!("startup: {e}");
            std::process::exit(1);
        }
    };

    let addr = format!("{}:{}", config.websocket_host, config.websocket_port);
    info!("tagflow-serviced: opening database at {}", config.database_path.display());

    let facade = match Facade::new(config).await {
        Ok(facade) => Arc::new(facade),
        Err(e) => {
            error!("startup: failed to initialize facade: {e}");
            std::process::exit(1);
        }
    };

    facade.fabric.spawn_heartbeat();

    let router = facade.fabric.router();
    let listener = match tokio::net::TcpListener::bind(&addr).await {
        Ok(listener) => listener,
        Err(e) => {
            error!("startup: failed to bind {addr}: {e}");
            std::process::exit(1);
        }
    };
    info!("tagflow-serviced: live-update fabric listening on ws://{addr}/ws");

    if let Err(e) = axum::serve(listener, router).with_graceful_shutdown(shutdown_signal()).await {
        error!("server error: {e}");
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        let _ = tokio::signal::ctrl_c().await;
    };

    #[cfg(unix)]
    let terminate = async {
        let mut signal = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler");
        signal.recv().await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
    info!("tagflow-serviced: shutdown signal received");
}
