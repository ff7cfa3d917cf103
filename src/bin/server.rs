use log::{error, info, warn};
use std::net::SocketAddr;
use std::time::Duration;

use portal_auth::config::ServerConfig;
use portal_auth::handlers::routes;
use portal_auth::security_logger::init_security_logger;
use portal_auth::state::AppState;
use portal_auth::storage;

const STATE_CLEANUP_INTERVAL: Duration = Duration::from_secs(60);

#[tokio::main]
async fn main() {
    // Initialize env
    match dotenvy::dotenv() {
        Ok(path) => info!("Environment variables loaded from {}", path.display()),
        Err(e) => warn!("Failed to load .env file: {}", e),
    };

    // Initialize logging
    env_logger::init();
    init_security_logger();

    // Missing or weak settings abort startup
    let config = match ServerConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            error!("{}", e);
            std::process::exit(1);
        }
    };

    info!(
        "Configuration: host={}, port={}, transport={:?}, secure_cookies={}",
        config.host, config.port, config.token_transport, config.secure_cookies
    );

    let addr: SocketAddr = match config.socket_addr().parse() {
        Ok(addr) => addr,
        Err(e) => {
            error!("Failed to parse server address: {}", e);
            std::process::exit(1);
        }
    };

    let storage = match storage::connect(&config).await {
        Ok(storage) => storage,
        Err(e) => {
            error!("Failed to open storage: {}", e);
            std::process::exit(1);
        }
    };

    let grace = config.shutdown_grace;
    let state = match AppState::new(config, storage.clone()) {
        Ok(state) => state,
        Err(e) => {
            error!("Failed to initialize application state: {}", e);
            std::process::exit(1);
        }
    };

    if let Err(e) = state.ensure_bootstrap_admin().await {
        error!("Failed to create bootstrap admin: {}", e);
        std::process::exit(1);
    }

    let cleanup = state.start_cleanup_task(STATE_CLEANUP_INTERVAL);

    let (shutdown_tx, shutdown_rx) = tokio::sync::oneshot::channel::<()>();
    let (addr, server) = match warp::serve(routes(state))
        .try_bind_with_graceful_shutdown(addr, async move {
            shutdown_rx.await.ok();
        }) {
        Ok(bound) => bound,
        Err(e) => {
            error!("Failed to bind {}: {}", addr, e);
            std::process::exit(1);
        }
    };

    info!("Starting portal auth server on {} ({} storage)", addr, storage.backend_name());
    let server = tokio::spawn(server);

    shutdown_signal().await;
    info!("Shutdown signal received, draining requests for up to {:?}", grace);
    let _ = shutdown_tx.send(());

    match tokio::time::timeout(grace, server).await {
        Ok(Ok(())) => info!("All connections closed"),
        Ok(Err(e)) => error!("Server task failed: {}", e),
        Err(_) => warn!("Grace period elapsed with requests still in flight"),
    }

    cleanup.abort();
    storage.close().await;
    info!("Server stopped");
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!("Failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
