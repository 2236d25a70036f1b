use std::sync::Arc;

use tokio::sync::RwLock;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use fishing_outcome_server::config::ServerConfig;
use fishing_outcome_server::metrics::{self, Metrics};
use fishing_outcome_server::net::game_session::{shutdown_all, start_dispatcher, GameSession};
use fishing_outcome_server::net::transport::FishingServer;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env file if present
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_target(false)
        .init();

    info!("Fishing Outcome Server v{}", env!("CARGO_PKG_VERSION"));

    let config = ServerConfig::load_or_default();
    config.validate().map_err(anyhow::Error::msg)?;

    let rules = Arc::new(config.rules()?);
    info!(
        "Configuration loaded: {}:{}, max_players={}, {} species, {:?} selection, {}ms catch window",
        config.bind_address,
        config.port,
        config.max_players,
        rules.species.len(),
        rules.selection,
        rules.catch_window_ms
    );
    if config.accept_client_catches {
        info!("Client-reported catches are accepted (validated)");
    }

    let metrics = Arc::new(Metrics::new());

    let metrics_clone = metrics.clone();
    let metrics_port = config.metrics_port;
    tokio::spawn(async move {
        if let Err(e) = metrics::start_metrics_server(metrics_clone, metrics_port).await {
            error!("Metrics server error: {}", e);
        }
    });

    let (session, updates) = GameSession::new(&config, rules, metrics.clone());
    let session = Arc::new(RwLock::new(session));
    let dispatcher = start_dispatcher(session.clone(), updates);

    let server = FishingServer::new(config.clone(), session.clone(), metrics);
    info!("Server ready on ws://{}/", server.bind_addr());

    let shutdown = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
        info!("Shutdown signal received");
    };

    tokio::select! {
        result = server.run() => {
            if let Err(e) = result {
                error!("Server error: {}", e);
            }
        }
        _ = shutdown => {
            info!("Shutting down...");
        }
    }

    shutdown_all(&session).await;
    dispatcher.abort();
    info!("Server stopped");

    Ok(())
}
