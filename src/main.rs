use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::{error, info};

use relay_gateway::config::RelayConfig;
use relay_gateway::dao::{init_db, init_sqlite_pool};
use relay_gateway::logger::init_logger;
use relay_gateway::relay::provider::TwilioClient;
use relay_gateway::relay::{
    AuthenticationGateway, BillingLedger, CredentialVault, RecoverySweeper, RelayDispatcher, RoutingResolver,
    WebhookIngestor,
};
use relay_gateway::web::{AppState, RelayServer};

#[tokio::main]
async fn main() {
    if let Err(e) = run().await {
        error!(error = %e, "Relay gateway exited with error");
        eprintln!("relay_gateway: {:#}", e);
        std::process::exit(1);
    }
}

async fn run() -> Result<()> {
    //*
    //* Load configuration and initialize logger
    //*
    let config = RelayConfig::from_env()?;
    let _log_guard = init_logger(config.log.clone())?;
    info!("Logger initialized successfully");

    //*
    //* Initialize database
    //*
    info!(database_url = %config.database_url, "Initializing database...");
    let pool = init_sqlite_pool(&config.database_url, config.max_connections).await?;
    init_db(&pool).await.context("Failed to apply schema")?;
    info!("Database initialized successfully");

    //*
    //* Build relay components
    //*
    let vault = CredentialVault::from_base64(&config.master_key)?;
    let ledger = BillingLedger::new(pool.clone(), config.ledger.clone());
    let auth = AuthenticationGateway::new(pool.clone(), config.auth_cache_ttl, config.auth_cache_capacity);
    let router = RoutingResolver::new(pool.clone(), config.routing_cache_ttl);
    let provider = TwilioClient::new(config.provider_base_url.clone(), config.provider.clone())?;
    let dispatcher = RelayDispatcher::new(
        ledger.clone(),
        router,
        vault.clone(),
        Arc::new(provider),
        config.rates.clone(),
        config.public_host.clone(),
    );
    let webhook = WebhookIngestor::new(pool.clone(), ledger.clone());

    let sweeper = RecoverySweeper::new(ledger, config.reservation_timeout, config.sweep_interval).spawn();

    //*
    //* Serve
    //*
    let addr: SocketAddr = config
        .bind_addr
        .parse()
        .with_context(|| format!("Invalid BIND_ADDR: {}", config.bind_addr))?;

    let state = AppState {
        pool: pool.clone(),
        vault,
        auth,
        dispatcher,
        webhook,
    };
    RelayServer::new(state).start(addr, shutdown_signal()).await?;

    sweeper.abort();
    pool.close().await;
    info!("Relay gateway shut down");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!(error = %e, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}
