use anyhow::Result;
use soul_connect::{
    config::Config,
    handlers::AppState,
    middleware::RateLimiter,
    models::PriceTable,
    routes::build_router,
    services::*,
};
use std::net::SocketAddr;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration
    let config = Config::from_env()?;

    tracing::info!("Starting SoulConnect API v{}", env!("CARGO_PKG_VERSION"));
    tracing::info!("Environment: {:?}", config.environment);

    // Initialize services
    let store: Arc<dyn KeyValueStore> = match &config.redis_url {
        Some(url) => Arc::new(RedisStore::connect(url).await?),
        None => {
            tracing::warn!("REDIS_URL not set, payments and credits are kept in memory only");
            Arc::new(MemoryStore::new())
        }
    };

    let chain: Arc<dyn ChainClient> = Arc::new(EthereumChainClient::new(
        &config.chain_rpc_url,
        config.chain_rpc_fallback.as_deref(),
    )?);

    let prices = PriceTable::new(
        config.recipient_address,
        config.bio_price_wei,
        config.date_ideas_price_wei,
    );

    let ledger = Arc::new(EntitlementLedger::new(store.clone()));
    let history = Arc::new(HistoryRepository::new(store.clone()));
    let users = Arc::new(UserRepository::new(store.clone()));
    let analytics = Arc::new(Analytics::new(store.clone()));
    let generator: Arc<dyn GenerationService> = Arc::new(OpenAiGenerator::new(config.llm.clone()));

    let gateway = Arc::new(GenerationGateway::new(
        PaymentVerifier::new(chain.clone(), ledger.clone(), prices),
        ledger.clone(),
        generator,
        history.clone(),
        analytics.clone(),
        config.chain_name.clone(),
    ));

    // Build application state
    let app_state = AppState {
        gateway,
        ledger,
        history,
        users,
        analytics,
        store,
        chain,
    };

    let limiter = RateLimiter::new(config.rate_limit_per_window, config.rate_limit_window)
        .trust_proxy_headers(config.trust_proxy_headers);
    let app = build_router(app_state, limiter);

    // Start server
    let addr = format!("{}:{}", config.host, config.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;

    tracing::info!("Server listening on http://{}", addr);
    tracing::info!("Payments accepted on {} at {:?}", config.chain_name, config.recipient_address);
    tracing::info!("Health check: http://{}/health", addr);

    axum::serve(listener, app.into_make_service_with_connect_info::<SocketAddr>())
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for ctrl+c: {}", e);
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutting down gracefully...");
}
