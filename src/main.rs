use anyhow::{Context, Result};
use ethers::{
    middleware::SignerMiddleware,
    providers::Middleware,
    signers::{LocalWallet, Signer},
};
use std::sync::Arc;
use std::time::Instant;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};
use x402_guard::{
    config::Config,
    handlers::HealthState,
    middleware::{RouteTable, VerificationPipeline, X402Middleware},
    server::build_router,
    services::{Attestor, ChainReader, ContractAttestor, EthersChainReader},
};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(EnvFilter::from_default_env())
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration
    let config = Config::from_env()?;

    tracing::info!("Starting x402-guard v{}", env!("CARGO_PKG_VERSION"));
    tracing::info!("Environment: {:?}", config.environment);

    let registry = config.registry();
    let network = registry
        .network(&config.payment_chain)
        .cloned()
        .with_context(|| format!("Unsupported PAYMENT_CHAIN: {}", config.payment_chain))?;

    // Initialize services
    let reader = Arc::new(EthersChainReader::new(&network.rpc_url, config.rpc_timeout)?);
    let chain: Arc<dyn ChainReader> = reader.clone();

    let mut pipeline = VerificationPipeline::new(config.pipeline.clone(), registry)
        .with_chain(chain.clone());

    if let Some(address) = config.attestor_address {
        let attestor: Arc<dyn Attestor> = match &config.seller_private_key {
            Some(key) => {
                let wallet = key
                    .parse::<LocalWallet>()
                    .context("Invalid SELLER_PRIVATE_KEY")?
                    .with_chain_id(network.chain_id);
                tracing::info!("Attestor commits signed by {:?}", wallet.address());
                let client = Arc::new(SignerMiddleware::new((*reader.provider()).clone(), wallet));
                Arc::new(ContractAttestor::new(address, client, config.rpc_timeout))
            }
            None => Arc::new(ContractAttestor::new(
                address,
                reader.provider(),
                config.rpc_timeout,
            )),
        };
        tracing::info!("On-chain attestor at {:?}", address);
        pipeline = pipeline.with_attestor(attestor);
    }
    pipeline.validate()?;

    match reader.provider().get_chainid().await {
        Ok(id) if id.as_u64() != network.chain_id => tracing::warn!(
            "RPC reports chain id {}, expected {} for {}",
            id,
            network.chain_id,
            config.payment_chain
        ),
        Ok(_) => {}
        Err(e) => tracing::warn!("Chain RPC unreachable at startup: {}", e),
    }

    let pipeline = Arc::new(pipeline);

    // Every paid route uses the configured terms
    let challenge = config.challenge();
    let routes = RouteTable::new()
        .route("/api/premium", &challenge)?
        .route("/api/reports/:id", &challenge)?;
    tracing::info!("Payment terms: {}", challenge);

    let x402 = Arc::new(X402Middleware::new(pipeline.clone(), routes));

    let health_state = HealthState {
        chain: Some(chain),
        pipeline,
        started_at: Instant::now(),
    };

    let app = build_router(x402, health_state);

    // Start server
    let addr = format!("{}:{}", config.host, config.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;

    tracing::info!("Server listening on http://{}", addr);
    tracing::info!("Health check: http://{}/health", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}

async fn shutdown_signal() {
    tokio::signal::ctrl_c()
        .await
        .expect("failed to listen for ctrl+c");
    tracing::info!("Shutting down gracefully...");
}
