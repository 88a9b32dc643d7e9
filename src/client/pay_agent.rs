use anyhow::{Context, Result};
use ethers::{
    providers::{Http, Provider},
    types::Address,
};
use serde_json::Value;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};
use x402_guard::{
    client::{PayFlow, PaymentClient, PaymentExecutor},
    config::TokenRegistry,
    error::ClientError,
    services::ContractAttestor,
};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(EnvFilter::from_default_env())
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration
    dotenvy::dotenv().ok();

    let base_url = std::env::var("GUARD_URL")
        .unwrap_or_else(|_| "http://localhost:8080".to_string());
    let private_key = std::env::var("AGENT_PRIVATE_KEY").context("AGENT_PRIVATE_KEY required")?;
    let path = std::env::var("AGENT_PATH").unwrap_or_else(|_| "/api/premium".to_string());
    let chain = std::env::var("AGENT_CHAIN")
        .unwrap_or_else(|_| "base_sepolia".to_string())
        .to_lowercase();

    let mut registry = TokenRegistry::builtin();
    if let Ok(url) = std::env::var("RPC_URL") {
        registry.set_rpc_url(&chain, &url);
    }
    let network = registry
        .network(&chain)
        .cloned()
        .with_context(|| format!("Unsupported AGENT_CHAIN: {}", chain))?;

    println!("x402 Pay Agent");
    println!("==============");
    println!("Server: {}", base_url);
    println!("Path:   {}", path);
    println!("Chain:  {} ({})", chain, network.chain_id);
    println!();

    let payment_client = PaymentClient::new(&network.rpc_url, &private_key, network.chain_id)?;
    let wallet = payment_client.wallet().clone();
    let payer = payment_client.payer();
    println!("Paying from: {:?}", payer);

    let mut flow = PayFlow::new(Arc::new(payment_client), wallet, registry);

    if let Ok(attestor) = std::env::var("ATTESTOR_ADDRESS") {
        let address = Address::from_str(&attestor).context("Invalid ATTESTOR_ADDRESS")?;
        let provider = Arc::new(Provider::<Http>::try_from(network.rpc_url.as_str())?);
        flow = flow.with_nonce_source(Arc::new(ContractAttestor::new(
            address,
            provider,
            Duration::from_secs(10),
        )));
        println!("Nonces from attestor: {:?}", address);
    }

    println!();
    println!("Requesting {}{} (paying if asked)...", base_url, path);

    let url = format!("{}{}", base_url, path);
    match flow.fetch(&url).await {
        Ok(response) => {
            let status = response.status();
            let body: Value = response.json().await.unwrap_or(Value::Null);
            println!("[OK] {}", status);
            println!("{}", serde_json::to_string_pretty(&body)?);
        }
        Err(ClientError::InsufficientBalance { balance, required }) => {
            println!("[ERROR] Insufficient balance: have {}, need {} (minor units)", balance, required);
            println!("Fund {:?} on {} and try again", payer, chain);
        }
        Err(e) => {
            println!("[FAILED] {}", e);
        }
    }

    Ok(())
}
