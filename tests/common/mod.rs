#![allow(dead_code)]

use axum::Router;
use ethers::{
    abi::AbiEncode,
    signers::{LocalWallet, Signer},
    types::{Address, Bytes, H256, U256},
};
use std::sync::Arc;
use std::time::Instant;
use x402_guard::{
    config::{PipelineConfig, TokenRegistry},
    contracts::TransferCall,
    handlers::HealthState,
    middleware::{RouteTable, VerificationPipeline, X402Middleware},
    models::ProofFields,
    server::build_router,
    services::{Attestor, Clock, MemoryAttestor, MemoryChain, TransactionInfo},
};

pub const RECIPIENT: &str = "0x5aAeb6053F3E94C9b9A09f33669435E7Ef1BeAed";
pub const CHALLENGE: &str = "tst:devnet:0x5aAeb6053F3E94C9b9A09f33669435E7Ef1BeAed?amount=0.001";
/// `0.001` at 6 decimals.
pub const PRICE: u64 = 1000;

pub fn token() -> Address {
    Address::repeat_byte(0xcc)
}

pub fn recipient() -> Address {
    RECIPIENT.parse().unwrap()
}

pub fn registry() -> TokenRegistry {
    TokenRegistry::new()
        .with_network("devnet", 31337, "http://127.0.0.1:8545")
        .with_token("devnet", "tst", token(), 6)
}

pub fn agent_wallet() -> LocalWallet {
    "0x59c6995e998f97a5a0044966f0945389dc9e86dae88c7a8412f4603b6b78690d"
        .parse()
        .unwrap()
}

/// A confirmed ERC-20 transfer from `from` to `to`.
pub fn token_transfer(hash: H256, from: Address, to: Address, amount: U256) -> TransactionInfo {
    TransactionInfo {
        hash,
        from,
        to: Some(token()),
        value: U256::zero(),
        input: Bytes::from(TransferCall { to, amount }.encode()),
        block_number: Some(1),
    }
}

pub fn signed_proof(wallet: &LocalWallet, tx_hash: H256, amount: u64, timestamp: u64, nonce: u64) -> String {
    ProofFields {
        tx_hash,
        token: token(),
        recipient: recipient(),
        amount: U256::from(amount),
        timestamp,
        nonce,
    }
    .sign(wallet)
    .unwrap()
    .encode()
}

/// Records a confirmed payment of `amount` from the agent wallet.
pub fn record_payment(chain: &MemoryChain, tx: u8, amount: u64) -> H256 {
    let hash = H256::repeat_byte(tx);
    chain.insert(
        token_transfer(hash, agent_wallet().address(), recipient(), U256::from(amount)),
        Some(1),
    );
    hash
}

pub struct Gate {
    pub app: Router,
    pub chain: Arc<MemoryChain>,
    pub attestor: Arc<MemoryAttestor>,
    pub pipeline: Arc<VerificationPipeline>,
}

/// Protected app wired to an arbitrary attestor.
pub struct CustomGate {
    pub app: Router,
    pub chain: Arc<MemoryChain>,
    pub pipeline: Arc<VerificationPipeline>,
}

impl CustomGate {
    pub fn new(config: PipelineConfig, clock: Arc<dyn Clock>, attestor: Arc<dyn Attestor>) -> Self {
        let chain = Arc::new(MemoryChain::new());
        let pipeline = Arc::new(
            VerificationPipeline::with_clock(config, registry(), clock)
                .with_chain(chain.clone())
                .with_attestor(attestor),
        );

        let routes = RouteTable::new()
            .route("/api/premium", CHALLENGE)
            .unwrap()
            .route("/api/reports/:id", CHALLENGE)
            .unwrap();
        let x402 = Arc::new(X402Middleware::new(pipeline.clone(), routes));
        let app = build_router(
            x402,
            HealthState {
                chain: Some(chain.clone()),
                pipeline: pipeline.clone(),
                started_at: Instant::now(),
            },
        );

        Self { app, chain, pipeline }
    }

    /// Records a confirmed payment of `amount` from the agent wallet.
    pub fn record_payment(&self, tx: u8, amount: u64) -> H256 {
        record_payment(&self.chain, tx, amount)
    }
}

impl Gate {
    pub fn new(config: PipelineConfig, clock: Arc<dyn Clock>) -> Self {
        let attestor = Arc::new(MemoryAttestor::with_clock(clock.clone()));
        let CustomGate { app, chain, pipeline } = CustomGate::new(config, clock, attestor.clone());

        Self {
            app,
            chain,
            attestor,
            pipeline,
        }
    }

    /// Records a confirmed payment of `amount` from the agent wallet.
    pub fn record_payment(&self, tx: u8, amount: u64) -> H256 {
        record_payment(&self.chain, tx, amount)
    }
}

/// Yields until background commits satisfy `done`, or gives up.
pub async fn settle(done: impl Fn() -> bool) -> bool {
    for _ in 0..100 {
        if done() {
            return true;
        }
        tokio::task::yield_now().await;
    }
    done()
}
