use crate::{config::TokenInfo, contracts::IERC20, error::ClientError};
use anyhow::{Context, Result};
use async_trait::async_trait;
use ethers::{
    prelude::*,
    providers::{Http, Provider},
    types::{Address, TransactionRequest, H256, U256},
};
use std::sync::Arc;

/// Moves funds on behalf of the paying agent.
#[async_trait]
pub trait PaymentExecutor: Send + Sync {
    fn payer(&self) -> Address;

    /// Balance in the token's minor units.
    async fn balance(&self, token: &TokenInfo) -> Result<U256, ClientError>;

    /// Submits a transfer and returns its hash without waiting for it to be mined.
    async fn send_transfer(
        &self,
        token: &TokenInfo,
        recipient: Address,
        amount: U256,
    ) -> Result<H256, ClientError>;

    /// `false` while pending; a reverted transaction is an error.
    async fn is_confirmed(&self, tx_hash: H256) -> Result<bool, ClientError>;
}

pub struct PaymentClient {
    provider: Arc<SignerMiddleware<Provider<Http>, LocalWallet>>,
}

impl PaymentClient {
    pub fn new(rpc_url: &str, private_key: &str, chain_id: u64) -> Result<Self> {
        let provider = Provider::<Http>::try_from(rpc_url)
            .with_context(|| format!("Invalid RPC URL: {}", rpc_url))?;

        let wallet = private_key
            .parse::<LocalWallet>()
            .context("Invalid private key")?
            .with_chain_id(chain_id);

        let provider = Arc::new(SignerMiddleware::new(provider, wallet));

        Ok(Self { provider })
    }

    pub fn wallet(&self) -> &LocalWallet {
        self.provider.signer()
    }
}

fn chain_error(err: impl std::fmt::Display) -> ClientError {
    ClientError::Chain(err.to_string())
}

#[async_trait]
impl PaymentExecutor for PaymentClient {
    fn payer(&self) -> Address {
        self.provider.address()
    }

    async fn balance(&self, token: &TokenInfo) -> Result<U256, ClientError> {
        let payer = self.payer();
        match token.contract() {
            None => self.provider.get_balance(payer, None).await.map_err(chain_error),
            Some(address) => IERC20::new(address, self.provider.clone())
                .balance_of(payer)
                .call()
                .await
                .map_err(chain_error),
        }
    }

    async fn send_transfer(
        &self,
        token: &TokenInfo,
        recipient: Address,
        amount: U256,
    ) -> Result<H256, ClientError> {
        tracing::info!(
            "Sending {} minor units of {:?} to {:?}",
            amount,
            token.address,
            recipient
        );

        let tx_hash = match token.contract() {
            None => {
                let tx = TransactionRequest::new().to(recipient).value(amount);
                self.provider
                    .send_transaction(tx, None)
                    .await
                    .map_err(chain_error)?
                    .tx_hash()
            }
            Some(address) => {
                let contract = IERC20::new(address, self.provider.clone());
                let call = contract.transfer(recipient, amount);
                let pending = call.send().await.map_err(chain_error)?;
                pending.tx_hash()
            }
        };

        tracing::info!("Transaction sent: {:?}", tx_hash);
        Ok(tx_hash)
    }

    async fn is_confirmed(&self, tx_hash: H256) -> Result<bool, ClientError> {
        let Some(receipt) = self
            .provider
            .get_transaction_receipt(tx_hash)
            .await
            .map_err(chain_error)?
        else {
            return Ok(false);
        };

        if receipt.status == Some(0.into()) {
            return Err(ClientError::TransactionReverted(tx_hash));
        }
        Ok(receipt.block_number.is_some())
    }
}
