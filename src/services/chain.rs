//! Confirms that a payment proof points at a real, matching transfer.

use crate::{
    contracts::IERC20Calls,
    error::GuardError,
};
use async_trait::async_trait;
use ethers::{
    abi::AbiDecode,
    providers::{Http, Middleware, Provider},
    types::{Address, Bytes, Transaction, H256, U256},
};
use moka::future::Cache;
use std::collections::HashMap;
use std::fmt::Display;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use thiserror::Error;

/// Faults of the chain collaborator itself, never a verdict on a proof.
#[derive(Debug, Clone, Error)]
pub enum ChainError {
    #[error("chain request timed out after {0:?}")]
    Timeout(Duration),

    #[error("chain RPC error: {0}")]
    Rpc(String),
}

impl From<ChainError> for GuardError {
    fn from(err: ChainError) -> Self {
        GuardError::Unavailable(err.to_string())
    }
}

#[derive(Debug, Error)]
pub enum TransactionError {
    #[error("transaction {0:?} not found")]
    NotFound(H256),

    #[error("transaction {0:?} is not confirmed yet")]
    Unconfirmed(H256),

    #[error("transaction reverted")]
    Reverted,

    #[error("recipient mismatch: expected {expected:?}, got {actual:?}")]
    RecipientMismatch {
        expected: Address,
        actual: Option<Address>,
    },

    #[error("amount insufficient: expected at least {expected}, got {actual}")]
    AmountInsufficient { expected: U256, actual: U256 },

    #[error("not a transfer call: {0}")]
    NotATransferCall(String),

    #[error(transparent)]
    Chain(#[from] ChainError),
}

impl From<TransactionError> for GuardError {
    fn from(err: TransactionError) -> Self {
        match err {
            TransactionError::NotFound(hash) => GuardError::TransactionNotFound(hash),
            TransactionError::Unconfirmed(hash) => GuardError::TransactionUnconfirmed(hash),
            TransactionError::Chain(chain) => chain.into(),
            other => GuardError::TransactionInvalid(other.to_string()),
        }
    }
}

/// The parts of a transaction the verifier looks at.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransactionInfo {
    pub hash: H256,
    pub from: Address,
    pub to: Option<Address>,
    pub value: U256,
    pub input: Bytes,
    /// `None` while the transaction is pending.
    pub block_number: Option<u64>,
}

impl From<Transaction> for TransactionInfo {
    fn from(tx: Transaction) -> Self {
        Self {
            hash: tx.hash,
            from: tx.from,
            to: tx.to,
            value: tx.value,
            input: tx.input,
            block_number: tx.block_number.map(|n| n.as_u64()),
        }
    }
}

/// Read-only view of the chain used by the server.
#[async_trait]
pub trait ChainReader: Send + Sync {
    async fn get_transaction(&self, hash: H256) -> Result<Option<TransactionInfo>, ChainError>;

    /// Receipt status (`1` success, `0` reverted), `None` when there is no receipt yet.
    async fn get_receipt_status(&self, hash: H256) -> Result<Option<u64>, ChainError>;

    async fn block_number(&self) -> Result<u64, ChainError>;
}

pub(crate) async fn with_timeout<T, E, F>(limit: Duration, fut: F) -> Result<T, ChainError>
where
    E: Display,
    F: Future<Output = Result<T, E>>,
{
    match tokio::time::timeout(limit, fut).await {
        Ok(result) => result.map_err(|e| ChainError::Rpc(e.to_string())),
        Err(_) => Err(ChainError::Timeout(limit)),
    }
}

pub struct EthersChainReader {
    provider: Arc<Provider<Http>>,
    timeout: Duration,
}

impl EthersChainReader {
    pub fn new(rpc_url: &str, timeout: Duration) -> Result<Self, ChainError> {
        let provider = Provider::<Http>::try_from(rpc_url)
            .map_err(|e| ChainError::Rpc(format!("invalid RPC URL {rpc_url}: {e}")))?;

        Ok(Self {
            provider: Arc::new(provider),
            timeout,
        })
    }

    pub fn provider(&self) -> Arc<Provider<Http>> {
        self.provider.clone()
    }
}

#[async_trait]
impl ChainReader for EthersChainReader {
    async fn get_transaction(&self, hash: H256) -> Result<Option<TransactionInfo>, ChainError> {
        let tx = with_timeout(self.timeout, self.provider.get_transaction(hash)).await?;
        Ok(tx.map(TransactionInfo::from))
    }

    async fn get_receipt_status(&self, hash: H256) -> Result<Option<u64>, ChainError> {
        let receipt = with_timeout(self.timeout, self.provider.get_transaction_receipt(hash)).await?;
        // Pre-Byzantium receipts carry no status; treat them as successful.
        Ok(receipt.map(|r| r.status.map_or(1, |s| s.as_u64())))
    }

    async fn block_number(&self) -> Result<u64, ChainError> {
        let number = with_timeout(self.timeout, self.provider.get_block_number()).await?;
        Ok(number.as_u64())
    }
}

/// Chain state kept in memory, for local development and tests.
#[derive(Default)]
pub struct MemoryChain {
    transactions: Mutex<HashMap<H256, (TransactionInfo, Option<u64>)>>,
    unavailable: AtomicBool,
}

impl MemoryChain {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores a transaction with an optional receipt status.
    pub fn insert(&self, tx: TransactionInfo, receipt_status: Option<u64>) {
        self.transactions
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .insert(tx.hash, (tx, receipt_status));
    }

    /// Makes every read fail as a timed-out node would.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    fn check_available(&self) -> Result<(), ChainError> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(ChainError::Timeout(Duration::from_secs(10)));
        }
        Ok(())
    }

    fn entry(&self, hash: H256) -> Option<(TransactionInfo, Option<u64>)> {
        self.transactions
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .get(&hash)
            .cloned()
    }
}

#[async_trait]
impl ChainReader for MemoryChain {
    async fn get_transaction(&self, hash: H256) -> Result<Option<TransactionInfo>, ChainError> {
        self.check_available()?;
        Ok(self.entry(hash).map(|(tx, _)| tx))
    }

    async fn get_receipt_status(&self, hash: H256) -> Result<Option<u64>, ChainError> {
        self.check_available()?;
        Ok(self.entry(hash).and_then(|(_, status)| status))
    }

    async fn block_number(&self) -> Result<u64, ChainError> {
        self.check_available()?;
        let transactions = self.transactions.lock().unwrap_or_else(|p| p.into_inner());
        Ok(transactions
            .values()
            .filter_map(|(tx, _)| tx.block_number)
            .max()
            .unwrap_or_default())
    }
}

/// A transfer that satisfied verification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferReceipt {
    pub tx_hash: H256,
    pub payer: Address,
    pub recipient: Address,
    pub amount: U256,
    /// Token contract, `None` for a native transfer.
    pub token: Option<Address>,
}

pub struct ChainVerifier {
    reader: Arc<dyn ChainReader>,
    confirmed: Cache<H256, TransactionInfo>,
}

impl ChainVerifier {
    pub fn new(reader: Arc<dyn ChainReader>) -> Self {
        // Mined transactions are immutable, so a hit never goes stale.
        let confirmed = Cache::builder()
            .max_capacity(10_000)
            .time_to_live(Duration::from_secs(600))
            .build();

        Self { reader, confirmed }
    }

    pub fn reader(&self) -> Arc<dyn ChainReader> {
        self.reader.clone()
    }

    /// Checks that `tx_hash` is a confirmed payment of at least `expected_amount`
    /// minor units to `expected_recipient`, in the native currency when `token`
    /// is `None` or the zero address, otherwise as an ERC-20 `transfer`.
    pub async fn verify_transaction(
        &self,
        tx_hash: H256,
        expected_recipient: Address,
        expected_amount: U256,
        token: Option<Address>,
    ) -> Result<TransferReceipt, TransactionError> {
        let tx = self.fetch_confirmed(tx_hash).await?;

        let receipt = match token.filter(|t| !t.is_zero()) {
            None => verify_native(&tx, expected_recipient, expected_amount)?,
            Some(token) => verify_token_transfer(&tx, token, expected_recipient, expected_amount)?,
        };

        tracing::info!(
            tx_hash = ?tx_hash,
            payer = ?receipt.payer,
            amount = %receipt.amount,
            "Payment transaction verified"
        );

        Ok(receipt)
    }

    async fn fetch_confirmed(&self, hash: H256) -> Result<TransactionInfo, TransactionError> {
        if let Some(tx) = self.confirmed.get(&hash).await {
            tracing::debug!("Confirmed transaction cache hit for {:?}", hash);
            return Ok(tx);
        }

        let tx = self
            .reader
            .get_transaction(hash)
            .await?
            .ok_or(TransactionError::NotFound(hash))?;

        if tx.block_number.is_none() {
            return Err(TransactionError::Unconfirmed(hash));
        }

        match self.reader.get_receipt_status(hash).await? {
            None => return Err(TransactionError::Unconfirmed(hash)),
            Some(0) => return Err(TransactionError::Reverted),
            Some(_) => {}
        }

        self.confirmed.insert(hash, tx.clone()).await;
        Ok(tx)
    }
}

fn verify_native(
    tx: &TransactionInfo,
    recipient: Address,
    amount: U256,
) -> Result<TransferReceipt, TransactionError> {
    if tx.to != Some(recipient) {
        return Err(TransactionError::RecipientMismatch {
            expected: recipient,
            actual: tx.to,
        });
    }
    if tx.value < amount {
        return Err(TransactionError::AmountInsufficient {
            expected: amount,
            actual: tx.value,
        });
    }

    Ok(TransferReceipt {
        tx_hash: tx.hash,
        payer: tx.from,
        recipient,
        amount: tx.value,
        token: None,
    })
}

fn verify_token_transfer(
    tx: &TransactionInfo,
    token: Address,
    recipient: Address,
    amount: U256,
) -> Result<TransferReceipt, TransactionError> {
    if tx.to != Some(token) {
        return Err(TransactionError::NotATransferCall(format!(
            "transaction targets {:?}, not token {:?}",
            tx.to, token
        )));
    }

    let call = IERC20Calls::decode(&tx.input).map_err(|_| {
        TransactionError::NotATransferCall("calldata is not an ERC-20 call".to_string())
    })?;
    let IERC20Calls::Transfer(transfer) = call else {
        return Err(TransactionError::NotATransferCall(format!(
            "selector 0x{} is not transfer(address,uint256)",
            hex::encode(&tx.input[..4])
        )));
    };

    if transfer.to != recipient {
        return Err(TransactionError::RecipientMismatch {
            expected: recipient,
            actual: Some(transfer.to),
        });
    }
    if transfer.amount < amount {
        return Err(TransactionError::AmountInsufficient {
            expected: amount,
            actual: transfer.amount,
        });
    }

    Ok(TransferReceipt {
        tx_hash: tx.hash,
        payer: tx.from,
        recipient,
        amount: transfer.amount,
        token: Some(token),
    })
}
