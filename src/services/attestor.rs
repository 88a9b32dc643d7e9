//! Durable replay protection backed by the verifier contract.

use crate::{
    contracts::PaymentVerifier,
    models::PaymentProof,
    services::{
        chain::{with_timeout, ChainError},
        clock::{Clock, SystemClock},
        signature::recover_signer,
    },
};
use async_trait::async_trait;
use ethers::{
    contract::ContractError,
    providers::Middleware,
    types::{Address, TransactionReceipt, H256, U256},
};
use std::collections::{HashMap, HashSet};
use std::fmt::Display;
use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use thiserror::Error;

/// Proofs older than this are rejected by the contract.
pub const MAX_PROOF_AGE_SECS: u64 = 300;
/// Allowed clock skew for proofs from the future.
pub const MAX_FUTURE_SKEW_SECS: u64 = 60;
/// Blocks a `markProofUsed` transaction may take to be mined, in RPC timeouts.
const COMMIT_TIMEOUT_FACTOR: u32 = 6;

#[derive(Debug, Error)]
pub enum AttestorError {
    #[error("attestor rejected proof: {0}")]
    Rejected(String),

    #[error(transparent)]
    Chain(#[from] ChainError),
}

#[async_trait]
pub trait Attestor: Send + Sync {
    /// Read-only check; `false` covers expired, future, used and out-of-sequence proofs.
    async fn verify_on_chain(&self, proof: &PaymentProof) -> Result<bool, AttestorError>;

    /// Commits the proof as used and advances the signer's nonce.
    ///
    /// Fails for a proof that is already used. Returns the commit transaction hash.
    async fn mark_used(&self, proof: &PaymentProof) -> Result<H256, AttestorError>;

    async fn get_nonce(&self, signer: Address) -> Result<U256, AttestorError>;

    async fn is_proof_used(&self, proof_hash: H256) -> Result<bool, AttestorError>;
}

pub struct ContractAttestor<M> {
    contract: PaymentVerifier<M>,
    timeout: Duration,
    commit_timeout: Duration,
}

impl<M: Middleware + 'static> ContractAttestor<M> {
    pub fn new(address: Address, client: Arc<M>, timeout: Duration) -> Self {
        Self {
            contract: PaymentVerifier::new(address, client),
            timeout,
            commit_timeout: timeout * COMMIT_TIMEOUT_FACTOR,
        }
    }

    /// Upper bound on waiting for a `markProofUsed` receipt.
    pub fn with_commit_timeout(mut self, commit_timeout: Duration) -> Self {
        self.commit_timeout = commit_timeout;
        self
    }

    pub fn address(&self) -> Address {
        self.contract.address()
    }
}

fn contract_error<M: Middleware>(err: ContractError<M>) -> AttestorError {
    match err {
        ContractError::Revert(data) => {
            AttestorError::Rejected(format!("reverted with 0x{}", hex::encode(&data)))
        }
        other => AttestorError::Chain(ChainError::Rpc(other.to_string())),
    }
}

#[async_trait]
impl<M: Middleware + 'static> Attestor for ContractAttestor<M> {
    async fn verify_on_chain(&self, proof: &PaymentProof) -> Result<bool, AttestorError> {
        let f = &proof.fields;
        let call = self.contract.verify_payment_proof(
            f.tx_hash.0,
            f.token,
            f.recipient,
            f.amount,
            U256::from(f.timestamp),
            U256::from(f.nonce),
            proof.signature.clone(),
        );

        match tokio::time::timeout(self.timeout, call.call()).await {
            Ok(result) => result.map_err(contract_error),
            Err(_) => Err(ChainError::Timeout(self.timeout).into()),
        }
    }

    async fn mark_used(&self, proof: &PaymentProof) -> Result<H256, AttestorError> {
        let f = &proof.fields;
        let call = self.contract.mark_proof_used(
            f.tx_hash.0,
            f.token,
            f.recipient,
            f.amount,
            U256::from(f.timestamp),
            U256::from(f.nonce),
            proof.signature.clone(),
        );

        let pending = match tokio::time::timeout(self.timeout, call.send()).await {
            Ok(result) => result.map_err(contract_error)?,
            Err(_) => return Err(ChainError::Timeout(self.timeout).into()),
        };
        let tx_hash = pending.tx_hash();
        tracing::info!("markProofUsed sent: {:?}", tx_hash);

        await_receipt(self.commit_timeout, pending).await?;
        Ok(tx_hash)
    }

    async fn get_nonce(&self, signer: Address) -> Result<U256, AttestorError> {
        Ok(with_timeout(self.timeout, self.contract.get_nonce(signer).call()).await?)
    }

    async fn is_proof_used(&self, proof_hash: H256) -> Result<bool, AttestorError> {
        Ok(with_timeout(self.timeout, self.contract.is_proof_used(proof_hash.0).call()).await?)
    }
}

/// Waits at most `limit` for a mined, successful receipt.
async fn await_receipt<F, E>(limit: Duration, pending: F) -> Result<TransactionReceipt, AttestorError>
where
    F: Future<Output = Result<Option<TransactionReceipt>, E>>,
    E: Display,
{
    let receipt = match tokio::time::timeout(limit, pending).await {
        Ok(result) => result.map_err(|e| ChainError::Rpc(e.to_string()))?,
        Err(_) => return Err(ChainError::Timeout(limit).into()),
    }
    .ok_or_else(|| ChainError::Rpc("markProofUsed transaction dropped".to_string()))?;

    if receipt.status != Some(1.into()) {
        return Err(AttestorError::Rejected("markProofUsed reverted".to_string()));
    }
    Ok(receipt)
}

#[derive(Default)]
struct AttestorState {
    used: HashSet<H256>,
    nonces: HashMap<Address, U256>,
}

/// Attestor with the verifier contract's rules, kept in process memory.
pub struct MemoryAttestor {
    state: Mutex<AttestorState>,
    clock: Arc<dyn Clock>,
}

impl Default for MemoryAttestor {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryAttestor {
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            state: Mutex::new(AttestorState::default()),
            clock,
        }
    }

    fn check(&self, state: &AttestorState, proof: &PaymentProof) -> Result<(H256, Address), String> {
        let now = self.clock.now_secs();
        let timestamp = proof.fields.timestamp;
        if now.saturating_sub(timestamp) > MAX_PROOF_AGE_SECS {
            return Err("proof expired".to_string());
        }
        if timestamp.saturating_sub(now) > MAX_FUTURE_SKEW_SECS {
            return Err("proof timestamp in the future".to_string());
        }

        let hash = proof.canonical_hash();
        if state.used.contains(&hash) {
            return Err("proof already used".to_string());
        }

        let signer = recover_signer(proof).map_err(|e| e.to_string())?;
        let expected = state.nonces.get(&signer).copied().unwrap_or_default();
        if U256::from(proof.fields.nonce) != expected {
            return Err(format!("nonce {} does not match {}", proof.fields.nonce, expected));
        }

        Ok((hash, signer))
    }

    /// Number of proofs committed so far.
    pub fn used_count(&self) -> usize {
        self.lock().used.len()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, AttestorState> {
        self.state.lock().unwrap_or_else(|p| p.into_inner())
    }
}

#[async_trait]
impl Attestor for MemoryAttestor {
    async fn verify_on_chain(&self, proof: &PaymentProof) -> Result<bool, AttestorError> {
        let state = self.lock();
        Ok(self.check(&state, proof).is_ok())
    }

    async fn mark_used(&self, proof: &PaymentProof) -> Result<H256, AttestorError> {
        let mut state = self.lock();
        let (hash, signer) = self.check(&state, proof).map_err(AttestorError::Rejected)?;

        state.used.insert(hash);
        *state.nonces.entry(signer).or_default() += U256::one();
        Ok(hash)
    }

    async fn get_nonce(&self, signer: Address) -> Result<U256, AttestorError> {
        Ok(self.lock().nonces.get(&signer).copied().unwrap_or_default())
    }

    async fn is_proof_used(&self, proof_hash: H256) -> Result<bool, AttestorError> {
        Ok(self.lock().used.contains(&proof_hash))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{models::ProofFields, services::clock::ManualClock};
    use ethers::signers::{LocalWallet, Signer};

    const NOW: u64 = 1_700_000_000;

    fn wallet() -> LocalWallet {
        "0x59c6995e998f97a5a0044966f0945389dc9e86dae88c7a8412f4603b6b78690d"
            .parse()
            .unwrap()
    }

    fn proof(timestamp: u64, nonce: u64) -> PaymentProof {
        ProofFields {
            tx_hash: H256::repeat_byte(nonce as u8 + 1),
            token: Address::repeat_byte(0x01),
            recipient: Address::repeat_byte(0x02),
            amount: U256::from(1000u64),
            timestamp,
            nonce,
        }
        .sign(&wallet())
        .unwrap()
    }

    fn attestor() -> MemoryAttestor {
        MemoryAttestor::with_clock(Arc::new(ManualClock::new(NOW)))
    }

    #[tokio::test]
    async fn mark_used_advances_nonce_and_is_not_repeatable() {
        let attestor = attestor();
        let first = proof(NOW, 0);

        assert!(attestor.verify_on_chain(&first).await.unwrap());
        attestor.mark_used(&first).await.unwrap();

        assert!(attestor.is_proof_used(first.canonical_hash()).await.unwrap());
        assert_eq!(attestor.get_nonce(wallet().address()).await.unwrap(), U256::one());
        assert!(!attestor.verify_on_chain(&first).await.unwrap());
        assert!(matches!(
            attestor.mark_used(&first).await,
            Err(AttestorError::Rejected(_))
        ));

        let second = proof(NOW, 1);
        assert!(attestor.verify_on_chain(&second).await.unwrap());
    }

    #[tokio::test]
    async fn commit_wait_is_bounded() {
        let limit = Duration::from_millis(20);

        let stuck = std::future::pending::<Result<Option<TransactionReceipt>, ChainError>>();
        assert!(matches!(
            await_receipt(limit, stuck).await,
            Err(AttestorError::Chain(ChainError::Timeout(_)))
        ));

        let dropped = async { Ok::<_, ChainError>(None) };
        assert!(matches!(
            await_receipt(limit, dropped).await,
            Err(AttestorError::Chain(ChainError::Rpc(_)))
        ));

        let reverted = async {
            Ok::<_, ChainError>(Some(TransactionReceipt {
                status: Some(0.into()),
                ..Default::default()
            }))
        };
        assert!(matches!(
            await_receipt(limit, reverted).await,
            Err(AttestorError::Rejected(_))
        ));

        let mined = async {
            Ok::<_, ChainError>(Some(TransactionReceipt {
                status: Some(1.into()),
                ..Default::default()
            }))
        };
        assert!(await_receipt(limit, mined).await.is_ok());
    }

    #[tokio::test]
    async fn rejects_out_of_sequence_nonce() {
        let attestor = attestor();
        assert!(!attestor.verify_on_chain(&proof(NOW, 5)).await.unwrap());
    }

    #[tokio::test]
    async fn enforces_timestamp_window() {
        let attestor = attestor();
        assert!(attestor.verify_on_chain(&proof(NOW - 300, 0)).await.unwrap());
        assert!(!attestor.verify_on_chain(&proof(NOW - 301, 0)).await.unwrap());
        assert!(attestor.verify_on_chain(&proof(NOW + 60, 0)).await.unwrap());
        assert!(!attestor.verify_on_chain(&proof(NOW + 61, 0)).await.unwrap());
    }
}
