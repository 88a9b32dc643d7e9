//! Server-side decision function for a presented payment proof.
//!
//! Stages run in a fixed order: decode, terms (recipient, token, amount),
//! signature recovery, freshness, replay admission, transaction check and
//! on-chain attestation. A proof that reaches replay admission is consumed
//! even if a later stage denies it or the request is abandoned.

use crate::{
    config::{PipelineConfig, TokenRegistry},
    error::GuardError,
    models::{PaymentChallenge, PaymentProof},
    services::{
        recover_signer, Attestor, AttestorError, ChainReader, ChainVerifier, Clock, ReplayGuard,
        SystemClock, TransferReceipt,
    },
};
use ethers::types::{Address, H256};
use std::sync::Arc;

/// Attached to the request extensions once a proof is granted.
#[derive(Debug, Clone)]
pub struct VerifiedPayment {
    pub signer: Address,
    pub proof: PaymentProof,
    pub proof_hash: H256,
    /// Present when the transaction stage ran.
    pub transfer: Option<TransferReceipt>,
}

pub struct VerificationPipeline {
    config: PipelineConfig,
    registry: TokenRegistry,
    replay: ReplayGuard,
    chain: Option<ChainVerifier>,
    attestor: Option<Arc<dyn Attestor>>,
    clock: Arc<dyn Clock>,
}

impl VerificationPipeline {
    pub fn new(config: PipelineConfig, registry: TokenRegistry) -> Self {
        Self::with_clock(config, registry, Arc::new(SystemClock))
    }

    pub fn with_clock(config: PipelineConfig, registry: TokenRegistry, clock: Arc<dyn Clock>) -> Self {
        let replay = ReplayGuard::with_clock(config.replay_retention_secs, clock.clone());
        Self {
            config,
            registry,
            replay,
            chain: None,
            attestor: None,
            clock,
        }
    }

    pub fn with_chain(mut self, reader: Arc<dyn ChainReader>) -> Self {
        self.chain = Some(ChainVerifier::new(reader));
        self
    }

    pub fn with_attestor(mut self, attestor: Arc<dyn Attestor>) -> Self {
        self.attestor = Some(attestor);
        self
    }

    /// Fails when an enabled stage has no collaborator to run against.
    pub fn validate(&self) -> Result<(), GuardError> {
        self.config.check_windows().map_err(GuardError::ConfigError)?;
        if self.config.verify_transaction && self.chain.is_none() {
            return Err(GuardError::ConfigError(
                "transaction verification enabled without a chain reader".to_string(),
            ));
        }
        if (self.config.verify_on_chain || self.config.mark_used) && self.attestor.is_none() {
            return Err(GuardError::ConfigError(
                "on-chain verification enabled without an attestor".to_string(),
            ));
        }
        Ok(())
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn registry(&self) -> &TokenRegistry {
        &self.registry
    }

    pub fn replay_guard(&self) -> &ReplayGuard {
        &self.replay
    }

    pub fn chain_reader(&self) -> Option<Arc<dyn ChainReader>> {
        self.chain.as_ref().map(ChainVerifier::reader)
    }

    pub async fn verify(
        &self,
        challenge: &PaymentChallenge,
        proof_header: Option<&str>,
    ) -> Result<VerifiedPayment, GuardError> {
        let Some(header) = proof_header else {
            return Err(GuardError::PaymentRequired(Box::new(challenge.clone())));
        };

        let token = self
            .registry
            .token(&challenge.chain, &challenge.token)
            .ok_or_else(|| GuardError::UnsupportedTokenChain {
                chain: challenge.chain.clone(),
                token: challenge.token.clone(),
            })?;
        let expected_amount = challenge.amount_in_minor_units(token.decimals)?;

        let proof = PaymentProof::decode(header)?;
        let fields = &proof.fields;

        if fields.recipient != challenge.recipient {
            return Err(GuardError::RecipientMismatch {
                expected: challenge.recipient,
                actual: fields.recipient,
            });
        }
        if fields.token != token.address {
            return Err(GuardError::TokenMismatch {
                expected: token.address,
                actual: fields.token,
            });
        }
        if fields.amount < expected_amount {
            return Err(GuardError::AmountInsufficient {
                expected: expected_amount,
                actual: fields.amount,
            });
        }

        let signer = recover_signer(&proof)?;
        self.check_freshness(fields.timestamp)?;

        let proof_hash = proof.canonical_hash();
        if !self.replay.admit(proof_hash).accepted {
            return Err(GuardError::ProofAlreadyUsed(proof_hash));
        }

        let transfer = if self.config.verify_transaction {
            Some(self.verify_transfer(&proof, signer, token.contract()).await?)
        } else {
            None
        };

        if self.config.verify_on_chain {
            self.attest(&proof, proof_hash).await?;
        }

        tracing::info!(
            signer = ?signer,
            proof_hash = ?proof_hash,
            tx_hash = ?fields.tx_hash,
            amount = %fields.amount,
            "Payment proof granted"
        );

        Ok(VerifiedPayment {
            signer,
            proof,
            proof_hash,
            transfer,
        })
    }

    fn check_freshness(&self, timestamp: u64) -> Result<(), GuardError> {
        let now = self.clock.now_secs();
        let too_old = now.saturating_sub(timestamp) > self.config.freshness_window_secs;
        let too_new = timestamp.saturating_sub(now) > self.config.future_skew_secs;

        if too_old || too_new {
            return Err(GuardError::ProofExpired { timestamp, now });
        }
        Ok(())
    }

    async fn verify_transfer(
        &self,
        proof: &PaymentProof,
        signer: Address,
        token: Option<Address>,
    ) -> Result<TransferReceipt, GuardError> {
        let chain = self.chain.as_ref().ok_or_else(|| {
            GuardError::ConfigError("transaction verification enabled without a chain reader".to_string())
        })?;

        let fields = &proof.fields;
        let receipt = chain
            .verify_transaction(fields.tx_hash, fields.recipient, fields.amount, token)
            .await?;

        if self.config.require_signer_is_payer && receipt.payer != signer {
            return Err(GuardError::TransactionInvalid(format!(
                "proof signer {:?} did not send transaction {:?}",
                signer, fields.tx_hash
            )));
        }

        Ok(receipt)
    }

    async fn attest(&self, proof: &PaymentProof, proof_hash: H256) -> Result<(), GuardError> {
        let attestor = self.attestor.as_ref().ok_or_else(|| {
            GuardError::ConfigError("on-chain verification enabled without an attestor".to_string())
        })?;

        match attestor.verify_on_chain(proof).await {
            Ok(true) => {}
            Ok(false) => return Err(GuardError::OnChainVerificationFailed),
            Err(AttestorError::Rejected(reason)) => {
                tracing::warn!(proof_hash = ?proof_hash, reason, "Attestor rejected proof");
                return Err(GuardError::OnChainVerificationFailed);
            }
            Err(AttestorError::Chain(err)) => return Err(err.into()),
        }

        if self.config.mark_used {
            // The in-memory guard already admitted this proof; a failed commit
            // only weakens cross-instance protection, so access stands and the
            // grant does not wait for the transaction to be mined.
            let attestor = Arc::clone(attestor);
            let proof = proof.clone();
            tokio::spawn(async move {
                match attestor.mark_used(&proof).await {
                    Ok(tx) => tracing::info!(proof_hash = ?proof_hash, tx = ?tx, "Proof marked used on-chain"),
                    Err(err) => tracing::warn!(
                        proof_hash = ?proof_hash,
                        error = %err,
                        "Failed to mark proof used on-chain"
                    ),
                }
            });
        }

        Ok(())
    }
}
