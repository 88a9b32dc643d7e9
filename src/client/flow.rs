//! Paying side of the protocol: request, pay on a 402, retry once with proof.

use crate::{
    client::payment::PaymentExecutor,
    config::TokenRegistry,
    error::ClientError,
    middleware::PAYMENT_HEADER,
    models::{PaymentChallenge, PaymentRequiredBody, ProofFields},
    services::{Attestor, Clock, SystemClock},
};
use ethers::{
    signers::{LocalWallet, Signer},
    types::{H256, U256},
};
use reqwest::{Response, StatusCode};
use std::sync::Arc;
use std::time::Duration;

/// How long to poll for the payment transaction to be mined.
#[derive(Debug, Clone)]
pub struct ConfirmationPolicy {
    pub attempts: u32,
    pub initial_delay: Duration,
    pub max_delay: Duration,
}

impl Default for ConfirmationPolicy {
    fn default() -> Self {
        Self {
            attempts: 30,
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(8),
        }
    }
}

pub struct PayFlow {
    http: reqwest::Client,
    executor: Arc<dyn PaymentExecutor>,
    wallet: LocalWallet,
    registry: TokenRegistry,
    nonce_source: Option<Arc<dyn Attestor>>,
    confirmation: ConfirmationPolicy,
    clock: Arc<dyn Clock>,
}

impl PayFlow {
    pub fn new(executor: Arc<dyn PaymentExecutor>, wallet: LocalWallet, registry: TokenRegistry) -> Self {
        if executor.payer() != wallet.address() {
            tracing::warn!(
                payer = ?executor.payer(),
                signer = ?wallet.address(),
                "Proof signer differs from the paying account; servers binding the payer will deny"
            );
        }

        Self {
            http: reqwest::Client::new(),
            executor,
            wallet,
            registry,
            nonce_source: None,
            confirmation: ConfirmationPolicy::default(),
            clock: Arc::new(SystemClock),
        }
    }

    /// Reads the signer's next nonce from an attestor when the challenge has none.
    pub fn with_nonce_source(mut self, attestor: Arc<dyn Attestor>) -> Self {
        self.nonce_source = Some(attestor);
        self
    }

    pub fn with_confirmation(mut self, policy: ConfirmationPolicy) -> Self {
        self.confirmation = policy;
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// GETs `url`, paying and retrying exactly once if the server answers 402.
    ///
    /// Any non-402 first answer is returned as is. A retry that is not a
    /// success is terminal.
    pub async fn fetch(&self, url: &str) -> Result<Response, ClientError> {
        let response = self.http.get(url).send().await?;
        if response.status() != StatusCode::PAYMENT_REQUIRED {
            return Ok(response);
        }

        let body: PaymentRequiredBody = response.json().await?;
        let challenge = PaymentChallenge::parse(&body.challenge)?;
        tracing::info!(challenge = %challenge, "Payment required");

        let proof = self.pay(&challenge).await?;

        let retry = self
            .http
            .get(url)
            .header(PAYMENT_HEADER, proof)
            .send()
            .await?;

        let status = retry.status();
        if !status.is_success() {
            let body = retry.text().await.unwrap_or_default();
            tracing::warn!(status = status.as_u16(), body = %body, "Payment denied after retry");
            return Err(ClientError::Denied {
                status: status.as_u16(),
                body,
            });
        }

        tracing::info!("Payment accepted");
        Ok(retry)
    }

    /// Satisfies `challenge` and returns the encoded proof header value.
    pub async fn pay(&self, challenge: &PaymentChallenge) -> Result<String, ClientError> {
        let token = self
            .registry
            .token(&challenge.chain, &challenge.token)
            .ok_or_else(|| ClientError::UnsupportedTokenChain {
                chain: challenge.chain.clone(),
                token: challenge.token.clone(),
            })?;
        let amount = challenge.amount_in_minor_units(token.decimals)?;

        let balance = self.executor.balance(&token).await?;
        if balance < amount {
            return Err(ClientError::InsufficientBalance {
                balance,
                required: amount,
            });
        }

        let tx_hash = self
            .executor
            .send_transfer(&token, challenge.recipient, amount)
            .await?;
        self.wait_for_confirmation(tx_hash).await?;

        let nonce = self.nonce_for(challenge).await?;

        let proof = ProofFields {
            tx_hash,
            token: token.address,
            recipient: challenge.recipient,
            amount,
            timestamp: self.clock.now_secs(),
            nonce,
        }
        .sign(&self.wallet)?;

        Ok(proof.encode())
    }

    async fn wait_for_confirmation(&self, tx_hash: H256) -> Result<(), ClientError> {
        let policy = &self.confirmation;
        let mut delay = policy.initial_delay;

        for attempt in 1..=policy.attempts {
            match self.executor.is_confirmed(tx_hash).await {
                Ok(true) => {
                    tracing::info!("Payment confirmed: {:?}", tx_hash);
                    return Ok(());
                }
                Ok(false) => tracing::debug!(attempt, "Waiting for confirmation of {:?}", tx_hash),
                Err(ClientError::Chain(err)) => {
                    tracing::warn!(attempt, error = %err, "Confirmation poll failed")
                }
                Err(err) => return Err(err),
            }

            if attempt < policy.attempts {
                tokio::time::sleep(delay).await;
                delay = (delay * 2).min(policy.max_delay);
            }
        }

        Err(ClientError::ConfirmationTimeout(tx_hash, policy.attempts))
    }

    async fn nonce_for(&self, challenge: &PaymentChallenge) -> Result<u64, ClientError> {
        if let Some(nonce) = challenge.nonce {
            return Ok(nonce);
        }
        let Some(attestor) = &self.nonce_source else {
            return Ok(0);
        };

        let nonce = attestor
            .get_nonce(self.wallet.address())
            .await
            .map_err(|e| ClientError::Chain(e.to_string()))?;
        if nonce > U256::from(u64::MAX) {
            return Err(ClientError::Chain(format!("nonce {nonce} out of range")));
        }
        Ok(nonce.as_u64())
    }
}
