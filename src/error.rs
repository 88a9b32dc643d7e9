use crate::models::{ChallengeDetails, DenialBody, PaymentChallenge, PaymentRequiredBody};
use axum::{
    http::{header, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use chrono::Utc;
use ethers::{
    signers::WalletError,
    types::{Address, H256, U256},
};
use thiserror::Error;
use uuid::Uuid;

/// Seconds a client should wait before retrying a transient failure.
const RETRY_AFTER_SECS: &str = "2";

#[derive(Error, Debug)]
pub enum GuardError {
    #[error("Payment required: {0}")]
    PaymentRequired(Box<PaymentChallenge>),

    #[error("Malformed challenge: {0}")]
    MalformedChallenge(String),

    #[error("Unsupported token/chain combination: {token} on {chain}")]
    UnsupportedTokenChain { chain: String, token: String },

    #[error("Invalid proof format: {0}")]
    InvalidProofFormat(String),

    #[error("Invalid signature: {0}")]
    InvalidSignature(String),

    #[error("Recipient mismatch: expected {expected:?}, got {actual:?}")]
    RecipientMismatch { expected: Address, actual: Address },

    #[error("Amount insufficient: expected at least {expected}, got {actual}")]
    AmountInsufficient { expected: U256, actual: U256 },

    #[error("Token mismatch: expected {expected:?}, got {actual:?}")]
    TokenMismatch { expected: Address, actual: Address },

    #[error("Proof expired: issued at {timestamp}, now {now}")]
    ProofExpired { timestamp: u64, now: u64 },

    #[error("Proof already used: {0:?}")]
    ProofAlreadyUsed(H256),

    #[error("Transaction not found: {0:?}")]
    TransactionNotFound(H256),

    #[error("Transaction not confirmed yet: {0:?}; this proof is spent, retry with a new proof once it confirms")]
    TransactionUnconfirmed(H256),

    #[error("Transaction invalid: {0}")]
    TransactionInvalid(String),

    #[error("On-chain verification failed")]
    OnChainVerificationFailed,

    #[error("Verification unavailable: {0}")]
    Unavailable(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),
}

impl GuardError {
    /// Stable tag carried in the `error` field of denial bodies.
    pub fn tag(&self) -> &'static str {
        match self {
            GuardError::PaymentRequired(_) => "PAYMENT_REQUIRED",
            GuardError::MalformedChallenge(_) => "MALFORMED_CHALLENGE",
            GuardError::UnsupportedTokenChain { .. } => "UNSUPPORTED_TOKEN_CHAIN",
            GuardError::InvalidProofFormat(_) => "INVALID_PROOF_FORMAT",
            GuardError::InvalidSignature(_) => "INVALID_SIGNATURE",
            GuardError::RecipientMismatch { .. } => "RECIPIENT_MISMATCH",
            GuardError::AmountInsufficient { .. } => "AMOUNT_INSUFFICIENT",
            GuardError::TokenMismatch { .. } => "TOKEN_MISMATCH",
            GuardError::ProofExpired { .. } => "PROOF_EXPIRED",
            GuardError::ProofAlreadyUsed(_) => "PROOF_ALREADY_USED",
            GuardError::TransactionNotFound(_) => "TRANSACTION_NOT_FOUND",
            GuardError::TransactionUnconfirmed(_) => "TRANSACTION_UNCONFIRMED",
            GuardError::TransactionInvalid(_) => "TRANSACTION_INVALID",
            GuardError::OnChainVerificationFailed => "ON_CHAIN_VERIFICATION_FAILED",
            GuardError::Unavailable(_) => "VERIFICATION_UNAVAILABLE",
            GuardError::ConfigError(_) => "INTERNAL_ERROR",
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            GuardError::PaymentRequired(_) => StatusCode::PAYMENT_REQUIRED,
            GuardError::Unavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            GuardError::MalformedChallenge(_)
            | GuardError::UnsupportedTokenChain { .. }
            | GuardError::ConfigError(_) => StatusCode::INTERNAL_SERVER_ERROR,
            _ => StatusCode::FORBIDDEN,
        }
    }

    /// Conditions where resending the same proof may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, GuardError::Unavailable(_))
    }
}

impl IntoResponse for GuardError {
    fn into_response(self) -> Response {
        let status = self.status();
        let error_code = self.tag();

        let mut response = match &self {
            GuardError::PaymentRequired(challenge) => {
                tracing::debug!(challenge = %challenge, "Payment required");
                let body = PaymentRequiredBody {
                    error: error_code.to_string(),
                    challenge: challenge.to_string(),
                    message: self.to_string(),
                    details: ChallengeDetails::from(challenge.as_ref()),
                };
                (status, Json(body)).into_response()
            }
            _ => {
                if status.is_server_error() {
                    tracing::error!(error = ?self, error_code = error_code, "Verification failed");
                } else {
                    tracing::warn!(error = %self, error_code = error_code, "Payment denied");
                }
                let body = DenialBody {
                    error: error_code.to_string(),
                    message: self.to_string(),
                    request_id: Uuid::new_v4().to_string(),
                    timestamp: Utc::now(),
                };
                (status, Json(body)).into_response()
            }
        };

        if self.is_transient() {
            response
                .headers_mut()
                .insert(header::RETRY_AFTER, HeaderValue::from_static(RETRY_AFTER_SECS));
        }

        response
    }
}

/// Failures of the paying side of the protocol.
#[derive(Error, Debug)]
pub enum ClientError {
    #[error("Unsupported token/chain combination: {token} on {chain}")]
    UnsupportedTokenChain { chain: String, token: String },

    #[error("Insufficient balance: have {balance}, need {required}")]
    InsufficientBalance { balance: U256, required: U256 },

    #[error("Transaction {0:?} not confirmed after {1} attempts")]
    ConfirmationTimeout(H256, u32),

    #[error("Transaction {0:?} reverted")]
    TransactionReverted(H256),

    #[error("Payment denied after retry ({status}): {body}")]
    Denied { status: u16, body: String },

    #[error("Invalid challenge: {0}")]
    Challenge(#[from] GuardError),

    #[error("Signing failed: {0}")]
    Signing(#[from] WalletError),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Chain error: {0}")]
    Chain(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn denials_are_forbidden_with_stable_tags() {
        let err = GuardError::ProofAlreadyUsed(H256::zero());
        assert_eq!(err.status(), StatusCode::FORBIDDEN);
        assert_eq!(err.tag(), "PROOF_ALREADY_USED");

        let err = GuardError::TransactionInvalid("not a transfer".into());
        assert_eq!(err.status(), StatusCode::FORBIDDEN);
        assert_eq!(err.tag(), "TRANSACTION_INVALID");
    }

    #[test]
    fn infrastructure_faults_are_not_denials() {
        let err = GuardError::Unavailable("node timed out".into());
        assert_eq!(err.status(), StatusCode::SERVICE_UNAVAILABLE);
        assert!(err.is_transient());

        let response = err.into_response();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(response.headers().get(header::RETRY_AFTER).unwrap(), "2");
    }

    #[test]
    fn unconfirmed_payment_has_no_retry_after() {
        // The proof was admitted before the chain lookup, so resending it is a replay.
        let err = GuardError::TransactionUnconfirmed(H256::zero());
        assert!(!err.is_transient());
        assert!(err.to_string().contains("new proof"));

        let response = err.into_response();
        assert_eq!(response.status(), StatusCode::FORBIDDEN);
        assert!(response.headers().get(header::RETRY_AFTER).is_none());
    }

    #[test]
    fn payment_required_maps_to_402() {
        let challenge = PaymentChallenge::parse(
            "usdc:base_sepolia:0x209693bc6afc0c5328ba36faf03c514ef312287c?amount=0.01",
        )
        .unwrap();
        let response = GuardError::PaymentRequired(Box::new(challenge)).into_response();
        assert_eq!(response.status(), StatusCode::PAYMENT_REQUIRED);
    }
}
