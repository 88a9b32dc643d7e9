use crate::models::PaymentChallenge;
use chrono::{DateTime, Utc};
use ethers::utils::to_checksum;
use serde::{Deserialize, Serialize};

/// Body of a `402 Payment Required` response.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct PaymentRequiredBody {
    pub error: String,
    pub challenge: String,
    pub message: String,
    pub details: ChallengeDetails,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct ChallengeDetails {
    pub amount: String,
    pub token: String,
    pub chain: String,
    pub recipient: String,
}

impl From<&PaymentChallenge> for ChallengeDetails {
    fn from(challenge: &PaymentChallenge) -> Self {
        Self {
            amount: challenge.amount.clone(),
            token: challenge.token.clone(),
            chain: challenge.chain.clone(),
            recipient: to_checksum(&challenge.recipient, None),
        }
    }
}

/// Body of a denied or failed verification.
#[derive(Serialize, Deserialize, Debug)]
pub struct DenialBody {
    pub error: String,
    pub message: String,
    pub request_id: String,
    pub timestamp: DateTime<Utc>,
}

#[derive(Serialize, Deserialize, Debug)]
pub struct ApiResponse<T> {
    pub success: bool,
    pub data: T,
    pub timestamp: DateTime<Utc>,
    pub request_id: String,
}

/// What a paid request learns about its own payment.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct PaidContent {
    pub resource: String,
    pub payer: String,
    pub tx_hash: String,
    pub amount: String,
}

#[derive(Serialize, Deserialize, Debug)]
pub struct HealthStatus {
    pub status: String,
    pub version: String,
    pub chain_rpc: bool,
    pub replay_entries: usize,
    pub uptime_seconds: u64,
    pub timestamp: DateTime<Utc>,
}
