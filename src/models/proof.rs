//! Payment proofs: canonical hashing, signing and the header envelope.

use crate::error::GuardError;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use ethers::{
    abi::{encode_packed, Token},
    signers::{LocalWallet, WalletError},
    types::{Address, Bytes, H256, U256},
    utils::{hash_message, keccak256},
};
use serde::{Deserialize, Serialize};

/// Keys every proof envelope must carry.
pub const REQUIRED_FIELDS: [&str; 7] = [
    "txHash",
    "token",
    "recipient",
    "amount",
    "timestamp",
    "nonce",
    "signature",
];

/// The signed portion of a payment proof.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProofFields {
    pub tx_hash: H256,
    /// Token contract, zero address for the native currency.
    pub token: Address,
    pub recipient: Address,
    /// Amount in the token's minor units.
    pub amount: U256,
    /// Unix seconds at proof creation.
    pub timestamp: u64,
    pub nonce: u64,
}

impl ProofFields {
    /// `keccak256(abi.encodePacked(bytes32, address, address, uint256, uint256, uint256))`.
    ///
    /// Field order and widths match the verifier contract and must not change.
    pub fn canonical_hash(&self) -> H256 {
        let packed = encode_packed(&[
            Token::FixedBytes(self.tx_hash.as_bytes().to_vec()),
            Token::Address(self.token),
            Token::Address(self.recipient),
            Token::Uint(self.amount),
            Token::Uint(U256::from(self.timestamp)),
            Token::Uint(U256::from(self.nonce)),
        ])
        .expect("packed encoding of static types cannot fail");
        H256::from(keccak256(packed))
    }

    /// Signs the EIP-191 wrapped canonical hash.
    pub fn sign(self, wallet: &LocalWallet) -> Result<PaymentProof, WalletError> {
        let digest = hash_message(self.canonical_hash());
        let signature = wallet.sign_hash(digest)?;

        Ok(PaymentProof {
            fields: self,
            signature: Bytes::from(signature.to_vec()),
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PaymentProof {
    pub fields: ProofFields,
    /// Raw signature bytes; length is checked at recovery time.
    pub signature: Bytes,
}

/// JSON shape of the proof header.
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ProofEnvelope {
    tx_hash: H256,
    token: Address,
    recipient: Address,
    amount: String,
    timestamp: u64,
    nonce: u64,
    signature: Bytes,
}

impl PaymentProof {
    pub fn canonical_hash(&self) -> H256 {
        self.fields.canonical_hash()
    }

    /// Base64 of the compact JSON envelope, safe for an HTTP header value.
    pub fn encode(&self) -> String {
        let envelope = ProofEnvelope {
            tx_hash: self.fields.tx_hash,
            token: self.fields.token,
            recipient: self.fields.recipient,
            amount: self.fields.amount.to_string(),
            timestamp: self.fields.timestamp,
            nonce: self.fields.nonce,
            signature: self.signature.clone(),
        };
        let json = serde_json::to_vec(&envelope).expect("proof envelope serializes");
        STANDARD.encode(json)
    }

    pub fn decode(header: &str) -> Result<Self, GuardError> {
        let raw = STANDARD
            .decode(header.trim())
            .map_err(|e| invalid(format!("not base64: {e}")))?;

        let value: serde_json::Value =
            serde_json::from_slice(&raw).map_err(|e| invalid(format!("not JSON: {e}")))?;
        let object = value
            .as_object()
            .ok_or_else(|| invalid("proof must be a JSON object".to_string()))?;

        for field in REQUIRED_FIELDS {
            if object.get(field).map_or(true, serde_json::Value::is_null) {
                return Err(invalid(format!("missing field `{field}`")));
            }
        }

        let envelope: ProofEnvelope =
            serde_json::from_value(value).map_err(|e| invalid(e.to_string()))?;
        let amount = U256::from_dec_str(&envelope.amount)
            .map_err(|_| invalid(format!("amount {:?} is not an integer", envelope.amount)))?;

        Ok(Self {
            fields: ProofFields {
                tx_hash: envelope.tx_hash,
                token: envelope.token,
                recipient: envelope.recipient,
                amount,
                timestamp: envelope.timestamp,
                nonce: envelope.nonce,
            },
            signature: envelope.signature,
        })
    }
}

fn invalid(reason: String) -> GuardError {
    GuardError::InvalidProofFormat(reason)
}
