use crate::{error::GuardError, models::PaymentProof};
use ethers::types::{Address, RecoveryMessage, Signature};

/// Recovers the address that signed `proof`.
///
/// A well-formed signature over different fields recovers some unrelated
/// address rather than failing; callers catch that by comparing identities.
pub fn recover_signer(proof: &PaymentProof) -> Result<Address, GuardError> {
    let signature = Signature::try_from(proof.signature.as_ref())
        .map_err(|e| GuardError::InvalidSignature(e.to_string()))?;

    // `Data` applies the same EIP-191 prefix used when signing.
    let message = RecoveryMessage::Data(proof.canonical_hash().as_bytes().to_vec());

    signature
        .recover(message)
        .map_err(|e| GuardError::InvalidSignature(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ProofFields;
    use ethers::{
        signers::{LocalWallet, Signer},
        types::{Bytes, H256, U256},
    };

    fn wallet() -> LocalWallet {
        "4c0883a69102937d6231471b5dbb6204fe5129617082792ae468d01a3f362318"
            .parse()
            .unwrap()
    }

    fn proof() -> PaymentProof {
        ProofFields {
            tx_hash: H256::repeat_byte(0x42),
            token: Address::repeat_byte(0x10),
            recipient: Address::repeat_byte(0x20),
            amount: U256::from(10_000u64),
            timestamp: 1_700_000_000,
            nonce: 3,
        }
        .sign(&wallet())
        .unwrap()
    }

    #[test]
    fn recovers_the_signer() {
        assert_eq!(recover_signer(&proof()).unwrap(), wallet().address());
    }

    #[test]
    fn matches_personal_sign_of_the_hash() {
        let proof = proof();
        let expected = tokio_test::block_on(wallet().sign_message(proof.canonical_hash()))
            .unwrap();
        assert_eq!(proof.signature.to_vec(), expected.to_vec());
    }

    #[test]
    fn mutating_any_field_changes_the_signer() {
        let signer = wallet().address();
        let mutations: [fn(&mut ProofFields); 4] = [
            |f| f.amount += U256::one(),
            |f| f.recipient = Address::repeat_byte(0x21),
            |f| f.timestamp += 1,
            |f| f.nonce += 1,
        ];

        for mutate in mutations {
            let mut tampered = proof();
            mutate(&mut tampered.fields);
            let recovered = recover_signer(&tampered).unwrap();
            assert_ne!(recovered, signer);
        }
    }

    #[test]
    fn malformed_signature_bytes_are_rejected() {
        let mut short = proof();
        short.signature = Bytes::from(vec![0u8; 64]);
        assert!(matches!(
            recover_signer(&short),
            Err(GuardError::InvalidSignature(_))
        ));

        let mut empty = proof();
        empty.signature = Bytes::new();
        assert!(matches!(
            recover_signer(&empty),
            Err(GuardError::InvalidSignature(_))
        ));
    }
}
