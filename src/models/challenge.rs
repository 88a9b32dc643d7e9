//! Payment challenge wire format.
//!
//! A challenge reads `token:chain:recipient[?amount=X][&nonce=Y][&currency=Z]`,
//! for example `usdc:base_sepolia:0x5aAe…BeAed?amount=0.01`.

use crate::{
    error::GuardError,
    models::amount::{parse_amount, to_minor_units},
};
use ethers::{types::Address, types::U256, utils::to_checksum};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Amount charged when a challenge does not name one.
pub const DEFAULT_AMOUNT: &str = "0.001";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentChallenge {
    pub token: String,
    pub chain: String,
    pub recipient: Address,
    /// Human-unit decimal string.
    pub amount: String,
    pub nonce: Option<u64>,
    pub currency: String,
}

impl PaymentChallenge {
    pub fn parse(challenge: &str) -> Result<Self, GuardError> {
        let (path, query) = match challenge.split_once('?') {
            Some((path, query)) => (path, Some(query)),
            None => (challenge, None),
        };

        let parts: Vec<&str> = path.split(':').collect();
        let [token, chain, recipient] = parts.as_slice() else {
            return Err(malformed(format!(
                "expected token:chain:recipient, got {} part(s)",
                parts.len()
            )));
        };
        if token.is_empty() || chain.is_empty() || recipient.is_empty() {
            return Err(malformed("empty token, chain or recipient".to_string()));
        }

        let recipient = parse_address(recipient).map_err(malformed)?;
        let token = token.to_lowercase();

        let mut amount = DEFAULT_AMOUNT.to_string();
        let mut nonce = None;
        let mut currency = None;

        for pair in query.unwrap_or_default().split('&').filter(|p| !p.is_empty()) {
            let (key, value) = pair.split_once('=').unwrap_or((pair, ""));
            match key {
                "amount" => {
                    parse_amount(value).map_err(|e| malformed(e.to_string()))?;
                    amount = value.trim().to_string();
                }
                "nonce" => {
                    let parsed = value
                        .parse::<u64>()
                        .map_err(|_| malformed(format!("invalid nonce {value:?}")))?;
                    nonce = Some(parsed);
                }
                "currency" if !value.is_empty() => currency = Some(value.to_string()),
                _ => tracing::debug!(key, "Ignoring unknown challenge parameter"),
            }
        }

        Ok(Self {
            currency: currency.unwrap_or_else(|| token.clone()),
            token,
            chain: chain.to_lowercase(),
            recipient,
            amount,
            nonce,
        })
    }

    /// Challenge amount expressed in the token's smallest unit.
    pub fn amount_in_minor_units(&self, decimals: u32) -> Result<U256, GuardError> {
        to_minor_units(&self.amount, decimals).map_err(|e| malformed(e.to_string()))
    }
}

impl FromStr for PaymentChallenge {
    type Err = GuardError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for PaymentChallenge {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}:{}:{}?amount={}",
            self.token,
            self.chain,
            to_checksum(&self.recipient, None),
            self.amount
        )?;
        if let Some(nonce) = self.nonce {
            write!(f, "&nonce={nonce}")?;
        }
        if self.currency != self.token {
            write!(f, "&currency={}", self.currency)?;
        }
        Ok(())
    }
}

/// Parses a hex account address, enforcing the EIP-55 checksum on mixed-case input.
///
/// All-lowercase and all-uppercase forms carry no checksum and are accepted.
pub fn parse_address(input: &str) -> Result<Address, String> {
    let hex_part = input
        .strip_prefix("0x")
        .ok_or_else(|| format!("address {input:?} must start with 0x"))?;
    if hex_part.len() != 40 || !hex_part.chars().all(|c| c.is_ascii_hexdigit()) {
        return Err(format!("address {input:?} is not 20 hex bytes"));
    }

    let address = Address::from_str(hex_part).map_err(|e| format!("address {input:?}: {e}"))?;

    let has_lower = hex_part.chars().any(|c| c.is_ascii_lowercase());
    let has_upper = hex_part.chars().any(|c| c.is_ascii_uppercase());
    if has_lower && has_upper && to_checksum(&address, None)[2..] != *hex_part {
        return Err(format!("address {input:?} fails checksum validation"));
    }

    Ok(address)
}

fn malformed(reason: String) -> GuardError {
    GuardError::MalformedChallenge(reason)
}

#[cfg(test)]
mod tests {
    use super::*;

    const RECIPIENT: &str = "0x5aAeb6053F3E94C9b9A09f33669435E7Ef1BeAed";

    #[test]
    fn parses_full_challenge() {
        let raw = format!("USDC:Base_Sepolia:{}?amount=0.01&nonce=7&currency=USD", RECIPIENT.to_lowercase());
        let challenge = PaymentChallenge::parse(&raw).unwrap();

        assert_eq!(challenge.token, "usdc");
        assert_eq!(challenge.chain, "base_sepolia");
        assert_eq!(to_checksum(&challenge.recipient, None), RECIPIENT);
        assert_eq!(challenge.amount, "0.01");
        assert_eq!(challenge.nonce, Some(7));
        assert_eq!(challenge.currency, "USD");
    }

    #[test]
    fn uppercase_recipient_is_normalized() {
        let upper = format!("0x{}", RECIPIENT[2..].to_uppercase());
        let challenge = PaymentChallenge::parse(&format!("usdc:base_sepolia:{upper}?amount=0.001")).unwrap();
        assert_eq!(challenge.amount, "0.001");
        assert_eq!(to_checksum(&challenge.recipient, None), RECIPIENT);
    }

    #[test]
    fn defaults_apply_without_query() {
        let challenge = PaymentChallenge::parse(&format!("eth:base:{RECIPIENT}")).unwrap();
        assert_eq!(challenge.amount, DEFAULT_AMOUNT);
        assert_eq!(challenge.nonce, None);
        assert_eq!(challenge.currency, "eth");
    }

    #[test]
    fn rejects_wrong_part_count() {
        for raw in ["usdc:base_sepolia", "usdc", "usdc:base:0x1:extra", ""] {
            let err = PaymentChallenge::parse(raw).unwrap_err();
            assert!(matches!(err, GuardError::MalformedChallenge(_)), "{raw}");
        }
    }

    #[test]
    fn rejects_empty_parts() {
        let err = PaymentChallenge::parse(&format!("usdc::{RECIPIENT}")).unwrap_err();
        assert!(matches!(err, GuardError::MalformedChallenge(_)));
    }

    #[test]
    fn rejects_bad_checksum() {
        // Flip the case of one letter in a checksummed address.
        let tampered = RECIPIENT.replacen("aAeb", "aaeb", 1);
        let err = PaymentChallenge::parse(&format!("usdc:base:{tampered}")).unwrap_err();
        assert!(matches!(err, GuardError::MalformedChallenge(_)));
    }

    #[test]
    fn rejects_invalid_address_and_amount() {
        assert!(PaymentChallenge::parse("usdc:base:0x1234").is_err());
        assert!(PaymentChallenge::parse(&format!("usdc:base:{RECIPIENT}?amount=-1")).is_err());
        assert!(PaymentChallenge::parse(&format!("usdc:base:{RECIPIENT}?amount=ten")).is_err());
        assert!(PaymentChallenge::parse(&format!("usdc:base:{RECIPIENT}?nonce=x")).is_err());
    }

    #[test]
    fn display_reparses_to_same_challenge() {
        let challenge =
            PaymentChallenge::parse(&format!("usdc:base:{RECIPIENT}?amount=0.5&nonce=3")).unwrap();
        let reparsed = PaymentChallenge::parse(&challenge.to_string()).unwrap();
        assert_eq!(challenge, reparsed);
    }

    #[test]
    fn converts_amount_with_token_decimals() {
        let challenge =
            PaymentChallenge::parse(&format!("usdc:base_sepolia:{RECIPIENT}?amount=0.001")).unwrap();
        assert_eq!(challenge.amount_in_minor_units(6).unwrap().to_string(), "1000");
    }
}
