//! Value objects for the payment protocol.
//!
//! The key objects are [`TxHash`] (a normalized 32-byte transaction identifier),
//! [`PaymentProof`] (the caller-supplied claim attached to a retried request),
//! [`Price`] (an amount expressed both in human decimal form and raw token units),
//! and [`PaymentChallenge`] (the document returned to an unpaid caller with HTTP 402).
//!
//! Challenges and proofs live for a single request; nothing in this module is
//! persisted except [`UsedTransactionRecord`], which the replay ledger appends once
//! per consumed proof and never mutates.

use alloy_primitives::{Address, U256};
use once_cell::sync::Lazy;
use regex::Regex;
use rust_decimal::Decimal;
use rust_decimal::prelude::ToPrimitive;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::fmt::{Debug, Display};
use std::str::FromStr;
use std::time::SystemTime;
use url::Url;

/// Number of decimals used by USDC deployments on every supported chain.
pub const USDC_DECIMALS: u32 = 6;

/// Currency code advertised in payment challenges.
pub const CURRENCY_CODE: &str = "USDC";

static TX_HASH_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^0x[0-9a-f]{64}$").expect("tx hash regex is valid"));

/// A 32-byte transaction hash, normalized to lowercase `0x`-prefixed hex.
///
/// Construction goes through [`FromStr`], which trims surrounding whitespace and
/// lowercases the input before validating it against the 32-byte hex pattern.
/// A value of this type is therefore well-formed by construction: downstream
/// components (verifier, replay guard) never re-validate.
#[derive(Copy, Clone, PartialEq, Eq, Hash)]
pub struct TxHash(pub [u8; 32]);

/// Client-side protocol errors: the request itself is malformed.
///
/// These map to HTTP 400 and are never retried server-side.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ProofError {
    /// The submitted transaction id does not match the 32-byte hex hash format.
    #[error("transaction hash must be 0x-prefixed 32-byte hex")]
    MalformedTxHash,
    /// The submitted chain key is not an accepted chain for this deployment.
    #[error("unsupported chain: {0}")]
    UnsupportedChain(String),
}

impl FromStr for TxHash {
    type Err = ProofError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_ascii_lowercase();
        if !TX_HASH_RE.is_match(&normalized) {
            return Err(ProofError::MalformedTxHash);
        }
        let mut bytes = [0u8; 32];
        hex::decode_to_slice(&normalized[2..], &mut bytes)
            .map_err(|_| ProofError::MalformedTxHash)?;
        Ok(TxHash(bytes))
    }
}

impl Display for TxHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{}", hex::encode(self.0))
    }
}

impl Debug for TxHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TxHash({self})")
    }
}

impl Serialize for TxHash {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for TxHash {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// Caller-supplied evidence attached to a retried request.
///
/// `chain_key` is `None` when the client omitted the optional chain header,
/// in which case the deployment's default chain applies.
#[derive(Debug, Clone)]
pub struct PaymentProof {
    pub tx_hash: TxHash,
    pub chain_key: Option<String>,
}

/// Error produced when a human-decimal price cannot be expressed in raw token units.
#[derive(Debug, thiserror::Error)]
pub enum PriceError {
    #[error("not a decimal amount: {0}")]
    Unparseable(String),
    #[error("amount must be positive")]
    NotPositive,
    #[error("amount has more than {USDC_DECIMALS} decimal places")]
    TooPrecise,
    #[error("amount does not fit in the token's raw representation")]
    Overflow,
}

/// A payment amount carried in two representations: human decimal for wire
/// documents and raw smallest-unit integer for on-chain comparison.
///
/// `raw >= minimum` comparisons always happen on the raw side; the decimal side
/// is display-only.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Price {
    display: Decimal,
    raw: U256,
}

impl Price {
    /// Parses a USDC amount in human decimal form, e.g. `"0.05"`.
    pub fn usdc(amount: &str) -> Result<Self, PriceError> {
        let display =
            Decimal::from_str(amount).map_err(|_| PriceError::Unparseable(amount.to_string()))?;
        if display <= Decimal::ZERO {
            return Err(PriceError::NotPositive);
        }
        let scaled = display
            .checked_mul(Decimal::from(10u64.pow(USDC_DECIMALS)))
            .ok_or(PriceError::Overflow)?;
        if !scaled.fract().is_zero() {
            return Err(PriceError::TooPrecise);
        }
        let raw = scaled.to_u128().ok_or(PriceError::Overflow)?;
        Ok(Price {
            display,
            raw: U256::from(raw),
        })
    }

    /// The amount in the token's smallest integer unit.
    pub fn raw(&self) -> U256 {
        self.raw
    }

    /// The amount in human decimal form.
    pub fn display(&self) -> Decimal {
        self.display
    }
}

/// One accepted chain, as advertised inside a payment challenge.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChainSummary {
    pub chain: String,
    pub label: String,
    pub chain_id: u64,
    pub token: Address,
    pub explorer: Url,
}

/// The document returned to an unpaid caller, serialized under `payment_details`
/// in the 402 response body. A pure response value object; never persisted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaymentChallenge {
    pub amount: Decimal,
    pub currency: String,
    pub recipient: Address,
    pub networks: Vec<ChainSummary>,
    pub action: String,
}

/// JSON body of every 402 response: a machine-readable reason plus the full
/// challenge, so a capable client can always retry with a fresh payment.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaymentRequiredBody {
    pub error: String,
    pub payment_details: PaymentChallenge,
}

/// The verifier's answer for one proof. Ephemeral, never persisted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerificationOutcome {
    pub accepted: bool,
    /// Largest matching transfer amount observed in the receipt, if any.
    pub observed_amount: Option<U256>,
    pub reason: Option<String>,
}

impl VerificationOutcome {
    pub fn accepted(amount: U256) -> Self {
        VerificationOutcome {
            accepted: true,
            observed_amount: Some(amount),
            reason: None,
        }
    }

    pub fn rejected(reason: impl Into<String>) -> Self {
        VerificationOutcome {
            accepted: false,
            observed_amount: None,
            reason: Some(reason.into()),
        }
    }

    pub fn rejected_with_amount(reason: impl Into<String>, amount: U256) -> Self {
        VerificationOutcome {
            accepted: false,
            observed_amount: Some(amount),
            reason: Some(reason.into()),
        }
    }
}

/// One consumed proof in the append-only replay ledger.
///
/// Uniqueness is keyed on `tx_hash` alone, not the composite key: a hash is
/// chain-specific by construction, but a cross-chain collision is treated as a
/// replay rather than a coincidence.
#[derive(Debug, Clone)]
pub struct UsedTransactionRecord {
    pub tx_hash: TxHash,
    pub chain_key: String,
    pub action: String,
    pub consumed_at: SystemTime,
}

impl UsedTransactionRecord {
    pub fn new(tx_hash: TxHash, chain_key: impl Into<String>, action: impl Into<String>) -> Self {
        UsedTransactionRecord {
            tx_hash,
            chain_key: chain_key.into(),
            action: action.into(),
            consumed_at: SystemTime::now(),
        }
    }

    /// `chainKey:txHash`, the form downstream stores index on.
    pub fn composite_key(&self) -> String {
        format!("{}:{}", self.chain_key, self.tx_hash)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const HASH: &str = "0xddf252ad1be2c89b69c2b068fc378daa952ba7f163c4a11628f55a4df523b3ef";

    #[test]
    fn tx_hash_parses_and_normalizes() {
        let parsed: TxHash = HASH.parse().unwrap();
        assert_eq!(parsed.to_string(), HASH);

        let shouty = format!("  0x{}  ", HASH[2..].to_uppercase());
        let parsed_shouty: TxHash = shouty.parse().unwrap();
        assert_eq!(parsed, parsed_shouty);
    }

    #[test]
    fn tx_hash_rejects_malformed() {
        let long = format!("{HASH}a");
        let unprefixed = HASH[2..].to_string();
        let nonhex = format!("0x{}", "g".repeat(64));
        for bad in ["", "0x", "deadbeef", &HASH[..65], &long, &unprefixed, &nonhex] {
            assert_eq!(
                bad.parse::<TxHash>(),
                Err(ProofError::MalformedTxHash),
                "{bad:?}"
            );
        }
    }

    #[test]
    fn tx_hash_serde_round_trip() {
        let parsed: TxHash = HASH.parse().unwrap();
        let json = serde_json::to_string(&parsed).unwrap();
        assert_eq!(json, format!("\"{HASH}\""));
        let back: TxHash = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, back);
    }

    #[test]
    fn price_usdc_scales_to_raw_units() {
        let price = Price::usdc("0.05").unwrap();
        assert_eq!(price.raw(), U256::from(50_000u64));
        assert_eq!(price.display().to_string(), "0.05");

        let one = Price::usdc("1").unwrap();
        assert_eq!(one.raw(), U256::from(1_000_000u64));
    }

    #[test]
    fn price_usdc_rejects_bad_amounts() {
        assert!(matches!(Price::usdc("nope"), Err(PriceError::Unparseable(_))));
        assert!(matches!(Price::usdc("0"), Err(PriceError::NotPositive)));
        assert!(matches!(Price::usdc("-1"), Err(PriceError::NotPositive)));
        assert!(matches!(Price::usdc("0.0000001"), Err(PriceError::TooPrecise)));
    }

    #[test]
    fn composite_key_joins_chain_and_hash() {
        let record = UsedTransactionRecord::new(HASH.parse().unwrap(), "base", "demo");
        assert_eq!(record.composite_key(), format!("base:{HASH}"));
    }
}
