//! On-chain payment verification via transaction receipts.
//!
//! Given a transaction hash, a minimum raw amount, and a chain, the verifier
//! fetches the receipt over JSON-RPC and scans its log entries for a qualifying
//! USDC `Transfer`: emitted by the chain's configured token contract, destined
//! for the configured recipient, carrying at least the minimum amount.
//! Overpayment qualifies; there is no exact-match requirement.
//!
//! The verifier never errors. Every ambiguity — missing receipt, reverted
//! transaction, RPC fault, timeout — resolves to a rejection with a reason,
//! because a verification that cannot complete is indistinguishable from a
//! non-payment and must not admit a request. Apart from the RPC call the
//! function is pure: identical inputs against unchanged chain state always
//! produce the same outcome, which is what makes it testable against a mocked
//! transport.

use alloy_primitives::{Address, B256, U256};
use alloy_provider::{Provider, RootProvider};
use alloy_sol_types::{SolEvent, sol};
use async_trait::async_trait;
use std::collections::HashMap;
use std::time::Duration;
use tracing::instrument;

use crate::chains::ChainRegistry;
use crate::types::{TxHash, VerificationOutcome};

sol! {
    /// ERC-20 transfer event, the only signature the receipt scan matches.
    event Transfer(address indexed from, address indexed to, uint256 value);
}

/// Default bound on each receipt lookup.
const RPC_TIMEOUT: Duration = Duration::from_secs(5);

/// Interface the payment gate verifies proofs through.
///
/// Implementations must be infallible in the `Result` sense: dependency
/// failures surface as `accepted = false`, never as admission.
#[async_trait]
pub trait TransferVerifier: Send + Sync {
    async fn verify(&self, tx_hash: &TxHash, minimum: U256, chain_key: &str)
    -> VerificationOutcome;
}

struct ChainHandle {
    provider: RootProvider,
    usdc: Address,
}

/// Receipt-scanning verifier backed by one JSON-RPC provider per configured chain.
pub struct RpcVerifier {
    chains: HashMap<&'static str, ChainHandle>,
    recipient: Address,
    rpc_timeout: Duration,
}

impl RpcVerifier {
    /// Connects a provider for every chain in the registry.
    ///
    /// `recipient` is the single process-wide address payments must land on.
    pub fn from_registry(registry: &ChainRegistry, recipient: Address) -> Self {
        let chains = registry
            .all()
            .iter()
            .map(|spec| {
                tracing::info!(chain = spec.key, rpc = %spec.rpc, "connecting receipt provider");
                let handle = ChainHandle {
                    provider: RootProvider::new_http(spec.rpc.clone()),
                    usdc: spec.usdc,
                };
                (spec.key, handle)
            })
            .collect();
        RpcVerifier {
            chains,
            recipient,
            rpc_timeout: RPC_TIMEOUT,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.rpc_timeout = timeout;
        self
    }
}

#[async_trait]
impl TransferVerifier for RpcVerifier {
    #[instrument(skip_all, fields(tx_hash = %tx_hash, chain = chain_key, minimum = %minimum))]
    async fn verify(
        &self,
        tx_hash: &TxHash,
        minimum: U256,
        chain_key: &str,
    ) -> VerificationOutcome {
        let Some(chain) = self.chains.get(chain_key) else {
            return VerificationOutcome::rejected(format!(
                "no provider configured for chain {chain_key}"
            ));
        };

        let hash = B256::from(tx_hash.0);
        let lookup = chain.provider.get_transaction_receipt(hash);
        let receipt = match tokio::time::timeout(self.rpc_timeout, lookup).await {
            Err(_) => {
                tracing::warn!("receipt lookup timed out");
                return VerificationOutcome::rejected("transaction receipt lookup timed out");
            }
            Ok(Err(error)) => {
                tracing::warn!(%error, "receipt lookup failed");
                return VerificationOutcome::rejected("transaction receipt lookup failed");
            }
            Ok(Ok(None)) => return VerificationOutcome::rejected("transaction not found"),
            Ok(Ok(Some(receipt))) => receipt,
        };

        if !receipt.status() {
            return VerificationOutcome::rejected("transaction reverted");
        }

        // Largest matching-but-insufficient transfer, kept for the rejection reason.
        let mut best_short: Option<U256> = None;
        for log in receipt.inner.logs() {
            let raw = &log.inner;
            if raw.data.topics().first() != Some(&Transfer::SIGNATURE_HASH) {
                continue;
            }
            if raw.address != chain.usdc {
                // Transfer of some other token, possibly forged to look alike.
                continue;
            }
            let Ok(transfer) =
                Transfer::decode_raw_log(raw.data.topics().iter().copied(), raw.data.data.as_ref())
            else {
                continue;
            };
            if transfer.to != self.recipient {
                continue;
            }
            if transfer.value >= minimum {
                tracing::info!(amount = %transfer.value, "qualifying transfer found");
                return VerificationOutcome::accepted(transfer.value);
            }
            best_short = Some(best_short.map_or(transfer.value, |b| b.max(transfer.value)));
        }

        match best_short {
            Some(observed) => VerificationOutcome::rejected_with_amount(
                format!("transfer amount {observed} below required minimum {minimum}"),
                observed,
            ),
            None => VerificationOutcome::rejected("no qualifying transfer to recipient"),
        }
    }
}
