//! Registry of supported blockchain networks and their USDC deployments.
//!
//! Two tables live here with deliberately different contracts:
//!
//! - [`ChainRegistry`]: the chains this deployment can actually take payment on,
//!   one [`ChainSpec`] per chain with an RPC endpoint. Lookup is **lenient on
//!   advertise** ([`ChainRegistry::spec_for`] falls back to the default chain)
//!   and **strict on accept** ([`ChainRegistry::require`] rejects anything
//!   outside the accepted set). The two lookups are separate functions on
//!   purpose; reusing one for both paths would loosen acceptance.
//! - [`KNOWN_NETWORKS`]: the wider set of network identifiers the compliance
//!   auditor can recognize in third-party challenges, including chains this
//!   deployment never pays on.

use alloy_primitives::{Address, address};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::env;
use url::Url;

use crate::types::{ChainSummary, ProofError};

const ENV_RPC_BASE: &str = "RPC_URL_BASE";
const ENV_RPC_BASE_SEPOLIA: &str = "RPC_URL_BASE_SEPOLIA";

/// Whether a network is a production chain or a test chain.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NetworkMode {
    Mainnet,
    Testnet,
}

/// Deployment trust level, selected at startup and fixed for the process lifetime.
///
/// A production deployment only ever advertises and accepts mainnet chains;
/// anything else only ever touches testnets.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeploymentMode {
    Production,
    Test,
}

impl DeploymentMode {
    fn accepts(self, mode: NetworkMode) -> bool {
        match self {
            DeploymentMode::Production => mode == NetworkMode::Mainnet,
            DeploymentMode::Test => mode == NetworkMode::Testnet,
        }
    }
}

/// Immutable configuration for one payable chain. Built once at startup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChainSpec {
    pub key: &'static str,
    pub label: &'static str,
    pub chain_id: u64,
    /// The only token contract whose Transfer events count as payment on this chain.
    pub usdc: Address,
    pub rpc: Url,
    pub explorer: Url,
    pub mode: NetworkMode,
}

impl ChainSpec {
    /// The shape of this chain inside a payment challenge.
    pub fn summary(&self) -> ChainSummary {
        ChainSummary {
            chain: self.key.to_string(),
            label: self.label.to_string(),
            chain_id: self.chain_id,
            token: self.usdc,
            explorer: self.explorer.clone(),
        }
    }
}

struct BuiltinChain {
    key: &'static str,
    label: &'static str,
    chain_id: u64,
    usdc: Address,
    rpc: &'static str,
    rpc_env: &'static str,
    explorer: &'static str,
    mode: NetworkMode,
}

static BUILTIN_CHAINS: &[BuiltinChain] = &[
    BuiltinChain {
        key: "base",
        label: "Base",
        chain_id: 8453,
        usdc: address!("0x833589fCD6eDb6E08f4c7C32D4f71b54bdA02913"),
        rpc: "https://mainnet.base.org",
        rpc_env: ENV_RPC_BASE,
        explorer: "https://basescan.org",
        mode: NetworkMode::Mainnet,
    },
    BuiltinChain {
        key: "base-sepolia",
        label: "Base Sepolia",
        chain_id: 84532,
        usdc: address!("0x036CbD53842c5426634e7929541eC2318f3dCF7e"),
        rpc: "https://sepolia.base.org",
        rpc_env: ENV_RPC_BASE_SEPOLIA,
        explorer: "https://sepolia.basescan.org",
        mode: NetworkMode::Testnet,
    },
];

/// Process-wide table of payable chains, fixed after construction.
#[derive(Debug, Clone)]
pub struct ChainRegistry {
    chains: Vec<ChainSpec>,
    mode: DeploymentMode,
    default_key: &'static str,
}

impl ChainRegistry {
    /// Builds the registry for a deployment mode.
    ///
    /// RPC endpoints resolve in order: explicit override (config file), the
    /// chain's environment variable (`RPC_URL_BASE`, `RPC_URL_BASE_SEPOLIA`),
    /// then the public default endpoint.
    pub fn new(mode: DeploymentMode, rpc_overrides: &HashMap<String, Url>) -> Self {
        let chains = BUILTIN_CHAINS
            .iter()
            .map(|builtin| {
                let rpc = rpc_overrides
                    .get(builtin.key)
                    .cloned()
                    .or_else(|| {
                        env::var(builtin.rpc_env)
                            .ok()
                            .and_then(|value| value.parse().ok())
                    })
                    .unwrap_or_else(|| {
                        Url::parse(builtin.rpc).expect("builtin rpc url is valid")
                    });
                ChainSpec {
                    key: builtin.key,
                    label: builtin.label,
                    chain_id: builtin.chain_id,
                    usdc: builtin.usdc,
                    rpc,
                    explorer: Url::parse(builtin.explorer).expect("builtin explorer url is valid"),
                    mode: builtin.mode,
                }
            })
            .collect();
        let default_key = match mode {
            DeploymentMode::Production => "base",
            DeploymentMode::Test => "base-sepolia",
        };
        ChainRegistry {
            chains,
            mode,
            default_key,
        }
    }

    pub fn mode(&self) -> DeploymentMode {
        self.mode
    }

    /// The chain used when a request does not name one.
    pub fn default_spec(&self) -> &ChainSpec {
        self.chains
            .iter()
            .find(|spec| spec.key == self.default_key)
            .expect("default chain is always present in the builtin table")
    }

    /// Lenient lookup for the advertising path: an unknown or absent key
    /// silently resolves to the default chain. No error path.
    pub fn spec_for(&self, key: Option<&str>) -> &ChainSpec {
        match key {
            Some(key) => self
                .chains
                .iter()
                .find(|spec| spec.key == key)
                .unwrap_or_else(|| self.default_spec()),
            None => self.default_spec(),
        }
    }

    /// Strict lookup for the proof-acceptance path: the key must name a chain
    /// in the accepted set for this deployment mode. A testnet key submitted
    /// to a production deployment is a client error, not a fallback.
    pub fn require(&self, key: Option<&str>) -> Result<&ChainSpec, ProofError> {
        match key {
            None => Ok(self.default_spec()),
            Some(key) => self
                .accepted()
                .find(|spec| spec.key == key)
                .ok_or_else(|| ProofError::UnsupportedChain(key.to_string())),
        }
    }

    /// Chains a challenge may advertise: only those matching the deployment's
    /// trust level.
    pub fn accepted(&self) -> impl Iterator<Item = &ChainSpec> {
        self.chains
            .iter()
            .filter(|spec| self.mode.accepts(spec.mode))
    }

    /// Every configured chain, regardless of mode.
    pub fn all(&self) -> &[ChainSpec] {
        &self.chains
    }
}

/// Which ecosystem a network identifier belongs to.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum NetworkFamily {
    Evm,
    Solana,
}

/// A network identifier the auditor recognizes in third-party challenges.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KnownNetwork {
    pub id: &'static str,
    pub mode: NetworkMode,
    pub family: NetworkFamily,
    /// Canonical USDC contract on this network. `None` for families whose
    /// asset identity is not address-shaped (Solana mints are not checked;
    /// the network label is trusted as-is).
    pub usdc: Option<Address>,
}

/// Networks the auditor recognizes, across both families. This table is wider
/// than the payable set: a third party may legitimately charge on a chain this
/// deployment never pays on.
static KNOWN_NETWORKS: &[KnownNetwork] = &[
    KnownNetwork {
        id: "base",
        mode: NetworkMode::Mainnet,
        family: NetworkFamily::Evm,
        usdc: Some(address!("0x833589fCD6eDb6E08f4c7C32D4f71b54bdA02913")),
    },
    KnownNetwork {
        id: "base-sepolia",
        mode: NetworkMode::Testnet,
        family: NetworkFamily::Evm,
        usdc: Some(address!("0x036CbD53842c5426634e7929541eC2318f3dCF7e")),
    },
    KnownNetwork {
        id: "polygon",
        mode: NetworkMode::Mainnet,
        family: NetworkFamily::Evm,
        usdc: Some(address!("0x3c499c542cEF5E3811e1192ce70d8cC03d5c3359")),
    },
    KnownNetwork {
        id: "polygon-amoy",
        mode: NetworkMode::Testnet,
        family: NetworkFamily::Evm,
        usdc: Some(address!("0x41E94Eb019C0762f9Bfcf9Fb1E58725BfB0e7582")),
    },
    KnownNetwork {
        id: "avalanche",
        mode: NetworkMode::Mainnet,
        family: NetworkFamily::Evm,
        usdc: Some(address!("0xB97EF9Ef8734C71904D8002F8b6Bc66Dd9c48a6E")),
    },
    KnownNetwork {
        id: "avalanche-fuji",
        mode: NetworkMode::Testnet,
        family: NetworkFamily::Evm,
        usdc: Some(address!("0x5425890298aed601595a70AB815c96711a31Bc65")),
    },
    KnownNetwork {
        id: "solana",
        mode: NetworkMode::Mainnet,
        family: NetworkFamily::Solana,
        usdc: None,
    },
    KnownNetwork {
        id: "solana-devnet",
        mode: NetworkMode::Testnet,
        family: NetworkFamily::Solana,
        usdc: None,
    },
];

/// Looks up a network identifier from a third-party challenge.
///
/// `None` means the identifier is not recognized at all.
pub fn classify_network(id: &str) -> Option<&'static KnownNetwork> {
    KNOWN_NETWORKS.iter().find(|network| network.id == id)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registry(mode: DeploymentMode) -> ChainRegistry {
        ChainRegistry::new(mode, &HashMap::new())
    }

    #[test]
    fn default_chain_follows_deployment_mode() {
        assert_eq!(registry(DeploymentMode::Production).default_spec().key, "base");
        assert_eq!(registry(DeploymentMode::Test).default_spec().key, "base-sepolia");
    }

    #[test]
    fn spec_for_is_lenient() {
        let registry = registry(DeploymentMode::Production);
        assert_eq!(registry.spec_for(Some("base")).key, "base");
        assert_eq!(registry.spec_for(Some("no-such-chain")).key, "base");
        assert_eq!(registry.spec_for(None).key, "base");
    }

    #[test]
    fn require_is_strict() {
        let registry = registry(DeploymentMode::Production);
        assert_eq!(registry.require(Some("base")).unwrap().key, "base");
        assert_eq!(registry.require(None).unwrap().key, "base");
        assert_eq!(
            registry.require(Some("no-such-chain")),
            Err(ProofError::UnsupportedChain("no-such-chain".to_string()))
        );
        // A known chain outside the deployment's trust level is still rejected.
        assert_eq!(
            registry.require(Some("base-sepolia")),
            Err(ProofError::UnsupportedChain("base-sepolia".to_string()))
        );
    }

    #[test]
    fn accepted_filters_by_mode() {
        let production: Vec<_> = registry(DeploymentMode::Production)
            .accepted()
            .map(|spec| spec.key)
            .collect();
        assert_eq!(production, vec!["base"]);

        let test: Vec<_> = registry(DeploymentMode::Test)
            .accepted()
            .map(|spec| spec.key)
            .collect();
        assert_eq!(test, vec!["base-sepolia"]);
    }

    #[test]
    fn rpc_override_takes_precedence() {
        let mut overrides = HashMap::new();
        overrides.insert(
            "base".to_string(),
            Url::parse("http://localhost:8545").unwrap(),
        );
        let registry = ChainRegistry::new(DeploymentMode::Production, &overrides);
        assert_eq!(registry.spec_for(Some("base")).rpc.as_str(), "http://localhost:8545/");
    }

    #[test]
    fn classify_network_covers_known_and_unknown() {
        let base = classify_network("base").unwrap();
        assert_eq!(base.mode, NetworkMode::Mainnet);
        assert_eq!(base.family, NetworkFamily::Evm);

        let solana = classify_network("solana").unwrap();
        assert_eq!(solana.family, NetworkFamily::Solana);
        assert!(solana.usdc.is_none());

        assert!(classify_network("unknown-net-1").is_none());
    }
}
