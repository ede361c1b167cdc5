//! Compliance auditing of third-party x402 endpoints.
//!
//! Given a URL, the auditor probes it the way a paying client would and grades
//! what comes back: is the endpoint up, does it speak the protocol at all, and
//! does its advertised challenge name a real network and the canonical USDC
//! asset on that network. The output is a [`ComplianceReport`] suitable for
//! returning verbatim from an HTTP handler.
//!
//! The auditor is read-only: it never pays, never mutates remote state beyond
//! issuing idempotent GET/POST probes, and renders every failure as a verdict
//! rather than an error.

use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::{Duration, Instant};
use tracing::instrument;
use url::Url;

use alloy_primitives::Address;

use crate::chains::{KnownNetwork, NetworkFamily, NetworkMode, classify_network};

/// Header a compliant endpoint carries its challenge in, base64-encoded JSON.
const CHALLENGE_HEADER: &str = "Payment-Required";

const FETCH_TIMEOUT: Duration = Duration::from_secs(8);
const PROBE_TIMEOUT: Duration = Duration::from_secs(3);

/// Final grade for an audited endpoint, from worst to best.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Verdict {
    /// The endpoint did not answer at all.
    Offline,
    /// The endpoint answers 402 without a usable challenge header.
    NoX402,
    /// The endpoint answers, but nothing about it speaks the protocol.
    Reachable,
    /// The challenge names an unrecognized network, or a recognized one with
    /// a non-canonical asset.
    WrongChain,
    /// The challenge charges on a test network.
    Testnet,
    /// The challenge charges USDC on a production network.
    MainnetVerified,
}

impl fmt::Display for Verdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Verdict::Offline => "offline",
            Verdict::NoX402 => "no_x402",
            Verdict::Reachable => "reachable",
            Verdict::WrongChain => "wrong_chain",
            Verdict::Testnet => "testnet",
            Verdict::MainnetVerified => "mainnet_verified",
        };
        write!(f, "{s}")
    }
}

/// The parts of a remote challenge the audit grades and reports.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DecodedChallenge {
    pub network: Option<String>,
    pub asset: Option<String>,
    /// Raw amount string exactly as advertised; not normalized.
    pub amount_raw: Option<String>,
    pub pay_to: Option<String>,
    pub version: Option<u32>,
}

/// Everything one audit learned about an endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComplianceReport {
    pub url: String,
    pub reachable: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub http_status: Option<u16>,
    pub latency_ms: u64,
    /// Whether `/health` on the same host answered 2xx. `None` when the
    /// endpoint was offline and the probe never ran.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub health_probe: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub challenge: Option<DecodedChallenge>,
    pub verdict: Verdict,
    pub detail: String,
}

/// Wire shape of the challenge header payload. Tolerant of absent fields:
/// grading a sloppy endpoint is the whole point.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawChallenge {
    #[serde(default)]
    x402_version: Option<u32>,
    #[serde(default)]
    accepts: Vec<RawOffer>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawOffer {
    #[serde(default)]
    network: Option<String>,
    #[serde(default)]
    asset: Option<String>,
    #[serde(default, alias = "amount")]
    max_amount_required: Option<String>,
    #[serde(default)]
    pay_to: Option<String>,
}

/// Probes third-party endpoints and grades their protocol compliance.
pub struct ComplianceAuditor {
    http: reqwest::Client,
    fetch_timeout: Duration,
    probe_timeout: Duration,
}

impl Default for ComplianceAuditor {
    fn default() -> Self {
        Self::new()
    }
}

impl ComplianceAuditor {
    pub fn new() -> Self {
        ComplianceAuditor {
            http: reqwest::Client::new(),
            fetch_timeout: FETCH_TIMEOUT,
            probe_timeout: PROBE_TIMEOUT,
        }
    }

    #[cfg(test)]
    fn with_timeouts(mut self, fetch: Duration, probe: Duration) -> Self {
        self.fetch_timeout = fetch;
        self.probe_timeout = probe;
        self
    }

    /// Audits one endpoint. Always produces a report; never errors.
    #[instrument(skip_all, fields(url = %url))]
    pub async fn audit(&self, url: &Url) -> ComplianceReport {
        let started = Instant::now();

        let first = self
            .http
            .get(url.clone())
            .timeout(self.fetch_timeout)
            .send()
            .await;
        let response = match first {
            Ok(response) => response,
            Err(error) => {
                tracing::info!(%error, "endpoint unreachable");
                return ComplianceReport {
                    url: url.to_string(),
                    reachable: false,
                    http_status: None,
                    latency_ms: started.elapsed().as_millis() as u64,
                    health_probe: None,
                    challenge: None,
                    verdict: Verdict::Offline,
                    detail: format!("request failed: {error}"),
                };
            }
        };
        let latency_ms = started.elapsed().as_millis() as u64;

        // Some endpoints only challenge the verb they charge on.
        let response = if response.headers().contains_key(CHALLENGE_HEADER) {
            response
        } else {
            match self
                .http
                .post(url.clone())
                .timeout(self.fetch_timeout)
                .send()
                .await
            {
                Ok(retry) if retry.headers().contains_key(CHALLENGE_HEADER) => retry,
                _ => response,
            }
        };

        let status = response.status();
        let http_status = Some(status.as_u16());
        let health_probe = Some(self.probe_health(url).await);

        let challenge = response
            .headers()
            .get(CHALLENGE_HEADER)
            .and_then(|header| decode_challenge(header.as_bytes()));

        // No usable challenge: a bare 402 claims the protocol without
        // speaking it; anything else is merely an exposed endpoint.
        let (verdict, detail) = match &challenge {
            Some(decoded) => grade(decoded),
            None if status == reqwest::StatusCode::PAYMENT_REQUIRED => (
                Verdict::NoX402,
                "responds 402 without a usable payment challenge".to_string(),
            ),
            None => (
                Verdict::Reachable,
                "responds without a payment challenge".to_string(),
            ),
        };

        ComplianceReport {
            url: url.to_string(),
            reachable: true,
            http_status,
            latency_ms,
            health_probe,
            challenge,
            verdict,
            detail,
        }
    }

    /// Best-effort liveness check against `/health` on the endpoint's host.
    async fn probe_health(&self, url: &Url) -> bool {
        let Ok(health) = url.join("/health") else {
            return false;
        };
        match self
            .http
            .get(health)
            .timeout(self.probe_timeout)
            .send()
            .await
        {
            Ok(response) => response.status().is_success(),
            Err(_) => false,
        }
    }
}

/// `None` when the header is not base64 JSON with at least one offer; a
/// challenge that offers nothing is no challenge.
fn decode_challenge(header: &[u8]) -> Option<DecodedChallenge> {
    let bytes = BASE64.decode(header).ok()?;
    let raw: RawChallenge = serde_json::from_slice(&bytes).ok()?;
    let offer = raw.accepts.into_iter().next()?;
    Some(DecodedChallenge {
        network: offer.network,
        asset: offer.asset,
        amount_raw: offer.max_amount_required,
        pay_to: offer.pay_to,
        version: raw.x402_version,
    })
}

fn grade(challenge: &DecodedChallenge) -> (Verdict, String) {
    let Some(network_id) = challenge.network.as_deref() else {
        return (
            Verdict::WrongChain,
            "payment challenge names no network".to_string(),
        );
    };
    let Some(network) = classify_network(network_id) else {
        return (
            Verdict::WrongChain,
            format!("unrecognized network '{network_id}'"),
        );
    };
    match network.mode {
        // Test networks grade as testnet whatever asset they name; the asset
        // check belongs to the production branch only.
        NetworkMode::Testnet => (
            Verdict::Testnet,
            format!("charges on test network {network_id}"),
        ),
        NetworkMode::Mainnet => {
            if let Some(detail) = check_asset(challenge, network) {
                return (Verdict::WrongChain, detail);
            }
            match network.family {
                NetworkFamily::Evm => (
                    Verdict::MainnetVerified,
                    format!("charges USDC on {network_id}"),
                ),
                // Non-EVM asset identity is not address-shaped; the network
                // label is trusted and the asset goes ungraded. Known gap.
                NetworkFamily::Solana => (
                    Verdict::MainnetVerified,
                    format!("charges on {network_id}; asset not checked for this family"),
                ),
            }
        }
    }
}

/// Returns a complaint when an EVM challenge's asset is not the canonical USDC
/// contract for its network.
fn check_asset(challenge: &DecodedChallenge, network: &KnownNetwork) -> Option<String> {
    let expected = network.usdc?;
    let Some(asset) = challenge.asset.as_deref() else {
        return Some(format!("challenge on {} names no asset", network.id));
    };
    match Address::from_str(asset) {
        Ok(address) if address == expected => None,
        _ => Some(format!(
            "asset on {} is not the canonical USDC contract",
            network.id
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const BASE_USDC: &str = "0x833589fCD6eDb6E08f4c7C32D4f71b54bdA02913";

    fn auditor() -> ComplianceAuditor {
        ComplianceAuditor::new().with_timeouts(Duration::from_secs(2), Duration::from_secs(1))
    }

    fn encode_challenge(network: &str, asset: &str) -> String {
        let body = json!({
            "x402Version": 1,
            "error": "payment required",
            "accepts": [{
                "scheme": "exact",
                "network": network,
                "maxAmountRequired": "50000",
                "asset": asset,
                "payTo": "0x00000000000000000000000000000000000000aa",
            }],
        });
        BASE64.encode(serde_json::to_vec(&body).unwrap())
    }

    async fn mount_challenge(server: &MockServer, verb: &str, header: &str) {
        Mock::given(method(verb))
            .and(path("/paid"))
            .respond_with(
                ResponseTemplate::new(402).insert_header(CHALLENGE_HEADER, header),
            )
            .mount(server)
            .await;
    }

    fn paid_url(server: &MockServer) -> Url {
        Url::parse(&format!("{}/paid", server.uri())).unwrap()
    }

    #[tokio::test]
    async fn unreachable_endpoint_is_offline() {
        let url = Url::parse("http://127.0.0.1:1/paid").unwrap();
        let report = auditor().audit(&url).await;
        assert!(!report.reachable);
        assert_eq!(report.verdict, Verdict::Offline);
        assert!(report.http_status.is_none());
        assert!(report.health_probe.is_none());
    }

    #[tokio::test]
    async fn plain_endpoint_is_merely_reachable() {
        let server = MockServer::start().await;
        Mock::given(path("/paid"))
            .respond_with(ResponseTemplate::new(200).set_body_string("hello"))
            .mount(&server)
            .await;

        let report = auditor().audit(&paid_url(&server)).await;
        assert!(report.reachable);
        assert_eq!(report.http_status, Some(200));
        assert_eq!(report.verdict, Verdict::Reachable);
        assert!(report.challenge.is_none());
    }

    #[tokio::test]
    async fn bare_402_without_header_is_no_x402() {
        let server = MockServer::start().await;
        Mock::given(path("/paid"))
            .respond_with(ResponseTemplate::new(402).set_body_string("payment required"))
            .mount(&server)
            .await;

        let report = auditor().audit(&paid_url(&server)).await;
        assert_eq!(report.http_status, Some(402));
        assert_eq!(report.verdict, Verdict::NoX402);
    }

    #[tokio::test]
    async fn challenge_only_on_post_is_still_found() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/paid"))
            .respond_with(ResponseTemplate::new(405))
            .mount(&server)
            .await;
        mount_challenge(&server, "POST", &encode_challenge("base", BASE_USDC)).await;

        let report = auditor().audit(&paid_url(&server)).await;
        assert_eq!(report.verdict, Verdict::MainnetVerified);
    }

    #[tokio::test]
    async fn canonical_mainnet_challenge_is_verified() {
        let server = MockServer::start().await;
        mount_challenge(&server, "GET", &encode_challenge("base", BASE_USDC)).await;

        let report = auditor().audit(&paid_url(&server)).await;
        assert_eq!(report.verdict, Verdict::MainnetVerified);
        assert_eq!(report.http_status, Some(402));
        let challenge = report.challenge.unwrap();
        assert_eq!(challenge.network.as_deref(), Some("base"));
        assert_eq!(challenge.amount_raw.as_deref(), Some("50000"));
        assert_eq!(challenge.version, Some(1));
    }

    #[tokio::test]
    async fn amount_alias_is_accepted() {
        let server = MockServer::start().await;
        let body = json!({
            "x402Version": 1,
            "accepts": [{"network": "base", "asset": BASE_USDC, "amount": "75000"}],
        });
        let header = BASE64.encode(serde_json::to_vec(&body).unwrap());
        mount_challenge(&server, "GET", &header).await;

        let report = auditor().audit(&paid_url(&server)).await;
        assert_eq!(report.verdict, Verdict::MainnetVerified);
        assert_eq!(report.challenge.unwrap().amount_raw.as_deref(), Some("75000"));
    }

    #[tokio::test]
    async fn testnet_challenge_is_graded_testnet() {
        let server = MockServer::start().await;
        let sepolia_usdc = "0x036CbD53842c5426634e7929541eC2318f3dCF7e";
        mount_challenge(&server, "GET", &encode_challenge("base-sepolia", sepolia_usdc)).await;

        let report = auditor().audit(&paid_url(&server)).await;
        assert_eq!(report.verdict, Verdict::Testnet);
    }

    #[tokio::test]
    async fn testnet_with_wrong_asset_is_still_testnet() {
        let server = MockServer::start().await;
        let not_usdc = "0x00000000000000000000000000000000000000cc";
        mount_challenge(&server, "GET", &encode_challenge("base-sepolia", not_usdc)).await;

        let report = auditor().audit(&paid_url(&server)).await;
        assert_eq!(report.verdict, Verdict::Testnet);
    }

    #[tokio::test]
    async fn wrong_asset_on_known_network_is_wrong_chain() {
        let server = MockServer::start().await;
        let not_usdc = "0x00000000000000000000000000000000000000cc";
        mount_challenge(&server, "GET", &encode_challenge("base", not_usdc)).await;

        let report = auditor().audit(&paid_url(&server)).await;
        assert_eq!(report.verdict, Verdict::WrongChain);
        assert!(report.detail.contains("canonical USDC"));
    }

    #[tokio::test]
    async fn unknown_network_is_wrong_chain() {
        let server = MockServer::start().await;
        mount_challenge(&server, "GET", &encode_challenge("unknown-net-1", BASE_USDC)).await;

        let report = auditor().audit(&paid_url(&server)).await;
        assert_eq!(report.verdict, Verdict::WrongChain);
        assert!(report.detail.contains("unrecognized network"));
    }

    #[tokio::test]
    async fn undecodable_challenge_on_402_is_no_x402() {
        let server = MockServer::start().await;
        mount_challenge(&server, "GET", "!!not-base64!!").await;

        let report = auditor().audit(&paid_url(&server)).await;
        assert_eq!(report.verdict, Verdict::NoX402);
        assert!(report.challenge.is_none());
    }

    #[tokio::test]
    async fn solana_mainnet_skips_asset_grading() {
        let server = MockServer::start().await;
        // Mint address deliberately not an EVM address; it must not be graded.
        mount_challenge(
            &server,
            "GET",
            &encode_challenge("solana", "EPjFWdd5AufqSSqeM2qN1xzybapC8G4wEGGkZwyTDt1v"),
        )
        .await;

        let report = auditor().audit(&paid_url(&server)).await;
        assert_eq!(report.verdict, Verdict::MainnetVerified);
        assert!(report.detail.contains("asset not checked"));
    }

    #[tokio::test]
    async fn health_probe_reflects_health_route() {
        let server = MockServer::start().await;
        mount_challenge(&server, "GET", &encode_challenge("base", BASE_USDC)).await;
        Mock::given(method("GET"))
            .and(path("/health"))
            .respond_with(ResponseTemplate::new(200))
            .mount(&server)
            .await;

        let report = auditor().audit(&paid_url(&server)).await;
        assert_eq!(report.health_probe, Some(true));
    }

    #[tokio::test]
    async fn missing_health_route_probes_false() {
        let server = MockServer::start().await;
        mount_challenge(&server, "GET", &encode_challenge("base", BASE_USDC)).await;

        let report = auditor().audit(&paid_url(&server)).await;
        assert_eq!(report.health_probe, Some(false));
    }
}
