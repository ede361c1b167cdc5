//! HTTP 402 payment gate, applied per-route as a tower layer.
//!
//! The gate sits in front of a priced handler and admits a request only once a
//! valid, previously unused on-chain payment proof arrives in the request
//! headers. Everything else gets a structured 402 challenge telling the caller
//! exactly how to pay, or a 400 when the proof itself is malformed, or a 503
//! when the replay ledger cannot answer.
//!
//! Proof consumption happens **before** the inner handler runs. A proof buys at
//! most one admission even if the client disconnects mid-response; the
//! alternative (consume after success) would let a dropped connection replay
//! the same transaction.

use axum::Json;
use axum::body::Body;
use axum::response::{IntoResponse, Response};
use http::{Request, StatusCode};
use serde_json::json;
use std::convert::Infallible;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use tower::util::BoxCloneSyncService;
use tower::{Layer, Service, ServiceExt};

use alloy_primitives::Address;

use crate::activity::{ActivityEvent, ActivityKind, ActivityLog};
use crate::chains::ChainRegistry;
use crate::replay::ReplayGuard;
use crate::types::{
    CURRENCY_CODE, PaymentChallenge, PaymentProof, PaymentRequiredBody, Price, TxHash,
};
use crate::verifier::TransferVerifier;

/// Header carrying the transaction hash of the payment.
pub const HEADER_TX_HASH: &str = "X-Payment-TxHash";
/// Header naming the chain the payment was made on. Optional; the deployment's
/// default chain applies when absent.
pub const HEADER_CHAIN: &str = "X-Payment-Chain";

/// Shared collaborators every gated route verifies against.
pub struct GateContext {
    pub registry: Arc<ChainRegistry>,
    /// Address payments must be sent to.
    pub recipient: Address,
    pub verifier: Arc<dyn TransferVerifier>,
    pub guard: Arc<ReplayGuard>,
    pub activity: Arc<dyn ActivityLog>,
}

/// Factory for per-route payment layers over one shared [`GateContext`].
#[derive(Clone)]
pub struct PaymentGate {
    ctx: Arc<GateContext>,
}

impl PaymentGate {
    pub fn new(ctx: GateContext) -> Self {
        PaymentGate { ctx: Arc::new(ctx) }
    }

    /// A layer charging `price` for the route, labelled `action` in challenges
    /// and activity events.
    pub fn with_price(&self, price: Price, action: &str) -> PaymentGateLayer {
        PaymentGateLayer {
            ctx: self.ctx.clone(),
            price,
            action: Arc::from(action),
        }
    }
}

#[derive(Clone)]
pub struct PaymentGateLayer {
    ctx: Arc<GateContext>,
    price: Price,
    action: Arc<str>,
}

impl<S> Layer<S> for PaymentGateLayer
where
    S: Service<Request<Body>, Response = Response, Error = Infallible>
        + Clone
        + Send
        + Sync
        + 'static,
    S::Future: Send + 'static,
{
    type Service = PaymentGateService;

    fn layer(&self, inner: S) -> Self::Service {
        PaymentGateService {
            inner: BoxCloneSyncService::new(inner),
            ctx: self.ctx.clone(),
            price: self.price.clone(),
            action: self.action.clone(),
        }
    }
}

#[derive(Clone)]
pub struct PaymentGateService {
    inner: BoxCloneSyncService<Request<Body>, Response, Infallible>,
    ctx: Arc<GateContext>,
    price: Price,
    action: Arc<str>,
}

impl Service<Request<Body>> for PaymentGateService {
    type Response = Response;
    type Error = Infallible;
    type Future = Pin<Box<dyn Future<Output = Result<Response, Infallible>> + Send>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Infallible>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, request: Request<Body>) -> Self::Future {
        let inner = self.inner.clone();
        let ctx = self.ctx.clone();
        let price = self.price.clone();
        let action = self.action.clone();
        Box::pin(async move { Ok(gate(ctx, price, action, request, inner).await) })
    }
}

async fn gate(
    ctx: Arc<GateContext>,
    price: Price,
    action: Arc<str>,
    request: Request<Body>,
    inner: BoxCloneSyncService<Request<Body>, Response, Infallible>,
) -> Response {
    let Some(raw_hash) = header_value(&request, HEADER_TX_HASH) else {
        ctx.activity.record(ActivityEvent {
            kind: ActivityKind::Challenge,
            detail: format!("challenge issued for {action}"),
            amount: Some(price.display()),
            tx_hash: None,
        });
        return payment_required(&ctx, &price, &action, "payment required");
    };

    let proof = match raw_hash.parse() {
        Ok(tx_hash) => PaymentProof {
            tx_hash,
            chain_key: header_value(&request, HEADER_CHAIN),
        },
        Err(error) => return bad_request(error),
    };
    let tx_hash = proof.tx_hash;

    let spec = match ctx.registry.require(proof.chain_key.as_deref()) {
        Ok(spec) => spec,
        Err(error) => return bad_request(error),
    };

    // Cheap replay pre-check before spending an RPC round trip.
    match ctx.guard.is_consumed(&tx_hash).await {
        Ok(false) => {}
        Ok(true) => return replay_blocked(&ctx, &price, &action, tx_hash),
        Err(error) => return ledger_unavailable(error),
    }

    let outcome = ctx.verifier.verify(&tx_hash, price.raw(), spec.key).await;
    if !outcome.accepted {
        let reason = outcome
            .reason
            .unwrap_or_else(|| "payment not verified".to_string());
        tracing::info!(tx_hash = %tx_hash, chain = spec.key, %reason, "payment rejected");
        ctx.activity.record(ActivityEvent {
            kind: ActivityKind::Challenge,
            detail: reason.clone(),
            amount: Some(price.display()),
            tx_hash: Some(tx_hash),
        });
        return payment_required(&ctx, &price, &action, &reason);
    }

    // Consume before running the handler: one proof, one admission, even if
    // the client goes away before the response is written. The write runs in
    // a detached task so a disconnect that drops this future cannot abandon
    // an initiated ledger append and leave a verified payment unrecorded.
    let consume = {
        let guard = ctx.guard.clone();
        let chain_key = spec.key;
        let action = action.clone();
        tokio::spawn(async move { guard.consume(tx_hash, chain_key, &action).await })
    };
    match consume.await {
        Ok(Ok(true)) => {}
        Ok(Ok(false)) => return replay_blocked(&ctx, &price, &action, tx_hash),
        Ok(Err(error)) => return ledger_unavailable(error),
        Err(error) => return ledger_unavailable(error),
    }

    tracing::info!(tx_hash = %tx_hash, chain = spec.key, action = %action, "payment accepted");
    ctx.activity.record(ActivityEvent {
        kind: ActivityKind::Payment,
        detail: format!("payment accepted for {action}"),
        amount: Some(price.display()),
        tx_hash: Some(tx_hash),
    });

    match inner.oneshot(request).await {
        Ok(response) => response,
        Err(infallible) => match infallible {},
    }
}

fn header_value(request: &Request<Body>, name: &str) -> Option<String> {
    request
        .headers()
        .get(name)
        .and_then(|value| value.to_str().ok())
        .map(|value| value.to_string())
}

fn challenge(ctx: &GateContext, price: &Price, action: &str) -> PaymentChallenge {
    PaymentChallenge {
        amount: price.display(),
        currency: CURRENCY_CODE.to_string(),
        recipient: ctx.recipient,
        networks: ctx.registry.accepted().map(|spec| spec.summary()).collect(),
        action: action.to_string(),
    }
}

fn payment_required(ctx: &GateContext, price: &Price, action: &str, error: &str) -> Response {
    let body = PaymentRequiredBody {
        error: error.to_string(),
        payment_details: challenge(ctx, price, action),
    };
    (StatusCode::PAYMENT_REQUIRED, Json(body)).into_response()
}

fn replay_blocked(ctx: &GateContext, price: &Price, action: &str, tx_hash: TxHash) -> Response {
    tracing::warn!(tx_hash = %tx_hash, "replayed transaction blocked");
    ctx.activity.record(ActivityEvent {
        kind: ActivityKind::ReplayBlocked,
        detail: "transaction already used".to_string(),
        amount: None,
        tx_hash: Some(tx_hash),
    });
    payment_required(ctx, price, action, "transaction already used")
}

fn bad_request(error: impl std::fmt::Display) -> Response {
    (
        StatusCode::BAD_REQUEST,
        Json(json!({ "error": error.to_string() })),
    )
        .into_response()
}

fn ledger_unavailable(error: impl std::fmt::Display) -> Response {
    tracing::error!(%error, "replay ledger unavailable, failing closed");
    (
        StatusCode::SERVICE_UNAVAILABLE,
        Json(json!({ "error": "payment verification temporarily unavailable" })),
    )
        .into_response()
}
