use axum::Router;
use axum::extract::Extension;
use axum::routing::{get, post};
use clap::Parser;
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing_subscriber::EnvFilter;

use tollgate::activity::{ActivityLog, TracingActivityLog};
use tollgate::auditor::ComplianceAuditor;
use tollgate::chains::ChainRegistry;
use tollgate::config::{CliArgs, Config};
use tollgate::gate::{GateContext, PaymentGate};
use tollgate::handlers;
use tollgate::replay::{MemoryLedger, ReplayGuard};
use tollgate::sig_down;
use tollgate::types::Price;
use tollgate::verifier::RpcVerifier;

#[tokio::main]
async fn main() {
    if let Err(error) = run().await {
        eprintln!("fatal: {error}");
        std::process::exit(1);
    }
}

async fn run() -> Result<(), Box<dyn std::error::Error>> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = CliArgs::parse();
    let config = Config::load(&args)?;

    let registry = Arc::new(ChainRegistry::new(config.mode, &config.rpc));
    let verifier = Arc::new(RpcVerifier::from_registry(&registry, config.pay_to));
    let guard = Arc::new(ReplayGuard::new(Arc::new(MemoryLedger::new())));
    let activity: Arc<dyn ActivityLog> = Arc::new(TracingActivityLog);
    let gate = PaymentGate::new(GateContext {
        registry: registry.clone(),
        recipient: config.pay_to,
        verifier,
        guard,
        activity,
    });
    let auditor = Arc::new(ComplianceAuditor::new());

    let app = Router::new()
        .route("/premium/report", get(handlers::premium_report))
        .route_layer(gate.with_price(Price::usdc("0.05")?, "premium-report"))
        .route("/audit", post(handlers::post_audit))
        .route("/health", get(handlers::health))
        .layer(Extension(auditor))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http());

    let shutdown = sig_down::shutdown_token()?;
    let listener = tokio::net::TcpListener::bind(config.listen_addr()).await?;
    tracing::info!(
        addr = %listener.local_addr()?,
        mode = ?config.mode,
        pay_to = %config.pay_to,
        "listening"
    );
    axum::serve(listener, app)
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await?;
    Ok(())
}
