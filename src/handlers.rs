//! HTTP handlers for the non-gated surface: the audit API and health.

use axum::Json;
use axum::extract::Extension;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;
use url::Url;

use crate::auditor::ComplianceAuditor;

#[derive(Debug, Deserialize)]
pub struct AuditRequest {
    pub url: String,
}

/// `POST /audit`: grade a third-party endpoint's protocol compliance.
pub async fn post_audit(
    Extension(auditor): Extension<Arc<ComplianceAuditor>>,
    Json(body): Json<AuditRequest>,
) -> Response {
    let url = match Url::parse(&body.url) {
        Ok(url) if matches!(url.scheme(), "http" | "https") => url,
        _ => {
            return (
                StatusCode::BAD_REQUEST,
                Json(json!({ "error": format!("not an http(s) url: {}", body.url) })),
            )
                .into_response();
        }
    };
    let report = auditor.audit(&url).await;
    Json(report).into_response()
}

/// `GET /health`: process liveness.
pub async fn health() -> Json<serde_json::Value> {
    Json(json!({ "status": "ok" }))
}

/// Demo handler sitting behind the payment gate.
pub async fn premium_report() -> Json<serde_json::Value> {
    Json(json!({
        "report": "exclusive market analysis",
        "generated_for": "paid caller",
    }))
}
