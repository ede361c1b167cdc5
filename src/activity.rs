//! Activity log collaborator interface.
//!
//! The gate emits one structured event per protocol outcome; a downstream
//! observability pipeline consumes them. Nothing is ever read back, so the
//! trait is fire-and-forget and implementations must not block the request
//! path on delivery.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fmt::Display;

use crate::types::TxHash;

/// Event discriminator, matching the wire values downstream dashboards key on.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ActivityKind {
    /// A challenge was issued to an unpaid caller.
    #[serde(rename = "402")]
    Challenge,
    /// A payment was verified and the request admitted.
    #[serde(rename = "payment")]
    Payment,
    /// An already-consumed proof was turned away.
    #[serde(rename = "replay_blocked")]
    ReplayBlocked,
}

impl Display for ActivityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ActivityKind::Challenge => "402",
            ActivityKind::Payment => "payment",
            ActivityKind::ReplayBlocked => "replay_blocked",
        };
        write!(f, "{s}")
    }
}

/// One structured activity event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActivityEvent {
    #[serde(rename = "type")]
    pub kind: ActivityKind,
    pub detail: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub amount: Option<Decimal>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tx_hash: Option<TxHash>,
}

/// Sink for activity events. External collaborator boundary.
pub trait ActivityLog: Send + Sync {
    fn record(&self, event: ActivityEvent);
}

/// Default sink: structured tracing events, picked up by whatever subscriber
/// the process installed.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingActivityLog;

impl ActivityLog for TracingActivityLog {
    fn record(&self, event: ActivityEvent) {
        tracing::info!(
            kind = %event.kind,
            detail = %event.detail,
            amount = ?event.amount,
            tx_hash = ?event.tx_hash,
            "activity"
        );
    }
}
