//! Replay protection: each transaction hash authorizes at most one admission.
//!
//! The guard layers a process-local cache over a durable ledger. The cache is a
//! write-through accelerator only; correctness rests entirely on the ledger's
//! insert-if-absent semantics, which must be atomic at the storage layer (a
//! unique index, not a prior read). Between "check not consumed" and "mark
//! consumed" two concurrent requests carrying the same hash can both pass the
//! check; the losing `insert_if_absent` is what turns the second one away.
//!
//! Failure semantics are fail-closed: if the ledger cannot be consulted, the
//! request is rejected. Failing open would allow unlimited reuse of one payment
//! for the duration of a storage outage.

use async_trait::async_trait;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use std::sync::Arc;

use crate::types::{TxHash, UsedTransactionRecord};

/// Durable-store fault while checking or recording consumption.
///
/// The gate maps this to HTTP 503; it is never treated as "not consumed".
#[derive(Debug, thiserror::Error)]
pub enum LedgerError {
    #[error("replay ledger unavailable: {0}")]
    Unavailable(String),
}

/// The durable replay ledger, an external collaborator.
///
/// Implementations back onto a store with an insert-if-absent primitive that is
/// unique on the transaction hash (unique index with conflict handling, or an
/// equivalent atomic put). `insert_if_absent` returning `false` means another
/// writer, possibly in another process, recorded the hash first.
#[async_trait]
pub trait ReplayLedger: Send + Sync {
    /// Whether any record exists for this hash, on any chain.
    async fn contains(&self, tx_hash: &TxHash) -> Result<bool, LedgerError>;

    /// Atomically records the proof as consumed. Returns `true` if this call
    /// created the record, `false` if one already existed.
    async fn insert_if_absent(&self, record: UsedTransactionRecord) -> Result<bool, LedgerError>;
}

/// In-memory ledger used by tests and the demo binary.
///
/// The dashmap entry API gives the same atomic insert-if-absent contract a
/// production store provides with a unique index.
#[derive(Debug, Default)]
pub struct MemoryLedger {
    records: DashMap<TxHash, UsedTransactionRecord>,
}

impl MemoryLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

#[async_trait]
impl ReplayLedger for MemoryLedger {
    async fn contains(&self, tx_hash: &TxHash) -> Result<bool, LedgerError> {
        Ok(self.records.contains_key(tx_hash))
    }

    async fn insert_if_absent(&self, record: UsedTransactionRecord) -> Result<bool, LedgerError> {
        match self.records.entry(record.tx_hash) {
            Entry::Occupied(_) => Ok(false),
            Entry::Vacant(vacant) => {
                vacant.insert(record);
                Ok(true)
            }
        }
    }
}

/// Request-facing replay guard: local cache in front of the durable ledger.
pub struct ReplayGuard {
    cache: DashMap<TxHash, ()>,
    ledger: Arc<dyn ReplayLedger>,
}

impl ReplayGuard {
    pub fn new(ledger: Arc<dyn ReplayLedger>) -> Self {
        ReplayGuard {
            cache: DashMap::new(),
            ledger,
        }
    }

    /// Whether the hash was already consumed. A durable hit warms the cache:
    /// once observed consumed, a hash stays consumed for the process lifetime.
    ///
    /// # Errors
    ///
    /// Propagates [`LedgerError`] so the caller can fail closed.
    pub async fn is_consumed(&self, tx_hash: &TxHash) -> Result<bool, LedgerError> {
        if self.cache.contains_key(tx_hash) {
            return Ok(true);
        }
        let consumed = self.ledger.contains(tx_hash).await?;
        if consumed {
            self.cache.insert(*tx_hash, ());
        }
        Ok(consumed)
    }

    /// Records consumption. Returns `false` when a concurrent request consumed
    /// the same hash first; the caller must treat that as a replay.
    pub async fn consume(
        &self,
        tx_hash: TxHash,
        chain_key: &str,
        action: &str,
    ) -> Result<bool, LedgerError> {
        let record = UsedTransactionRecord::new(tx_hash, chain_key, action);
        let inserted = self.ledger.insert_if_absent(record).await?;
        // Consumed either way now, whether by us or by the racing winner.
        self.cache.insert(tx_hash, ());
        Ok(inserted)
    }
}
