//! Audit rows written alongside a mutation. Observability only, nothing reads them back
//! to make a decision.
use super::error::StockError;
use super::types::{Id, TimeStamp};
use chrono::Utc;
use sled::transaction::{ConflictableTransactionError, TransactionalTree};

#[derive(Debug, Clone, PartialEq, Eq, minicbor::Encode, minicbor::Decode)]
pub struct AuditRecord {
    #[n(0)]
    pub actor_id: Id,
    #[n(1)]
    pub actor_type: String,
    #[n(2)]
    pub action: String,
    #[n(3)]
    pub resource: String,
    #[n(4)]
    pub resource_id: String,
    #[n(5)]
    pub status: String,
    #[n(6)]
    pub request_id: Option<String>,
    #[n(7)]
    pub metadata: String, // json
    #[n(8)]
    pub created_at: TimeStamp<Utc>,
}

impl AuditRecord {
    pub fn stock_move(
        actor_id: Id,
        move_id: Id,
        request_id: Option<String>,
        metadata: String,
    ) -> Self {
        Self {
            actor_id,
            actor_type: "user".to_string(),
            action: "stock.move".to_string(),
            resource: "stock_ledger".to_string(),
            resource_id: move_id.to_string(),
            status: "ok".to_string(),
            request_id,
            metadata,
            created_at: TimeStamp::new(),
        }
    }

    pub(crate) fn append_in(
        &self,
        tx: &TransactionalTree,
        id: u64,
    ) -> Result<(), ConflictableTransactionError<StockError>> {
        // an audit row that can't be encoded is dropped, the move still commits
        match minicbor::to_vec(self) {
            Ok(bytes) => {
                tx.insert(id.to_be_bytes().to_vec(), bytes)?;
            }
            Err(e) => tracing::warn!(error = %e, "skipping audit record"),
        }
        Ok(())
    }
}

/// Audit rows in insertion order
pub(crate) fn list(tree: &sled::Tree) -> crate::error::Result<Vec<AuditRecord>> {
    tree.iter()
        .values()
        .map(|bytes| -> crate::error::Result<AuditRecord> {
            let bytes = bytes?;
            Ok(minicbor::decode(&bytes)?)
        })
        .collect()
}
