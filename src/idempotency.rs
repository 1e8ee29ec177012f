//! Idempotency store: (key, endpoint) -> the response a request already produced
use super::error::{Result, StockError};
use super::types::{Id, TimeStamp};
use chrono::Utc;
use sled::transaction::{ConflictableTransactionError, TransactionalTree};

#[derive(Debug, Clone, PartialEq, Eq, minicbor::Encode, minicbor::Decode)]
pub struct IdempotencyRecord {
    #[n(0)]
    pub idempotency_key: String,
    #[n(1)]
    pub endpoint: String,
    #[n(2)]
    pub actor_id: Id,
    #[n(3)]
    pub request_hash: String, // sha256 of the canonical request
    #[n(4)]
    pub response_body: String, // serialized response, replayed verbatim
    #[n(5)]
    pub created_at: TimeStamp<Utc>,
}

#[derive(Clone)]
pub struct IdempotencyStore {
    tree: sled::Tree,
}

impl IdempotencyRecord {
    pub fn new(
        idempotency_key: String,
        endpoint: String,
        actor_id: Id,
        request_hash: String,
        response_body: String,
    ) -> Self {
        Self {
            idempotency_key,
            endpoint,
            actor_id,
            request_hash,
            response_body,
            created_at: TimeStamp::new(),
        }
    }

    /// The stored response when `request_hash` matches, otherwise a conflict.
    pub fn replay(&self, request_hash: &str) -> Result<&str> {
        if self.request_hash != request_hash {
            return Err(StockError::IdempotencyConflict {
                key: self.idempotency_key.clone(),
                endpoint: self.endpoint.clone(),
            });
        }
        Ok(&self.response_body)
    }
}

// NUL cannot appear in an http header value, so the pair maps to one key only
fn storage_key(idempotency_key: &str, endpoint: &str) -> Vec<u8> {
    let mut key = Vec::with_capacity(endpoint.len() + idempotency_key.len() + 1);
    key.extend_from_slice(endpoint.as_bytes());
    key.push(0);
    key.extend_from_slice(idempotency_key.as_bytes());
    key
}

impl IdempotencyStore {
    pub fn new(tree: sled::Tree) -> Self {
        Self { tree }
    }

    pub fn lookup(&self, idempotency_key: &str, endpoint: &str) -> Result<Option<IdempotencyRecord>> {
        match self.tree.get(storage_key(idempotency_key, endpoint))? {
            Some(bytes) => Ok(Some(minicbor::decode(&bytes)?)),
            None => Ok(None),
        }
    }

    /// Same as [`Self::lookup`] but reads through an open transaction.
    pub fn lookup_in(
        tx: &TransactionalTree,
        idempotency_key: &str,
        endpoint: &str,
    ) -> Result<Option<IdempotencyRecord>, ConflictableTransactionError<StockError>> {
        match tx.get(storage_key(idempotency_key, endpoint))? {
            Some(bytes) => minicbor::decode(&bytes)
                .map(Some)
                .map_err(|e| ConflictableTransactionError::Abort(e.into())),
            None => Ok(None),
        }
    }

    /// Only ever called inside the transaction that applies the guarded mutation.
    pub fn record_in(
        tx: &TransactionalTree,
        record: &IdempotencyRecord,
    ) -> Result<(), ConflictableTransactionError<StockError>> {
        let bytes =
            minicbor::to_vec(record).map_err(|e| ConflictableTransactionError::Abort(e.into()))?;
        tx.insert(storage_key(&record.idempotency_key, &record.endpoint), bytes)?;
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.tree.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tree.is_empty()
    }
}
