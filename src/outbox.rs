//! Outbox table: notifications owed to the broker, written in the same transaction
//! as the mutation they describe.
//!
//! Events are keyed by a big-endian monotonic id so tree order is draining order.
//! A second tree indexes the ids whose `sent_at` is still null, which keeps the
//! pending scan proportional to the backlog rather than to history.
//!
//! Claiming uses a lease instead of row locks: a claim stamps `claimed_by` and
//! `lease_expires_at` inside a serializable transaction, and no other claimant may
//! take an event while its lease is live. A worker that dies mid-pass simply lets
//! the lease run out and the event becomes claimable again.
use super::error::{Result, StockError};
use super::store::Store;
use super::types::TimeStamp;
use chrono::Utc;
use sled::Transactional;
use sled::transaction::{ConflictableTransactionError, TransactionalTree};
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Eq, minicbor::Encode, minicbor::Decode)]
pub struct OutboxEvent {
    #[n(0)]
    pub id: u64,
    #[n(1)]
    pub topic: String,
    #[n(2)]
    pub payload: String, // json, never rewritten after enqueue
    #[n(3)]
    pub created_at: TimeStamp<Utc>,
    #[n(4)]
    pub sent_at: Option<TimeStamp<Utc>>,
    #[n(5)]
    pub attempt_count: u32, // failed publishes so far
    #[n(6)]
    pub last_error: Option<String>,
    #[n(7)]
    pub claimed_by: Option<String>,
    #[n(8)]
    pub lease_expires_at: Option<TimeStamp<Utc>>,
}

/// Result of publishing one claimed event
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Delivery {
    Sent,
    Failed(String),
}

#[derive(Clone)]
pub struct OutboxStore {
    events: sled::Tree,
    pending: sled::Tree,
}

impl OutboxEvent {
    pub fn is_pending(&self) -> bool {
        self.sent_at.is_none()
    }

    /// Pending and not under a live lease
    pub fn is_claimable(&self) -> bool {
        self.is_pending()
            && self
                .lease_expires_at
                .as_ref()
                .is_none_or(|expires| expires.is_past())
    }

    fn release(&mut self) {
        self.claimed_by = None;
        self.lease_expires_at = None;
    }
}

fn event_key(id: u64) -> [u8; 8] {
    id.to_be_bytes()
}

fn abort<E: Into<StockError>>(e: E) -> ConflictableTransactionError<StockError> {
    ConflictableTransactionError::Abort(e.into())
}

fn decode_in(
    tx: &TransactionalTree,
    id: u64,
) -> Result<Option<OutboxEvent>, ConflictableTransactionError<StockError>> {
    match tx.get(event_key(id))? {
        Some(bytes) => minicbor::decode(&bytes).map(Some).map_err(abort),
        None => Ok(None),
    }
}

fn encode_in(
    tx: &TransactionalTree,
    event: &OutboxEvent,
) -> Result<(), ConflictableTransactionError<StockError>> {
    let bytes = minicbor::to_vec(event).map_err(abort)?;
    tx.insert(event_key(event.id).to_vec(), bytes)?;
    Ok(())
}

impl OutboxStore {
    pub fn new(store: &Store) -> Self {
        Self {
            events: store.outbox.clone(),
            pending: store.outbox_pending.clone(),
        }
    }

    /// Append a pending event. Only call this inside the mutation's transaction.
    pub(crate) fn enqueue_in(
        events: &TransactionalTree,
        pending: &TransactionalTree,
        id: u64,
        topic: &str,
        payload: &str,
    ) -> Result<(), ConflictableTransactionError<StockError>> {
        let event = OutboxEvent {
            id,
            topic: topic.to_string(),
            payload: payload.to_string(),
            created_at: TimeStamp::new(),
            sent_at: None,
            attempt_count: 0,
            last_error: None,
            claimed_by: None,
            lease_expires_at: None,
        };
        encode_in(events, &event)?;
        pending.insert(event_key(id).to_vec(), Vec::<u8>::new())?;
        Ok(())
    }

    pub fn get(&self, id: u64) -> Result<Option<OutboxEvent>> {
        match self.events.get(event_key(id))? {
            Some(bytes) => Ok(Some(minicbor::decode(&bytes)?)),
            None => Ok(None),
        }
    }

    /// Pending events in ascending id order, leased or not
    pub fn pending(&self, limit: usize) -> Result<Vec<OutboxEvent>> {
        let mut events = Vec::new();
        for key in self.pending.iter().keys().take(limit) {
            let key = key?;
            if let Some(bytes) = self.events.get(&key)? {
                events.push(minicbor::decode(&bytes)?);
            }
        }
        Ok(events)
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    /// Claim up to `limit` pending events for `worker_id`, oldest first.
    ///
    /// Candidates are found with a plain scan, then re-read and stamped inside one
    /// transaction; a concurrent claimant touching the same events forces a retry, and
    /// the retry sees their leases. No two live leases ever cover the same event.
    pub fn claim_batch(
        &self,
        worker_id: &str,
        limit: usize,
        lease: Duration,
    ) -> Result<Vec<OutboxEvent>> {
        let mut candidates = Vec::with_capacity(limit);
        for key in self.pending.iter().keys() {
            if candidates.len() >= limit {
                break;
            }
            let key = key?;
            let Some(bytes) = self.events.get(&key)? else {
                continue;
            };
            let event: OutboxEvent = minicbor::decode(&bytes)?;
            if event.is_claimable() {
                candidates.push(event.id);
            }
        }
        if candidates.is_empty() {
            return Ok(Vec::new());
        }

        let claimed = self.events.transaction(|tx| {
            let expires = TimeStamp::after(lease);
            let mut claimed = Vec::with_capacity(candidates.len());
            for id in &candidates {
                let Some(mut event) = decode_in(tx, *id)? else {
                    continue;
                };
                if !event.is_claimable() {
                    continue;
                }
                event.claimed_by = Some(worker_id.to_string());
                event.lease_expires_at = Some(expires.clone());
                encode_in(tx, &event)?;
                claimed.push(event);
            }
            Ok(claimed)
        })?;

        Ok(claimed)
    }

    /// Record publish outcomes for events claimed by `worker_id`, all in one transaction.
    ///
    /// A successful publish is always recorded, even if the lease lapsed meanwhile.
    /// A failure is only recorded while the worker still holds the lease, so two
    /// workers never double count one attempt. Returns how many events changed.
    pub fn complete(&self, worker_id: &str, outcomes: &[(u64, Delivery)]) -> Result<usize> {
        let changed = (&self.events, &self.pending).transaction(|(events, pending)| {
            let mut changed: usize = 0;
            for (id, delivery) in outcomes {
                let Some(mut event) = decode_in(events, *id)? else {
                    continue;
                };
                if !event.is_pending() {
                    continue;
                }
                match delivery {
                    Delivery::Sent => {
                        event.sent_at = Some(TimeStamp::new());
                        event.release();
                        pending.remove(event_key(*id).to_vec())?;
                    }
                    Delivery::Failed(reason) => {
                        if event.claimed_by.as_deref() != Some(worker_id) {
                            continue;
                        }
                        event.attempt_count = event.attempt_count.saturating_add(1);
                        event.last_error = Some(reason.clone());
                        event.release();
                    }
                }
                encode_in(events, &event)?;
                changed += 1;
            }
            Ok(changed)
        })?;

        Ok(changed)
    }

    pub fn mark_sent(&self, worker_id: &str, id: u64) -> Result<bool> {
        Ok(self.complete(worker_id, &[(id, Delivery::Sent)])? == 1)
    }

    pub fn mark_failed(&self, worker_id: &str, id: u64, error: &str) -> Result<bool> {
        Ok(self.complete(worker_id, &[(id, Delivery::Failed(error.to_string()))])? == 1)
    }
}
