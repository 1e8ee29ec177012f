//! Service layer API for stock movements
use super::audit::{self, AuditRecord};
use super::error::{Result, StockError};
use super::idempotency::{IdempotencyRecord, IdempotencyStore};
use super::ledger::{
    BalanceFilter, MoveRequest, MoveResponse, STOCK_MOVED_TOPIC, StockBalance, StockLedgerMove,
    StockMovedEvent, ValidatedMove, balance_key,
};
use super::outbox::OutboxStore;
use super::store::Store;
use super::types::{Id, Quantity, TimeStamp};
use sled::Transactional;
use sled::transaction::{ConflictableTransactionError, TransactionalTree};

/// Endpoint name idempotency keys are scoped to for stock moves
pub const MOVE_ENDPOINT: &str = "/api/stock/moves";

pub struct StockService {
    store: Store,
    idempotency: IdempotencyStore,
    outbox: OutboxStore,
    #[cfg(test)]
    fail_after: Option<MoveStage>,
}

// points inside the move transaction, used to simulate a crash in tests
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum MoveStage {
    Ledger,
    Balances,
    Outbox,
}

enum Committed {
    Applied,
    // another request with the same key won the race inside the transaction
    AlreadyRecorded(IdempotencyRecord),
}

type TxResult<T> = std::result::Result<T, ConflictableTransactionError<StockError>>;

impl StockService {
    pub fn new(store: Store) -> Self {
        Self {
            idempotency: IdempotencyStore::new(store.idempotency.clone()),
            outbox: OutboxStore::new(&store),
            store,
            #[cfg(test)]
            fail_after: None,
        }
    }

    /// Apply one stock move exactly once per `(idempotency_key, endpoint)`.
    ///
    /// A retry with the same key and the same request returns the stored response
    /// without touching the ledger. The same key with a different request is an
    /// [`StockError::IdempotencyConflict`]. Otherwise the ledger row, both balance
    /// deltas, the `stock.moved` outbox event, an audit row and the idempotency
    /// record commit together or not at all, and are flushed to disk before the
    /// response is returned.
    pub fn move_stock(
        &self,
        request: &MoveRequest,
        actor_id: Id,
        endpoint: &str,
        idempotency_key: &str,
    ) -> Result<MoveResponse> {
        self.move_stock_with_request_id(request, actor_id, endpoint, idempotency_key, None)
    }

    /// Same as [`Self::move_stock`], tagging the ledger and audit rows with the
    /// caller's request id.
    pub fn move_stock_with_request_id(
        &self,
        request: &MoveRequest,
        actor_id: Id,
        endpoint: &str,
        idempotency_key: &str,
        request_id: Option<&str>,
    ) -> Result<MoveResponse> {
        if idempotency_key.trim().is_empty() {
            return Err(StockError::invalid("Idempotency-Key required"));
        }
        let request_hash = request.request_hash()?;

        if let Some(existing) = self.idempotency.lookup(idempotency_key, endpoint)? {
            return replay(&existing, &request_hash);
        }

        let validated = request.validate()?;
        let move_id = Id::new();
        let outbox_id = self.store.next_id()?;
        let audit_id = self.store.next_id()?;
        let request_id = request_id.map(str::to_string);

        let ledger_move = StockLedgerMove {
            move_id,
            item_id: validated.item_id,
            quantity: validated.quantity,
            from_location_id: validated.from_location_id,
            to_location_id: validated.to_location_id,
            reason_code: validated.reason_code.clone(),
            actor_id,
            request_id: request_id.clone(),
            created_at: TimeStamp::new(),
        };
        let ledger_cbor = minicbor::to_vec(&ledger_move)?;

        let payload = serde_json::to_string(&StockMovedEvent {
            move_id: move_id.to_string(),
            item_id: validated.item_id.to_string(),
            qty: validated.quantity.to_string(),
        })?;
        let response = MoveResponse::ok(move_id);
        let record = IdempotencyRecord::new(
            idempotency_key.to_string(),
            endpoint.to_string(),
            actor_id,
            request_hash.clone(),
            serde_json::to_string(&response)?,
        );
        let audit_record = AuditRecord::stock_move(actor_id, move_id, request_id, payload.clone());

        let store = &self.store;
        let committed = (
            &store.moves,
            &store.balances,
            &store.outbox,
            &store.outbox_pending,
            &store.audit,
            &store.idempotency,
        )
            .transaction(|(moves, balances, events, pending, audit_log, keys)| {
                if let Some(existing) =
                    IdempotencyStore::lookup_in(keys, idempotency_key, endpoint)?
                {
                    return Ok(Committed::AlreadyRecorded(existing));
                }

                moves.insert(move_id.as_bytes().to_vec(), ledger_cbor.clone())?;
                self.check_fault(MoveStage::Ledger)?;

                apply_move(balances, &validated)?;
                self.check_fault(MoveStage::Balances)?;

                OutboxStore::enqueue_in(events, pending, outbox_id, STOCK_MOVED_TOPIC, &payload)?;
                self.check_fault(MoveStage::Outbox)?;

                audit_record.append_in(audit_log, audit_id)?;
                IdempotencyStore::record_in(keys, &record)?;

                Ok(Committed::Applied)
            })?;

        match committed {
            Committed::Applied => {
                // the caller holds a move id from here on, so the commit must be on disk
                self.store.db.flush()?;
                tracing::info!(
                    move_id = %move_id,
                    item_id = %validated.item_id,
                    qty = %validated.quantity,
                    from = %validated.from_location_id,
                    to = %validated.to_location_id,
                    outbox_id,
                    "stock moved"
                );
                Ok(response)
            }
            Committed::AlreadyRecorded(existing) => replay(&existing, &request_hash),
        }
    }

    /// Balance of one item at one location, zero if nothing ever moved there
    pub fn balance(&self, item_id: Id, location_id: Id) -> Result<StockBalance> {
        match self.store.balances.get(balance_key(&item_id, &location_id))? {
            Some(bytes) => Ok(minicbor::decode(&bytes)?),
            None => Ok(StockBalance::zero(item_id, location_id)),
        }
    }

    /// Balances matching `filter`, ordered by item then location
    pub fn list_balances(&self, filter: &BalanceFilter) -> Result<Vec<StockBalance>> {
        let rows = match filter.item_id {
            Some(item_id) => self.store.balances.scan_prefix(item_id.as_bytes()),
            None => self.store.balances.iter(),
        };

        let mut balances = Vec::new();
        let mut skipped = 0;
        for row in rows.values() {
            if filter.limit.is_some_and(|limit| balances.len() >= limit) {
                break;
            }
            let balance: StockBalance = minicbor::decode(&row?)?;
            if !filter.matches(&balance) {
                continue;
            }
            if skipped < filter.offset {
                skipped += 1;
                continue;
            }
            balances.push(balance);
        }
        Ok(balances)
    }

    /// Sum of on-hand quantity for an item over every location
    pub fn total_on_hand(&self, item_id: Id) -> Result<Quantity> {
        self.list_balances(&BalanceFilter::for_item(item_id))?
            .iter()
            .try_fold(Quantity::ZERO, |sum, b| {
                sum.checked_add(b.quantity_on_hand)
                    .ok_or_else(|| StockError::Corrupt("on hand total overflows".into()))
            })
    }

    pub fn get_move(&self, move_id: Id) -> Result<Option<StockLedgerMove>> {
        match self.store.moves.get(move_id.as_bytes())? {
            Some(bytes) => Ok(Some(minicbor::decode(&bytes)?)),
            None => Ok(None),
        }
    }

    pub fn move_count(&self) -> usize {
        self.store.moves.len()
    }

    pub fn audit_log(&self) -> Result<Vec<AuditRecord>> {
        audit::list(&self.store.audit)
    }

    pub fn outbox(&self) -> &OutboxStore {
        &self.outbox
    }

    pub fn idempotency(&self) -> &IdempotencyStore {
        &self.idempotency
    }

    #[cfg(test)]
    fn check_fault(&self, stage: MoveStage) -> TxResult<()> {
        if self.fail_after == Some(stage) {
            return Err(ConflictableTransactionError::Abort(StockError::Storage(
                sled::Error::Unsupported(format!("simulated crash after {stage:?}")),
            )));
        }
        Ok(())
    }

    #[cfg(not(test))]
    #[inline(always)]
    fn check_fault(&self, _stage: MoveStage) -> TxResult<()> {
        Ok(())
    }
}

fn replay(existing: &IdempotencyRecord, request_hash: &str) -> Result<MoveResponse> {
    match existing.replay(request_hash) {
        Ok(body) => {
            tracing::debug!(
                key = %existing.idempotency_key,
                endpoint = %existing.endpoint,
                "replaying stored response"
            );
            Ok(serde_json::from_str(body)?)
        }
        Err(e) => {
            tracing::warn!(
                key = %existing.idempotency_key,
                endpoint = %existing.endpoint,
                "idempotency key reused for a different request"
            );
            Err(e)
        }
    }
}

// double entry: what leaves `from` arrives at `to`. balances may go negative,
// availability checks live above this layer.
fn apply_move(balances: &TransactionalTree, validated: &ValidatedMove) -> TxResult<()> {
    apply_delta(
        balances,
        validated.item_id,
        validated.from_location_id,
        validated.quantity,
        Quantity::checked_sub,
    )?;
    apply_delta(
        balances,
        validated.item_id,
        validated.to_location_id,
        validated.quantity,
        Quantity::checked_add,
    )
}

fn apply_delta(
    balances: &TransactionalTree,
    item_id: Id,
    location_id: Id,
    quantity: Quantity,
    op: fn(Quantity, Quantity) -> Option<Quantity>,
) -> TxResult<()> {
    let key = balance_key(&item_id, &location_id);
    let mut balance: StockBalance = match balances.get(key)? {
        Some(bytes) => minicbor::decode(&bytes)
            .map_err(|e| ConflictableTransactionError::Abort(StockError::from(e)))?,
        None => StockBalance::zero(item_id, location_id),
    };

    balance.quantity_on_hand = op(balance.quantity_on_hand, quantity).ok_or_else(|| {
        ConflictableTransactionError::Abort(StockError::invalid(format!(
            "balance of {item_id} at {location_id} would overflow"
        )))
    })?;

    let bytes = minicbor::to_vec(&balance)
        .map_err(|e| ConflictableTransactionError::Abort(StockError::from(e)))?;
    balances.insert(key.to_vec(), bytes)?;
    Ok(())
}
