//! Durable tables backing the stock engine and the outbox relay
use super::error::Result;
use std::path::Path;
use std::sync::Arc;

pub const MOVES_TREE: &str = "stock_ledger_moves";
pub const BALANCES_TREE: &str = "stock_balances";
pub const OUTBOX_TREE: &str = "outbox_events";
// ids of events whose sent_at is still null
pub const OUTBOX_PENDING_TREE: &str = "outbox_pending";
pub const IDEMPOTENCY_TREE: &str = "idempotency_keys";
pub const AUDIT_TREE: &str = "audit_log";

/// Handles to every tree. Cloning is cheap, sled trees are reference counted.
#[derive(Clone)]
pub struct Store {
    pub(crate) db: Arc<sled::Db>,
    pub(crate) moves: sled::Tree,
    pub(crate) balances: sled::Tree,
    pub(crate) outbox: sled::Tree,
    pub(crate) outbox_pending: sled::Tree,
    pub(crate) idempotency: sled::Tree,
    pub(crate) audit: sled::Tree,
}

impl Store {
    pub fn new(db: Arc<sled::Db>) -> Result<Self> {
        Ok(Self {
            moves: db.open_tree(MOVES_TREE)?,
            balances: db.open_tree(BALANCES_TREE)?,
            outbox: db.open_tree(OUTBOX_TREE)?,
            outbox_pending: db.open_tree(OUTBOX_PENDING_TREE)?,
            idempotency: db.open_tree(IDEMPOTENCY_TREE)?,
            audit: db.open_tree(AUDIT_TREE)?,
            db,
        })
    }

    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let db = sled::open(path)?;
        Self::new(Arc::new(db))
    }

    /// Monotonic id, unique for the lifetime of the database
    pub fn next_id(&self) -> Result<u64> {
        Ok(self.db.generate_id()?)
    }

    pub async fn flush(&self) -> Result<()> {
        self.db.flush_async().await?;
        Ok(())
    }

    pub fn db(&self) -> &Arc<sled::Db> {
        &self.db
    }
}
