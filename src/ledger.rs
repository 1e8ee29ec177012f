//! Ledger moves, balances and the request/response shapes of a stock move
use super::error::Result;
use super::types::{Id, Quantity, TimeStamp};
use super::utils::{content_hash, scan_id, scan_quantity};
use chrono::Utc;
use serde::{Deserialize, Serialize};

pub const STOCK_MOVED_TOPIC: &str = "stock.moved";

/// Inbound move request, exactly as the client sent it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MoveRequest {
    pub item_id: String,
    #[serde(alias = "qty")]
    pub quantity: String,
    pub from_location_id: String,
    pub to_location_id: String,
    #[serde(default)]
    pub reason_code: String,
}

// the hashed form. whitespace and letter case in ids, and trailing zeros in the
// quantity, don't make two requests different.
#[derive(minicbor::Encode)]
struct CanonicalMoveRequest {
    #[n(0)]
    item_id: String,
    #[n(1)]
    quantity: String,
    #[n(2)]
    from_location_id: String,
    #[n(3)]
    to_location_id: String,
    #[n(4)]
    reason_code: String,
}

/// A request whose identifiers and quantity have been parsed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidatedMove {
    pub item_id: Id,
    pub quantity: Quantity,
    pub from_location_id: Id,
    pub to_location_id: Id,
    pub reason_code: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MoveResponse {
    pub move_id: String,
    pub status: String,
}

/// One append-only ledger entry. Corrections are new moves.
#[derive(Debug, Clone, PartialEq, Eq, minicbor::Encode, minicbor::Decode)]
pub struct StockLedgerMove {
    #[n(0)]
    pub move_id: Id,
    #[n(1)]
    pub item_id: Id,
    #[n(2)]
    pub quantity: Quantity,
    #[n(3)]
    pub from_location_id: Id,
    #[n(4)]
    pub to_location_id: Id,
    #[n(5)]
    pub reason_code: String,
    #[n(6)]
    pub actor_id: Id,
    #[n(7)]
    pub request_id: Option<String>,
    #[n(8)]
    pub created_at: TimeStamp<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, minicbor::Encode, minicbor::Decode)]
pub struct StockBalance {
    #[n(0)]
    pub item_id: Id,
    #[n(1)]
    pub location_id: Id,
    #[n(2)]
    pub quantity_on_hand: Quantity,
    #[n(3)]
    pub quantity_allocated: Quantity,
}

/// Payload published on `stock.moved`. Consumers dedupe on `move_id`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockMovedEvent {
    pub move_id: String,
    pub item_id: String,
    pub qty: String,
}

#[derive(Debug, Clone, Default)]
pub struct BalanceFilter {
    pub item_id: Option<Id>,
    pub location_id: Option<Id>,
    pub limit: Option<usize>,
    pub offset: usize,
}

impl MoveRequest {
    pub fn new(
        item_id: impl Into<String>,
        quantity: impl Into<String>,
        from_location_id: impl Into<String>,
        to_location_id: impl Into<String>,
        reason_code: impl Into<String>,
    ) -> Self {
        Self {
            item_id: item_id.into(),
            quantity: quantity.into(),
            from_location_id: from_location_id.into(),
            to_location_id: to_location_id.into(),
            reason_code: reason_code.into(),
        }
    }

    /// Deterministic hash of the normalized request. Works on invalid requests too,
    /// a conflicting key must be detected before validation runs.
    pub fn request_hash(&self) -> Result<String> {
        let normalize_id = |v: &str| v.trim().to_ascii_lowercase();
        let quantity = match Quantity::parse_exact(self.quantity.trim()) {
            Ok(qty) => qty.canonical(),
            Err(_) => self.quantity.trim().to_string(),
        };

        content_hash(&CanonicalMoveRequest {
            item_id: normalize_id(&self.item_id),
            quantity,
            from_location_id: normalize_id(&self.from_location_id),
            to_location_id: normalize_id(&self.to_location_id),
            reason_code: self.reason_code.trim().to_string(),
        })
    }

    pub fn validate(&self) -> Result<ValidatedMove> {
        Ok(ValidatedMove {
            item_id: scan_id("item_id", &self.item_id)?,
            quantity: scan_quantity(&self.quantity)?,
            from_location_id: scan_id("from_location_id", &self.from_location_id)?,
            to_location_id: scan_id("to_location_id", &self.to_location_id)?,
            reason_code: self.reason_code.trim().to_string(),
        })
    }
}

impl MoveResponse {
    pub fn ok(move_id: Id) -> Self {
        Self {
            move_id: move_id.to_string(),
            status: "ok".to_string(),
        }
    }
}

impl StockBalance {
    pub fn zero(item_id: Id, location_id: Id) -> Self {
        Self {
            item_id,
            location_id,
            quantity_on_hand: Quantity::ZERO,
            quantity_allocated: Quantity::ZERO,
        }
    }
}

impl BalanceFilter {
    pub fn for_item(item_id: Id) -> Self {
        Self {
            item_id: Some(item_id),
            ..Self::default()
        }
    }
    pub fn at_location(mut self, location_id: Id) -> Self {
        self.location_id = Some(location_id);
        self
    }
    pub fn page(mut self, limit: usize, offset: usize) -> Self {
        self.limit = Some(limit);
        self.offset = offset;
        self
    }
    pub(crate) fn matches(&self, balance: &StockBalance) -> bool {
        self.item_id.is_none_or(|id| id == balance.item_id)
            && self.location_id.is_none_or(|id| id == balance.location_id)
    }
}

// item id first so all locations of one item sit under a common prefix
pub(crate) fn balance_key(item_id: &Id, location_id: &Id) -> [u8; 32] {
    let mut key = [0u8; 32];
    key[..16].copy_from_slice(item_id.as_bytes());
    key[16..].copy_from_slice(location_id.as_bytes());
    key
}
