//! Idempotent stock movements with a transactional outbox.
//!
//! - [`service::StockService`] applies a stock move as one sled transaction: ledger
//!   row, both balance deltas, the `stock.moved` outbox event, an audit row and the
//!   idempotency record.
//! - [`relay::RelayWorker`] drains the outbox to a [`broker::Broker`] with
//!   at-least-once delivery.

pub mod audit;
pub mod broker;
pub mod config;
pub mod error;
pub mod idempotency;
pub mod ledger;
pub mod logger;
pub mod outbox;
pub mod relay;
pub mod service;
pub mod store;
pub mod types;
pub mod utils;

pub use error::{ErrorKind, PublishError, StockError};
pub use ledger::{MoveRequest, MoveResponse};
pub use service::{MOVE_ENDPOINT, StockService};
pub use store::Store;
