//! Smoke Screen Unit tests for the stock movement components
//!
//! These tests span the public API, exercising each component in isolation from
//! the integration scenarios. They are intended as a smoke-screen and mostly
//! test the happy-path.
//!

use chrono::Utc;
use std::time::Duration;
use stock_outbox::{
    ErrorKind, MoveRequest, MoveResponse, StockError,
    config::RelayConfig,
    idempotency::IdempotencyRecord,
    ledger::{BalanceFilter, StockBalance, StockMovedEvent},
    relay::Backoff,
    types::{Id, Quantity, TimeStamp},
    utils::{content_hash, scan_id, scan_quantity},
};

// TYPES MODULE TESTS
#[cfg(test)]
mod types_tests {
    use super::*;

    /// Test that ids print as lowercase hyphenated uuids and parse back
    #[test]
    fn id_display_parses_back() {
        let id = Id::new();
        let text = id.to_string();

        assert_eq!(text.len(), 36);
        assert_eq!(text, text.to_lowercase());
        assert_eq!(text.parse::<Id>().unwrap(), id);
    }

    /// Test that freshly generated ids are unique
    #[test]
    fn ids_are_unique() {
        let (a, b, c) = (Id::new(), Id::new(), Id::new());
        assert_ne!(a, b);
        assert_ne!(b, c);
    }

    /// Test that exact decimal parsing keeps the fractional part
    #[test]
    fn quantity_parses_exact_decimals() {
        let qty = Quantity::parse_exact("12.340").unwrap();

        assert!(qty.is_positive());
        assert_eq!(qty.canonical(), "12.34");
        assert_eq!(
            qty.checked_sub(Quantity::parse_exact("12.34").unwrap()),
            Some(Quantity::ZERO)
        );
    }

    /// Test that scientific notation is not accepted as an exact decimal
    #[test]
    fn quantity_rejects_scientific_notation() {
        assert!(Quantity::parse_exact("1e3").is_err());
    }

    /// Test that a lease timestamp in the future is not yet past
    #[test]
    fn timestamp_after_is_in_the_future() {
        let later = TimeStamp::after(Duration::from_secs(60));
        let now = TimeStamp::new();

        assert!(!later.is_past());
        assert!(later.to_datetime_utc() > now.to_datetime_utc());
    }

    /// Test that TimeStamp CBOR encoding/decoding keeps the instant
    #[test]
    fn timestamp_cbor_roundtrip() {
        let original = TimeStamp::new();

        let encoded = minicbor::to_vec(&original).unwrap();
        let decoded: TimeStamp<Utc> = minicbor::decode(&encoded).unwrap();

        assert_eq!(original, decoded);
    }
}

// UTILS MODULE TESTS
#[cfg(test)]
mod utils_tests {
    use super::*;

    /// Test that content hashes are hex sha256 digests
    #[test]
    fn content_hash_is_hex_sha256() {
        let hash = content_hash(&Id::new()).unwrap();

        assert_eq!(hash.len(), 64);
        assert!(hash.chars().all(|c| c.is_ascii_hexdigit()));
    }

    /// Test that ids are accepted regardless of case and padding
    #[test]
    fn scan_id_normalises_case_and_whitespace() {
        let id = Id::new();
        let shouty = format!("  {}  ", id.to_string().to_uppercase());

        assert_eq!(scan_id("item_id", &shouty).unwrap(), id);
    }

    /// Test that a zero quantity is a client error
    #[test]
    fn scan_quantity_zero_is_invalid() {
        let err = scan_quantity("0").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidRequest);
    }
}

// LEDGER MODULE TESTS
#[cfg(test)]
mod ledger_tests {
    use super::*;

    fn request() -> MoveRequest {
        MoveRequest::new(
            Id::new().to_string(),
            "5",
            Id::new().to_string(),
            Id::new().to_string(),
            "putaway",
        )
    }

    /// Test that a well formed request validates into parsed fields
    #[test]
    fn validate_parses_every_field() {
        let req = request();
        let valid = req.validate().unwrap();

        assert_eq!(valid.item_id.to_string(), req.item_id);
        assert_eq!(valid.quantity, Quantity::parse_exact("5").unwrap());
        assert_eq!(valid.reason_code, "putaway");
    }

    /// Test that the request hash ignores trailing zeros in the quantity
    #[test]
    fn request_hash_ignores_quantity_spelling() {
        let req = request();
        let mut padded = req.clone();
        padded.quantity = "5.000".to_string();

        assert_eq!(req.request_hash().unwrap(), padded.request_hash().unwrap());
    }

    /// Test that the request hash changes with the reason code
    #[test]
    fn request_hash_covers_reason_code() {
        let req = request();
        let mut other = req.clone();
        other.reason_code = "damage".to_string();

        assert_ne!(req.request_hash().unwrap(), other.request_hash().unwrap());
    }

    /// Test that the wire form accepts `qty` and defaults a missing reason code
    #[test]
    fn request_json_accepts_qty_alias() {
        let json = r#"{"item_id":"i","qty":"2","from_location_id":"a","to_location_id":"b"}"#;
        let req: MoveRequest = serde_json::from_str(json).unwrap();

        assert_eq!(req.quantity, "2");
        assert_eq!(req.reason_code, "");
    }

    /// Test the response and event json shapes
    #[test]
    fn response_and_event_json_shapes() {
        let move_id = Id::new();
        let response = serde_json::to_value(MoveResponse::ok(move_id)).unwrap();
        assert_eq!(response["status"], "ok");
        assert_eq!(response["move_id"], move_id.to_string());

        let event = StockMovedEvent {
            move_id: move_id.to_string(),
            item_id: "i".to_string(),
            qty: "5".to_string(),
        };
        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(value["qty"], "5");
    }

    /// Test that a fresh balance row is all zeros
    #[test]
    fn zero_balance() {
        let balance = StockBalance::zero(Id::new(), Id::new());
        assert_eq!(balance.quantity_on_hand, Quantity::ZERO);
        assert_eq!(balance.quantity_allocated, Quantity::ZERO);
    }

    /// Test that the balance filter builder sets its fields
    #[test]
    fn balance_filter_builder() {
        let (item, location) = (Id::new(), Id::new());
        let filter = BalanceFilter::for_item(item).at_location(location).page(10, 5);

        assert_eq!(filter.item_id, Some(item));
        assert_eq!(filter.location_id, Some(location));
        assert_eq!(filter.limit, Some(10));
        assert_eq!(filter.offset, 5);
    }
}

// IDEMPOTENCY MODULE TESTS
#[cfg(test)]
mod idempotency_tests {
    use super::*;

    fn record(hash: &str) -> IdempotencyRecord {
        IdempotencyRecord::new(
            "key-1".to_string(),
            "/api/stock/moves".to_string(),
            Id::new(),
            hash.to_string(),
            r#"{"move_id":"m","status":"ok"}"#.to_string(),
        )
    }

    /// Test that a matching hash replays the stored body verbatim
    #[test]
    fn replay_returns_stored_body() {
        let record = record("abc");
        assert_eq!(record.replay("abc").unwrap(), r#"{"move_id":"m","status":"ok"}"#);
    }

    /// Test that a different hash is a non-retryable conflict
    #[test]
    fn replay_with_other_hash_conflicts() {
        let err = record("abc").replay("def").unwrap_err();

        assert_eq!(err.kind(), ErrorKind::IdempotencyConflict);
        assert!(!err.is_retryable());
        assert!(err.to_string().contains("key-1"));
    }
}

// ERROR AND CONFIG TESTS
#[cfg(test)]
mod error_config_tests {
    use super::*;

    /// Test that storage timeouts are classed as transient
    #[test]
    fn timeout_is_transient() {
        let err = StockError::Timeout(Duration::from_secs(5));
        assert_eq!(err.kind(), ErrorKind::TransientStorageFailure);
        assert!(err.is_retryable());
    }

    /// Test the relay defaults
    #[test]
    fn relay_defaults() {
        let config = RelayConfig::default();

        assert_eq!(config.batch_size, 20);
        assert_eq!(config.backoff_floor, Duration::from_secs(1));
        assert_eq!(config.backoff_cap, Duration::from_secs(30));
        assert!(config.lease > config.publish_timeout);
    }

    /// Test that a backoff built from config starts at the floor
    #[test]
    fn backoff_starts_at_floor() {
        let config = RelayConfig::default();
        let mut backoff = Backoff::new(config.backoff_floor, config.backoff_cap);

        assert_eq!(backoff.fail(), Duration::from_secs(1));
        assert_eq!(backoff.current(), Duration::from_secs(2));
    }
}
