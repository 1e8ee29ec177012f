//! Utility functions for hashing and scanning untrusted input

use super::error::{Result, StockError};
use super::types::{Id, Quantity};

// encode into cbor with indexed fields then hash. the field order is fixed by the
// struct definition, never by whatever order the client sent.
pub fn content_hash<T: minicbor::Encode<()>>(value: &T) -> Result<String> {
    let cbor = minicbor::to_vec(value)?;
    Ok(sha256::digest(&cbor))
}

/// Parse a caller supplied identifier, naming the field on failure
pub fn scan_id(field: &str, value: &str) -> Result<Id> {
    value
        .trim()
        .to_ascii_lowercase()
        .parse::<Id>()
        .map_err(|_| StockError::invalid(format!("{field} is not a valid id: {value:?}")))
}

/// Parse a strictly positive exact decimal
pub fn scan_quantity(value: &str) -> Result<Quantity> {
    let qty = Quantity::parse_exact(value.trim())
        .map_err(|_| StockError::invalid(format!("quantity is not an exact decimal: {value:?}")))?;
    if !qty.is_positive() {
        return Err(StockError::invalid(format!(
            "quantity must be greater than zero: {value:?}"
        )));
    }
    Ok(qty)
}
