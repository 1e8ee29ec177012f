//! Identifier, quantity and timestamp primitives shared by every table
use chrono::{DateTime, TimeDelta, TimeZone, Utc};
use rust_decimal::Decimal;
use std::fmt;
use std::str::FromStr;
use uuid7::{Uuid, uuid7};

// newtype wrapper over uuid because Uuid doesn't implement minicbor traits.
// used for items, locations, actors and moves alike.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Id(Uuid);

/// Exact decimal quantity. Never a float.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default)]
pub struct Quantity(Decimal);

#[derive(Debug, PartialEq, Eq, PartialOrd, Ord, Clone)]
pub struct TimeStamp<T: TimeZone>(DateTime<T>);

impl Id {
    pub fn new() -> Self {
        Self(uuid7())
    }
    pub fn as_bytes(&self) -> &[u8; 16] {
        self.0.as_bytes()
    }
    pub fn from_bytes(bytes: [u8; 16]) -> Self {
        Self(Uuid::from(bytes))
    }
}

impl FromStr for Id {
    type Err = <Uuid as FromStr>::Err;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.parse::<Uuid>().map(Id)
    }
}

impl fmt::Display for Id {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}

impl Quantity {
    pub const ZERO: Quantity = Quantity(Decimal::ZERO);

    /// Parses without rounding. Inputs carrying more precision than a decimal can hold are rejected.
    pub fn parse_exact(s: &str) -> Result<Self, rust_decimal::Error> {
        Decimal::from_str_exact(s).map(Quantity)
    }
    pub fn is_positive(&self) -> bool {
        self.0 > Decimal::ZERO
    }
    pub fn checked_add(self, other: Quantity) -> Option<Quantity> {
        self.0.checked_add(other.0).map(Quantity)
    }
    pub fn checked_sub(self, other: Quantity) -> Option<Quantity> {
        self.0.checked_sub(other.0).map(Quantity)
    }
    /// Canonical textual form: trailing zeros stripped, so "5.00" and "5" agree.
    pub fn canonical(&self) -> String {
        self.0.normalize().to_string()
    }
    pub fn as_decimal(&self) -> Decimal {
        self.0
    }
}

impl From<Decimal> for Quantity {
    fn from(value: Decimal) -> Self {
        Quantity(value)
    }
}

impl fmt::Display for Quantity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}

impl TimeStamp<Utc> {
    pub fn new() -> Self {
        Self(Utc::now())
    }
    /// A timestamp `after` from now, saturating far in the future on overflow
    pub fn after(after: std::time::Duration) -> Self {
        let now = Utc::now();
        let delta = TimeDelta::from_std(after).unwrap_or(TimeDelta::days(365));
        Self(now.checked_add_signed(delta).unwrap_or(now))
    }
    pub fn to_datetime_utc(&self) -> DateTime<Utc> {
        self.0
    }
    pub fn is_past(&self) -> bool {
        self.0 <= Utc::now()
    }
}

impl<T: TimeZone> From<DateTime<T>> for TimeStamp<T> {
    fn from(value: DateTime<T>) -> Self {
        TimeStamp(value)
    }
}

impl<C> minicbor::Encode<C> for TimeStamp<Utc> {
    fn encode<W: minicbor::encode::Write>(
        &self,
        e: &mut minicbor::Encoder<W>,
        _: &mut C,
    ) -> Result<(), minicbor::encode::Error<W::Error>> {
        if let Some(nsec) = self.0.timestamp_nanos_opt() {
            return e.i64(nsec)?.ok();
        }

        Err(minicbor::encode::Error::message(
            "failed to encode timestamp. timestamp_nanos_opt returned None",
        ))
    }
}

impl<'b, C> minicbor::Decode<'b, C> for TimeStamp<Utc> {
    fn decode(d: &mut minicbor::Decoder<'b>, _: &mut C) -> Result<Self, minicbor::decode::Error> {
        let nsecs = d.i64()?;

        Ok(TimeStamp(DateTime::from_timestamp_nanos(nsecs)))
    }
}

impl<C> minicbor::Encode<C> for Id {
    fn encode<W: minicbor::encode::Write>(
        &self,
        e: &mut minicbor::Encoder<W>,
        _: &mut C,
    ) -> Result<(), minicbor::encode::Error<W::Error>> {
        e.bytes(self.0.as_bytes())?.ok()
    }
}

impl<'b, C> minicbor::Decode<'b, C> for Id {
    fn decode(d: &mut minicbor::Decoder<'b>, _: &mut C) -> Result<Self, minicbor::decode::Error> {
        let bytes: [u8; 16] = d
            .bytes()?
            .try_into()
            .map_err(|_| minicbor::decode::Error::message("expected 16 id bytes"))?;

        Ok(Id::from_bytes(bytes))
    }
}

// stored as text so the exact scale survives the round trip
impl<C> minicbor::Encode<C> for Quantity {
    fn encode<W: minicbor::encode::Write>(
        &self,
        e: &mut minicbor::Encoder<W>,
        _: &mut C,
    ) -> Result<(), minicbor::encode::Error<W::Error>> {
        e.str(&self.0.to_string())?.ok()
    }
}

impl<'b, C> minicbor::Decode<'b, C> for Quantity {
    fn decode(d: &mut minicbor::Decoder<'b>, _: &mut C) -> Result<Self, minicbor::decode::Error> {
        let text = d.str()?;

        Decimal::from_str(text)
            .map(Quantity)
            .map_err(|_| minicbor::decode::Error::message("invalid decimal quantity"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn id_encoding() {
        let original = Id::new();

        let encoding = minicbor::to_vec(original).unwrap();
        let decode: Id = minicbor::decode(&encoding).unwrap();

        assert_eq!(original, decode);
    }

    #[test]
    fn id_parses_its_display_form() {
        let original = Id::new();
        let parsed: Id = original.to_string().parse().unwrap();
        assert_eq!(original, parsed);
        assert!("not-a-uuid".parse::<Id>().is_err());
    }

    #[test]
    fn quantity_keeps_scale_through_cbor() {
        let original = Quantity::parse_exact("12.500").unwrap();

        let encoding = minicbor::to_vec(original).unwrap();
        let decode: Quantity = minicbor::decode(&encoding).unwrap();

        assert_eq!(decode.to_string(), "12.500");
        assert_eq!(decode.canonical(), "12.5");
    }

    #[test]
    fn quantity_rejects_precision_loss() {
        assert!(Quantity::parse_exact("0.00000000000000000000000000001").is_err());
        assert!(Quantity::parse_exact("1e3").is_err());
        assert!(Quantity::parse_exact("abc").is_err());
    }

    #[test]
    fn timestamp_encoding() {
        let original = TimeStamp::new();

        let encoding = minicbor::to_vec(original.clone()).unwrap();
        let decode: TimeStamp<Utc> = minicbor::decode(&encoding).unwrap();

        assert_eq!(original, decode);
    }

    #[test]
    fn lease_timestamps_expire() {
        assert!(TimeStamp::after(std::time::Duration::ZERO).is_past());
        assert!(!TimeStamp::after(std::time::Duration::from_secs(60)).is_past());
    }
}
