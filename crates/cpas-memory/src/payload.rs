//! Payload encoding at the store boundary.
//!
//! Event details, state values, and knowledge content are arbitrary
//! structured data: null, booleans, numbers, strings, sequences, and
//! string-keyed mappings. In memory that is a [`Payload`]; on disk it is
//! JSON text. Nothing outside this module knows which text encoding is used.

use serde::de::DeserializeOwned;
use serde::ser::{self, Serialize};
use tracing::warn;

use crate::error::{StoreError, StoreResult};

/// Structured payload value (tagged variant over the JSON data model).
///
/// Mappings keep insertion order only when the `preserve_order` feature of
/// `serde_json` is enabled; equality is structural either way.
pub type Payload = serde_json::Value;

/// A payload as read back from a row.
///
/// One corrupt row must never hide the others, so a batch read keeps the
/// raw text of an undecodable payload instead of failing.
#[derive(Debug, Clone, PartialEq)]
pub enum StoredPayload {
    /// The payload decoded cleanly.
    Decoded(Payload),
    /// The stored text is not valid for the payload encoding.
    Undecodable {
        /// Raw column contents.
        raw: String,
        /// Decoder error message.
        reason: String,
    },
}

impl StoredPayload {
    /// The decoded value, or `None` for an undecodable payload.
    pub fn value(&self) -> Option<&Payload> {
        match self {
            Self::Decoded(value) => Some(value),
            Self::Undecodable { .. } => None,
        }
    }

    pub fn is_undecodable(&self) -> bool {
        matches!(self, Self::Undecodable { .. })
    }
}

/// Convert any serializable value into a [`Payload`].
///
/// NaN and infinite floats have no JSON form. `serde_json` would silently
/// write them as `null`, so they are rejected here instead.
pub fn to_payload<T>(value: &T) -> StoreResult<Payload>
where
    T: Serialize + ?Sized,
{
    value
        .serialize(FiniteFloats)
        .map_err(StoreError::Serialization)?;
    serde_json::to_value(value).map_err(StoreError::Serialization)
}

/// Encode a payload to its stored text form.
pub fn encode(payload: &Payload) -> StoreResult<String> {
    serde_json::to_string(payload).map_err(StoreError::Serialization)
}

/// Serialize a value straight to stored text.
pub fn encode_value<T>(value: &T) -> StoreResult<String>
where
    T: Serialize + ?Sized,
{
    encode(&to_payload(value)?)
}

/// Decode stored text, attributing failures to `context`.
pub fn decode(raw: &str, context: impl Into<String>) -> StoreResult<Payload> {
    serde_json::from_str(raw).map_err(|source| StoreError::Deserialization {
        context: context.into(),
        source,
    })
}

/// Decode stored text directly into a typed value.
pub fn decode_as<T>(raw: &str, context: impl Into<String>) -> StoreResult<T>
where
    T: DeserializeOwned,
{
    serde_json::from_str(raw).map_err(|source| StoreError::Deserialization {
        context: context.into(),
        source,
    })
}

/// Decode for batch reads: failures become [`StoredPayload::Undecodable`].
pub fn decode_lenient(raw: String, context: &str) -> StoredPayload {
    match serde_json::from_str(&raw) {
        Ok(value) => StoredPayload::Decoded(value),
        Err(err) => {
            warn!(context, error = %err, "undecodable payload");
            StoredPayload::Undecodable {
                raw,
                reason: err.to_string(),
            }
        }
    }
}

// ── non-finite float check ───────────────────────────────────────

/// Walks a value through serde and fails on the first NaN or infinity.
/// Everything else is accepted; key and shape errors are left to `serde_json`.
struct FiniteFloats;

type CheckResult = Result<(), serde_json::Error>;

fn check_float(value: f64) -> CheckResult {
    if value.is_finite() {
        Ok(())
    } else {
        Err(ser::Error::custom(format!(
            "{value} cannot be stored: payload floats must be finite"
        )))
    }
}

macro_rules! accept_scalars {
    ($($method:ident($ty:ty)),* $(,)?) => {
        $(fn $method(self, _: $ty) -> CheckResult {
            Ok(())
        })*
    };
}

impl ser::Serializer for FiniteFloats {
    type Ok = ();
    type Error = serde_json::Error;
    type SerializeSeq = Self;
    type SerializeTuple = Self;
    type SerializeTupleStruct = Self;
    type SerializeTupleVariant = Self;
    type SerializeMap = Self;
    type SerializeStruct = Self;
    type SerializeStructVariant = Self;

    accept_scalars! {
        serialize_bool(bool),
        serialize_i8(i8),
        serialize_i16(i16),
        serialize_i32(i32),
        serialize_i64(i64),
        serialize_i128(i128),
        serialize_u8(u8),
        serialize_u16(u16),
        serialize_u32(u32),
        serialize_u64(u64),
        serialize_u128(u128),
        serialize_char(char),
        serialize_str(&str),
        serialize_bytes(&[u8]),
        serialize_unit_struct(&'static str),
    }

    fn serialize_f32(self, v: f32) -> CheckResult {
        check_float(f64::from(v))
    }

    fn serialize_f64(self, v: f64) -> CheckResult {
        check_float(v)
    }

    fn serialize_none(self) -> CheckResult {
        Ok(())
    }

    fn serialize_some<T: ?Sized + Serialize>(self, value: &T) -> CheckResult {
        value.serialize(self)
    }

    fn serialize_unit(self) -> CheckResult {
        Ok(())
    }

    fn serialize_unit_variant(self, _: &'static str, _: u32, _: &'static str) -> CheckResult {
        Ok(())
    }

    fn serialize_newtype_struct<T: ?Sized + Serialize>(
        self,
        _: &'static str,
        value: &T,
    ) -> CheckResult {
        value.serialize(self)
    }

    fn serialize_newtype_variant<T: ?Sized + Serialize>(
        self,
        _: &'static str,
        _: u32,
        _: &'static str,
        value: &T,
    ) -> CheckResult {
        value.serialize(self)
    }

    fn serialize_seq(self, _: Option<usize>) -> Result<Self, serde_json::Error> {
        Ok(self)
    }

    fn serialize_tuple(self, _: usize) -> Result<Self, serde_json::Error> {
        Ok(self)
    }

    fn serialize_tuple_struct(
        self,
        _: &'static str,
        _: usize,
    ) -> Result<Self, serde_json::Error> {
        Ok(self)
    }

    fn serialize_tuple_variant(
        self,
        _: &'static str,
        _: u32,
        _: &'static str,
        _: usize,
    ) -> Result<Self, serde_json::Error> {
        Ok(self)
    }

    fn serialize_map(self, _: Option<usize>) -> Result<Self, serde_json::Error> {
        Ok(self)
    }

    fn serialize_struct(self, _: &'static str, _: usize) -> Result<Self, serde_json::Error> {
        Ok(self)
    }

    fn serialize_struct_variant(
        self,
        _: &'static str,
        _: u32,
        _: &'static str,
        _: usize,
    ) -> Result<Self, serde_json::Error> {
        Ok(self)
    }
}

impl ser::SerializeSeq for FiniteFloats {
    type Ok = ();
    type Error = serde_json::Error;

    fn serialize_element<T: ?Sized + Serialize>(&mut self, value: &T) -> CheckResult {
        value.serialize(FiniteFloats)
    }

    fn end(self) -> CheckResult {
        Ok(())
    }
}

impl ser::SerializeTuple for FiniteFloats {
    type Ok = ();
    type Error = serde_json::Error;

    fn serialize_element<T: ?Sized + Serialize>(&mut self, value: &T) -> CheckResult {
        value.serialize(FiniteFloats)
    }

    fn end(self) -> CheckResult {
        Ok(())
    }
}

impl ser::SerializeTupleStruct for FiniteFloats {
    type Ok = ();
    type Error = serde_json::Error;

    fn serialize_field<T: ?Sized + Serialize>(&mut self, value: &T) -> CheckResult {
        value.serialize(FiniteFloats)
    }

    fn end(self) -> CheckResult {
        Ok(())
    }
}

impl ser::SerializeTupleVariant for FiniteFloats {
    type Ok = ();
    type Error = serde_json::Error;

    fn serialize_field<T: ?Sized + Serialize>(&mut self, value: &T) -> CheckResult {
        value.serialize(FiniteFloats)
    }

    fn end(self) -> CheckResult {
        Ok(())
    }
}

impl ser::SerializeMap for FiniteFloats {
    type Ok = ();
    type Error = serde_json::Error;

    fn serialize_key<T: ?Sized + Serialize>(&mut self, key: &T) -> CheckResult {
        key.serialize(FiniteFloats)
    }

    fn serialize_value<T: ?Sized + Serialize>(&mut self, value: &T) -> CheckResult {
        value.serialize(FiniteFloats)
    }

    fn end(self) -> CheckResult {
        Ok(())
    }
}

impl ser::SerializeStruct for FiniteFloats {
    type Ok = ();
    type Error = serde_json::Error;

    fn serialize_field<T: ?Sized + Serialize>(
        &mut self,
        _: &'static str,
        value: &T,
    ) -> CheckResult {
        value.serialize(FiniteFloats)
    }

    fn end(self) -> CheckResult {
        Ok(())
    }
}

impl ser::SerializeStructVariant for FiniteFloats {
    type Ok = ();
    type Error = serde_json::Error;

    fn serialize_field<T: ?Sized + Serialize>(
        &mut self,
        _: &'static str,
        value: &T,
    ) -> CheckResult {
        value.serialize(FiniteFloats)
    }

    fn end(self) -> CheckResult {
        Ok(())
    }
}

// ── tests ────────────────────────────────────────────────────────────
