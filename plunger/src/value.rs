//! Attribute values and their column encoding.
//!
//! Every attribute value is one of four storage kinds. Each kind owns exactly
//! one of the typed columns of an attribute row:
//!
//! | Kind   | Column       | Payload                          |
//! |--------|--------------|----------------------------------|
//! | `Real` | `real_value` | any number, as a 64-bit float    |
//! | `Text` | `text_value` | the string, unmodified           |
//! | `Blob` | `blob_value` | the raw bytes, unmodified        |
//! | `Json` | `blob_value` | the value serialized as JSON     |

use rusqlite::types::{ToSql, ToSqlOutput};
use serde::{Deserialize, Serialize, Serializer};
use std::fmt;
use thiserror::Error;

/// Errors raised while encoding or decoding attribute columns.
#[derive(Debug, Error)]
pub enum CodecError {
    #[error("{kind} attribute has no {column}")]
    MissingColumn {
        kind: StorageKind,
        column: &'static str,
    },

    #[error("number {0} cannot be stored as a real value")]
    NonFiniteNumber(f64),

    #[error("unknown storage kind code {0}")]
    UnknownKind(i64),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Physical encoding of an attribute value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageKind {
    Real,
    Text,
    Blob,
    Json,
}

impl StorageKind {
    /// All kinds, in code order.
    pub const ALL: [Self; 4] = [Self::Real, Self::Text, Self::Blob, Self::Json];

    /// Numeric code stored in `event_attributes.storage_kind`.
    #[must_use]
    pub const fn code(self) -> i64 {
        match self {
            Self::Real => 0,
            Self::Text => 1,
            Self::Blob => 2,
            Self::Json => 3,
        }
    }

    /// Resolves a stored code.
    ///
    /// # Errors
    ///
    /// Returns [`CodecError::UnknownKind`] for codes outside the enumeration.
    pub fn from_code(code: i64) -> Result<Self, CodecError> {
        match code {
            0 => Ok(Self::Real),
            1 => Ok(Self::Text),
            2 => Ok(Self::Blob),
            3 => Ok(Self::Json),
            other => Err(CodecError::UnknownKind(other)),
        }
    }

    /// Symbolic name, as listed in the `storage_kinds` table.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Real => "real",
            Self::Text => "text",
            Self::Blob => "blob",
            Self::Json => "json",
        }
    }

    /// The attribute column holding values of this kind.
    #[must_use]
    pub const fn column(self) -> &'static str {
        match self {
            Self::Real => "real_value",
            Self::Text => "text_value",
            Self::Blob | Self::Json => "blob_value",
        }
    }
}

impl fmt::Display for StorageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl ToSql for StorageKind {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(ToSqlOutput::from(self.code()))
    }
}

/// A decoded event field.
///
/// Integers and floats are both carried as `Number`; anything that is not a
/// number, string or byte sequence (objects, arrays, booleans, null) is
/// `Structured`.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
    Number(f64),
    String(String),
    Bytes(Vec<u8>),
    Structured(serde_json::Value),
}

impl FieldValue {
    /// JSON view of the value. Integral numbers render without a fraction and
    /// bytes render as an array of octets.
    #[must_use]
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            Self::Number(n) => number_to_json(*n),
            Self::String(s) => serde_json::Value::String(s.clone()),
            Self::Bytes(bytes) => serde_json::Value::Array(
                bytes.iter().map(|&b| serde_json::Value::from(b)).collect(),
            ),
            Self::Structured(value) => value.clone(),
        }
    }
}

#[allow(clippy::cast_possible_truncation, clippy::cast_precision_loss)]
fn number_to_json(n: f64) -> serde_json::Value {
    const MAX_SAFE_INTEGER: f64 = 9_007_199_254_740_992.0;
    if n.fract() == 0.0 && n.abs() < MAX_SAFE_INTEGER {
        serde_json::Value::from(n as i64)
    } else {
        serde_json::Number::from_f64(n).map_or(serde_json::Value::Null, serde_json::Value::Number)
    }
}

impl Serialize for FieldValue {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        self.to_json().serialize(serializer)
    }
}

impl From<serde_json::Value> for FieldValue {
    fn from(value: serde_json::Value) -> Self {
        match value {
            serde_json::Value::Number(n) => match n.as_f64() {
                Some(f) => Self::Number(f),
                None => Self::Structured(serde_json::Value::Number(n)),
            },
            serde_json::Value::String(s) => Self::String(s),
            other => Self::Structured(other),
        }
    }
}

impl From<f64> for FieldValue {
    fn from(value: f64) -> Self {
        Self::Number(value)
    }
}

impl From<f32> for FieldValue {
    fn from(value: f32) -> Self {
        Self::Number(f64::from(value))
    }
}

impl From<i32> for FieldValue {
    fn from(value: i32) -> Self {
        Self::Number(f64::from(value))
    }
}

impl From<u32> for FieldValue {
    fn from(value: u32) -> Self {
        Self::Number(f64::from(value))
    }
}

impl From<i64> for FieldValue {
    #[allow(clippy::cast_precision_loss)]
    fn from(value: i64) -> Self {
        Self::Number(value as f64)
    }
}

impl From<u64> for FieldValue {
    #[allow(clippy::cast_precision_loss)]
    fn from(value: u64) -> Self {
        Self::Number(value as f64)
    }
}

impl From<&str> for FieldValue {
    fn from(value: &str) -> Self {
        Self::String(value.to_owned())
    }
}

impl From<String> for FieldValue {
    fn from(value: String) -> Self {
        Self::String(value)
    }
}

impl From<Vec<u8>> for FieldValue {
    fn from(value: Vec<u8>) -> Self {
        Self::Bytes(value)
    }
}

impl From<&[u8]> for FieldValue {
    fn from(value: &[u8]) -> Self {
        Self::Bytes(value.to_vec())
    }
}

/// Typed value columns of one attribute row.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Columns {
    pub real: Option<f64>,
    pub text: Option<String>,
    pub blob: Option<Vec<u8>>,
}

impl Columns {
    /// The populated column as a bindable SQL value, or NULL if none is set.
    #[must_use]
    pub fn into_sql(self) -> rusqlite::types::Value {
        self.real
            .map(rusqlite::types::Value::Real)
            .or_else(|| self.text.map(rusqlite::types::Value::Text))
            .or_else(|| self.blob.map(rusqlite::types::Value::Blob))
            .unwrap_or(rusqlite::types::Value::Null)
    }
}

/// Storage kind of a value.
#[must_use]
pub const fn classify(value: &FieldValue) -> StorageKind {
    match value {
        FieldValue::Number(_) => StorageKind::Real,
        FieldValue::String(_) => StorageKind::Text,
        FieldValue::Bytes(_) => StorageKind::Blob,
        FieldValue::Structured(_) => StorageKind::Json,
    }
}

/// Encodes a value into its storage kind and column payload.
///
/// # Errors
///
/// Returns [`CodecError::NonFiniteNumber`] for NaN and infinities, which
/// SQLite would otherwise turn into NULL.
pub fn encode(value: &FieldValue) -> Result<(StorageKind, Columns), CodecError> {
    let kind = classify(value);
    let columns = match value {
        FieldValue::Number(n) => {
            if !n.is_finite() {
                return Err(CodecError::NonFiniteNumber(*n));
            }
            Columns {
                real: Some(*n),
                ..Columns::default()
            }
        }
        FieldValue::String(s) => Columns {
            text: Some(s.clone()),
            ..Columns::default()
        },
        FieldValue::Bytes(bytes) => Columns {
            blob: Some(bytes.clone()),
            ..Columns::default()
        },
        FieldValue::Structured(v) => Columns {
            blob: Some(serde_json::to_vec(v)?),
            ..Columns::default()
        },
    };
    Ok((kind, columns))
}

/// Rebuilds a value from its storage kind and column payload.
///
/// # Errors
///
/// Returns [`CodecError::MissingColumn`] when the column owned by `kind` is
/// NULL, and [`CodecError::Json`] when a `Json` payload does not parse.
pub fn decode(kind: StorageKind, columns: Columns) -> Result<FieldValue, CodecError> {
    let missing = || CodecError::MissingColumn {
        kind,
        column: kind.column(),
    };
    match kind {
        StorageKind::Real => columns.real.map(FieldValue::Number).ok_or_else(missing),
        StorageKind::Text => columns.text.map(FieldValue::String).ok_or_else(missing),
        StorageKind::Blob => columns.blob.map(FieldValue::Bytes).ok_or_else(missing),
        StorageKind::Json => {
            let bytes = columns.blob.ok_or_else(missing)?;
            Ok(FieldValue::Structured(serde_json::from_slice(&bytes)?))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn roundtrip(value: &FieldValue) -> Result<FieldValue, CodecError> {
        let (kind, columns) = encode(value)?;
        decode(kind, columns)
    }

    #[test]
    fn test_classify_is_total() {
        assert_eq!(classify(&FieldValue::from(42)), StorageKind::Real);
        assert_eq!(classify(&FieldValue::from(0.5)), StorageKind::Real);
        assert_eq!(classify(&FieldValue::from("x")), StorageKind::Text);
        assert_eq!(classify(&FieldValue::from(vec![1u8, 2])), StorageKind::Blob);
        assert_eq!(classify(&FieldValue::from(json!({"a": 1}))), StorageKind::Json);
        assert_eq!(classify(&FieldValue::from(json!([1, 2]))), StorageKind::Json);
        assert_eq!(classify(&FieldValue::from(json!(true))), StorageKind::Json);
        assert_eq!(classify(&FieldValue::from(json!(null))), StorageKind::Json);
    }

    #[test]
    fn test_json_scalars_normalize() {
        assert_eq!(FieldValue::from(json!(42)), FieldValue::Number(42.0));
        assert_eq!(FieldValue::from(json!(-1.25)), FieldValue::Number(-1.25));
        assert_eq!(FieldValue::from(json!("s")), FieldValue::String("s".into()));
    }

    #[test]
    fn test_fractional_numbers_survive() -> Result<(), Box<dyn std::error::Error>> {
        let value = FieldValue::Number(3.141_592_653_589_793);
        assert_eq!(roundtrip(&value)?, value);

        let (_, columns) = encode(&FieldValue::Number(0.1))?;
        assert_eq!(columns.real, Some(0.1));
        assert!(columns.text.is_none() && columns.blob.is_none());
        Ok(())
    }

    #[test]
    fn test_nested_values_keep_order() -> Result<(), Box<dyn std::error::Error>> {
        let value = FieldValue::from(json!({"zeta": 1, "alpha": [3, 2, {"b": null, "a": true}]}));
        let decoded = roundtrip(&value)?;
        assert_eq!(decoded, value);

        let FieldValue::Structured(serde_json::Value::Object(map)) = decoded else {
            panic!("expected an object");
        };
        let keys: Vec<_> = map.keys().cloned().collect();
        assert_eq!(keys, vec!["zeta", "alpha"]);
        Ok(())
    }

    #[test]
    fn test_bytes_are_exact() -> Result<(), Box<dyn std::error::Error>> {
        let value = FieldValue::Bytes(vec![0, 159, 146, 150, 255]);
        assert_eq!(roundtrip(&value)?, value);
        Ok(())
    }

    #[test]
    fn test_non_finite_numbers_rejected() {
        assert!(matches!(
            encode(&FieldValue::Number(f64::NAN)),
            Err(CodecError::NonFiniteNumber(_))
        ));
        assert!(encode(&FieldValue::Number(f64::INFINITY)).is_err());
    }

    #[test]
    fn test_decode_missing_column_fails() {
        for kind in StorageKind::ALL {
            let Err(err) = decode(kind, Columns::default()) else {
                panic!("expected {kind} decode to fail");
            };
            assert!(matches!(err, CodecError::MissingColumn { .. }));
        }

        // A value in the wrong column is still missing.
        let columns = Columns {
            text: Some("42".into()),
            ..Columns::default()
        };
        assert!(decode(StorageKind::Real, columns).is_err());
    }

    #[test]
    fn test_kind_codes_roundtrip() -> Result<(), Box<dyn std::error::Error>> {
        for kind in StorageKind::ALL {
            assert_eq!(StorageKind::from_code(kind.code())?, kind);
        }
        assert!(matches!(
            StorageKind::from_code(9),
            Err(CodecError::UnknownKind(9))
        ));
        Ok(())
    }

    #[test]
    fn test_to_json_rendering() {
        assert_eq!(FieldValue::Number(42.0).to_json(), json!(42));
        assert_eq!(FieldValue::Number(1.5).to_json(), json!(1.5));
        assert_eq!(FieldValue::Bytes(vec![1, 2]).to_json(), json!([1, 2]));
    }
}
