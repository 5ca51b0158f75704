//! Log events, as handed to the writer and as reconstructed by queries.
//!
//! An incoming event is a flat mapping of field names to values. Two field
//! names are reserved: `level` (required) and `session` (optional). Every
//! other field becomes an attribute.

use crate::event_store::EventStoreError;
use crate::value::FieldValue;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Reserved field carrying the event severity.
pub const LEVEL_FIELD: &str = "level";

/// Reserved field carrying the session identifier.
pub const SESSION_FIELD: &str = "session";

/// Attribute mapping of one event.
pub type Attributes = BTreeMap<String, FieldValue>;

/// Store-assigned event identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EventId(i64);

impl EventId {
    #[must_use]
    pub const fn new(id: i64) -> Self {
        Self(id)
    }

    #[must_use]
    pub const fn get(self) -> i64 {
        self.0
    }
}

impl fmt::Display for EventId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A decoded event mapping, ready to be written.
///
/// # Example
///
/// ```rust
/// use plunger::EventFields;
/// use serde_json::json;
///
/// let fields = EventFields::new("INFO")
///     .with_session("abc")
///     .with_attribute("message", "hello world")
///     .with_attribute("elapsed_ms", 12.5)
///     .with_attribute("tags", json!(["a", "b"]));
/// assert_eq!(fields.attributes.len(), 3);
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct EventFields {
    pub level: String,
    pub session: Option<String>,
    pub attributes: Attributes,
}

impl EventFields {
    /// Creates an event with the given level and no attributes.
    #[must_use]
    pub fn new(level: &str) -> Self {
        Self {
            level: level.to_owned(),
            session: None,
            attributes: Attributes::new(),
        }
    }

    #[must_use]
    pub fn with_session(mut self, session: &str) -> Self {
        self.session = Some(session.to_owned());
        self
    }

    /// Adds or replaces an attribute.
    #[must_use]
    pub fn with_attribute(mut self, name: &str, value: impl Into<FieldValue>) -> Self {
        self.attributes.insert(name.to_owned(), value.into());
        self
    }

    /// Splits a decoded JSON object into reserved fields and attributes.
    ///
    /// # Errors
    ///
    /// Returns [`EventStoreError::Decoding`] if `level` is missing or not a
    /// string, or if `session` is neither a string nor null.
    pub fn from_map(mut map: serde_json::Map<String, serde_json::Value>) -> Result<Self, EventStoreError> {
        let level = match map.remove(LEVEL_FIELD) {
            Some(serde_json::Value::String(level)) => level,
            Some(other) => {
                return Err(EventStoreError::Decoding(format!(
                    "field '{LEVEL_FIELD}' must be a string, got {other}"
                )));
            }
            None => {
                return Err(EventStoreError::Decoding(format!(
                    "missing required field '{LEVEL_FIELD}'"
                )));
            }
        };

        let session = match map.remove(SESSION_FIELD) {
            Some(serde_json::Value::String(session)) => Some(session),
            Some(serde_json::Value::Null) | None => None,
            Some(other) => {
                return Err(EventStoreError::Decoding(format!(
                    "field '{SESSION_FIELD}' must be a string, got {other}"
                )));
            }
        };

        let attributes = map
            .into_iter()
            .map(|(name, value)| (name, FieldValue::from(value)))
            .collect();

        Ok(Self {
            level,
            session,
            attributes,
        })
    }

    /// Decodes one serialized JSON object.
    ///
    /// # Errors
    ///
    /// Returns [`EventStoreError::Decoding`] if the payload is not a JSON
    /// object or violates the rules of [`from_map`](Self::from_map).
    pub fn from_json(payload: &[u8]) -> Result<Self, EventStoreError> {
        let value: serde_json::Value = serde_json::from_slice(payload)
            .map_err(|e| EventStoreError::Decoding(format!("malformed event payload: {e}")))?;
        match value {
            serde_json::Value::Object(map) => Self::from_map(map),
            other => Err(EventStoreError::Decoding(format!(
                "event payload must be a JSON object, got {other}"
            ))),
        }
    }
}

/// A persisted event.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Event {
    pub id: EventId,
    pub timestamp: DateTime<Utc>,
    pub level: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session: Option<String>,
    pub attributes: Attributes,
}

impl Event {
    #[must_use]
    pub fn attribute(&self, name: &str) -> Option<&FieldValue> {
        self.attributes.get(name)
    }
}
