//! Event storage.
//!
//! Events are persisted in SQLite using an entity-attribute-value layout:
//! - `events` holds one header row per event (date, level, session)
//! - `event_attributes` holds one row per attribute, typed by storage kind
//! - `attribute_registry` maps interned attribute names to small ids
//!
//! The pieces are split along the data flow: [`schema`] owns the DDL and the
//! persisted registry, [`writer`] explodes one event into rows inside a
//! transaction, and [`query`] runs the two-phase read that puts events back
//! together. [`SqliteEventStore`] ties them to one connection.

pub mod query;
pub mod schema;
pub mod sqlite;
pub mod writer;

pub use schema::SchemaStore;
pub use sqlite::SqliteEventStore;

use crate::event::{Event, EventFields, EventId};
use crate::registry::ConflictError;
use crate::value::CodecError;
use thiserror::Error;

/// Event store errors.
#[derive(Debug, Error)]
pub enum EventStoreError {
    /// The incoming event payload is malformed. Raised before the store is touched.
    #[error("Decoding error: {0}")]
    Decoding(String),

    #[error("Registry conflict: {0}")]
    Conflict(#[from] ConflictError),

    /// The persisted registry is internally inconsistent.
    #[error("Persisted schema is corrupt: {0}")]
    SchemaConflict(ConflictError),

    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("Failed to encode attribute '{name}': {source}")]
    Encode {
        name: String,
        #[source]
        source: CodecError,
    },

    #[error("Failed to decode attribute of event {event_id}: {source}")]
    DecodeValue {
        event_id: EventId,
        #[source]
        source: CodecError,
    },

    #[error("Invalid data: {0}")]
    InvalidData(String),

    #[error("Lock poisoned: {0}")]
    LockPoisoned(String),
}

/// Trait for event storage backends.
pub trait EventStore: Send + Sync {
    /// Store an event, returning it as committed.
    fn store(&self, fields: EventFields) -> Result<Event, EventStoreError>;

    /// Flush any buffered data.
    fn flush(&self) -> Result<(), EventStoreError>;
}
