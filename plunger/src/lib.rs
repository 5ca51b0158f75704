//! Plunger - a structured log sink backed by SQLite.
//!
//! Each log event is a timestamp, a level, an optional session, and a flat
//! mapping of named attributes. Events are stored as one header row plus one
//! typed row per attribute, so arbitrary attributes can be written without
//! schema changes and queried back by level, session, time range, attribute
//! name, and attribute value.
//!
//! # Architecture
//!
//! ```text
//!  tracing JSON lines ──► JsonLineSink ──┐
//!                                        ▼
//!  EventFields ──────────────────► SqliteEventStore ──► QueryFilter ──► Vec<Event>
//!                                   │         │
//!                          NameRegistry    SQLite (events, event_attributes,
//!                          (interned ids)          attribute_registry)
//! ```
//!
//! Attribute names that are promoted into the [`NameRegistry`] are stored by
//! small integer id; all other names are stored literally. Both forms are
//! resolved transparently on the read path.

pub mod config;
pub mod event;
pub mod event_store;
pub mod filter;
pub mod json_lines;
pub mod registry;
pub mod value;

pub use config::PlungerConfig;
pub use event::{Event, EventFields, EventId};
pub use event_store::{EventStore, EventStoreError, SqliteEventStore};
pub use filter::QueryFilter;
pub use json_lines::JsonLineSink;
pub use registry::{AttributeId, AttributeName, ConflictError, NameRegistry};
pub use value::{FieldValue, StorageKind};
