//! Persisted layout and registry persistence.
//!
//! `init` is idempotent and safe to run against an existing database. The
//! registry is saved with overwrite semantics: the last write for an id wins.
//! Saving does not detect a registry that diverged from what another writer
//! persisted, so writers sharing one database must reload after each other's
//! saves.

use super::EventStoreError;
use crate::registry::{AttributeId, NameRegistry};
use crate::value::StorageKind;
use rusqlite::{Connection, params};
use tracing::debug;

const SCHEMA: &str = r"
CREATE TABLE IF NOT EXISTS events (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    date INTEGER NOT NULL,
    level TEXT NOT NULL,
    session TEXT
);

CREATE INDEX IF NOT EXISTS idx_events_date ON events(date);
CREATE INDEX IF NOT EXISTS idx_events_level ON events(level);
CREATE INDEX IF NOT EXISTS idx_events_session ON events(session);

CREATE TABLE IF NOT EXISTS storage_kinds (
    code INTEGER PRIMARY KEY NOT NULL,
    name TEXT NOT NULL UNIQUE
);

CREATE TABLE IF NOT EXISTS attribute_registry (
    id INTEGER PRIMARY KEY NOT NULL,
    name TEXT NOT NULL UNIQUE
);

CREATE TABLE IF NOT EXISTS event_attributes (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    event_id INTEGER NOT NULL REFERENCES events(id),
    storage_kind INTEGER NOT NULL REFERENCES storage_kinds(code),
    name TEXT,
    name_id INTEGER REFERENCES attribute_registry(id),
    real_value REAL,
    text_value TEXT,
    blob_value BLOB,
    CHECK ((name IS NULL) <> (name_id IS NULL))
);

CREATE INDEX IF NOT EXISTS idx_event_attributes_event_id ON event_attributes(event_id);
CREATE INDEX IF NOT EXISTS idx_event_attributes_storage_kind ON event_attributes(storage_kind);
CREATE INDEX IF NOT EXISTS idx_event_attributes_name ON event_attributes(name);
CREATE INDEX IF NOT EXISTS idx_event_attributes_name_id ON event_attributes(name_id);
";

/// Schema management for the event store.
pub struct SchemaStore;

impl SchemaStore {
    /// Create tables and indices if missing, and seed the storage kind table.
    ///
    /// # Errors
    ///
    /// Returns an error if any DDL statement fails.
    pub fn init(conn: &Connection) -> Result<(), EventStoreError> {
        conn.execute_batch(SCHEMA)?;

        let mut stmt = conn.prepare(
            "INSERT INTO storage_kinds (code, name) VALUES (?1, ?2) ON CONFLICT (code) DO NOTHING",
        )?;
        for kind in StorageKind::ALL {
            stmt.execute(params![kind.code(), kind.as_str()])?;
        }

        debug!("Event store schema initialized");
        Ok(())
    }

    /// Upsert every registry entry and mark them saved. Returns the number of
    /// entries written.
    ///
    /// # Errors
    ///
    /// Returns an error if the transaction fails; nothing is written or
    /// marked then.
    pub fn save(
        conn: &mut Connection,
        registry: &mut NameRegistry,
    ) -> Result<usize, EventStoreError> {
        let tx = conn.transaction()?;
        {
            let mut stmt = tx.prepare_cached(
                "INSERT OR REPLACE INTO attribute_registry (id, name) VALUES (?1, ?2)",
            )?;
            for entry in registry.iter() {
                stmt.execute(params![entry.id.get(), entry.name])?;
            }
        }
        tx.commit()?;
        registry.mark_persisted();

        debug!("Saved {} attribute name(s) to the registry", registry.len());
        Ok(registry.len())
    }

    /// Build a fresh registry from the persisted entries.
    ///
    /// # Errors
    ///
    /// Returns [`EventStoreError::SchemaConflict`] if two persisted rows bind
    /// the same id or the same name differently, or a row carries an id
    /// `intern` could not have allocated.
    pub fn load(conn: &Connection) -> Result<NameRegistry, EventStoreError> {
        let mut registry = NameRegistry::new();
        let mut stmt = conn.prepare("SELECT id, name FROM attribute_registry ORDER BY id")?;
        let rows = stmt.query_map([], |row| {
            Ok((row.get::<_, i64>(0)?, row.get::<_, String>(1)?))
        })?;

        for row in rows {
            let (id, name) = row?;
            registry
                .restore(&name, AttributeId::new(id))
                .map_err(EventStoreError::SchemaConflict)?;
        }
        registry.mark_persisted();

        debug!("Loaded {} attribute name(s) from the registry", registry.len());
        Ok(registry)
    }
}
