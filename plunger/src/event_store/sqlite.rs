//! SQLite-backed structured log sink.
//!
//! Owns one connection and the in-memory name registry, and routes writes
//! and queries through [`writer`](super::writer) and [`query`](super::query).

use super::query::run_query;
use super::writer::write_event;
use super::{EventStore, EventStoreError, SchemaStore};
use crate::event::{Event, EventFields};
use crate::filter::QueryFilter;
use crate::registry::{AttributeId, AttributeName, NameRegistry};
use chrono::{DateTime, Utc};
use rusqlite::Connection;
use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use tracing::{debug, info};

struct Inner {
    conn: Connection,
    registry: NameRegistry,
}

/// SQLite event store.
///
/// The registry is owned by the store: names promoted through
/// [`register`](Self::register) are stored by id on subsequent writes, all
/// other names are stored literally. One store per database file is the
/// supported model; a second writer must [`reload_schema`](Self::reload_schema)
/// after the first saves.
pub struct SqliteEventStore {
    inner: Mutex<Inner>,
}

impl SqliteEventStore {
    /// Open (or create) a store at `db_path`.
    ///
    /// # Errors
    ///
    /// Returns an error if the database cannot be opened or initialized, or
    /// if the persisted registry is inconsistent.
    pub fn open<P: AsRef<Path>>(db_path: P) -> Result<Self, EventStoreError> {
        let db_path = db_path.as_ref();
        let store = Self::from_connection(Connection::open(db_path)?)?;
        info!("Opened event store at {}", db_path.display());
        Ok(store)
    }

    /// Create an in-memory store (for testing).
    ///
    /// # Errors
    ///
    /// Returns an error if the database cannot be initialized.
    pub fn in_memory() -> Result<Self, EventStoreError> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    /// Wrap an already opened connection.
    ///
    /// # Errors
    ///
    /// Returns an error if the schema cannot be created or the persisted
    /// registry cannot be loaded.
    pub fn from_connection(conn: Connection) -> Result<Self, EventStoreError> {
        SchemaStore::init(&conn)?;
        let registry = SchemaStore::load(&conn)?;
        Ok(Self {
            inner: Mutex::new(Inner { conn, registry }),
        })
    }

    /// Open a store and promote `names` into its registry.
    ///
    /// Names already persisted keep their ids; new names get the next free
    /// ids and are saved before this returns.
    ///
    /// # Errors
    ///
    /// Returns an error if opening fails or the registry cannot be saved.
    pub fn open_with_schema<P, I, S>(db_path: P, names: I) -> Result<Self, EventStoreError>
    where
        P: AsRef<Path>,
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let store = Self::open(db_path)?;
        store.register(names)?;
        Ok(store)
    }

    fn lock(&self) -> Result<MutexGuard<'_, Inner>, EventStoreError> {
        self.inner
            .lock()
            .map_err(|e| EventStoreError::LockPoisoned(format!("store lock: {e}")))
    }

    /// Write one event stamped with the current time.
    ///
    /// # Errors
    ///
    /// Returns an error if an attribute cannot be encoded or the transaction
    /// fails. Nothing is persisted in that case.
    pub fn write(&self, fields: EventFields) -> Result<Event, EventStoreError> {
        self.write_at(fields, Utc::now())
    }

    /// Write one event with an explicit timestamp.
    ///
    /// # Errors
    ///
    /// See [`write`](Self::write).
    pub fn write_at(
        &self,
        fields: EventFields,
        timestamp: DateTime<Utc>,
    ) -> Result<Event, EventStoreError> {
        let mut guard = self.lock()?;
        let Inner { conn, registry } = &mut *guard;
        write_event(conn, registry, fields, timestamp)
    }

    /// Decode one JSON object and write it.
    ///
    /// # Errors
    ///
    /// Returns [`EventStoreError::Decoding`] if `payload` is not a valid event
    /// object. The store is not touched then.
    pub fn write_json(&self, payload: &[u8]) -> Result<Event, EventStoreError> {
        let fields = EventFields::from_json(payload)?;
        self.write(fields)
    }

    /// Return every event matching `filter`, in ascending id order.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails or a stored attribute cannot be
    /// decoded.
    pub fn query(&self, filter: &QueryFilter) -> Result<Vec<Event>, EventStoreError> {
        let guard = self.lock()?;
        run_query(&guard.conn, &guard.registry, filter)
    }

    /// Intern `name` in memory only. Use [`save_schema`](Self::save_schema)
    /// to persist it.
    ///
    /// # Errors
    ///
    /// Returns an error if the lock is poisoned.
    pub fn intern(&self, name: &str) -> Result<AttributeName, EventStoreError> {
        let mut guard = self.lock()?;
        Ok(guard.registry.intern(name).clone())
    }

    /// Interns `name` under a caller-chosen id, in memory only.
    ///
    /// # Errors
    ///
    /// Returns [`EventStoreError::Conflict`] if the name or id is already
    /// bound differently or the id is out of range.
    pub fn intern_with_id(
        &self,
        name: &str,
        id: AttributeId,
    ) -> Result<AttributeName, EventStoreError> {
        let mut guard = self.lock()?;
        Ok(guard.registry.intern_with_id(name, id)?.clone())
    }

    /// Intern every name and persist the registry.
    ///
    /// # Errors
    ///
    /// Returns an error if the registry cannot be saved.
    pub fn register<I, S>(&self, names: I) -> Result<Vec<AttributeName>, EventStoreError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut guard = self.lock()?;
        let Inner { conn, registry } = &mut *guard;

        let registered: Vec<AttributeName> = names
            .into_iter()
            .map(|name| registry.intern(name.as_ref()).clone())
            .collect();
        SchemaStore::save(conn, registry)?;

        debug!("Registered {} attribute name(s)", registered.len());
        Ok(registered)
    }

    /// Persist the in-memory registry. Returns the number of entries written.
    ///
    /// # Errors
    ///
    /// Returns an error if the save transaction fails.
    pub fn save_schema(&self) -> Result<usize, EventStoreError> {
        let mut guard = self.lock()?;
        let Inner { conn, registry } = &mut *guard;
        SchemaStore::save(conn, registry)
    }

    /// Replace the in-memory registry with the persisted one.
    ///
    /// Names interned but never saved are discarded.
    ///
    /// # Errors
    ///
    /// Returns [`EventStoreError::SchemaConflict`] if the persisted registry
    /// is inconsistent. The in-memory registry is left unchanged then.
    pub fn reload_schema(&self) -> Result<(), EventStoreError> {
        let mut guard = self.lock()?;
        guard.registry = SchemaStore::load(&guard.conn)?;
        Ok(())
    }

    /// Snapshot of the registry, ordered by id.
    ///
    /// # Errors
    ///
    /// Returns an error if the lock is poisoned.
    pub fn attribute_names(&self) -> Result<Vec<AttributeName>, EventStoreError> {
        let guard = self.lock()?;
        let mut names: Vec<AttributeName> = guard.registry.iter().cloned().collect();
        names.sort_by_key(|entry| entry.id);
        Ok(names)
    }

    /// Get the count of events in the store.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub fn count(&self) -> Result<u64, EventStoreError> {
        let guard = self.lock()?;
        let count: i64 = guard
            .conn
            .query_row("SELECT COUNT(*) FROM events", [], |row| row.get(0))?;
        Ok(u64::try_from(count).unwrap_or(0))
    }
}

impl EventStore for SqliteEventStore {
    fn store(&self, fields: EventFields) -> Result<Event, EventStoreError> {
        self.write(fields)
    }

    fn flush(&self) -> Result<(), EventStoreError> {
        // Commits are synchronous; this only folds the WAL back, if any.
        let guard = self.lock()?;
        guard.conn.execute_batch("PRAGMA wal_checkpoint(TRUNCATE);")?;
        Ok(())
    }
}
