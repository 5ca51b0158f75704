//! Transactional write path.
//!
//! One event becomes one `events` header row plus one `event_attributes` row
//! per attribute, all inside a single transaction. Attribute names whose
//! registry entry has been saved are stored by id; other names, including
//! names interned but not yet saved, are stored literally. New names are
//! never interned here: promotion into the registry is an explicit step (see
//! [`SqliteEventStore::register`]).
//!
//! [`SqliteEventStore::register`]: super::SqliteEventStore::register

use super::EventStoreError;
use crate::event::{Event, EventFields, EventId};
use crate::registry::NameRegistry;
use crate::value;
use chrono::{DateTime, Utc};
use rusqlite::{Connection, Transaction, params};
use tracing::{debug, warn};

/// Writes one event and returns it as committed.
///
/// `timestamp` is stored with microsecond precision; the returned event
/// carries the stored value.
///
/// # Errors
///
/// Returns [`EventStoreError::Encode`] if an attribute cannot be encoded and
/// [`EventStoreError::Sqlite`] for any failure of the backing store. In both
/// cases the transaction is rolled back and nothing is persisted.
pub fn write_event(
    conn: &mut Connection,
    registry: &NameRegistry,
    fields: EventFields,
    timestamp: DateTime<Utc>,
) -> Result<Event, EventStoreError> {
    let micros = timestamp.timestamp_micros();
    let timestamp = DateTime::from_timestamp_micros(micros)
        .ok_or_else(|| EventStoreError::InvalidData(format!("timestamp out of range: {micros}")))?;

    let tx = conn.transaction()?;

    // Dropping `tx` without committing rolls the transaction back.
    let id = match insert_rows(&tx, registry, &fields, micros) {
        Ok(id) => id,
        Err(e) => {
            warn!("Rolling back event write: {}", e);
            return Err(e);
        }
    };
    tx.commit()?;

    debug!(
        "Stored event {} ({} attribute(s))",
        id,
        fields.attributes.len()
    );

    Ok(Event {
        id,
        timestamp,
        level: fields.level,
        session: fields.session,
        attributes: fields.attributes,
    })
}

fn insert_rows(
    tx: &Transaction<'_>,
    registry: &NameRegistry,
    fields: &EventFields,
    micros: i64,
) -> Result<EventId, EventStoreError> {
    let event_id: i64 = tx.query_row(
        "INSERT INTO events (date, level, session) VALUES (?1, ?2, ?3) RETURNING id",
        params![micros, fields.level, fields.session],
        |row| row.get(0),
    )?;

    let mut stmt = tx.prepare_cached(
        r"
        INSERT INTO event_attributes
        (event_id, storage_kind, name, name_id, real_value, text_value, blob_value)
        VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
        ",
    )?;

    for (name, field) in &fields.attributes {
        let (kind, columns) = value::encode(field).map_err(|source| EventStoreError::Encode {
            name: name.clone(),
            source,
        })?;

        // `name_id` references `attribute_registry`, so only saved ids qualify.
        let (literal_name, name_id) = match registry.lookup_persisted(name) {
            Some(interned) => (None, Some(interned.id.get())),
            None => (Some(name.as_str()), None),
        };

        stmt.execute(params![
            event_id,
            kind,
            literal_name,
            name_id,
            columns.real,
            columns.text,
            columns.blob,
        ])?;
    }

    Ok(EventId::new(event_id))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event_store::SchemaStore;
    use crate::value::FieldValue;
    use chrono::TimeZone;

    fn setup() -> Result<Connection, EventStoreError> {
        let conn = Connection::open_in_memory()?;
        SchemaStore::init(&conn)?;
        Ok(conn)
    }

    fn count(conn: &Connection, table: &str) -> Result<i64, rusqlite::Error> {
        conn.query_row(&format!("SELECT COUNT(*) FROM {table}"), [], |row| row.get(0))
    }

    #[test]
    fn test_write_splits_interned_and_literal_names() -> Result<(), Box<dyn std::error::Error>> {
        let mut conn = setup()?;
        let mut registry = NameRegistry::new();
        let foo_id = registry.intern("foo").id;
        SchemaStore::save(&mut conn, &mut registry)?;

        let fields = EventFields::new("INFO")
            .with_attribute("foo", "bar")
            .with_attribute("other", 1);
        let event = write_event(&mut conn, &registry, fields, Utc::now())?;

        let rows: Vec<(Option<String>, Option<i64>)> = conn
            .prepare("SELECT name, name_id FROM event_attributes WHERE event_id = ?1 ORDER BY id")?
            .query_map([event.id.get()], |row| Ok((row.get(0)?, row.get(1)?)))?
            .collect::<Result<_, _>>()?;
        assert_eq!(rows.len(), 2);
        assert!(rows.contains(&(None, Some(foo_id.get()))));
        assert!(rows.contains(&(Some("other".to_string()), None)));
        Ok(())
    }

    #[test]
    fn test_unsaved_names_are_written_literally() -> Result<(), Box<dyn std::error::Error>> {
        let mut conn = setup()?;
        let mut registry = NameRegistry::new();
        registry.intern("foo");

        let event = write_event(
            &mut conn,
            &registry,
            EventFields::new("INFO").with_attribute("foo", "bar"),
            Utc::now(),
        )?;
        let (name, name_id): (Option<String>, Option<i64>) = conn.query_row(
            "SELECT name, name_id FROM event_attributes WHERE event_id = ?1",
            [event.id.get()],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )?;
        assert_eq!(name.as_deref(), Some("foo"));
        assert_eq!(name_id, None);

        SchemaStore::save(&mut conn, &mut registry)?;
        let event = write_event(
            &mut conn,
            &registry,
            EventFields::new("INFO").with_attribute("foo", "bar"),
            Utc::now(),
        )?;
        let name_id: Option<i64> = conn.query_row(
            "SELECT name_id FROM event_attributes WHERE event_id = ?1",
            [event.id.get()],
            |row| row.get(0),
        )?;
        assert_eq!(name_id, Some(0));
        Ok(())
    }

    #[test]
    fn test_write_truncates_timestamp_to_micros() -> Result<(), Box<dyn std::error::Error>> {
        let mut conn = setup()?;
        let at = Utc.timestamp_opt(1_600_000_000, 123_456_789).unwrap();
        let event = write_event(&mut conn, &NameRegistry::new(), EventFields::new("INFO"), at)?;
        assert_eq!(event.timestamp.timestamp_subsec_nanos(), 123_456_000);

        let stored: i64 = conn.query_row("SELECT date FROM events", [], |row| row.get(0))?;
        assert_eq!(stored, at.timestamp_micros());
        Ok(())
    }

    #[test]
    fn test_encode_failure_rolls_back() -> Result<(), Box<dyn std::error::Error>> {
        let mut conn = setup()?;
        let fields = EventFields::new("INFO")
            .with_attribute("a", "fine")
            .with_attribute("b", FieldValue::Number(f64::NAN))
            .with_attribute("c", "never written");

        let result = write_event(&mut conn, &NameRegistry::new(), fields, Utc::now());
        assert!(matches!(result, Err(EventStoreError::Encode { ref name, .. }) if name == "b"));

        assert_eq!(count(&conn, "events")?, 0);
        assert_eq!(count(&conn, "event_attributes")?, 0);

        // The connection is usable again: no transaction was left open.
        write_event(&mut conn, &NameRegistry::new(), EventFields::new("INFO"), Utc::now())?;
        assert_eq!(count(&conn, "events")?, 1);
        Ok(())
    }
}
