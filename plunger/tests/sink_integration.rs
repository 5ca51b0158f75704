//! File-backed store tests: reopening, registry persistence, and the mixed
//! literal/interned history that results from promoting names over time.

use chrono::{TimeZone, Utc};
use plunger::{
    AttributeId, EventFields, EventStoreError, FieldValue, PlungerConfig, QueryFilter,
    SqliteEventStore,
};
use serde_json::json;
use tempfile::TempDir;

#[test]
fn test_events_survive_reopen() -> Result<(), Box<dyn std::error::Error>> {
    let dir = TempDir::new()?;
    let path = dir.path().join("events.db");

    let written = {
        let store = SqliteEventStore::open(&path)?;
        store.write_at(
            EventFields::new("INFO")
                .with_session("s1")
                .with_attribute("msg", "hello")
                .with_attribute("payload", json!({"z": 1, "a": [true, null]}))
                .with_attribute("raw", vec![0_u8, 255, 7]),
            Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap(),
        )?
    };

    let store = SqliteEventStore::open(&path)?;
    let events = store.query(&QueryFilter::new())?;
    assert_eq!(events, vec![written]);
    Ok(())
}

#[test]
fn test_registry_persists_across_reopen() -> Result<(), Box<dyn std::error::Error>> {
    let dir = TempDir::new()?;
    let path = dir.path().join("events.db");

    {
        let store = SqliteEventStore::open_with_schema(&path, ["user", "host"])?;
        store.intern("unsaved")?;
    }

    let store = SqliteEventStore::open_with_schema(&path, ["host", "region"])?;
    let names: Vec<(AttributeId, String)> = store
        .attribute_names()?
        .into_iter()
        .map(|entry| (entry.id, entry.name))
        .collect();
    assert_eq!(
        names,
        vec![
            (AttributeId::new(0), "user".to_string()),
            (AttributeId::new(1), "host".to_string()),
            (AttributeId::new(2), "region".to_string()),
        ]
    );
    Ok(())
}

#[test]
fn test_promotion_keeps_old_rows_queryable() -> Result<(), Box<dyn std::error::Error>> {
    let dir = TempDir::new()?;
    let path = dir.path().join("events.db");

    let early = {
        let store = SqliteEventStore::open(&path)?;
        store.write(EventFields::new("INFO").with_attribute("user", "ada"))?
    };

    let store = SqliteEventStore::open_with_schema(&path, ["user"])?;
    let late = store.write(EventFields::new("INFO").with_attribute("user", "ada"))?;

    let events = store.query(&QueryFilter::new().with_value_filter("user", "ada"))?;
    let ids: Vec<_> = events.iter().map(|e| e.id).collect();
    assert_eq!(ids, vec![early.id, late.id]);
    assert!(events
        .iter()
        .all(|e| e.attribute("user") == Some(&FieldValue::from("ada"))));
    Ok(())
}

#[test]
fn test_second_writer_sees_names_after_reload() -> Result<(), Box<dyn std::error::Error>> {
    let dir = TempDir::new()?;
    let path = dir.path().join("events.db");

    let first = SqliteEventStore::open(&path)?;
    let second = SqliteEventStore::open(&path)?;

    first.register(["trace_id"])?;
    assert!(second.attribute_names()?.is_empty());

    second.reload_schema()?;
    let names = second.attribute_names()?;
    assert_eq!(names.len(), 1);
    assert_eq!(names[0].name, "trace_id");

    second.write(EventFields::new("DEBUG").with_attribute("trace_id", "abc"))?;
    let events = first.query(&QueryFilter::new().with_selected_names(["trace_id"]))?;
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].attribute("trace_id"), Some(&FieldValue::from("abc")));
    Ok(())
}

#[test]
fn test_corrupt_registry_fails_open() -> Result<(), Box<dyn std::error::Error>> {
    let dir = TempDir::new()?;
    let path = dir.path().join("events.db");

    {
        let conn = rusqlite::Connection::open(&path)?;
        conn.execute_batch(
            "CREATE TABLE attribute_registry (id INTEGER, name TEXT);
             INSERT INTO attribute_registry VALUES (0, 'a'), (0, 'b');",
        )?;
    }

    let Err(err) = SqliteEventStore::open(&path) else {
        panic!("expected the corrupt registry to be rejected");
    };
    assert!(matches!(err, EventStoreError::SchemaConflict(_)));
    Ok(())
}

#[test]
fn test_config_schema_opens_store() -> Result<(), Box<dyn std::error::Error>> {
    let dir = TempDir::new()?;
    let db_path = dir.path().join("configured.db");
    let config = PlungerConfig::parse(&format!(
        "[sink]\ndb_path = {:?}\n\n[schema]\nnames = [\"foo\", \"baz\"]\n",
        db_path.display().to_string()
    ))?;

    let store = SqliteEventStore::open_with_schema(&config.sink.db_path, &config.schema.names)?;
    store.write(
        EventFields::new("INFO")
            .with_attribute("foo", "bar")
            .with_attribute("baz", 42)
            .with_attribute("nested", json!({"foo": "bar", "baz": 42})),
    )?;

    let stored_by_id: i64 = rusqlite::Connection::open(&db_path)?.query_row(
        "SELECT COUNT(*) FROM event_attributes WHERE name_id IS NOT NULL",
        [],
        |row| row.get(0),
    )?;
    assert_eq!(stored_by_id, 2);

    let events = store.query(&QueryFilter::new().with_value_filter("baz", 42))?;
    assert_eq!(events.len(), 1);
    assert_eq!(
        events[0].attribute("nested"),
        Some(&FieldValue::Structured(json!({"foo": "bar", "baz": 42})))
    );
    Ok(())
}
