//! Two-phase read path.
//!
//! 1. Select matching event headers (level, session, date range, and one
//!    `EXISTS` predicate per value filter), ordered by id.
//! 2. Select the attribute rows of those events, left-joined against the
//!    registry so literal and interned names both resolve, optionally
//!    restricted to the selected attribute names.
//!
//! Attribute rows are then decoded and grouped back onto their events.

use super::EventStoreError;
use crate::event::{Attributes, Event, EventId};
use crate::filter::QueryFilter;
use crate::registry::{AttributeId, NameRegistry};
use crate::value::{self, Columns, StorageKind};
use chrono::DateTime;
use rusqlite::types::Value as SqlValue;
use rusqlite::{Connection, params_from_iter};
use std::collections::HashMap;
use tracing::{debug, warn};

/// Upper bound on event ids bound into one attribute select.
const MAX_IDS_PER_QUERY: usize = 500;

/// AND-combined SQL predicates with their positional parameters.
#[derive(Debug, Default)]
struct Conditions {
    clauses: Vec<String>,
    params: Vec<SqlValue>,
}

impl Conditions {
    fn push(&mut self, clause: String, params: impl IntoIterator<Item = SqlValue>) {
        self.clauses.push(clause);
        self.params.extend(params);
    }

    fn to_sql(&self) -> String {
        if self.clauses.is_empty() {
            String::new()
        } else {
            format!("WHERE {}", self.clauses.join(" AND "))
        }
    }
}

/// Raw attribute row as selected in phase 2.
struct AttributeRow {
    event_id: i64,
    kind_code: i64,
    name: Option<String>,
    name_id: Option<i64>,
    registry_name: Option<String>,
    columns: Columns,
}

/// Runs `filter` and returns matching events in ascending id order.
///
/// # Errors
///
/// Returns [`EventStoreError::DecodeValue`] if a stored attribute cannot be
/// decoded, [`EventStoreError::Encode`] if a value filter cannot be encoded,
/// and [`EventStoreError::Sqlite`] if the store fails.
pub fn run_query(
    conn: &Connection,
    registry: &NameRegistry,
    filter: &QueryFilter,
) -> Result<Vec<Event>, EventStoreError> {
    let mut events = select_headers(conn, registry, filter)?;

    let mut ids: Vec<i64> = events.keys().map(|id| id.get()).collect();
    ids.sort_unstable();

    for chunk in ids.chunks(MAX_IDS_PER_QUERY) {
        for row in select_attributes(conn, registry, filter, chunk)? {
            attach_attribute(&mut events, registry, row)?;
        }
    }

    let mut result: Vec<Event> = events.into_values().collect();
    result.sort_by_key(|event| event.id);

    debug!("Query matched {} event(s)", result.len());
    Ok(result)
}

fn select_headers(
    conn: &Connection,
    registry: &NameRegistry,
    filter: &QueryFilter,
) -> Result<HashMap<EventId, Event>, EventStoreError> {
    let mut conditions = Conditions::default();

    if let Some(level) = &filter.level {
        conditions.push("e.level = ?".to_string(), [SqlValue::Text(level.clone())]);
    }
    if let Some(session) = &filter.session {
        conditions.push("e.session = ?".to_string(), [SqlValue::Text(session.clone())]);
    }
    if let Some(from) = filter.from {
        conditions.push("e.date >= ?".to_string(), [SqlValue::Integer(from.timestamp_micros())]);
    }
    if let Some(to) = filter.to {
        conditions.push("e.date <= ?".to_string(), [SqlValue::Integer(to.timestamp_micros())]);
    }

    for (name, expected) in &filter.value_filters {
        let (kind, columns) = value::encode(expected).map_err(|source| EventStoreError::Encode {
            name: name.clone(),
            source,
        })?;
        let (name_clause, mut params) = name_predicate(registry, name);

        let mut all_params = vec![SqlValue::Integer(kind.code())];
        all_params.append(&mut params);
        all_params.push(columns.into_sql());

        conditions.push(
            format!(
                "EXISTS (SELECT 1 FROM event_attributes a WHERE a.event_id = e.id \
                 AND a.storage_kind = ? AND {name_clause} AND a.{} = ?)",
                kind.column()
            ),
            all_params,
        );
    }

    let sql = format!(
        "SELECT e.id, e.date, e.level, e.session FROM events e {} ORDER BY e.id ASC",
        conditions.to_sql()
    );
    let mut stmt = conn.prepare(&sql)?;
    let headers = stmt
        .query_map(params_from_iter(conditions.params.iter()), |row| {
            Ok((
                row.get::<_, i64>(0)?,
                row.get::<_, i64>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, Option<String>>(3)?,
            ))
        })?
        .collect::<Result<Vec<_>, _>>()?;

    let mut events = HashMap::with_capacity(headers.len());
    for (id, micros, level, session) in headers {
        let timestamp = DateTime::from_timestamp_micros(micros).ok_or_else(|| {
            EventStoreError::InvalidData(format!("event {id} has out-of-range date {micros}"))
        })?;
        let id = EventId::new(id);
        events.insert(
            id,
            Event {
                id,
                timestamp,
                level,
                session,
                attributes: Attributes::new(),
            },
        );
    }
    Ok(events)
}

fn select_attributes(
    conn: &Connection,
    registry: &NameRegistry,
    filter: &QueryFilter,
    event_ids: &[i64],
) -> Result<Vec<AttributeRow>, EventStoreError> {
    let mut conditions = Conditions::default();
    conditions.push(
        format!("a.event_id IN ({})", placeholders(event_ids.len())),
        event_ids.iter().copied().map(SqlValue::Integer),
    );

    if !filter.selected_names.is_empty() {
        let interned: Vec<SqlValue> = filter
            .selected_names
            .iter()
            .filter_map(|name| registry.lookup(name))
            .map(|entry| SqlValue::Integer(entry.id.get()))
            .collect();
        let literal = filter
            .selected_names
            .iter()
            .map(|name| SqlValue::Text(name.clone()));

        let by_name = format!("a.name IN ({})", placeholders(filter.selected_names.len()));
        if interned.is_empty() {
            conditions.push(by_name, literal);
        } else {
            let by_id = format!("a.name_id IN ({})", placeholders(interned.len()));
            conditions.push(
                format!("({by_id} OR {by_name})"),
                interned.into_iter().chain(literal),
            );
        }
    }

    let sql = format!(
        r"
        SELECT a.event_id, a.storage_kind, a.name, a.name_id, r.name,
               a.real_value, a.text_value, a.blob_value
        FROM event_attributes a
        LEFT JOIN attribute_registry r ON r.id = a.name_id
        {}
        ORDER BY a.event_id ASC, a.id ASC
        ",
        conditions.to_sql()
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
        .query_map(params_from_iter(conditions.params.iter()), |row| {
            Ok(AttributeRow {
                event_id: row.get(0)?,
                kind_code: row.get(1)?,
                name: row.get(2)?,
                name_id: row.get(3)?,
                registry_name: row.get(4)?,
                columns: Columns {
                    real: row.get(5)?,
                    text: row.get(6)?,
                    blob: row.get(7)?,
                },
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

fn attach_attribute(
    events: &mut HashMap<EventId, Event>,
    registry: &NameRegistry,
    row: AttributeRow,
) -> Result<(), EventStoreError> {
    let event_id = EventId::new(row.event_id);
    let Some(event) = events.get_mut(&event_id) else {
        return Ok(());
    };

    let value = StorageKind::from_code(row.kind_code)
        .and_then(|kind| value::decode(kind, row.columns))
        .map_err(|source| EventStoreError::DecodeValue { event_id, source })?;

    let name = row.name.or(row.registry_name).or_else(|| {
        row.name_id
            .and_then(|id| registry.lookup_by_id(AttributeId::new(id)))
            .map(|entry| entry.name.clone())
    });

    match name {
        Some(name) => {
            event.attributes.insert(name, value);
        }
        None => {
            warn!(
                "Dropping attribute of event {} with unresolvable name id {:?}",
                event_id, row.name_id
            );
        }
    }
    Ok(())
}

/// Name match for a filter: by id and literal name when interned, since rows
/// written before the name was interned carry the literal.
fn name_predicate(registry: &NameRegistry, name: &str) -> (String, Vec<SqlValue>) {
    match registry.lookup(name) {
        Some(entry) => (
            "(a.name_id = ? OR a.name = ?)".to_string(),
            vec![SqlValue::Integer(entry.id.get()), SqlValue::Text(name.to_owned())],
        ),
        None => ("a.name = ?".to_string(), vec![SqlValue::Text(name.to_owned())]),
    }
}

fn placeholders(count: usize) -> String {
    vec!["?"; count].join(", ")
}
