//! Query filters.
//!
//! Every populated field narrows the result; fields combine with AND. An
//! empty filter matches every event.

use crate::value::FieldValue;
use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, BTreeSet};

/// Selection criteria for [`SqliteEventStore::query`](crate::SqliteEventStore::query).
///
/// # Example
///
/// ```rust
/// use plunger::QueryFilter;
///
/// let filter = QueryFilter::new()
///     .with_level("DEBUG")
///     .with_selected_names(["foo", "baz"])
///     .with_value_filter("foo", "bar");
/// assert_eq!(filter.selected_names.len(), 2);
/// ```
#[derive(Debug, Clone, Default, PartialEq)]
pub struct QueryFilter {
    pub level: Option<String>,
    pub session: Option<String>,
    /// Inclusive lower bound on the event timestamp.
    pub from: Option<DateTime<Utc>>,
    /// Inclusive upper bound on the event timestamp.
    pub to: Option<DateTime<Utc>>,
    /// When non-empty, only these attributes are returned.
    pub selected_names: BTreeSet<String>,
    /// Events must carry every one of these attributes with exactly this value.
    pub value_filters: BTreeMap<String, FieldValue>,
}

impl QueryFilter {
    /// Creates a filter that matches every event.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_level(mut self, level: &str) -> Self {
        self.level = Some(level.to_owned());
        self
    }

    #[must_use]
    pub fn with_session(mut self, session: &str) -> Self {
        self.session = Some(session.to_owned());
        self
    }

    #[must_use]
    pub fn with_from(mut self, from: DateTime<Utc>) -> Self {
        self.from = Some(from);
        self
    }

    #[must_use]
    pub fn with_to(mut self, to: DateTime<Utc>) -> Self {
        self.to = Some(to);
        self
    }

    /// Adds attribute names to the selection. Repeated calls accumulate.
    #[must_use]
    pub fn with_selected_names<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.selected_names.extend(names.into_iter().map(Into::into));
        self
    }

    /// Merges value filters into the filter. Later values for the same name win.
    #[must_use]
    pub fn with_value_filters<I, S, V>(mut self, filters: I) -> Self
    where
        I: IntoIterator<Item = (S, V)>,
        S: Into<String>,
        V: Into<FieldValue>,
    {
        self.value_filters
            .extend(filters.into_iter().map(|(name, value)| (name.into(), value.into())));
        self
    }

    /// Adds a single value filter.
    #[must_use]
    pub fn with_value_filter(mut self, name: &str, value: impl Into<FieldValue>) -> Self {
        self.value_filters.insert(name.to_owned(), value.into());
        self
    }

    /// True when the filter constrains nothing.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.level.is_none()
            && self.session.is_none()
            && self.from.is_none()
            && self.to.is_none()
            && self.selected_names.is_empty()
            && self.value_filters.is_empty()
    }
}
