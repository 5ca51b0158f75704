//! Attribute name interning.
//!
//! Attribute names that show up on most events are stored once in the
//! registry and referenced from attribute rows by a small integer id. The
//! registry is an append-only arena of entries with two indexes (by name and
//! by id) that are always updated together.

use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::fmt;
use thiserror::Error;

/// Identifier of an interned attribute name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AttributeId(i64);

impl AttributeId {
    /// Wraps a raw id.
    #[must_use]
    pub const fn new(id: i64) -> Self {
        Self(id)
    }

    /// Returns the raw id.
    #[must_use]
    pub const fn get(self) -> i64 {
        self.0
    }
}

impl fmt::Display for AttributeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// An interned attribute name. Immutable once assigned.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AttributeName {
    pub name: String,
    pub id: AttributeId,
}

/// Strict interning found a name or id already bound to something else.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConflictError {
    #[error("id {id} is already bound to '{existing}', cannot bind it to '{requested}'")]
    IdTaken {
        id: AttributeId,
        existing: String,
        requested: String,
    },

    #[error("name '{name}' is already bound to id {existing}, cannot bind it to id {requested}")]
    NameTaken {
        name: String,
        existing: AttributeId,
        requested: AttributeId,
    },

    #[error("id {id} for '{name}' is outside the range 0..={max}", max = MAX_EXPLICIT_ID)]
    IdOutOfRange { name: String, id: AttributeId },
}

/// Largest id accepted by [`NameRegistry::intern_with_id`]. Ids above it are
/// left to sequential allocation, which can then never run out.
pub const MAX_EXPLICIT_ID: i64 = i64::MAX / 2;

/// In-memory bidirectional mapping between attribute names and ids.
///
/// Ids are handed out from a high-water mark that only ever moves forward,
/// so an id is never reused even when explicit ids leave gaps.
///
/// The registry also remembers which ids have been saved to the backing
/// store. Only those may be referenced from stored rows.
#[derive(Debug, Clone, Default)]
pub struct NameRegistry {
    entries: Vec<AttributeName>,
    by_name: HashMap<String, usize>,
    by_id: HashMap<AttributeId, usize>,
    persisted: HashSet<AttributeId>,
    next_id: i64,
}

impl NameRegistry {
    /// Creates an empty registry whose first id will be 0.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn lookup(&self, name: &str) -> Option<&AttributeName> {
        self.by_name.get(name).map(|&slot| &self.entries[slot])
    }

    #[must_use]
    pub fn lookup_by_id(&self, id: AttributeId) -> Option<&AttributeName> {
        self.by_id.get(&id).map(|&slot| &self.entries[slot])
    }

    /// Like [`lookup`](Self::lookup), but only for entries already saved.
    #[must_use]
    pub fn lookup_persisted(&self, name: &str) -> Option<&AttributeName> {
        self.lookup(name)
            .filter(|entry| self.persisted.contains(&entry.id))
    }

    #[must_use]
    pub fn is_persisted(&self, id: AttributeId) -> bool {
        self.persisted.contains(&id)
    }

    /// Records every current entry as saved.
    pub fn mark_persisted(&mut self) {
        self.persisted.extend(self.by_id.keys().copied());
    }

    /// Returns the entry for `name`, allocating the next id if the name is new.
    pub fn intern(&mut self, name: &str) -> &AttributeName {
        if let Some(slot) = self.by_name.get(name).copied() {
            return &self.entries[slot];
        }
        let id = AttributeId(self.next_id);
        self.insert(name.to_owned(), id)
    }

    /// Binds `name` to an explicit `id`, as done when reloading persisted state.
    ///
    /// Re-binding the exact same pair is a no-op.
    ///
    /// # Errors
    ///
    /// Returns a [`ConflictError`] if `id` is bound to another name, `name`
    /// is bound to another id, or `id` is negative or above
    /// [`MAX_EXPLICIT_ID`]. The registry is left unchanged in that case.
    pub fn intern_with_id(
        &mut self,
        name: &str,
        id: AttributeId,
    ) -> Result<&AttributeName, ConflictError> {
        if !(0..=MAX_EXPLICIT_ID).contains(&id.get()) {
            return Err(ConflictError::IdOutOfRange {
                name: name.to_owned(),
                id,
            });
        }
        self.bind(name, id)
    }

    /// Re-binds a saved entry, visited in ascending id order.
    ///
    /// Ids above [`MAX_EXPLICIT_ID`] are accepted only as the next sequential
    /// id, since [`intern`](Self::intern) is the only way to produce them.
    pub(crate) fn restore(
        &mut self,
        name: &str,
        id: AttributeId,
    ) -> Result<&AttributeName, ConflictError> {
        if id.get() > MAX_EXPLICIT_ID && id.get() == self.next_id {
            return self.bind(name, id);
        }
        self.intern_with_id(name, id)
    }

    fn bind(&mut self, name: &str, id: AttributeId) -> Result<&AttributeName, ConflictError> {
        if let Some(&slot) = self.by_id.get(&id) {
            let existing = &self.entries[slot];
            if existing.name != name {
                return Err(ConflictError::IdTaken {
                    id,
                    existing: existing.name.clone(),
                    requested: name.to_owned(),
                });
            }
        }

        if let Some(slot) = self.by_name.get(name).copied() {
            let existing = &self.entries[slot];
            if existing.id != id {
                return Err(ConflictError::NameTaken {
                    name: name.to_owned(),
                    existing: existing.id,
                    requested: id,
                });
            }
            return Ok(&self.entries[slot]);
        }

        Ok(self.insert(name.to_owned(), id))
    }

    /// The id the next call to [`intern`](Self::intern) would allocate.
    #[must_use]
    pub const fn high_water_mark(&self) -> i64 {
        self.next_id
    }

    /// Entries in registration order.
    pub fn iter(&self) -> impl Iterator<Item = &AttributeName> {
        self.entries.iter()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn insert(&mut self, name: String, id: AttributeId) -> &AttributeName {
        let slot = self.entries.len();
        self.by_name.insert(name.clone(), slot);
        self.by_id.insert(id, slot);
        self.entries.push(AttributeName { name, id });
        self.next_id = self.next_id.max(id.get().saturating_add(1));

        debug_assert_eq!(self.by_name.len(), self.entries.len());
        debug_assert_eq!(self.by_id.len(), self.entries.len());

        &self.entries[slot]
    }
}
