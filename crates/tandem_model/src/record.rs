//! The live-record seam implemented by the business layer.

use crate::value::{FieldMap, FieldValue};

/// A live record of some registered entity kind.
///
/// Implementations hand out owned copies of column values; the snapshotter
/// never holds a reference back into the record.
pub trait Record {
    /// Logical type of the record, identical on both stores.
    fn entity_kind(&self) -> &str;

    /// Returns the current value of a column, or `None` if the record does
    /// not carry it.
    fn field(&self, name: &str) -> Option<FieldValue>;
}

/// A record backed by a plain field map.
#[derive(Debug, Clone, PartialEq)]
pub struct DynamicRecord {
    kind: String,
    fields: FieldMap,
}

impl DynamicRecord {
    /// Creates an empty record of the given kind.
    pub fn new(kind: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            fields: FieldMap::new(),
        }
    }

    /// Creates a record from existing fields.
    pub fn from_fields(kind: impl Into<String>, fields: FieldMap) -> Self {
        Self {
            kind: kind.into(),
            fields,
        }
    }

    /// Sets a column, builder style.
    #[must_use]
    pub fn with(mut self, name: impl Into<String>, value: impl Into<FieldValue>) -> Self {
        self.fields.insert(name, value.into());
        self
    }

    /// Sets a column in place.
    pub fn set(&mut self, name: impl Into<String>, value: impl Into<FieldValue>) {
        self.fields.insert(name, value.into());
    }

    /// Returns the underlying fields.
    pub fn fields(&self) -> &FieldMap {
        &self.fields
    }
}

impl Record for DynamicRecord {
    fn entity_kind(&self) -> &str {
        &self.kind
    }

    fn field(&self, name: &str) -> Option<FieldValue> {
        self.fields.get(name).cloned()
    }
}

impl<R: Record + ?Sized> Record for &R {
    fn entity_kind(&self) -> &str {
        (**self).entity_kind()
    }

    fn field(&self, name: &str) -> Option<FieldValue> {
        (**self).field(name)
    }
}
