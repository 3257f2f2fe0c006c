//! Immutable record snapshots and the snapshotter.

use crate::error::{ModelError, ModelResult};
use crate::record::Record;
use crate::schema::EntityRegistry;
use crate::value::{FieldMap, FieldValue};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

/// Kind of mutation a snapshot describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Operation {
    /// Record was created.
    Insert,
    /// Record was modified.
    Update,
    /// Record was removed.
    Delete,
}

impl Operation {
    /// Returns the lowercase name used in logs.
    pub fn as_str(&self) -> &'static str {
        match self {
            Operation::Insert => "insert",
            Operation::Update => "update",
            Operation::Delete => "delete",
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Primary key of a snapshot: a scalar, or an ordered column mapping.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PrimaryKey {
    /// Single-column key.
    Scalar(FieldValue),
    /// Multi-column key in declaration order.
    Composite(FieldMap),
}

impl PrimaryKey {
    /// Returns the key as `(column, value)` pairs given the key columns.
    ///
    /// Scalar keys are paired with the first column name.
    pub fn columns<'a>(&'a self, key_columns: &'a [String]) -> Vec<(&'a str, &'a FieldValue)> {
        match self {
            PrimaryKey::Scalar(value) => key_columns
                .first()
                .map(|c| vec![(c.as_str(), value)])
                .unwrap_or_default(),
            PrimaryKey::Composite(map) => map.iter().collect(),
        }
    }

    /// Returns a stable textual form usable as a lookup key.
    pub fn canonical(&self) -> String {
        match self {
            PrimaryKey::Scalar(value) => value.canonical(),
            PrimaryKey::Composite(map) => {
                let parts: Vec<String> = map
                    .iter()
                    .map(|(name, value)| format!("{name}={}", value.canonical()))
                    .collect();
                format!("({})", parts.join(","))
            }
        }
    }
}

impl fmt::Display for PrimaryKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.canonical())
    }
}

impl From<FieldValue> for PrimaryKey {
    fn from(value: FieldValue) -> Self {
        PrimaryKey::Scalar(value)
    }
}

impl From<i64> for PrimaryKey {
    fn from(value: i64) -> Self {
        PrimaryKey::Scalar(FieldValue::Integer(value))
    }
}

/// An immutable copy of one mutated record.
///
/// Owns its field values outright. Temporal values are already normalized
/// to ISO-8601 text.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntitySnapshot {
    entity_kind: String,
    fields: FieldMap,
    primary_key: PrimaryKey,
    operation: Operation,
    #[serde(default)]
    sequence: u64,
}

impl EntitySnapshot {
    /// Assembles a snapshot from already-normalized parts.
    ///
    /// Used when rebuilding snapshots from a failure log; live records go
    /// through [`Snapshotter::snapshot`].
    pub fn from_parts(
        entity_kind: impl Into<String>,
        fields: FieldMap,
        primary_key: PrimaryKey,
        operation: Operation,
    ) -> Self {
        Self {
            entity_kind: entity_kind.into(),
            fields,
            primary_key,
            operation,
            sequence: 0,
        }
    }

    /// Returns the entity kind.
    pub fn entity_kind(&self) -> &str {
        &self.entity_kind
    }

    /// Returns the captured fields.
    pub fn fields(&self) -> &FieldMap {
        &self.fields
    }

    /// Returns the primary key.
    pub fn primary_key(&self) -> &PrimaryKey {
        &self.primary_key
    }

    /// Returns the operation.
    pub fn operation(&self) -> Operation {
        self.operation
    }

    /// Returns the capture position within its change set.
    ///
    /// Later captures have higher numbers; snapshots outside a change set
    /// report zero.
    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    pub(crate) fn set_sequence(&mut self, sequence: u64) {
        self.sequence = sequence;
    }

    /// Returns a copy of this snapshot tagged with another operation.
    pub fn with_operation(&self, operation: Operation) -> Self {
        Self {
            operation,
            ..self.clone()
        }
    }
}

/// Turns live records into [`EntitySnapshot`]s using registered schemas.
///
/// Work is proportional to the number of declared fields; no I/O.
#[derive(Debug, Clone)]
pub struct Snapshotter {
    registry: Arc<EntityRegistry>,
}

impl Snapshotter {
    /// Creates a snapshotter over a registry.
    pub fn new(registry: Arc<EntityRegistry>) -> Self {
        Self { registry }
    }

    /// Returns the registry.
    pub fn registry(&self) -> &Arc<EntityRegistry> {
        &self.registry
    }

    /// Snapshots a record for the given operation.
    ///
    /// # Errors
    ///
    /// Returns [`ModelError::Unserializable`] when the record's kind is not
    /// registered, a value cannot be transported, or a primary-key column
    /// is null or missing.
    pub fn snapshot(&self, record: &dyn Record, operation: Operation) -> ModelResult<EntitySnapshot> {
        let kind = record.entity_kind();
        let schema = self
            .registry
            .get(kind)
            .ok_or_else(|| ModelError::unregistered(kind))?;

        let mut fields = FieldMap::with_capacity(schema.fields().len());
        for descriptor in schema.fields() {
            let value = record.field(&descriptor.name).unwrap_or(FieldValue::Null);
            if !value.is_transportable() {
                return Err(ModelError::unserializable(
                    kind,
                    format!("field {} holds a non-finite number", descriptor.name),
                ));
            }
            fields.insert(descriptor.name.clone(), value.normalized());
        }

        let primary_key = if schema.has_composite_key() {
            let mut key = FieldMap::with_capacity(schema.primary_key().len());
            for column in schema.primary_key() {
                key.insert(column.clone(), key_value(kind, column, &fields)?);
            }
            PrimaryKey::Composite(key)
        } else {
            let column = &schema.primary_key()[0];
            PrimaryKey::Scalar(key_value(kind, column, &fields)?)
        };

        Ok(EntitySnapshot {
            entity_kind: kind.to_string(),
            fields,
            primary_key,
            operation,
            sequence: 0,
        })
    }
}

fn key_value(kind: &str, column: &str, fields: &FieldMap) -> ModelResult<FieldValue> {
    match fields.get(column) {
        Some(value) if !value.is_null() => Ok(value.clone()),
        _ => Err(ModelError::unserializable(
            kind,
            format!("primary key column {column} is null"),
        )),
    }
}
