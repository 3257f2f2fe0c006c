//! Entity schema descriptors and the registration API.
//!
//! Every entity kind that should leave the primary store is registered once
//! with a [`SchemaDescriptor`] listing its columns, which of them are
//! temporal, and its primary-key column(s). Nothing is inferred at runtime:
//! a kind without a descriptor is never captured.

use crate::error::{ModelError, ModelResult};
use crate::value::TemporalKind;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

/// A single declared column.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldDescriptor {
    /// Column name (identical on both stores).
    pub name: String,
    /// Temporal type, if the column holds dates or times.
    pub temporal: Option<TemporalKind>,
}

/// The declared shape of one entity kind.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchemaDescriptor {
    kind: String,
    fields: Vec<FieldDescriptor>,
    primary_key: Vec<String>,
}

impl SchemaDescriptor {
    /// Starts describing an entity kind.
    pub fn builder(kind: impl Into<String>) -> SchemaBuilder {
        SchemaBuilder {
            kind: kind.into(),
            fields: Vec::new(),
            primary_key: Vec::new(),
        }
    }

    /// Returns the entity kind.
    pub fn kind(&self) -> &str {
        &self.kind
    }

    /// Returns the declared columns in order.
    pub fn fields(&self) -> &[FieldDescriptor] {
        &self.fields
    }

    /// Returns the primary-key column names in order.
    pub fn primary_key(&self) -> &[String] {
        &self.primary_key
    }

    /// Returns true if the key spans more than one column.
    pub fn has_composite_key(&self) -> bool {
        self.primary_key.len() > 1
    }

    /// Returns the temporal type of a column, if declared temporal.
    pub fn temporal_kind(&self, field: &str) -> Option<TemporalKind> {
        self.fields
            .iter()
            .find(|f| f.name == field)
            .and_then(|f| f.temporal)
    }
}

/// Builder for [`SchemaDescriptor`].
#[derive(Debug, Clone)]
pub struct SchemaBuilder {
    kind: String,
    fields: Vec<FieldDescriptor>,
    primary_key: Vec<String>,
}

impl SchemaBuilder {
    /// Declares a plain column.
    #[must_use]
    pub fn field(mut self, name: impl Into<String>) -> Self {
        self.fields.push(FieldDescriptor {
            name: name.into(),
            temporal: None,
        });
        self
    }

    /// Declares several plain columns.
    #[must_use]
    pub fn fields<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        for name in names {
            self = self.field(name);
        }
        self
    }

    /// Declares a temporal column.
    #[must_use]
    pub fn temporal(mut self, name: impl Into<String>, kind: TemporalKind) -> Self {
        self.fields.push(FieldDescriptor {
            name: name.into(),
            temporal: Some(kind),
        });
        self
    }

    /// Sets the primary-key column(s).
    #[must_use]
    pub fn primary_key<I, S>(mut self, columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.primary_key = columns.into_iter().map(Into::into).collect();
        self
    }

    /// Validates and builds the descriptor.
    pub fn build(self) -> ModelResult<SchemaDescriptor> {
        if self.kind.is_empty() {
            return Err(ModelError::invalid_schema("", "entity kind must not be empty"));
        }
        if self.primary_key.is_empty() {
            return Err(ModelError::invalid_schema(&self.kind, "empty primary key"));
        }

        let mut seen = HashSet::new();
        for field in &self.fields {
            if !seen.insert(field.name.as_str()) {
                return Err(ModelError::invalid_schema(
                    &self.kind,
                    format!("duplicate field {}", field.name),
                ));
            }
        }

        let mut key_seen = HashSet::new();
        for column in &self.primary_key {
            if !seen.contains(column.as_str()) {
                return Err(ModelError::invalid_schema(
                    &self.kind,
                    format!("primary key column {column} is not a declared field"),
                ));
            }
            if !key_seen.insert(column.as_str()) {
                return Err(ModelError::invalid_schema(
                    &self.kind,
                    format!("primary key column {column} listed twice"),
                ));
            }
        }

        Ok(SchemaDescriptor {
            kind: self.kind,
            fields: self.fields,
            primary_key: self.primary_key,
        })
    }
}

/// Registry of entity kinds eligible for replication.
///
/// Thread-safe; shared between the capture path and the replay path.
#[derive(Debug, Default)]
pub struct EntityRegistry {
    schemas: RwLock<HashMap<String, Arc<SchemaDescriptor>>>,
}

impl EntityRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers an entity kind.
    ///
    /// Registering the same descriptor twice is a no-op; registering a
    /// different descriptor under an existing kind fails.
    pub fn register_entity_kind(&self, schema: SchemaDescriptor) -> ModelResult<()> {
        let mut schemas = self.schemas.write();
        if let Some(existing) = schemas.get(schema.kind()) {
            if **existing == schema {
                return Ok(());
            }
            return Err(ModelError::DuplicateKind {
                entity_kind: schema.kind().to_string(),
            });
        }

        tracing::info!(
            entity_kind = schema.kind(),
            fields = schema.fields().len(),
            composite_key = schema.has_composite_key(),
            "registered entity kind for replication"
        );
        schemas.insert(schema.kind().to_string(), Arc::new(schema));
        Ok(())
    }

    /// Looks up the descriptor for a kind.
    pub fn get(&self, kind: &str) -> Option<Arc<SchemaDescriptor>> {
        self.schemas.read().get(kind).cloned()
    }

    /// Returns true if the kind is registered.
    pub fn contains(&self, kind: &str) -> bool {
        self.schemas.read().contains_key(kind)
    }

    /// Returns all registered kinds, sorted.
    pub fn kinds(&self) -> Vec<String> {
        let mut kinds: Vec<_> = self.schemas.read().keys().cloned().collect();
        kinds.sort();
        kinds
    }

    /// Returns the number of registered kinds.
    pub fn len(&self) -> usize {
        self.schemas.read().len()
    }

    /// Returns true if nothing is registered.
    pub fn is_empty(&self) -> bool {
        self.schemas.read().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn employee() -> SchemaDescriptor {
        SchemaDescriptor::builder("employee")
            .fields(["id", "name"])
            .temporal("hired_at", TemporalKind::DateTime)
            .primary_key(["id"])
            .build()
            .unwrap()
    }

    #[test]
    fn builder_records_shape() {
        let schema = employee();
        assert_eq!(schema.kind(), "employee");
        assert_eq!(schema.fields().len(), 3);
        assert_eq!(schema.primary_key(), &["id".to_string()]);
        assert!(!schema.has_composite_key());
        assert_eq!(schema.temporal_kind("hired_at"), Some(TemporalKind::DateTime));
        assert_eq!(schema.temporal_kind("name"), None);
    }

    #[test]
    fn builder_rejects_bad_keys() {
        let err = SchemaDescriptor::builder("x").field("a").build().unwrap_err();
        assert!(matches!(err, ModelError::InvalidSchema { .. }));

        let err = SchemaDescriptor::builder("x")
            .field("a")
            .primary_key(["b"])
            .build()
            .unwrap_err();
        assert!(err.to_string().contains("not a declared field"));

        let err = SchemaDescriptor::builder("x")
            .fields(["a", "a"])
            .primary_key(["a"])
            .build()
            .unwrap_err();
        assert!(err.to_string().contains("duplicate field"));
    }

    #[test]
    fn registration_is_idempotent_for_identical_schema() {
        let registry = EntityRegistry::new();
        registry.register_entity_kind(employee()).unwrap();
        registry.register_entity_kind(employee()).unwrap();
        assert_eq!(registry.len(), 1);
        assert!(registry.contains("employee"));
    }

    #[test]
    fn conflicting_registration_fails() {
        let registry = EntityRegistry::new();
        registry.register_entity_kind(employee()).unwrap();

        let other = SchemaDescriptor::builder("employee")
            .field("id")
            .primary_key(["id"])
            .build()
            .unwrap();
        let err = registry.register_entity_kind(other).unwrap_err();
        assert!(matches!(err, ModelError::DuplicateKind { .. }));
    }

    #[test]
    fn kinds_are_sorted() {
        let registry = EntityRegistry::new();
        for kind in ["ticket", "attendance", "leave_request"] {
            registry
                .register_entity_kind(
                    SchemaDescriptor::builder(kind)
                        .field("id")
                        .primary_key(["id"])
                        .build()
                        .unwrap(),
                )
                .unwrap();
        }
        assert_eq!(
            registry.kinds(),
            vec!["attendance", "leave_request", "ticket"]
        );
    }
}
