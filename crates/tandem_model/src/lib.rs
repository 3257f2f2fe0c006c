//! # Tandem Model
//!
//! Record model for the tandem change-capture replication engine.
//!
//! This crate provides:
//! - `FieldValue` / `FieldMap` for heterogeneous record shapes
//! - `SchemaDescriptor` and `EntityRegistry` (the entity registration API)
//! - `Snapshotter` turning live records into immutable `EntitySnapshot`s
//! - `ChangeBuffer` accumulating snapshots for one unit of work
//!
//! This is a pure data crate with no I/O operations.

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod buffer;
mod error;
mod record;
mod schema;
mod snapshot;
mod value;

pub use buffer::{ChangeBuffer, ChangeSet};
pub use error::{ModelError, ModelResult};
pub use record::{DynamicRecord, Record};
pub use schema::{EntityRegistry, FieldDescriptor, SchemaBuilder, SchemaDescriptor};
pub use snapshot::{EntitySnapshot, Operation, PrimaryKey, Snapshotter};
pub use value::{FieldMap, FieldValue, TemporalKind};
