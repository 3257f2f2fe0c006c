//! Property-based test generators using proptest.
//!
//! Provides strategies for records, temporal values and mutation
//! sequences, plus the reference model a replayed sequence must match.

use crate::fixtures::employee;
use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use proptest::prelude::*;
use std::collections::BTreeMap;
use tandem_model::{DynamicRecord, FieldValue, Operation, TemporalKind};

/// Strategy for generating person names.
pub fn name_strategy() -> impl Strategy<Value = String> {
    prop::string::string_regex("[A-Z][a-z]{1,10}( [A-Z][a-z]{1,10})?").expect("Invalid regex")
}

/// Strategy for generating calendar dates.
pub fn date_strategy() -> impl Strategy<Value = NaiveDate> {
    (1990i32..2040, 1u32..=12, 1u32..=28).prop_map(|(y, m, d)| {
        NaiveDate::from_ymd_opt(y, m, d).expect("day 1..=28 exists in every month")
    })
}

/// Strategy for generating times of day with whole seconds.
pub fn time_strategy() -> impl Strategy<Value = NaiveTime> {
    (0u32..24, 0u32..60, 0u32..60)
        .prop_map(|(h, m, s)| NaiveTime::from_hms_opt(h, m, s).expect("valid time of day"))
}

/// Strategy for generating naive timestamps.
pub fn datetime_strategy() -> impl Strategy<Value = NaiveDateTime> {
    (date_strategy(), time_strategy()).prop_map(|(d, t)| d.and_time(t))
}

/// Strategy for generating a temporal value together with its kind.
pub fn temporal_value_strategy() -> impl Strategy<Value = (TemporalKind, FieldValue)> {
    prop_oneof![
        date_strategy().prop_map(|d| (TemporalKind::Date, FieldValue::from(d))),
        time_strategy().prop_map(|t| (TemporalKind::Time, FieldValue::from(t))),
        datetime_strategy().prop_map(|dt| (TemporalKind::DateTime, FieldValue::from(dt))),
    ]
}

/// Strategy for generating employee records with ids in `0..max_id`.
pub fn employee_strategy(max_id: i64) -> impl Strategy<Value = DynamicRecord> {
    (0..max_id, name_strategy(), date_strategy())
        .prop_map(|(id, name, hired)| employee(id, &name).with("hired_on", hired))
}

/// One mutation against the employee table.
#[derive(Debug, Clone, PartialEq)]
pub enum Mutation {
    /// Insert an employee.
    Insert(i64, String),
    /// Update an employee's name.
    Update(i64, String),
    /// Delete an employee.
    Delete(i64),
}

impl Mutation {
    /// Returns the employee id.
    pub fn id(&self) -> i64 {
        match self {
            Mutation::Insert(id, _) | Mutation::Update(id, _) | Mutation::Delete(id) => *id,
        }
    }

    /// Returns the operation kind.
    pub fn operation(&self) -> Operation {
        match self {
            Mutation::Insert(..) => Operation::Insert,
            Mutation::Update(..) => Operation::Update,
            Mutation::Delete(_) => Operation::Delete,
        }
    }

    /// Builds the record reported to the hooks.
    pub fn record(&self) -> DynamicRecord {
        match self {
            Mutation::Insert(id, name) | Mutation::Update(id, name) => employee(*id, name),
            Mutation::Delete(id) => employee(*id, "removed"),
        }
    }
}

/// Strategy for one mutation over ids in `0..max_id`.
pub fn mutation_strategy(max_id: i64) -> impl Strategy<Value = Mutation> {
    prop_oneof![
        (0..max_id, name_strategy()).prop_map(|(id, n)| Mutation::Insert(id, n)),
        (0..max_id, name_strategy()).prop_map(|(id, n)| Mutation::Update(id, n)),
        (0..max_id).prop_map(Mutation::Delete),
    ]
}

/// Strategy for a mutation sequence of `1..=max_len` steps.
pub fn mutation_sequence_strategy(max_id: i64, max_len: usize) -> impl Strategy<Value = Vec<Mutation>> {
    prop::collection::vec(mutation_strategy(max_id), 1..=max_len)
}

/// Strategy for mutations that each touch a distinct id.
pub fn distinct_key_mutations_strategy(max_len: usize) -> impl Strategy<Value = Vec<Mutation>> {
    mutation_sequence_strategy(1_000, max_len).prop_map(|mutations| {
        let mut seen = std::collections::HashSet::new();
        mutations
            .into_iter()
            .filter(|m| seen.insert(m.id()))
            .collect()
    })
}

/// Expected target contents (id to name) after replaying `mutations` onto
/// `initial`.
///
/// The last mutation of each key decides: inserts and updates leave a row
/// with their name, deletes leave none.
pub fn expected_rows(
    initial: &BTreeMap<i64, String>,
    mutations: &[Mutation],
) -> BTreeMap<i64, String> {
    let mut rows = initial.clone();
    for mutation in mutations {
        match mutation {
            Mutation::Insert(id, name) | Mutation::Update(id, name) => {
                rows.insert(*id, name.clone());
            }
            Mutation::Delete(id) => {
                rows.remove(id);
            }
        }
    }
    rows
}
