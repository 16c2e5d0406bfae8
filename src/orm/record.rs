//! Hydrated entity instances
//!
//! A [Record] keeps its column values in declaration order next to the
//! relations that were loaded for it. Records serialize to a flat JSON object
//! (columns first, then relations) and can be decoded into typed structs.

use serde::de::DeserializeOwned;
use serde::ser::{Serialize, SerializeMap, Serializer};
use sqlx::sqlite::SqliteRow;

use super::schema::EntityDescriptor;
use super::value::{KeyValue, SqlValue};

/// Relation slot of a hydrated record.
#[derive(Debug, Clone, PartialEq)]
pub enum Loaded {
    One(Option<Box<Record>>),
    Many(Vec<Record>),
}

impl Loaded {
    pub fn one(&self) -> Option<&Record> {
        match self {
            Loaded::One(record) => record.as_deref(),
            Loaded::Many(_) => None,
        }
    }

    pub fn many(&self) -> &[Record] {
        match self {
            Loaded::Many(records) => records,
            Loaded::One(_) => &[],
        }
    }
}

impl Serialize for Loaded {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Loaded::One(record) => record.serialize(serializer),
            Loaded::Many(records) => records.serialize(serializer),
        }
    }
}

/// One entity instance.
#[derive(Debug, Clone, PartialEq)]
pub struct Record {
    descriptor: &'static EntityDescriptor,
    values: Vec<(&'static str, SqlValue)>,
    relations: Vec<(&'static str, Loaded)>,
}

impl Record {
    pub fn new(descriptor: &'static EntityDescriptor) -> Self {
        Self {
            descriptor,
            values: Vec::new(),
            relations: Vec::new(),
        }
    }

    /// Decode every declared column of a row selected with
    /// [EntityDescriptor::select_list].
    pub fn from_row(descriptor: &'static EntityDescriptor, row: &SqliteRow) -> Result<Self, sqlx::Error> {
        let values = descriptor
            .columns
            .iter()
            .map(|c| Ok((c.name, SqlValue::decode(row, c.name, c.column_type)?)))
            .collect::<Result<Vec<_>, sqlx::Error>>()?;

        Ok(Self {
            descriptor,
            values,
            relations: Vec::new(),
        })
    }

    pub fn descriptor(&self) -> &'static EntityDescriptor {
        self.descriptor
    }

    /// Builder form of [Record::set]
    pub fn with(mut self, column: &'static str, value: impl Into<SqlValue>) -> Self {
        self.set(column, value);
        self
    }

    /// Set a column value, replacing any previous one.
    pub fn set(&mut self, column: &'static str, value: impl Into<SqlValue>) {
        let value = value.into();
        match self.values.iter_mut().find(|(name, _)| *name == column) {
            Some((_, slot)) => *slot = value,
            None => self.values.push((column, value)),
        }
    }

    /// Column value, or `None` when the record does not carry the column at all.
    pub fn get(&self, column: &str) -> Option<&SqlValue> {
        self.values
            .iter()
            .find(|(name, _)| *name == column)
            .map(|(_, value)| value)
    }

    pub fn values(&self) -> impl Iterator<Item = (&'static str, &SqlValue)> {
        self.values.iter().map(|(name, value)| (*name, value))
    }

    pub(crate) fn values_mut(&mut self) -> impl Iterator<Item = (&'static str, &mut SqlValue)> {
        self.values.iter_mut().map(|(name, value)| (*name, value))
    }

    pub fn primary_key(&self) -> Option<KeyValue> {
        self.get(self.descriptor.primary_key).and_then(SqlValue::as_key)
    }

    pub fn unique_key(&self) -> Option<KeyValue> {
        self.get(self.descriptor.unique_key).and_then(SqlValue::as_key)
    }

    pub fn relation(&self, name: &str) -> Option<&Loaded> {
        self.relations
            .iter()
            .find(|(rel, _)| *rel == name)
            .map(|(_, loaded)| loaded)
    }

    pub fn set_relation(&mut self, name: &'static str, loaded: Loaded) {
        match self.relations.iter_mut().find(|(rel, _)| *rel == name) {
            Some((_, slot)) => *slot = loaded,
            None => self.relations.push((name, loaded)),
        }
    }

    /// Decode into a typed struct through its serde representation.
    pub fn decode<T: DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        serde_json::from_value(serde_json::to_value(self)?)
    }
}

impl Serialize for Record {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.values.len() + self.relations.len()))?;
        for (name, value) in &self.values {
            map.serialize_entry(name, value)?;
        }
        for (name, loaded) in &self.relations {
            map.serialize_entry(name, loaded)?;
        }
        map.end()
    }
}
