//! Dynamically typed column values
//!
//! Values flow in three directions: bound as query parameters, decoded from
//! rows, and compared during upserts. Every column declares a [ColumnType]
//! which is used to decode and to normalize incoming values before comparison.

use chrono::{DateTime, SubsecRound, Utc};
use serde::Serialize;
use sqlx::Row;
use sqlx::sqlite::{Sqlite, SqliteArguments, SqliteRow};

use crate::db::sqlite_helpers::{datetime_to_str, str_to_datetime};

/// Storage type of a column.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnType {
    Text,
    Integer,
    Real,
    /// Stored as RFC 3339 UTC text
    Timestamp,
}

impl ColumnType {
    /// SQLite type name used in DDL
    pub fn sql_type(&self) -> &'static str {
        match self {
            ColumnType::Text | ColumnType::Timestamp => "TEXT",
            ColumnType::Integer => "INTEGER",
            ColumnType::Real => "REAL",
        }
    }

    /// Whether ordering should ignore case.
    pub fn is_textual(&self) -> bool {
        matches!(self, ColumnType::Text)
    }
}

/// Represents a SQL value that can be bound to a query.
///
/// `List` only appears as a filter argument for set-membership predicates;
/// the filter compiler expands it into one parameter per element.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum SqlValue {
    Null,
    Int(i64),
    Float(f64),
    DateTime(DateTime<Utc>),
    String(String),
    List(Vec<SqlValue>),
}

impl SqlValue {
    pub fn is_null(&self) -> bool {
        matches!(self, SqlValue::Null)
    }

    /// Bind this value to a sqlx query
    pub fn bind_to_query<'q>(
        &'q self,
        query: sqlx::query::Query<'q, Sqlite, SqliteArguments<'q>>,
    ) -> sqlx::query::Query<'q, Sqlite, SqliteArguments<'q>> {
        match self {
            SqlValue::Null => query.bind(None::<String>),
            SqlValue::Int(i) => query.bind(*i),
            SqlValue::Float(f) => query.bind(*f),
            SqlValue::DateTime(dt) => query.bind(datetime_to_str(*dt)),
            SqlValue::String(s) => query.bind(s.as_str()),
            // Lists bind as JSON text
            SqlValue::List(_) => query.bind(self.to_text()),
        }
    }

    /// Normalize a value to the representation the column stores, so that
    /// freshly supplied values compare equal to decoded ones.
    pub fn coerce(self, column_type: ColumnType) -> SqlValue {
        match (column_type, self) {
            (ColumnType::Real, SqlValue::Int(i)) => SqlValue::Float(i as f64),
            (ColumnType::Timestamp, SqlValue::String(s)) => match str_to_datetime(&s) {
                Ok(dt) => SqlValue::DateTime(dt.trunc_subsecs(6)),
                Err(_) => SqlValue::String(s),
            },
            (ColumnType::Timestamp, SqlValue::DateTime(dt)) => SqlValue::DateTime(dt.trunc_subsecs(6)),
            (ColumnType::Text, SqlValue::Int(i)) => SqlValue::String(i.to_string()),
            (_, value) => value,
        }
    }

    /// Text rendering used by the persisted changelog. `Null` has none.
    pub fn to_text(&self) -> Option<String> {
        match self {
            SqlValue::Null => None,
            SqlValue::Int(i) => Some(i.to_string()),
            SqlValue::Float(f) => Some(f.to_string()),
            SqlValue::DateTime(dt) => Some(datetime_to_str(*dt)),
            SqlValue::String(s) => Some(s.clone()),
            SqlValue::List(_) => serde_json::to_string(self).ok(),
        }
    }

    /// Hashable form of key-like values (primary, unique and foreign keys).
    pub fn as_key(&self) -> Option<KeyValue> {
        match self {
            SqlValue::Int(i) => Some(KeyValue::Int(*i)),
            SqlValue::String(s) => Some(KeyValue::Text(s.clone())),
            SqlValue::DateTime(dt) => Some(KeyValue::Text(datetime_to_str(*dt))),
            _ => None,
        }
    }

    /// Decode a named column of a row.
    pub fn decode(row: &SqliteRow, name: &str, column_type: ColumnType) -> Result<Self, sqlx::Error> {
        Self::decode_index(row, name, column_type)
    }

    /// Decode a column by position.
    pub fn decode_at(row: &SqliteRow, index: usize, column_type: ColumnType) -> Result<Self, sqlx::Error> {
        Self::decode_index(row, index, column_type)
    }

    fn decode_index<I>(row: &SqliteRow, index: I, column_type: ColumnType) -> Result<Self, sqlx::Error>
    where
        I: sqlx::ColumnIndex<SqliteRow>,
    {
        let value = match column_type {
            ColumnType::Text => row
                .try_get::<Option<String>, _>(index)?
                .map_or(SqlValue::Null, SqlValue::String),
            ColumnType::Integer => row
                .try_get::<Option<i64>, _>(index)?
                .map_or(SqlValue::Null, SqlValue::Int),
            ColumnType::Real => row
                .try_get::<Option<f64>, _>(index)?
                .map_or(SqlValue::Null, SqlValue::Float),
            ColumnType::Timestamp => match row.try_get::<Option<String>, _>(index)? {
                Some(s) => SqlValue::DateTime(
                    str_to_datetime(&s).map_err(|e| sqlx::Error::Decode(e.into()))?,
                ),
                None => SqlValue::Null,
            },
        };
        Ok(value)
    }
}

/// Key-like value usable in hash maps.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum KeyValue {
    Int(i64),
    Text(String),
}

impl From<KeyValue> for SqlValue {
    fn from(key: KeyValue) -> Self {
        match key {
            KeyValue::Int(i) => SqlValue::Int(i),
            KeyValue::Text(s) => SqlValue::String(s),
        }
    }
}

impl std::fmt::Display for KeyValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            KeyValue::Int(i) => write!(f, "{i}"),
            KeyValue::Text(s) => f.write_str(s),
        }
    }
}

impl From<i64> for SqlValue {
    fn from(value: i64) -> Self {
        SqlValue::Int(value)
    }
}

impl From<i32> for SqlValue {
    fn from(value: i32) -> Self {
        SqlValue::Int(value as i64)
    }
}

impl From<f64> for SqlValue {
    fn from(value: f64) -> Self {
        SqlValue::Float(value)
    }
}

impl From<&str> for SqlValue {
    fn from(value: &str) -> Self {
        SqlValue::String(value.to_string())
    }
}

impl From<String> for SqlValue {
    fn from(value: String) -> Self {
        SqlValue::String(value)
    }
}

impl From<DateTime<Utc>> for SqlValue {
    fn from(value: DateTime<Utc>) -> Self {
        SqlValue::DateTime(value)
    }
}

impl<T: Into<SqlValue>> From<Option<T>> for SqlValue {
    fn from(value: Option<T>) -> Self {
        value.map_or(SqlValue::Null, Into::into)
    }
}

impl<T: Into<SqlValue>> From<Vec<T>> for SqlValue {
    fn from(values: Vec<T>) -> Self {
        SqlValue::List(values.into_iter().map(Into::into).collect())
    }
}
