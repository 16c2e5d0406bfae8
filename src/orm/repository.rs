//! Generic repository over one entity descriptor
//!
//! A [Repository] owns no entity state: it compiles filters and orders for
//! its entity and runs them on a caller-supplied connection, so the caller
//! decides the transaction scope.
//!
//! # Example Usage
//!
//! ```rust,ignore
//! let repo = Repository::new(&REGISTRY, &AIRPORT).with_order_keys(AIRPORT_ORDER_KEYS);
//!
//! let mut tx = db.begin().await?;
//! let params = FilterParams::new().with("ilike::CityModel^name.name_ru", "%mosc%");
//! let ids = repo
//!     .fetch_ids_for_query(&mut tx, &params, Some("city_name"), SortDirection::Asc)
//!     .await?;
//! let airports = repo
//!     .fetch_by_ids(&mut tx, &ids[..10], &[], &[], Some("city_name"), SortDirection::Asc)
//!     .await?;
//! tx.commit().await?;
//! ```

use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use sqlx::SqliteConnection;

use super::builder::{JoinPlan, SelectQuery, SqlFragment};
use super::error::OrmError;
use super::filter::{FilterParams, compile};
use super::order::{OrderKey, resolve_order};
use super::record::Record;
use super::relations;
use super::schema::{EntityDescriptor, SchemaRegistry};
use super::upsert::{self, Change};
use super::value::{ColumnType, SqlValue};
use crate::db::sqlite_helpers::in_json_array_sql;

/// Order direction for sorting
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortDirection {
    /// Ascending (A-Z, 0-9, oldest-newest)
    #[default]
    Asc,
    /// Descending (Z-A, 9-0, newest-oldest)
    Desc,
}

impl SortDirection {
    pub fn to_sql(&self) -> &'static str {
        match self {
            SortDirection::Asc => "ASC",
            SortDirection::Desc => "DESC",
        }
    }
}

/// Receives the changes of an upsert inside the same transaction.
#[async_trait]
pub trait ChangelogSink: Send + Sync {
    async fn record(&self, conn: &mut SqliteConnection, changes: &[Change]) -> Result<(), OrmError>;
}

/// Data access for one entity type.
#[derive(Clone)]
pub struct Repository {
    registry: &'static SchemaRegistry,
    entity: &'static EntityDescriptor,
    order_keys: &'static [OrderKey],
    changelog: Option<Arc<dyn ChangelogSink>>,
}

impl std::fmt::Debug for Repository {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Repository")
            .field("entity", &self.entity.model)
            .field("order_keys", &self.order_keys)
            .field("changelog", &self.changelog.is_some())
            .finish()
    }
}

impl Repository {
    pub fn new(registry: &'static SchemaRegistry, entity: &'static EntityDescriptor) -> Self {
        Self {
            registry,
            entity,
            order_keys: &[],
            changelog: None,
        }
    }

    /// Public order names that map to other columns, possibly on a related entity.
    pub fn with_order_keys(mut self, order_keys: &'static [OrderKey]) -> Self {
        self.order_keys = order_keys;
        self
    }

    /// Persist upsert changes through `sink`.
    pub fn with_changelog(mut self, sink: Arc<dyn ChangelogSink>) -> Self {
        self.changelog = Some(sink);
        self
    }

    pub fn entity(&self) -> &'static EntityDescriptor {
        self.entity
    }

    /// Caller-supplied id in the representation the key column stores.
    pub fn normalize_key(&self, id: SqlValue) -> SqlValue {
        normalize_key(id, self.entity.primary_key_column().column_type)
    }

    /// Upsert a batch and hand the resulting changes to the changelog sink.
    pub async fn upsert_many(
        &self,
        conn: &mut SqliteConnection,
        records: Vec<Record>,
    ) -> Result<Vec<Change>, OrmError> {
        let changes = upsert::upsert_many(conn, self.entity, records).await?;

        match &self.changelog {
            Some(sink) if !changes.is_empty() => sink.record(conn, &changes).await?,
            Some(_) => {}
            None => {
                for change in &changes {
                    tracing::debug!(
                        entity = change.model,
                        key = ?change.unique_key,
                        field = change.field,
                        old = ?change.old_value,
                        new = ?change.new_value,
                        "Field changed"
                    );
                }
            }
        }

        Ok(changes)
    }

    /// Primary keys matching `params`, ordered and without duplicates.
    pub async fn fetch_ids_for_query(
        &self,
        conn: &mut SqliteConnection,
        params: &FilterParams,
        order_key: Option<&str>,
        direction: SortDirection,
    ) -> Result<Vec<SqlValue>, OrmError> {
        let compiled = compile(self.registry, self.entity, params)?;
        let order = resolve_order(self.registry, self.entity, order_key, direction, self.order_keys)?;

        let mut joins = compiled.joins;
        order.apply(&mut joins);

        let key_column = self.entity.primary_key_column();
        let key = self.entity.qualified(key_column.name);
        let columns = if order.column == key {
            key.clone()
        } else {
            format!("{}, {}", key, order.column)
        };

        let mut query = SelectQuery::new(self.entity).columns(columns).distinct().joins(joins);
        for condition in compiled.conditions {
            query = query.filter(condition);
        }
        for term in order.order_by() {
            query = query.order_by(term);
        }

        let rows = query.fetch_all(conn).await?;

        let mut seen = HashSet::with_capacity(rows.len());
        let mut ids = Vec::with_capacity(rows.len());
        for row in &rows {
            let id = SqlValue::decode_at(row, 0, key_column.column_type)?;
            if let Some(key) = id.as_key()
                && seen.insert(key)
            {
                ids.push(id);
            }
        }
        Ok(ids)
    }

    /// Hydrate the rows with the given primary keys.
    ///
    /// Loads `(eager ∪ include) − exclude` relations and orders the result by
    /// `order_key`. Unknown ids are skipped.
    pub async fn fetch_by_ids(
        &self,
        conn: &mut SqliteConnection,
        ids: &[SqlValue],
        include: &[&str],
        exclude: &[&str],
        order_key: Option<&str>,
        direction: SortDirection,
    ) -> Result<Vec<Record>, OrmError> {
        let relation_set = relations::relation_set(self.entity, include, exclude)?;
        let order = resolve_order(self.registry, self.entity, order_key, direction, self.order_keys)?;

        if ids.is_empty() {
            return Ok(Vec::new());
        }

        let mut joins = JoinPlan::new();
        order.apply(&mut joins);

        let key_type = self.entity.primary_key_column().column_type;
        let ids = SqlValue::List(ids.iter().cloned().map(|id| normalize_key(id, key_type)).collect());

        let mut query = SelectQuery::new(self.entity).joins(joins).filter(SqlFragment::new(
            in_json_array_sql(&self.entity.qualified(self.entity.primary_key)),
            vec![ids],
        ));
        for term in order.order_by() {
            query = query.order_by(term);
        }

        let rows = query.fetch_all(conn).await?;
        let mut records = rows
            .iter()
            .map(|row| Record::from_row(self.entity, row))
            .collect::<Result<Vec<_>, sqlx::Error>>()?;

        relations::load(conn, self.registry, self.entity, &mut records, relation_set, 0).await?;
        Ok(records)
    }

    /// One hydrated row with its default-eager relations plus `join_relations`.
    pub async fn fetch_one(
        &self,
        conn: &mut SqliteConnection,
        id: &SqlValue,
        join_relations: &[&str],
    ) -> Result<Option<Record>, OrmError> {
        let records = self
            .fetch_by_ids(conn, std::slice::from_ref(id), join_relations, &[], None, SortDirection::Asc)
            .await?;
        Ok(records.into_iter().next())
    }
}

/// Ids arrive from callers as text or integers; compare them the way the
/// key column stores them.
fn normalize_key(id: SqlValue, key_type: ColumnType) -> SqlValue {
    match (key_type, id) {
        (ColumnType::Integer, SqlValue::String(s)) => s.parse().map_or(SqlValue::String(s), SqlValue::Int),
        (key_type, id) => id.coerce(key_type),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sort_direction() {
        assert_eq!(SortDirection::default(), SortDirection::Asc);
        assert_eq!(SortDirection::Desc.to_sql(), "DESC");
        let parsed: SortDirection = serde_json::from_str("\"desc\"").unwrap();
        assert_eq!(parsed, SortDirection::Desc);
    }

    #[test]
    fn test_normalize_key() {
        assert_eq!(normalize_key("42".into(), ColumnType::Integer), SqlValue::Int(42));
        assert_eq!(normalize_key(7.into(), ColumnType::Text), SqlValue::from("7"));
        assert_eq!(normalize_key("SVO".into(), ColumnType::Text), SqlValue::from("SVO"));
    }
}
