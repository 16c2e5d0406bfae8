//! Bulk upsert with field-level change tracking
//!
//! Incoming records are matched against stored rows by the entity's unique
//! key. Matches are diffed column by column and only changed columns are
//! written; every difference yields a [Change]. Records without a match are
//! inserted in batched multi-row INSERTs.

use std::collections::HashMap;

use serde::Serialize;
use sqlx::SqliteConnection;

use super::builder::{SelectQuery, SqlFragment};
use super::error::OrmError;
use super::record::Record;
use super::schema::{CREATED_AT, EntityDescriptor, UPDATED_AT};
use super::value::{KeyValue, SqlValue};
use crate::db::sqlite_helpers::{in_json_array_sql, now_utc, placeholders};

/// Upper bound of bound parameters per INSERT statement.
pub const MAX_BIND_PARAMS: usize = 900;

/// One field of one stored row that an upsert changed.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Change {
    pub model: &'static str,
    pub primary_key: SqlValue,
    pub unique_key: SqlValue,
    pub field: &'static str,
    pub old_value: SqlValue,
    pub new_value: SqlValue,
}

/// Upsert `records` into `entity`'s table and return the changes made to
/// existing rows.
///
/// Duplicate unique keys in the batch collapse to the last occurrence. A
/// column absent from an incoming record is left untouched.
pub async fn upsert_many(
    conn: &mut SqliteConnection,
    entity: &'static EntityDescriptor,
    records: Vec<Record>,
) -> Result<Vec<Change>, OrmError> {
    let batch = dedupe(entity, records)?;
    if batch.is_empty() {
        return Ok(Vec::new());
    }

    let keys: Vec<KeyValue> = batch.iter().map(|(key, _)| key.clone()).collect();
    let mut existing = load_existing(conn, entity, keys).await?;

    let mut changes = Vec::new();
    let mut inserts = Vec::new();
    let mut updated = 0usize;
    let now = now_utc();

    for (key, incoming) in batch {
        let Some(stored) = existing.remove(&key) else {
            inserts.push(incoming);
            continue;
        };

        let changed = diff(entity, &stored, &incoming);
        if changed.is_empty() {
            continue;
        }

        let primary_key = stored.get(entity.primary_key).cloned().unwrap_or(SqlValue::Null);
        update_row(conn, entity, &primary_key, &changed, now).await?;
        updated += 1;

        for (field, old_value, new_value) in changed {
            changes.push(Change {
                model: entity.model,
                primary_key: primary_key.clone(),
                unique_key: key.clone().into(),
                field,
                old_value,
                new_value,
            });
        }
    }

    insert_many(conn, entity, &inserts).await?;

    tracing::debug!(
        entity = entity.model,
        inserted = inserts.len(),
        updated,
        changes = changes.len(),
        "Upsert applied"
    );

    Ok(changes)
}

/// Insert records as new rows in batched multi-row statements.
///
/// Timestamp columns missing from a record are set to the current time. A
/// unique key that already exists fails the whole call with
/// [OrmError::AlreadyExists].
pub async fn insert_many(
    conn: &mut SqliteConnection,
    entity: &'static EntityDescriptor,
    records: &[Record],
) -> Result<(), OrmError> {
    if records.is_empty() {
        return Ok(());
    }

    let columns: Vec<_> = entity.insert_columns().collect();
    let names: Vec<&str> = columns.iter().map(|c| c.name).collect();
    let row_sql = format!("({})", placeholders(columns.len()));
    let rows_per_statement = (MAX_BIND_PARAMS / columns.len().max(1)).max(1);
    let now = SqlValue::DateTime(now_utc());
    let now = &now;

    for chunk in records.chunks(rows_per_statement) {
        let sql = format!(
            "INSERT INTO {} ({}) VALUES {}",
            entity.table,
            names.join(", "),
            vec![row_sql.as_str(); chunk.len()].join(", ")
        );

        let values: Vec<SqlValue> = chunk
            .iter()
            .flat_map(|record| {
                columns.iter().map(move |column| match record.get(column.name) {
                    Some(value) if !value.is_null() => value.clone().coerce(column.column_type),
                    _ if column.name == CREATED_AT || column.name == UPDATED_AT => now.clone(),
                    Some(value) => value.clone(),
                    None => SqlValue::Null,
                })
            })
            .collect();

        tracing::debug!(sql = %sql, rows = chunk.len(), "Executing batched insert");

        let mut query = sqlx::query(&sql);
        for value in &values {
            query = value.bind_to_query(query);
        }
        query
            .execute(&mut *conn)
            .await
            .map_err(|e| OrmError::from_write(entity.model, e))?;
    }

    Ok(())
}

/// Validate and normalize the batch, keeping the last record per unique key
/// at the position of its first occurrence.
fn dedupe(
    entity: &'static EntityDescriptor,
    records: Vec<Record>,
) -> Result<Vec<(KeyValue, Record)>, OrmError> {
    let mut positions: HashMap<KeyValue, usize> = HashMap::new();
    let mut batch: Vec<(KeyValue, Record)> = Vec::with_capacity(records.len());

    for mut record in records {
        for (name, value) in record.values_mut() {
            let column = entity.column(name).ok_or_else(|| OrmError::UnknownField {
                entity: entity.model.to_string(),
                field: name.to_string(),
            })?;
            *value = std::mem::replace(value, SqlValue::Null).coerce(column.column_type);
        }

        let key = record.unique_key().ok_or_else(|| OrmError::MissingUniqueKey {
            entity: entity.model.to_string(),
            key: entity.unique_key.to_string(),
        })?;

        match positions.get(&key) {
            Some(&index) => batch[index].1 = record,
            None => {
                positions.insert(key.clone(), batch.len());
                batch.push((key, record));
            }
        }
    }

    Ok(batch)
}

async fn load_existing(
    conn: &mut SqliteConnection,
    entity: &'static EntityDescriptor,
    keys: Vec<KeyValue>,
) -> Result<HashMap<KeyValue, Record>, OrmError> {
    let keys = SqlValue::List(keys.into_iter().map(SqlValue::from).collect());
    let rows = SelectQuery::new(entity)
        .filter(SqlFragment::new(
            in_json_array_sql(&entity.qualified(entity.unique_key)),
            vec![keys],
        ))
        .fetch_all(conn)
        .await?;

    let mut existing = HashMap::with_capacity(rows.len());
    for row in &rows {
        let record = Record::from_row(entity, row)?;
        if let Some(key) = record.unique_key() {
            existing.insert(key, record);
        }
    }
    Ok(existing)
}

/// Updatable columns carried by `incoming` whose value differs from `stored`.
fn diff(
    entity: &'static EntityDescriptor,
    stored: &Record,
    incoming: &Record,
) -> Vec<(&'static str, SqlValue, SqlValue)> {
    entity
        .update_columns()
        .filter_map(|column| {
            let new_value = incoming.get(column.name)?;
            let old_value = stored.get(column.name).unwrap_or(&SqlValue::Null);
            (old_value != new_value).then(|| (column.name, old_value.clone(), new_value.clone()))
        })
        .collect()
}

async fn update_row(
    conn: &mut SqliteConnection,
    entity: &'static EntityDescriptor,
    primary_key: &SqlValue,
    diff: &[(&'static str, SqlValue, SqlValue)],
    now: chrono::DateTime<chrono::Utc>,
) -> Result<(), OrmError> {
    let mut assignments: Vec<String> = diff.iter().map(|(field, _, _)| format!("{} = ?", field)).collect();
    let mut values: Vec<SqlValue> = diff.iter().map(|(_, _, new)| new.clone()).collect();

    if entity.has_column(UPDATED_AT) {
        assignments.push(format!("{} = ?", UPDATED_AT));
        values.push(SqlValue::DateTime(now));
    }
    values.push(primary_key.clone());

    let sql = format!(
        "UPDATE {} SET {} WHERE {} = ?",
        entity.table,
        assignments.join(", "),
        entity.primary_key
    );

    let mut query = sqlx::query(&sql);
    for value in &values {
        query = value.bind_to_query(query);
    }
    query
        .execute(&mut *conn)
        .await
        .map_err(|e| OrmError::from_write(entity.model, e))?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::entities::{AIRCRAFT, CITY};
    use assert_matches::assert_matches;

    #[test]
    fn test_dedupe_keeps_last_occurrence_in_first_position() {
        let records = vec![
            Record::new(&AIRCRAFT).with("name", "A320").with("orig_id", 1),
            Record::new(&AIRCRAFT).with("name", "B737").with("orig_id", 2),
            Record::new(&AIRCRAFT).with("name", "A320").with("orig_id", 3),
        ];
        let batch = dedupe(&AIRCRAFT, records).unwrap();
        assert_eq!(batch.len(), 2);
        assert_eq!(batch[0].0, KeyValue::Text("A320".into()));
        assert_eq!(batch[0].1.get("orig_id"), Some(&SqlValue::Int(3)));
    }

    #[test]
    fn test_dedupe_requires_unique_key() {
        let records = vec![Record::new(&AIRCRAFT).with("orig_id", 1)];
        assert_matches!(dedupe(&AIRCRAFT, records), Err(OrmError::MissingUniqueKey { .. }));

        let records = vec![Record::new(&AIRCRAFT).with("name", SqlValue::Null)];
        assert_matches!(dedupe(&AIRCRAFT, records), Err(OrmError::MissingUniqueKey { .. }));
    }

    #[test]
    fn test_dedupe_rejects_unknown_columns() {
        let records = vec![Record::new(&AIRCRAFT).with("name", "A320").with("seats", 180)];
        assert_matches!(dedupe(&AIRCRAFT, records), Err(OrmError::UnknownField { .. }));
    }

    #[test]
    fn test_diff_only_reports_provided_and_changed_columns() {
        let stored = Record::new(&CITY)
            .with("name", "Moscow")
            .with("name_ru", "Москва")
            .with("timezone", "Europe/Moscow")
            .with("country_name", "Russia");
        let incoming = Record::new(&CITY)
            .with("name", "Moscow")
            .with("name_ru", "Москва")
            .with("timezone", "UTC+3");

        assert_eq!(
            diff(&CITY, &stored, &incoming),
            vec![("timezone", SqlValue::from("Europe/Moscow"), SqlValue::from("UTC+3"))]
        );
    }
}
