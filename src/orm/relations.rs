//! Relation hydration
//!
//! Relations are loaded per batch of parent records with one query per
//! relation, then attached to every parent. Default-eager relations of the
//! loaded records are loaded the same way, down to [MAX_DEPTH].

use std::collections::{BTreeSet, HashMap};

use futures::future::{BoxFuture, FutureExt};
use sqlx::SqliteConnection;

use super::builder::{SelectQuery, SqlFragment};
use super::error::OrmError;
use super::record::{Loaded, Record};
use super::schema::{EntityDescriptor, RelationDef, RelationKind, SchemaRegistry};
use super::value::{KeyValue, SqlValue};
use crate::db::sqlite_helpers::in_json_array_sql;

/// Nesting limit for default-eager relations.
pub const MAX_DEPTH: usize = 4;

/// Resolve the relation set `(eager ∪ include) − exclude` for an entity.
pub fn relation_set(
    entity: &'static EntityDescriptor,
    include: &[&str],
    exclude: &[&str],
) -> Result<Vec<&'static RelationDef>, OrmError> {
    let overlap: Vec<String> = include
        .iter()
        .filter(|name| exclude.contains(name))
        .map(|name| name.to_string())
        .collect();
    if !overlap.is_empty() {
        return Err(OrmError::IncludeExcludeOverlap(overlap));
    }

    for name in include.iter().chain(exclude) {
        if entity.relation(name).is_none() {
            return Err(OrmError::UnknownRelation {
                entity: entity.model.to_string(),
                relation: name.to_string(),
            });
        }
    }

    Ok(entity
        .relations
        .iter()
        .filter(|r| (r.eager || include.contains(&r.name)) && !exclude.contains(&r.name))
        .collect())
}

/// Load `relations` onto every record of `records`.
pub fn load<'a>(
    conn: &'a mut SqliteConnection,
    registry: &'static SchemaRegistry,
    entity: &'static EntityDescriptor,
    records: &'a mut [Record],
    relations: Vec<&'static RelationDef>,
    depth: usize,
) -> BoxFuture<'a, Result<(), OrmError>> {
    async move {
        if records.is_empty() || depth >= MAX_DEPTH {
            return Ok(());
        }

        for relation in relations {
            let target = registry
                .by_model(relation.target)
                .ok_or_else(|| OrmError::UnknownEntity(relation.target.to_string()))?;

            match relation.kind {
                RelationKind::BelongsTo { local } => {
                    load_belongs_to(conn, registry, relation, target, local, records, depth).await?
                }
                RelationKind::HasMany { remote } => {
                    load_has_many(conn, registry, entity, relation, target, remote, records, depth).await?
                }
            }
        }

        Ok(())
    }
    .boxed()
}

async fn load_belongs_to(
    conn: &mut SqliteConnection,
    registry: &'static SchemaRegistry,
    relation: &'static RelationDef,
    target: &'static EntityDescriptor,
    local: &'static str,
    records: &mut [Record],
    depth: usize,
) -> Result<(), OrmError> {
    let keys: BTreeSet<KeyValue> = records
        .iter()
        .filter_map(|r| r.get(local).and_then(SqlValue::as_key))
        .collect();

    let mut targets = fetch_where_in(conn, target, target.primary_key, keys, &[]).await?;
    load(conn, registry, target, &mut targets, eager_of(target), depth + 1).await?;

    let by_key: HashMap<KeyValue, Record> = targets
        .into_iter()
        .filter_map(|t| t.primary_key().map(|k| (k, t)))
        .collect();

    for record in records.iter_mut() {
        let related = record
            .get(local)
            .and_then(SqlValue::as_key)
            .and_then(|key| by_key.get(&key))
            .cloned()
            .map(Box::new);
        record.set_relation(relation.name, Loaded::One(related));
    }

    Ok(())
}

#[allow(clippy::too_many_arguments)]
async fn load_has_many(
    conn: &mut SqliteConnection,
    registry: &'static SchemaRegistry,
    entity: &'static EntityDescriptor,
    relation: &'static RelationDef,
    target: &'static EntityDescriptor,
    remote: &'static str,
    records: &mut [Record],
    depth: usize,
) -> Result<(), OrmError> {
    let keys: BTreeSet<KeyValue> = records.iter().filter_map(Record::primary_key).collect();

    let order_by: Vec<String> = relation
        .order_by
        .iter()
        .map(|(column, direction)| format!("{} {}", target.qualified(column), direction.to_sql()))
        .collect();

    let mut children = fetch_where_in(conn, target, remote, keys, &order_by).await?;
    load(conn, registry, target, &mut children, eager_of(target), depth + 1).await?;

    let mut grouped: HashMap<KeyValue, Vec<Record>> = HashMap::new();
    for child in children {
        if let Some(key) = child.get(remote).and_then(SqlValue::as_key) {
            grouped.entry(key).or_default().push(child);
        }
    }

    for record in records.iter_mut() {
        let related = record
            .get(entity.primary_key)
            .and_then(SqlValue::as_key)
            .and_then(|key| grouped.get(&key))
            .cloned()
            .unwrap_or_default();
        record.set_relation(relation.name, Loaded::Many(related));
    }

    Ok(())
}

fn eager_of(entity: &'static EntityDescriptor) -> Vec<&'static RelationDef> {
    entity.relations.iter().filter(|r| r.eager).collect()
}

async fn fetch_where_in(
    conn: &mut SqliteConnection,
    entity: &'static EntityDescriptor,
    column: &str,
    keys: BTreeSet<KeyValue>,
    order_by: &[String],
) -> Result<Vec<Record>, OrmError> {
    if keys.is_empty() {
        return Ok(Vec::new());
    }

    let keys = SqlValue::List(keys.into_iter().map(SqlValue::from).collect());
    let mut query = SelectQuery::new(entity).filter(SqlFragment::new(
        in_json_array_sql(&entity.qualified(column)),
        vec![keys],
    ));
    for term in order_by {
        query = query.order_by(term.clone());
    }

    let rows = query.fetch_all(conn).await?;
    rows.iter()
        .map(|row| Record::from_row(entity, row).map_err(OrmError::from))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::entities::{AIRPORT, CITY, FLIGHT};
    use assert_matches::assert_matches;

    fn names(relations: &[&RelationDef]) -> Vec<&'static str> {
        relations.iter().map(|r| r.name).collect()
    }

    #[test]
    fn test_eager_relations_by_default() {
        assert_eq!(names(&relation_set(&CITY, &[], &[]).unwrap()), vec!["country"]);
    }

    #[test]
    fn test_include_and_exclude() {
        let set = relation_set(&CITY, &["airports"], &["country"]).unwrap();
        assert_eq!(names(&set), vec!["airports"]);

        let set = relation_set(&FLIGHT, &["changelog"], &["mar3", "mar4", "mar5"]).unwrap();
        assert!(names(&set).contains(&"changelog"));
        assert!(!names(&set).contains(&"mar3"));
    }

    #[test]
    fn test_overlap_is_rejected() {
        assert_matches!(
            relation_set(&AIRPORT, &["city"], &["city"]),
            Err(OrmError::IncludeExcludeOverlap(names)) if names == vec!["city".to_string()]
        );
    }

    #[test]
    fn test_unknown_relation_name() {
        assert_matches!(
            relation_set(&AIRPORT, &["runways"], &[]),
            Err(OrmError::UnknownRelation { .. })
        );
    }
}
