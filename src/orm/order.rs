//! Ordering resolver
//!
//! Maps a public order key to a sortable column, on the base entity or on a
//! directly related one, together with the join the sort needs.

use super::builder::{Join, JoinPlan};
use super::error::OrmError;
use super::filter::link_condition;
use super::repository::SortDirection;
use super::schema::{EntityDescriptor, SchemaRegistry};
use crate::db::unicode::NOCASE_COLLATION;

/// Public order name bound to a column, optionally on a related entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OrderKey {
    pub name: &'static str,
    /// Model name of a directly related entity
    pub relation: Option<&'static str>,
    pub column: &'static str,
}

impl OrderKey {
    pub const fn local(name: &'static str, column: &'static str) -> Self {
        Self {
            name,
            relation: None,
            column,
        }
    }

    pub const fn related(name: &'static str, relation: &'static str, column: &'static str) -> Self {
        Self {
            name,
            relation: Some(relation),
            column,
        }
    }
}

/// A resolved sort: the column expression, direction and supporting join.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedOrder {
    /// Qualified column, e.g. `cities.name`
    pub column: String,
    /// Compare case-insensitively
    pub nocase: bool,
    pub direction: SortDirection,
    pub join: Option<Join>,
    /// Base primary key, when the sort column is something else
    pub tie_breaker: Option<String>,
}

impl ResolvedOrder {
    /// ORDER BY terms, primary sort first.
    pub fn order_by(&self) -> Vec<String> {
        let mut terms = vec![if self.nocase {
            format!("{} COLLATE {} {}", self.column, NOCASE_COLLATION, self.direction.to_sql())
        } else {
            format!("{} {}", self.column, self.direction.to_sql())
        }];
        if let Some(tie_breaker) = &self.tie_breaker {
            terms.push(format!("{} ASC", tie_breaker));
        }
        terms
    }

    /// Add the sort join unless the plan already reaches its target.
    pub fn apply(&self, joins: &mut JoinPlan) {
        if let Some(join) = &self.join {
            joins.add_if_absent(join.clone());
        }
    }
}

/// Resolve `order_key` against `base`.
///
/// A missing key sorts by the primary key. Keys listed in `order_keys` map to
/// their declared column; anything else must be a column of `base`.
pub fn resolve_order(
    registry: &SchemaRegistry,
    base: &'static EntityDescriptor,
    order_key: Option<&str>,
    direction: SortDirection,
    order_keys: &[OrderKey],
) -> Result<ResolvedOrder, OrmError> {
    let Some(key) = order_key else {
        return local_order(base, base.primary_key, direction);
    };

    let Some(mapped) = order_keys.iter().find(|k| k.name == key) else {
        return local_order(base, key, direction);
    };

    let Some(relation) = mapped.relation else {
        return local_order(base, mapped.column, direction);
    };

    let target = registry
        .by_model(relation)
        .ok_or_else(|| OrmError::UnknownRelation {
            entity: base.model.to_string(),
            relation: relation.to_string(),
        })?;
    let column = target.column(mapped.column).ok_or_else(|| OrmError::UnknownField {
        entity: target.model.to_string(),
        field: mapped.column.to_string(),
    })?;
    let condition = link_condition(registry, base, target)?;

    Ok(ResolvedOrder {
        column: target.qualified(column.name),
        nocase: column.column_type.is_textual(),
        direction,
        join: Some(Join::left(target, condition)),
        tie_breaker: Some(base.qualified(base.primary_key)),
    })
}

fn local_order(
    base: &'static EntityDescriptor,
    field: &str,
    direction: SortDirection,
) -> Result<ResolvedOrder, OrmError> {
    let column = base.column(field).ok_or_else(|| OrmError::UnknownField {
        entity: base.model.to_string(),
        field: field.to_string(),
    })?;

    Ok(ResolvedOrder {
        column: base.qualified(column.name),
        nocase: column.column_type.is_textual(),
        direction,
        join: None,
        tie_breaker: (column.name != base.primary_key).then(|| base.qualified(base.primary_key)),
    })
}
