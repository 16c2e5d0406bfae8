//! Filter compiler
//!
//! Turns a map of alias → value into joins plus a conjunction of predicates
//! against a base entity. Each alias is parsed, its relation chain is walked
//! through the registry, and one predicate is built per field. Fields of one
//! alias are OR'ed; aliases are AND'ed.

use super::alias::{self, Comparison, Method, ParsedAlias};
use super::builder::{Join, JoinPlan, SqlFragment};
use super::error::OrmError;
use super::schema::{EntityDescriptor, SchemaRegistry};
use super::value::{ColumnType, SqlValue};
use crate::db::sqlite_helpers::in_list_sql;
use crate::db::unicode::FOLD_FUNCTION;

/// Ordered alias → value pairs. `Null` values are skipped at compile time.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FilterParams(Vec<(String, SqlValue)>);

impl FilterParams {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, alias: impl Into<String>, value: impl Into<SqlValue>) -> Self {
        self.push(alias, value);
        self
    }

    /// Add the pair only when a value is present.
    pub fn with_opt<T: Into<SqlValue>>(self, alias: impl Into<String>, value: Option<T>) -> Self {
        match value {
            Some(value) => self.with(alias, value),
            None => self,
        }
    }

    pub fn push(&mut self, alias: impl Into<String>, value: impl Into<SqlValue>) {
        self.0.push((alias.into(), value.into()));
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &SqlValue)> {
        self.0.iter().map(|(alias, value)| (alias.as_str(), value))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl<K: Into<String>, V: Into<SqlValue>> FromIterator<(K, V)> for FilterParams {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self(iter.into_iter().map(|(k, v)| (k.into(), v.into())).collect())
    }
}

/// Output of [compile].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CompiledFilter {
    pub joins: JoinPlan,
    /// AND'ed predicates, one per non-null alias
    pub conditions: Vec<SqlFragment>,
}

/// Compile filter parameters against `base`.
pub fn compile(
    registry: &SchemaRegistry,
    base: &'static EntityDescriptor,
    params: &FilterParams,
) -> Result<CompiledFilter, OrmError> {
    let mut compiled = CompiledFilter::default();

    for (key, value) in params.iter() {
        if value.is_null() {
            continue;
        }

        let parsed = alias::parse(key)?;
        let terminal = resolve_joins(registry, base, &parsed, &mut compiled.joins)?;

        let predicates = parsed
            .fields
            .iter()
            .map(|field| {
                let column = terminal.column(field).ok_or_else(|| OrmError::UnknownField {
                    entity: terminal.model.to_string(),
                    field: field.clone(),
                })?;
                let value = coerce(value.clone(), column.column_type);
                Ok(predicate(&terminal.qualified(field), parsed.comparison, value))
            })
            .collect::<Result<Vec<_>, OrmError>>()?;

        compiled.conditions.push(SqlFragment::any(predicates));
    }

    Ok(compiled)
}

/// Walk the relation chain of an alias, adding one join per hop, and return
/// the entity the fields live on.
fn resolve_joins(
    registry: &SchemaRegistry,
    base: &'static EntityDescriptor,
    parsed: &ParsedAlias,
    joins: &mut JoinPlan,
) -> Result<&'static EntityDescriptor, OrmError> {
    let mut current = base;

    for (index, name) in parsed.relations.iter().enumerate() {
        let target = registry
            .by_model(name)
            .filter(|target| target.model != base.model)
            .ok_or_else(|| OrmError::UnknownRelation {
                entity: current.model.to_string(),
                relation: name.clone(),
            })?;

        let is_last = index + 1 == parsed.relations.len();
        let condition = if is_last && !parsed.clauses.is_empty() {
            clause_condition(base, target, &parsed.clauses)?
        } else {
            link_condition(registry, current, target)?
        };

        joins.add(Join::inner(target, condition))?;
        current = target;
    }

    Ok(current)
}

/// `base.pk = target.c1 OR base.pk = target.c2 ...`
fn clause_condition(
    base: &EntityDescriptor,
    target: &EntityDescriptor,
    clauses: &[String],
) -> Result<String, OrmError> {
    let base_key = base.qualified(base.primary_key);
    let parts = clauses
        .iter()
        .map(|clause| {
            if !target.has_column(clause) {
                return Err(OrmError::UnknownField {
                    entity: target.model.to_string(),
                    field: clause.clone(),
                });
            }
            Ok(format!("{} = {}", base_key, target.qualified(clause)))
        })
        .collect::<Result<Vec<_>, OrmError>>()?;

    Ok(if parts.len() == 1 {
        parts.join("")
    } else {
        format!("({})", parts.join(" OR "))
    })
}

/// Condition from the single declared foreign key between two entities.
pub(crate) fn link_condition(
    registry: &SchemaRegistry,
    from: &EntityDescriptor,
    to: &EntityDescriptor,
) -> Result<String, OrmError> {
    let links = registry.links(from, to);
    match links.as_slice() {
        [link] => Ok(format!(
            "{} = {}",
            from.qualified(link.left_column),
            to.qualified(link.right_column)
        )),
        [] => Err(OrmError::UnknownRelation {
            entity: from.model.to_string(),
            relation: to.model.to_string(),
        }),
        _ => Err(OrmError::AmbiguousJoin {
            from: from.model.to_string(),
            to: to.model.to_string(),
            count: links.len(),
        }),
    }
}

fn coerce(value: SqlValue, column_type: ColumnType) -> SqlValue {
    match value {
        SqlValue::List(items) => SqlValue::List(items.into_iter().map(|v| v.coerce(column_type)).collect()),
        other => other.coerce(column_type),
    }
}

fn predicate(column: &str, comparison: Comparison, value: SqlValue) -> SqlFragment {
    match comparison {
        Comparison::Equal => SqlFragment::new(format!("{} = ?", column), vec![value]),
        Comparison::Operator(op) => SqlFragment::new(format!("{} {} ?", column, op.sql()), vec![value]),
        Comparison::Method(method) => method_predicate(column, method, value),
    }
}

fn method_predicate(column: &str, method: Method, value: SqlValue) -> SqlFragment {
    let sql = match method {
        Method::In | Method::NotIn => {
            let items = match value {
                SqlValue::List(items) => items,
                other => vec![other],
            };
            let sql = in_list_sql(column, items.len(), method == Method::NotIn);
            return SqlFragment::new(sql, items);
        }
        Method::Like => format!("{} LIKE ?", column),
        Method::NotLike => format!("{} NOT LIKE ?", column),
        Method::ILike => format!("{f}({}) LIKE {f}(?)", column, f = FOLD_FUNCTION),
        Method::NotILike => format!("{f}({}) NOT LIKE {f}(?)", column, f = FOLD_FUNCTION),
        Method::StartsWith => format!("{} LIKE ? || '%'", column),
        Method::EndsWith => format!("{} LIKE '%' || ?", column),
        Method::Contains => format!("{} LIKE '%' || ? || '%'", column),
    };
    SqlFragment::new(sql, vec![value])
}
