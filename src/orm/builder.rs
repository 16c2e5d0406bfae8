//! SQL query builder
//!
//! Builds parameterized SELECT statements over one base entity plus a
//! [JoinPlan]. Values are always bound with `?` placeholders in the order the
//! fragments were added.

use sqlx::SqliteConnection;
use sqlx::sqlite::SqliteRow;

use super::error::OrmError;
use super::schema::EntityDescriptor;
use super::value::SqlValue;

/// A SQL condition plus the values bound to its placeholders.
#[derive(Debug, Clone, PartialEq)]
pub struct SqlFragment {
    pub sql: String,
    pub values: Vec<SqlValue>,
}

impl SqlFragment {
    pub fn new(sql: impl Into<String>, values: Vec<SqlValue>) -> Self {
        Self {
            sql: sql.into(),
            values,
        }
    }

    /// OR the fragments together, parenthesized when there is more than one.
    pub fn any(mut fragments: Vec<SqlFragment>) -> SqlFragment {
        match fragments.len() {
            0 => return SqlFragment::new("1=0", Vec::new()),
            1 => return fragments.remove(0),
            _ => {}
        }

        let mut values = Vec::new();
        let mut parts = Vec::with_capacity(fragments.len());
        for fragment in fragments {
            parts.push(fragment.sql);
            values.extend(fragment.values);
        }
        SqlFragment::new(format!("({})", parts.join(" OR ")), values)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JoinKind {
    Inner,
    /// Used for joins that only feed ORDER BY, so rows without a related
    /// entity are still returned.
    Left,
}

impl JoinKind {
    fn sql(&self) -> &'static str {
        match self {
            JoinKind::Inner => "INNER JOIN",
            JoinKind::Left => "LEFT JOIN",
        }
    }
}

/// One joined entity and its ON condition.
#[derive(Debug, Clone, PartialEq)]
pub struct Join {
    pub kind: JoinKind,
    pub target: &'static EntityDescriptor,
    pub condition: String,
}

impl Join {
    pub fn inner(target: &'static EntityDescriptor, condition: impl Into<String>) -> Self {
        Self {
            kind: JoinKind::Inner,
            target,
            condition: condition.into(),
        }
    }

    pub fn left(target: &'static EntityDescriptor, condition: impl Into<String>) -> Self {
        Self {
            kind: JoinKind::Left,
            target,
            condition: condition.into(),
        }
    }

    fn to_sql(&self) -> String {
        format!("{} {} ON {}", self.kind.sql(), self.target.table, self.condition)
    }
}

/// Ordered set of joins, unique by target entity.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct JoinPlan {
    joins: Vec<Join>,
}

impl JoinPlan {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a join unless its target is already joined with the same
    /// condition. An inner join upgrades an existing left join.
    pub fn add(&mut self, join: Join) -> Result<(), OrmError> {
        match self.joins.iter_mut().find(|j| j.target.model == join.target.model) {
            Some(existing) if existing.condition == join.condition => {
                if join.kind == JoinKind::Inner {
                    existing.kind = JoinKind::Inner;
                }
                Ok(())
            }
            Some(_) => Err(OrmError::ConflictingJoin {
                target: join.target.model.to_string(),
            }),
            None => {
                self.joins.push(join);
                Ok(())
            }
        }
    }

    /// Add a join only when nothing reaches its target yet.
    pub fn add_if_absent(&mut self, join: Join) {
        if !self.contains(join.target.model) {
            self.joins.push(join);
        }
    }

    pub fn contains(&self, model: &str) -> bool {
        self.joins.iter().any(|j| j.target.model == model)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Join> {
        self.joins.iter()
    }

    pub fn len(&self) -> usize {
        self.joins.len()
    }

    pub fn is_empty(&self) -> bool {
        self.joins.is_empty()
    }

    pub fn to_sql(&self) -> String {
        self.joins
            .iter()
            .map(Join::to_sql)
            .collect::<Vec<_>>()
            .join(" ")
    }
}

/// SELECT over a base entity.
#[derive(Debug, Clone)]
pub struct SelectQuery {
    base: &'static EntityDescriptor,
    columns: String,
    distinct: bool,
    joins: JoinPlan,
    where_clauses: Vec<String>,
    values: Vec<SqlValue>,
    order_by: Vec<String>,
    limit: Option<i64>,
    offset: Option<i64>,
}

impl SelectQuery {
    /// Select every declared column of the base entity.
    pub fn new(base: &'static EntityDescriptor) -> Self {
        Self {
            base,
            columns: base.select_list(),
            distinct: false,
            joins: JoinPlan::new(),
            where_clauses: Vec::new(),
            values: Vec::new(),
            order_by: Vec::new(),
            limit: None,
            offset: None,
        }
    }

    /// Replace the select list.
    pub fn columns(mut self, columns: impl Into<String>) -> Self {
        self.columns = columns.into();
        self
    }

    pub fn distinct(mut self) -> Self {
        self.distinct = true;
        self
    }

    pub fn joins(mut self, joins: JoinPlan) -> Self {
        self.joins = joins;
        self
    }

    /// Add a WHERE condition; conditions are AND'ed.
    pub fn filter(mut self, fragment: SqlFragment) -> Self {
        self.where_clauses.push(fragment.sql);
        self.values.extend(fragment.values);
        self
    }

    pub fn order_by(mut self, expression: impl Into<String>) -> Self {
        self.order_by.push(expression.into());
        self
    }

    pub fn limit(mut self, limit: i64) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn offset(mut self, offset: i64) -> Self {
        self.offset = Some(offset);
        self
    }

    /// Build the SQL query string.
    pub fn build_sql(&self) -> String {
        let mut sql = format!(
            "SELECT {}{} FROM {}",
            if self.distinct { "DISTINCT " } else { "" },
            self.columns,
            self.base.table
        );

        if !self.joins.is_empty() {
            sql.push(' ');
            sql.push_str(&self.joins.to_sql());
        }

        if !self.where_clauses.is_empty() {
            sql.push_str(" WHERE ");
            sql.push_str(&self.where_clauses.join(" AND "));
        }

        if !self.order_by.is_empty() {
            sql.push_str(" ORDER BY ");
            sql.push_str(&self.order_by.join(", "));
        }

        if let Some(limit) = self.limit {
            sql.push_str(&format!(" LIMIT {}", limit));
        }

        if let Some(offset) = self.offset
            && offset > 0
        {
            sql.push_str(&format!(" OFFSET {}", offset));
        }

        sql
    }

    pub fn values(&self) -> &[SqlValue] {
        &self.values
    }

    /// Execute the query and return the raw rows.
    pub async fn fetch_all(&self, conn: &mut SqliteConnection) -> Result<Vec<SqliteRow>, sqlx::Error> {
        let sql = self.build_sql();
        tracing::debug!(sql = %sql, params = self.values.len(), "Executing entity query");

        let mut query = sqlx::query(&sql);
        for value in &self.values {
            query = value.bind_to_query(query);
        }

        query.fetch_all(&mut *conn).await
    }
}
