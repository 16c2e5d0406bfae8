//! Generic data-access engine
//!
//! Entities are described by static [EntityDescriptor]s. Filters are given as
//! alias strings (see [alias]) and compiled into joins and predicates
//! ([filter]); orders resolve through [order]; writes go through the
//! change-tracking upsert in [upsert]. [Repository] ties these together for
//! one entity type.

pub mod alias;
pub mod builder;
pub mod error;
pub mod filter;
pub mod order;
pub mod record;
pub mod relations;
pub mod repository;
pub mod schema;
pub mod upsert;
pub mod value;

pub use alias::{AliasError, Comparison, Method, Operator, ParsedAlias};
pub use builder::{Join, JoinKind, JoinPlan, SelectQuery, SqlFragment};
pub use error::OrmError;
pub use filter::{CompiledFilter, FilterParams, compile};
pub use order::{OrderKey, ResolvedOrder, resolve_order};
pub use record::{Loaded, Record};
pub use repository::{ChangelogSink, Repository, SortDirection};
pub use schema::{
    ColumnDef, EntityDescriptor, Link, RelationDef, RelationKind, SchemaRegistry, CREATED_AT, UPDATED_AT,
};
pub use upsert::{Change, MAX_BIND_PARAMS, insert_many, upsert_many};
pub use value::{ColumnType, KeyValue, SqlValue};
