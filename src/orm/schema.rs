//! Static entity descriptors and the schema registry
//!
//! Each mapped entity type is described by an [EntityDescriptor]: its table,
//! primary key, upsert key, columns and relations. The filter compiler, the
//! ordering resolver and the repository look names up here instead of
//! inspecting types at runtime. Descriptors are `'static` data defined in
//! `crate::db::entities`.

use super::repository::SortDirection;
use super::value::ColumnType;

/// Column managed by the store on insert.
pub const CREATED_AT: &str = "created_at";
/// Column refreshed on every update.
pub const UPDATED_AT: &str = "updated_at";

/// Column definition for schema generation and row decoding.
#[derive(Debug, Clone, Copy)]
pub struct ColumnDef {
    /// Column name in the database
    pub name: &'static str,
    pub column_type: ColumnType,
    /// Whether the column can be NULL
    pub nullable: bool,
    /// Whether this is the primary key
    pub primary_key: bool,
    /// Integer primary key assigned by the store
    pub auto_increment: bool,
    /// Carries a UNIQUE constraint
    pub unique: bool,
    /// Foreign key target as (table, column)
    pub references: Option<(&'static str, &'static str)>,
    /// Rows referencing a deleted parent are removed with it
    pub cascade_delete: bool,
}

impl ColumnDef {
    const fn new(name: &'static str, column_type: ColumnType) -> Self {
        Self {
            name,
            column_type,
            nullable: false,
            primary_key: false,
            auto_increment: false,
            unique: false,
            references: None,
            cascade_delete: false,
        }
    }

    pub const fn text(name: &'static str) -> Self {
        Self::new(name, ColumnType::Text)
    }

    pub const fn integer(name: &'static str) -> Self {
        Self::new(name, ColumnType::Integer)
    }

    pub const fn real(name: &'static str) -> Self {
        Self::new(name, ColumnType::Real)
    }

    pub const fn timestamp(name: &'static str) -> Self {
        Self::new(name, ColumnType::Timestamp)
    }

    pub const fn nullable(mut self) -> Self {
        self.nullable = true;
        self
    }

    pub const fn primary_key(mut self) -> Self {
        self.primary_key = true;
        self
    }

    pub const fn auto_increment(mut self) -> Self {
        self.primary_key = true;
        self.auto_increment = true;
        self
    }

    pub const fn unique(mut self) -> Self {
        self.unique = true;
        self
    }

    pub const fn references(mut self, table: &'static str, column: &'static str) -> Self {
        self.references = Some((table, column));
        self
    }

    pub const fn cascade_delete(mut self) -> Self {
        self.cascade_delete = true;
        self
    }

    /// Parent deletion policy: cascade when asked, otherwise null out nullable
    /// references and refuse to orphan required ones.
    fn on_delete(&self) -> &'static str {
        if self.cascade_delete {
            "CASCADE"
        } else if self.nullable {
            "SET NULL"
        } else {
            "RESTRICT"
        }
    }

    /// Generate the column definition SQL
    pub fn to_sql(&self) -> String {
        let mut sql = format!("{} {}", self.name, self.column_type.sql_type());

        if self.primary_key {
            sql.push_str(" PRIMARY KEY");
            if self.auto_increment {
                sql.push_str(" AUTOINCREMENT");
            }
        }

        if !self.nullable && !self.primary_key {
            sql.push_str(" NOT NULL");
        }

        if self.unique && !self.primary_key {
            sql.push_str(" UNIQUE");
        }

        if let Some((table, column)) = self.references {
            sql.push_str(&format!(" REFERENCES {}({}) ON DELETE {}", table, column, self.on_delete()));
        }

        sql
    }
}

/// How a relation is stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelationKind {
    /// This entity holds the foreign key column `local`, pointing at the
    /// target's primary key.
    BelongsTo { local: &'static str },
    /// The target holds the foreign key column `remote`, pointing at this
    /// entity's primary key.
    HasMany { remote: &'static str },
}

/// Relation metadata, traversable by name.
#[derive(Debug, Clone, Copy)]
pub struct RelationDef {
    /// Attribute name used by include/exclude sets (e.g. "city")
    pub name: &'static str,
    /// Model name of the related entity (e.g. "CityModel")
    pub target: &'static str,
    pub kind: RelationKind,
    /// Loaded on hydration unless explicitly excluded
    pub eager: bool,
    /// Ordering applied to the related rows of a `HasMany` relation
    pub order_by: &'static [(&'static str, SortDirection)],
}

impl RelationDef {
    pub const fn belongs_to(name: &'static str, target: &'static str, local: &'static str) -> Self {
        Self {
            name,
            target,
            kind: RelationKind::BelongsTo { local },
            eager: false,
            order_by: &[],
        }
    }

    pub const fn has_many(name: &'static str, target: &'static str, remote: &'static str) -> Self {
        Self {
            name,
            target,
            kind: RelationKind::HasMany { remote },
            eager: false,
            order_by: &[],
        }
    }

    pub const fn eager(mut self) -> Self {
        self.eager = true;
        self
    }

    pub const fn ordered_by(mut self, order_by: &'static [(&'static str, SortDirection)]) -> Self {
        self.order_by = order_by;
        self
    }
}

/// Metadata about a mapped entity (table).
#[derive(Debug)]
pub struct EntityDescriptor {
    /// Model name used in aliases (e.g. "FlightModel")
    pub model: &'static str,
    /// The SQL table name (e.g. "flights")
    pub table: &'static str,
    /// The primary key column name
    pub primary_key: &'static str,
    /// Column matched by upserts; may differ from the primary key
    pub unique_key: &'static str,
    pub columns: &'static [ColumnDef],
    pub relations: &'static [RelationDef],
}

impl EntityDescriptor {
    pub fn column(&self, name: &str) -> Option<&'static ColumnDef> {
        self.columns.iter().find(|c| c.name == name)
    }

    pub fn relation(&self, name: &str) -> Option<&'static RelationDef> {
        self.relations.iter().find(|r| r.name == name)
    }

    pub fn primary_key_column(&self) -> &'static ColumnDef {
        self.column(self.primary_key)
            .unwrap_or_else(|| panic!("{} declares primary key {} without a column", self.model, self.primary_key))
    }

    /// Columns compared and written by upserts of existing rows.
    pub fn update_columns(&self) -> impl Iterator<Item = &'static ColumnDef> + '_ {
        self.columns.iter().filter(|c| {
            !c.primary_key && c.name != self.unique_key && c.name != CREATED_AT && c.name != UPDATED_AT
        })
    }

    /// Columns written by inserts; store-assigned keys are left out.
    pub fn insert_columns(&self) -> impl Iterator<Item = &'static ColumnDef> + '_ {
        self.columns.iter().filter(|c| !c.auto_increment)
    }

    pub fn has_column(&self, name: &str) -> bool {
        self.column(name).is_some()
    }

    /// Qualified column reference (e.g. "airports.iata")
    pub fn qualified(&self, column: &str) -> String {
        format!("{}.{}", self.table, column)
    }

    /// Select list of all columns, qualified and aliased back to their bare names
    pub fn select_list(&self) -> String {
        self.columns
            .iter()
            .map(|c| format!("{}.{} AS {}", self.table, c.name, c.name))
            .collect::<Vec<_>>()
            .join(", ")
    }

    /// Generate CREATE TABLE IF NOT EXISTS SQL
    pub fn create_table_sql(&self) -> String {
        let column_defs: Vec<String> = self.columns.iter().map(|c| c.to_sql()).collect();

        format!(
            "CREATE TABLE IF NOT EXISTS {} (\n  {}\n)",
            self.table,
            column_defs.join(",\n  ")
        )
    }
}

/// Descriptors are identified by model name.
impl PartialEq for EntityDescriptor {
    fn eq(&self, other: &Self) -> bool {
        self.model == other.model
    }
}

impl Eq for EntityDescriptor {}

/// Equality link between two tables: `left.left_column = right.right_column`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Link {
    pub left_column: &'static str,
    pub right_column: &'static str,
}

/// Lookup of entity descriptors by model name.
#[derive(Debug)]
pub struct SchemaRegistry {
    entities: &'static [&'static EntityDescriptor],
}

impl SchemaRegistry {
    pub const fn new(entities: &'static [&'static EntityDescriptor]) -> Self {
        Self { entities }
    }

    pub fn entities(&self) -> impl Iterator<Item = &'static EntityDescriptor> + '_ {
        self.entities.iter().copied()
    }

    pub fn by_model(&self, model: &str) -> Option<&'static EntityDescriptor> {
        self.entities().find(|e| e.model == model)
    }

    /// Every declared foreign-key link between `from` and `to`, seen from `from`.
    ///
    /// Relations are consulted on both sides, so a `BelongsTo` and its inverse
    /// `HasMany` collapse into a single link.
    pub fn links(&self, from: &EntityDescriptor, to: &EntityDescriptor) -> Vec<Link> {
        let mut links: Vec<Link> = Vec::new();
        let mut push = |link: Link| {
            if !links.contains(&link) {
                links.push(link);
            }
        };

        for relation in from.relations.iter().filter(|r| r.target == to.model) {
            match relation.kind {
                RelationKind::BelongsTo { local } => push(Link {
                    left_column: local,
                    right_column: to.primary_key,
                }),
                RelationKind::HasMany { remote } => push(Link {
                    left_column: from.primary_key,
                    right_column: remote,
                }),
            }
        }

        for relation in to.relations.iter().filter(|r| r.target == from.model) {
            match relation.kind {
                RelationKind::BelongsTo { local } => push(Link {
                    left_column: from.primary_key,
                    right_column: local,
                }),
                RelationKind::HasMany { remote } => push(Link {
                    left_column: remote,
                    right_column: to.primary_key,
                }),
            }
        }

        links
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::entities::{AIRPORT, CITY, COMPANY, COUNTRY, FLIGHT, REGISTRY};

    #[test]
    fn test_column_to_sql() {
        let column = ColumnDef::text("city_name").references("cities", "name");
        assert_eq!(
            column.to_sql(),
            "city_name TEXT NOT NULL REFERENCES cities(name) ON DELETE RESTRICT"
        );
        assert_eq!(
            ColumnDef::text("mar2_iata").nullable().references("airports", "iata").to_sql(),
            "mar2_iata TEXT REFERENCES airports(iata) ON DELETE SET NULL"
        );
        assert_eq!(
            ColumnDef::integer("flight_id").references("flights", "id").cascade_delete().to_sql(),
            "flight_id INTEGER NOT NULL REFERENCES flights(id) ON DELETE CASCADE"
        );
        assert_eq!(
            ColumnDef::integer("id").auto_increment().to_sql(),
            "id INTEGER PRIMARY KEY AUTOINCREMENT"
        );
        assert_eq!(
            ColumnDef::integer("orig_id").unique().to_sql(),
            "orig_id INTEGER NOT NULL UNIQUE"
        );
    }

    #[test]
    fn test_update_columns_skip_keys_and_timestamps() {
        let names: Vec<&str> = FLIGHT.update_columns().map(|c| c.name).collect();
        assert!(!names.contains(&"id"));
        assert!(!names.contains(&"orig_id"));
        assert!(!names.contains(&CREATED_AT));
        assert!(!names.contains(&UPDATED_AT));
        assert!(names.contains(&"gate_id"));
    }

    #[test]
    fn test_inverse_relations_collapse_into_one_link() {
        let links = REGISTRY.links(&CITY, &COUNTRY);
        assert_eq!(
            links,
            vec![Link {
                left_column: "country_name",
                right_column: "name"
            }]
        );

        let links = REGISTRY.links(&COMPANY, &FLIGHT);
        assert_eq!(links.len(), 1);
    }

    #[test]
    fn test_airport_to_flight_has_one_link_per_route_leg() {
        assert_eq!(REGISTRY.links(&AIRPORT, &FLIGHT).len(), 5);
    }

    #[test]
    fn test_registry_lookup() {
        assert_eq!(REGISTRY.by_model("CityModel").map(|e| e.table), Some("cities"));
        assert!(REGISTRY.by_model("PlaneModel").is_none());
    }
}
