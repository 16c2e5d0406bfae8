//! Automatic schema synchronization from entity descriptors
//!
//! - Creates missing tables from the registry, parents first
//! - Adds missing columns automatically
//! - Does NOT handle column renames or type changes (requires DB wipe)

use sqlx::SqlitePool;
use tracing::{debug, info, warn};

use crate::orm::{ColumnDef, EntityDescriptor, SchemaRegistry};

/// Result of a schema sync operation
#[derive(Debug, Default)]
pub struct SchemaSyncResult {
    pub tables_created: Vec<String>,
    pub columns_added: Vec<(String, String)>, // (table, column)
    pub errors: Vec<String>,
}

impl SchemaSyncResult {
    fn merge(&mut self, other: SchemaSyncResult) {
        self.tables_created.extend(other.tables_created);
        self.columns_added.extend(other.columns_added);
        self.errors.extend(other.errors);
    }

    pub fn is_ok(&self) -> bool {
        self.errors.is_empty()
    }
}

/// Check if a table exists in the database
async fn table_exists(pool: &SqlitePool, table_name: &str) -> Result<bool, sqlx::Error> {
    let result: Option<(String,)> =
        sqlx::query_as("SELECT name FROM sqlite_master WHERE type='table' AND name = ?")
            .bind(table_name)
            .fetch_optional(pool)
            .await?;

    Ok(result.is_some())
}

/// Get existing columns for a table
async fn get_table_columns(pool: &SqlitePool, table_name: &str) -> Result<Vec<String>, sqlx::Error> {
    let rows: Vec<(i32, String, String, i32, Option<String>, i32)> =
        sqlx::query_as(&format!("PRAGMA table_info({})", table_name))
            .fetch_all(pool)
            .await?;

    Ok(rows.into_iter().map(|(_, name, _, _, _, _)| name).collect())
}

/// Sync a single entity's table to the database
pub async fn sync_entity(
    pool: &SqlitePool,
    entity: &EntityDescriptor,
) -> Result<SchemaSyncResult, sqlx::Error> {
    let mut result = SchemaSyncResult::default();
    let table_name = entity.table;

    if !table_exists(pool, table_name).await? {
        let create_sql = entity.create_table_sql();
        debug!("Creating table {}: {}", table_name, create_sql);

        match sqlx::query(&create_sql).execute(pool).await {
            Ok(_) => {
                info!("Created table: {}", table_name);
                result.tables_created.push(table_name.to_string());
            }
            Err(e) => {
                let msg = format!("Failed to create table {}: {}", table_name, e);
                warn!("{}", msg);
                result.errors.push(msg);
            }
        }
        return Ok(result);
    }

    let existing_columns = get_table_columns(pool, table_name).await?;
    for col_def in entity.columns {
        if existing_columns.iter().any(|c| c == col_def.name) {
            continue;
        }

        let alter_sql = generate_add_column_sql(table_name, col_def);
        debug!("Adding column to {}: {}", table_name, alter_sql);

        match sqlx::query(&alter_sql).execute(pool).await {
            Ok(_) => {
                info!("Added column {}.{}", table_name, col_def.name);
                result
                    .columns_added
                    .push((table_name.to_string(), col_def.name.to_string()));
            }
            Err(e) => {
                let msg = format!("Failed to add column {}.{}: {}", table_name, col_def.name, e);
                warn!("{}", msg);
                result.errors.push(msg);
            }
        }
    }

    Ok(result)
}

/// Generate ALTER TABLE ADD COLUMN SQL
fn generate_add_column_sql(table_name: &str, col: &ColumnDef) -> String {
    let mut sql = format!(
        "ALTER TABLE {} ADD COLUMN {} {}",
        table_name,
        col.name,
        col.column_type.sql_type()
    );

    // SQLite cannot add PRIMARY KEY or UNIQUE columns, and NOT NULL needs a default
    if !col.nullable {
        let default_val = match col.column_type.sql_type() {
            "INTEGER" => "0",
            "REAL" => "0.0",
            _ => "''",
        };
        sql.push_str(&format!(" NOT NULL DEFAULT {}", default_val));
    }

    sql
}

/// Sync every registered entity table to the database.
///
/// Called at startup so that all tables exist and carry their declared columns.
pub async fn sync_all_entity_schemas(pool: &SqlitePool, registry: &SchemaRegistry) -> SchemaSyncResult {
    let mut total_result = SchemaSyncResult::default();

    for entity in registry.entities() {
        match sync_entity(pool, entity).await {
            Ok(result) => total_result.merge(result),
            Err(e) => total_result
                .errors
                .push(format!("Error syncing {}: {}", entity.model, e)),
        }
    }

    total_result
}
