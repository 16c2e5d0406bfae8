use thiserror::Error;

use super::alias::AliasError;

/// Errors raised by the query compiler and the repository.
#[derive(Debug, Error)]
pub enum OrmError {
    #[error(transparent)]
    Alias(#[from] AliasError),

    #[error("unknown entity '{0}'")]
    UnknownEntity(String),

    #[error("{entity} has no relation '{relation}'")]
    UnknownRelation { entity: String, relation: String },

    #[error("{entity} has no field '{field}'")]
    UnknownField { entity: String, field: String },

    #[error("{from} links to {to} through {count} foreign keys; name the join columns")]
    AmbiguousJoin { from: String, to: String, count: usize },

    #[error("{target} is joined twice with different conditions")]
    ConflictingJoin { target: String },

    #[error("relations {0:?} are both included and excluded")]
    IncludeExcludeOverlap(Vec<String>),

    #[error("{entity} already exists: {detail}")]
    AlreadyExists { entity: String, detail: String },

    #[error("{entity} record has no value for unique key '{key}'")]
    MissingUniqueKey { entity: String, key: String },

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

impl OrmError {
    /// Turn a failed write into `AlreadyExists` when the store reports a
    /// uniqueness violation.
    pub fn from_write(entity: &str, err: sqlx::Error) -> Self {
        if let sqlx::Error::Database(db_err) = &err
            && db_err.is_unique_violation()
        {
            tracing::warn!(entity = %entity, error = %db_err, "Unique constraint violated");
            return OrmError::AlreadyExists {
                entity: entity.to_string(),
                detail: db_err.message().to_string(),
            };
        }
        OrmError::Database(err)
    }
}
