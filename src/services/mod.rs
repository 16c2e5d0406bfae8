//! Entity services on top of the repository layer

pub mod catalog;
pub mod paging;
pub mod payloads;
pub mod queries;

use thiserror::Error;

use crate::orm::OrmError;

pub use catalog::{Catalog, EntityService, OrderRequest};
pub use paging::{PagedResponse, Paging};
pub use payloads::{
    AircraftPayload, AirportPayload, CityPayload, CompanyPayload, CountryPayload, Direction, FlightDependencies,
    FlightPayload, Payload, PayloadError,
};
pub use queries::{
    AircraftQuery, AirportQuery, CityQuery, CompanyQuery, CountryQuery, FlightQuery, QueryError, QueryLimits,
    QuerySchema, validate_query_schemas,
};

/// Errors surfaced by entity services
#[derive(Debug, Error)]
pub enum ServiceError {
    #[error(transparent)]
    Query(#[from] QueryError),

    #[error(transparent)]
    Payload(#[from] PayloadError),

    #[error(transparent)]
    Orm(#[from] OrmError),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
}
