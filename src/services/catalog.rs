//! Per-entity services and cascading upserts
//!
//! [Catalog] owns one [EntityService] per entity. Reads run inside a single
//! transaction so the id query and the hydration see the same snapshot.
//! Upserts of entities with dependencies write those dependencies first,
//! all in one transaction:
//!
//! - flights: aircraft, companies, airports (each once), then flights
//! - airports: cities, then airports
//! - cities: countries, then cities

use std::collections::HashMap;
use std::sync::Arc;

use serde::Deserialize;
use sqlx::SqliteConnection;
use tracing::{debug, info};

use super::ServiceError;
use super::paging::{PagedResponse, Paging};
use super::payloads::{
    AircraftPayload, AirportPayload, CityPayload, CompanyPayload, CountryPayload, FlightDependencies, FlightPayload,
    Payload, distinct,
};
use super::queries::{QueryError, QueryLimits, QuerySchema};
use crate::config::Config;
use crate::db::entities::{AIRCRAFT, AIRPORT, CITY, COMPANY, COUNTRY, FLIGHT};
use crate::db::{Database, FlightChangelogSink, REGISTRY};
use crate::orm::{
    Change, EntityDescriptor, FilterParams, OrderKey, OrmError, Record, Repository, SortDirection, SqlValue,
};

static AIRPORT_ORDER_KEYS: &[OrderKey] = &[
    OrderKey::related("city_name", "CityModel", "name"),
    OrderKey::related("city_name_ru", "CityModel", "name_ru"),
];

/// Requested sort. A missing key falls back to the entity's default order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct OrderRequest {
    #[serde(default)]
    pub order_by: Option<String>,
    #[serde(default)]
    pub direction: SortDirection,
}

impl OrderRequest {
    pub fn new(order_by: impl Into<String>, direction: SortDirection) -> Self {
        Self {
            order_by: Some(order_by.into()),
            direction,
        }
    }
}

/// Reads and writes for one entity type.
#[derive(Debug, Clone)]
pub struct EntityService {
    repository: Repository,
    /// Permitted order keys; the first is the default
    orders: &'static [&'static str],
    /// Extra relations loaded by [EntityService::get_one] on request
    detail_relations: &'static [&'static str],
    /// Keys are codes stored in upper case
    uppercase_keys: bool,
}

impl EntityService {
    pub fn new(repository: Repository, orders: &'static [&'static str]) -> Self {
        Self {
            repository,
            orders,
            detail_relations: &[],
            uppercase_keys: false,
        }
    }

    pub fn with_uppercase_keys(mut self) -> Self {
        self.uppercase_keys = true;
        self
    }

    pub fn with_detail_relations(mut self, relations: &'static [&'static str]) -> Self {
        self.detail_relations = relations;
        self
    }

    pub fn entity(&self) -> &'static EntityDescriptor {
        self.repository.entity()
    }

    pub fn repository(&self) -> &Repository {
        &self.repository
    }

    fn order_key(&self, requested: Option<&str>) -> Result<Option<&'static str>, QueryError> {
        match requested {
            None => Ok(self.orders.first().copied()),
            Some(key) => self
                .orders
                .iter()
                .find(|permitted| **permitted == key)
                .copied()
                .map(Some)
                .ok_or_else(|| QueryError::InvalidOrder {
                    entity: self.entity().model,
                    key: key.to_string(),
                }),
        }
    }

    pub async fn upsert(&self, conn: &mut SqliteConnection, records: Vec<Record>) -> Result<Vec<Change>, ServiceError> {
        Ok(self.repository.upsert_many(conn, records).await?)
    }

    /// One page of matching rows, hydrated with their default relations.
    pub async fn get_many(
        &self,
        conn: &mut SqliteConnection,
        params: &FilterParams,
        paging: &Paging,
        order: &OrderRequest,
    ) -> Result<PagedResponse<Record>, ServiceError> {
        let order_key = self.order_key(order.order_by.as_deref())?;

        let ids = self
            .repository
            .fetch_ids_for_query(conn, params, order_key, order.direction)
            .await?;
        let page = paging.get_page(&ids);
        let items = self
            .repository
            .fetch_by_ids(conn, page, &[], &[], order_key, order.direction)
            .await?;

        debug!(
            entity = self.entity().model,
            total = ids.len(),
            page = paging.page,
            returned = items.len(),
            "Fetched page"
        );

        Ok(PagedResponse::new(items, ids.len(), paging))
    }

    /// One slot per requested id, in request order; unknown ids yield `None`.
    pub async fn get_many_by_ids(
        &self,
        conn: &mut SqliteConnection,
        ids: &[SqlValue],
    ) -> Result<Vec<Option<Record>>, ServiceError> {
        let ids: Vec<SqlValue> = ids.iter().cloned().map(|id| self.key(id)).collect();
        let records = self
            .repository
            .fetch_by_ids(conn, &ids, &[], &[], None, SortDirection::Asc)
            .await?;

        let by_key: HashMap<_, _> = records
            .into_iter()
            .filter_map(|record| record.primary_key().map(|key| (key, record)))
            .collect();

        Ok(ids
            .iter()
            .map(|id| id.as_key().and_then(|key| by_key.get(&key).cloned()))
            .collect())
    }

    /// A single row with its default relations, plus the detail relations
    /// when `details` is set.
    pub async fn get_one(
        &self,
        conn: &mut SqliteConnection,
        id: &SqlValue,
        details: bool,
    ) -> Result<Option<Record>, ServiceError> {
        let relations: &[&str] = if details { self.detail_relations } else { &[] };
        Ok(self.repository.fetch_one(conn, &self.key(id.clone()), relations).await?)
    }

    /// Caller-supplied id as stored: codes upper-cased, numeric text parsed.
    fn key(&self, id: SqlValue) -> SqlValue {
        let id = match id {
            SqlValue::String(code) if self.uppercase_keys => SqlValue::String(code.to_uppercase()),
            other => other,
        };
        self.repository.normalize_key(id)
    }
}

fn validate_all<P: Payload>(items: &[P]) -> Result<(), ServiceError> {
    items.iter().try_for_each(|item| item.validate())?;
    Ok(())
}

fn records<P: Payload>(items: &[P]) -> Vec<Record> {
    items.iter().map(|item| item.to_record()).collect()
}

/// Entry point for reading and writing the flight catalog.
#[derive(Debug, Clone)]
pub struct Catalog {
    db: Database,
    limits: QueryLimits,
    page_limit_max: u32,
    aircraft: EntityService,
    countries: EntityService,
    cities: EntityService,
    airports: EntityService,
    companies: EntityService,
    flights: EntityService,
}

impl Catalog {
    pub fn new(db: Database, config: &Config) -> Self {
        Self::with_limits(db, QueryLimits::from(config), config.page_limit_max)
    }

    pub fn with_limits(db: Database, limits: QueryLimits, page_limit_max: u32) -> Self {
        let repository = |entity: &'static EntityDescriptor| Repository::new(&REGISTRY, entity);

        Self {
            db,
            limits,
            page_limit_max,
            aircraft: EntityService::new(repository(&AIRCRAFT), &["name"]),
            countries: EntityService::new(repository(&COUNTRY), &["name"]),
            cities: EntityService::new(repository(&CITY), &["name", "name_ru"]),
            airports: EntityService::new(
                repository(&AIRPORT).with_order_keys(AIRPORT_ORDER_KEYS),
                &["name", "name_ru", "iata", "city_name", "city_name_ru"],
            )
            .with_uppercase_keys(),
            companies: EntityService::new(repository(&COMPANY), &["name", "iata"]).with_uppercase_keys(),
            flights: EntityService::new(
                repository(&FLIGHT).with_changelog(Arc::new(FlightChangelogSink)),
                &["sked_local"],
            )
            .with_detail_relations(&["changelog"]),
        }
    }

    pub fn database(&self) -> &Database {
        &self.db
    }

    pub fn aircraft(&self) -> &EntityService {
        &self.aircraft
    }

    pub fn countries(&self) -> &EntityService {
        &self.countries
    }

    pub fn cities(&self) -> &EntityService {
        &self.cities
    }

    pub fn airports(&self) -> &EntityService {
        &self.airports
    }

    pub fn companies(&self) -> &EntityService {
        &self.companies
    }

    pub fn flights(&self) -> &EntityService {
        &self.flights
    }

    /// Service for a model name
    pub fn service(&self, model: &str) -> Result<&EntityService, ServiceError> {
        [
            &self.aircraft,
            &self.countries,
            &self.cities,
            &self.airports,
            &self.companies,
            &self.flights,
        ]
        .into_iter()
        .find(|service| service.entity().model == model)
        .ok_or_else(|| OrmError::UnknownEntity(model.to_string()).into())
    }

    /// Validate `query`, then return one page of matching rows.
    pub async fn list<Q: QuerySchema>(
        &self,
        query: &Q,
        paging: &Paging,
        order: &OrderRequest,
    ) -> Result<PagedResponse<Record>, ServiceError> {
        paging.validate(self.page_limit_max)?;
        let params = query.to_params(&self.limits)?;
        let service = self.service(Q::MODEL)?;

        let mut tx = self.db.begin().await?;
        let page = service.get_many(&mut tx, &params, paging, order).await?;
        tx.commit().await?;
        Ok(page)
    }

    pub async fn get_many_by_ids(&self, model: &str, ids: &[SqlValue]) -> Result<Vec<Option<Record>>, ServiceError> {
        let service = self.service(model)?;
        let mut tx = self.db.begin().await?;
        let records = service.get_many_by_ids(&mut tx, ids).await?;
        tx.commit().await?;
        Ok(records)
    }

    /// One row by id; `details` adds the service's detail relations (the
    /// changelog for flights).
    pub async fn get_one(&self, model: &str, id: &SqlValue, details: bool) -> Result<Option<Record>, ServiceError> {
        let service = self.service(model)?;
        let mut tx = self.db.begin().await?;
        let record = service.get_one(&mut tx, id, details).await?;
        tx.commit().await?;
        Ok(record)
    }

    pub async fn upsert_aircraft(&self, items: &[AircraftPayload]) -> Result<Vec<Change>, ServiceError> {
        validate_all(items)?;
        let mut tx = self.db.begin().await?;
        let changes = self.aircraft.upsert(&mut tx, records(items)).await?;
        tx.commit().await?;
        Ok(changes)
    }

    pub async fn upsert_countries(&self, items: &[CountryPayload]) -> Result<Vec<Change>, ServiceError> {
        validate_all(items)?;
        let mut tx = self.db.begin().await?;
        let changes = self.countries.upsert(&mut tx, records(items)).await?;
        tx.commit().await?;
        Ok(changes)
    }

    pub async fn upsert_companies(&self, items: &[CompanyPayload]) -> Result<Vec<Change>, ServiceError> {
        validate_all(items)?;
        let mut tx = self.db.begin().await?;
        let changes = self.companies.upsert(&mut tx, records(items)).await?;
        tx.commit().await?;
        Ok(changes)
    }

    /// Upsert cities after their countries.
    pub async fn upsert_cities(&self, items: &[CityPayload]) -> Result<Vec<Change>, ServiceError> {
        validate_all(items)?;
        let mut tx = self.db.begin().await?;
        let changes = self.cascade_cities(&mut tx, items).await?;
        tx.commit().await?;
        Ok(changes)
    }

    /// Upsert airports after their cities and countries.
    pub async fn upsert_airports(&self, items: &[AirportPayload]) -> Result<Vec<Change>, ServiceError> {
        validate_all(items)?;
        let mut tx = self.db.begin().await?;
        let changes = self.cascade_airports(&mut tx, items).await?;
        tx.commit().await?;
        Ok(changes)
    }

    /// Upsert flights together with every aircraft, company and airport they
    /// reference. Nothing is written unless the whole cascade succeeds.
    pub async fn upsert_flights(&self, items: &[FlightPayload]) -> Result<Vec<Change>, ServiceError> {
        validate_all(items)?;

        let FlightDependencies {
            aircraft,
            companies,
            airports,
        } = FlightDependencies::collect(items);

        let mut tx = self.db.begin().await?;
        let mut changes = self.aircraft.upsert(&mut tx, records(&aircraft)).await?;
        changes.extend(self.companies.upsert(&mut tx, records(&companies)).await?);
        changes.extend(self.cascade_airports(&mut tx, &airports).await?);
        changes.extend(self.flights.upsert(&mut tx, records(items)).await?);
        tx.commit().await?;

        info!(
            flights = items.len(),
            aircraft = aircraft.len(),
            companies = companies.len(),
            airports = airports.len(),
            changes = changes.len(),
            "Flight batch upserted"
        );

        Ok(changes)
    }

    async fn cascade_cities(&self, conn: &mut SqliteConnection, items: &[CityPayload]) -> Result<Vec<Change>, ServiceError> {
        let countries = distinct(items.iter().map(|city| &city.country));

        let mut changes = self.countries.upsert(conn, records(&countries)).await?;
        changes.extend(self.cities.upsert(conn, records(items)).await?);
        Ok(changes)
    }

    async fn cascade_airports(
        &self,
        conn: &mut SqliteConnection,
        items: &[AirportPayload],
    ) -> Result<Vec<Change>, ServiceError> {
        let cities = distinct(items.iter().map(|airport| &airport.city));

        let mut changes = self.cascade_cities(conn, &cities).await?;
        changes.extend(self.airports.upsert(conn, records(items)).await?);
        Ok(changes)
    }
}
