//! Typed query schemas
//!
//! Each schema is the request-level filter for one entity. It declares the
//! alias every field maps to, normalizes values (wildcards, comma lists,
//! minute rounding) and checks the date window before handing an
//! alias → value map to the repository.

use chrono::{DateTime, TimeDelta, Timelike, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::payloads::{AIRPORT_IATA, AIRPORT_IATA_LIST, COMPANY_IATA, COMPANY_IATA_LIST, Direction};
use crate::config::Config;
use crate::orm::{FilterParams, OrmError, SchemaRegistry, SqlValue, compile};

/// Request validation failures
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum QueryError {
    #[error("date_start and date_end must both be provided")]
    IncompleteDateRange,

    #[error("date_end must not precede date_start")]
    InvertedDateRange,

    #[error("difference between date_start and date_end must be at most {max_days} days, current is {days} days")]
    DateRangeTooWide { max_days: i64, days: i64 },

    #[error("date_start and date_end must be provided if {field} is in use")]
    DateRangeRequired { field: &'static str },

    #[error("invalid {field}: '{value}'")]
    InvalidCode { field: &'static str, value: String },

    #[error("limit must be between 1 and {max}, got {limit}")]
    InvalidLimit { limit: u32, max: u32 },

    #[error("order key '{key}' is not permitted for {entity}")]
    InvalidOrder { entity: &'static str, key: String },
}

/// Bounds applied while validating queries
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueryLimits {
    /// Widest allowed `date_end - date_start`, in days
    pub max_days: i64,
}

impl Default for QueryLimits {
    fn default() -> Self {
        Self { max_days: 7 }
    }
}

impl From<&Config> for QueryLimits {
    fn from(config: &Config) -> Self {
        Self {
            max_days: config.query_max_days,
        }
    }
}

/// A request-level filter for one entity.
pub trait QuerySchema {
    /// Model name of the entity the aliases are compiled against
    const MODEL: &'static str;

    /// Every alias the schema can emit
    const ALIASES: &'static [&'static str];

    fn to_params(&self, limits: &QueryLimits) -> Result<FilterParams, QueryError>;
}

fn wildcard(value: &Option<String>) -> Option<String> {
    value.as_deref().filter(|v| !v.is_empty()).map(|v| format!("%{v}%"))
}

/// Floor to the minute, then step to the next one.
fn up_to_minute(date: DateTime<Utc>) -> DateTime<Utc> {
    let floored = date
        .with_second(0)
        .and_then(|d| d.with_nanosecond(0))
        .unwrap_or(date);
    floored + TimeDelta::minutes(1)
}

fn check_code(field: &'static str, value: Option<&str>, pattern: &Regex) -> Result<(), QueryError> {
    match value {
        Some(v) if !pattern.is_match(v) => Err(QueryError::InvalidCode {
            field,
            value: v.to_string(),
        }),
        _ => Ok(()),
    }
}

fn split_codes(value: &Option<String>) -> Option<SqlValue> {
    value
        .as_deref()
        .map(|v| SqlValue::from(v.split(',').map(str::to_string).collect::<Vec<_>>()))
}

/// When either bound is given both are required and at most
/// `limits.max_days` apart.
fn check_window(
    start: Option<DateTime<Utc>>,
    end: Option<DateTime<Utc>>,
    limits: &QueryLimits,
) -> Result<(), QueryError> {
    match (start, end) {
        (None, None) => Ok(()),
        (Some(start), Some(end)) => {
            let delta = end - start;
            if delta < TimeDelta::zero() {
                Err(QueryError::InvertedDateRange)
            } else if delta > TimeDelta::days(limits.max_days) {
                Err(QueryError::DateRangeTooWide {
                    max_days: limits.max_days,
                    days: delta.num_days(),
                })
            } else {
                Ok(())
            }
        }
        _ => Err(QueryError::IncompleteDateRange),
    }
}

/// Flight-side filters on airports and companies only make sense inside a window.
fn require_window<T>(
    field: &'static str,
    value: &Option<T>,
    start: Option<DateTime<Utc>>,
    end: Option<DateTime<Utc>>,
) -> Result<(), QueryError> {
    if value.is_some() && (start.is_none() || end.is_none()) {
        return Err(QueryError::DateRangeRequired { field });
    }
    Ok(())
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AircraftQuery {
    pub name: Option<String>,
}

impl AircraftQuery {
    const NAME: &'static str = "ilike::name";
}

impl QuerySchema for AircraftQuery {
    const MODEL: &'static str = "AircraftModel";
    const ALIASES: &'static [&'static str] = &[Self::NAME];

    fn to_params(&self, _limits: &QueryLimits) -> Result<FilterParams, QueryError> {
        Ok(FilterParams::new().with_opt(Self::NAME, wildcard(&self.name)))
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CountryQuery {
    pub region: Option<String>,
}

impl CountryQuery {
    const REGION: &'static str = "ilike::region";
}

impl QuerySchema for CountryQuery {
    const MODEL: &'static str = "CountryModel";
    const ALIASES: &'static [&'static str] = &[Self::REGION];

    fn to_params(&self, _limits: &QueryLimits) -> Result<FilterParams, QueryError> {
        Ok(FilterParams::new().with_opt(Self::REGION, wildcard(&self.region)))
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CityQuery {
    pub timezone: Option<String>,
    pub region: Option<String>,
    pub country: Option<String>,
    pub name: Option<String>,
}

impl CityQuery {
    const TIMEZONE: &'static str = "ilike::timezone";
    const REGION: &'static str = "ilike::CountryModel^region";
    const COUNTRY: &'static str = "ilike::CountryModel^name";
    const NAME: &'static str = "ilike::name.name_ru";
}

impl QuerySchema for CityQuery {
    const MODEL: &'static str = "CityModel";
    const ALIASES: &'static [&'static str] = &[Self::TIMEZONE, Self::REGION, Self::COUNTRY, Self::NAME];

    fn to_params(&self, _limits: &QueryLimits) -> Result<FilterParams, QueryError> {
        Ok(FilterParams::new()
            .with_opt(Self::TIMEZONE, wildcard(&self.timezone))
            .with_opt(Self::REGION, wildcard(&self.region))
            .with_opt(Self::COUNTRY, wildcard(&self.country))
            .with_opt(Self::NAME, wildcard(&self.name)))
    }
}

/// Airports, optionally narrowed to those served by flights in a date window.
/// Flight-side filters match airports on either end of the route.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AirportQuery {
    pub city: Option<String>,
    pub timezone: Option<String>,
    pub country: Option<String>,
    pub region: Option<String>,
    pub name: Option<String>,
    pub date_start: Option<DateTime<Utc>>,
    pub date_end: Option<DateTime<Utc>>,
    pub company: Option<String>,
    pub direction: Option<Direction>,
}

impl AirportQuery {
    const CITY: &'static str = "ilike::CityModel^name.name_ru";
    const TIMEZONE: &'static str = "ilike::CityModel^timezone";
    const COUNTRY: &'static str = "ilike::CityModel^CountryModel^name";
    const REGION: &'static str = "ilike::CityModel^CountryModel^region";
    const NAME: &'static str = "ilike::name.name_ru";
    const DATE_START: &'static str = "ge@FlightModel^mar1_iata~mar2_iata~sked_local";
    const DATE_END: &'static str = "le@FlightModel^mar1_iata~mar2_iata~sked_local";
    const COMPANY: &'static str = "eq@FlightModel^mar1_iata~mar2_iata~company_iata";
    const DIRECTION: &'static str = "eq@FlightModel^mar1_iata~mar2_iata~direction";
}

impl QuerySchema for AirportQuery {
    const MODEL: &'static str = "AirportModel";
    const ALIASES: &'static [&'static str] = &[
        Self::CITY,
        Self::TIMEZONE,
        Self::COUNTRY,
        Self::REGION,
        Self::NAME,
        Self::DATE_START,
        Self::DATE_END,
        Self::COMPANY,
        Self::DIRECTION,
    ];

    fn to_params(&self, limits: &QueryLimits) -> Result<FilterParams, QueryError> {
        check_code("company", self.company.as_deref(), &COMPANY_IATA)?;
        check_window(self.date_start, self.date_end, limits)?;
        require_window("company", &self.company, self.date_start, self.date_end)?;
        require_window("direction", &self.direction, self.date_start, self.date_end)?;

        Ok(FilterParams::new()
            .with_opt(Self::CITY, wildcard(&self.city))
            .with_opt(Self::TIMEZONE, wildcard(&self.timezone))
            .with_opt(Self::COUNTRY, wildcard(&self.country))
            .with_opt(Self::REGION, wildcard(&self.region))
            .with_opt(Self::NAME, wildcard(&self.name))
            .with_opt(Self::DATE_START, self.date_start)
            .with_opt(Self::DATE_END, self.date_end)
            .with_opt(Self::COMPANY, self.company.clone())
            .with_opt(Self::DIRECTION, self.direction))
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CompanyQuery {
    pub name: Option<String>,
    pub date_start: Option<DateTime<Utc>>,
    pub date_end: Option<DateTime<Utc>>,
    pub airport: Option<String>,
    pub direction: Option<Direction>,
}

impl CompanyQuery {
    const NAME: &'static str = "ilike::name";
    const DATE_START: &'static str = "ge@FlightModel^sked_local";
    const DATE_END: &'static str = "le@FlightModel^sked_local";
    const AIRPORT: &'static str = "eq@FlightModel^mar1_iata.mar2_iata";
    const DIRECTION: &'static str = "eq@FlightModel^direction";
}

impl QuerySchema for CompanyQuery {
    const MODEL: &'static str = "CompanyModel";
    const ALIASES: &'static [&'static str] = &[
        Self::NAME,
        Self::DATE_START,
        Self::DATE_END,
        Self::AIRPORT,
        Self::DIRECTION,
    ];

    fn to_params(&self, limits: &QueryLimits) -> Result<FilterParams, QueryError> {
        check_code("airport", self.airport.as_deref(), &AIRPORT_IATA)?;
        check_window(self.date_start, self.date_end, limits)?;
        require_window("airport", &self.airport, self.date_start, self.date_end)?;
        require_window("direction", &self.direction, self.date_start, self.date_end)?;

        Ok(FilterParams::new()
            .with_opt(Self::NAME, wildcard(&self.name))
            .with_opt(Self::DATE_START, self.date_start)
            .with_opt(Self::DATE_END, self.date_end)
            .with_opt(Self::AIRPORT, self.airport.clone())
            .with_opt(Self::DIRECTION, self.direction))
    }
}

/// Flights inside a mandatory schedule window.
///
/// `company` and `destination` accept comma-separated code lists. Both date
/// bounds are rounded up to the next whole minute.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FlightQuery {
    pub date_start: DateTime<Utc>,
    pub date_end: DateTime<Utc>,
    #[serde(default)]
    pub direction: Option<Direction>,
    #[serde(default)]
    pub company: Option<String>,
    #[serde(default)]
    pub gate_id: Option<String>,
    #[serde(default)]
    pub destination: Option<String>,
    #[serde(default)]
    pub term_local: Option<String>,
    #[serde(default)]
    pub number: Option<String>,
}

impl FlightQuery {
    const DATE_START: &'static str = "ge@sked_local";
    const DATE_END: &'static str = "le@sked_local";
    const DIRECTION: &'static str = "direction";
    const COMPANY: &'static str = "in_::CompanyModel^iata";
    const GATE_ID: &'static str = "gate_id";
    const DESTINATION: &'static str = "in_::mar1_iata.mar2_iata";
    const TERM_LOCAL: &'static str = "term_local";
    const NUMBER: &'static str = "number";

    pub fn new(date_start: DateTime<Utc>, date_end: DateTime<Utc>) -> Self {
        Self {
            date_start,
            date_end,
            direction: None,
            company: None,
            gate_id: None,
            destination: None,
            term_local: None,
            number: None,
        }
    }
}

impl QuerySchema for FlightQuery {
    const MODEL: &'static str = "FlightModel";
    const ALIASES: &'static [&'static str] = &[
        Self::DATE_START,
        Self::DATE_END,
        Self::DIRECTION,
        Self::COMPANY,
        Self::GATE_ID,
        Self::DESTINATION,
        Self::TERM_LOCAL,
        Self::NUMBER,
    ];

    fn to_params(&self, limits: &QueryLimits) -> Result<FilterParams, QueryError> {
        check_code("company", self.company.as_deref(), &COMPANY_IATA_LIST)?;
        check_code("destination", self.destination.as_deref(), &AIRPORT_IATA_LIST)?;

        let date_start = up_to_minute(self.date_start);
        let date_end = up_to_minute(self.date_end);
        check_window(Some(date_start), Some(date_end), limits)?;

        Ok(FilterParams::new()
            .with(Self::DATE_START, date_start)
            .with(Self::DATE_END, date_end)
            .with_opt(Self::DIRECTION, self.direction)
            .with_opt(Self::COMPANY, split_codes(&self.company))
            .with_opt(Self::GATE_ID, self.gate_id.clone())
            .with_opt(Self::DESTINATION, split_codes(&self.destination))
            .with_opt(Self::TERM_LOCAL, self.term_local.clone())
            .with_opt(Self::NUMBER, self.number.clone()))
    }
}

/// Compile every alias a schema can emit, all at once, against its entity.
fn validate_schema<Q: QuerySchema>(registry: &SchemaRegistry) -> Result<usize, OrmError> {
    let entity = registry
        .by_model(Q::MODEL)
        .ok_or_else(|| OrmError::UnknownEntity(Q::MODEL.to_string()))?;

    let params: FilterParams = Q::ALIASES.iter().map(|alias| (*alias, "")).collect();
    compile(registry, entity, &params)?;
    Ok(Q::ALIASES.len())
}

/// Check every declared query alias against the registry.
///
/// Run at startup so grammar and configuration errors surface before the
/// first request. Returns the number of aliases checked.
pub fn validate_query_schemas(registry: &SchemaRegistry) -> Result<usize, OrmError> {
    Ok(validate_schema::<AircraftQuery>(registry)?
        + validate_schema::<CountryQuery>(registry)?
        + validate_schema::<CityQuery>(registry)?
        + validate_schema::<AirportQuery>(registry)?
        + validate_schema::<CompanyQuery>(registry)?
        + validate_schema::<FlightQuery>(registry)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::REGISTRY;
    use assert_matches::assert_matches;
    use chrono::TimeZone;
    use pretty_assertions::assert_eq;

    fn at(day: u32, hour: u32, minute: u32, second: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, day, hour, minute, second).unwrap()
    }

    fn value<'a>(params: &'a FilterParams, alias: &str) -> Option<&'a SqlValue> {
        params.iter().find(|(key, _)| *key == alias).map(|(_, value)| value)
    }

    #[test]
    fn test_declared_aliases_compile() {
        assert_eq!(validate_query_schemas(&REGISTRY).unwrap(), 1 + 1 + 4 + 9 + 5 + 8);
    }

    #[test]
    fn test_wildcards_added_to_text_filters() {
        let query = CityQuery {
            name: Some("mosc".into()),
            country: Some(String::new()),
            ..Default::default()
        };
        let params = query.to_params(&QueryLimits::default()).unwrap();
        assert_eq!(params.len(), 1);
        assert_eq!(value(&params, "ilike::name.name_ru"), Some(&SqlValue::from("%mosc%")));
    }

    #[test]
    fn test_flight_dates_round_up_to_next_minute() {
        let mut query = FlightQuery::new(at(1, 10, 0, 30), at(1, 12, 5, 0));
        query.company = Some("SU,S7".into());

        let params = query.to_params(&QueryLimits::default()).unwrap();
        assert_eq!(value(&params, "ge@sked_local"), Some(&SqlValue::from(at(1, 10, 1, 0))));
        assert_eq!(value(&params, "le@sked_local"), Some(&SqlValue::from(at(1, 12, 6, 0))));
        assert_eq!(
            value(&params, "in_::CompanyModel^iata"),
            Some(&SqlValue::from(vec!["SU", "S7"]))
        );
    }

    #[test]
    fn test_flight_code_lists_are_checked() {
        let mut query = FlightQuery::new(at(1, 0, 0, 0), at(2, 0, 0, 0));
        query.destination = Some("SVO,led".into());
        assert_matches!(
            query.to_params(&QueryLimits::default()),
            Err(QueryError::InvalidCode { field: "destination", .. })
        );
    }

    #[test]
    fn test_date_window_limits() {
        let limits = QueryLimits { max_days: 7 };
        assert_matches!(
            FlightQuery::new(at(1, 0, 0, 0), at(9, 0, 0, 0)).to_params(&limits),
            Err(QueryError::DateRangeTooWide { max_days: 7, days: 8 })
        );
        assert_matches!(
            FlightQuery::new(at(2, 0, 0, 0), at(1, 0, 0, 0)).to_params(&limits),
            Err(QueryError::InvertedDateRange)
        );
        assert!(FlightQuery::new(at(1, 0, 0, 0), at(8, 0, 0, 0)).to_params(&limits).is_ok());

        let half_open = AirportQuery {
            date_start: Some(at(1, 0, 0, 0)),
            ..Default::default()
        };
        assert_matches!(half_open.to_params(&limits), Err(QueryError::IncompleteDateRange));
    }

    #[test]
    fn test_flight_side_filters_require_window() {
        let limits = QueryLimits::default();

        let airports = AirportQuery {
            company: Some("SU".into()),
            ..Default::default()
        };
        assert_matches!(
            airports.to_params(&limits),
            Err(QueryError::DateRangeRequired { field: "company" })
        );

        let companies = CompanyQuery {
            direction: Some(Direction::Arrival),
            ..Default::default()
        };
        assert_matches!(
            companies.to_params(&limits),
            Err(QueryError::DateRangeRequired { field: "direction" })
        );

        let companies = CompanyQuery {
            airport: Some("SVO".into()),
            date_start: Some(at(1, 0, 0, 0)),
            date_end: Some(at(2, 0, 0, 0)),
            ..Default::default()
        };
        let params = companies.to_params(&limits).unwrap();
        assert_eq!(
            value(&params, "eq@FlightModel^mar1_iata.mar2_iata"),
            Some(&SqlValue::from("SVO"))
        );
    }
}
