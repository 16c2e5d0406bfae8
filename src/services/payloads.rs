//! Typed write payloads
//!
//! Incoming reference data and flight events as they arrive from the feed.
//! Field names accept the feed's alternative spellings (`id`, `code`,
//! `name_en`, `main_id`). Each payload converts into a [Record] for its
//! entity and compares by business key, so dependency sets built from a
//! batch of flights hold each airport, company or aircraft once.

use std::collections::HashSet;
use std::hash::{Hash, Hasher};

use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::db::entities::{AIRCRAFT, AIRPORT, CITY, COMPANY, COUNTRY, FLIGHT};
use crate::orm::{EntityDescriptor, Record, SqlValue};

pub static AIRPORT_IATA: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[A-Z]{3}$").expect("pattern compiles"));
pub static AIRPORT_ICAO: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[A-Z]{4}$").expect("pattern compiles"));
pub static AIRPORT_CODE_RU: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^([А-Я]{3})?$").expect("pattern compiles"));
pub static COMPANY_IATA: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[A-Z0-9]{2}$").expect("pattern compiles"));
pub static AIRPORT_IATA_LIST: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Z]{3}(,[A-Z]{3})*$").expect("pattern compiles"));
pub static COMPANY_IATA_LIST: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Z0-9]{2}(,[A-Z0-9]{2})*$").expect("pattern compiles"));
static HTTP_URL: Lazy<Regex> = Lazy::new(|| Regex::new(r"^https?://\S+$").expect("pattern compiles"));

/// A payload field failed validation
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid {entity}.{field}: '{value}' does not match {pattern}")]
pub struct PayloadError {
    pub entity: &'static str,
    pub field: &'static str,
    pub value: String,
    pub pattern: String,
}

fn check(entity: &'static str, field: &'static str, value: &str, pattern: &Regex) -> Result<(), PayloadError> {
    if pattern.is_match(value) {
        Ok(())
    } else {
        Err(PayloadError {
            entity,
            field,
            value: value.to_string(),
            pattern: pattern.as_str().to_string(),
        })
    }
}

fn check_opt(
    entity: &'static str,
    field: &'static str,
    value: Option<&str>,
    pattern: &Regex,
) -> Result<(), PayloadError> {
    value.map_or(Ok(()), |v| check(entity, field, v, pattern))
}

/// A write payload for one entity type.
pub trait Payload {
    fn entity() -> &'static EntityDescriptor;

    /// Check code formats, including those of nested payloads.
    fn validate(&self) -> Result<(), PayloadError>;

    /// Flat row for this payload's own table; nested payloads become foreign keys.
    fn to_record(&self) -> Record;
}

/// Compare and hash a payload by its business key only.
macro_rules! keyed_by {
    ($ty:ty, $key:ident) => {
        impl PartialEq for $ty {
            fn eq(&self, other: &Self) -> bool {
                self.$key == other.$key
            }
        }

        impl Eq for $ty {}

        impl Hash for $ty {
            fn hash<H: Hasher>(&self, state: &mut H) {
                self.$key.hash(state);
            }
        }
    };
}

/// Distinct items in first-seen order.
pub fn distinct<'a, T, I>(items: I) -> Vec<T>
where
    T: Eq + Hash + Clone + 'a,
    I: IntoIterator<Item = &'a T>,
{
    let mut seen = HashSet::new();
    items
        .into_iter()
        .filter(|item| seen.insert(*item))
        .cloned()
        .collect()
}

/// Flight direction relative to the home airport
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Arrival,
    Departure,
}

impl Direction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Direction::Arrival => "arrival",
            Direction::Departure => "departure",
        }
    }
}

impl From<Direction> for SqlValue {
    fn from(direction: Direction) -> Self {
        SqlValue::from(direction.as_str())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AircraftPayload {
    pub name: String,
    #[serde(default, alias = "id")]
    pub orig_id: Option<i64>,
}

keyed_by!(AircraftPayload, name);

impl Payload for AircraftPayload {
    fn entity() -> &'static EntityDescriptor {
        &AIRCRAFT
    }

    fn validate(&self) -> Result<(), PayloadError> {
        Ok(())
    }

    fn to_record(&self) -> Record {
        Record::new(&AIRCRAFT)
            .with("name", self.name.as_str())
            .with("orig_id", self.orig_id)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CountryPayload {
    pub name: String,
    #[serde(default)]
    pub region: Option<String>,
}

keyed_by!(CountryPayload, name);

impl Payload for CountryPayload {
    fn entity() -> &'static EntityDescriptor {
        &COUNTRY
    }

    fn validate(&self) -> Result<(), PayloadError> {
        Ok(())
    }

    fn to_record(&self) -> Record {
        Record::new(&COUNTRY)
            .with("name", self.name.as_str())
            .with("region", self.region.clone())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CityPayload {
    #[serde(alias = "name_en")]
    pub name: String,
    pub name_ru: String,
    pub timezone: String,
    pub country: CountryPayload,
}

keyed_by!(CityPayload, name);

impl Payload for CityPayload {
    fn entity() -> &'static EntityDescriptor {
        &CITY
    }

    fn validate(&self) -> Result<(), PayloadError> {
        self.country.validate()
    }

    fn to_record(&self) -> Record {
        Record::new(&CITY)
            .with("name", self.name.as_str())
            .with("name_ru", self.name_ru.as_str())
            .with("timezone", self.timezone.as_str())
            .with("country_name", self.country.name.as_str())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AirportPayload {
    pub iata: String,
    #[serde(default)]
    pub icao: Option<String>,
    #[serde(default)]
    pub code_ru: Option<String>,
    #[serde(default, alias = "id")]
    pub orig_id: Option<i64>,
    pub name: String,
    pub name_ru: String,
    #[serde(default)]
    pub lat: Option<f64>,
    #[serde(default)]
    pub long: Option<f64>,
    pub city: CityPayload,
}

keyed_by!(AirportPayload, iata);

impl Payload for AirportPayload {
    fn entity() -> &'static EntityDescriptor {
        &AIRPORT
    }

    fn validate(&self) -> Result<(), PayloadError> {
        check("airport", "iata", &self.iata, &AIRPORT_IATA)?;
        check_opt("airport", "icao", self.icao.as_deref(), &AIRPORT_ICAO)?;
        check_opt("airport", "code_ru", self.code_ru.as_deref(), &AIRPORT_CODE_RU)?;
        self.city.validate()
    }

    fn to_record(&self) -> Record {
        Record::new(&AIRPORT)
            .with("iata", self.iata.as_str())
            .with("icao", self.icao.clone())
            .with("code_ru", self.code_ru.clone())
            .with("orig_id", self.orig_id)
            .with("name", self.name.as_str())
            .with("name_ru", self.name_ru.as_str())
            .with("lat", self.lat)
            .with("long", self.long)
            .with("city_name", self.city.name.as_str())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompanyPayload {
    #[serde(alias = "code")]
    pub iata: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub url_buy: Option<String>,
    #[serde(default)]
    pub url_register: Option<String>,
}

keyed_by!(CompanyPayload, iata);

impl Payload for CompanyPayload {
    fn entity() -> &'static EntityDescriptor {
        &COMPANY
    }

    fn validate(&self) -> Result<(), PayloadError> {
        check("company", "iata", &self.iata, &COMPANY_IATA)?;
        check_opt("company", "url_buy", self.url_buy.as_deref(), &HTTP_URL)?;
        check_opt("company", "url_register", self.url_register.as_deref(), &HTTP_URL)
    }

    fn to_record(&self) -> Record {
        Record::new(&COMPANY)
            .with("iata", self.iata.as_str())
            .with("name", self.name.clone())
            .with("url_buy", self.url_buy.clone())
            .with("url_register", self.url_register.clone())
    }
}

/// One flight event. Route points `mar1`..`mar5` are full airport payloads.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FlightPayload {
    #[serde(alias = "id")]
    pub orig_id: i64,
    pub company: CompanyPayload,
    #[serde(default)]
    pub mar1: Option<AirportPayload>,
    #[serde(default)]
    pub mar2: Option<AirportPayload>,
    #[serde(default)]
    pub mar3: Option<AirportPayload>,
    #[serde(default)]
    pub mar4: Option<AirportPayload>,
    #[serde(default)]
    pub mar5: Option<AirportPayload>,
    pub aircraft: AircraftPayload,
    pub direction: Direction,
    pub number: String,
    pub date: DateTime<Utc>,
    #[serde(default, alias = "main_id")]
    pub main_orig_id: Option<i64>,
    #[serde(default)]
    pub way_time: Option<i64>,
    // check-in
    #[serde(default)]
    pub chin_start: Option<DateTime<Utc>>,
    #[serde(default)]
    pub chin_end: Option<DateTime<Utc>>,
    #[serde(default)]
    pub chin_start_et: Option<DateTime<Utc>>,
    #[serde(default)]
    pub chin_end_et: Option<DateTime<Utc>>,
    #[serde(default)]
    pub chin_id: Option<String>,
    // boarding
    #[serde(default)]
    pub boarding_start: Option<DateTime<Utc>>,
    #[serde(default)]
    pub boarding_end: Option<DateTime<Utc>>,
    #[serde(default)]
    pub gate_id: Option<String>,
    #[serde(default)]
    pub gate_id_prev: Option<String>,
    // terminal
    #[serde(default)]
    pub term_local: Option<String>,
    #[serde(default)]
    pub term_local_prev: Option<String>,
    // baggage belt
    #[serde(default)]
    pub bbel_id: Option<String>,
    #[serde(default)]
    pub bbel_id_prev: Option<String>,
    #[serde(default)]
    pub bbel_start: Option<DateTime<Utc>>,
    #[serde(default)]
    pub bbel_start_et: Option<DateTime<Utc>>,
    #[serde(default)]
    pub bbel_end: Option<DateTime<Utc>>,
    // schedule
    #[serde(default)]
    pub sked_local: Option<DateTime<Utc>>,
    #[serde(default)]
    pub sked_other: Option<DateTime<Utc>>,
    // landing / takeoff
    #[serde(default)]
    pub at_local: Option<DateTime<Utc>>,
    #[serde(default)]
    pub at_local_et: Option<DateTime<Utc>>,
    #[serde(default)]
    pub at_other: Option<DateTime<Utc>>,
    #[serde(default)]
    pub at_other_et: Option<DateTime<Utc>>,
    #[serde(default)]
    pub takeoff_et: Option<DateTime<Utc>>,
    #[serde(default)]
    pub otpr: Option<DateTime<Utc>>,
    #[serde(default)]
    pub prb: Option<DateTime<Utc>>,
    // status
    #[serde(default)]
    pub status_id: Option<i64>,
    #[serde(default)]
    pub status_code: Option<i64>,
}

keyed_by!(FlightPayload, orig_id);

impl FlightPayload {
    /// Route points in order, skipping empty slots.
    pub fn route(&self) -> impl Iterator<Item = &AirportPayload> {
        [&self.mar1, &self.mar2, &self.mar3, &self.mar4, &self.mar5]
            .into_iter()
            .flatten()
    }
}

impl Payload for FlightPayload {
    fn entity() -> &'static EntityDescriptor {
        &FLIGHT
    }

    fn validate(&self) -> Result<(), PayloadError> {
        self.company.validate()?;
        self.aircraft.validate()?;
        self.route().try_for_each(|airport| airport.validate())
    }

    fn to_record(&self) -> Record {
        let iata = |airport: &Option<AirportPayload>| airport.as_ref().map(|a| a.iata.clone());

        Record::new(&FLIGHT)
            .with("orig_id", self.orig_id)
            .with("mar1_iata", iata(&self.mar1))
            .with("mar2_iata", iata(&self.mar2))
            .with("mar3_iata", iata(&self.mar3))
            .with("mar4_iata", iata(&self.mar4))
            .with("mar5_iata", iata(&self.mar5))
            .with("aircraft_name", self.aircraft.name.as_str())
            .with("company_iata", self.company.iata.as_str())
            .with("number", self.number.as_str())
            .with("direction", self.direction)
            .with("date", self.date)
            .with("main_orig_id", self.main_orig_id)
            .with("way_time", self.way_time)
            .with("chin_start", self.chin_start)
            .with("chin_end", self.chin_end)
            .with("chin_start_et", self.chin_start_et)
            .with("chin_end_et", self.chin_end_et)
            .with("chin_id", self.chin_id.clone())
            .with("boarding_start", self.boarding_start)
            .with("boarding_end", self.boarding_end)
            .with("gate_id", self.gate_id.clone())
            .with("gate_id_prev", self.gate_id_prev.clone())
            .with("term_local", self.term_local.clone())
            .with("term_local_prev", self.term_local_prev.clone())
            .with("bbel_id", self.bbel_id.clone())
            .with("bbel_id_prev", self.bbel_id_prev.clone())
            .with("bbel_start", self.bbel_start)
            .with("bbel_start_et", self.bbel_start_et)
            .with("bbel_end", self.bbel_end)
            .with("sked_local", self.sked_local)
            .with("sked_other", self.sked_other)
            .with("at_local", self.at_local)
            .with("at_local_et", self.at_local_et)
            .with("at_other", self.at_other)
            .with("at_other_et", self.at_other_et)
            .with("takeoff_et", self.takeoff_et)
            .with("otpr", self.otpr)
            .with("prb", self.prb)
            .with("status_id", self.status_id)
            .with("status_code", self.status_code)
    }
}

/// Aircraft, companies and airports referenced by a batch of flights, each
/// deduplicated by business key in first-seen order.
#[derive(Debug, Clone, Default)]
pub struct FlightDependencies {
    pub aircraft: Vec<AircraftPayload>,
    pub companies: Vec<CompanyPayload>,
    pub airports: Vec<AirportPayload>,
}

impl FlightDependencies {
    pub fn collect(flights: &[FlightPayload]) -> Self {
        Self {
            aircraft: distinct(flights.iter().map(|flight| &flight.aircraft)),
            companies: distinct(flights.iter().map(|flight| &flight.company)),
            airports: distinct(flights.iter().flat_map(|flight| flight.route())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn airport_json(iata: &str) -> serde_json::Value {
        json!({
            "iata": iata,
            "id": 12,
            "name": "Sheremetyevo",
            "name_ru": "Шереметьево",
            "lat": 55.97,
            "long": 37.41,
            "city": {
                "name_en": "Moscow",
                "name_ru": "Москва",
                "timezone": "Europe/Moscow",
                "country": { "name": "Russia", "region": "Europe" }
            }
        })
    }

    #[test]
    fn test_aliases_are_accepted() {
        let airport: AirportPayload = serde_json::from_value(airport_json("SVO")).unwrap();
        assert_eq!(airport.orig_id, Some(12));
        assert_eq!(airport.city.name, "Moscow");

        let company: CompanyPayload = serde_json::from_value(json!({ "code": "SU" })).unwrap();
        assert_eq!(company.iata, "SU");
        assert_eq!(company.name, None);
    }

    #[test]
    fn test_flight_payload_to_record() {
        let flight: FlightPayload = serde_json::from_value(json!({
            "id": 501,
            "company": { "iata": "SU", "name": "Aeroflot" },
            "mar1": airport_json("SVO"),
            "mar2": airport_json("LED"),
            "aircraft": { "name": "A320" },
            "direction": "departure",
            "number": "SU 10",
            "date": "2024-03-01T10:00:00+03:00",
            "main_id": 77
        }))
        .unwrap();

        assert!(flight.validate().is_ok());
        let record = flight.to_record();
        assert_eq!(record.get("orig_id"), Some(&SqlValue::Int(501)));
        assert_eq!(record.get("mar2_iata"), Some(&SqlValue::from("LED")));
        assert_eq!(record.get("mar3_iata"), Some(&SqlValue::Null));
        assert_eq!(record.get("direction"), Some(&SqlValue::from("departure")));
        assert_eq!(record.get("main_orig_id"), Some(&SqlValue::Int(77)));
        assert_eq!(flight.route().count(), 2);
    }

    #[test]
    fn test_invalid_codes_are_rejected() {
        let mut airport: AirportPayload = serde_json::from_value(airport_json("SVO")).unwrap();
        airport.iata = "svo".into();
        let err = airport.validate().unwrap_err();
        assert_eq!(err.field, "iata");
        assert_eq!(err.value, "svo");

        airport.iata = "SVO".into();
        airport.code_ru = Some("ШРМ".into());
        assert!(airport.validate().is_ok());
        airport.code_ru = Some("SVO".into());
        assert!(airport.validate().is_err());

        let company = CompanyPayload {
            iata: "S7".into(),
            name: None,
            url_buy: Some("ftp://example.com".into()),
            url_register: None,
        };
        assert_eq!(company.validate().unwrap_err().field, "url_buy");
    }

    #[test]
    fn test_distinct_keeps_first_by_business_key() {
        let first = AircraftPayload { name: "A320".into(), orig_id: Some(1) };
        let second = AircraftPayload { name: "A320".into(), orig_id: Some(2) };
        let other = AircraftPayload { name: "B737".into(), orig_id: None };

        let items = [first, second, other];
        let unique = distinct(&items);
        assert_eq!(unique.len(), 2);
        assert_eq!(unique[0].orig_id, Some(1));
        assert_eq!(unique[1].name, "B737");
    }

    #[test]
    fn test_flight_dependencies_collapse_repeated_route_points() {
        let mut revisit = airport_json("SVO");
        revisit["name"] = json!("Sheremetyevo again");
        let flight: FlightPayload = serde_json::from_value(json!({
            "id": 502,
            "company": { "iata": "SU" },
            "mar1": airport_json("SVO"),
            "mar2": revisit,
            "aircraft": { "name": "A320" },
            "direction": "arrival",
            "number": "SU 12",
            "date": "2024-03-01T00:00:00Z"
        }))
        .unwrap();
        assert_eq!(flight.route().count(), 2);

        let dependencies = FlightDependencies::collect(std::slice::from_ref(&flight));
        assert_eq!(dependencies.airports.len(), 1);
        assert_eq!(dependencies.airports[0].name, "Sheremetyevo");
        assert_eq!(dependencies.aircraft.len(), 1);
        assert_eq!(dependencies.companies.len(), 1);
    }
}
