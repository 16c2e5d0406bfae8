//! Entity declarations
//!
//! Static descriptors for every mapped table, collected in [REGISTRY].
//! Tables are listed parents first so schema sync creates them in
//! dependency order.

use crate::orm::{ColumnDef, EntityDescriptor, RelationDef, SchemaRegistry, SortDirection};

pub static AIRCRAFT: EntityDescriptor = EntityDescriptor {
    model: "AircraftModel",
    table: "aircrafts",
    primary_key: "name",
    unique_key: "name",
    columns: &[
        ColumnDef::text("name").primary_key(),
        ColumnDef::integer("orig_id").nullable(),
        ColumnDef::timestamp("created_at"),
        ColumnDef::timestamp("updated_at"),
    ],
    relations: &[RelationDef::has_many("flights", "FlightModel", "aircraft_name")],
};

pub static COUNTRY: EntityDescriptor = EntityDescriptor {
    model: "CountryModel",
    table: "countries",
    primary_key: "name",
    unique_key: "name",
    columns: &[
        ColumnDef::text("name").primary_key(),
        ColumnDef::text("region").nullable(),
        ColumnDef::timestamp("created_at"),
        ColumnDef::timestamp("updated_at"),
    ],
    relations: &[RelationDef::has_many("cities", "CityModel", "country_name")],
};

pub static CITY: EntityDescriptor = EntityDescriptor {
    model: "CityModel",
    table: "cities",
    primary_key: "name",
    unique_key: "name",
    columns: &[
        ColumnDef::text("name").primary_key(),
        ColumnDef::text("name_ru"),
        ColumnDef::text("timezone"),
        ColumnDef::text("country_name").references("countries", "name"),
        ColumnDef::timestamp("created_at"),
        ColumnDef::timestamp("updated_at"),
    ],
    relations: &[
        RelationDef::belongs_to("country", "CountryModel", "country_name").eager(),
        RelationDef::has_many("airports", "AirportModel", "city_name"),
    ],
};

pub static AIRPORT: EntityDescriptor = EntityDescriptor {
    model: "AirportModel",
    table: "airports",
    primary_key: "iata",
    unique_key: "iata",
    columns: &[
        ColumnDef::text("iata").primary_key(),
        ColumnDef::text("icao").nullable(),
        ColumnDef::text("code_ru").nullable(),
        ColumnDef::integer("orig_id").nullable(),
        ColumnDef::text("name"),
        ColumnDef::text("name_ru"),
        ColumnDef::real("lat").nullable(),
        ColumnDef::real("long").nullable(),
        ColumnDef::text("city_name").references("cities", "name"),
        ColumnDef::timestamp("created_at"),
        ColumnDef::timestamp("updated_at"),
    ],
    relations: &[
        RelationDef::belongs_to("city", "CityModel", "city_name").eager(),
        RelationDef::has_many("mar1_flights", "FlightModel", "mar1_iata"),
        RelationDef::has_many("mar2_flights", "FlightModel", "mar2_iata"),
        RelationDef::has_many("mar3_flights", "FlightModel", "mar3_iata"),
        RelationDef::has_many("mar4_flights", "FlightModel", "mar4_iata"),
        RelationDef::has_many("mar5_flights", "FlightModel", "mar5_iata"),
    ],
};

pub static COMPANY: EntityDescriptor = EntityDescriptor {
    model: "CompanyModel",
    table: "companies",
    primary_key: "iata",
    unique_key: "iata",
    columns: &[
        ColumnDef::text("iata").primary_key(),
        ColumnDef::text("name").nullable(),
        ColumnDef::text("url_buy").nullable(),
        ColumnDef::text("url_register").nullable(),
        ColumnDef::timestamp("created_at"),
        ColumnDef::timestamp("updated_at"),
    ],
    relations: &[RelationDef::has_many("flights", "FlightModel", "company_iata")],
};

pub static FLIGHT: EntityDescriptor = EntityDescriptor {
    model: "FlightModel",
    table: "flights",
    primary_key: "id",
    unique_key: "orig_id",
    columns: &[
        ColumnDef::integer("id").auto_increment(),
        ColumnDef::integer("orig_id").unique(),
        ColumnDef::text("mar1_iata").nullable().references("airports", "iata"),
        ColumnDef::text("mar2_iata").nullable().references("airports", "iata"),
        ColumnDef::text("mar3_iata").nullable().references("airports", "iata"),
        ColumnDef::text("mar4_iata").nullable().references("airports", "iata"),
        ColumnDef::text("mar5_iata").nullable().references("airports", "iata"),
        ColumnDef::text("aircraft_name").nullable().references("aircrafts", "name"),
        ColumnDef::text("company_iata").references("companies", "iata"),
        ColumnDef::text("number"),
        ColumnDef::text("direction"),
        ColumnDef::timestamp("date"),
        ColumnDef::integer("main_orig_id").nullable(),
        ColumnDef::integer("way_time").nullable(),
        // check-in
        ColumnDef::timestamp("chin_start").nullable(),
        ColumnDef::timestamp("chin_end").nullable(),
        ColumnDef::timestamp("chin_start_et").nullable(),
        ColumnDef::timestamp("chin_end_et").nullable(),
        ColumnDef::text("chin_id").nullable(),
        // boarding
        ColumnDef::timestamp("boarding_start").nullable(),
        ColumnDef::timestamp("boarding_end").nullable(),
        ColumnDef::text("gate_id").nullable(),
        ColumnDef::text("gate_id_prev").nullable(),
        // terminal
        ColumnDef::text("term_local").nullable(),
        ColumnDef::text("term_local_prev").nullable(),
        // baggage belt
        ColumnDef::text("bbel_id").nullable(),
        ColumnDef::text("bbel_id_prev").nullable(),
        ColumnDef::timestamp("bbel_start").nullable(),
        ColumnDef::timestamp("bbel_start_et").nullable(),
        ColumnDef::timestamp("bbel_end").nullable(),
        // schedule
        ColumnDef::timestamp("sked_local").nullable(),
        ColumnDef::timestamp("sked_other").nullable(),
        // landing / takeoff
        ColumnDef::timestamp("at_local").nullable(),
        ColumnDef::timestamp("at_local_et").nullable(),
        ColumnDef::timestamp("at_other").nullable(),
        ColumnDef::timestamp("at_other_et").nullable(),
        ColumnDef::timestamp("takeoff_et").nullable(),
        ColumnDef::timestamp("otpr").nullable(),
        ColumnDef::timestamp("prb").nullable(),
        // status
        ColumnDef::integer("status_id").nullable(),
        ColumnDef::integer("status_code").nullable(),
        ColumnDef::timestamp("created_at"),
        ColumnDef::timestamp("updated_at"),
    ],
    relations: &[
        RelationDef::belongs_to("company", "CompanyModel", "company_iata").eager(),
        RelationDef::belongs_to("aircraft", "AircraftModel", "aircraft_name").eager(),
        RelationDef::belongs_to("mar1", "AirportModel", "mar1_iata").eager(),
        RelationDef::belongs_to("mar2", "AirportModel", "mar2_iata").eager(),
        RelationDef::belongs_to("mar3", "AirportModel", "mar3_iata").eager(),
        RelationDef::belongs_to("mar4", "AirportModel", "mar4_iata").eager(),
        RelationDef::belongs_to("mar5", "AirportModel", "mar5_iata").eager(),
        RelationDef::has_many("changelog", "FlightsChangelogModel", "flight_id")
            .ordered_by(&[("created_at", SortDirection::Desc), ("id", SortDirection::Desc)]),
    ],
};

pub static FLIGHT_CHANGELOG: EntityDescriptor = EntityDescriptor {
    model: "FlightsChangelogModel",
    table: "flights_changelog",
    primary_key: "id",
    unique_key: "id",
    columns: &[
        ColumnDef::integer("id").auto_increment(),
        ColumnDef::integer("flight_id").references("flights", "id").cascade_delete(),
        ColumnDef::text("field"),
        ColumnDef::text("old_value").nullable(),
        ColumnDef::timestamp("created_at"),
    ],
    relations: &[RelationDef::belongs_to("flight", "FlightModel", "flight_id")],
};

static ENTITIES: [&EntityDescriptor; 7] = [
    &AIRCRAFT,
    &COUNTRY,
    &CITY,
    &AIRPORT,
    &COMPANY,
    &FLIGHT,
    &FLIGHT_CHANGELOG,
];

pub static REGISTRY: SchemaRegistry = SchemaRegistry::new(&ENTITIES);
