//! Integration tests for the generic repository
//!
//! These tests run the repository against a private in-memory database:
//! - Change tracking and idempotence of upserts
//! - Filters compiled from aliases, end to end
//! - Ordering and paging over id lists
//! - Relation hydration

use assert_matches::assert_matches;
use pretty_assertions::assert_eq;

use flightboard::config::DatabaseConfig;
use flightboard::db::Database;
use flightboard::db::entities::{AIRCRAFT, AIRPORT, CITY, COUNTRY, REGISTRY};
use flightboard::orm::{
    FilterParams, Loaded, OrderKey, OrmError, Record, Repository, SortDirection, SqlValue, insert_many,
};
use flightboard::services::Paging;

async fn setup() -> Database {
    let db = Database::connect_in_memory().await.unwrap();
    db.sync_schema().await.unwrap();
    db
}

fn aircraft(name: &str, orig_id: i64) -> Record {
    Record::new(&AIRCRAFT).with("name", name).with("orig_id", orig_id)
}

fn city(name: &str, name_ru: &str, country: &str) -> Record {
    Record::new(&CITY)
        .with("name", name)
        .with("name_ru", name_ru)
        .with("timezone", "Europe/Moscow")
        .with("country_name", country)
}

fn airport(iata: &str, name: &str, city: &str) -> Record {
    Record::new(&AIRPORT)
        .with("iata", iata)
        .with("name", name)
        .with("name_ru", name)
        .with("city_name", city)
}

fn texts(ids: &[SqlValue]) -> Vec<String> {
    ids.iter().filter_map(SqlValue::to_text).collect()
}

/// Countries, cities and airports shared by the read tests
async fn seed_geography(db: &Database) {
    let mut conn = db.pool().acquire().await.unwrap();

    Repository::new(&REGISTRY, &COUNTRY)
        .upsert_many(
            &mut conn,
            vec![
                Record::new(&COUNTRY).with("name", "Russia").with("region", "Europe"),
                Record::new(&COUNTRY).with("name", "USA").with("region", "America"),
            ],
        )
        .await
        .unwrap();

    Repository::new(&REGISTRY, &CITY)
        .upsert_many(
            &mut conn,
            vec![
                city("Moscow", "Москва", "Russia"),
                city("Moscow Mills", "Москоу-Миллс", "USA"),
                city("Kazan", "Казань", "Russia"),
                city("adler", "Адлер", "Russia"),
            ],
        )
        .await
        .unwrap();

    Repository::new(&REGISTRY, &AIRPORT)
        .upsert_many(
            &mut conn,
            vec![
                airport("SVO", "Sheremetyevo", "Moscow"),
                airport("KZN", "Kazan International", "Kazan"),
                airport("AER", "Sochi", "adler"),
            ],
        )
        .await
        .unwrap();
}

// ============================================================================
// Upsert
// ============================================================================

mod upsert {
    use super::*;
    use pretty_assertions::assert_eq;

    #[tokio::test]
    async fn test_changed_field_yields_one_change() {
        let db = setup().await;
        let repo = Repository::new(&REGISTRY, &AIRCRAFT);
        let mut conn = db.pool().acquire().await.unwrap();

        let changes = repo.upsert_many(&mut conn, vec![aircraft("A320", 1)]).await.unwrap();
        assert!(changes.is_empty());

        let changes = repo.upsert_many(&mut conn, vec![aircraft("A320", 999)]).await.unwrap();
        assert_eq!(changes.len(), 1);
        let change = &changes[0];
        assert_eq!(change.model, "AircraftModel");
        assert_eq!(change.field, "orig_id");
        assert_eq!(change.unique_key, SqlValue::from("A320"));
        assert_eq!(change.old_value, SqlValue::Int(1));
        assert_eq!(change.new_value, SqlValue::Int(999));

        let stored = repo
            .fetch_one(&mut conn, &"A320".into(), &[])
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stored.get("orig_id"), Some(&SqlValue::Int(999)));
    }

    #[tokio::test]
    async fn test_repeated_upsert_is_idempotent() {
        let db = setup().await;
        let repo = Repository::new(&REGISTRY, &AIRCRAFT);
        let mut conn = db.pool().acquire().await.unwrap();

        let batch = vec![aircraft("A320", 1), aircraft("B737", 2)];
        repo.upsert_many(&mut conn, batch.clone()).await.unwrap();
        let before = repo
            .fetch_one(&mut conn, &"B737".into(), &[])
            .await
            .unwrap()
            .unwrap();

        let changes = repo.upsert_many(&mut conn, batch).await.unwrap();
        assert!(changes.is_empty());

        let after = repo
            .fetch_one(&mut conn, &"B737".into(), &[])
            .await
            .unwrap()
            .unwrap();
        assert_eq!(before.get("updated_at"), after.get("updated_at"));
    }

    #[tokio::test]
    async fn test_last_duplicate_in_batch_wins() {
        let db = setup().await;
        let repo = Repository::new(&REGISTRY, &AIRCRAFT);
        let mut conn = db.pool().acquire().await.unwrap();

        repo.upsert_many(&mut conn, vec![aircraft("A320", 1), aircraft("A320", 2)])
            .await
            .unwrap();

        let stored = repo
            .fetch_one(&mut conn, &"A320".into(), &[])
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stored.get("orig_id"), Some(&SqlValue::Int(2)));
    }

    #[tokio::test]
    async fn test_missing_unique_key_is_rejected() {
        let db = setup().await;
        let repo = Repository::new(&REGISTRY, &AIRCRAFT);
        let mut conn = db.pool().acquire().await.unwrap();

        let result = repo
            .upsert_many(&mut conn, vec![Record::new(&AIRCRAFT).with("orig_id", 5)])
            .await;
        assert_matches!(result, Err(OrmError::MissingUniqueKey { .. }));
    }

    #[tokio::test]
    async fn test_plain_insert_of_existing_key_reports_already_exists() {
        let db = setup().await;
        let mut conn = db.pool().acquire().await.unwrap();

        insert_many(&mut conn, &AIRCRAFT, &[aircraft("A320", 1)]).await.unwrap();
        let result = insert_many(&mut conn, &AIRCRAFT, &[aircraft("A320", 1)]).await;
        assert_matches!(result, Err(OrmError::AlreadyExists { .. }));
    }
}

// ============================================================================
// Filters
// ============================================================================

mod filters {
    use super::*;
    use pretty_assertions::assert_eq;

    async fn city_ids(db: &Database, params: FilterParams) -> Vec<String> {
        let mut conn = db.pool().acquire().await.unwrap();
        let ids = Repository::new(&REGISTRY, &CITY)
            .fetch_ids_for_query(&mut conn, &params, Some("name"), SortDirection::Asc)
            .await
            .unwrap();
        texts(&ids)
    }

    #[tokio::test]
    async fn test_ilike_on_name() {
        let db = setup().await;
        seed_geography(&db).await;

        let ids = city_ids(&db, FilterParams::new().with("ilike::name", "%oscow%")).await;
        assert_eq!(ids, vec!["Moscow", "Moscow Mills"]);
    }

    #[tokio::test]
    async fn test_fields_of_one_alias_are_ored() {
        let db = setup().await;
        seed_geography(&db).await;

        // matches name_ru only
        let ids = city_ids(&db, FilterParams::new().with("ilike::name.name_ru", "%Каз%")).await;
        assert_eq!(ids, vec!["Kazan"]);

        // matches name only
        let ids = city_ids(&db, FilterParams::new().with("ilike::name.name_ru", "%mills%")).await;
        assert_eq!(ids, vec!["Moscow Mills"]);
    }

    #[tokio::test]
    async fn test_ilike_folds_cyrillic_case() {
        let db = setup().await;
        seed_geography(&db).await;

        let ids = city_ids(&db, FilterParams::new().with("ilike::name.name_ru", "%москва%")).await;
        assert_eq!(ids, vec!["Moscow"]);

        let ids = city_ids(&db, FilterParams::new().with("ilike::name_ru", "%КАЗАНЬ%")).await;
        assert_eq!(ids, vec!["Kazan"]);

        let ids = city_ids(&db, FilterParams::new().with("not_ilike::name_ru", "%москв%")).await;
        assert_eq!(ids, vec!["adler", "Kazan", "Moscow Mills"]);
    }

    #[tokio::test]
    async fn test_like_is_case_sensitive_unlike_ilike() {
        let db = setup().await;
        seed_geography(&db).await;

        let ids = city_ids(&db, FilterParams::new().with("like::name", "%moscow%")).await;
        assert!(ids.is_empty());

        let ids = city_ids(&db, FilterParams::new().with("like::name", "%Moscow%")).await;
        assert_eq!(ids, vec!["Moscow", "Moscow Mills"]);

        let ids = city_ids(&db, FilterParams::new().with("ilike::name", "%moscow%")).await;
        assert_eq!(ids, vec!["Moscow", "Moscow Mills"]);

        let ids = city_ids(&db, FilterParams::new().with("contains::name", "kazan")).await;
        assert!(ids.is_empty());
        let ids = city_ids(&db, FilterParams::new().with("startswith::name", "Kaz")).await;
        assert_eq!(ids, vec!["Kazan"]);
    }

    #[tokio::test]
    async fn test_aliases_are_anded_across_relations() {
        let db = setup().await;
        seed_geography(&db).await;

        let params = FilterParams::new()
            .with("ilike::name", "%oscow%")
            .with("ilike::CountryModel^name", "%russia%");
        assert_eq!(city_ids(&db, params).await, vec!["Moscow"]);
    }

    #[tokio::test]
    async fn test_set_membership() {
        let db = setup().await;
        seed_geography(&db).await;

        let params = FilterParams::new().with("in_::name", vec!["Kazan", "adler", "Nowhere"]);
        assert_eq!(city_ids(&db, params).await, vec!["adler", "Kazan"]);

        let params = FilterParams::new().with("not_in::country_name", vec!["Russia"]);
        assert_eq!(city_ids(&db, params).await, vec!["Moscow Mills"]);
    }

    #[tokio::test]
    async fn test_unknown_field_is_a_configuration_error() {
        let db = setup().await;
        let mut conn = db.pool().acquire().await.unwrap();

        let result = Repository::new(&REGISTRY, &CITY)
            .fetch_ids_for_query(
                &mut conn,
                &FilterParams::new().with("ilike::population", "1"),
                None,
                SortDirection::Asc,
            )
            .await;
        assert_matches!(result, Err(OrmError::UnknownField { .. }));
    }
}

// ============================================================================
// Ordering, paging and hydration
// ============================================================================

mod reads {
    use super::*;
    use pretty_assertions::assert_eq;

    static AIRPORT_ORDER_KEYS: &[OrderKey] = &[OrderKey::related("city_name_ru", "CityModel", "name_ru")];

    #[tokio::test]
    async fn test_text_order_ignores_case() {
        let db = setup().await;
        seed_geography(&db).await;

        let ids = filters_all_cities(&db, SortDirection::Asc).await;
        assert_eq!(ids, vec!["adler", "Kazan", "Moscow", "Moscow Mills"]);

        let ids = filters_all_cities(&db, SortDirection::Desc).await;
        assert_eq!(ids, vec!["Moscow Mills", "Moscow", "Kazan", "adler"]);
    }

    async fn filters_all_cities(db: &Database, direction: SortDirection) -> Vec<String> {
        let mut conn = db.pool().acquire().await.unwrap();
        let ids = Repository::new(&REGISTRY, &CITY)
            .fetch_ids_for_query(&mut conn, &FilterParams::new(), Some("name"), direction)
            .await
            .unwrap();
        texts(&ids)
    }

    #[tokio::test]
    async fn test_cyrillic_order_ignores_case() {
        let db = setup().await;
        seed_geography(&db).await;
        let repo = Repository::new(&REGISTRY, &CITY);
        let mut conn = db.pool().acquire().await.unwrap();
        repo.upsert_many(
            &mut conn,
            vec![city("Bryansk", "брянск", "Russia"), city("Vologda", "Вологда", "Russia")],
        )
        .await
        .unwrap();

        let params = FilterParams::new().with("in_::name", vec!["Moscow", "Bryansk", "Vologda"]);
        let ids = repo
            .fetch_ids_for_query(&mut conn, &params, Some("name_ru"), SortDirection::Asc)
            .await
            .unwrap();
        assert_eq!(texts(&ids), vec!["Bryansk", "Vologda", "Moscow"]);

        let ids = repo
            .fetch_ids_for_query(&mut conn, &params, Some("name_ru"), SortDirection::Desc)
            .await
            .unwrap();
        assert_eq!(texts(&ids), vec!["Moscow", "Vologda", "Bryansk"]);
    }

    #[tokio::test]
    async fn test_order_by_related_column() {
        let db = setup().await;
        seed_geography(&db).await;
        let repo = Repository::new(&REGISTRY, &AIRPORT).with_order_keys(AIRPORT_ORDER_KEYS);
        let mut conn = db.pool().acquire().await.unwrap();

        let ids = repo
            .fetch_ids_for_query(&mut conn, &FilterParams::new(), Some("city_name_ru"), SortDirection::Asc)
            .await
            .unwrap();
        // Адлер, Казань, Москва
        assert_eq!(texts(&ids), vec!["AER", "KZN", "SVO"]);

        let records = repo
            .fetch_by_ids(&mut conn, &ids, &[], &[], Some("city_name_ru"), SortDirection::Desc)
            .await
            .unwrap();
        let iatas: Vec<_> = records.iter().filter_map(|r| r.get("iata")).collect();
        assert_eq!(iatas, vec![&SqlValue::from("SVO"), &SqlValue::from("KZN"), &SqlValue::from("AER")]);
    }

    #[tokio::test]
    async fn test_pages_partition_the_id_list() {
        let db = setup().await;
        seed_geography(&db).await;
        let all = filters_all_cities(&db, SortDirection::Asc).await;

        let mut paged = Vec::new();
        for page in 0..3 {
            paged.extend_from_slice(Paging::new(page, 3).get_page(&all));
        }
        assert_eq!(paged, all);
    }

    #[tokio::test]
    async fn test_eager_relations_are_nested() {
        let db = setup().await;
        seed_geography(&db).await;
        let mut conn = db.pool().acquire().await.unwrap();

        let svo = Repository::new(&REGISTRY, &AIRPORT)
            .fetch_one(&mut conn, &"SVO".into(), &[])
            .await
            .unwrap()
            .unwrap();

        let city = svo.relation("city").and_then(Loaded::one).unwrap();
        assert_eq!(city.get("name"), Some(&SqlValue::from("Moscow")));
        let country = city.relation("country").and_then(Loaded::one).unwrap();
        assert_eq!(country.get("region"), Some(&SqlValue::from("Europe")));
    }

    #[tokio::test]
    async fn test_include_and_exclude() {
        let db = setup().await;
        seed_geography(&db).await;
        let repo = Repository::new(&REGISTRY, &CITY);
        let mut conn = db.pool().acquire().await.unwrap();
        let ids = vec![SqlValue::from("Moscow"), SqlValue::from("Kazan")];

        let records = repo
            .fetch_by_ids(&mut conn, &ids, &["airports"], &["country"], Some("name"), SortDirection::Asc)
            .await
            .unwrap();
        assert_eq!(records.len(), 2);
        assert!(records[0].relation("country").is_none());
        let airports = records[0].relation("airports").map(Loaded::many).unwrap();
        assert_eq!(airports.len(), 1);
        assert_eq!(airports[0].get("iata"), Some(&SqlValue::from("KZN")));

        let overlap = repo
            .fetch_by_ids(&mut conn, &ids, &["airports"], &["airports"], None, SortDirection::Asc)
            .await;
        assert_matches!(overlap, Err(OrmError::IncludeExcludeOverlap(_)));

        let unknown = repo
            .fetch_by_ids(&mut conn, &ids, &["flights"], &[], None, SortDirection::Asc)
            .await;
        assert_matches!(unknown, Err(OrmError::UnknownRelation { .. }));
    }

    #[tokio::test]
    async fn test_unknown_ids_are_skipped() {
        let db = setup().await;
        seed_geography(&db).await;
        let mut conn = db.pool().acquire().await.unwrap();

        let records = Repository::new(&REGISTRY, &AIRPORT)
            .fetch_by_ids(&mut conn, &[SqlValue::from("XXX"), SqlValue::from("SVO")], &[], &[], None, SortDirection::Asc)
            .await
            .unwrap();
        assert_eq!(records.len(), 1);
        assert!(
            Repository::new(&REGISTRY, &AIRPORT)
                .fetch_one(&mut conn, &"XXX".into(), &[])
                .await
                .unwrap()
                .is_none()
        );
    }
}

// ============================================================================
// File-backed database
// ============================================================================

#[tokio::test]
async fn test_schema_sync_and_data_survive_reconnect() {
    let dir = tempfile::tempdir().unwrap();
    let config = DatabaseConfig {
        url: format!("sqlite:{}", dir.path().join("flightboard.db").display()),
        ..Default::default()
    };

    let db = Database::connect(&config).await.unwrap();
    let first = db.sync_schema().await.unwrap();
    assert_eq!(first.tables_created.len(), REGISTRY.entities().count());
    {
        let mut conn = db.pool().acquire().await.unwrap();
        Repository::new(&REGISTRY, &AIRCRAFT)
            .upsert_many(&mut conn, vec![aircraft("SU95", 3)])
            .await
            .unwrap();
    }
    db.pool().close().await;

    let db = Database::connect(&config).await.unwrap();
    let second = db.sync_schema().await.unwrap();
    assert!(second.tables_created.is_empty());

    let mut conn = db.pool().acquire().await.unwrap();
    let stored = Repository::new(&REGISTRY, &AIRCRAFT)
        .fetch_one(&mut conn, &"SU95".into(), &[])
        .await
        .unwrap();
    assert!(stored.is_some());

    // folding is installed on file-backed pools too
    let ids = Repository::new(&REGISTRY, &AIRCRAFT)
        .fetch_ids_for_query(&mut conn, &FilterParams::new().with("ilike::name", "su%"), None, SortDirection::Asc)
        .await
        .unwrap();
    assert_eq!(texts(&ids), vec!["SU95"]);
}
