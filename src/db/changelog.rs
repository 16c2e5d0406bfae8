//! Persisted flight change history

use async_trait::async_trait;
use sqlx::SqliteConnection;

use super::entities::FLIGHT_CHANGELOG;
use crate::orm::{Change, ChangelogSink, OrmError, Record, insert_many};

/// Writes one `flights_changelog` row per changed flight field, holding the
/// value the field had before the upsert.
#[derive(Debug, Default, Clone, Copy)]
pub struct FlightChangelogSink;

#[async_trait]
impl ChangelogSink for FlightChangelogSink {
    async fn record(&self, conn: &mut SqliteConnection, changes: &[Change]) -> Result<(), OrmError> {
        let rows: Vec<Record> = changes
            .iter()
            .map(|change| {
                Record::new(&FLIGHT_CHANGELOG)
                    .with("flight_id", change.primary_key.clone())
                    .with("field", change.field)
                    .with("old_value", change.old_value.to_text())
            })
            .collect();

        insert_many(conn, &FLIGHT_CHANGELOG, &rows).await?;
        tracing::debug!(rows = rows.len(), "Recorded flight changelog");
        Ok(())
    }
}
