use sqlx::{PgPool, Row};

use crate::config::SchemaConfig;
use crate::errors::AppError;
use crate::filters::FilterCriteria;
use crate::models::{AccountRecord, AddressRecord};
use crate::query_builder::{BuiltQuery, InventoryQueryBuilder};

/// Executes the dynamic inventory statements and maps rows into the domain
/// model. One pool round-trip per call; point results are never cached.
#[derive(Clone)]
pub struct InventoryService {
    pool: PgPool,
    builder: InventoryQueryBuilder,
}

impl InventoryService {
    pub fn new(pool: PgPool, schema: SchemaConfig) -> Self {
        Self {
            pool,
            builder: InventoryQueryBuilder::new(schema),
        }
    }

    /// Runs the points query for a filter set.
    ///
    /// Either every row maps or the call fails; a malformed row never yields
    /// a partial result.
    pub async fn fetch_points(
        &self,
        filters: &FilterCriteria,
    ) -> Result<Vec<AddressRecord>, AppError> {
        let built = self.builder.points_query(filters);
        let rows = self.run(&built, "points").await?;

        let mut records = Vec::with_capacity(rows.len());
        for row in rows {
            let accounts_value: serde_json::Value = row.try_get("accounts")?;
            let accounts: Vec<AccountRecord> =
                serde_json::from_value(accounts_value).map_err(|e| {
                    AppError::Internal(format!("accounts aggregate did not deserialize: {e}"))
                })?;
            let id: Option<String> = row.try_get("id")?;

            records.push(AddressRecord {
                id: id.unwrap_or_default(),
                city: row.try_get("city")?,
                address: row.try_get("address")?,
                unit: row.try_get("unit")?,
                state: row.try_get("state")?,
                zip: row.try_get("zip")?,
                latitude: row.try_get("latitude")?,
                longitude: row.try_get("longitude")?,
                fda_fdh: row.try_get("fda_fdh")?,
                drop_status: row.try_get("drop_status")?,
                accounts,
            });
        }

        tracing::info!("Fetched {} inventory point(s)", records.len());
        Ok(records)
    }

    /// Distinct FDA segments, optionally narrowed to one city.
    pub async fn fetch_fda_options(&self, city: Option<&str>) -> Result<Vec<String>, AppError> {
        let built = self.builder.fda_options_query(city);
        let rows = self.run(&built, "fda-options").await?;
        Ok(collect_segment(rows, "fda"))
    }

    /// Distinct FDH segments, optionally narrowed to one city and an FDA
    /// set.
    pub async fn fetch_fdh_options(
        &self,
        city: Option<&str>,
        fda: &[String],
    ) -> Result<Vec<String>, AppError> {
        let built = self.builder.fdh_options_query(city, fda);
        let rows = self.run(&built, "fdh-options").await?;
        Ok(collect_segment(rows, "fdh"))
    }

    async fn run(
        &self,
        built: &BuiltQuery,
        label: &str,
    ) -> Result<Vec<sqlx::postgres::PgRow>, AppError> {
        tracing::debug!(
            "Running {} query with {} parameter(s)",
            label,
            built.params.len()
        );
        built
            .bind_onto(sqlx::query(&built.sql))
            .fetch_all(&self.pool)
            .await
            .map_err(|e| {
                // The statement text carries identifiers only, never values,
                // so it is safe to log on failure.
                tracing::error!("{} query failed: {} (sql: {})", label, e, built.sql);
                AppError::Query(e)
            })
    }
}

fn collect_segment(rows: Vec<sqlx::postgres::PgRow>, column: &str) -> Vec<String> {
    rows.into_iter()
        .filter_map(|row| row.try_get::<Option<String>, _>(column).ok().flatten())
        .filter(|v| !v.is_empty())
        .collect()
}
