use sqlx::{postgres::PgPoolOptions, PgPool};

use crate::config::SchemaConfig;

pub struct Database {
    pub pool: PgPool,
}

impl Database {
    /// Connects the pool and probes the configured inventory table so a
    /// misconfigured `TABLE_NAME` fails at startup instead of on the first
    /// request.
    pub async fn new(database_url: &str, schema: &SchemaConfig) -> anyhow::Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(10)
            .connect(database_url)
            .await?;

        // The table identifier passed validation in Config::from_env, so
        // interpolating it here is safe.
        let probe = format!("SELECT 1 FROM {} LIMIT 1", schema.table);
        sqlx::query(&probe).execute(&pool).await?;
        tracing::info!(table = %schema.table, "Database pool ready");

        Ok(Self { pool })
    }
}
