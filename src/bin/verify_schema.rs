//! Utility to verify the configured schema identifiers against the live
//! database before deploying a new column mapping.

use dotenvy::dotenv;
use sqlx::postgres::PgPoolOptions;

use fibermap_api::config::Config;

/// Main entry point for the schema verification utility.
///
/// Loads the configuration (which validates identifier syntax), then checks
/// that the configured table and every mapped column actually exist.
#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenv().ok();
    let config = Config::from_env()?;
    let schema = &config.schema;

    let pool = PgPoolOptions::new().connect(&config.database_url).await?;

    let table: Option<(String,)> = sqlx::query_as(
        "SELECT table_name FROM information_schema.tables WHERE table_name = $1",
    )
    .bind(&schema.table)
    .fetch_optional(&pool)
    .await?;

    if table.is_none() {
        println!("Table '{}' NOT found", schema.table);
        return Ok(());
    }
    println!("Table '{}' found", schema.table);

    let columns: Vec<(String, String)> = sqlx::query_as(
        "SELECT column_name, data_type FROM information_schema.columns WHERE table_name = $1 ORDER BY ordinal_position",
    )
    .bind(&schema.table)
    .fetch_all(&pool)
    .await?;

    println!("Configured column mapping:");
    let mut missing = 0;
    for (key, identifier) in schema.identifier_entries() {
        if key == "TABLE_NAME" {
            continue;
        }
        match columns.iter().find(|(name, _)| name == identifier) {
            Some((_, data_type)) => println!("  - {} = {} ({})", key, identifier, data_type),
            None => {
                println!("  - {} = {} MISSING", key, identifier);
                missing += 1;
            }
        }
    }

    if missing > 0 {
        println!("{} configured column(s) missing from '{}'", missing, schema.table);
    } else {
        println!("All configured columns present");
    }

    Ok(())
}
