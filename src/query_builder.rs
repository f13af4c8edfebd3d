use sqlx::postgres::PgArguments;
use sqlx::query::Query;
use sqlx::Postgres;

use crate::config::SchemaConfig;
use crate::filters::{DropFilter, FilterCriteria};
use crate::models::AccountStatus;

// ============ Built Query ============

/// A value bound to one positional placeholder.
#[derive(Debug, Clone, PartialEq)]
pub enum QueryParam {
    /// `$n` bound as a double.
    Float(f64),
    /// `$n` bound as text.
    Text(String),
    /// `$n::text[]`.
    TextArray(Vec<String>),
    /// `$n::int[]`.
    IntArray(Vec<i32>),
}

/// One ready-to-execute statement: SQL text plus bind values in placeholder
/// order. The text never contains request data; identifiers come from the
/// validated schema config and everything else rides in `params`.
#[derive(Debug, Clone)]
pub struct BuiltQuery {
    /// The statement text.
    pub sql: String,
    /// Bind values, one per `$n` placeholder, in order.
    pub params: Vec<QueryParam>,
}

impl BuiltQuery {
    /// Attaches every parameter to a sqlx query, in placeholder order.
    pub fn bind_onto<'q>(
        &self,
        mut query: Query<'q, Postgres, PgArguments>,
    ) -> Query<'q, Postgres, PgArguments> {
        for param in &self.params {
            query = match param {
                QueryParam::Float(v) => query.bind(*v),
                QueryParam::Text(v) => query.bind(v.clone()),
                QueryParam::TextArray(v) => query.bind(v.clone()),
                QueryParam::IntArray(v) => query.bind(v.clone()),
            };
        }
        query
    }
}

// ============ Inventory Query Builder ============

/// Builds the dynamic inventory statements from validated schema identifiers
/// and a parsed filter set.
///
/// Placeholder indices are always computed from the running parameter count,
/// so conditions can be added or skipped freely without renumbering.
#[derive(Debug, Clone)]
pub struct InventoryQueryBuilder {
    schema: SchemaConfig,
}

impl InventoryQueryBuilder {
    pub fn new(schema: SchemaConfig) -> Self {
        Self { schema }
    }

    /// The points statement: baseline conditions, the optional filter
    /// conditions in fixed order, and the projection with the correlated
    /// accounts aggregate.
    ///
    /// Baseline conditions apply to every request: non-NULL coordinates and
    /// `serviceable = TRUE`. Without a configured id column the row id
    /// degrades to a window row number and the accounts aggregate to an
    /// empty JSON array.
    pub fn points_query(&self, filters: &FilterCriteria) -> BuiltQuery {
        let s = &self.schema;
        let mut params: Vec<QueryParam> = Vec::new();
        let mut conditions: Vec<String> = vec![
            format!("t.{} IS NOT NULL", s.lat_column),
            format!("t.{} IS NOT NULL", s.lng_column),
            format!("t.{} = TRUE", s.serviceable_column),
        ];

        if let Some(bounds) = &filters.bounds {
            let start = params.len() + 1;
            conditions.push(format!(
                "t.{lat} BETWEEN ${p0} AND ${p1} AND t.{lng} BETWEEN ${p2} AND ${p3}",
                lat = s.lat_column,
                lng = s.lng_column,
                p0 = start,
                p1 = start + 1,
                p2 = start + 2,
                p3 = start + 3,
            ));
            params.push(QueryParam::Float(bounds.min_lat));
            params.push(QueryParam::Float(bounds.max_lat));
            params.push(QueryParam::Float(bounds.min_lng));
            params.push(QueryParam::Float(bounds.max_lng));
        }

        if let Some(city) = &filters.city {
            let idx = params.len() + 1;
            conditions.push(format!("t.{} = ${}", s.city_column, idx));
            params.push(QueryParam::Text(city.clone()));
        }

        if !filters.fda.is_empty() {
            let idx = params.len() + 1;
            conditions.push(format!(
                "split_part({}, '|', 1) = ANY(${}::text[])",
                s.fda_fdh_column, idx
            ));
            params.push(QueryParam::TextArray(filters.fda.clone()));
        }

        if !filters.fdh.is_empty() {
            let idx = params.len() + 1;
            conditions.push(format!(
                "split_part({}, '|', 2) = ANY(${}::text[])",
                s.fda_fdh_column, idx
            ));
            params.push(QueryParam::TextArray(filters.fdh.clone()));
        }

        if !filters.statuses.is_empty() {
            let idx = params.len() + 1;
            // Without a configured id column the join key falls back to the
            // conventional address_id.
            let address_ref = s.id_column.as_deref().unwrap_or("address_id");
            conditions.push(format!(
                "EXISTS (\n        SELECT 1 FROM account_inventory ai\n        JOIN account a ON a.id = ai.account_id\n        WHERE ai.address_id = t.{address_ref}\n          AND a.account_status_id = ANY(${idx}::int[])\n      )"
            ));
            params.push(QueryParam::IntArray(filters.statuses.clone()));
        }

        match filters.drop {
            DropFilter::Completed => {
                conditions.push(format!("t.{}::text = '1'", s.drop_column));
            }
            DropFilter::NotCompleted => {
                conditions.push(format!(
                    "(t.{col} IS NULL OR t.{col}::text <> '1')",
                    col = s.drop_column
                ));
            }
            DropFilter::Any => {}
        }

        let id_select = match &s.id_column {
            Some(id) => format!("t.{id}::text"),
            None => "(ROW_NUMBER() OVER ())::text".to_string(),
        };
        let accounts_select = match &s.id_column {
            Some(id) => Self::accounts_aggregate(id),
            None => "'[]'::json".to_string(),
        };

        let sql = format!(
            "SELECT\n      {id_select} AS id,\n      t.{city}::text AS city,\n      t.{address}::text AS address,\n      t.{line2}::text AS unit,\n      t.{subdivision}::text AS state,\n      t.{zip}::text AS zip,\n      t.{lat}::float8 AS latitude,\n      t.{lng}::float8 AS longitude,\n      t.{fda_fdh}::text AS fda_fdh,\n      t.{drop}::text AS drop_status,\n      {accounts_select} AS accounts\n    FROM {table} t\n    WHERE {where_clause}",
            city = s.city_column,
            address = s.address_column,
            line2 = s.line2_column,
            subdivision = s.subdivision_column,
            zip = s.zip_column,
            lat = s.lat_column,
            lng = s.lng_column,
            fda_fdh = s.fda_fdh_column,
            drop = s.drop_column,
            table = s.table,
            where_clause = conditions.join(" AND "),
        );

        BuiltQuery { sql, params }
    }

    /// Distinct FDA segments over serviceable, geocoded rows, optionally
    /// narrowed to one city.
    pub fn fda_options_query(&self, city: Option<&str>) -> BuiltQuery {
        let s = &self.schema;
        let mut params: Vec<QueryParam> = Vec::new();
        let mut conditions = self.options_baseline();

        if let Some(city) = city {
            let idx = params.len() + 1;
            conditions.push(format!("{} = ${}", s.city_column, idx));
            params.push(QueryParam::Text(city.to_string()));
        }

        let sql = format!(
            "SELECT DISTINCT split_part({col}, '|', 1) AS fda\n    FROM {table}\n    WHERE {where_clause}\n    ORDER BY fda",
            col = s.fda_fdh_column,
            table = s.table,
            where_clause = conditions.join(" AND "),
        );

        BuiltQuery { sql, params }
    }

    /// Distinct FDH segments, optionally narrowed to one city and an FDA
    /// set.
    pub fn fdh_options_query(&self, city: Option<&str>, fda: &[String]) -> BuiltQuery {
        let s = &self.schema;
        let mut params: Vec<QueryParam> = Vec::new();
        let mut conditions = self.options_baseline();

        if let Some(city) = city {
            let idx = params.len() + 1;
            conditions.push(format!("{} = ${}", s.city_column, idx));
            params.push(QueryParam::Text(city.to_string()));
        }

        if !fda.is_empty() {
            let idx = params.len() + 1;
            conditions.push(format!(
                "split_part({}, '|', 1) = ANY(${}::text[])",
                s.fda_fdh_column, idx
            ));
            params.push(QueryParam::TextArray(fda.to_vec()));
        }

        let sql = format!(
            "SELECT DISTINCT split_part({col}, '|', 2) AS fdh\n    FROM {table}\n    WHERE {where_clause}\n    ORDER BY fdh",
            col = s.fda_fdh_column,
            table = s.table,
            where_clause = conditions.join(" AND "),
        );

        BuiltQuery { sql, params }
    }

    fn options_baseline(&self) -> Vec<String> {
        let s = &self.schema;
        vec![
            format!("{} IS NOT NULL", s.fda_fdh_column),
            format!("{} IS NOT NULL", s.lat_column),
            format!("{} IS NOT NULL", s.lng_column),
            format!("{} = TRUE", s.serviceable_column),
        ]
    }

    /// The correlated accounts aggregate. Restricted to the known status ids
    /// and labeled through the same mapping [`AccountStatus`] carries, so the
    /// SQL and the Rust enum cannot drift apart.
    fn accounts_aggregate(id_column: &str) -> String {
        let case_arms: Vec<String> = AccountStatus::ALL
            .iter()
            .map(|status| format!("WHEN {} THEN '{}'", status.as_id(), status.label()))
            .collect();
        let id_list: Vec<String> = AccountStatus::ALL
            .iter()
            .map(|status| status.as_id().to_string())
            .collect();

        format!(
            "COALESCE(\n        (\n          SELECT json_agg(\n            json_build_object(\n              'account_id', ai.account_id,\n              'inventory_model', ai.inventory_model,\n              'value', ai.value,\n              'account_status_id', a.account_status_id,\n              'account_status_text',\n                CASE a.account_status_id\n                  {case_arms}\n                  ELSE NULL\n                END\n            )\n          )\n          FROM account_inventory ai\n          LEFT JOIN account a ON a.id = ai.account_id\n          WHERE ai.address_id = t.{id_column}\n            AND a.account_status_id IN ({id_list})\n        ),\n        '[]'::json\n      )",
            case_arms = case_arms.join("\n                  "),
            id_list = id_list.join(", "),
        )
    }
}
