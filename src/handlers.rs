use crate::classifier::{summarize, ReadingIndex, StatusClassifier};
use crate::config::{Config, LightConfig};
use crate::errors::{AppError, ResultExt};
use crate::filters::{full_port_range, normalize_fda, parse_list, parse_port_spec, FilterCriteria};
use crate::models::*;
use crate::optics_fanout::{FanoutPlan, OpticsFanout};
use crate::recurring::{RecurringFanout, RecurringHandle};
use crate::snapshot::SnapshotStore;
use axum::{
    extract::{RawQuery, State},
    http::StatusCode,
    Json,
};
use moka::future::Cache;
use serde_json::json;
use std::sync::Arc;
use tokio::sync::Mutex;

use crate::inventory::InventoryService;

/// Cycle period used when neither the request nor the environment names one.
/// Matches the refresh the map UI shipped with.
pub const DEFAULT_AUTO_INTERVAL_SECONDS: u64 = 900;

/// Shared application state injected into handlers.
#[derive(Clone)]
pub struct AppState {
    /// Application configuration.
    pub config: Config,
    /// Inventory query layer over the configured schema.
    pub inventory: InventoryService,
    /// Concurrent per-OLT proxy fan-out.
    pub fanout: Arc<OpticsFanout>,
    /// Latest published fan-out snapshot.
    pub snapshots: SnapshotStore,
    /// Cache for FDA/FDH option lists (distinct scans are the hot path).
    /// Key: "fda:{city}" or "fdh:{city}:{fda list}".
    pub options_cache: Cache<String, Vec<String>>,
    /// Recurring fan-out handle, present while auto mode is on.
    pub auto_runner: Arc<Mutex<Option<RecurringHandle>>>,
}

/// Health check endpoint.
///
/// Returns the service status, version, and health information.
///
/// # Returns
///
/// * `(StatusCode, Json<serde_json::Value>)` - HTTP 200 OK with health status JSON.
pub async fn health() -> (StatusCode, Json<serde_json::Value>) {
    (
        StatusCode::OK,
        Json(json!({
            "status": "healthy",
            "service": "fibermap-api",
            "version": "0.1.0"
        })),
    )
}

/// GET /points
///
/// Serviceable address points for the map, filtered by the open query
/// parameter set (bounding box, city, fda/fdh, account status, drop state).
/// Unknown parameters are ignored; every absent filter widens the result.
///
/// # Arguments
///
/// * `state` - The application state.
/// * `query` - The raw query string (repeatable and comma-joined list
///   parameters are both accepted).
///
/// # Returns
///
/// * `Result<Json<Vec<AddressRecord>>, AppError>` - The matching address rows or an error.
pub async fn get_points(
    State(state): State<Arc<AppState>>,
    RawQuery(query): RawQuery,
) -> Result<Json<Vec<AddressRecord>>, AppError> {
    tracing::info!("GET /points - query: {:?}", query);

    let criteria = FilterCriteria::from_query(query.as_deref().unwrap_or(""))?;
    let points = state.inventory.fetch_points(&criteria).await?;

    Ok(Json(points))
}

/// GET /points/health
///
/// Same filters as `/points`, with each address classified against the
/// latest optical snapshot. Returns the classified points, a count per
/// health state, and the snapshot identity (null when no cycle has run yet).
///
/// # Arguments
///
/// * `state` - The application state.
/// * `query` - The raw query string, interpreted exactly as `/points`.
///
/// # Returns
///
/// * `Result<Json<serde_json::Value>, AppError>` - Classified points plus summary or an error.
pub async fn get_points_health(
    State(state): State<Arc<AppState>>,
    RawQuery(query): RawQuery,
) -> Result<Json<serde_json::Value>, AppError> {
    tracing::info!("GET /points/health - query: {:?}", query);

    let criteria = FilterCriteria::from_query(query.as_deref().unwrap_or(""))?;
    let points = state
        .inventory
        .fetch_points(&criteria)
        .await
        .context("Failed to load points for health classification")?;
    let snapshot = state.snapshots.latest().await;

    Ok(Json(classify_against_snapshot(
        &points,
        snapshot.as_ref(),
        state.config.light.low_light_threshold_dbm,
    )))
}

/// Joins fetched points with the latest snapshot: classifies each address,
/// tallies the per-state summary, and attaches the snapshot identity (null
/// when no cycle has run yet).
fn classify_against_snapshot(
    points: &[AddressRecord],
    snapshot: Option<&LightSnapshot>,
    low_light_threshold_dbm: f64,
) -> serde_json::Value {
    let empty = Vec::new();
    let readings = snapshot.map(|s| &s.readings).unwrap_or(&empty);
    let index = ReadingIndex::build(readings);
    let classifier = StatusClassifier::new(low_light_threshold_dbm);

    let classified: Vec<AddressHealth> = points
        .iter()
        .map(|point| classifier.classify(point, &index))
        .collect();
    let summary = summarize(&classified);

    tracing::info!(
        "Classified {} point(s) against {} reading(s)",
        classified.len(),
        readings.len()
    );

    json!({
        "points": classified,
        "summary": summary,
        "snapshot": snapshot.map(SnapshotMeta::of),
    })
}

/// GET /fda-options
///
/// Distinct FDA segments over serviceable, geocoded rows, optionally
/// narrowed to one city. Responses are cached briefly; the distinct scan is
/// the most repeated query the map issues.
///
/// # Arguments
///
/// * `state` - The application state.
/// * `query` - Optional `city` parameter.
///
/// # Returns
///
/// * `Result<Json<Vec<String>>, AppError>` - Sorted distinct FDA values or an error.
pub async fn fda_options(
    State(state): State<Arc<AppState>>,
    RawQuery(query): RawQuery,
) -> Result<Json<Vec<String>>, AppError> {
    let (city, _) = options_params(query.as_deref());
    let cache_key = format!("fda:{}", city.as_deref().unwrap_or(""));

    if let Some(cached) = state.options_cache.get(&cache_key).await {
        tracing::debug!("FDA options cache HIT: {}", cache_key);
        return Ok(Json(cached));
    }

    tracing::info!("FDA options cache MISS - city: {:?}", city);
    let options = state.inventory.fetch_fda_options(city.as_deref()).await?;
    state
        .options_cache
        .insert(cache_key, options.clone())
        .await;

    Ok(Json(options))
}

/// GET /fdh-options
///
/// Distinct FDH segments, optionally narrowed to one city and an FDA list
/// (repeatable or comma-joined; values are canonicalized the same way the
/// points filter canonicalizes them).
///
/// # Arguments
///
/// * `state` - The application state.
/// * `query` - Optional `city` and `fda` parameters.
///
/// # Returns
///
/// * `Result<Json<Vec<String>>, AppError>` - Sorted distinct FDH values or an error.
pub async fn fdh_options(
    State(state): State<Arc<AppState>>,
    RawQuery(query): RawQuery,
) -> Result<Json<Vec<String>>, AppError> {
    let (city, fda) = options_params(query.as_deref());
    let cache_key = format!(
        "fdh:{}:{}",
        city.as_deref().unwrap_or(""),
        fda.join(",")
    );

    if let Some(cached) = state.options_cache.get(&cache_key).await {
        tracing::debug!("FDH options cache HIT: {}", cache_key);
        return Ok(Json(cached));
    }

    tracing::info!("FDH options cache MISS - city: {:?}, fda: {:?}", city, fda);
    let options = state
        .inventory
        .fetch_fdh_options(city.as_deref(), &fda)
        .await?;
    state
        .options_cache
        .insert(cache_key, options.clone())
        .await;

    Ok(Json(options))
}

/// GET /light-config
///
/// The optical diagnostics configuration the map needs to build its
/// controls: device address, allow-lists, port bounds, threshold, and the
/// city narrowing rules.
///
/// # Arguments
///
/// * `state` - The application state.
///
/// # Returns
///
/// * `Json<LightConfigResponse>` - The active light configuration.
pub async fn light_config(State(state): State<Arc<AppState>>) -> Json<LightConfigResponse> {
    let light = &state.config.light;
    Json(LightConfigResponse {
        ip: light.device_ip.clone(),
        olts: light.allowed_olts.clone(),
        slots: light.allowed_slots.clone(),
        min_port: light.min_port,
        max_port: light.max_port,
        low_light_threshold_dbm: light.low_light_threshold_dbm,
        city_olt_prefixes: light.city_olt_prefixes.clone(),
    })
}

/// POST /light-level
///
/// Runs one optical fan-out cycle on demand. Every request dimension is
/// optional: omitted OLTs default to the allow-list (narrowed by the city
/// prefix rule when `city` is given), omitted slots to the slot allow-list,
/// omitted ports to the full configured range. Explicit OLT and slot values
/// are validated against the allow-lists and explicit ports against the
/// bounds; the free-text `ports` spec parses leniently instead.
///
/// # Arguments
///
/// * `state` - The application state.
/// * `req` - The requested OLT/slot/port dimensions.
///
/// # Returns
///
/// * `Result<Json<LightSnapshot>, AppError>` - The published snapshot or a validation error.
pub async fn post_light_level(
    State(state): State<Arc<AppState>>,
    Json(req): Json<LightLevelRequest>,
) -> Result<Json<LightSnapshot>, AppError> {
    tracing::info!(
        "POST /light-level - olt: {:?}, slot: {:?}, city: {:?}",
        req.olt,
        req.slot,
        req.city
    );

    let plan = build_plan(&state.config.light, &req)?;
    let snapshot = state.fanout.run_cycle(&plan).await;
    state.snapshots.publish(snapshot.clone()).await;

    Ok(Json(snapshot))
}

/// GET /light-level/latest
///
/// The most recently published snapshot, from any trigger (manual cycle or
/// the recurring runner).
///
/// # Arguments
///
/// * `state` - The application state.
///
/// # Returns
///
/// * `Result<Json<LightSnapshot>, AppError>` - The snapshot, or 404 when no cycle has run.
pub async fn light_level_latest(
    State(state): State<Arc<AppState>>,
) -> Result<Json<LightSnapshot>, AppError> {
    state
        .snapshots
        .latest()
        .await
        .map(Json)
        .ok_or_else(|| AppError::NotFound("No light level snapshot available yet".to_string()))
}

/// POST /light-level/auto
///
/// Enables or disables the recurring fan-out. Enabling while a runner is
/// active replaces it, so an interval change is a plain re-enable. The
/// runner covers the full allow-lists and port range; an in-flight cycle
/// finishes and still publishes after disable.
///
/// # Arguments
///
/// * `state` - The application state.
/// * `req` - Desired state and optional cycle period in seconds.
///
/// # Returns
///
/// * `Result<Json<AutoLightState>, AppError>` - The active recurring state.
pub async fn post_light_level_auto(
    State(state): State<Arc<AppState>>,
    Json(req): Json<AutoLightRequest>,
) -> Result<Json<AutoLightState>, AppError> {
    tracing::info!(
        "POST /light-level/auto - enabled: {}, interval: {:?}",
        req.enabled,
        req.interval_seconds
    );

    let mut runner = state.auto_runner.lock().await;
    if let Some(handle) = runner.take() {
        handle.stop().await;
    }

    if !req.enabled {
        tracing::info!("Recurring light level refresh disabled");
        return Ok(Json(AutoLightState {
            enabled: false,
            interval_seconds: None,
        }));
    }

    let interval_seconds = req
        .interval_seconds
        .or(state.config.light.auto_interval_seconds)
        .unwrap_or(DEFAULT_AUTO_INTERVAL_SECONDS);
    let handle = start_auto_runner(&state, interval_seconds);
    let effective = handle.interval_seconds();
    *runner = Some(handle);

    tracing::info!(
        "Recurring light level refresh enabled every {}s",
        effective
    );
    Ok(Json(AutoLightState {
        enabled: true,
        interval_seconds: Some(effective),
    }))
}

/// Starts a recurring runner over the full configured allow-lists. Also
/// used at boot when `LIGHT_AUTO_INTERVAL_SECONDS` is set.
pub fn start_auto_runner(state: &Arc<AppState>, interval_seconds: u64) -> RecurringHandle {
    let plan = Arc::new(FanoutPlan {
        olts: state.config.light.allowed_olts.clone(),
        slots: state.config.light.allowed_slots.clone(),
        ports: full_port_range(state.config.light.min_port, state.config.light.max_port),
    });
    let fanout = Arc::clone(&state.fanout);
    let store = state.snapshots.clone();

    RecurringFanout::start(interval_seconds, move || {
        let fanout = Arc::clone(&fanout);
        let store = store.clone();
        let plan = Arc::clone(&plan);
        async move {
            let snapshot = fanout.run_cycle(&plan).await;
            store.publish(snapshot).await;
        }
    })
}

/// Resolves a light-level request into the concrete fan-out dimensions.
fn build_plan(light: &LightConfig, req: &LightLevelRequest) -> Result<FanoutPlan, AppError> {
    let olts = if req.olt.is_empty() {
        match req.city.as_deref() {
            Some(city) => light.olts_for_city(city),
            None => light.allowed_olts.clone(),
        }
    } else {
        // An empty allow-list admits everything, matching the config
        // default of no restriction.
        if req
            .olt
            .iter()
            .any(|olt| !light.allowed_olts.is_empty() && !light.allowed_olts.contains(olt))
        {
            return Err(AppError::validation("olt", "OLT not allowed"));
        }
        req.olt.clone()
    };

    let slots = if req.slot.is_empty() {
        light.allowed_slots.clone()
    } else {
        if let Some(bad) = req
            .slot
            .iter()
            .find(|slot| !light.allowed_slots.is_empty() && !light.allowed_slots.contains(*slot))
        {
            return Err(AppError::validation(
                "slot",
                format!("Slot not allowed: {}", bad),
            ));
        }
        req.slot.clone()
    };

    let ports = if !req.port.is_empty() {
        let mut ports = Vec::with_capacity(req.port.len());
        for value in &req.port {
            match coerce_port(value) {
                Some(port) if port >= light.min_port && port <= light.max_port => {
                    ports.push(port);
                }
                _ => {
                    return Err(AppError::validation(
                        "port",
                        format!("Port out of range: {}", display_port(value)),
                    ));
                }
            }
        }
        ports
    } else if let Some(spec) = req.ports.as_deref() {
        parse_port_spec(spec, light.min_port, light.max_port)
    } else {
        full_port_range(light.min_port, light.max_port)
    };

    Ok(FanoutPlan { olts, slots, ports })
}

/// Pulls `city` and the `fda` list out of an options query string.
/// Repeatable keys and comma-joined values are both accepted.
fn options_params(raw: Option<&str>) -> (Option<String>, Vec<String>) {
    let mut city = None;
    let mut fda_raw = Vec::new();

    if let Some(raw) = raw {
        for (key, value) in url::form_urlencoded::parse(raw.as_bytes()) {
            match key.as_ref() {
                "city" => {
                    let trimmed = value.trim();
                    if !trimmed.is_empty() {
                        city = Some(trimmed.to_string());
                    }
                }
                "fda" => fda_raw.push(value.into_owned()),
                _ => {}
            }
        }
    }

    let fda = parse_list(&fda_raw)
        .into_iter()
        .map(|value| normalize_fda(&value))
        .collect();
    (city, fda)
}

fn coerce_port(value: &serde_json::Value) -> Option<i64> {
    match value {
        serde_json::Value::Number(n) => n.as_i64(),
        serde_json::Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn display_port(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_light_config() -> LightConfig {
        LightConfig {
            device_ip: "172.30.36.146".to_string(),
            allowed_olts: vec![
                "DFW2-OLT1".to_string(),
                "DFW3-OLT1".to_string(),
                "DFW4-OLT1".to_string(),
            ],
            allowed_slots: vec!["LT1".to_string(), "LT2".to_string()],
            min_port: 1,
            max_port: 16,
            low_light_threshold_dbm: -24.9,
            city_olt_prefixes: vec![crate::config::CityPrefixRule {
                city: "Arlington".to_string(),
                prefix: "DFW2-".to_string(),
            }],
            auto_interval_seconds: None,
        }
    }

    fn request(body: serde_json::Value) -> LightLevelRequest {
        serde_json::from_value(body).unwrap()
    }

    #[test]
    fn empty_request_covers_full_allow_lists() {
        let plan = build_plan(&test_light_config(), &request(serde_json::json!({}))).unwrap();
        assert_eq!(plan.olts.len(), 3);
        assert_eq!(plan.slots, vec!["LT1", "LT2"]);
        assert_eq!(plan.ports, (1..=16).collect::<Vec<i64>>());
        assert_eq!(plan.combos(), 3 * 2 * 16);
    }

    #[test]
    fn city_narrows_default_olts() {
        let plan = build_plan(
            &test_light_config(),
            &request(serde_json::json!({"city": "Arlington"})),
        )
        .unwrap();
        assert_eq!(plan.olts, vec!["DFW2-OLT1"]);
    }

    #[test]
    fn unknown_city_keeps_full_olt_list() {
        let plan = build_plan(
            &test_light_config(),
            &request(serde_json::json!({"city": "Plano"})),
        )
        .unwrap();
        assert_eq!(plan.olts.len(), 3);
    }

    #[test]
    fn disallowed_olt_is_rejected() {
        let err = build_plan(
            &test_light_config(),
            &request(serde_json::json!({"olt": "HOU1-OLT9"})),
        )
        .unwrap_err();
        match err {
            AppError::Validation { field, message } => {
                assert_eq!(field, "olt");
                assert_eq!(message, "OLT not allowed");
            }
            other => panic!("expected validation error, got {:?}", other),
        }
    }

    #[test]
    fn disallowed_slot_names_the_slot() {
        let err = build_plan(
            &test_light_config(),
            &request(serde_json::json!({"slot": ["LT1", "LT9"]})),
        )
        .unwrap_err();
        match err {
            AppError::Validation { message, .. } => {
                assert_eq!(message, "Slot not allowed: LT9");
            }
            other => panic!("expected validation error, got {:?}", other),
        }
    }

    #[test]
    fn explicit_ports_are_bounds_checked() {
        let err = build_plan(
            &test_light_config(),
            &request(serde_json::json!({"port": [1, 17]})),
        )
        .unwrap_err();
        match err {
            AppError::Validation { message, .. } => {
                assert_eq!(message, "Port out of range: 17");
            }
            other => panic!("expected validation error, got {:?}", other),
        }
    }

    #[test]
    fn non_numeric_port_is_out_of_range() {
        let err = build_plan(
            &test_light_config(),
            &request(serde_json::json!({"port": ["abc"]})),
        )
        .unwrap_err();
        match err {
            AppError::Validation { message, .. } => {
                assert_eq!(message, "Port out of range: abc");
            }
            other => panic!("expected validation error, got {:?}", other),
        }
    }

    #[test]
    fn numeric_string_ports_are_accepted() {
        let plan = build_plan(
            &test_light_config(),
            &request(serde_json::json!({"port": ["4", 11]})),
        )
        .unwrap();
        assert_eq!(plan.ports, vec![4, 11]);
    }

    #[test]
    fn port_spec_parses_leniently() {
        let plan = build_plan(
            &test_light_config(),
            &request(serde_json::json!({"ports": "1-3,99,7"})),
        )
        .unwrap();
        assert_eq!(plan.ports, vec![1, 2, 3, 7]);
    }

    #[test]
    fn scalar_dimensions_coerce_to_lists() {
        let plan = build_plan(
            &test_light_config(),
            &request(serde_json::json!({"olt": "DFW3-OLT1", "slot": "LT2", "port": 5})),
        )
        .unwrap();
        assert_eq!(plan.olts, vec!["DFW3-OLT1"]);
        assert_eq!(plan.slots, vec!["LT2"]);
        assert_eq!(plan.ports, vec![5]);
    }

    fn point(id: &str, drop_status: Option<&str>, cpe: Option<&str>) -> AddressRecord {
        AddressRecord {
            id: id.to_string(),
            city: Some("Rockwall".to_string()),
            address: Some("102 Main St".to_string()),
            unit: None,
            state: Some("TX".to_string()),
            zip: Some("75087".to_string()),
            latitude: 32.93,
            longitude: -96.46,
            fda_fdh: Some("FDA:001|FDH:002".to_string()),
            drop_status: drop_status.map(str::to_string),
            accounts: cpe
                .map(|value| {
                    vec![AccountRecord {
                        account_id: Some(1),
                        inventory_model: Some("ONT".to_string()),
                        value: Some(value.to_string()),
                        account_status_id: Some(1),
                        account_status_text: Some("Active".to_string()),
                    }]
                })
                .unwrap_or_default(),
        }
    }

    fn snapshot_with(readings: Vec<OpticsReading>) -> LightSnapshot {
        let digest = crate::snapshot::readings_digest(&readings);
        LightSnapshot {
            cycle_id: uuid::Uuid::new_v4(),
            fetched_at: chrono::Utc::now(),
            requests_ok: 1,
            requests_total: 1,
            combos: 2,
            readings,
            failures: Vec::new(),
            digest,
        }
    }

    #[test]
    fn health_response_carries_points_summary_and_snapshot() {
        let points = vec![
            point("1", Some("1"), Some("CPE1_abc")),
            point("2", Some("1"), Some("CPE2")),
            point("3", None, None),
        ];
        let snapshot = snapshot_with(vec![OpticsReading {
            name: Some("CPE1_xyz".to_string()),
            olt: "DFW2-OLT1".to_string(),
            slot: Some("LT1".to_string()),
            port: Some(1),
            metrics: OpticsMetrics {
                rx_power: Some(-30.0),
                ..Default::default()
            },
        }]);

        let body = classify_against_snapshot(&points, Some(&snapshot), -24.9);

        let classified = body["points"].as_array().unwrap();
        assert_eq!(classified.len(), 3);
        assert_eq!(classified[0]["id"], "1");
        assert_eq!(classified[0]["health"], "low_light");
        assert_eq!(classified[0]["matched"][0]["reading"]["name"], "CPE1_xyz");
        assert_eq!(classified[1]["health"], "offline");
        assert!(classified[1]["matched"][0]["reading"].is_null());
        assert_eq!(classified[2]["health"], "drop_incomplete");

        let summary = body["summary"].as_object().unwrap();
        assert_eq!(summary.len(), HealthStatus::ALL.len());
        assert_eq!(summary["low_light"], 1);
        assert_eq!(summary["offline"], 1);
        assert_eq!(summary["drop_incomplete"], 1);
        assert_eq!(summary["online"], 0);

        assert_eq!(body["snapshot"]["digest"], snapshot.digest);
        assert_eq!(
            body["snapshot"]["cycle_id"],
            snapshot.cycle_id.to_string()
        );
        assert_eq!(body["snapshot"]["combos"], 2);
    }

    #[test]
    fn health_response_without_a_snapshot_defaults_to_online() {
        let points = vec![point("1", Some("1"), Some("CPE1"))];

        let body = classify_against_snapshot(&points, None, -24.9);

        assert_eq!(body["points"][0]["health"], "online");
        assert_eq!(body["summary"]["online"], 1);
        assert!(body["snapshot"].is_null());
    }

    #[test]
    fn options_params_accepts_repeats_and_commas() {
        let (city, fda) =
            options_params(Some("city=Rockwall&fda=1&fda=FDA:002,fda:3&other=x"));
        assert_eq!(city.as_deref(), Some("Rockwall"));
        assert_eq!(fda, vec!["FDA:001", "FDA:002", "FDA:003"]);
    }

    #[test]
    fn options_params_empty_query() {
        let (city, fda) = options_params(None);
        assert!(city.is_none());
        assert!(fda.is_empty());
    }
}
