use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::config::CityPrefixRule;

// ============ Address Inventory ============

/// One serviceable address row from the inventory table.
///
/// Built fresh for every points query and owned by the response; nothing here
/// is cached or mutated after construction.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AddressRecord {
    /// Row identity: the configured id column cast to text, or a synthetic
    /// row number when no id column is configured.
    pub id: String,
    /// City name.
    pub city: Option<String>,
    /// Street address line.
    pub address: Option<String>,
    /// Secondary address line (apartment, suite).
    pub unit: Option<String>,
    /// State or subdivision code.
    pub state: Option<String>,
    /// Postal code.
    pub zip: Option<String>,
    /// WGS84 latitude. Rows with NULL coordinates never leave the database.
    pub latitude: f64,
    /// WGS84 longitude.
    pub longitude: f64,
    /// Composite distribution tag in `FDA|FDH` form.
    pub fda_fdh: Option<String>,
    /// Raw drop column value cast to text.
    pub drop_status: Option<String>,
    /// Accounts attached to this address, restricted to the known status set.
    pub accounts: Vec<AccountRecord>,
}

impl AddressRecord {
    /// Tri-state drop completion derived from the raw column text:
    /// `Some(true)` when the trimmed value is `"1"`, `Some(false)` for any
    /// other non-null value, `None` when the column is NULL.
    pub fn drop_completed(&self) -> Option<bool> {
        self.drop_status.as_ref().map(|v| v.trim() == "1")
    }
}

/// One account attached to an address, as produced by the accounts aggregate.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccountRecord {
    /// Account identifier.
    pub account_id: Option<i64>,
    /// Inventory model of the installed equipment.
    pub inventory_model: Option<String>,
    /// Inventory value: the CPE identifier matched against optical readings.
    pub value: Option<String>,
    /// Raw account status id.
    pub account_status_id: Option<i32>,
    /// Status label resolved in SQL from the status id.
    pub account_status_text: Option<String>,
}

/// Account status ids surfaced by the inventory aggregate. The SQL side is
/// restricted to exactly this set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AccountStatus {
    /// Status id 1.
    Active,
    /// Status id 2.
    Inactive,
    /// Status id 4.
    Suspended,
    /// Status id 39.
    Scheduled,
    /// Status id 75.
    TestOnt,
}

impl AccountStatus {
    /// Every status the aggregate may carry, in id order.
    pub const ALL: [AccountStatus; 5] = [
        AccountStatus::Active,
        AccountStatus::Inactive,
        AccountStatus::Suspended,
        AccountStatus::Scheduled,
        AccountStatus::TestOnt,
    ];

    /// Resolves a raw status id; ids outside the known set yield `None`.
    pub fn from_id(id: i32) -> Option<Self> {
        match id {
            1 => Some(AccountStatus::Active),
            2 => Some(AccountStatus::Inactive),
            4 => Some(AccountStatus::Suspended),
            39 => Some(AccountStatus::Scheduled),
            75 => Some(AccountStatus::TestOnt),
            _ => None,
        }
    }

    /// The raw id for this status.
    pub fn as_id(self) -> i32 {
        match self {
            AccountStatus::Active => 1,
            AccountStatus::Inactive => 2,
            AccountStatus::Suspended => 4,
            AccountStatus::Scheduled => 39,
            AccountStatus::TestOnt => 75,
        }
    }

    /// Display label, matching the SQL CASE mapping.
    pub fn label(self) -> &'static str {
        match self {
            AccountStatus::Active => "Active",
            AccountStatus::Inactive => "Inactive",
            AccountStatus::Suspended => "Suspended",
            AccountStatus::Scheduled => "Scheduled",
            AccountStatus::TestOnt => "Test ONT",
        }
    }
}

/// Rectangular map viewport. A spatial filter applies only when all four
/// edges are present.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoBounds {
    /// Southern edge.
    pub min_lat: f64,
    /// Northern edge.
    pub max_lat: f64,
    /// Western edge.
    pub min_lng: f64,
    /// Eastern edge.
    pub max_lng: f64,
}

// ============ Optical Readings ============

/// Numeric diagnostics attached to one optical reading. Every field is
/// optional; an absent metric stays `None`, never zero. Upstream devices
/// report numbers and numeric strings interchangeably, so each field accepts
/// both.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OpticsMetrics {
    /// Receive power at the subscriber device (dBm).
    #[serde(
        rename = "rx-power",
        default,
        deserialize_with = "lenient_f64",
        skip_serializing_if = "Option::is_none"
    )]
    pub rx_power: Option<f64>,
    /// Transmit power at the subscriber device (dBm).
    #[serde(
        rename = "tx-power",
        default,
        deserialize_with = "lenient_f64",
        skip_serializing_if = "Option::is_none"
    )]
    pub tx_power: Option<f64>,
    /// Receive power measured at the OLT (dBm).
    #[serde(
        rename = "rx-power-olt",
        default,
        deserialize_with = "lenient_f64",
        skip_serializing_if = "Option::is_none"
    )]
    pub rx_power_olt: Option<f64>,
    /// Estimated fiber length (km).
    #[serde(
        rename = "fiber-distance",
        default,
        deserialize_with = "lenient_f64",
        skip_serializing_if = "Option::is_none"
    )]
    pub fiber_distance: Option<f64>,
    /// Laser bias current (mA).
    #[serde(
        rename = "tx-bias-current",
        default,
        deserialize_with = "lenient_f64",
        skip_serializing_if = "Option::is_none"
    )]
    pub tx_bias_current: Option<f64>,
    /// Laser bias temperature (°C).
    #[serde(
        rename = "tx-bias-temperature",
        default,
        deserialize_with = "lenient_f64",
        skip_serializing_if = "Option::is_none"
    )]
    pub tx_bias_temperature: Option<f64>,
    /// Optical module supply voltage (V).
    #[serde(
        rename = "module-voltage",
        default,
        deserialize_with = "lenient_f64",
        skip_serializing_if = "Option::is_none"
    )]
    pub module_voltage: Option<f64>,
    /// Optical module temperature (°C).
    #[serde(
        rename = "module-temperature",
        default,
        deserialize_with = "lenient_f64",
        skip_serializing_if = "Option::is_none"
    )]
    pub module_temperature: Option<f64>,
}

/// One optical reading extracted from an upstream payload, tagged with the
/// request context it came from. Transient: rebuilt every fan-out cycle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OpticsReading {
    /// Raw device identifier as reported upstream; `None` when the device
    /// did not report one. Nameless readings still count toward the cycle
    /// but can never match a CPE.
    pub name: Option<String>,
    /// OLT that served the enclosing request.
    pub olt: String,
    /// Slot from the payload row, falling back to the first requested slot.
    pub slot: Option<String>,
    /// Port from the payload row, falling back to the first requested port.
    pub port: Option<i64>,
    /// Parsed diagnostics.
    #[serde(flatten)]
    pub metrics: OpticsMetrics,
}

/// Outcome of one failed per-OLT request within a fan-out cycle.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OltFailure {
    /// The OLT whose request failed.
    pub olt: String,
    /// HTTP status when the proxy answered; absent on transport errors.
    pub status: Option<u16>,
    /// Upstream body or transport error text, passed through verbatim.
    pub body: String,
}

/// The complete product of one fan-out cycle. Replaced wholesale in the
/// snapshot store; never persisted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LightSnapshot {
    /// Identifier for this cycle, threaded through the logs.
    pub cycle_id: Uuid,
    /// When the cycle finished.
    pub fetched_at: DateTime<Utc>,
    /// Requests that returned a decodable 2xx payload.
    pub requests_ok: usize,
    /// Requests issued, one per OLT.
    pub requests_total: usize,
    /// |OLTs| x |slots| x |ports| for the cycle; reported even though the
    /// requests group per OLT.
    pub combos: usize,
    /// All readings extracted from the successful responses, in extraction
    /// order.
    pub readings: Vec<OpticsReading>,
    /// Per-OLT failures, in request order.
    pub failures: Vec<OltFailure>,
    /// SHA-256 hex digest over the serialized readings; cheap change
    /// detection for pollers.
    pub digest: String,
}

// ============ Health Classification ============

/// Discrete operational state derived for one address. Derived on demand,
/// never stored.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum HealthStatus {
    /// An account on the address is inactive.
    Inactive,
    /// An account on the address is suspended.
    Suspended,
    /// The premises drop is not complete.
    DropIncomplete,
    /// Drop complete but no account carries a status id.
    DropCompleteNoAccount,
    /// The cycle produced readings but none matched this address.
    Offline,
    /// Matched receive power at or below the configured threshold.
    LowLight,
    /// Matched with healthy receive power, or no cycle has run yet.
    Online,
}

impl HealthStatus {
    /// All states in precedence order.
    pub const ALL: [HealthStatus; 7] = [
        HealthStatus::Inactive,
        HealthStatus::Suspended,
        HealthStatus::DropIncomplete,
        HealthStatus::DropCompleteNoAccount,
        HealthStatus::Offline,
        HealthStatus::LowLight,
        HealthStatus::Online,
    ];

    /// Display label.
    pub fn label(self) -> &'static str {
        match self {
            HealthStatus::Inactive => "Inactive",
            HealthStatus::Suspended => "Suspended",
            HealthStatus::DropIncomplete => "Drop not completed",
            HealthStatus::DropCompleteNoAccount => "Drop done no account",
            HealthStatus::Offline => "Offline",
            HealthStatus::LowLight => "Low light",
            HealthStatus::Online => "Online",
        }
    }
}

/// One account's optics match within a classified address.
#[derive(Debug, Clone, Serialize)]
pub struct AccountMatch {
    /// Account identifier.
    pub account_id: Option<i64>,
    /// The CPE identifier the match was attempted on.
    pub value: Option<String>,
    /// The matched reading, when one exists.
    pub reading: Option<OpticsReading>,
}

/// An address joined with its derived health state.
#[derive(Debug, Clone, Serialize)]
pub struct AddressHealth {
    /// The underlying address row.
    #[serde(flatten)]
    pub address: AddressRecord,
    /// Derived state.
    pub health: HealthStatus,
    /// Per-account match details, in account order.
    pub matched: Vec<AccountMatch>,
}

// ============ API Request/Response Models ============

/// Response body for the light configuration endpoint.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LightConfigResponse {
    /// Target device address forwarded to the proxy.
    pub ip: String,
    /// OLT allow-list.
    pub olts: Vec<String>,
    /// Slot allow-list.
    pub slots: Vec<String>,
    /// Lowest valid port.
    pub min_port: i64,
    /// Highest valid port.
    pub max_port: i64,
    /// Low-light threshold (dBm).
    pub low_light_threshold_dbm: f64,
    /// City narrowing rules applied to fan-out requests.
    pub city_olt_prefixes: Vec<CityPrefixRule>,
}

/// Request body for an on-demand fan-out cycle. Every field is optional;
/// omitted dimensions fall back to the configured allow-lists and the full
/// port range.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct LightLevelRequest {
    /// Explicit OLTs; validated against the allow-list.
    #[serde(default, deserialize_with = "one_or_many_strings")]
    pub olt: Vec<String>,
    /// Explicit slots; validated against the allow-list.
    #[serde(default, deserialize_with = "one_or_many_strings")]
    pub slot: Vec<String>,
    /// Explicit ports; every value must sit inside the configured bounds.
    #[serde(default, deserialize_with = "one_or_many_values")]
    pub port: Vec<serde_json::Value>,
    /// Free-text port spec such as `"1-4,7"`; parsed leniently, invalid
    /// tokens dropped.
    pub ports: Option<String>,
    /// Narrows the OLT set through the configured city prefix rules.
    pub city: Option<String>,
}

/// Request body for the recurring fan-out control endpoint.
#[derive(Debug, Clone, Deserialize)]
pub struct AutoLightRequest {
    /// Desired state.
    pub enabled: bool,
    /// Cycle period; defaults to the configured interval when omitted.
    pub interval_seconds: Option<u64>,
}

/// Current state of the recurring fan-out runner.
#[derive(Debug, Clone, Serialize)]
pub struct AutoLightState {
    /// Whether a runner is active.
    pub enabled: bool,
    /// Active cycle period, when enabled.
    pub interval_seconds: Option<u64>,
}

/// Snapshot identity returned alongside classified points.
#[derive(Debug, Clone, Serialize)]
pub struct SnapshotMeta {
    /// Cycle identifier.
    pub cycle_id: Uuid,
    /// When the cycle finished.
    pub fetched_at: DateTime<Utc>,
    /// Readings digest.
    pub digest: String,
    /// Requests that succeeded.
    pub requests_ok: usize,
    /// Requests issued.
    pub requests_total: usize,
    /// Combination count for the cycle.
    pub combos: usize,
}

impl SnapshotMeta {
    /// Identity-only view of a snapshot.
    pub fn of(snapshot: &LightSnapshot) -> Self {
        Self {
            cycle_id: snapshot.cycle_id,
            fetched_at: snapshot.fetched_at,
            digest: snapshot.digest.clone(),
            requests_ok: snapshot.requests_ok,
            requests_total: snapshot.requests_total,
            combos: snapshot.combos,
        }
    }
}

// ============ Serde Helpers ============

/// Accepts a JSON number or a numeric string; anything else becomes `None`.
fn coerce_f64(value: &serde_json::Value) -> Option<f64> {
    match value {
        serde_json::Value::Number(n) => n.as_f64(),
        serde_json::Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn lenient_f64<'de, D>(deserializer: D) -> Result<Option<f64>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let value = Option::<serde_json::Value>::deserialize(deserializer)?;
    Ok(value.as_ref().and_then(coerce_f64))
}

/// Accepts `"A"` and `["A", "B"]` alike.
fn one_or_many_strings<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum OneOrMany {
        One(String),
        Many(Vec<String>),
    }

    match Option::<OneOrMany>::deserialize(deserializer)? {
        Some(OneOrMany::One(v)) => Ok(vec![v]),
        Some(OneOrMany::Many(v)) => Ok(v),
        None => Ok(Vec::new()),
    }
}

/// Accepts a scalar or an array of scalars, keeping raw values so validation
/// can name the offending token.
fn one_or_many_values<'de, D>(deserializer: D) -> Result<Vec<serde_json::Value>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    match Option::<serde_json::Value>::deserialize(deserializer)? {
        Some(serde_json::Value::Array(items)) => Ok(items),
        Some(serde_json::Value::Null) | None => Ok(Vec::new()),
        Some(other) => Ok(vec![other]),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn drop_completed_tri_state() {
        let mut record = AddressRecord {
            id: "1".to_string(),
            city: None,
            address: None,
            unit: None,
            state: None,
            zip: None,
            latitude: 0.0,
            longitude: 0.0,
            fda_fdh: None,
            drop_status: Some("1".to_string()),
            accounts: Vec::new(),
        };
        assert_eq!(record.drop_completed(), Some(true));
        record.drop_status = Some(" 1 ".to_string());
        assert_eq!(record.drop_completed(), Some(true));
        record.drop_status = Some("0".to_string());
        assert_eq!(record.drop_completed(), Some(false));
        record.drop_status = Some("complete".to_string());
        assert_eq!(record.drop_completed(), Some(false));
        record.drop_status = None;
        assert_eq!(record.drop_completed(), None);
    }

    #[test]
    fn metrics_accept_numbers_and_numeric_strings() {
        let parsed: OpticsMetrics = serde_json::from_value(serde_json::json!({
            "rx-power": -25.4,
            "tx-power": "2.1",
            "fiber-distance": "n/a",
            "module-voltage": null,
        }))
        .unwrap();
        assert_eq!(parsed.rx_power, Some(-25.4));
        assert_eq!(parsed.tx_power, Some(2.1));
        assert_eq!(parsed.fiber_distance, None);
        assert_eq!(parsed.module_voltage, None);
        assert_eq!(parsed.rx_power_olt, None);
    }

    #[test]
    fn light_level_request_accepts_scalar_and_array_fields() {
        let scalar: LightLevelRequest = serde_json::from_value(serde_json::json!({
            "olt": "DFW2-OLT1",
            "slot": "LT1",
            "port": 3,
        }))
        .unwrap();
        assert_eq!(scalar.olt, vec!["DFW2-OLT1"]);
        assert_eq!(scalar.slot, vec!["LT1"]);
        assert_eq!(scalar.port.len(), 1);

        let many: LightLevelRequest = serde_json::from_value(serde_json::json!({
            "olt": ["DFW2-OLT1", "DFW2-OLT2"],
            "port": [1, "2"],
        }))
        .unwrap();
        assert_eq!(many.olt.len(), 2);
        assert_eq!(many.port.len(), 2);
        assert!(many.slot.is_empty());
    }

    #[test]
    fn account_status_round_trips_known_ids() {
        for status in AccountStatus::ALL {
            assert_eq!(AccountStatus::from_id(status.as_id()), Some(status));
        }
        assert_eq!(AccountStatus::from_id(99), None);
        assert_eq!(AccountStatus::TestOnt.label(), "Test ONT");
    }
}
