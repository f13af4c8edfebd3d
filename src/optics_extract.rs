use serde::Deserialize;
use serde_json::Value;

use crate::models::{OpticsMetrics, OpticsReading};

/// Context tags inherited from the enclosing payload row and, where the row
/// is silent, from the request that produced it.
#[derive(Debug, Clone)]
pub struct ReadingContext {
    pub olt: String,
    pub slot: Option<String>,
    pub port: Option<i64>,
}

/// One node in an upstream reading tree: a collection, or a single reading
/// that may itself carry a nested collection under `ont-optics`.
///
/// Collections keep raw values so each entry is re-parsed individually; one
/// malformed sibling never sinks the rest.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum ReadingNode {
    Collection(Vec<Value>),
    Reading(RawReading),
}

/// A reading leaf as the proxy ships it. Every field is optional; devices
/// disagree on which keys they populate.
#[derive(Debug, Deserialize)]
struct RawReading {
    #[serde(default, deserialize_with = "lenient_string")]
    name: Option<String>,
    #[serde(rename = "ont-optics")]
    nested: Option<Value>,
    #[serde(flatten)]
    metrics: OpticsMetrics,
}

/// Extracts every reading from one OLT's payload rows.
///
/// Each row carries `slot`, `port`, and a `data` object; reading collections
/// may sit under `data.parsed` or directly under `data`, keyed by
/// `ont-optics` and `pon-optics`, and both spots are visited. Rows missing
/// slot or port context fall back to the first requested slot and port.
pub fn extract_readings(
    olt: &str,
    rows: &[Value],
    request_slots: &[String],
    request_ports: &[i64],
) -> Vec<OpticsReading> {
    let mut out = Vec::new();
    for row in rows {
        let ctx = ReadingContext {
            olt: olt.to_string(),
            slot: row
                .get("slot")
                .and_then(value_to_string)
                .or_else(|| request_slots.first().cloned()),
            port: row
                .get("port")
                .and_then(coerce_i64)
                .or_else(|| request_ports.first().copied()),
        };
        process_source(row.get("data").and_then(|d| d.get("parsed")), &ctx, &mut out);
        process_source(row.get("data"), &ctx, &mut out);
    }
    out
}

/// Visits one source object: the `ont-optics` collection first, then
/// `pon-optics`. PON containers are readings in their own right and may
/// carry nested subscriber readings, which the recursive visitor picks up.
fn process_source(source: Option<&Value>, ctx: &ReadingContext, out: &mut Vec<OpticsReading>) {
    let Some(source) = source else {
        return;
    };
    if !source.is_object() {
        return;
    }
    if let Some(ont) = source.get("ont-optics").filter(|v| !v.is_null()) {
        visit_value(ont, ctx, out);
    }
    if let Some(pon) = source.get("pon-optics").filter(|v| !v.is_null()) {
        visit_value(pon, ctx, out);
    }
}

fn visit_value(value: &Value, ctx: &ReadingContext, out: &mut Vec<OpticsReading>) {
    match serde_json::from_value::<ReadingNode>(value.clone()) {
        Ok(node) => visit_node(node, ctx, out),
        Err(e) => tracing::debug!("Skipping unreadable optics node: {}", e),
    }
}

fn visit_node(node: ReadingNode, ctx: &ReadingContext, out: &mut Vec<OpticsReading>) {
    match node {
        ReadingNode::Collection(items) => {
            for item in items {
                match serde_json::from_value::<ReadingNode>(item) {
                    Ok(child) => visit_node(child, ctx, out),
                    Err(e) => tracing::debug!("Skipping unreadable optics entry: {}", e),
                }
            }
        }
        ReadingNode::Reading(raw) => {
            let nested = raw.nested;
            out.push(OpticsReading {
                name: raw.name,
                olt: ctx.olt.clone(),
                slot: ctx.slot.clone(),
                port: ctx.port,
                metrics: raw.metrics,
            });
            if let Some(nested) = nested {
                visit_value(&nested, ctx, out);
            }
        }
    }
}

fn value_to_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// Accepts a string or a number; anything else becomes `None`.
fn lenient_string<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    Ok(value.as_ref().and_then(value_to_string))
}

fn coerce_i64(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n.as_i64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}
