use std::collections::BTreeSet;

use regex::Regex;

use crate::errors::AppError;
use crate::models::GeoBounds;

// ============ Drop Filter ============

/// Drop-completion constraint for the points query.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DropFilter {
    /// No constraint.
    #[default]
    Any,
    /// Drop column text equals "1".
    Completed,
    /// Drop column NULL or text other than "1".
    NotCompleted,
}

impl DropFilter {
    /// Parses the query token. Unknown tokens impose no constraint, matching
    /// the open-filter semantics of the rest of the criteria.
    pub fn parse(raw: Option<&str>) -> Self {
        match raw.map(|v| v.trim().to_ascii_lowercase()) {
            Some(v) if v == "completed" || v == "1" => DropFilter::Completed,
            Some(v) if v == "notcompleted" || v == "0" || v == "null" => DropFilter::NotCompleted,
            _ => DropFilter::Any,
        }
    }
}

// ============ Filter Criteria ============

/// Parsed filter set for one points request. Immutable once built; absent
/// fields impose no condition, present ones AND-compose.
#[derive(Debug, Clone, Default)]
pub struct FilterCriteria {
    /// Spatial constraint; only applied when all four edges arrived.
    pub bounds: Option<GeoBounds>,
    /// City equality.
    pub city: Option<String>,
    /// Normalized FDA tokens.
    pub fda: Vec<String>,
    /// Normalized FDH tokens.
    pub fdh: Vec<String>,
    /// Account status ids; non-numeric entries are dropped during parsing.
    pub statuses: Vec<i32>,
    /// Drop-completion constraint.
    pub drop: DropFilter,
}

impl FilterCriteria {
    /// Parses a raw query string. Repeated keys and comma-joined values are
    /// both accepted for the list parameters. A partial bounding box imposes
    /// no spatial condition; a present-but-unparseable edge is a 400.
    pub fn from_query(raw: &str) -> Result<Self, AppError> {
        let mut min_lat = None;
        let mut max_lat = None;
        let mut min_lng = None;
        let mut max_lng = None;
        let mut city: Option<String> = None;
        let mut drop_raw: Option<String> = None;
        let mut fda_raw: Vec<String> = Vec::new();
        let mut fdh_raw: Vec<String> = Vec::new();
        let mut status_raw: Vec<String> = Vec::new();

        for (key, value) in url::form_urlencoded::parse(raw.as_bytes()) {
            match key.as_ref() {
                "minLat" => min_lat = Some(value.into_owned()),
                "maxLat" => max_lat = Some(value.into_owned()),
                "minLng" => min_lng = Some(value.into_owned()),
                "maxLng" => max_lng = Some(value.into_owned()),
                "city" => city = Some(value.into_owned()),
                "drop" => drop_raw = Some(value.into_owned()),
                "fda" => fda_raw.push(value.into_owned()),
                "fdh" => fdh_raw.push(value.into_owned()),
                "status" => status_raw.push(value.into_owned()),
                _ => {}
            }
        }

        let bounds = match (min_lat, max_lat, min_lng, max_lng) {
            (Some(min_lat), Some(max_lat), Some(min_lng), Some(max_lng)) => Some(GeoBounds {
                min_lat: parse_coordinate("minLat", &min_lat)?,
                max_lat: parse_coordinate("maxLat", &max_lat)?,
                min_lng: parse_coordinate("minLng", &min_lng)?,
                max_lng: parse_coordinate("maxLng", &max_lng)?,
            }),
            _ => None,
        };

        Ok(Self {
            bounds,
            city: city.map(|c| c.trim().to_string()).filter(|c| !c.is_empty()),
            fda: parse_list(&fda_raw)
                .iter()
                .map(|v| normalize_fda(v))
                .filter(|v| !v.is_empty())
                .collect(),
            fdh: parse_list(&fdh_raw)
                .iter()
                .map(|v| normalize_fdh(v))
                .filter(|v| !v.is_empty())
                .collect(),
            statuses: parse_list(&status_raw)
                .iter()
                .filter_map(|v| v.parse::<i32>().ok())
                .collect(),
            drop: DropFilter::parse(drop_raw.as_deref()),
        })
    }
}

fn parse_coordinate(field: &str, raw: &str) -> Result<f64, AppError> {
    let value: f64 = raw
        .trim()
        .parse()
        .map_err(|_| AppError::validation(field, format!("{field} must be a number")))?;
    if !value.is_finite() {
        return Err(AppError::validation(field, format!("{field} must be finite")));
    }
    Ok(value)
}

// ============ List & Token Parsing ============

/// Flattens repeated query values and comma-joined lists into clean tokens.
pub fn parse_list(raw: &[String]) -> Vec<String> {
    raw.iter()
        .flat_map(|v| v.split(','))
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

/// Canonicalizes an FDA token: bare 1-3 digit values and `FDA:n` forms become
/// `FDA:` plus three zero-padded digits; anything else passes through
/// trimmed.
pub fn normalize_fda(value: &str) -> String {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return String::new();
    }
    if Regex::new(r"^\d{1,3}$").unwrap().is_match(trimmed) {
        return format!("FDA:{trimmed:0>3}");
    }
    if let Some(caps) = Regex::new(r"(?i)^FDA:(\d{1,3})$").unwrap().captures(trimmed) {
        let digits = &caps[1];
        return format!("FDA:{digits:0>3}");
    }
    trimmed.to_string()
}

/// Canonicalizes an FDH token. Slightly laxer than the FDA form: the colon is
/// optional and may be followed by spaces, so `FDH: 12` and `FDH12` both
/// canonicalize.
pub fn normalize_fdh(value: &str) -> String {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return String::new();
    }
    if Regex::new(r"^\d{1,3}$").unwrap().is_match(trimmed) {
        return format!("FDH:{trimmed:0>3}");
    }
    if let Some(caps) = Regex::new(r"(?i)^FDH:?\s*(\d{1,3})$")
        .unwrap()
        .captures(trimmed)
    {
        let digits = &caps[1];
        return format!("FDH:{digits:0>3}");
    }
    trimmed.to_string()
}

// ============ Port Spec Parsing ============

/// Parses a free-text port spec such as `"1-4,7, 9-12"` into a deduplicated
/// ascending list. Tokens are separated by commas or whitespace; a token is a
/// single port or an inclusive `low-high` range (reversed ranges are
/// normalized). Values outside `[min, max]` are silently dropped and
/// malformed tokens are skipped, so the result may be empty.
pub fn parse_port_spec(input: &str, min: i64, max: i64) -> Vec<i64> {
    let mut ports = BTreeSet::new();
    if min > max {
        return Vec::new();
    }
    for token in input.split(|c: char| c == ',' || c.is_whitespace()) {
        let token = token.trim();
        if token.is_empty() {
            continue;
        }
        if let Some((lo, hi)) = token.split_once('-') {
            match (lo.trim().parse::<i64>(), hi.trim().parse::<i64>()) {
                (Ok(a), Ok(b)) => {
                    let (start, end) = if a <= b { (a, b) } else { (b, a) };
                    // Clamp before iterating so absurd ranges stay cheap.
                    for port in start.max(min)..=end.min(max) {
                        ports.insert(port);
                    }
                }
                _ => continue,
            }
        } else if let Ok(port) = token.parse::<i64>() {
            if port >= min && port <= max {
                ports.insert(port);
            }
        }
    }
    ports.into_iter().collect()
}

/// The full configured port range, used when a request names no ports.
pub fn full_port_range(min: i64, max: i64) -> Vec<i64> {
    if min > max {
        return Vec::new();
    }
    (min..=max).collect()
}
